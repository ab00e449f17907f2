// Copyright 2026 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! The remote side of the protocol, serving a local directory tree.
//!
//! A [Dispatcher] turns one request envelope, plus an optional attachment,
//! into a framed response body. It doesn't listen on a socket: hosting it
//! behind HTTP is up to the caller, and [crate::LoopbackChannel] calls it
//! directly.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::envelope::{
    field, failure_body, session_expired_body, success_body, ChunkName, OpTag, Request,
};
use crate::errors::{RemoteError, RemoteKind};
use crate::filter::ListFilter;
use crate::rpc::Operation;
use crate::value::decode_params;

mod auth;
mod chunks;
mod files;

pub use auth::CredentialCheck;
use auth::LoginTable;

/// After this many consecutive failed logins, each further attempt for the
/// same identity is delayed.
pub const LOGIN_FAILURE_THRESHOLD: u32 = 3;

/// Default delay imposed on logins past the failure threshold.
pub const DEFAULT_LOGIN_DELAY: Duration = Duration::from_secs(2);

type HandlerResult = std::result::Result<Vec<u8>, RemoteError>;

/// Answers protocol requests against files under a root directory.
pub struct Dispatcher {
    root: PathBuf,
    logins: LoginTable,
    /// Listing filters uploaded by name.
    filters: Mutex<HashMap<String, String>>,
}

impl Dispatcher {
    pub fn new(root: &Path, credentials: Box<dyn CredentialCheck>) -> Dispatcher {
        Dispatcher {
            root: root.to_owned(),
            logins: LoginTable::new(credentials, DEFAULT_LOGIN_DELAY),
            filters: Mutex::default(),
        }
    }

    /// Set the delay imposed on logins after repeated failures.
    #[must_use]
    pub fn with_login_delay(mut self, delay: Duration) -> Dispatcher {
        self.logins.set_delay(delay);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of tokens currently issued.
    pub fn live_tokens(&self) -> usize {
        self.logins.live_tokens()
    }

    /// Handle one request and return the response body.
    ///
    /// Every outcome, including failures, is framed in the body.
    #[instrument(skip_all, fields(op = ?request.op(), path = ?request.get(field::PATH)))]
    pub fn dispatch(&self, request: &Request, attachment: Option<&mut dyn Read>) -> Vec<u8> {
        let Some(op) = request.op() else {
            warn!("Request has no recognized operation");
            return failure_body(&RemoteError::new(
                RemoteKind::BadArgument,
                "missing or unknown operation",
            ));
        };
        let identity = request.get(field::IDENTITY).unwrap_or_default();
        let token = request.get(field::TOKEN).unwrap_or_default();
        let result = match op {
            OpTag::Login => {
                let credential = request.get(field::CREDENTIAL).unwrap_or_default();
                return self.logins.login(identity, credential);
            }
            _ if !self.logins.verify(identity, token) => {
                debug!(identity, "Rejecting unknown token");
                return session_expired_body();
            }
            OpTag::Logoff => {
                self.logins.revoke(token);
                Ok(success_body::<_, &str>([]))
            }
            OpTag::Call => self.call(request),
            OpTag::List => self.list(request),
            OpTag::Download => self.download(request),
            OpTag::Upload => self.upload(request, attachment),
            OpTag::PutFilter => self.put_filter(request, attachment),
        };
        result.unwrap_or_else(|err| {
            debug!(%err, "Request failed");
            failure_body(&err)
        })
    }

    fn call(&self, request: &Request) -> HandlerResult {
        let path = required(request, field::PATH)?;
        let method = required(request, field::METHOD)?;
        let op: Operation = method.parse().map_err(|_| {
            RemoteError::new(
                RemoteKind::BadArgument,
                format!("operation {method:?} is not allowed"),
            )
        })?;
        let args = decode_params(
            request.get(field::PARAM_TYPES).unwrap_or_default(),
            request.get(field::PARAM_VALUES).unwrap_or_default(),
        )
        .and_then(|args| op.check_args(&args).map(|()| args))
        .map_err(|err| RemoteError::new(RemoteKind::BadArgument, err.to_string()))?;
        let value = files::call(&self.root, path, op, &args)?;
        Ok(success_body([value.encode()]))
    }

    fn list(&self, request: &Request) -> HandlerResult {
        let path = required(request, field::PATH)?;
        let encoded = match (request.get(field::FILTER), request.get(field::FILTER_REF)) {
            (Some(inline), _) => Some(inline.to_owned()),
            (None, Some(name)) => Some(
                self.filters
                    .lock()
                    .expect("filter table lock poisoned")
                    .get(name)
                    .cloned()
                    .ok_or_else(|| {
                        RemoteError::new(RemoteKind::NotFound, format!("no filter named {name:?}"))
                    })?,
            ),
            (None, None) => None,
        };
        let filter = encoded
            .map(|e| ListFilter::decode(&e))
            .transpose()
            .map_err(|err| RemoteError::new(RemoteKind::BadArgument, err.to_string()))?;
        files::list(&self.root, path, filter.as_ref())
    }

    fn download(&self, request: &Request) -> HandlerResult {
        let path = required(request, field::PATH)?;
        if request.get(field::CHUNK_LENGTH).is_some() {
            let (chunk, chunk_len) = chunk_of(request, path)?;
            chunks::read_chunk(&self.root, &chunk, chunk_len)
        } else {
            chunks::read_whole(&self.root, path)
        }
    }

    fn upload(&self, request: &Request, attachment: Option<&mut dyn Read>) -> HandlerResult {
        let path = required(request, field::PATH)?;
        let content = attachment.ok_or_else(|| {
            RemoteError::new(RemoteKind::BadArgument, "upload has no attachment")
        })?;
        if request.get(field::CHUNK_LENGTH).is_some() {
            let (chunk, chunk_len) = chunk_of(request, path)?;
            chunks::write_chunk(&self.root, &chunk, chunk_len, content)
        } else {
            chunks::write_whole(&self.root, path, content)
        }
    }

    fn put_filter(&self, request: &Request, attachment: Option<&mut dyn Read>) -> HandlerResult {
        let name = required(request, field::PATH)?;
        let content = attachment.ok_or_else(|| {
            RemoteError::new(RemoteKind::BadArgument, "filter upload has no attachment")
        })?;
        let mut encoded = String::new();
        content.read_to_string(&mut encoded).map_err(|err| {
            RemoteError::new(RemoteKind::BadArgument, format!("reading filter: {err}"))
        })?;
        debug!(name, len = encoded.len(), "Stored listing filter");
        self.filters
            .lock()
            .expect("filter table lock poisoned")
            .insert(name.to_owned(), encoded);
        Ok(success_body::<_, &str>([]))
    }
}

fn required<'r>(request: &'r Request, key: &str) -> std::result::Result<&'r str, RemoteError> {
    request
        .get(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RemoteError::new(RemoteKind::BadArgument, format!("missing {key}")))
}

/// A request carrying a chunk length names one chunk of a file; any other
/// path is a whole file, however it is spelled.
fn chunk_of(
    request: &Request,
    path: &str,
) -> std::result::Result<(ChunkName, u64), RemoteError> {
    let chunk_len = required(request, field::CHUNK_LENGTH)?
        .parse()
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| RemoteError::new(RemoteKind::BadArgument, "bad chunk-length"))?;
    let chunk = ChunkName::parse(path).ok_or_else(|| {
        RemoteError::new(
            RemoteKind::BadArgument,
            format!("{path:?} is not a chunk name"),
        )
    })?;
    Ok((chunk, chunk_len))
}

/// Map a remote path onto the served tree.
///
/// Leading slashes are relative to the root; `..` and drive prefixes are refused.
fn resolve(root: &Path, path: &str) -> std::result::Result<PathBuf, RemoteError> {
    let mut full = root.to_owned();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(name) => full.push(name),
            Component::CurDir => (),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RemoteError::new(
                    RemoteKind::BadArgument,
                    format!("path {path:?} escapes the served tree"),
                ))
            }
        }
    }
    Ok(full)
}

/// Describe a local IO failure for the wire, with its debug form as the trace.
fn io_failure(path: &str, err: std::io::Error) -> RemoteError {
    let mut remote = RemoteError::new(err.kind().into(), format!("{path}: {err}"));
    remote.trace = format!("{err:?}");
    remote
}
