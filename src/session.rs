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

//! Sessions: log in, make calls and transfers, log off.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::channel::Channel;
use crate::config::SessionConfig;
use crate::counters::Counters;
use crate::download::ChunkedReader;
use crate::envelope::{field, OpTag, Request, INVALID_LOGIN, LOGIN_OK};
use crate::errors::{Error, Result};
use crate::filter::ListFilter;
use crate::http::HttpChannel;
use crate::progress::TransferCaches;
use crate::rpc::{MetadataClient, Operation};
use crate::upload::{ChunkedWriter, UploadOutcome};
use crate::value::Value;

/// The identity and token issued at login, sent with every later request.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    identity: String,
    token: String,
}

impl SessionToken {
    pub fn new(identity: &str, token: &str) -> SessionToken {
        SessionToken {
            identity: identity.to_owned(),
            token: token.to_owned(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Start a request carrying this identity and token.
    pub fn request(&self, op: OpTag) -> Request {
        Request::new(op)
            .with(field::IDENTITY, self.identity.as_str())
            .with(field::TOKEN, self.token.as_str())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("identity", &self.identity)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// What a logged-in session knows; never changes after login.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub endpoint: String,
    pub token: SessionToken,
    pub config: SessionConfig,
}

/// A logged-in connection to a remote endpoint.
///
/// A session's channel serves one caller at a time, which the `&mut self`
/// receivers enforce. Clone the session to get an independent channel for
/// concurrent use; clones share the token, counters, and transfer records.
pub struct Session {
    /// None once logged off.
    state: Option<Arc<SessionState>>,
    channel: Box<dyn Channel>,
    caches: Arc<TransferCaches>,
    counters: Arc<Counters>,
}

impl Session {
    /// Log in over HTTP.
    pub fn login(
        endpoint: &Url,
        identity: &str,
        credential: &str,
        config: SessionConfig,
    ) -> Result<Session> {
        let channel = HttpChannel::new(endpoint, &config)?;
        Session::login_with(
            Box::new(channel),
            identity,
            credential,
            config,
            TransferCaches::new(),
        )
    }

    /// Log in over a given channel, sharing the given transfer records.
    #[instrument(skip(channel, credential, config, caches))]
    pub fn login_with(
        mut channel: Box<dyn Channel>,
        identity: &str,
        credential: &str,
        config: SessionConfig,
        caches: Arc<TransferCaches>,
    ) -> Result<Session> {
        if identity.is_empty() {
            return Err(Error::InvalidArgument("empty identity".to_owned()));
        }
        if credential.is_empty() {
            return Err(Error::InvalidArgument("empty credential".to_owned()));
        }
        let request = Request::new(OpTag::Login)
            .with(field::IDENTITY, identity)
            .with(field::CREDENTIAL, credential);
        let response = channel.send(&request)?;
        let first = response.first_line().unwrap_or_default();
        let token = match first.split_once(' ') {
            Some((LOGIN_OK, token)) if !token.trim().is_empty() => token.trim(),
            _ if first == INVALID_LOGIN => {
                warn!(identity, "Login rejected");
                return Err(Error::InvalidLogin {
                    identity: identity.to_owned(),
                });
            }
            _ => {
                return Err(Error::protocol(format!(
                    "unexpected login response {first:?}"
                )))
            }
        };
        let endpoint = channel.endpoint();
        info!(identity, %endpoint, "Logged in");
        Ok(Session {
            state: Some(Arc::new(SessionState {
                endpoint,
                token: SessionToken::new(identity, token),
                config,
            })),
            channel,
            caches,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Revoke the token and close the channel.
    ///
    /// Afterwards every operation fails with [Error::SessionClosed] without
    /// touching the network. Logging off twice is harmless.
    pub fn logoff(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        let request = state.token.request(OpTag::Logoff);
        if let Err(err) = self.channel.send(&request) {
            warn!(?err, "Server didn't accept logoff; dropping token anyway");
        }
        self.channel.close();
        debug!(identity = state.token.identity(), "Logged off");
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub fn identity(&self) -> Option<&str> {
        self.state.as_deref().map(|s| s.token.identity())
    }

    pub fn token(&self) -> Option<&SessionToken> {
        self.state.as_deref().map(|s| &s.token)
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.state.as_deref().map(|s| &s.config)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.state.as_deref().map(|s| s.endpoint.as_str())
    }

    /// Transfer records shared by this session and its clones.
    pub fn caches(&self) -> &Arc<TransferCaches> {
        &self.caches
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// The live state and channel, or an error if logged off.
    pub(crate) fn parts(&mut self) -> Result<(Arc<SessionState>, &mut dyn Channel)> {
        match &self.state {
            Some(state) => Ok((Arc::clone(state), self.channel.as_mut())),
            None => Err(Error::SessionClosed),
        }
    }

    /// A client for metadata calls and listings.
    pub fn metadata(&mut self) -> Result<MetadataClient<'_>> {
        let state = self.state.as_deref().ok_or(Error::SessionClosed)?;
        Ok(MetadataClient {
            channel: self.channel.as_mut(),
            token: &state.token,
            counters: &self.counters,
            filter_inline_limit: state.config.filter_inline_limit,
        })
    }

    /// Call an allow-listed metadata operation by name.
    pub fn call(&mut self, path: &str, operation: &str, args: &[Value]) -> Result<Value> {
        self.metadata()?.call(path, operation, args)
    }

    fn call_bool(&mut self, path: &str, op: Operation, args: &[Value]) -> Result<bool> {
        let value = self.metadata()?.call_op(path, op, args)?;
        value
            .as_bool()
            .ok_or_else(|| Error::protocol(format!("{} returned {value}", op.as_ref())))
    }

    fn call_long(&mut self, path: &str, op: Operation) -> Result<i64> {
        let value = self.metadata()?.call_op(path, op, &[])?;
        value
            .as_long()
            .ok_or_else(|| Error::protocol(format!("{} returned {value}", op.as_ref())))
    }

    pub fn exists(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::Exists, &[])
    }

    pub fn is_file(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::IsFile, &[])
    }

    pub fn is_directory(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::IsDirectory, &[])
    }

    pub fn is_hidden(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::IsHidden, &[])
    }

    /// Length in bytes; 0 if the file doesn't exist.
    pub fn length(&mut self, path: &str) -> Result<u64> {
        Ok(self.call_long(path, Operation::Length)?.max(0) as u64)
    }

    /// Modification time in milliseconds since the epoch; 0 if the file doesn't exist.
    pub fn last_modified(&mut self, path: &str) -> Result<i64> {
        self.call_long(path, Operation::LastModified)
    }

    /// Modification time, or None if the file doesn't exist.
    pub fn last_modified_time(&mut self, path: &str) -> Result<Option<OffsetDateTime>> {
        match self.last_modified(path)? {
            0 => Ok(None),
            ms => OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
                .map(Some)
                .map_err(|err| Error::protocol(format!("bad timestamp {ms}: {err}"))),
        }
    }

    pub fn can_read(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::CanRead, &[])
    }

    pub fn can_write(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::CanWrite, &[])
    }

    pub fn can_execute(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::CanExecute, &[])
    }

    pub fn delete(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::Delete, &[])
    }

    /// Create an empty file; false if it already existed.
    pub fn create_new_file(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::CreateNewFile, &[])
    }

    pub fn mkdir(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::Mkdir, &[])
    }

    pub fn mkdirs(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::Mkdirs, &[])
    }

    pub fn rename_to(&mut self, path: &str, dest: &str) -> Result<bool> {
        self.call_bool(path, Operation::RenameTo, &[dest.into()])
    }

    pub fn set_last_modified(&mut self, path: &str, millis: i64) -> Result<bool> {
        self.call_bool(path, Operation::SetLastModified, &[millis.into()])
    }

    pub fn set_read_only(&mut self, path: &str) -> Result<bool> {
        self.call_bool(path, Operation::SetReadOnly, &[])
    }

    pub fn set_readable(&mut self, path: &str, readable: bool) -> Result<bool> {
        self.call_bool(path, Operation::SetReadable, &[readable.into()])
    }

    pub fn set_writable(&mut self, path: &str, writable: bool) -> Result<bool> {
        self.call_bool(path, Operation::SetWritable, &[writable.into()])
    }

    pub fn set_executable(&mut self, path: &str, executable: bool) -> Result<bool> {
        self.call_bool(path, Operation::SetExecutable, &[executable.into()])
    }

    /// List a directory: None if it doesn't exist, empty if it's empty.
    pub fn list(&mut self, path: &str, filter: Option<&ListFilter>) -> Result<Option<Vec<String>>> {
        self.metadata()?.list(path, filter)
    }

    /// Open a remote file for reading, spilling chunks into `buffer`.
    ///
    /// A later reader with the same buffer directory resumes after the
    /// chunks this one completed.
    pub fn open_read(&mut self, path: &str, buffer: &Path) -> Result<ChunkedReader<'_>> {
        ChunkedReader::new(self, path, buffer)
    }

    /// Open a remote file for writing, spilling chunks into `buffer`.
    ///
    /// If `expected_len` is given and fewer bytes are written before
    /// [ChunkedWriter::finish], the upload is treated as aborted and can be
    /// resumed later through the same buffer.
    pub fn open_write(
        &mut self,
        path: &str,
        buffer: &Path,
        expected_len: Option<u64>,
    ) -> Result<ChunkedWriter<'_>> {
        ChunkedWriter::new(self, path, buffer, expected_len)
    }

    /// Read a whole remote file.
    pub fn read_all(&mut self, path: &str, buffer: &Path) -> Result<Bytes> {
        let mut reader = self.open_read(path, buffer)?;
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .map_err(|err| Error::from_io(buffer, err))?;
        Ok(content.into())
    }

    /// Write a whole remote file.
    pub fn write_all(&mut self, path: &str, buffer: &Path, content: &[u8]) -> Result<()> {
        let mut writer = self.open_write(path, buffer, Some(content.len() as u64))?;
        writer
            .write_all(content)
            .map_err(|err| Error::from_io(buffer, err))?;
        match writer.finish()? {
            UploadOutcome::Completed { .. } => Ok(()),
            UploadOutcome::Aborted { written, expected } => Err(Error::protocol(format!(
                "upload stopped after {written} of {expected} bytes"
            ))),
        }
    }

    /// Forget all transfer records for this identity, so that the next
    /// transfers start from scratch.
    pub fn forget_transfers(&self) -> usize {
        match self.identity() {
            Some(identity) => self.caches.remove_identity(identity),
            None => 0,
        }
    }

    pub(crate) fn shared(&self) -> (Arc<TransferCaches>, Arc<Counters>) {
        (Arc::clone(&self.caches), Arc::clone(&self.counters))
    }
}

impl Clone for Session {
    /// Make a session with the same token and an independent channel.
    fn clone(&self) -> Self {
        Session {
            state: self.state.clone(),
            channel: self.channel.fresh(),
            caches: Arc::clone(&self.caches),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint())
            .field("identity", &self.identity())
            .field("open", &self.is_open())
            .finish()
    }
}
