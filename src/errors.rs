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

//! Errors from remote file operations: local validation, connectivity,
//! protocol, authentication, and failures reported by the remote side.

use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use derive_more::Display;
use strum_macros::{AsRefStr, EnumIter, EnumString};
use thiserror::Error;

/// An error from a session, a transfer, or a metadata call.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid login or password for {identity:?}")]
    InvalidLogin { identity: String },

    #[error("Session expired or token rejected by the server")]
    SessionExpired,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Operation {name:?} is not allowed")]
    OperationNotAllowed { name: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timed out talking to {url}")]
    Timeout { url: String },

    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("IO error on local buffer {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// General categories of errors, for callers that want to branch on them.
#[derive(Debug, Display, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    #[display(fmt = "Not found")]
    NotFound,

    #[display(fmt = "Permission denied")]
    PermissionDenied,

    #[display(fmt = "Bad argument")]
    BadArgument,

    #[display(fmt = "Already exists")]
    AlreadyExists,

    #[display(fmt = "Connectivity error")]
    Connectivity,

    #[display(fmt = "Server internal error")]
    ServerInternal,

    #[display(fmt = "Other remote error")]
    RemoteOther,

    #[display(fmt = "Authentication error")]
    Authentication,

    #[display(fmt = "Protocol error")]
    Protocol,

    #[display(fmt = "Local validation error")]
    Validation,

    #[display(fmt = "Local IO error")]
    LocalIo,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidLogin { .. } | Error::SessionExpired => ErrorKind::Authentication,
            Error::SessionClosed
            | Error::OperationNotAllowed { .. }
            | Error::InvalidArgument(_) => ErrorKind::Validation,
            Error::Timeout { .. } | Error::Connect { .. } | Error::HttpStatus { .. } => {
                ErrorKind::Connectivity
            }
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Remote(remote) => remote.kind.into(),
            Error::Io { .. } => ErrorKind::LocalIo,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// True if the caller should log in again before retrying.
    pub fn is_authentication(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }

    pub(crate) fn io_error(path: &Path, source: io::Error) -> Error {
        Error::Io {
            path: path.to_owned(),
            source,
        }
    }

    pub(crate) fn protocol<S: Into<String>>(message: S) -> Error {
        Error::Protocol(message.into())
    }

    /// Recover the error behind an [io::Error] returned by a transfer's
    /// `Read` or `Write` impl; anything else is a local IO error on `path`.
    pub fn from_io(path: &Path, err: io::Error) -> Error {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::io_error(path, err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(err)) => *err,
            Some(Err(inner)) => Error::io_error(path, io::Error::new(kind, inner)),
            None => Error::io_error(path, kind.into()),
        }
    }

    /// Classify an IO error while reading a response stream from `url`.
    pub(crate) fn from_stream(url: &str, err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout {
                url: url.to_owned(),
            },
            _ => Error::Connect {
                url: url.to_owned(),
                source: Box::new(err),
            },
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match err.kind() {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::PermissionDenied | ErrorKind::Authentication => {
                io::ErrorKind::PermissionDenied
            }
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::BadArgument | ErrorKind::Validation => io::ErrorKind::InvalidInput,
            ErrorKind::Protocol => io::ErrorKind::InvalidData,
            ErrorKind::Connectivity if matches!(err, Error::Timeout { .. }) => {
                io::ErrorKind::TimedOut
            }
            ErrorKind::Connectivity => io::ErrorKind::ConnectionAborted,
            _ => io::ErrorKind::Other,
        };
        match err {
            // Pass local IO errors through rather than nesting them.
            Error::Io { source, .. } => source,
            err => io::Error::new(kind, err),
        }
    }
}

/// Categories of failure that the remote side reports by tag.
///
/// The string forms are the tags on the wire.
#[derive(Debug, Display, PartialEq, Eq, Clone, Copy, EnumString, AsRefStr, EnumIter)]
pub enum RemoteKind {
    #[display(fmt = "Not found")]
    NotFound,
    #[display(fmt = "Permission denied")]
    PermissionDenied,
    #[display(fmt = "Bad argument")]
    BadArgument,
    #[display(fmt = "Already exists")]
    AlreadyExists,
    #[display(fmt = "Remote connectivity error")]
    Connectivity,
    #[display(fmt = "Server internal error")]
    ServerInternal,
    /// Any tag not in the closed set above.
    #[strum(disabled)]
    #[display(fmt = "Remote error")]
    Other,
}

impl From<RemoteKind> for ErrorKind {
    fn from(kind: RemoteKind) -> Self {
        match kind {
            RemoteKind::NotFound => ErrorKind::NotFound,
            RemoteKind::PermissionDenied => ErrorKind::PermissionDenied,
            RemoteKind::BadArgument => ErrorKind::BadArgument,
            RemoteKind::AlreadyExists => ErrorKind::AlreadyExists,
            RemoteKind::Connectivity => ErrorKind::Connectivity,
            RemoteKind::ServerInternal => ErrorKind::ServerInternal,
            RemoteKind::Other => ErrorKind::RemoteOther,
        }
    }
}

impl From<io::ErrorKind> for RemoteKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => RemoteKind::NotFound,
            io::ErrorKind::AlreadyExists => RemoteKind::AlreadyExists,
            io::ErrorKind::PermissionDenied => RemoteKind::PermissionDenied,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => RemoteKind::BadArgument,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut => RemoteKind::Connectivity,
            _ => RemoteKind::ServerInternal,
        }
    }
}

/// A failure reported in-band by the remote side.
///
/// The tag, message, and trace are kept exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteKind,
    /// The failure-kind tag as sent by the server.
    pub tag: String,
    pub message: String,
    /// Diagnostic trace text from the server.
    pub trace: String,
}

impl RemoteError {
    /// Reconstruct a remote error from its three wire fields.
    pub fn decode(tag: &str, message: &str, trace: &str) -> RemoteError {
        RemoteError {
            kind: RemoteKind::from_str(tag).unwrap_or(RemoteKind::Other),
            tag: tag.to_owned(),
            message: message.to_owned(),
            trace: trace.to_owned(),
        }
    }

    pub fn new<M: Into<String>>(kind: RemoteKind, message: M) -> RemoteError {
        RemoteError {
            kind,
            tag: kind.as_ref().to_owned(),
            message: message.into(),
            trace: String::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
