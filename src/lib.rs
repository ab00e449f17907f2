// Copyright 2026 Martin Pool.

//! Remote file access over HTTP.
//!
//! A [Session] logs in to an endpoint and then queries and changes files
//! behind it: typed metadata calls, directory listings, and reads and writes
//! of file content. Large contents move in chunks through a local buffer, so
//! a transfer that fails part way can be retried without resending the
//! chunks that already arrived.
//!
//! [server::Dispatcher] implements the remote side over a local directory.

pub mod channel;
pub mod config;
pub mod counters;
pub mod download;
pub mod envelope;
pub mod errors;
pub mod filter;
pub mod http;
pub mod loopback;
pub mod progress;
pub mod record;
pub mod rpc;
pub mod server;
pub mod session;
pub mod spill;
pub mod upload;
pub mod value;

pub use crate::channel::{Attachment, Channel};
pub use crate::config::SessionConfig;
pub use crate::counters::{Counter, Counters};
pub use crate::download::{ChunkedReader, ReadState};
pub use crate::errors::{Error, ErrorKind, RemoteError, RemoteKind, Result};
pub use crate::filter::{EntryKind, ListFilter};
pub use crate::http::HttpChannel;
pub use crate::loopback::LoopbackChannel;
pub use crate::progress::{ProgressStore, TransferCaches, TransferKey};
pub use crate::record::{Call, Verb};
pub use crate::rpc::{MetadataClient, Operation};
pub use crate::server::{CredentialCheck, Dispatcher};
pub use crate::session::{Session, SessionToken};
pub use crate::upload::{ChunkedWriter, UploadOutcome};
pub use crate::value::{Value, ValueType};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
