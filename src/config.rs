// Copyright 2026 Martin Pool.

//! Session configuration: timeouts, compression, proxy, and chunk sizes.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Error, Result};

/// Default chunk size for uploads and downloads: 10 MB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Filters whose encoding is longer than this are uploaded rather than sent inline.
pub const DEFAULT_FILTER_INLINE_LIMIT: usize = 1024;

/// Configuration of a session and its channel.
///
/// All fields have defaults, so a JSON file only needs the ones it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for establishing a connection, in milliseconds; 0 means none.
    pub connect_timeout_ms: u64,
    /// Deadline for each read from the server, in milliseconds; 0 means none.
    pub read_timeout_ms: u64,
    /// Ask the server for gzip-compressed responses.
    pub compression: bool,
    /// Proxy URL, such as `http://proxy.example:3128`.
    pub proxy: Option<String>,
    /// Upload chunk size in bytes; 0 sends the whole content in one request.
    pub upload_chunk_size: u64,
    /// Download chunk size in bytes; 0 fetches the whole content in one request.
    pub download_chunk_size: u64,
    pub filter_inline_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_timeout_ms: 30_000,
            read_timeout_ms: 0,
            compression: true,
            proxy: None,
            upload_chunk_size: DEFAULT_CHUNK_SIZE,
            download_chunk_size: DEFAULT_CHUNK_SIZE,
            filter_inline_limit: DEFAULT_FILTER_INLINE_LIMIT,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<SessionConfig> {
        let json = fs::read(path).map_err(|err| Error::io_error(path, err))?;
        let config: SessionConfig = serde_json::from_slice(&json)
            .map_err(|err| Error::InvalidArgument(format!("bad config {path:?}: {err}")))?;
        debug!(?path, ?config, "Loaded session config");
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        nonzero_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        nonzero_millis(self.read_timeout_ms)
    }

    /// Set both chunk sizes.
    #[must_use]
    pub fn with_chunk_size(self, chunk_size: u64) -> SessionConfig {
        SessionConfig {
            upload_chunk_size: chunk_size,
            download_chunk_size: chunk_size,
            ..self
        }
    }
}

fn nonzero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
