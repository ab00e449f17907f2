// Copyright 2026 Martin Pool.

//! Local spill buffers holding the chunks of one transfer.
//!
//! The caller names a buffer directory. Within it each transfer gets its own
//! subdirectory, named from the direction and a hash of the identity and
//! remote path, so several transfers and users can share one buffer
//! directory. Chunks are written to
//! `<seq>.part` and renamed to `<seq>.chunk` once complete.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use blake2_rfc::blake2b::Blake2b;
use tracing::{debug, trace};

use crate::errors::{Error, Result};

/// Which way the transfer goes, which keeps upload and download buffers apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

#[derive(Debug, Clone)]
pub struct SpillBuffer {
    dir: PathBuf,
}

impl SpillBuffer {
    /// The spill area for one transfer. The directory is created when the
    /// first chunk is written.
    pub fn new(
        buffer: &Path,
        direction: Direction,
        identity: &str,
        remote_path: &str,
    ) -> SpillBuffer {
        let prefix = match direction {
            Direction::Download => "down",
            Direction::Upload => "up",
        };
        let mut hasher = Blake2b::new(16);
        hasher.update(&(identity.len() as u64).to_le_bytes());
        hasher.update(identity.as_bytes());
        hasher.update(remote_path.as_bytes());
        let hash = hasher.finalize();
        let dir = buffer.join(format!("{prefix}-{}", hex::encode(hash.as_bytes())));
        trace!(?dir, identity, remote_path, "Spill buffer");
        SpillBuffer { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{seq}.chunk"))
    }

    fn partial_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{seq}.part"))
    }

    pub fn has_chunk(&self, seq: u64) -> bool {
        self.chunk_path(seq).is_file()
    }

    /// Length of a complete chunk, or None if it's not present.
    pub fn chunk_len(&self, seq: u64) -> Option<u64> {
        fs::metadata(self.chunk_path(seq))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    /// Start writing a chunk, discarding any partial copy from an earlier attempt.
    pub fn create_partial(&self, seq: u64) -> Result<File> {
        fs::create_dir_all(&self.dir).map_err(|err| Error::io_error(&self.dir, err))?;
        let path = self.partial_path(seq);
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| Error::io_error(&path, err))
    }

    /// Length of a partial chunk written so far.
    pub fn partial_len(&self, seq: u64) -> Result<u64> {
        let path = self.partial_path(seq);
        match fs::metadata(&path) {
            Ok(m) => Ok(m.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(Error::io_error(&path, err)),
        }
    }

    /// Open a partial chunk for reading.
    pub fn open_partial(&self, seq: u64) -> Result<File> {
        let path = self.partial_path(seq);
        File::open(&path).map_err(|err| Error::io_error(&path, err))
    }

    /// Mark a partial chunk complete.
    pub fn commit(&self, seq: u64) -> Result<()> {
        let from = self.partial_path(seq);
        let to = self.chunk_path(seq);
        fs::rename(&from, &to).map_err(|err| Error::io_error(&from, err))
    }

    pub fn open_chunk(&self, seq: u64) -> Result<File> {
        let path = self.chunk_path(seq);
        File::open(&path).map_err(|err| Error::io_error(&path, err))
    }

    /// Number of complete chunk files present.
    pub fn chunk_count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().ends_with(".chunk"))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Delete all chunk files for this transfer.
    pub fn clear(&self) -> Result<()> {
        debug!(dir = ?self.dir, "Clear spill buffer");
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io_error(&self.dir, err)),
        }
    }
}
