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

//! Write a remote file in fixed-size chunks, spilling each to a local buffer.
//!
//! Bytes written are collected in the buffer and each chunk is sent as soon
//! as it is full. Finishing sends whatever is left over as the last chunk.
//! When the content ends exactly on a chunk boundary nothing more is sent,
//! except that empty content is sent as one empty last chunk. Chunks the
//! server acknowledged in an earlier attempt through the same buffer are not
//! sent again.

use std::cmp::min;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, trace, warn};

use crate::channel::{Attachment, Channel};
use crate::counters::{Counter, Counters};
use crate::envelope::{field, ChunkName, OpTag};
use crate::errors::{Error, Result};
use crate::progress::{TransferCaches, TransferKey};
use crate::rpc::check_path;
use crate::session::{Session, SessionState};
use crate::spill::{Direction, SpillBuffer};

/// How an upload ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The server has the whole content.
    Completed {
        len: u64,
        /// Chunks sent in this attempt; 0 for a single-request upload.
        chunks_sent: u64,
        /// Chunks an earlier attempt had already delivered.
        chunks_skipped: u64,
    },
    /// Fewer bytes than declared were written. The chunks delivered so far
    /// are kept, and a later writer with the same buffer continues from them.
    Aborted { written: u64, expected: u64 },
}

/// Writes a remote file through a session, in chunks.
pub struct ChunkedWriter<'a> {
    channel: &'a mut dyn Channel,
    state: Arc<SessionState>,
    caches: Arc<TransferCaches>,
    counters: Arc<Counters>,
    path: String,
    key: TransferKey,
    spill: SpillBuffer,
    chunk_size: u64,
    expected_len: Option<u64>,
    written: u64,
    /// Number of the chunk being filled.
    seq: u64,
    /// The partial file for `seq`, once something's been written to it.
    part: Option<File>,
    buffered: u64,
    sent: u64,
    skipped: u64,
    failed: bool,
}

impl<'a> ChunkedWriter<'a> {
    pub(crate) fn new(
        session: &'a mut Session,
        path: &str,
        buffer: &Path,
        expected_len: Option<u64>,
    ) -> Result<ChunkedWriter<'a>> {
        check_path(path)?;
        let (caches, counters) = session.shared();
        let (state, channel) = session.parts()?;
        let key = TransferKey::new(state.token.identity(), buffer, path);
        let spill = SpillBuffer::new(buffer, Direction::Upload, state.token.identity(), path);
        let chunk_size = state.config.upload_chunk_size;
        if chunk_size > 0 {
            let confirmed = caches.uploads.confirmed_count(&key);
            if confirmed > 0 {
                info!(path, confirmed, "Resuming upload");
            }
            caches.uploads.begin(&key);
        }
        Ok(ChunkedWriter {
            channel,
            state,
            caches,
            counters,
            path: path.to_owned(),
            key,
            spill,
            chunk_size,
            expected_len,
            written: 0,
            seq: 1,
            part: None,
            buffered: 0,
            sent: 0,
            skipped: 0,
            failed: false,
        })
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Send everything written, and report whether the upload completed.
    ///
    /// If a length was declared when opening and fewer bytes were written,
    /// nothing more is sent and the outcome is [UploadOutcome::Aborted].
    #[instrument(skip(self), fields(path = %self.path, written = self.written))]
    pub fn finish(mut self) -> Result<UploadOutcome> {
        if self.failed {
            return Err(Error::protocol(format!(
                "upload of {} already failed",
                self.path
            )));
        }
        if let Some(expected) = self.expected_len {
            if self.written < expected {
                info!(expected, "Upload stopped short; keeping state for a retry");
                return Ok(UploadOutcome::Aborted {
                    written: self.written,
                    expected,
                });
            }
        }
        if self.chunk_size == 0 {
            self.send_whole()?;
        } else {
            if self.buffered > 0 || self.seq == 1 {
                self.flush_chunk(true)?;
            }
            self.caches.uploads.remove(&self.key);
        }
        self.spill.clear()?;
        debug!(sent = self.sent, skipped = self.skipped, "Upload complete");
        Ok(UploadOutcome::Completed {
            len: self.written,
            chunks_sent: self.sent,
            chunks_skipped: self.skipped,
        })
    }

    fn partial(&mut self) -> Result<&mut File> {
        let file = match self.part.take() {
            Some(file) => file,
            None => self.spill.create_partial(self.seq)?,
        };
        Ok(self.part.insert(file))
    }

    /// Deliver the buffered chunk unless an earlier attempt already did.
    fn flush_chunk(&mut self, last: bool) -> Result<()> {
        let seq = self.seq;
        let len = self.buffered;
        self.partial()?;
        self.part = None;
        self.spill.commit(seq)?;
        if self.caches.uploads.is_confirmed(&self.key, seq) {
            trace!(seq, "Chunk already delivered");
            self.counters.count(Counter::ChunksSkipped, 1);
            self.skipped += 1;
        } else {
            let name = ChunkName::new(&self.path, seq, last).to_string();
            trace!(%name, len, "Send chunk");
            let request = self
                .state
                .token
                .request(OpTag::Upload)
                .with(field::PATH, name.as_str())
                .with(field::CHUNK_LENGTH, self.chunk_size.to_string());
            let mut file = self.spill.open_chunk(seq)?;
            self.channel.send_with_attachment(
                &request,
                Attachment {
                    name,
                    len,
                    reader: &mut file,
                },
            )?;
            self.caches.uploads.confirm(&self.key, seq);
            self.counters.count(Counter::ChunksUploaded, 1);
            self.counters.count(Counter::BytesSent, len as usize);
            self.sent += 1;
        }
        self.seq += 1;
        self.buffered = 0;
        Ok(())
    }

    /// Send the whole content to the plain path in one request.
    fn send_whole(&mut self) -> Result<()> {
        self.partial()?;
        self.part = None;
        debug!(len = self.written, "Upload in one request");
        let request = self
            .state
            .token
            .request(OpTag::Upload)
            .with(field::PATH, self.path.as_str());
        let mut file = self.spill.open_partial(self.seq)?;
        self.channel.send_with_attachment(
            &request,
            Attachment {
                name: self.path.clone(),
                len: self.written,
                reader: &mut file,
            },
        )?;
        self.counters.count(Counter::BytesSent, self.written as usize);
        Ok(())
    }

    fn write_inner(&mut self, buf: &[u8]) -> Result<usize> {
        if self.failed {
            return Err(Error::protocol(format!(
                "upload of {} already failed",
                self.path
            )));
        }
        if let Some(expected) = self.expected_len {
            if self.written + buf.len() as u64 > expected {
                return Err(Error::InvalidArgument(format!(
                    "writing {} bytes to {} would exceed the declared length {expected}",
                    buf.len(),
                    self.path
                )));
            }
        }
        let mut done = 0;
        while done < buf.len() {
            let remaining = (buf.len() - done) as u64;
            let room = if self.chunk_size == 0 {
                remaining
            } else {
                min(self.chunk_size - self.buffered, remaining)
            };
            let chunk = &buf[done..done + room as usize];
            let part = self.partial()?;
            if let Err(err) = part.write_all(chunk) {
                return Err(Error::io_error(self.spill.dir(), err));
            }
            self.buffered += room;
            self.written += room;
            done += room as usize;
            if self.chunk_size > 0 && self.buffered == self.chunk_size {
                self.flush_chunk(false)?;
            }
        }
        Ok(buf.len())
    }
}

impl Write for ChunkedWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_inner(buf).map_err(|err| {
            // Validation errors leave the writer usable.
            if !matches!(err, Error::InvalidArgument(_)) && !self.failed {
                warn!(path = %self.path, written = self.written, %err, "Upload failed");
                self.failed = true;
            }
            err.into()
        })
    }

    /// Chunks are sent as they fill; a partial chunk waits for `finish`.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for ChunkedWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedWriter")
            .field("path", &self.path)
            .field("written", &self.written)
            .field("expected_len", &self.expected_len)
            .field("seq", &self.seq)
            .field("failed", &self.failed)
            .finish()
    }
}
