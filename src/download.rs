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

//! Read a remote file in fixed-size chunks, spilling each to a local buffer.
//!
//! The file's length is probed first. Files no bigger than one chunk, or any
//! file when the chunk size is 0, are fetched in a single request. Otherwise
//! chunk `n` covers bytes `[(n-1)*C, min(n*C, len))` and is requested by its
//! chunk name, with the last one flagged. A chunk is confirmed in the
//! session's download records only once it's completely saved, so a later
//! reader with the same buffer serves those chunks locally and fetches only
//! the rest. As soon as the last byte has been returned the records and
//! buffer are discarded.

use std::cmp::min;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use crate::channel::Channel;
use crate::counters::{Counter, Counters};
use crate::envelope::{field, read_status, ChunkName, OpTag};
use crate::errors::{Error, Result};
use crate::progress::{TransferCaches, TransferKey};
use crate::rpc::{check_path, MetadataClient, Operation};
use crate::session::{Session, SessionState};
use crate::spill::{Direction, SpillBuffer};

/// Where a download has got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Nothing requested yet.
    NotStarted,
    Reading,
    /// Everything has been read and the buffer discarded.
    Complete,
    /// A read failed; the confirmed chunks are kept for a retry.
    Failed,
}

enum Source {
    NotStarted,
    /// The whole file in one response.
    Whole(Box<dyn Read + Send>),
    /// At a chunk boundary; the next chunk isn't open yet.
    Boundary,
    /// A chunk confirmed by an earlier attempt, served from the buffer.
    Buffered { file: File, remaining: u64 },
    /// A chunk streaming from the server, copied into the buffer as it's read.
    Fetching {
        seq: u64,
        stream: Box<dyn Read + Send>,
        part: File,
        remaining: u64,
    },
    Done,
    Failed,
}

/// Reads a remote file through a session, in chunks.
pub struct ChunkedReader<'a> {
    channel: &'a mut dyn Channel,
    state: Arc<SessionState>,
    caches: Arc<TransferCaches>,
    counters: Arc<Counters>,
    path: String,
    key: TransferKey,
    spill: SpillBuffer,
    chunk_size: u64,
    /// Length probed from the server, once started.
    total: Option<u64>,
    position: u64,
    source: Source,
}

impl<'a> ChunkedReader<'a> {
    pub(crate) fn new(
        session: &'a mut Session,
        path: &str,
        buffer: &Path,
    ) -> Result<ChunkedReader<'a>> {
        check_path(path)?;
        let (caches, counters) = session.shared();
        let (state, channel) = session.parts()?;
        let key = TransferKey::new(state.token.identity(), buffer, path);
        let spill = SpillBuffer::new(buffer, Direction::Download, state.token.identity(), path);
        Ok(ChunkedReader {
            chunk_size: state.config.download_chunk_size,
            channel,
            state,
            caches,
            counters,
            path: path.to_owned(),
            key,
            spill,
            total: None,
            position: 0,
            source: Source::NotStarted,
        })
    }

    pub fn state(&self) -> ReadState {
        match self.source {
            Source::NotStarted => ReadState::NotStarted,
            Source::Done => ReadState::Complete,
            Source::Failed => ReadState::Failed,
            _ => ReadState::Reading,
        }
    }

    /// The length of the remote file, once the first read has probed it.
    pub fn remote_len(&self) -> Option<u64> {
        self.total
    }

    /// Bytes returned so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// True if the file is being read in more than one chunk.
    pub fn is_chunked(&self) -> bool {
        self.total
            .is_some_and(|total| self.chunk_size > 0 && total > self.chunk_size)
    }

    /// Stop reading, keeping any confirmed chunks for a later attempt.
    pub fn close(self) {}

    fn chunk_count(&self, total: u64) -> u64 {
        total.div_ceil(self.chunk_size)
    }

    fn chunk_len(&self, total: u64, seq: u64) -> u64 {
        min(self.chunk_size, total - (seq - 1) * self.chunk_size)
    }

    #[instrument(skip(self), fields(path = %self.path))]
    fn start(&mut self) -> Result<()> {
        let total = MetadataClient {
            channel: &mut *self.channel,
            token: &self.state.token,
            counters: &self.counters,
            filter_inline_limit: self.state.config.filter_inline_limit,
        }
        .call_op(&self.path, Operation::Length, &[])?
        .as_long()
        .ok_or_else(|| Error::protocol("length returned a non-numeric value"))?
        .max(0) as u64;
        self.total = Some(total);
        if self.chunk_size == 0 || total <= self.chunk_size {
            debug!(total, "Download in one request");
            let request = self
                .state
                .token
                .request(OpTag::Download)
                .with(field::PATH, self.path.as_str());
            let mut stream = self.channel.open_stream(&request)?;
            read_status(&mut stream)?;
            self.source = Source::Whole(stream);
        } else {
            let confirmed = self.caches.downloads.confirmed_count(&self.key);
            debug!(
                total,
                chunks = self.chunk_count(total),
                confirmed,
                "Download in chunks"
            );
            self.caches.downloads.begin(&self.key);
            self.source = Source::Boundary;
        }
        Ok(())
    }

    /// Open the chunk starting at the current position.
    fn open_next_chunk(&mut self, total: u64) -> Result<()> {
        let seq = self.position / self.chunk_size + 1;
        let len = self.chunk_len(total, seq);
        if self.caches.downloads.is_confirmed(&self.key, seq) {
            if self.spill.chunk_len(seq) == Some(len) {
                trace!(seq, len, "Serve chunk from buffer");
                self.counters.count(Counter::ChunksFromBuffer, 1);
                self.source = Source::Buffered {
                    file: self.spill.open_chunk(seq)?,
                    remaining: len,
                };
                return Ok(());
            }
            warn!(seq, "Confirmed chunk is missing from the buffer; fetching it again");
        }
        let name = ChunkName::new(&self.path, seq, seq == self.chunk_count(total));
        trace!(%name, len, "Fetch chunk");
        let request = self
            .state
            .token
            .request(OpTag::Download)
            .with(field::PATH, name.to_string())
            .with(field::CHUNK_LENGTH, self.chunk_size.to_string());
        let mut stream = self.channel.open_stream(&request)?;
        read_status(&mut stream)?;
        let part = self.spill.create_partial(seq)?;
        self.source = Source::Fetching {
            seq,
            stream,
            part,
            remaining: len,
        };
        Ok(())
    }

    fn chunk_complete(&mut self, seq: u64) -> Result<()> {
        self.spill.commit(seq)?;
        self.caches.downloads.confirm(&self.key, seq);
        self.counters.count(Counter::ChunksDownloaded, 1);
        Ok(())
    }

    /// Forget the records and buffer once every byte has been returned.
    ///
    /// Leftover spill files are harmless once the record is gone, so failing to
    /// remove them is only logged.
    fn finish(&mut self) {
        self.source = Source::Done;
        self.caches.downloads.remove(&self.key);
        if let Err(err) = self.spill.clear() {
            warn!(path = %self.path, %err, "Failed to clear download buffer");
        }
        debug!(path = %self.path, len = self.position, "Download complete");
    }

    /// The current chunk has been fully returned.
    fn chunk_drained(&mut self) {
        self.source = Source::Boundary;
        if self.position >= self.total.unwrap_or_default() {
            self.finish();
        }
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.source {
                Source::NotStarted => self.start()?,
                Source::Done => return Ok(0),
                Source::Failed => {
                    return Err(Error::protocol(format!(
                        "download of {} already failed",
                        self.path
                    )))
                }
                Source::Whole(ref mut stream) => {
                    let total = self.total.unwrap_or_default();
                    let mut n = 0;
                    if self.position < total {
                        let want = min(buf.len() as u64, total - self.position) as usize;
                        n = read_stream(stream.as_mut(), &mut buf[..want], &self.path)?;
                        if n == 0 {
                            return Err(Error::protocol(format!(
                                "{} ended after {} of {total} bytes",
                                self.path, self.position
                            )));
                        }
                        self.position += n as u64;
                        self.counters.count(Counter::BytesReceived, n);
                        if self.position < total {
                            return Ok(n);
                        }
                    }
                    // Anything past the probed length is an error.
                    let mut extra = [0u8; 1];
                    if read_stream(stream.as_mut(), &mut extra, &self.path)? != 0 {
                        return Err(Error::protocol(format!(
                            "{} is longer than its length {total}",
                            self.path
                        )));
                    }
                    self.finish();
                    return Ok(n);
                }
                Source::Boundary => {
                    let total = self.total.unwrap_or_default();
                    if self.position >= total {
                        self.finish();
                        return Ok(0);
                    }
                    self.open_next_chunk(total)?;
                }
                Source::Buffered {
                    ref mut file,
                    ref mut remaining,
                } => {
                    if *remaining == 0 {
                        self.source = Source::Boundary;
                        continue;
                    }
                    let want = min(buf.len() as u64, *remaining) as usize;
                    let n = file
                        .read(&mut buf[..want])
                        .map_err(|err| Error::io_error(self.spill.dir(), err))?;
                    if n == 0 {
                        return Err(Error::io_error(
                            self.spill.dir(),
                            io::ErrorKind::UnexpectedEof.into(),
                        ));
                    }
                    *remaining -= n as u64;
                    self.position += n as u64;
                    if *remaining == 0 {
                        self.chunk_drained();
                    }
                    return Ok(n);
                }
                Source::Fetching {
                    seq,
                    ref mut stream,
                    ref mut part,
                    ref mut remaining,
                } => {
                    let want = min(buf.len() as u64, *remaining) as usize;
                    let n = read_stream(stream.as_mut(), &mut buf[..want], &self.path)?;
                    if n == 0 {
                        return Err(Error::protocol(format!(
                            "chunk {seq} of {} ended {} bytes short",
                            self.path, remaining
                        )));
                    }
                    part.write_all(&buf[..n])
                        .map_err(|err| Error::io_error(self.spill.dir(), err))?;
                    *remaining -= n as u64;
                    self.position += n as u64;
                    self.counters.count(Counter::BytesReceived, n);
                    if *remaining == 0 {
                        // Closes the partial file before it's renamed.
                        self.source = Source::Boundary;
                        self.chunk_complete(seq)?;
                        self.chunk_drained();
                    }
                    return Ok(n);
                }
            }
        }
    }
}

impl Read for ChunkedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.read_inner(buf).map_err(|err| {
            if !matches!(self.source, Source::Failed) {
                warn!(path = %self.path, position = self.position, %err, "Download failed");
                self.source = Source::Failed;
            }
            err.into()
        })
    }
}

impl Drop for ChunkedReader<'_> {
    fn drop(&mut self) {
        if self.is_chunked() && !matches!(self.source, Source::Done) {
            debug!(
                path = %self.path,
                confirmed = self.caches.downloads.confirmed_count(&self.key),
                "Download stopped early; keeping confirmed chunks"
            );
        }
    }
}

impl fmt::Debug for ChunkedReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedReader")
            .field("path", &self.path)
            .field("state", &self.state())
            .field("total", &self.total)
            .field("position", &self.position)
            .finish()
    }
}

fn read_stream(stream: &mut dyn Read, buf: &mut [u8], path: &str) -> Result<usize> {
    loop {
        match stream.read(buf) {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::from_stream(path, err)),
        }
    }
}
