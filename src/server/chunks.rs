// Copyright 2026 Martin Pool.

//! Serving and storing file content, whole or by chunk.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{trace, warn};

use super::{io_failure, resolve, HandlerResult};
use crate::envelope::{success_bytes, ChunkName};
use crate::errors::{RemoteError, RemoteKind};

/// Prefix for temporary files beside a file being replaced.
const TMP_PREFIX: &str = ".remfs-tmp";

pub(super) fn read_whole(root: &Path, path: &str) -> HandlerResult {
    let full = resolve(root, path)?;
    let content = std::fs::read(&full).map_err(|err| io_failure(path, err))?;
    trace!(?full, len = content.len(), "Serve whole file");
    Ok(success_bytes(&content))
}

/// Serve bytes `[(seq-1)*chunk_len, seq*chunk_len)` of the file.
pub(super) fn read_chunk(root: &Path, chunk: &ChunkName, chunk_len: u64) -> HandlerResult {
    let full = resolve(root, &chunk.path)?;
    let fail = |err| io_failure(&chunk.path, err);
    let mut file = File::open(&full).map_err(fail)?;
    let start = chunk_start(chunk, chunk_len)?;
    let len = file.metadata().map_err(fail)?.len();
    if start >= len && !(start == 0 && chunk.last) {
        return Err(RemoteError::new(
            RemoteKind::BadArgument,
            format!("chunk {} starts past the end of {}", chunk.seq, chunk.path),
        ));
    }
    file.seek(SeekFrom::Start(start)).map_err(fail)?;
    let mut content = Vec::new();
    file.take(chunk_len)
        .read_to_end(&mut content)
        .map_err(fail)?;
    trace!(?full, seq = chunk.seq, len = content.len(), "Serve chunk");
    Ok(success_bytes(&content))
}

/// Replace the whole file.
pub(super) fn write_whole(root: &Path, path: &str, content: &mut dyn Read) -> HandlerResult {
    let full = resolve(root, path)?;
    let fail = |err| io_failure(path, err);
    let dir = full.parent().ok_or_else(|| {
        RemoteError::new(RemoteKind::BadArgument, format!("can't write to {path:?}"))
    })?;
    let mut temp = tempfile::Builder::new()
        .prefix(TMP_PREFIX)
        .tempfile_in(dir)
        .map_err(fail)?;
    let len = io::copy(content, &mut temp).map_err(fail)?;
    if let Err(persist_error) = temp.persist(&full) {
        warn!(?full, err = %persist_error.error, "Failed to persist upload");
        return Err(fail(persist_error.error));
    }
    trace!(?full, len, "Stored whole file");
    Ok(success_bytes(&[]))
}

/// Write one chunk at its offset. The first chunk truncates the file, and the
/// last one truncates it to the chunk's end.
pub(super) fn write_chunk(
    root: &Path,
    chunk: &ChunkName,
    chunk_len: u64,
    content: &mut dyn Read,
) -> HandlerResult {
    let full = resolve(root, &chunk.path)?;
    let fail = |err| io_failure(&chunk.path, err);
    let start = chunk_start(chunk, chunk_len)?;
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(chunk.seq == 1)
        .open(&full)
        .map_err(fail)?;
    file.seek(SeekFrom::Start(start)).map_err(fail)?;
    let written = io::copy(&mut content.take(chunk_len + 1), &mut file).map_err(fail)?;
    if written > chunk_len {
        return Err(RemoteError::new(
            RemoteKind::BadArgument,
            format!("chunk {} is longer than {chunk_len} bytes", chunk.seq),
        ));
    }
    if chunk.last {
        file.set_len(start + written).map_err(fail)?;
    }
    trace!(?full, seq = chunk.seq, written, last = chunk.last, "Stored chunk");
    Ok(success_bytes(&[]))
}

fn chunk_start(chunk: &ChunkName, chunk_len: u64) -> Result<u64, RemoteError> {
    (chunk.seq - 1)
        .checked_mul(chunk_len)
        .ok_or_else(|| RemoteError::new(RemoteKind::BadArgument, "chunk offset overflows"))
}
