// Copyright 2026 Martin Pool.

//! Metadata operations and listings on the served tree.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use filetime::{set_file_mtime, FileTime};
use tracing::{debug, trace};

use super::{io_failure, resolve, HandlerResult};
use crate::envelope::{encode_listing_entry, success_body, EMPTY_LISTING, NULL_LISTING};
use crate::errors::{RemoteError, RemoteKind};
use crate::filter::ListFilter;
use crate::rpc::Operation;
use crate::value::Value;

/// Run one allow-listed operation on `path`.
pub(super) fn call(
    root: &Path,
    path: &str,
    op: Operation,
    args: &[Value],
) -> Result<Value, RemoteError> {
    let full = resolve(root, path)?;
    trace!(?full, op = op.as_ref(), "Metadata call");
    let value = match op {
        Operation::Exists => Value::Bool(full.exists()),
        Operation::IsFile => Value::Bool(full.is_file()),
        Operation::IsDirectory => Value::Bool(full.is_dir()),
        Operation::IsHidden => Value::Bool(
            full.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.')),
        ),
        Operation::Length => Value::Long(
            fs::metadata(&full)
                .ok()
                .filter(|m| m.is_file())
                .map_or(0, |m| m.len() as i64),
        ),
        Operation::LastModified => Value::Long(last_modified_millis(&full)),
        Operation::CanRead => Value::Bool(access::can_read(&full)),
        Operation::CanWrite => Value::Bool(access::can_write(&full)),
        Operation::CanExecute => Value::Bool(access::can_execute(&full)),
        Operation::Delete => Value::Bool(succeeded(
            "delete",
            if full.is_dir() {
                fs::remove_dir(&full)
            } else {
                fs::remove_file(&full)
            },
        )),
        Operation::CreateNewFile => {
            match OpenOptions::new().write(true).create_new(true).open(&full) {
                Ok(_) => Value::Bool(true),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Value::Bool(false),
                Err(err) => return Err(io_failure(path, err)),
            }
        }
        Operation::Mkdir => Value::Bool(succeeded("mkdir", fs::create_dir(&full))),
        Operation::Mkdirs => {
            Value::Bool(!full.exists() && succeeded("mkdirs", fs::create_dir_all(&full)))
        }
        Operation::RenameTo => {
            let dest = string_arg(args)?;
            let dest = resolve(root, dest)?;
            Value::Bool(succeeded("rename", fs::rename(&full, dest)))
        }
        Operation::SetLastModified => {
            let millis = long_arg(args)?;
            if millis < 0 {
                return Err(RemoteError::new(
                    RemoteKind::BadArgument,
                    format!("negative time {millis}"),
                ));
            }
            let nanos = (millis % 1000) as u32 * 1_000_000;
            let mtime = FileTime::from_unix_time(millis / 1000, nanos);
            Value::Bool(succeeded("set mtime", set_file_mtime(&full, mtime)))
        }
        Operation::SetReadOnly => Value::Bool(succeeded("set read-only", set_readonly(&full))),
        Operation::SetReadable => Value::Bool(access::set_mode(&full, 0o400, bool_arg(args)?)),
        Operation::SetWritable => Value::Bool(access::set_mode(&full, 0o200, bool_arg(args)?)),
        Operation::SetExecutable => Value::Bool(access::set_mode(&full, 0o100, bool_arg(args)?)),
    };
    Ok(value)
}

/// Mutating operations report failure as `false`, like the local primitives.
fn succeeded(what: &str, result: io::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            debug!(what, %err, "Operation failed");
            false
        }
    }
}

fn last_modified_millis(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis() as i64)
}

fn set_readonly(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
}

fn string_arg(args: &[Value]) -> Result<&str, RemoteError> {
    args.first()
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::new(RemoteKind::BadArgument, "expected a string argument"))
}

fn long_arg(args: &[Value]) -> Result<i64, RemoteError> {
    args.first()
        .and_then(Value::as_long)
        .ok_or_else(|| RemoteError::new(RemoteKind::BadArgument, "expected a long argument"))
}

fn bool_arg(args: &[Value]) -> Result<bool, RemoteError> {
    args.first()
        .and_then(Value::as_bool)
        .ok_or_else(|| RemoteError::new(RemoteKind::BadArgument, "expected a bool argument"))
}

#[cfg(unix)]
mod access {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use nix::unistd::{access, AccessFlags};

    pub fn can_read(path: &Path) -> bool {
        access(path, AccessFlags::R_OK).is_ok()
    }

    pub fn can_write(path: &Path) -> bool {
        access(path, AccessFlags::W_OK).is_ok()
    }

    pub fn can_execute(path: &Path) -> bool {
        access(path, AccessFlags::X_OK).is_ok()
    }

    /// Set or clear owner permission bits.
    pub fn set_mode(path: &Path, bits: u32, on: bool) -> bool {
        let Ok(metadata) = fs::metadata(path) else {
            return false;
        };
        let mut permissions = metadata.permissions();
        let mode = permissions.mode();
        permissions.set_mode(if on { mode | bits } else { mode & !bits });
        fs::set_permissions(path, permissions).is_ok()
    }
}

#[cfg(not(unix))]
mod access {
    use std::fs;
    use std::path::Path;

    pub fn can_read(path: &Path) -> bool {
        path.exists()
    }

    pub fn can_write(path: &Path) -> bool {
        fs::metadata(path).is_ok_and(|m| !m.permissions().readonly())
    }

    pub fn can_execute(path: &Path) -> bool {
        path.is_dir()
    }

    /// Only the write bit can be changed here.
    pub fn set_mode(path: &Path, bits: u32, on: bool) -> bool {
        if bits != 0o200 {
            return on;
        }
        let Ok(metadata) = fs::metadata(path) else {
            return false;
        };
        let mut permissions = metadata.permissions();
        permissions.set_readonly(!on);
        fs::set_permissions(path, permissions).is_ok()
    }
}

/// List a directory's names, sorted, framed with the listing sentinels.
pub(super) fn list(root: &Path, path: &str, filter: Option<&ListFilter>) -> HandlerResult {
    let dir = resolve(root, path)?;
    if !dir.is_dir() {
        return Ok(success_body([NULL_LISTING]));
    }
    let matcher = filter
        .map(ListFilter::matcher)
        .transpose()
        .map_err(|err| RemoteError::new(RemoteKind::BadArgument, err.to_string()))?;
    let fail = |err| io_failure(path, err);
    let mut names = Vec::new();
    for entry in fs::read_dir(&dir).map_err(fail)? {
        let entry = entry.map_err(fail)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(matcher) = &matcher {
            let is_dir = entry.file_type().map_err(fail)?.is_dir();
            if !matcher.matches(&name, is_dir) {
                continue;
            }
        }
        names.push(name);
    }
    names.sort();
    trace!(?dir, count = names.len(), "Listed directory");
    if names.is_empty() {
        Ok(success_body([EMPTY_LISTING]))
    } else {
        Ok(success_body(names.iter().map(|n| encode_listing_entry(n))))
    }
}
