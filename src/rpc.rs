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

//! Typed metadata calls and directory listings.
//!
//! Metadata calls are restricted to a closed set of operations mirroring
//! local file-system primitives. Each call is one round trip carrying the
//! operation name and its typed parameters, and returns one typed value.

use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use itertools::Itertools;
use strum_macros::{AsRefStr, EnumIter, EnumString};
use tracing::{debug, instrument, trace};

use crate::channel::{Attachment, Channel};
use crate::counters::{Counter, Counters};
use crate::envelope::{decode_line, field, read_status, OpTag, EMPTY_LISTING, NULL_LISTING};
use crate::errors::{Error, Result};
use crate::filter::ListFilter;
use crate::session::SessionToken;
use crate::value::{encode_params, Value, ValueType};

/// The operations a metadata call may name.
///
/// The string forms are the names on the wire; anything else is refused
/// before a request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Exists,
    IsFile,
    IsDirectory,
    IsHidden,
    Length,
    /// Milliseconds since the Unix epoch, or 0 if the file doesn't exist.
    LastModified,
    CanRead,
    CanWrite,
    CanExecute,
    Delete,
    CreateNewFile,
    Mkdir,
    Mkdirs,
    RenameTo,
    SetLastModified,
    SetReadOnly,
    SetReadable,
    SetWritable,
    SetExecutable,
}

impl Operation {
    pub fn param_types(self) -> &'static [ValueType] {
        use Operation::*;
        match self {
            RenameTo => &[ValueType::String],
            SetLastModified => &[ValueType::Long],
            SetReadable | SetWritable | SetExecutable => &[ValueType::Bool],
            _ => &[],
        }
    }

    pub fn result_type(self) -> ValueType {
        use Operation::*;
        match self {
            Length | LastModified => ValueType::Long,
            _ => ValueType::Bool,
        }
    }

    /// Check arguments against the declared parameter types.
    pub fn check_args(self, args: &[Value]) -> Result<()> {
        let expected = self.param_types();
        if args.len() != expected.len() {
            return Err(Error::InvalidArgument(format!(
                "{} takes {} arguments, got {}",
                self.as_ref(),
                expected.len(),
                args.len()
            )));
        }
        if let Some((i, (arg, ty))) = args
            .iter()
            .zip(expected)
            .find_position(|(arg, ty)| arg.value_type() != **ty)
        {
            return Err(Error::InvalidArgument(format!(
                "argument {i} of {} should be {}, got {arg}",
                self.as_ref(),
                ty.as_ref()
            )));
        }
        Ok(())
    }
}

/// Issues metadata calls and listings over a session's channel.
pub struct MetadataClient<'a> {
    pub(crate) channel: &'a mut dyn Channel,
    pub(crate) token: &'a SessionToken,
    pub(crate) counters: &'a Counters,
    pub(crate) filter_inline_limit: usize,
}

impl MetadataClient<'_> {
    /// Call an operation by name.
    ///
    /// Unknown names fail with [Error::OperationNotAllowed] without any request.
    pub fn call(&mut self, path: &str, name: &str, args: &[Value]) -> Result<Value> {
        let op: Operation = name.parse().map_err(|_| Error::OperationNotAllowed {
            name: name.to_owned(),
        })?;
        self.call_op(path, op, args)
    }

    #[instrument(skip(self, args))]
    pub fn call_op(&mut self, path: &str, op: Operation, args: &[Value]) -> Result<Value> {
        check_path(path)?;
        op.check_args(args)?;
        let (types, values) = encode_params(args);
        let request = self
            .token
            .request(OpTag::Call)
            .with(field::PATH, path)
            .with(field::METHOD, op.as_ref())
            .with(field::PARAM_TYPES, types)
            .with(field::PARAM_VALUES, values);
        self.counters.count(Counter::MetadataCalls, 1);
        let response = self.channel.send(&request)?;
        let value = Value::decode(op.result_type(), response.scalar()?)
            .map_err(|err| Error::protocol(format!("bad {} result: {err}", op.as_ref())))?;
        trace!(%value);
        Ok(value)
    }

    /// List the names in a directory.
    ///
    /// Returns `None` if the directory doesn't exist, and an empty list if it
    /// exists and is empty. The response is spilled to a temporary file as it
    /// arrives, so large listings aren't held twice in memory.
    #[instrument(skip(self, filter))]
    pub fn list(&mut self, path: &str, filter: Option<&ListFilter>) -> Result<Option<Vec<String>>> {
        check_path(path)?;
        let mut request = self.token.request(OpTag::List).with(field::PATH, path);
        if let Some(filter) = filter {
            let encoded = filter.encode()?;
            if encoded.len() <= self.filter_inline_limit {
                request.set(field::FILTER, encoded);
            } else {
                let name = self.put_filter(&encoded)?;
                request.set(field::FILTER_REF, name);
            }
        }
        self.counters.count(Counter::Listings, 1);
        let mut stream = self.channel.open_stream(&request)?;
        read_status(&mut stream)?;
        let spill_err = |err: io::Error| Error::protocol(format!("spilling listing: {err}"));
        let mut spill = tempfile::tempfile().map_err(spill_err)?;
        let len = io::copy(&mut stream, &mut spill).map_err(spill_err)?;
        spill.seek(SeekFrom::Start(0)).map_err(spill_err)?;
        trace!(len, "Spilled listing");
        parse_listing(BufReader::new(spill))
    }

    /// Upload a filter too large to send inline, returning its generated name.
    fn put_filter(&mut self, encoded: &str) -> Result<String> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let name = format!(
            "{:x}-{:x}-{}.filter",
            nanos,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        debug!(name, len = encoded.len(), "Upload listing filter");
        let request = self
            .token
            .request(OpTag::PutFilter)
            .with(field::PATH, name.as_str());
        let mut bytes = encoded.as_bytes();
        self.channel.send_with_attachment(
            &request,
            Attachment {
                name: name.clone(),
                len: encoded.len() as u64,
                reader: &mut bytes,
            },
        )?;
        Ok(name)
    }
}

fn parse_listing<R: BufRead>(reader: R) -> Result<Option<Vec<String>>> {
    let mut lines = reader.lines();
    let first = match lines.next() {
        None => return Err(Error::protocol("listing response has no payload")),
        Some(line) => line.map_err(|err| Error::protocol(format!("reading listing: {err}")))?,
    };
    match first.as_str() {
        NULL_LISTING => return Ok(None),
        EMPTY_LISTING => return Ok(Some(Vec::new())),
        _ => (),
    }
    let mut names = vec![decode_line(&first)];
    for line in lines {
        let line = line.map_err(|err| Error::protocol(format!("reading listing: {err}")))?;
        names.push(decode_line(&line));
    }
    Ok(Some(names))
}

pub(crate) fn check_path(path: &str) -> Result<()> {
    if path.is_empty() {
        Err(Error::InvalidArgument("empty remote path".to_owned()))
    } else if path.contains('\0') || path.contains('\n') {
        Err(Error::InvalidArgument(format!("bad remote path {path:?}")))
    } else {
        Ok(())
    }
}
