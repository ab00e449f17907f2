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

//! Request and response framing.
//!
//! A request is an ordered set of unique string fields. A response body is
//! line oriented: the first line is `SUCCESS` or `FAILURE`. A failure carries
//! exactly three more lines: the kind tag, the message, and a trace, each
//! line-encoded so that they can't contain newlines.

use std::fmt;
use std::io::{self, Read};

use lazy_static::lazy_static;
use regex::Regex;
use strum_macros::{AsRefStr, EnumString};
use tracing::trace;
use url::form_urlencoded;

use crate::errors::{Error, RemoteError, Result};

/// Names of request fields.
pub mod field {
    pub const OPERATION: &str = "operation";
    pub const IDENTITY: &str = "identity";
    pub const TOKEN: &str = "token";
    pub const CREDENTIAL: &str = "credential";
    pub const PATH: &str = "path";
    pub const METHOD: &str = "method";
    pub const PARAM_TYPES: &str = "param-types";
    pub const PARAM_VALUES: &str = "param-values";
    pub const CHUNK_LENGTH: &str = "chunk-length";
    pub const FILTER: &str = "filter";
    pub const FILTER_REF: &str = "filter-ref";
    /// Name of the multipart part carrying the attachment.
    pub const ATTACHMENT: &str = "attachment";
}

pub const SUCCESS: &str = "SUCCESS";
pub const FAILURE: &str = "FAILURE";

/// First payload line of a successful login, followed by a space and the token.
pub const LOGIN_OK: &str = "OK";
pub const INVALID_LOGIN: &str = "INVALID_LOGIN_OR_PASSWORD";

/// Failure tag sent when the token is unknown, revoked, or doesn't match the identity.
pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";

/// Listing payload for a directory that does not exist.
pub const NULL_LISTING: &str = "null";
/// Listing payload for a directory that exists and is empty.
pub const EMPTY_LISTING: &str = "[]";

/// Longest status line we'll accept before deciding the stream is garbage.
const MAX_STATUS_LINE: usize = 16;

/// The operation a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum OpTag {
    Login,
    Logoff,
    /// A metadata call from the fixed allow-list.
    Call,
    List,
    Download,
    Upload,
    /// Upload a listing filter too big to send inline.
    PutFilter,
}

/// A request envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    fields: Vec<(String, String)>,
}

impl Request {
    pub fn new(op: OpTag) -> Request {
        let mut request = Request::default();
        request.set(field::OPERATION, op.as_ref());
        request
    }

    /// Set a field, replacing any previous value so that keys stay unique.
    pub fn set<V: Into<String>>(&mut self, key: &str, value: V) -> &mut Request {
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key.to_owned(), value));
        }
        self
    }

    #[must_use]
    pub fn with<V: Into<String>>(mut self, key: &str, value: V) -> Request {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The operation tag, if present and recognized.
    pub fn op(&self) -> Option<OpTag> {
        self.get(field::OPERATION).and_then(|s| s.parse().ok())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode as an `application/x-www-form-urlencoded` body.
    pub fn form_encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields())
            .finish()
    }

    /// Decode an `application/x-www-form-urlencoded` body.
    ///
    /// Later duplicates of a key replace earlier ones.
    pub fn form_decode(body: &[u8]) -> Request {
        let mut request = Request::default();
        for (k, v) in form_urlencoded::parse(body) {
            request.set(&k, v);
        }
        request
    }
}

/// Encode one value so that it fits on a single line.
pub fn encode_line(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Encode one listing entry, keeping names that look like the listing
/// sentinels distinct from them.
pub fn encode_listing_entry(name: &str) -> String {
    match name {
        NULL_LISTING => "%6Eull".to_owned(),
        other => encode_line(other),
    }
}

/// Reverse [encode_line].
pub fn decode_line(s: &str) -> String {
    // A bare token without '=' parses as a key with an empty value.
    form_urlencoded::parse(s.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default()
}

/// The status sentinel on the first line of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    fn parse(line: &str) -> Result<Status> {
        match line.trim_end_matches('\r') {
            SUCCESS => Ok(Status::Success),
            FAILURE => Ok(Status::Failure),
            "" => Err(Error::protocol("empty response")),
            other => Err(Error::protocol(format!(
                "unexpected status line {:?}",
                truncate(other)
            ))),
        }
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(40) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// The payload lines of a successful buffered response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    lines: Vec<String>,
}

impl Response {
    /// Parse a whole response body, turning an in-band failure into an error.
    pub fn parse(body: &[u8]) -> Result<Response> {
        let text = std::str::from_utf8(body)
            .map_err(|_| Error::protocol("response body is not UTF-8"))?;
        let mut lines = text.lines();
        let status = Status::parse(lines.next().unwrap_or_default())?;
        match status {
            Status::Success => Ok(Response {
                lines: lines.map(str::to_owned).collect(),
            }),
            Status::Failure => Err(decode_failure(lines)),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// The single encoded value of a scalar response.
    pub fn scalar(&self) -> Result<&str> {
        match self.lines.as_slice() {
            [value] => Ok(value),
            [] => Err(Error::protocol("missing scalar value in response")),
            _ => Err(Error::protocol(format!(
                "expected one scalar line, got {}",
                self.lines.len()
            ))),
        }
    }
}

/// Decode the three fields following a `FAILURE` status line.
fn decode_failure<'a, I: Iterator<Item = &'a str>>(mut lines: I) -> Error {
    let (Some(tag), Some(message), Some(trace)) = (lines.next(), lines.next(), lines.next())
    else {
        return Error::protocol("truncated failure response");
    };
    let tag = decode_line(tag);
    if tag == SESSION_EXPIRED {
        return Error::SessionExpired;
    }
    let err = RemoteError::decode(&tag, &decode_line(message), &decode_line(trace));
    trace!(?err, "Decoded remote failure");
    Error::Remote(err)
}

/// Read the status line at the start of a payload stream.
///
/// On success the reader is left positioned at the first payload byte. On
/// failure the rest of the stream is drained and decoded into the returned
/// error, so no payload bytes are ever handed on.
pub fn read_status(reader: &mut dyn Read) -> Result<()> {
    let mut line = Vec::with_capacity(MAX_STATUS_LINE);
    let mut byte = [0u8; 1];
    loop {
        let n = read_retrying(reader, &mut byte)?;
        if n == 0 {
            if line.is_empty() {
                return Err(Error::protocol("empty response"));
            }
            return Err(Error::protocol("response ended inside status line"));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_STATUS_LINE {
            return Err(Error::protocol(format!(
                "status line too long: {:?}",
                String::from_utf8_lossy(&line)
            )));
        }
    }
    let line = String::from_utf8_lossy(&line);
    match Status::parse(&line)? {
        Status::Success => Ok(()),
        Status::Failure => {
            let mut rest = String::new();
            reader
                .read_to_string(&mut rest)
                .map_err(|err| Error::from_stream("response stream", err))?;
            Err(decode_failure(rest.lines()))
        }
    }
}

fn read_retrying(reader: &mut dyn Read, buf: &mut [u8]) -> Result<usize> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::from_stream("response stream", err)),
        }
    }
}

/// Frame a successful response from payload lines.
pub fn success_body<I, S>(lines: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut body = String::from(SUCCESS);
    body.push('\n');
    for line in lines {
        body.push_str(line.as_ref());
        body.push('\n');
    }
    body.into_bytes()
}

/// Frame a successful response carrying raw payload bytes.
pub fn success_bytes(payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(SUCCESS.len() + 1 + payload.len());
    body.extend_from_slice(SUCCESS.as_bytes());
    body.push(b'\n');
    body.extend_from_slice(payload);
    body
}

/// Frame a failure response.
pub fn failure_body(err: &RemoteError) -> Vec<u8> {
    failure_fields(&err.tag, &err.message, &err.trace)
}

/// Frame the session-expired failure.
pub fn session_expired_body() -> Vec<u8> {
    failure_fields(SESSION_EXPIRED, "invalid or expired token", "")
}

fn failure_fields(tag: &str, message: &str, trace: &str) -> Vec<u8> {
    format!(
        "{FAILURE}\n{}\n{}\n{}\n",
        encode_line(tag),
        encode_line(message),
        encode_line(trace)
    )
    .into_bytes()
}

lazy_static! {
    static ref CHUNK_NAME_RE: Regex =
        Regex::new(r"^(?s)(.+)\.([1-9][0-9]*)\.chunk(\.LASTCHUNK)?$").expect("valid regex");
}

/// Name of one chunk of a transfer: `<path>.<seq>.chunk`, plus `.LASTCHUNK` on the last one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkName {
    pub path: String,
    /// Sequence number, starting at 1.
    pub seq: u64,
    pub last: bool,
}

impl ChunkName {
    pub fn new(path: &str, seq: u64, last: bool) -> ChunkName {
        debug_assert!(seq >= 1, "chunk sequence numbers start at 1");
        ChunkName {
            path: path.to_owned(),
            seq,
            last,
        }
    }

    /// Parse a chunk name; returns None for a plain path.
    pub fn parse(s: &str) -> Option<ChunkName> {
        let caps = CHUNK_NAME_RE.captures(s)?;
        Some(ChunkName {
            path: caps[1].to_owned(),
            seq: caps[2].parse().ok()?,
            last: caps.get(3).is_some(),
        })
    }
}

impl fmt::Display for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.chunk", self.path, self.seq)?;
        if self.last {
            write!(f, ".LASTCHUNK")?;
        }
        Ok(())
    }
}
