// Copyright 2026 Martin Pool.

//! The channel that carries request envelopes to the server.
//!
//! This isn't safe to share between concurrent callers: each [crate::Session]
//! owns one channel, and cloning a session makes a fresh one.

use std::fmt;
use std::io::Read;

use crate::envelope::{Request, Response};
use crate::errors::Result;

/// One binary part sent alongside a request's fields.
pub struct Attachment<'a> {
    /// File name presented for the part.
    pub name: String,
    /// Exact number of bytes `reader` will produce.
    pub len: u64,
    pub reader: &'a mut (dyn Read + Send),
}

impl fmt::Debug for Attachment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("len", &self.len)
            .finish()
    }
}

/// Sends envelopes and returns framed responses.
///
/// Errors from the underlying transport (unreachable host, timeouts, non-2xx
/// status) are connectivity errors, distinct from in-band failures, which
/// come back as [crate::Error::Remote] or [crate::Error::SessionExpired].
pub trait Channel: Send {
    /// Send a request and parse the whole response.
    fn send(&mut self, request: &Request) -> Result<Response>;

    /// Send a request with one binary attachment and parse the whole response.
    fn send_with_attachment(
        &mut self,
        request: &Request,
        attachment: Attachment<'_>,
    ) -> Result<Response>;

    /// Send a request and return the response body as a live stream.
    ///
    /// The stream starts with the status line; it is not inspected here.
    fn open_stream(&mut self, request: &Request) -> Result<Box<dyn Read + Send>>;

    /// Make an independent channel to the same endpoint with the same configuration.
    fn fresh(&self) -> Box<dyn Channel>;

    /// Release any connections. Later calls may reconnect.
    fn close(&mut self) {}

    /// Human-readable description of the endpoint, for messages.
    fn endpoint(&self) -> String;
}
