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

//! Channel over HTTP POST requests.
//!
//! Requests are form-encoded, or multipart when they carry an attachment.
//! Connects are bounded by a real deadline on the socket connect, so a timed
//! out attempt doesn't linger in the background.

use std::error::Error as StdError;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::channel::{Attachment, Channel};
use crate::config::SessionConfig;
use crate::envelope::{field, Request, Response};
use crate::errors::{Error, Result};

/// A [Channel] that talks to the server over HTTP or HTTPS.
pub struct HttpChannel {
    url: Url,
    config: SessionConfig,
    proxy: Option<ureq::Proxy>,
    agent: ureq::Agent,
}

impl HttpChannel {
    pub fn new(url: &Url, config: &SessionConfig) -> Result<HttpChannel> {
        match url.scheme() {
            "http" | "https" => (),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported URL scheme {other:?}"
                )))
            }
        }
        let proxy = config
            .proxy
            .as_deref()
            .map(ureq::Proxy::new)
            .transpose()
            .map_err(|err| Error::InvalidArgument(format!("bad proxy: {err}")))?;
        let agent = build_agent(config, proxy.as_ref());
        Ok(HttpChannel {
            url: url.clone(),
            config: config.clone(),
            proxy,
            agent,
        })
    }

    fn post(&self) -> ureq::Request {
        let request = self.agent.post(self.url.as_str());
        if self.config.compression {
            request
        } else {
            request.set("Accept-Encoding", "identity")
        }
    }

    fn check(
        &self,
        result: std::result::Result<ureq::Response, ureq::Error>,
    ) -> Result<ureq::Response> {
        match result {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(status, _)) => {
                warn!(url = %self.url, status, "HTTP error status");
                Err(Error::HttpStatus {
                    url: self.url.to_string(),
                    status,
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                debug!(url = %self.url, ?transport, "HTTP transport error");
                Err(self.connect_error(Box::new(transport)))
            }
        }
    }

    fn connect_error(&self, source: Box<dyn StdError + Send + Sync>) -> Error {
        if is_timeout(source.as_ref()) {
            Error::Timeout {
                url: self.url.to_string(),
            }
        } else {
            Error::Connect {
                url: self.url.to_string(),
                source,
            }
        }
    }

    fn read_body(&self, response: ureq::Response) -> Result<Response> {
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|err| self.connect_error(Box::new(err)))?;
        trace!(len = body.len(), "Read response body");
        Response::parse(&body)
    }
}

fn build_agent(config: &SessionConfig, proxy: Option<&ureq::Proxy>) -> ureq::Agent {
    let mut builder = ureq::AgentBuilder::new();
    if let Some(timeout) = config.connect_timeout() {
        builder = builder.timeout_connect(timeout);
    }
    if let Some(timeout) = config.read_timeout() {
        builder = builder.timeout_read(timeout);
    }
    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy.clone());
    }
    builder.build()
}

/// True if the error or anything in its source chain is an IO timeout.
fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut next = Some(err);
    while let Some(err) = next {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        next = err.source();
    }
    false
}

impl Channel for HttpChannel {
    #[instrument(skip(self, request), fields(op = ?request.op()))]
    fn send(&mut self, request: &Request) -> Result<Response> {
        let response = self
            .post()
            .set("Content-Type", "application/x-www-form-urlencoded")
            .send_string(&request.form_encode());
        let response = self.check(response)?;
        self.read_body(response)
    }

    #[instrument(skip(self, request), fields(op = ?request.op()))]
    fn send_with_attachment(
        &mut self,
        request: &Request,
        attachment: Attachment<'_>,
    ) -> Result<Response> {
        let body = Multipart::new(request, &attachment.name);
        let content_length = body.content_length(attachment.len);
        let content_type = body.content_type();
        let reader = body.into_reader(attachment.reader.take(attachment.len));
        let response = self
            .post()
            .set("Content-Type", &content_type)
            .set("Content-Length", &content_length.to_string())
            .send(reader);
        let response = self.check(response)?;
        self.read_body(response)
    }

    #[instrument(skip(self, request), fields(op = ?request.op()))]
    fn open_stream(&mut self, request: &Request) -> Result<Box<dyn Read + Send>> {
        let response = self
            .post()
            .set("Content-Type", "application/x-www-form-urlencoded")
            .send_string(&request.form_encode());
        let response = self.check(response)?;
        Ok(response.into_reader())
    }

    fn fresh(&self) -> Box<dyn Channel> {
        Box::new(HttpChannel {
            url: self.url.clone(),
            config: self.config.clone(),
            proxy: self.proxy.clone(),
            agent: build_agent(&self.config, self.proxy.as_ref()),
        })
    }

    fn close(&mut self) {
        // Dropping the old agent drops its connection pool.
        self.agent = build_agent(&self.config, self.proxy.as_ref());
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

impl fmt::Debug for HttpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HttpChannel({})", self.url)
    }
}

/// A `multipart/form-data` body: the request fields, then one binary part.
struct Multipart {
    boundary: String,
    head: Vec<u8>,
    tail: Vec<u8>,
}

impl Multipart {
    fn new(request: &Request, file_name: &str) -> Multipart {
        let boundary = make_boundary();
        let mut head = String::new();
        for (name, value) in request.fields() {
            head.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        head.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            field::ATTACHMENT,
            file_name.replace('"', "%22"),
        ));
        let tail = format!("\r\n--{boundary}--\r\n").into_bytes();
        Multipart {
            boundary,
            head: head.into_bytes(),
            tail,
        }
    }

    fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn content_length(&self, attachment_len: u64) -> u64 {
        self.head.len() as u64 + attachment_len + self.tail.len() as u64
    }

    fn into_reader<R: Read>(self, attachment: R) -> impl Read {
        Cursor::new(self.head)
            .chain(attachment)
            .chain(Cursor::new(self.tail))
    }
}

fn make_boundary() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "remfs-{nanos:x}-{:x}",
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
