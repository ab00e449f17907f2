// Copyright 2026 Martin Pool.

//! A channel that hands requests straight to an in-process [Dispatcher].
//!
//! Calls are recorded, and chunk requests can be made to fail, to check
//! what goes over the wire and how transfers recover.

use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::channel::{Attachment, Channel};
use crate::envelope::{Request, Response};
use crate::errors::{Error, Result};
use crate::record::{Call, Verb};
use crate::server::Dispatcher;

#[derive(Clone)]
pub struct LoopbackChannel {
    dispatcher: Arc<Dispatcher>,
    calls: Arc<Mutex<Vec<Call>>>,
    /// Chunk requests still allowed to succeed, if limited.
    chunk_budget: Arc<Mutex<Option<usize>>>,
}

impl LoopbackChannel {
    pub fn new(dispatcher: Arc<Dispatcher>) -> LoopbackChannel {
        LoopbackChannel {
            dispatcher,
            calls: Arc::default(),
            chunk_budget: Arc::default(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Let `n` more chunk requests through, then fail every one after as if
    /// the connection dropped.
    pub fn fail_chunks_after(&self, n: usize) {
        *self.chunk_budget.lock().expect("lock chunk budget") = Some(n);
    }

    /// Stop failing chunk requests.
    pub fn heal(&self) {
        *self.chunk_budget.lock().expect("lock chunk budget") = None;
    }

    /// Calls that reached the dispatcher, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock calls").clone()
    }

    /// Return and forget the calls recorded so far.
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().expect("lock calls"))
    }

    /// Record the call, or fail it if it's a chunk request over budget.
    fn admit(&self, request: &Request) -> Result<()> {
        let call = Call::from_request(request);
        if matches!(call.verb, Verb::DownloadChunk | Verb::UploadChunk) {
            let mut budget = self.chunk_budget.lock().expect("lock chunk budget");
            match budget.as_mut() {
                Some(0) => {
                    debug!(?call, "Injected failure");
                    return Err(Error::Connect {
                        url: self.endpoint(),
                        source: "injected connection failure".into(),
                    });
                }
                Some(n) => *n -= 1,
                None => (),
            }
        }
        trace!(?call);
        self.calls.lock().expect("lock calls").push(call);
        Ok(())
    }
}

impl Channel for LoopbackChannel {
    fn send(&mut self, request: &Request) -> Result<Response> {
        self.admit(request)?;
        Response::parse(&self.dispatcher.dispatch(request, None))
    }

    fn send_with_attachment(
        &mut self,
        request: &Request,
        attachment: Attachment<'_>,
    ) -> Result<Response> {
        self.admit(request)?;
        let mut content = attachment.reader.take(attachment.len);
        let content: &mut dyn Read = &mut content;
        Response::parse(&self.dispatcher.dispatch(request, Some(content)))
    }

    fn open_stream(&mut self, request: &Request) -> Result<Box<dyn Read + Send>> {
        self.admit(request)?;
        Ok(Box::new(Cursor::new(self.dispatcher.dispatch(request, None))))
    }

    fn fresh(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }

    fn endpoint(&self) -> String {
        format!("loopback:{}", self.dispatcher.root().display())
    }
}
