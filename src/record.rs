// Copyright 2025-2026 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! A log of requests sent through a channel, for testing.

use crate::envelope::{field, ChunkName, OpTag, Request};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    /// What operation?
    pub verb: Verb,
    /// The request's path field, which names the chunk for chunked transfers.
    pub path: String,
}

impl Call {
    pub fn new<P: ToString>(verb: Verb, path: P) -> Self {
        Self {
            verb,
            path: path.to_string(),
        }
    }

    /// Describe a request as a call.
    pub fn from_request(request: &Request) -> Self {
        let path = request.get(field::PATH).unwrap_or_default();
        let chunked = request.get(field::CHUNK_LENGTH).is_some();
        let verb = match request.op() {
            Some(OpTag::Login) => Verb::Login,
            Some(OpTag::Logoff) => Verb::Logoff,
            Some(OpTag::Call) => Verb::Metadata,
            Some(OpTag::List) => Verb::ListDir,
            Some(OpTag::Download) if chunked => Verb::DownloadChunk,
            Some(OpTag::Download) => Verb::Download,
            Some(OpTag::Upload) if chunked => Verb::UploadChunk,
            Some(OpTag::Upload) => Verb::Upload,
            Some(OpTag::PutFilter) => Verb::PutFilter,
            None => Verb::Unknown,
        };
        Call::new(verb, path)
    }

    /// The chunk this call transferred, if any.
    pub fn chunk(&self) -> Option<ChunkName> {
        match self.verb {
            Verb::DownloadChunk | Verb::UploadChunk => ChunkName::parse(&self.path),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verb {
    Login,
    Logoff,
    Metadata,
    ListDir,
    Download,
    DownloadChunk,
    Upload,
    UploadChunk,
    PutFilter,
    Unknown,
}
