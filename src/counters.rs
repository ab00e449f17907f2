// Copyright 2023-2026 Martin Pool

//! Track counters of chunks, bytes, and calls exchanged with the server.
//!
//! Each session owns a [Counters] table shared with its clones and transfers.

#![warn(missing_docs)]

use std::fmt::{self, Debug};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

use itertools::Itertools;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumCount, EnumIter};

/// Counters of events or bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumCount, EnumIter)]
pub enum Counter {
    /// Chunks sent to the server.
    ChunksUploaded,
    /// Chunks not sent because a previous attempt already had them confirmed.
    ChunksSkipped,
    /// Chunks fetched from the server.
    ChunksDownloaded,
    /// Chunks served from a local buffer left by an earlier attempt.
    ChunksFromBuffer,
    /// Payload bytes sent, including single-shot uploads.
    BytesSent,
    /// Payload bytes received, including single-shot downloads.
    BytesReceived,
    /// Metadata calls issued.
    MetadataCalls,
    /// Directory listings requested.
    Listings,
}

/// Counter values, identified by a [Counter].
#[derive(Default)]
pub struct Counters {
    counters: [AtomicUsize; Counter::COUNT],
}

impl Counters {
    /// Increase the value for a given counter by an amount.
    pub fn count(&self, counter: Counter, increment: usize) {
        self.counters[counter as usize].fetch_add(increment, Relaxed);
    }

    /// Get the current value of a counter.
    pub fn get(&self, counter: Counter) -> usize {
        self.counters[counter as usize].load(Relaxed)
    }

    /// Return an iterator over counter, value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Counter, usize)> {
        Counter::iter()
            .map(move |c| (c, self.counters[c as usize].load(Relaxed)))
            .collect_vec()
            .into_iter()
    }
}

impl Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Counters");
        for i in Counter::iter() {
            s.field(
                &format!("{:?}", i),
                &self.counters[i as usize].load(Relaxed),
            );
        }
        s.finish()
    }
}
