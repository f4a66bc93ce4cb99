//! Retransmission cache.
//!
//! Every frame sent while the session is forwarding is remembered here. On
//! resume the server reports how many payload bytes it received; the missing
//! tail is read back out of this cache and retransmitted verbatim. The cache
//! is bounded: a disconnect that outlives it makes the session unresumable,
//! which the state machine reports as a cache miss.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// Frames retained for retransmission. Oldest is evicted past this.
pub const REPLAY_CAPACITY: usize = 100;

/// Bounded ring of recently transmitted frames.
#[derive(Debug)]
pub struct ReplayCache {
    frames: VecDeque<Bytes>,
    total: usize,
    capacity: usize,
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayCache {
    /// A cache with the protocol's standard capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(REPLAY_CAPACITY)
    }

    /// A cache bounded at `capacity` frames.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { frames: VecDeque::with_capacity(capacity), total: 0, capacity }
    }

    /// Remember a transmitted frame, evicting the oldest on overflow.
    pub fn insert(&mut self, frame: Bytes) {
        self.total += frame.len();
        self.frames.push_back(frame);
        while self.frames.len() > self.capacity {
            if let Some(evicted) = self.frames.pop_front() {
                self.total -= evicted.len();
            }
        }
    }

    /// Total payload bytes currently cached.
    #[must_use]
    pub fn cached_bytes(&self) -> usize {
        self.total
    }

    /// Number of frames currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the cache holds no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The last `n` bytes of the transmitted stream, in transmission order.
    ///
    /// Returns `None` when more than the cached total is requested: the
    /// bytes are gone and resumption cannot proceed.
    #[must_use]
    pub fn tail(&self, n: usize) -> Option<Bytes> {
        if n > self.total {
            return None;
        }
        if n == 0 {
            return Some(Bytes::new());
        }

        // Walk newest to oldest until `n` bytes are covered, slicing the
        // oldest included frame to its tail.
        let mut remaining = n;
        let mut first = self.frames.len();
        let mut offset = 0;
        for (i, frame) in self.frames.iter().enumerate().rev() {
            first = i;
            if frame.len() >= remaining {
                offset = frame.len() - remaining;
                remaining = 0;
                break;
            }
            remaining -= frame.len();
        }
        debug_assert_eq!(remaining, 0);

        let mut out = BytesMut::with_capacity(n);
        for (i, frame) in self.frames.iter().enumerate().skip(first) {
            if i == first {
                out.extend_from_slice(&frame[offset..]);
            } else {
                out.extend_from_slice(frame);
            }
        }
        Some(out.freeze())
    }

    /// Drop everything cached.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.total = 0;
    }
}
