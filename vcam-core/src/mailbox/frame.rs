//! Double-buffered latest-frame slot.
//!
//! The producer writes into the write slot and flips the slots; the
//! consumer only ever sees the read slot. A publish never waits for a
//! consumer to finish with a frame: frames are reference-counted, so the
//! critical section is a pointer swap on either side. Unread frames are
//! superseded, not queued.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::Frame;

#[derive(Debug, Default)]
struct DoubleBuffer {
    slots: [Option<Frame>; 2],
    /// Index of the slot consumers read from.
    read: usize,
    has_new: bool,
    published: u64,
}

fn lock(inner: &Mutex<DoubleBuffer>) -> MutexGuard<'_, DoubleBuffer> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── FrameMailbox ─────────────────────────────────────────────────

/// Producer side, owned by the capture loop.
#[derive(Debug, Default)]
pub struct FrameMailbox {
    inner: Arc<Mutex<DoubleBuffer>>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a complete frame, superseding any unread one.
    pub fn publish(&self, frame: Frame) {
        let mut buf = lock(&self.inner);
        let write = 1 - buf.read;
        buf.slots[write] = Some(frame);
        buf.read = write;
        buf.has_new = true;
        buf.published += 1;
    }

    /// Consumer handle onto the same slots.
    pub fn sink(&self) -> FrameSink {
        FrameSink {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Total frames published so far.
    pub fn published(&self) -> u64 {
        lock(&self.inner).published
    }
}

// ── FrameSink ────────────────────────────────────────────────────

/// Consumer side. Cheap to clone; all clones share one "new" flag.
#[derive(Debug, Clone)]
pub struct FrameSink {
    inner: Arc<Mutex<DoubleBuffer>>,
}

impl FrameSink {
    /// Take the latest frame if one arrived since the last take.
    ///
    /// Never blocks on the producer beyond the slot swap.
    pub fn try_take_latest_frame(&self) -> Option<Frame> {
        let mut buf = lock(&self.inner);
        if !buf.has_new {
            return None;
        }
        buf.has_new = false;
        buf.slots[buf.read].clone()
    }

    /// `true` when a frame is waiting.
    pub fn has_new(&self) -> bool {
        lock(&self.inner).has_new
    }

    /// Total frames published so far.
    pub fn published(&self) -> u64 {
        lock(&self.inner).published
    }
}
