//! # Sequence Counter
//!
//! Versioned-read protocol for data that is read far more often than it is
//! written. The writer bumps the sequence to odd before touching the
//! protected fields and back to even afterwards; a reader samples the
//! sequence, reads the fields, and retries if the sequence was odd or moved.
//! Readers never block the writer.
//!
//! The protected fields must themselves be atomics (accessed with relaxed
//! ordering); the counter only supplies the ordering and the retry signal.
//! Writers must be serialized by the caller.

use core::sync::atomic::{fence, AtomicU32, Ordering};

/// Sequence counter
#[derive(Debug, Default)]
pub struct SeqCount {
    sequence: AtomicU32,
}

impl SeqCount {
    /// Create a new counter (no write in progress)
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
        }
    }

    /// Begin a read section, waiting out a write in progress
    #[inline]
    pub fn read_begin(&self) -> u32 {
        loop {
            let seq = self.sequence.load(Ordering::Acquire);
            if seq & 1 == 0 {
                return seq;
            }
            core::hint::spin_loop();
        }
    }

    /// Whether the read section started at `start` must be retried
    #[inline]
    pub fn read_retry(&self, start: u32) -> bool {
        fence(Ordering::Acquire);
        self.sequence.load(Ordering::Relaxed) != start
    }

    /// Run `f` until it observes a consistent state
    #[inline]
    pub fn read<R, F>(&self, mut f: F) -> R
    where
        F: FnMut() -> R,
    {
        loop {
            let seq = self.read_begin();
            let value = f();
            if !self.read_retry(seq) {
                return value;
            }
            core::hint::spin_loop();
        }
    }

    /// Begin a write section
    #[inline]
    pub fn write_begin(&self) {
        let prev = self.sequence.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev & 1 == 0, "Nested write detected");
        fence(Ordering::Release);
    }

    /// End a write section
    #[inline]
    pub fn write_end(&self) {
        self.sequence.fetch_add(1, Ordering::Release);
    }

    /// Run `f` inside a write section
    #[inline]
    pub fn write<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.write_begin();
        let value = f();
        self.write_end();
        value
    }
}

// =============================================================================
// TESTS
// =============================================================================
