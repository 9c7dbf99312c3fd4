//! Per-channel sequence numbering for outbound frames.
//!
//! Every frame header carries a sequence number.  Each advertiser and each
//! session owns one counter, so the numbers a receiver sees on one channel
//! increase by one per frame.  Receivers only log them; nothing is
//! retransmitted at this layer.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing counter for frame sequence numbers.
///
/// Starts at 0 and wraps at `u64::MAX` without panicking.
///
/// # Examples
///
/// ```rust
/// use battlebump_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number and advances the counter.
    ///
    /// `Relaxed` is enough: the value orders frames, it does not publish memory.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of frames stamped so far.
    pub fn issued(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}
