//! Per-worker FIFO of requests waiting for an upstream connection to free up.
//!
//! Grounded in the dispatcher's `request_ev` pattern: rather than a timer
//! firing on a poll interval, the queue exposes `should_signal` so the
//! caller (the worker's dispatcher loop) only wakes other pending entries
//! when one is actually appended to an otherwise-idle queue.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::PoolError;

/// One request waiting for an upstream connection, identified by the
/// connection-table token of the client connection it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct PendingEntry {
    /// Client connection token this pending request belongs to.
    pub token: usize,
    enqueued_at: Instant,
    timeout: Duration,
}

impl PendingEntry {
    /// Whether this entry has waited past its `pending_timeout`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.enqueued_at) >= self.timeout
    }
}

/// A bounded FIFO of [`PendingEntry`] values.
#[derive(Debug)]
pub struct PendingQueue {
    entries: VecDeque<PendingEntry>,
    max_pending: usize,
}

impl PendingQueue {
    /// Creates a new queue bounded at `max_pending` entries.
    pub fn new(max_pending: usize) -> Self {
        PendingQueue {
            entries: VecDeque::new(),
            max_pending,
        }
    }

    /// Appends `token` to the queue. Returns `true` if the queue was empty
    /// before this append (the caller should arm a wakeup, since an entry
    /// just became the sole thing waiting). Errors if the queue is full.
    pub fn push(&mut self, token: usize, timeout: Duration) -> Result<bool, PoolError> {
        if self.max_pending != 0 && self.entries.len() >= self.max_pending {
            return Err(PoolError::QueueFull(self.max_pending));
        }

        let was_empty = self.entries.is_empty();
        self.entries.push_back(PendingEntry {
            token,
            enqueued_at: Instant::now(),
            timeout,
        });
        Ok(was_empty)
    }

    /// Pops the oldest entry, if any.
    pub fn pop(&mut self) -> Option<PendingEntry> {
        self.entries.pop_front()
    }

    /// Removes and returns every entry that has exceeded its timeout,
    /// preserving FIFO order among the survivors.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<PendingEntry> {
        let (expired, remaining): (VecDeque<_>, VecDeque<_>) =
            self.entries.drain(..).partition(|e| e.is_expired(now));
        self.entries = remaining;
        expired.into_iter().collect()
    }

    /// Number of entries currently queued.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_reports_empty_to_nonempty_transition() {
        let mut q = PendingQueue::new(2);
        assert!(q.push(1, Duration::from_secs(5)).unwrap());
        assert!(!q.push(2, Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn zero_max_pending_is_unbounded() {
        let mut q = PendingQueue::new(0);
        for i in 0..50 {
            q.push(i, Duration::from_secs(5)).unwrap();
        }
        assert_eq!(50, q.len());
    }

    #[test]
    fn push_past_capacity_errors() {
        let mut q = PendingQueue::new(1);
        q.push(1, Duration::from_secs(5)).unwrap();
        assert!(matches!(q.push(2, Duration::from_secs(5)), Err(PoolError::QueueFull(1))));
    }

    #[test]
    fn pop_returns_fifo_order() {
        let mut q = PendingQueue::new(4);
        q.push(1, Duration::from_secs(5)).unwrap();
        q.push(2, Duration::from_secs(5)).unwrap();
        assert_eq!(1, q.pop().unwrap().token);
        assert_eq!(2, q.pop().unwrap().token);
        assert!(q.pop().is_none());
    }

    #[test]
    fn drain_expired_removes_only_timed_out_entries() {
        let mut q = PendingQueue::new(4);
        q.push(1, Duration::from_secs(0)).unwrap();
        q.push(2, Duration::from_secs(300)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let expired = q.drain_expired(Instant::now());
        assert_eq!(1, expired.len());
        assert_eq!(1, expired[0].token);
        assert_eq!(1, q.len());
    }
}
