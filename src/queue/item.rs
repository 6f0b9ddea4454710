//! Ordered queue entries.

use std::cmp::Ordering;
use std::time::Instant;

/// Dispatch priority. Lower values dispatch first.
///
/// In practice each queue carries one fixed priority (priority differentiates
/// queues, not items within a queue), but every entry stores its own value so
/// per-item overrides order correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Control traffic that must preempt buffered work.
    pub const CRITICAL: Priority = Priority(0);
    /// Elevated traffic (e.g. barge-in signals).
    pub const HIGH: Priority = Priority(1);
    /// Regular streaming traffic.
    pub const NORMAL: Priority = Priority(2);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

/// One buffered entry: the payload plus the ordering key assigned at enqueue.
///
/// The total order is `(priority, enqueued_at, sequence)`. The sequence is
/// strictly increasing within a queue's lifetime, so two entries never compare
/// equal and the payload itself is never compared.
#[derive(Debug)]
pub struct WorkItem<T> {
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub sequence: u64,
    pub payload: T,
}

impl<T> WorkItem<T> {
    fn key(&self) -> (Priority, Instant, u64) {
        (self.priority, self.enqueued_at, self.sequence)
    }
}

impl<T> PartialEq for WorkItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for WorkItem<T> {}

impl<T> PartialOrd for WorkItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for WorkItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
