//! Thread-safe priority-ordered blocking queue.
//!
//! Any number of producer threads enqueue; one worker loop dispatches. The
//! `(priority, enqueue time, sequence)` key is assigned inside the enqueue
//! lock, so concurrent producers always receive unique, strictly increasing
//! sequence numbers and the heap never observes a half-assigned entry.

use crate::queue::item::{Priority, WorkItem};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// What to do with an incoming item when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the entry that would dispatch next, keeping the freshest data.
    DropOldest,
    /// Discard the incoming item.
    DropNewest,
    /// Block the producer until space is available.
    #[default]
    Block,
}

/// Tunables for one queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Fixed priority stamped on items enqueued via [`ChunkQueue::enqueue`].
    pub priority: Priority,
    /// Maximum buffered items; `None` means unbounded (the default; growth
    /// under a stalled handler is an accepted risk, not silently mitigated).
    pub capacity: Option<usize>,
    /// Overflow behavior when `capacity` is set.
    pub overflow: OverflowPolicy,
    /// How long the worker blocks per dequeue attempt before re-checking the
    /// running flag.
    pub poll_interval: Duration,
    /// Grace period [`ChunkQueue::stop`] grants the in-flight handler call
    /// before draining.
    pub stop_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            priority: Priority::NORMAL,
            capacity: None,
            overflow: OverflowPolicy::default(),
            poll_interval: Duration::from_millis(100),
            stop_grace: Duration::from_millis(100),
        }
    }
}

impl QueueConfig {
    /// Config with a fixed priority and defaults for everything else.
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

struct QueueState<T> {
    heap: BinaryHeap<Reverse<WorkItem<T>>>,
    next_sequence: u64,
}

struct Inner<T> {
    state: Mutex<QueueState<T>>,
    /// Signaled on enqueue; wakes a blocked consumer.
    available: Condvar,
    /// Signaled on dequeue/flush; wakes producers blocked on capacity.
    space: Condvar,
    running: AtomicBool,
    config: QueueConfig,
}

/// The chunk queue. Cheap to clone; all clones share one buffer.
pub struct ChunkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ChunkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ChunkQueue<T> {
    /// Creates a passive queue (no worker attached). Pair with
    /// [`crate::queue::worker::spawn_worker`] for active dispatch.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    heap: BinaryHeap::new(),
                    next_sequence: 0,
                }),
                available: Condvar::new(),
                space: Condvar::new(),
                running: AtomicBool::new(true),
                config,
            }),
        }
    }

    /// Enqueues with the queue's fixed priority.
    ///
    /// Never blocks except to take the internal lock (and, for bounded queues
    /// with [`OverflowPolicy::Block`], until space frees up). Safe to call
    /// after [`stop`](Self::stop): the item is accepted but never dispatched.
    pub fn enqueue(&self, payload: T) {
        self.enqueue_with_priority(payload, self.inner.config.priority);
    }

    /// Enqueues with an explicit per-item priority.
    pub fn enqueue_with_priority(&self, payload: T, priority: Priority) {
        let mut state = lock_state(&self.inner.state);

        if let Some(capacity) = self.inner.config.capacity {
            state = self.reserve_slot(state, capacity);
            if state.heap.len() >= capacity
                && self.inner.config.overflow == OverflowPolicy::DropNewest
            {
                return;
            }
        }

        state.next_sequence += 1;
        let item = WorkItem {
            priority,
            enqueued_at: Instant::now(),
            sequence: state.next_sequence,
            payload,
        };
        state.heap.push(Reverse(item));
        drop(state);
        self.inner.available.notify_one();
    }

    /// Applies the overflow policy until the heap has room for one more item.
    fn reserve_slot<'a>(
        &'a self,
        mut state: MutexGuard<'a, QueueState<T>>,
        capacity: usize,
    ) -> MutexGuard<'a, QueueState<T>> {
        match self.inner.config.overflow {
            OverflowPolicy::DropOldest => {
                while state.heap.len() >= capacity {
                    state.heap.pop();
                }
            }
            OverflowPolicy::Block => {
                while state.heap.len() >= capacity && self.is_running() {
                    let (guard, _timeout) = self
                        .inner
                        .space
                        .wait_timeout(state, self.inner.config.poll_interval)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    state = guard;
                }
            }
            OverflowPolicy::DropNewest => {}
        }
        state
    }

    /// Blocks up to `timeout` for the next item in dispatch order.
    ///
    /// Returns `None` on timeout or when the queue has been stopped; the
    /// worker loop uses the timeout to re-check the running flag.
    pub fn dequeue_blocking(&self, timeout: Duration) -> Option<T> {
        self.dequeue_item_blocking(timeout).map(|item| item.payload)
    }

    /// Like [`dequeue_blocking`](Self::dequeue_blocking) but keeps the
    /// ordering key attached.
    pub fn dequeue_item_blocking(&self, timeout: Duration) -> Option<WorkItem<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = lock_state(&self.inner.state);

        loop {
            // A stopped queue never dispatches, even with items buffered.
            if !self.is_running() {
                return None;
            }
            if !state.heap.is_empty() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timeout) = self
                .inner
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }

        let item = state.heap.pop().map(|Reverse(item)| item);
        drop(state);
        self.inner.space.notify_one();
        item
    }

    /// Pops the next item without blocking.
    pub fn try_dequeue_item(&self) -> Option<WorkItem<T>> {
        let mut state = lock_state(&self.inner.state);
        let item = state.heap.pop().map(|Reverse(item)| item);
        if item.is_some() {
            drop(state);
            self.inner.space.notify_one();
        }
        item
    }

    /// Drains all buffered items without dispatching them. Returns how many
    /// were discarded.
    pub fn flush(&self) -> usize {
        let mut state = lock_state(&self.inner.state);
        let drained = state.heap.len();
        state.heap.clear();
        drop(state);
        self.inner.space.notify_all();
        drained
    }

    /// Stops the queue: signals the worker, grants the in-flight handler call
    /// a short grace window, then drains the buffer.
    ///
    /// Idempotent. `enqueue` remains callable afterwards but items will never
    /// be dispatched.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.available.notify_all();
        self.inner.space.notify_all();
        std::thread::sleep(self.inner.config.stop_grace);
        self.flush();
    }

    /// Stops without the grace sleep or drain. Used by the worker loop when a
    /// fatal handler error requests shutdown from inside the loop itself.
    pub(crate) fn halt(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.available.notify_all();
        self.inner.space.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock_state(&self.inner.state).heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The queue's fixed priority.
    pub fn priority(&self) -> Priority {
        self.inner.config.priority
    }

    /// The worker poll interval configured for this queue.
    pub(crate) fn poll_interval(&self) -> Duration {
        self.inner.config.poll_interval
    }
}

fn lock_state<'a, T>(mutex: &'a Mutex<QueueState<T>>) -> MutexGuard<'a, QueueState<T>> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
