//! Session registry for transport collaborators.
//!
//! Replaces ad-hoc per-step client dictionaries with one owned table:
//! explicit removal on disconnect, bounded capacity, and TTL eviction driven
//! by a single sweeper thread. Only the registry mutates the table; nothing
//! else reaches into it from timer callbacks.

use crate::error::{Result, VoxflowError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One connected client/session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: String,
    pub created_at: Instant,
    pub last_seen: Instant,
    /// Transport-specific metadata (remote address, negotiated format, ...).
    pub metadata: Value,
}

struct RegistryInner {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    capacity: usize,
    ttl: Duration,
}

/// Thread-safe table of live sessions with a bounded lifetime policy.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Creates a registry holding at most `capacity` sessions; entries idle
    /// longer than `ttl` are evicted by [`evict_idle`](Self::evict_idle) or
    /// the sweeper.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                capacity,
                ttl,
            }),
        }
    }

    /// Registers a session. Fails when the registry is full; re-registering
    /// an existing id refreshes it.
    pub fn register(&self, session_id: &str, metadata: Value) -> Result<()> {
        let mut sessions = self.lock();
        if !sessions.contains_key(session_id) && sessions.len() >= self.inner.capacity {
            return Err(VoxflowError::SessionRegistryFull {
                capacity: self.inner.capacity,
            });
        }
        let now = Instant::now();
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                session_id: session_id.to_string(),
                created_at: now,
                last_seen: now,
                metadata,
            },
        );
        Ok(())
    }

    /// Marks a session as active. Returns false for unknown ids.
    pub fn touch(&self, session_id: &str) -> bool {
        match self.lock().get_mut(session_id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes a session explicitly (disconnect).
    pub fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        self.lock().remove(session_id)
    }

    /// Returns a snapshot of one session.
    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.lock().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Evicts sessions idle past the TTL; returns the evicted ids.
    pub fn evict_idle(&self) -> Vec<String> {
        let ttl = self.inner.ttl;
        let now = Instant::now();
        let mut sessions = self.lock();
        let expired: Vec<String> = sessions
            .values()
            .filter(|entry| now.duration_since(entry.last_seen) >= ttl)
            .map(|entry| entry.session_id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "evicted idle sessions");
        }
        expired
    }

    /// Spawns the sweeper thread that runs [`evict_idle`](Self::evict_idle)
    /// every `interval` until the handle is stopped. Fails if the OS refuses
    /// the thread.
    pub fn start_sweeper(&self, interval: Duration) -> Result<SweeperHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let registry = self.clone();
        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name("voxflow-session-sweeper".to_string())
            .spawn(move || {
                while thread_running.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    if !thread_running.load(Ordering::SeqCst) {
                        break;
                    }
                    registry.evict_idle();
                }
            })?;

        Ok(SweeperHandle {
            running,
            handle: Some(handle),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle controlling the sweeper thread.
pub struct SweeperHandle {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it to exit.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
