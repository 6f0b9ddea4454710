//! Output wiring handles for steps.

use crate::message::Message;
use crate::queue::ChunkQueue;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Destination {
    id: String,
    queue: ChunkQueue<Message>,
}

#[derive(Default)]
struct OutputTable {
    default: Option<Destination>,
    fanout: Vec<Destination>,
}

/// A step's downstream wiring: one default destination and, for fan-out
/// steps, an ordered list of duplication targets.
///
/// Wiring is resolved during pipeline composition, before any traffic flows;
/// the handle itself is cheap to clone and shared with the step's worker.
#[derive(Clone)]
pub struct Outputs {
    step: Arc<str>,
    table: Arc<RwLock<OutputTable>>,
}

impl Outputs {
    pub(crate) fn new(step: &str) -> Self {
        Self {
            step: Arc::from(step),
            table: Arc::new(RwLock::new(OutputTable::default())),
        }
    }

    pub(crate) fn set_default(&self, id: &str, queue: ChunkQueue<Message>) {
        self.write().default = Some(Destination {
            id: id.to_string(),
            queue,
        });
    }

    pub(crate) fn add_fanout(&self, id: &str, queue: ChunkQueue<Message>) {
        self.write().fanout.push(Destination {
            id: id.to_string(),
            queue,
        });
    }

    /// Number of registered fan-out destinations.
    pub fn fanout_len(&self) -> usize {
        self.read().fanout.len()
    }

    /// True if neither a default nor any fan-out destination is wired.
    pub fn is_unwired(&self) -> bool {
        let table = self.read();
        table.default.is_none() && table.fanout.is_empty()
    }

    /// Forwards a message downstream.
    ///
    /// With fan-out destinations registered, every destination receives its
    /// own copy in registration order, tagged with `branch_index` and
    /// `duplicated_at`; attribute maps are per-copy, so one branch's mutations
    /// never reach another. Otherwise the message goes to the default
    /// destination. With no wiring at all this is a logged no-op; a
    /// composition mistake must not crash a running pipeline.
    pub fn emit(&self, message: Message) {
        let table = self.read();
        if !table.fanout.is_empty() {
            for (branch, dest) in table.fanout.iter().enumerate() {
                dest.queue.enqueue(message.duplicate_for_branch(branch));
            }
        } else if let Some(dest) = &table.default {
            dest.queue.enqueue(message);
        } else {
            tracing::warn!(step = %self.step, "emit with no destination wired, message dropped");
        }
    }

    /// Forwards a message to one named destination (default or fan-out).
    ///
    /// Returns false (and logs) if no destination with that id is wired.
    pub fn emit_to(&self, target_id: &str, message: Message) -> bool {
        let table = self.read();
        if let Some(dest) = &table.default
            && dest.id == target_id
        {
            dest.queue.enqueue(message);
            return true;
        }
        if let Some(dest) = table.fanout.iter().find(|d| d.id == target_id) {
            dest.queue.enqueue(message);
            return true;
        }
        tracing::warn!(
            step = %self.step,
            target = target_id,
            "emit to unknown destination, message dropped"
        );
        false
    }

    fn read(&self) -> RwLockReadGuard<'_, OutputTable> {
        self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, OutputTable> {
        self.table.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
