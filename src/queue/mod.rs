//! The chunk queue: priority-ordered blocking dispatch with one worker per
//! queue.

pub mod chunk_queue;
pub mod item;
pub mod worker;

pub use chunk_queue::{ChunkQueue, OverflowPolicy, QueueConfig};
pub use item::{Priority, WorkItem};
pub use worker::{Handler, WorkerHandle, spawn_worker};
