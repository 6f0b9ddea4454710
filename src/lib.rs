//! voxflow - Real-time voice pipeline substrate.
//!
//! Ordered priority work queues with one worker per queue, composed into
//! directed step graphs (including fan-out) with uniform lifecycle control.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod config;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod step;
pub mod steps;

// Core primitives (queue → step → pipeline)
pub use queue::{ChunkQueue, Handler, OverflowPolicy, Priority, QueueConfig, WorkItem};
pub use step::{ErrorReporter, Outputs, Step, StepError, TracingReporter};

// Composition
pub use pipeline::{Pipeline, PipelineConfig, PipelineEvent};

// Message envelope
pub use message::{AudioChunk, ControlSignal, Message, MessageKind, Payload};

// Error handling
pub use error::{Result, VoxflowError};

// Config
pub use config::Settings;

// Session registry
pub use session::{SessionRegistry, SweeperHandle};
