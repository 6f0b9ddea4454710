//! The pipeline step abstraction.
//!
//! A step wraps one unit of domain logic around the chunk-queue primitive.
//! Its state is owned exclusively by the step and mutated only inside its own
//! `handle` invocation; since each queue dispatches one item at a time, no
//! additional locking is required for step-local state.

pub mod error;
pub mod outputs;

pub use error::{ErrorReporter, StepError, TracingReporter};
pub use outputs::Outputs;

use crate::error::Result;
use crate::message::Message;
use crate::queue::Priority;

/// One stage of the processing pipeline.
///
/// Lifecycle: constructed (config only, no I/O) → `init` (may block: connect
/// sockets, spawn listeners) → active (`handle` per item) → `cleanup`.
/// `cleanup` must be idempotent and must tolerate `init` never having run.
pub trait Step: Send + 'static {
    /// Human-readable name for logs and error reports.
    fn name(&self) -> &str;

    /// Whether this step consumes an input queue. Source steps that only
    /// produce (system prompts, synthetic traffic) return false and get no
    /// queue or worker.
    fn has_input(&self) -> bool {
        true
    }

    /// Fixed priority of this step's input queue.
    fn input_priority(&self) -> Priority {
        Priority::NORMAL
    }

    /// Performs all blocking setup. Composition aborts if any step fails.
    ///
    /// `outputs` is already fully wired; source steps may emit from here.
    fn init(&mut self, outputs: &Outputs) -> Result<()> {
        let _ = outputs;
        Ok(())
    }

    /// Per-item business logic, invoked by the worker loop one item at a
    /// time. Forward results downstream with [`Outputs::emit`].
    fn handle(&mut self, message: Message, outputs: &Outputs) -> std::result::Result<(), StepError>;

    /// Releases held resources and clears accumulated state.
    fn cleanup(&mut self) {}
}
