//! Error types and reporting for step handlers.

use std::fmt;

/// Errors returned by a step's `handle` call.
#[derive(Debug, Clone)]
pub enum StepError {
    /// Recoverable error: the item is dropped, the worker loop continues.
    Recoverable(String),
    /// Fatal error: the step's queue shuts down.
    Fatal(String),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StepError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StepError {}

/// Trait for reporting per-item handler failures.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error raised while handling one item.
    fn report(&self, step: &str, error: &StepError);
}

/// Default reporter backed by `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, step: &str, error: &StepError) {
        match error {
            StepError::Recoverable(_) => tracing::warn!(step, %error, "handler error, item dropped"),
            StepError::Fatal(_) => tracing::error!(step, %error, "fatal handler error"),
        }
    }
}
