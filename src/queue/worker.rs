//! Dispatch loop bound to one chunk queue.
//!
//! One worker per queue, so items are processed strictly one at a time in
//! dispatch order: downstream state (conversation history, accumulators)
//! observes messages in enqueue order even when the handler suspends.

use crate::queue::chunk_queue::ChunkQueue;
use crate::step::error::{ErrorReporter, StepError};
use futures_util::future::BoxFuture;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Handler invoked for each dispatched payload.
pub enum Handler<T> {
    /// Runs to completion on the worker thread before the next item.
    Sync(Box<dyn FnMut(T) -> Result<(), StepError> + Send + 'static>),
    /// May suspend; the worker drives each invocation to completion before
    /// dequeuing the next item, so per-queue ordering holds in async mode too.
    Async(Box<dyn FnMut(T) -> BoxFuture<'static, Result<(), StepError>> + Send + 'static>),
}

impl<T> Handler<T> {
    /// Wraps a blocking closure.
    pub fn sync(f: impl FnMut(T) -> Result<(), StepError> + Send + 'static) -> Self {
        Handler::Sync(Box::new(f))
    }

    /// Wraps a future-returning closure.
    pub fn async_fn(
        f: impl FnMut(T) -> BoxFuture<'static, Result<(), StepError>> + Send + 'static,
    ) -> Self {
        Handler::Async(Box::new(f))
    }
}

/// Handle to a spawned worker thread.
pub struct WorkerHandle {
    handle: Option<JoinHandle<()>>,
    name: String,
}

impl WorkerHandle {
    /// Waits for the worker thread to exit. Call after stopping the queue.
    pub fn join(mut self) -> Result<(), String> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| format!("Worker '{}' thread panicked", self.name)),
            None => Ok(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Spawns the dispatch loop for `queue` on a dedicated thread.
///
/// Async handlers run on `runtime` when provided; otherwise the worker builds
/// a private current-thread runtime. Fails if the OS refuses the thread.
pub fn spawn_worker<T: Send + 'static>(
    name: impl Into<String>,
    queue: ChunkQueue<T>,
    handler: Handler<T>,
    reporter: Arc<dyn ErrorReporter>,
    runtime: Option<tokio::runtime::Handle>,
) -> std::io::Result<WorkerHandle> {
    let name = name.into();
    let thread_name = name.clone();
    let handle = thread::Builder::new()
        .name(format!("voxflow-{}", thread_name))
        .spawn(move || run_loop(&thread_name, queue, handler, reporter, runtime))?;

    Ok(WorkerHandle {
        handle: Some(handle),
        name,
    })
}

fn run_loop<T: Send + 'static>(
    name: &str,
    queue: ChunkQueue<T>,
    mut handler: Handler<T>,
    reporter: Arc<dyn ErrorReporter>,
    runtime: Option<tokio::runtime::Handle>,
) {
    // Built lazily, only if an async handler runs without a shared runtime.
    let mut local_runtime: Option<tokio::runtime::Runtime> = None;
    let poll_interval = queue.poll_interval();

    while queue.is_running() {
        let Some(payload) = queue.dequeue_blocking(poll_interval) else {
            continue;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| match &mut handler {
            Handler::Sync(f) => f(payload),
            Handler::Async(f) => {
                let fut = f(payload);
                if let Some(handle) = &runtime {
                    handle.block_on(fut)
                } else {
                    if local_runtime.is_none() {
                        match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(rt) => local_runtime = Some(rt),
                            Err(e) => {
                                return Err(StepError::Fatal(format!(
                                    "failed to build runtime: {e}"
                                )));
                            }
                        }
                    }
                    match &local_runtime {
                        Some(rt) => rt.block_on(fut),
                        None => Err(StepError::Fatal("runtime unavailable".to_string())),
                    }
                }
            }
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error @ StepError::Recoverable(_))) => {
                reporter.report(name, &error);
            }
            Ok(Err(error @ StepError::Fatal(_))) => {
                reporter.report(name, &error);
                queue.halt();
                break;
            }
            Err(panic_info) => {
                let msg = panic_info
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic_info.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                reporter.report(name, &StepError::Recoverable(format!("handler panicked: {msg}")));
            }
        }
    }

    tracing::debug!(worker = name, "worker loop exited");
}
