//! Pipeline composition: the step graph plus joint lifecycle control.
//!
//! All wiring happens during composition, before `run()`; once traffic flows
//! the graph is frozen. `run()` initializes steps in registration order and
//! `shutdown()` cleans them up in reverse, regardless of individual failures.

use crate::error::{Result, VoxflowError};
use crate::message::Message;
use crate::queue::{ChunkQueue, Handler, QueueConfig, WorkerHandle, spawn_worker};
use crate::step::{ErrorReporter, Outputs, Step, TracingReporter};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

/// Lifecycle notifications, streamed over an optional crossbeam channel so a
/// daemon or UI can follow pipeline state without polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StepInitialized { id: String },
    StepInitFailed { id: String, message: String },
    Started,
    StepCleaned { id: String },
    ShutdownComplete,
}

/// Per-node lifecycle state. No transition skips a state; cleanup from
/// `Constructed` is a legal no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Constructed,
    Initialized,
    CleanedUp,
}

struct StepNode {
    id: String,
    step: Arc<Mutex<dyn Step>>,
    input: Option<ChunkQueue<Message>>,
    worker: Option<WorkerHandle>,
    outputs: Outputs,
    state: NodeState,
}

/// Shared settings applied to every step the pipeline creates.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Template for each step's input queue; the priority field is overridden
    /// by [`Step::input_priority`].
    pub queue: QueueConfig,
    /// Reporter receiving per-item handler failures.
    pub reporter: Arc<dyn ErrorReporter>,
    /// Shared runtime for async handlers; workers without one build a private
    /// current-thread runtime on demand.
    pub runtime: Option<tokio::runtime::Handle>,
    /// Optional lifecycle event stream.
    pub event_tx: Option<crossbeam_channel::Sender<PipelineEvent>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            reporter: Arc::new(TracingReporter),
            runtime: None,
            event_tx: None,
        }
    }
}

/// An ordered collection of steps plus their connection graph.
pub struct Pipeline {
    name: String,
    config: PipelineConfig,
    nodes: Vec<StepNode>,
    index: HashMap<String, usize>,
    running: bool,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, PipelineConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            name: name.into(),
            config,
            nodes: Vec::new(),
            index: HashMap::new(),
            running: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Registers a step under a unique identifier.
    ///
    /// If the step consumes input, its queue and worker are created now; the
    /// worker idles until traffic arrives after `run()`.
    pub fn add_step(&mut self, id: &str, step: impl Step) -> Result<()> {
        self.ensure_not_running()?;
        if self.index.contains_key(id) {
            return Err(VoxflowError::DuplicateStepId { id: id.to_string() });
        }

        let outputs = Outputs::new(id);
        let has_input = step.has_input();
        let priority = step.input_priority();
        let step: Arc<Mutex<dyn Step>> = Arc::new(Mutex::new(step));

        let (input, worker) = if has_input {
            let queue: ChunkQueue<Message> = ChunkQueue::new(QueueConfig {
                priority,
                ..self.config.queue.clone()
            });
            let handler = {
                let step = Arc::clone(&step);
                let outputs = outputs.clone();
                Handler::sync(move |message: Message| {
                    let mut step = step.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    step.handle(message, &outputs)
                })
            };
            let worker = spawn_worker(
                id,
                queue.clone(),
                handler,
                Arc::clone(&self.config.reporter),
                self.config.runtime.clone(),
            )?;
            (Some(queue), Some(worker))
        } else {
            (None, None)
        };

        self.index.insert(id.to_string(), self.nodes.len());
        self.nodes.push(StepNode {
            id: id.to_string(),
            step,
            input,
            worker,
            outputs,
            state: NodeState::Constructed,
        });
        Ok(())
    }

    /// Wires `from`'s default output to `to`'s input queue.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<()> {
        self.ensure_not_running()?;
        let from_idx = self.node_index(from)?;
        let to_queue = self.input_queue_of(to)?;
        self.nodes[from_idx].outputs.set_default(to, to_queue);
        Ok(())
    }

    /// Registers multiple fan-out destinations on `from`. Each emitted item
    /// is delivered independently to every destination.
    ///
    /// All ids are resolved before any wiring mutates, so a bad id leaves the
    /// graph untouched.
    pub fn connect_fanout(&mut self, from: &str, to: &[&str]) -> Result<()> {
        self.ensure_not_running()?;
        let from_idx = self.node_index(from)?;
        let mut targets = Vec::with_capacity(to.len());
        for id in to {
            targets.push((*id, self.input_queue_of(id)?));
        }
        for (id, queue) in targets {
            self.nodes[from_idx].outputs.add_fanout(id, queue);
        }
        Ok(())
    }

    /// Convenience for paired request/response steps: `a`→`b` and `b`→`a`.
    pub fn connect_bidirectional(&mut self, a: &str, b: &str) -> Result<()> {
        self.connect(a, b)?;
        self.connect(b, a)
    }

    /// Returns a handle to a step's input queue, for external producers
    /// (transport callbacks, tests) that feed the pipeline.
    pub fn input_queue(&self, id: &str) -> Result<ChunkQueue<Message>> {
        self.input_queue_of(id)
    }

    /// Initializes every step in registration order.
    ///
    /// Aborts on the first failure: already-initialized steps are rolled back
    /// via `cleanup()` in reverse order and the error is returned.
    pub fn run(&mut self) -> Result<()> {
        self.ensure_not_running()?;

        for i in 0..self.nodes.len() {
            let outputs = self.nodes[i].outputs.clone();
            let id = self.nodes[i].id.clone();
            let init_result = {
                let mut step = self.nodes[i]
                    .step
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                step.init(&outputs)
            };

            match init_result {
                Ok(()) => {
                    self.nodes[i].state = NodeState::Initialized;
                    self.emit_event(PipelineEvent::StepInitialized { id });
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::error!(pipeline = %self.name, step = %id, error = %message, "init failed, rolling back");
                    self.emit_event(PipelineEvent::StepInitFailed {
                        id: id.clone(),
                        message: message.clone(),
                    });
                    self.teardown_nodes();
                    return Err(VoxflowError::StepInitFailed { id, message });
                }
            }
        }

        for node in &self.nodes {
            if node.outputs.is_unwired() {
                tracing::debug!(pipeline = %self.name, step = %node.id, "step has no output wiring");
            }
        }

        self.running = true;
        self.emit_event(PipelineEvent::Started);
        tracing::info!(pipeline = %self.name, steps = self.nodes.len(), "pipeline running");
        Ok(())
    }

    /// Cleans up every step in reverse registration order.
    ///
    /// Individual cleanup failures are logged and never abort the sweep.
    /// Idempotent; legal to call even if `run()` never succeeded.
    pub fn shutdown(&mut self) {
        self.teardown_nodes();
        self.running = false;
        self.emit_event(PipelineEvent::ShutdownComplete);
    }

    fn teardown_nodes(&mut self) {
        for i in (0..self.nodes.len()).rev() {
            if self.nodes[i].state == NodeState::CleanedUp {
                continue;
            }

            // Stop dispatch first so cleanup never races an in-flight handler.
            if let Some(queue) = &self.nodes[i].input {
                queue.stop();
            }
            if let Some(worker) = self.nodes[i].worker.take()
                && let Err(e) = worker.join()
            {
                tracing::error!(pipeline = %self.name, step = %self.nodes[i].id, "{e}");
            }

            let step = Arc::clone(&self.nodes[i].step);
            let cleanup = catch_unwind(AssertUnwindSafe(|| {
                step.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .cleanup();
            }));
            if cleanup.is_err() {
                tracing::error!(pipeline = %self.name, step = %self.nodes[i].id, "cleanup panicked");
            }

            self.nodes[i].state = NodeState::CleanedUp;
            self.emit_event(PipelineEvent::StepCleaned {
                id: self.nodes[i].id.clone(),
            });
        }
    }

    fn ensure_not_running(&self) -> Result<()> {
        if self.running {
            return Err(VoxflowError::PipelineAlreadyRunning {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    fn node_index(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| VoxflowError::UnknownStepId { id: id.to_string() })
    }

    fn input_queue_of(&self, id: &str) -> Result<ChunkQueue<Message>> {
        let idx = self.node_index(id)?;
        self.nodes[idx]
            .input
            .clone()
            .ok_or_else(|| VoxflowError::StepHasNoInput { id: id.to_string() })
    }

    fn emit_event(&self, event: PipelineEvent) {
        if let Some(tx) = &self.config.event_tx {
            let _ = tx.try_send(event);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Workers exist from add_step on, so an abandoned pipeline must be
        // torn down even if run() was never called.
        self.teardown_nodes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ControlSignal, MessageKind};
    use crate::step::StepError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Step that records every message it receives.
    struct Collector {
        name: String,
        received: Arc<Mutex<Vec<Message>>>,
        cleaned: Arc<AtomicBool>,
    }

    impl Collector {
        fn new(name: &str) -> (Self, Arc<Mutex<Vec<Message>>>, Arc<AtomicBool>) {
            let received = Arc::new(Mutex::new(Vec::new()));
            let cleaned = Arc::new(AtomicBool::new(false));
            (
                Self {
                    name: name.to_string(),
                    received: received.clone(),
                    cleaned: cleaned.clone(),
                },
                received,
                cleaned,
            )
        }
    }

    impl Step for Collector {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle(&mut self, message: Message, _outputs: &Outputs) -> std::result::Result<(), StepError> {
            self.received.lock().expect("received lock").push(message);
            Ok(())
        }

        fn cleanup(&mut self) {
            self.cleaned.store(true, Ordering::SeqCst);
        }
    }

    /// Pass-through step that forwards everything downstream.
    struct Relay {
        name: String,
    }

    impl Step for Relay {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle(&mut self, message: Message, outputs: &Outputs) -> std::result::Result<(), StepError> {
            outputs.emit(message);
            Ok(())
        }
    }

    /// Step whose init fails.
    struct FailingInit {
        cleaned: Arc<AtomicBool>,
    }

    impl Step for FailingInit {
        fn name(&self) -> &str {
            "failing-init"
        }

        fn init(&mut self, _outputs: &Outputs) -> Result<()> {
            Err(VoxflowError::Step {
                message: "no backend available".to_string(),
            })
        }

        fn handle(&mut self, _message: Message, _outputs: &Outputs) -> std::result::Result<(), StepError> {
            Ok(())
        }

        fn cleanup(&mut self) {
            self.cleaned.store(true, Ordering::SeqCst);
        }
    }

    fn wait_for<F: FnMut() -> bool>(mut done: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            queue: QueueConfig {
                poll_interval: Duration::from_millis(10),
                stop_grace: Duration::from_millis(10),
                ..QueueConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        let mut pipeline = Pipeline::new("test");
        let (a, _, _) = Collector::new("a");
        let (b, _, _) = Collector::new("b");
        pipeline.add_step("x", a).expect("first add");
        let err = pipeline.add_step("x", b).expect_err("duplicate id");
        assert!(matches!(err, VoxflowError::DuplicateStepId { .. }));
    }

    #[test]
    fn test_connect_unknown_id_fails_without_crash() {
        let mut pipeline = Pipeline::new("test");
        let (a, _, _) = Collector::new("a");
        pipeline.add_step("a", a).expect("add");
        assert!(matches!(
            pipeline.connect("a", "ghost"),
            Err(VoxflowError::UnknownStepId { .. })
        ));
        assert!(matches!(
            pipeline.connect("ghost", "a"),
            Err(VoxflowError::UnknownStepId { .. })
        ));
    }

    #[test]
    fn test_message_flows_through_connection() {
        let mut pipeline = Pipeline::with_config("flow", fast_config());
        pipeline
            .add_step("relay", Relay { name: "relay".to_string() })
            .expect("add relay");
        let (sink, received, _) = Collector::new("sink");
        pipeline.add_step("sink", sink).expect("add sink");
        pipeline.connect("relay", "sink").expect("connect");
        pipeline.run().expect("run");

        let entry = pipeline.input_queue("relay").expect("input");
        entry.enqueue(Message::text("ping").with_session("s1"));

        assert!(wait_for(|| received.lock().expect("lock").len() == 1));
        let got = received.lock().expect("lock");
        assert_eq!(got[0].as_text(), Some("ping"));
        assert_eq!(got[0].session_id(), Some("s1"));
        drop(got);

        pipeline.shutdown();
    }

    #[test]
    fn test_wiring_rejected_after_run() {
        let mut pipeline = Pipeline::with_config("frozen", fast_config());
        let (a, _, _) = Collector::new("a");
        let (b, _, _) = Collector::new("b");
        pipeline.add_step("a", a).expect("add a");
        pipeline.add_step("b", b).expect("add b");
        pipeline.run().expect("run");

        assert!(matches!(
            pipeline.connect("a", "b"),
            Err(VoxflowError::PipelineAlreadyRunning { .. })
        ));
        assert!(matches!(
            pipeline.connect_fanout("a", &["b"]),
            Err(VoxflowError::PipelineAlreadyRunning { .. })
        ));

        pipeline.shutdown();
    }

    #[test]
    fn test_init_failure_rolls_back_initialized_steps() {
        let mut pipeline = Pipeline::with_config("rollback", fast_config());
        let (first, _, first_cleaned) = Collector::new("first");
        pipeline.add_step("first", first).expect("add first");
        let failing_cleaned = Arc::new(AtomicBool::new(false));
        pipeline
            .add_step(
                "failing",
                FailingInit {
                    cleaned: failing_cleaned.clone(),
                },
            )
            .expect("add failing");

        let err = pipeline.run().expect_err("run must fail");
        assert!(matches!(err, VoxflowError::StepInitFailed { ref id, .. } if id == "failing"));
        assert!(!pipeline.is_running());
        // The successfully initialized step was rolled back
        assert!(first_cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_reverse_order_and_idempotent() {
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Ordered {
            name: String,
            order: Arc<Mutex<Vec<String>>>,
        }
        impl Step for Ordered {
            fn name(&self) -> &str {
                &self.name
            }
            fn handle(&mut self, _m: Message, _o: &Outputs) -> std::result::Result<(), StepError> {
                Ok(())
            }
            fn cleanup(&mut self) {
                self.order.lock().expect("order lock").push(self.name.clone());
            }
        }

        let mut pipeline = Pipeline::with_config("ordered", fast_config());
        for id in ["one", "two", "three"] {
            pipeline
                .add_step(
                    id,
                    Ordered {
                        name: id.to_string(),
                        order: order.clone(),
                    },
                )
                .expect("add");
        }
        pipeline.run().expect("run");
        pipeline.shutdown();
        pipeline.shutdown();

        let cleaned = order.lock().expect("order lock");
        assert_eq!(*cleaned, vec!["three", "two", "one"]);
    }

    #[test]
    fn test_drop_without_run_stops_workers() {
        let (sink, received, _) = Collector::new("sink");
        let entry = {
            let mut pipeline = Pipeline::with_config("abandoned", fast_config());
            pipeline.add_step("sink", sink).expect("add");
            pipeline.input_queue("sink").expect("input")
        };

        // Dropping the pipeline stopped and joined the worker even though
        // run() was never called
        assert!(!entry.is_running());
        entry.enqueue(Message::text("ghost"));
        std::thread::sleep(Duration::from_millis(50));
        assert!(received.lock().expect("lock").is_empty());
    }

    #[test]
    fn test_cleanup_from_constructed_is_safe() {
        let mut pipeline = Pipeline::new("never-ran");
        let (a, _, cleaned) = Collector::new("a");
        pipeline.add_step("a", a).expect("add");
        // run() never called
        pipeline.shutdown();
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cleanup_panic_does_not_abort_sweep() {
        struct PanickyCleanup;
        impl Step for PanickyCleanup {
            fn name(&self) -> &str {
                "panicky"
            }
            fn handle(&mut self, _m: Message, _o: &Outputs) -> std::result::Result<(), StepError> {
                Ok(())
            }
            fn cleanup(&mut self) {
                panic!("cleanup exploded");
            }
        }

        let mut pipeline = Pipeline::with_config("sweep", fast_config());
        let (survivor, _, survivor_cleaned) = Collector::new("survivor");
        pipeline.add_step("survivor", survivor).expect("add");
        pipeline.add_step("panicky", PanickyCleanup).expect("add");
        pipeline.run().expect("run");
        pipeline.shutdown();

        assert!(survivor_cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_bidirectional_wiring() {
        let mut pipeline = Pipeline::with_config("bidi", fast_config());

        /// Replies "pong" to every "ping".
        struct Responder;
        impl Step for Responder {
            fn name(&self) -> &str {
                "responder"
            }
            fn handle(&mut self, message: Message, outputs: &Outputs) -> std::result::Result<(), StepError> {
                if message.as_text() == Some("ping") {
                    outputs.emit(Message::text("pong"));
                }
                Ok(())
            }
        }

        struct Requester {
            received: Arc<Mutex<Vec<Message>>>,
        }
        impl Step for Requester {
            fn name(&self) -> &str {
                "requester"
            }
            fn init(&mut self, outputs: &Outputs) -> Result<()> {
                outputs.emit(Message::text("ping"));
                Ok(())
            }
            fn handle(&mut self, message: Message, _outputs: &Outputs) -> std::result::Result<(), StepError> {
                self.received.lock().expect("lock").push(message);
                Ok(())
            }
        }

        let responses = Arc::new(Mutex::new(Vec::new()));
        pipeline
            .add_step(
                "requester",
                Requester {
                    received: responses.clone(),
                },
            )
            .expect("add requester");
        pipeline.add_step("responder", Responder).expect("add responder");
        pipeline
            .connect_bidirectional("requester", "responder")
            .expect("wire");
        pipeline.run().expect("run");

        assert!(wait_for(|| responses.lock().expect("lock").len() == 1));
        assert_eq!(responses.lock().expect("lock")[0].as_text(), Some("pong"));

        pipeline.shutdown();
    }

    #[test]
    fn test_events_stream_lifecycle() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut config = fast_config();
        config.event_tx = Some(tx);

        let mut pipeline = Pipeline::with_config("events", config);
        let (a, _, _) = Collector::new("a");
        pipeline.add_step("a", a).expect("add");
        pipeline.run().expect("run");
        pipeline.shutdown();

        let events: Vec<PipelineEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                PipelineEvent::StepInitialized { id: "a".to_string() },
                PipelineEvent::Started,
                PipelineEvent::StepCleaned { id: "a".to_string() },
                PipelineEvent::ShutdownComplete,
            ]
        );
    }

    #[test]
    fn test_handler_error_counts_are_isolated_per_step() {
        struct CountingReporter {
            count: Arc<AtomicUsize>,
        }
        impl ErrorReporter for CountingReporter {
            fn report(&self, _step: &str, _error: &StepError) {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }

        struct Flaky;
        impl Step for Flaky {
            fn name(&self) -> &str {
                "flaky"
            }
            fn handle(&mut self, message: Message, _o: &Outputs) -> std::result::Result<(), StepError> {
                if message.kind == MessageKind::Control {
                    return Err(StepError::Recoverable("refusing control".to_string()));
                }
                Ok(())
            }
        }

        let errors = Arc::new(AtomicUsize::new(0));
        let mut config = fast_config();
        config.reporter = Arc::new(CountingReporter {
            count: errors.clone(),
        });

        let mut pipeline = Pipeline::with_config("isolated", config);
        pipeline.add_step("flaky", Flaky).expect("add");
        pipeline.run().expect("run");

        let entry = pipeline.input_queue("flaky").expect("input");
        entry.enqueue(Message::control(ControlSignal::Reset));
        entry.enqueue(Message::text("fine"));

        assert!(wait_for(|| errors.load(Ordering::SeqCst) == 1));
        pipeline.shutdown();
    }
}
