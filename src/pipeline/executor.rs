//! Pipeline executor: component registry, lifecycle and the run coordinator.
//!
//! A [`Pipeline`] owns its inputs, converters and outputs and moves through
//! a small state machine:
//!
//! ```text
//! Constructing ─► Constructed ─configure─► Configured ─init─► Initialized
//!                      ▲                      ▲   ▲               │
//!                      └──── add / remove ────┘   └── run / close ─┘
//! ```
//!
//! Topology changes are only accepted while no run can be active
//! (`Constructed` or `Configured`) and send the pipeline back to
//! `Constructed`. [`Pipeline::run`] starts the Input and Output threads,
//! supervises them by polling, closes every component afterwards and
//! returns to `Configured`.

use crate::components::{ScriptConverter, StreamInput, StreamOutput};
use crate::config::{AppConfig, PipelineSettings};
use crate::pipeline::component::{
    AnyComponent, Component, ComponentKind, Converter, Input, Output, Slot, SlotStatus,
};
use crate::pipeline::converter_engine::ConverterEngine;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::feedback::{Feedback, FeedbackSnapshot};
use crate::pipeline::id::ComponentId;
use crate::pipeline::queue::RecordQueue;
use crate::pipeline::schedule::WorkerSignal;
use crate::pipeline::worker::{run_input, run_output, RunContext, RunControl};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ScopedJoinHandle;
use std::time::{Duration, Instant};

/// Lifecycle state of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Constructing,
    Constructed,
    Configured,
    Initialized,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Read-only view of one registered component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub kind: ComponentKind,
    pub name: String,
    pub status: SlotStatus,
}

/// Cancels a running pipeline from another thread.
#[derive(Clone)]
pub struct AbortHandle {
    control: Arc<RunControl>,
    queue: Arc<RecordQueue>,
    running: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Stop the input, close the queue and wake the output. Returns at once;
    /// an output write already in progress is allowed to finish.
    pub fn abort(&self) {
        tracing::info!("Aborting pipeline run");
        self.control.input.stop();
        self.queue.close();
        self.control.output.stop();
    }

    /// [`abort`](Self::abort), then wait up to `timeout` for the run to end.
    /// Returns whether it ended.
    pub fn abort_and_wait(&self, timeout: Duration) -> bool {
        self.abort();
        let deadline = Instant::now() + timeout;
        while self.is_running() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// The record pipeline.
pub struct Pipeline {
    state: PipelineState,
    next_id: u32,
    inputs: Vec<Slot<dyn Input>>,
    engine: ConverterEngine,
    outputs: Vec<Slot<dyn Output>>,
    queue: Arc<RecordQueue>,
    feedback: Arc<Feedback>,
    control: Arc<RunControl>,
    running: Arc<AtomicBool>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        let mut pipeline = Self {
            state: PipelineState::Constructing,
            next_id: 0,
            inputs: Vec::new(),
            engine: ConverterEngine::new(),
            outputs: Vec::new(),
            queue: Arc::new(
                RecordQueue::with_capacity(settings.queue_initial_capacity())
                    .with_poll_interval(settings.output_poll()),
            ),
            feedback: Arc::new(Feedback::new()),
            control: Arc::new(RunControl::new()),
            running: Arc::new(AtomicBool::new(false)),
            settings,
        };
        pipeline.state = PipelineState::Constructed;
        pipeline
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Live statistics of the current or last run.
    pub fn feedback(&self) -> &Feedback {
        &self.feedback
    }

    /// Shared handle to the statistics, readable while a run is active.
    pub fn feedback_handle(&self) -> Arc<Feedback> {
        Arc::clone(&self.feedback)
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            control: Arc::clone(&self.control),
            queue: Arc::clone(&self.queue),
            running: Arc::clone(&self.running),
        }
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[PipelineState],
    ) -> PipelineResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PipelineError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn begin_topology_change(&mut self, operation: &'static str) -> PipelineResult<ComponentId> {
        self.expect_state(
            operation,
            &[PipelineState::Constructed, PipelineState::Configured],
        )?;
        self.state = PipelineState::Constructed;
        Ok(ComponentId::next(&mut self.next_id))
    }

    // ── Topology ──

    pub fn add_input(&mut self, input: Box<dyn Input>) -> PipelineResult<ComponentId> {
        let id = self.begin_topology_change("add_input")?;
        tracing::debug!(component = %id, name = input.name(), "Added input");
        self.inputs.push(Slot::new(id, input));
        Ok(id)
    }

    pub fn add_converter(&mut self, converter: Box<dyn Converter>) -> PipelineResult<ComponentId> {
        let id = self.begin_topology_change("add_converter")?;
        tracing::debug!(component = %id, name = converter.name(), "Added converter");
        self.engine.add(id, converter);
        Ok(id)
    }

    pub fn add_output(&mut self, output: Box<dyn Output>) -> PipelineResult<ComponentId> {
        let id = self.begin_topology_change("add_output")?;
        tracing::debug!(component = %id, name = output.name(), "Added output");
        self.outputs.push(Slot::new(id, output));
        Ok(id)
    }

    /// Register a component of any kind.
    pub fn add(&mut self, component: AnyComponent) -> PipelineResult<ComponentId> {
        match component {
            AnyComponent::Input(c) => self.add_input(c),
            AnyComponent::Converter(c) => self.add_converter(c),
            AnyComponent::Output(c) => self.add_output(c),
        }
    }

    /// Unregister a component and hand it back.
    pub fn remove(&mut self, id: ComponentId) -> PipelineResult<AnyComponent> {
        self.expect_state(
            "remove",
            &[PipelineState::Constructed, PipelineState::Configured],
        )?;
        let removed = if let Some(idx) = self.inputs.iter().position(|s| s.id == id) {
            AnyComponent::Input(self.inputs.remove(idx).component)
        } else if let Some(c) = self.engine.remove(id) {
            AnyComponent::Converter(c)
        } else if let Some(idx) = self.outputs.iter().position(|s| s.id == id) {
            AnyComponent::Output(self.outputs.remove(idx).component)
        } else {
            return Err(PipelineError::UnknownComponent(id));
        };
        tracing::debug!(component = %id, kind = %removed.kind(), "Removed component");
        self.state = PipelineState::Constructed;
        Ok(removed)
    }

    /// All registered components in registration order per kind.
    pub fn components(&self) -> Vec<ComponentInfo> {
        fn info<C: Component + ?Sized>(
            kind: ComponentKind,
            slot: &Slot<C>,
        ) -> ComponentInfo {
            ComponentInfo {
                id: slot.id,
                kind,
                name: slot.name().to_string(),
                status: slot.status.clone(),
            }
        }
        let inputs = self.inputs.iter().map(|s| info(ComponentKind::Input, s));
        let converters = self
            .engine
            .slots()
            .iter()
            .map(|s| info(ComponentKind::Converter, s));
        let outputs = self.outputs.iter().map(|s| info(ComponentKind::Output, s));
        inputs.chain(converters).chain(outputs).collect()
    }

    // ── Lifecycle ──

    /// Run every component's `configure`. Components that fail are excluded
    /// from runs until the next successful `configure`.
    pub fn configure(&mut self) -> PipelineResult<()> {
        self.expect_state(
            "configure",
            &[PipelineState::Constructed, PipelineState::Configured],
        )?;
        self.inputs.iter_mut().for_each(Slot::configure);
        self.engine.slots_mut().iter_mut().for_each(Slot::configure);
        self.outputs.iter_mut().for_each(Slot::configure);
        self.state = PipelineState::Configured;
        tracing::info!(
            inputs = self.inputs.len(),
            converters = self.engine.len(),
            outputs = self.outputs.len(),
            "Pipeline configured"
        );
        Ok(())
    }

    /// Open every configured component. Failures mark the component failed
    /// for the coming run.
    pub fn init(&mut self) -> PipelineResult<()> {
        self.expect_state("init", &[PipelineState::Configured])?;
        let mut failed = 0;
        for result in self
            .inputs
            .iter_mut()
            .map(Slot::init)
            .chain(self.engine.slots_mut().iter_mut().map(Slot::init))
            .chain(self.outputs.iter_mut().map(Slot::init))
        {
            if result.is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::warn!(failed, "Some components failed to initialize");
        }
        self.state = PipelineState::Initialized;
        Ok(())
    }

    /// Release every component still open. Only valid between runs.
    pub fn close(&mut self) -> PipelineResult<()> {
        self.expect_state("close", &[PipelineState::Initialized])?;
        if self.is_running() {
            return Err(PipelineError::InvalidState {
                operation: "close",
                state: self.state,
            });
        }
        self.shutdown_components();
        self.state = PipelineState::Configured;
        Ok(())
    }

    fn shutdown_components(&mut self) {
        self.inputs.iter_mut().for_each(Slot::shutdown);
        self.engine.slots_mut().iter_mut().for_each(Slot::shutdown);
        self.outputs.iter_mut().for_each(Slot::shutdown);
    }

    /// Configure if needed, initialize and run to completion.
    pub fn execute(&mut self) -> PipelineResult<FeedbackSnapshot> {
        if self.state == PipelineState::Constructed {
            self.configure()?;
        }
        if self.state == PipelineState::Configured {
            self.init()?;
        }
        self.run()
    }

    /// Run the Input and Output threads until every input is exhausted and
    /// the queue is drained, or until aborted. Closes all components and
    /// returns to `Configured` afterwards, also when a worker failed.
    pub fn run(&mut self) -> PipelineResult<FeedbackSnapshot> {
        self.expect_state("run", &[PipelineState::Initialized])?;

        self.queue.reset_cache();
        self.control.reset();
        self.feedback.started();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            inputs = self.inputs.len(),
            converters = self.engine.active_count(),
            outputs = self.outputs.len(),
            "Pipeline run started"
        );

        let ctx = RunContext {
            queue: &self.queue,
            feedback: &self.feedback,
            control: &self.control,
            settings: &self.settings,
            started: Instant::now(),
        };
        let result = run_workers(&mut self.inputs, &mut self.engine, &mut self.outputs, &ctx);

        self.feedback.stopped();
        self.shutdown_components();
        self.state = PipelineState::Configured;
        self.running.store(false, Ordering::SeqCst);

        let snapshot = self.feedback.snapshot();
        tracing::info!(
            read = snapshot.read,
            written = snapshot.written,
            dropped = snapshot.dropped,
            permanent_errors = snapshot.permanent_error_count,
            "Pipeline run finished"
        );
        result.map(|()| snapshot)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.state == PipelineState::Initialized {
            self.shutdown_components();
        }
    }
}

/// Closes the queue and stops the peer worker when the owning worker
/// returns an error or unwinds.
struct PeerStop<'a> {
    peer: &'a WorkerSignal,
    queue: &'a RecordQueue,
    failed: bool,
}

impl Drop for PeerStop<'_> {
    fn drop(&mut self) {
        if self.failed || std::thread::panicking() {
            self.queue.close();
            self.peer.stop();
        }
    }
}

fn run_workers(
    inputs: &mut [Slot<dyn Input>],
    engine: &mut ConverterEngine,
    outputs: &mut [Slot<dyn Output>],
    ctx: &RunContext<'_>,
) -> PipelineResult<()> {
    std::thread::scope(|scope| {
        let input = std::thread::Builder::new()
            .name("datapipe-input".to_string())
            .spawn_scoped(scope, move || {
                let mut stop = PeerStop {
                    peer: &ctx.control.output,
                    queue: ctx.queue,
                    failed: false,
                };
                let result = run_input(inputs, engine, ctx);
                stop.failed = result.is_err();
                result
            })?;

        let output = match std::thread::Builder::new()
            .name("datapipe-output".to_string())
            .spawn_scoped(scope, move || {
                let mut stop = PeerStop {
                    peer: &ctx.control.input,
                    queue: ctx.queue,
                    failed: false,
                };
                let result = run_output(outputs, ctx);
                stop.failed = result.is_err();
                result
            }) {
            Ok(handle) => handle,
            Err(e) => {
                ctx.control.input.stop();
                ctx.queue.close();
                return Err(PipelineError::Spawn(e));
            }
        };

        supervise(&input, &output, ctx);

        let mut errors: Vec<PipelineError> = [
            join_worker("Input", input, ctx.feedback),
            join_worker("Output", output, ctx.feedback),
        ]
        .into_iter()
        .flatten()
        .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(PipelineError::AllWorkersFailed(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    })
}

/// Poll both workers until they have finished. When the output side ends
/// first the input is stopped, since nothing would consume its records.
fn supervise(
    input: &ScopedJoinHandle<'_, PipelineResult<()>>,
    output: &ScopedJoinHandle<'_, PipelineResult<()>>,
    ctx: &RunContext<'_>,
) {
    let poll = ctx.settings.output_poll();
    let mut input_stopped = false;
    loop {
        match (input.is_finished(), output.is_finished()) {
            (true, true) => return,
            (false, true) if !input_stopped => {
                tracing::warn!("Output thread ended before input, stopping input");
                ctx.control.input.stop();
                ctx.queue.close();
                input_stopped = true;
            }
            (true, false) => ctx.queue.close(),
            _ => {}
        }
        std::thread::sleep(poll);
    }
}

fn join_worker(
    thread: &'static str,
    handle: ScopedJoinHandle<'_, PipelineResult<()>>,
    feedback: &Feedback,
) -> Option<PipelineError> {
    let message = match handle.join() {
        Ok(Ok(())) => return None,
        Ok(Err(e)) => e.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };
    tracing::error!("{} thread failed: {}", thread, message);
    feedback.add_permanent_error(format!("{} thread: {}", thread, message));
    Some(PipelineError::WorkerFailed { thread, message })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Builds a [`Pipeline`] from an [`AppConfig`].
pub struct PipelineBuilder {
    config: AppConfig,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Create the configured stream inputs, script converters and stream
    /// outputs, in file order.
    pub fn build(self) -> crate::error::Result<Pipeline> {
        self.config.validate()?;
        let mut pipeline = Pipeline::new(self.config.pipeline);
        for endpoint in &self.config.inputs {
            pipeline.add_input(Box::new(StreamInput::from_endpoint(endpoint)))?;
        }
        for converter in &self.config.converters {
            pipeline.add_converter(Box::new(ScriptConverter::from_config(converter)))?;
        }
        for endpoint in &self.config.outputs {
            pipeline.add_output(Box::new(StreamOutput::from_endpoint(endpoint)))?;
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{CollectingOutput, VecInput};
    use crate::data::{Record, Value};
    use crate::pipeline::component::ReadOutcome;
    use crate::pipeline::error::{ComponentError, ComponentResult};

    fn rec(n: i64) -> Record {
        Record::new(vec![Value::Int64(n)]).unwrap()
    }

    fn settings() -> PipelineSettings {
        PipelineSettings::default()
            .with(crate::config::OUTPUT_POLL_MS, 5)
            .unwrap()
    }

    struct Doubler;

    impl Component for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }
    }

    impl Converter for Doubler {
        fn can_handle(&self, record: &Record) -> bool {
            record.len() == 1
        }

        fn convert(&mut self, record: &Record) -> ComponentResult<Vec<Record>> {
            Ok(vec![record.clone(), record.clone()]
                .into_iter()
                .map(|r| Record::new(vec![r.values()[0].clone(), Value::Int8(0)]).unwrap())
                .collect())
        }
    }

    struct Panicking;

    impl Component for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
    }

    impl Input for Panicking {
        fn read_data(&mut self) -> ComponentResult<ReadOutcome> {
            panic!("input exploded")
        }
    }

    struct BadConfig;

    impl Component for BadConfig {
        fn name(&self) -> &str {
            "bad-config"
        }

        fn configure(&mut self) -> ComponentResult<()> {
            Err(ComponentError::permanent("missing setting"))
        }
    }

    impl Input for BadConfig {
        fn read_data(&mut self) -> ComponentResult<ReadOutcome> {
            Ok(ReadOutcome::Record(rec(-1)))
        }
    }

    #[test]
    fn test_state_machine() {
        let mut p = Pipeline::new(settings());
        assert_eq!(p.state(), PipelineState::Constructed);
        assert!(matches!(
            p.run(),
            Err(PipelineError::InvalidState { operation: "run", .. })
        ));
        assert!(p.init().is_err());

        p.configure().unwrap();
        assert_eq!(p.state(), PipelineState::Configured);
        p.init().unwrap();
        assert_eq!(p.state(), PipelineState::Initialized);
        assert!(p.add_output(Box::new(CollectingOutput::new())).is_err());
        assert!(p.configure().is_err());

        p.close().unwrap();
        assert_eq!(p.state(), PipelineState::Configured);
        p.add_output(Box::new(CollectingOutput::new())).unwrap();
        assert_eq!(p.state(), PipelineState::Constructed);
    }

    #[test]
    fn test_run_through_converter() {
        let mut p = Pipeline::new(settings());
        let sink = CollectingOutput::new();
        p.add_input(Box::new(VecInput::new(vec![rec(1), rec(2)]))).unwrap();
        p.add_converter(Box::new(Doubler)).unwrap();
        p.add_output(Box::new(sink.clone())).unwrap();

        let snap = p.execute().unwrap();
        assert_eq!(snap.read, 2);
        assert_eq!(snap.converted, 4);
        assert_eq!(snap.written, 4);
        assert_eq!(sink.len(), 4);
        assert_eq!(p.state(), PipelineState::Configured);
        assert!(!p.is_running());
    }

    #[test]
    fn test_rerun_resets_feedback() {
        let mut p = Pipeline::new(settings());
        let sink = CollectingOutput::new();
        p.add_input(Box::new(VecInput::new(vec![rec(1)]))).unwrap();
        p.add_output(Box::new(sink.clone())).unwrap();
        p.execute().unwrap();
        let second = p.execute().unwrap();
        // VecInput replays its records on every init
        assert_eq!(second.read, 1);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_unconfigured_component_is_skipped() {
        let mut p = Pipeline::new(settings());
        let sink = CollectingOutput::new();
        p.add_input(Box::new(BadConfig)).unwrap();
        p.add_input(Box::new(VecInput::new(vec![rec(7)]))).unwrap();
        p.add_output(Box::new(sink.clone())).unwrap();
        let snap = p.execute().unwrap();
        assert_eq!(snap.read, 1);
        assert_eq!(sink.records(), vec![rec(7)]);
        assert!(matches!(
            p.components()[0].status,
            SlotStatus::Unconfigured(_)
        ));
    }

    struct BadInit;

    impl Component for BadInit {
        fn name(&self) -> &str {
            "bad-init"
        }

        fn init(&mut self) -> ComponentResult<()> {
            Err(ComponentError::permanent("device busy"))
        }
    }

    impl Input for BadInit {
        fn read_data(&mut self) -> ComponentResult<ReadOutcome> {
            Ok(ReadOutcome::Record(rec(-1)))
        }
    }

    #[test]
    fn test_init_failure_marks_component_failed() {
        let mut p = Pipeline::new(settings());
        let sink = CollectingOutput::new();
        p.add_input(Box::new(BadInit)).unwrap();
        p.add_input(Box::new(VecInput::new(vec![rec(3)]))).unwrap();
        p.add_output(Box::new(sink.clone())).unwrap();

        p.configure().unwrap();
        p.init().unwrap();
        assert_eq!(
            p.components()[0].status,
            SlotStatus::Failed("device busy".to_string())
        );

        let snap = p.run().unwrap();
        assert_eq!(snap.read, 1);
        assert_eq!(sink.records(), vec![rec(3)]);
    }

    #[test]
    fn test_remove_component() {
        let mut p = Pipeline::new(settings());
        let id = p.add_converter(Box::new(Doubler)).unwrap();
        let removed = p.remove(id).unwrap();
        assert_eq!(removed.kind(), ComponentKind::Converter);
        assert!(matches!(
            p.remove(id),
            Err(PipelineError::UnknownComponent(_))
        ));
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let mut p = Pipeline::new(settings());
        p.add_input(Box::new(Panicking)).unwrap();
        p.add_output(Box::new(CollectingOutput::new())).unwrap();
        let err = p.execute().unwrap_err();
        assert!(matches!(err, PipelineError::WorkerFailed { thread: "Input", .. }));
        assert_eq!(p.feedback().permanent_error_count(), 1);
        assert_eq!(p.state(), PipelineState::Configured);
        assert!(!p.is_running());
    }

    #[test]
    fn test_abort_scheduled_run() {
        let mut p = Pipeline::new(settings());
        let sink = CollectingOutput::new();
        // due in one minute: the input sleeps until aborted
        p.add_input(Box::new(VecInput::new(vec![rec(1).with_time(60_000)])))
            .unwrap();
        p.add_output(Box::new(sink.clone())).unwrap();
        let handle = p.abort_handle();

        let aborter = std::thread::spawn(move || {
            while !handle.is_running() {
                std::thread::sleep(Duration::from_millis(1));
            }
            std::thread::sleep(Duration::from_millis(20));
            handle.abort_and_wait(Duration::from_secs(5))
        });

        let started = Instant::now();
        let snap = p.execute().unwrap();
        assert!(aborter.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(snap.read, 1);
        assert!(sink.is_empty());
    }
}
