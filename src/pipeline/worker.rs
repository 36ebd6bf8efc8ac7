//! Input and Output worker loops.
//!
//! A run uses exactly two worker threads that meet at the [`RecordQueue`]:
//!
//! - The **Input** thread pulls records from the inputs in order, expands
//!   them through the [`ConverterEngine`], holds scheduled records back until
//!   shortly before they are due and puts them on the queue.
//! - The **Output** thread takes records off the queue, waits for or reports
//!   the lateness of scheduled records and fans each record out to every
//!   usable output.
//!
//! Both loops return `Err` only for conditions that end the run; component
//! failures are handled in place and recorded in [`Feedback`].

use crate::config::PipelineSettings;
use crate::data::Record;
use crate::pipeline::component::{Input, Output, ReadOutcome, Slot};
use crate::pipeline::converter_engine::{ConverterEngine, CycleGuard};
use crate::pipeline::error::{PipelineError, PipelineResult, QueueError};
use crate::pipeline::feedback::Feedback;
use crate::pipeline::queue::{GetOutcome, PutOutcome, RecordQueue};
use crate::pipeline::schedule::{dispatch_timing, enqueue_delay, DispatchTiming, WorkerSignal};
use std::time::{Duration, Instant};

/// Stop signals for the two worker threads of a run.
#[derive(Debug, Default)]
pub struct RunControl {
    pub input: WorkerSignal,
    pub output: WorkerSignal,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.input.reset();
        self.output.reset();
    }
}

/// Everything the two workers share for one run.
pub struct RunContext<'a> {
    pub queue: &'a RecordQueue,
    pub feedback: &'a Feedback,
    pub control: &'a RunControl,
    pub settings: &'a PipelineSettings,
    pub started: Instant,
}

impl RunContext<'_> {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Body of the Input thread. Closes the queue on every exit path.
pub fn run_input(
    inputs: &mut [Slot<dyn Input>],
    engine: &mut ConverterEngine,
    ctx: &RunContext<'_>,
) -> PipelineResult<()> {
    let result = input_loop(inputs, engine, ctx);
    ctx.queue.close();
    tracing::debug!(read = ctx.feedback.read_count(), "Input thread finished");
    result
}

fn input_loop(
    inputs: &mut [Slot<dyn Input>],
    engine: &mut ConverterEngine,
    ctx: &RunContext<'_>,
) -> PipelineResult<()> {
    let mut guard = CycleGuard::new();
    let mut current = 0;

    while current < inputs.len() {
        if ctx.control.input.is_stopped() {
            tracing::debug!("Input thread stopped");
            return Ok(());
        }

        let slot = &mut inputs[current];
        if !slot.is_usable() || !slot.component.can_read_data() {
            current += 1;
            continue;
        }

        let record = match slot.component.read_data() {
            Ok(ReadOutcome::Record(record)) => record,
            Ok(ReadOutcome::EndOfInput) => {
                tracing::info!(component = %slot.id, name = slot.name(), "Input exhausted");
                current += 1;
                continue;
            }
            Err(e) if e.is_permanent() => {
                tracing::error!(component = %slot.id, name = slot.name(), "Input failed: {}", e);
                ctx.feedback
                    .add_permanent_error(format!("input {} ({}): {}", slot.id, slot.name(), e));
                slot.fail(&e);
                current += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    component = %slot.id,
                    name = slot.name(),
                    "Input skipped data: {}",
                    e
                );
                ctx.feedback
                    .add_temporary_error(format!("input {} ({}): {}", slot.id, slot.name(), e));
                continue;
            }
        };

        tracing::trace!(component = %slot.id, record = %record.summary(), "Read record");
        ctx.feedback.inc_read();
        guard.clear();
        for converted in engine.convert_record_to_list(record, &mut guard, ctx.feedback) {
            if !enqueue(converted, ctx)? {
                return Ok(());
            }
        }
    }

    tracing::info!("All inputs exhausted");
    Ok(())
}

/// Put one record on the queue, waiting for its schedule first.
/// Returns `false` when the run is being stopped.
fn enqueue(record: Record, ctx: &RunContext<'_>) -> PipelineResult<bool> {
    if let Some(scheduled) = record.scheduled_time() {
        let overhead = ctx.settings.overhead_reduction();
        if let Some(delay) = enqueue_delay(scheduled, ctx.elapsed(), overhead) {
            if ctx.control.input.sleeper().sleep(delay).is_err() && ctx.control.input.is_stopped() {
                return Ok(false);
            }
        }
    }

    let summary = record.summary();
    match ctx.queue.put(record) {
        Ok(PutOutcome::Put) => {
            tracing::trace!(record = %summary, "Queued record");
        }
        Ok(PutOutcome::Dropped) => {
            tracing::debug!(record = %summary, "Dropped lower-priority record");
            ctx.feedback.add_dropped(1);
        }
        Ok(PutOutcome::ClearedAndPut { cleared }) => {
            tracing::debug!(record = %summary, cleared, "Higher priority record cleared the queue");
            ctx.feedback.add_dropped(cleared as u64);
            if ctx.control.output.sleeper().interrupt() {
                ctx.feedback.inc_interrupted();
            }
        }
        Err(QueueError::Closed) if ctx.control.input.is_stopped() => return Ok(false),
        Err(e) => return Err(e.into()),
    }
    Ok(true)
}

/// Body of the Output thread.
pub fn run_output(outputs: &mut [Slot<dyn Output>], ctx: &RunContext<'_>) -> PipelineResult<()> {
    let poll = ctx.settings.output_poll();
    loop {
        if ctx.control.output.is_stopped() {
            tracing::debug!("Output thread stopped");
            break;
        }
        if !outputs.is_empty() && outputs.iter().all(|s| !s.is_usable()) {
            tracing::warn!("All outputs failed, output thread exiting");
            break;
        }

        let record = match ctx.queue.get_timeout(poll) {
            GetOutcome::Record(record) => record,
            GetOutcome::Timeout => continue,
            GetOutcome::EndOfStream => break,
        };

        if let Some(scheduled) = record.scheduled_time() {
            let timing = dispatch_timing(
                scheduled,
                ctx.elapsed(),
                ctx.settings.output_init_overhead(),
                ctx.settings.max_behind(),
            );
            match timing {
                DispatchTiming::Wait(wait) => {
                    if ctx.control.output.sleeper().sleep(wait).is_err() {
                        if ctx.control.output.is_stopped() {
                            break;
                        }
                        // the waker counted the interruption; the skipped record is a drop
                        tracing::debug!(
                            record = %record.summary(),
                            "Scheduled dispatch interrupted"
                        );
                        ctx.feedback.add_dropped(1);
                        continue;
                    }
                }
                DispatchTiming::Late {
                    behind,
                    significant,
                } => {
                    ctx.feedback.add_behind(behind, significant);
                    if significant {
                        tracing::warn!(
                            behind_ms = behind.as_millis() as u64,
                            record = %record.summary(),
                            "Record dispatched significantly late"
                        );
                    }
                }
            }
        }

        dispatch(outputs, &record, ctx.feedback);
    }
    tracing::debug!(written = ctx.feedback.written_count(), "Output thread finished");
    Ok(())
}

/// Hand `record` to every usable output. Returns how many accepted it.
fn dispatch(outputs: &mut [Slot<dyn Output>], record: &Record, feedback: &Feedback) -> usize {
    let mut accepted = 0;
    for slot in outputs.iter_mut().filter(|s| s.is_usable()) {
        match slot.component.write(record) {
            Ok(true) => {
                accepted += 1;
                feedback.inc_written();
            }
            Ok(false) => {}
            Err(e) if e.is_permanent() => {
                tracing::error!(component = %slot.id, name = slot.name(), "Output failed: {}", e);
                feedback.add_permanent_error(format!(
                    "output {} ({}): {}",
                    slot.id,
                    slot.name(),
                    e
                ));
                slot.fail(&e);
            }
            Err(e) => {
                tracing::warn!(
                    component = %slot.id,
                    name = slot.name(),
                    record = %record.summary(),
                    "Output skipped record: {}",
                    e
                );
                feedback.add_temporary_error(format!(
                    "output {} ({}): {}",
                    slot.id,
                    slot.name(),
                    e
                ));
            }
        }
    }

    if accepted == 0 {
        let err = PipelineError::NoSink(record.summary());
        tracing::warn!("{}", err);
        feedback.add_temporary_error(err.to_string());
    } else {
        tracing::trace!(accepted, record = %record.summary(), "Dispatched record");
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::pipeline::component::Component;
    use crate::pipeline::error::{ComponentError, ComponentResult};
    use crate::pipeline::id::ComponentId;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn rec(n: i32) -> Record {
        Record::new(vec![Value::Int32(n)]).unwrap()
    }

    struct Scripted {
        steps: VecDeque<ComponentResult<ReadOutcome>>,
    }

    impl Scripted {
        fn new(steps: Vec<ComponentResult<ReadOutcome>>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl Component for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
    }

    impl Input for Scripted {
        fn read_data(&mut self) -> ComponentResult<ReadOutcome> {
            self.steps.pop_front().unwrap_or(Ok(ReadOutcome::EndOfInput))
        }
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<Record>>>);

    impl Component for Collect {
        fn name(&self) -> &str {
            "collect"
        }
    }

    impl Output for Collect {
        fn write(&mut self, record: &Record) -> ComponentResult<bool> {
            self.0.lock().unwrap().push(record.clone());
            Ok(true)
        }
    }

    struct Refuse;

    impl Component for Refuse {
        fn name(&self) -> &str {
            "refuse"
        }
    }

    impl Output for Refuse {
        fn write(&mut self, _record: &Record) -> ComponentResult<bool> {
            Ok(false)
        }
    }

    fn input_slot(steps: Vec<ComponentResult<ReadOutcome>>) -> Slot<dyn Input> {
        Slot::new(ComponentId(0), Box::new(Scripted::new(steps)) as Box<dyn Input>)
    }

    fn ctx<'a>(
        queue: &'a RecordQueue,
        feedback: &'a Feedback,
        control: &'a RunControl,
        settings: &'a PipelineSettings,
    ) -> RunContext<'a> {
        RunContext {
            queue,
            feedback,
            control,
            settings,
            started: Instant::now(),
        }
    }

    #[test]
    fn test_input_advances_and_closes_queue() {
        let queue = RecordQueue::new();
        let feedback = Feedback::new();
        let control = RunControl::new();
        let settings = PipelineSettings::default();
        let mut inputs = vec![
            input_slot(vec![
                Ok(ReadOutcome::Record(rec(1))),
                Err(ComponentError::temporary("glitch")),
                Ok(ReadOutcome::Record(rec(2))),
            ]),
            input_slot(vec![Err(ComponentError::permanent("gone"))]),
            input_slot(vec![Ok(ReadOutcome::Record(rec(3)))]),
        ];
        let mut engine = ConverterEngine::new();

        run_input(&mut inputs, &mut engine, &ctx(&queue, &feedback, &control, &settings)).unwrap();

        assert!(queue.is_closed());
        assert_eq!(queue.get(), Some(rec(1)));
        assert_eq!(queue.get(), Some(rec(2)));
        assert_eq!(queue.get(), Some(rec(3)));
        assert_eq!(queue.get(), None);
        assert_eq!(feedback.read_count(), 3);
        assert_eq!(feedback.temporary_error_count(), 1);
        assert_eq!(feedback.permanent_error_count(), 1);
        assert!(!inputs[1].is_usable());
    }

    #[test]
    fn test_input_counts_drops_and_clears() {
        let queue = RecordQueue::new();
        let feedback = Feedback::new();
        let control = RunControl::new();
        let settings = PipelineSettings::default();
        let p = |n, prio| rec(n).with_priority(prio).unwrap();
        let mut inputs = vec![input_slot(vec![
            Ok(ReadOutcome::Record(p(1, 0))),
            Ok(ReadOutcome::Record(p(2, 0))),
            Ok(ReadOutcome::Record(p(3, 5))),
            Ok(ReadOutcome::Record(p(4, -1))),
        ])];

        run_input(
            &mut inputs,
            &mut ConverterEngine::new(),
            &ctx(&queue, &feedback, &control, &settings),
        )
        .unwrap();

        // 1 and 2 cleared by 3, 4 dropped
        assert_eq!(feedback.dropped_count(), 3);
        assert_eq!(feedback.interrupted_count(), 0);
        assert_eq!(queue.get(), Some(p(3, 5)));
        assert_eq!(queue.get(), None);
    }

    #[test]
    fn test_output_fans_out_and_reports_no_sink() {
        let queue = RecordQueue::new();
        let feedback = Feedback::new();
        let control = RunControl::new();
        let settings = PipelineSettings::default();
        let collected = Collect::default();
        let mut outputs: Vec<Slot<dyn Output>> = vec![
            Slot::new(ComponentId(1), Box::new(collected.clone()) as Box<dyn Output>),
            Slot::new(ComponentId(2), Box::new(Refuse) as Box<dyn Output>),
        ];
        queue.put(rec(1)).unwrap();
        queue.close();

        run_output(&mut outputs, &ctx(&queue, &feedback, &control, &settings)).unwrap();
        assert_eq!(collected.0.lock().unwrap().as_slice(), &[rec(1)]);
        assert_eq!(feedback.written_count(), 1);

        let mut refusing: Vec<Slot<dyn Output>> =
            vec![Slot::new(ComponentId(3), Box::new(Refuse) as Box<dyn Output>)];
        assert_eq!(dispatch(&mut refusing, &rec(2), &feedback), 0);
        assert_eq!(feedback.temporary_error_count(), 1);
        assert!(feedback.snapshot().temporary_errors[0].contains("No output accepted"));
    }

    #[test]
    fn test_output_reports_lateness() {
        let queue = RecordQueue::new();
        let feedback = Feedback::new();
        let control = RunControl::new();
        let settings = PipelineSettings::default();
        let collected = Collect::default();
        let mut outputs: Vec<Slot<dyn Output>> =
            vec![Slot::new(ComponentId(1), Box::new(collected) as Box<dyn Output>)];
        queue.put(rec(1).with_time(0)).unwrap();
        queue.close();

        let mut context = ctx(&queue, &feedback, &control, &settings);
        context.started = Instant::now() - Duration::from_secs(2);
        run_output(&mut outputs, &context).unwrap();

        let snap = feedback.snapshot();
        assert_eq!(snap.behind_count, 1);
        assert_eq!(snap.behind_significant, 1);
        assert!(snap.behind_max_ms >= 2000);
    }

    #[test]
    fn test_stopped_output_exits() {
        let queue = RecordQueue::new();
        let feedback = Feedback::new();
        let control = RunControl::new();
        let settings = PipelineSettings::default();
        control.output.stop();
        let mut outputs: Vec<Slot<dyn Output>> = Vec::new();
        run_output(&mut outputs, &ctx(&queue, &feedback, &control, &settings)).unwrap();
    }
}
