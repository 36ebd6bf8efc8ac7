//! ConverterEngine - recursive record expansion through registered converters
//!
//! Each record pulled from an input is offered to the converters in
//! registration order. The first one whose `can_handle` accepts it converts
//! it, and every record it returns is expanded again from the first
//! converter. Records nobody claims pass through unchanged.
//!
//! A [`CycleGuard`] scoped to one top-level record holds the (converter,
//! record content) pairs on the current expansion path. Meeting a pair that
//! is already on the path means the converters loop; the offending converter
//! is failed permanently and the record falls through to the next converter.
//! Identical sibling records are not a loop.

use crate::data::Record;
use crate::pipeline::component::{Converter, Slot};
use crate::pipeline::error::{ComponentError, PipelineError};
use crate::pipeline::feedback::Feedback;
use crate::pipeline::id::ComponentId;
use std::collections::HashSet;

/// Deepest allowed chain of nested expansions.
pub const MAX_CONVERSION_DEPTH: usize = 64;

/// (converter, record hash) pairs on the active expansion path of one
/// top-level record.
#[derive(Debug, Default)]
pub struct CycleGuard {
    seen: HashSet<(ComponentId, u64)>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; call once per record pulled from an input.
    pub fn clear(&mut self) {
        self.seen.clear();
    }

    /// Register a pair. Returns `false` if it was already present.
    fn enter(&mut self, converter: ComponentId, hash: u64) -> bool {
        self.seen.insert((converter, hash))
    }

    fn leave(&mut self, converter: ComponentId, hash: u64) {
        self.seen.remove(&(converter, hash));
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Ordered registry of converters plus the expansion algorithm.
#[derive(Default)]
pub struct ConverterEngine {
    converters: Vec<Slot<dyn Converter>>,
}

impl ConverterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ComponentId, converter: Box<dyn Converter>) {
        self.converters.push(Slot::new(id, converter));
    }

    pub fn remove(&mut self, id: ComponentId) -> Option<Box<dyn Converter>> {
        let idx = self.converters.iter().position(|s| s.id == id)?;
        Some(self.converters.remove(idx).component)
    }

    pub fn slots(&self) -> &[Slot<dyn Converter>] {
        &self.converters
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Slot<dyn Converter>] {
        &mut self.converters
    }

    /// Number of converters still in consideration.
    pub fn active_count(&self) -> usize {
        self.converters.iter().filter(|s| s.is_usable()).count()
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Expand `record` into the list of records to enqueue.
    pub fn convert_record_to_list(
        &mut self,
        record: Record,
        guard: &mut CycleGuard,
        feedback: &Feedback,
    ) -> Vec<Record> {
        let mut out = Vec::new();
        self.expand(record, guard, feedback, 0, &mut out);
        out
    }

    fn expand(
        &mut self,
        record: Record,
        guard: &mut CycleGuard,
        feedback: &Feedback,
        depth: usize,
        out: &mut Vec<Record>,
    ) {
        for idx in 0..self.converters.len() {
            let slot = &mut self.converters[idx];
            if !slot.is_usable() || !slot.component.can_handle(&record) {
                continue;
            }

            let id = slot.id;
            let hash = record.content_hash();
            if depth >= MAX_CONVERSION_DEPTH || !guard.enter(id, hash) {
                let err = PipelineError::Deadlock {
                    converter: slot.id,
                    record: record.summary(),
                };
                tracing::error!(component = %slot.id, name = slot.name(), "{}", err);
                feedback.add_permanent_error(err.to_string());
                slot.fail(&ComponentError::permanent(err.to_string()));
                continue;
            }

            let result = slot.component.convert(&record);
            match result {
                Ok(converted) => {
                    tracing::trace!(
                        component = %slot.id,
                        produced = converted.len(),
                        record = %record.summary(),
                        "Converted record"
                    );
                    feedback.add_converted(converted.len() as u64);
                    for next in converted {
                        self.expand(next, guard, feedback, depth + 1, out);
                    }
                    guard.leave(id, hash);
                    return;
                }
                Err(e) if e.is_permanent() => {
                    guard.leave(id, hash);
                    tracing::error!(
                        component = %slot.id,
                        name = slot.name(),
                        record = %record.summary(),
                        "Converter failed permanently: {}",
                        e
                    );
                    feedback.add_permanent_error(format!(
                        "converter {} ({}): {}",
                        slot.id,
                        slot.name(),
                        e
                    ));
                    slot.fail(&e);
                }
                Err(e) => {
                    guard.leave(id, hash);
                    tracing::warn!(
                        component = %slot.id,
                        name = slot.name(),
                        record = %record.summary(),
                        "Converter skipped record: {}",
                        e
                    );
                    feedback.add_temporary_error(format!(
                        "converter {} ({}): {}",
                        slot.id,
                        slot.name(),
                        e
                    ));
                }
            }
        }
        out.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::pipeline::component::{Component, SlotStatus};
    use crate::pipeline::error::ComponentResult;

    fn rec(n: i64) -> Record {
        Record::new(vec![Value::Int64(n)]).unwrap()
    }

    fn n(r: &Record) -> i64 {
        r.get(0).unwrap().as_long().unwrap()
    }

    /// Splits a value n > 1 into two records of n / 2.
    struct Halver;

    impl Component for Halver {
        fn name(&self) -> &str {
            "halver"
        }
    }

    impl Converter for Halver {
        fn can_handle(&self, record: &Record) -> bool {
            n(record) > 1
        }

        fn convert(&mut self, record: &Record) -> ComponentResult<Vec<Record>> {
            let half = n(record) / 2;
            Ok(vec![rec(half), rec(half)])
        }
    }

    /// Returns its input unchanged: a genuine cycle.
    struct Echo;

    impl Component for Echo {
        fn name(&self) -> &str {
            "echo"
        }
    }

    impl Converter for Echo {
        fn can_handle(&self, _record: &Record) -> bool {
            true
        }

        fn convert(&mut self, record: &Record) -> ComponentResult<Vec<Record>> {
            Ok(vec![record.clone()])
        }
    }

    /// Always produces a new value, so only the depth bound stops it.
    struct Incrementer;

    impl Component for Incrementer {
        fn name(&self) -> &str {
            "incrementer"
        }
    }

    impl Converter for Incrementer {
        fn can_handle(&self, _record: &Record) -> bool {
            true
        }

        fn convert(&mut self, record: &Record) -> ComponentResult<Vec<Record>> {
            Ok(vec![rec(n(record) + 1)])
        }
    }

    struct Failing(ComponentError);

    impl Component for Failing {
        fn name(&self) -> &str {
            "failing"
        }
    }

    impl Converter for Failing {
        fn can_handle(&self, _record: &Record) -> bool {
            true
        }

        fn convert(&mut self, _record: &Record) -> ComponentResult<Vec<Record>> {
            Err(self.0.clone())
        }
    }

    /// Drops every record it sees.
    struct Sink;

    impl Component for Sink {
        fn name(&self) -> &str {
            "sink"
        }
    }

    impl Converter for Sink {
        fn can_handle(&self, _record: &Record) -> bool {
            true
        }

        fn convert(&mut self, _record: &Record) -> ComponentResult<Vec<Record>> {
            Ok(Vec::new())
        }
    }

    fn engine(converters: Vec<Box<dyn Converter>>) -> ConverterEngine {
        let mut engine = ConverterEngine::new();
        for (i, c) in converters.into_iter().enumerate() {
            engine.add(ComponentId(i as u32), c);
        }
        engine
    }

    #[test]
    fn test_passthrough_without_converters() {
        let mut e = ConverterEngine::new();
        let fb = Feedback::new();
        let out = e.convert_record_to_list(rec(7), &mut CycleGuard::new(), &fb);
        assert_eq!(out, vec![rec(7)]);
        assert_eq!(fb.snapshot().converted, 0);
    }

    #[test]
    fn test_recursive_expansion() {
        let mut e = engine(vec![Box::new(Halver)]);
        let fb = Feedback::new();
        let mut guard = CycleGuard::new();
        let out = e.convert_record_to_list(rec(8), &mut guard, &fb);
        assert_eq!(out.len(), 8);
        assert!(out.iter().all(|r| n(r) == 1));
        // 8 -> 2x4 -> 4x2 -> 8x1
        assert_eq!(fb.snapshot().converted, 2 + 4 + 8);
    }

    #[test]
    fn test_repeated_content_is_not_a_cycle_across_records() {
        let mut e = engine(vec![Box::new(Halver)]);
        let fb = Feedback::new();
        let mut guard = CycleGuard::new();
        e.convert_record_to_list(rec(2), &mut guard, &fb);
        guard.clear();
        let out = e.convert_record_to_list(rec(2), &mut guard, &fb);
        assert_eq!(out.len(), 2);
        assert_eq!(fb.permanent_error_count(), 0);
    }

    #[test]
    fn test_cycle_detected() {
        let mut e = engine(vec![Box::new(Echo)]);
        let fb = Feedback::new();
        let out = e.convert_record_to_list(rec(1), &mut CycleGuard::new(), &fb);
        // echo fails permanently, the record passes through
        assert_eq!(out, vec![rec(1)]);
        assert_eq!(fb.permanent_error_count(), 1);
        assert!(fb.snapshot().permanent_errors[0].contains("Deadlock"));
        assert!(matches!(e.slots()[0].status, SlotStatus::Failed(_)));
        assert_eq!(e.active_count(), 0);
    }

    #[test]
    fn test_unbounded_chain_terminates() {
        let mut e = engine(vec![Box::new(Incrementer)]);
        let fb = Feedback::new();
        let out = e.convert_record_to_list(rec(0), &mut CycleGuard::new(), &fb);
        assert_eq!(out, vec![rec(MAX_CONVERSION_DEPTH as i64)]);
        assert_eq!(fb.permanent_error_count(), 1);
    }

    #[test]
    fn test_permanent_failure_falls_through() {
        let mut e = engine(vec![
            Box::new(Failing(ComponentError::permanent("broken"))),
            Box::new(Halver),
        ]);
        let fb = Feedback::new();
        let mut guard = CycleGuard::new();
        let out = e.convert_record_to_list(rec(2), &mut guard, &fb);
        assert_eq!(out, vec![rec(1), rec(1)]);
        assert_eq!(fb.permanent_error_count(), 1);
        assert!(!e.slots()[0].is_usable());

        // the failed converter is no longer consulted
        guard.clear();
        e.convert_record_to_list(rec(2), &mut guard, &fb);
        assert_eq!(fb.permanent_error_count(), 1);
    }

    #[test]
    fn test_temporary_failure_skips_record_for_that_converter() {
        let mut e = engine(vec![Box::new(Failing(ComponentError::temporary("busy")))]);
        let fb = Feedback::new();
        let mut guard = CycleGuard::new();
        let out = e.convert_record_to_list(rec(3), &mut guard, &fb);
        assert_eq!(out, vec![rec(3)]);
        assert_eq!(fb.temporary_error_count(), 1);
        assert!(e.slots()[0].is_usable());
    }

    #[test]
    fn test_converter_can_swallow_record() {
        let mut e = engine(vec![Box::new(Sink)]);
        let fb = Feedback::new();
        let out = e.convert_record_to_list(rec(3), &mut CycleGuard::new(), &fb);
        assert!(out.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut e = engine(vec![Box::new(Halver), Box::new(Sink)]);
        assert!(e.remove(ComponentId(0)).is_some());
        assert!(e.remove(ComponentId(0)).is_none());
        assert_eq!(e.len(), 1);
    }
}
