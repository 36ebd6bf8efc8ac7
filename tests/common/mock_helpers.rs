//! Mock construction helpers

use datapipe_rs::data::Record;
use datapipe_rs::pipeline::{Component, ComponentResult, Output};
use mockall::automock;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// The part of an output a test sets expectations on
#[automock]
pub trait RecordSink: Send {
    fn accept(&mut self, record: &Record) -> ComponentResult<bool>;
}

/// Output delegating every write to a mocked [`RecordSink`]
pub struct MockedOutput {
    name: String,
    sink: MockRecordSink,
}

impl MockedOutput {
    pub fn new(name: &str, sink: MockRecordSink) -> Self {
        Self {
            name: name.to_string(),
            sink,
        }
    }
}

impl Component for MockedOutput {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Output for MockedOutput {
    fn write(&mut self, record: &Record) -> ComponentResult<bool> {
        self.sink.accept(record)
    }
}

/// Records every write with its arrival time
#[derive(Clone, Default)]
pub struct TimedOutput {
    arrivals: Arc<Mutex<Vec<(Record, Instant)>>>,
}

impl TimedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arrivals(&self) -> Vec<(Record, Instant)> {
        self.arrivals.lock().unwrap().clone()
    }
}

impl Component for TimedOutput {
    fn name(&self) -> &str {
        "timed"
    }
}

impl Output for TimedOutput {
    fn write(&mut self, record: &Record) -> ComponentResult<bool> {
        self.arrivals
            .lock()
            .unwrap()
            .push((record.clone(), Instant::now()));
        Ok(true)
    }
}

/// Output that blocks for a while on its first write
pub struct SlowOutput {
    inner: datapipe_rs::components::CollectingOutput,
    first_delay: std::time::Duration,
    writes: usize,
}

impl SlowOutput {
    pub fn new(
        inner: datapipe_rs::components::CollectingOutput,
        first_delay: std::time::Duration,
    ) -> Self {
        Self {
            inner,
            first_delay,
            writes: 0,
        }
    }
}

impl Component for SlowOutput {
    fn name(&self) -> &str {
        "slow"
    }
}

impl Output for SlowOutput {
    fn write(&mut self, record: &Record) -> ComponentResult<bool> {
        if self.writes == 0 {
            std::thread::sleep(self.first_delay);
        }
        self.writes += 1;
        self.inner.write(record)
    }
}
