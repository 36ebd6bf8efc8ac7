//! In-memory inputs and outputs.

use crate::data::Record;
use crate::pipeline::{Component, ComponentResult, Input, Output, ReadOutcome};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Replays a fixed list of records on every run
pub struct VecInput {
    name: String,
    records: Vec<Record>,
    pending: VecDeque<Record>,
}

impl VecInput {
    pub fn new(records: Vec<Record>) -> Self {
        Self::named("memory", records)
    }

    pub fn named(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
            pending: VecDeque::new(),
        }
    }

    /// Records left in the current run
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl Component for VecInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self) -> ComponentResult<()> {
        self.pending = self.records.iter().cloned().collect();
        Ok(())
    }

    fn close(&mut self) -> ComponentResult<()> {
        self.pending.clear();
        Ok(())
    }
}

impl Input for VecInput {
    fn read_data(&mut self) -> ComponentResult<ReadOutcome> {
        Ok(match self.pending.pop_front() {
            Some(record) => ReadOutcome::Record(record),
            None => ReadOutcome::EndOfInput,
        })
    }
}

/// Collects every written record. Clones share the same storage, so a clone
/// kept by the caller observes what the pipeline wrote.
#[derive(Clone)]
pub struct CollectingOutput {
    name: String,
    records: Arc<Mutex<Vec<Record>>>,
}

impl Default for CollectingOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectingOutput {
    pub fn new() -> Self {
        Self::named("collector")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn records(&self) -> Vec<Record> {
        lock(&self.records).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.records).clear();
    }
}

impl Component for CollectingOutput {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Output for CollectingOutput {
    fn write(&mut self, record: &Record) -> ComponentResult<bool> {
        lock(&self.records).push(record.clone());
        Ok(true)
    }
}

/// Cloneable byte sink for [`StreamOutput::from_writer`](super::StreamOutput::from_writer)
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.bytes).clone()
    }

    /// Contents as text, lossy for non UTF-8 bytes
    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&lock(&self.bytes)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        lock(&self.bytes).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
