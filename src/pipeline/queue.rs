//! Priority ring-buffer queue between the Input and Output threads.
//!
//! The queue holds records of exactly one priority class at a time:
//!
//! - a record with a **higher** priority than the current tag clears every
//!   queued record and becomes the only occupant,
//! - a record with a **lower** priority is dropped,
//! - an **equal** priority is appended in FIFO order.
//!
//! When the consumer starts waiting on an empty queue the tag becomes
//! undefined and the next record of any priority is accepted.
//!
//! Storage is a growable ring: a `Vec` with explicit read/write cursors that
//! doubles (re-linearising the occupants) when the writer would catch up with
//! the reader. All state sits behind one mutex; a condvar wakes the consumer,
//! and waits are bounded by the poll interval so callers stay responsive.

use crate::data::Record;
use crate::pipeline::error::QueueError;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default number of slots allocated up front.
pub const DEFAULT_CAPACITY: usize = 16;

/// Default upper bound for a single blocking wait.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What happened to a record handed to [`RecordQueue::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Appended behind records of the same priority.
    Put,
    /// Higher priority: `cleared` queued records were discarded first.
    ClearedAndPut { cleared: usize },
    /// Lower priority than the current tag; discarded.
    Dropped,
}

/// Result of a bounded [`RecordQueue::get_timeout`].
#[derive(Debug, Clone, PartialEq)]
pub enum GetOutcome {
    Record(Record),
    /// Nothing arrived before the timeout; the queue is still open.
    Timeout,
    /// The queue is closed and fully drained.
    EndOfStream,
}

struct QueueState {
    slots: Vec<Option<Record>>,
    read: usize,
    write: usize,
    /// `None` while undefined.
    priority: Option<i8>,
    closed: bool,
}

impl QueueState {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            read: 0,
            write: 0,
            priority: None,
            closed: false,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn len(&self) -> usize {
        (self.write + self.capacity() - self.read) % self.capacity()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.read == self.write
    }

    fn push(&mut self, record: Record) {
        if (self.write + 1) % self.capacity() == self.read {
            self.grow();
        }
        self.slots[self.write] = Some(record);
        self.write = (self.write + 1) % self.capacity();
    }

    fn pop(&mut self) -> Option<Record> {
        if self.is_empty() {
            return None;
        }
        let record = self.slots[self.read].take();
        self.read = (self.read + 1) % self.capacity();
        record
    }

    /// Discard all occupants, returning how many there were.
    fn clear(&mut self) -> usize {
        let mut cleared = 0;
        while self.pop().is_some() {
            cleared += 1;
        }
        cleared
    }

    /// Double the capacity, moving occupants to the front in FIFO order.
    fn grow(&mut self) {
        let new_capacity = self.capacity() * 2;
        let mut slots = Vec::with_capacity(new_capacity);
        while let Some(record) = self.pop() {
            slots.push(Some(record));
        }
        let len = slots.len();
        slots.resize_with(new_capacity, || None);
        self.slots = slots;
        self.read = 0;
        self.write = len;
        tracing::trace!(capacity = new_capacity, "Record queue grew");
    }
}

/// Single-producer / single-consumer priority queue of records.
pub struct RecordQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    initial_capacity: usize,
    poll_interval: Duration,
}

impl RecordQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            state: Mutex::new(QueueState::with_capacity(capacity)),
            available: Condvar::new(),
            initial_capacity: capacity,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the longest single wait used by the blocking [`get`](Self::get).
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a record, applying the priority rules.
    pub fn put(&self, record: Record) -> Result<PutOutcome, QueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        let priority = record.priority();
        let outcome = match state.priority {
            None => PutOutcome::Put,
            Some(tag) if priority < tag => return Ok(PutOutcome::Dropped),
            Some(tag) if priority > tag => PutOutcome::ClearedAndPut {
                cleared: state.clear(),
            },
            Some(_) => PutOutcome::Put,
        };
        state.priority = Some(priority);
        state.push(record);
        drop(state);
        self.available.notify_one();
        Ok(outcome)
    }

    /// Wait up to `timeout` for the next record.
    pub fn get_timeout(&self, timeout: Duration) -> GetOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        let mut waiting = false;
        loop {
            if let Some(record) = state.pop() {
                return GetOutcome::Record(record);
            }
            if state.closed {
                return GetOutcome::EndOfStream;
            }
            if !waiting {
                // consumer is idle: accept the next record of any priority
                state.priority = None;
                waiting = true;
            }
            let now = Instant::now();
            if now >= deadline {
                return GetOutcome::Timeout;
            }
            let wait = (deadline - now).min(self.poll_interval);
            state = match self.available.wait_timeout(state, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Block until a record arrives. `None` once closed and drained.
    pub fn get(&self) -> Option<Record> {
        loop {
            match self.get_timeout(self.poll_interval) {
                GetOutcome::Record(record) => return Some(record),
                GetOutcome::EndOfStream => return None,
                GetOutcome::Timeout => continue,
            }
        }
    }

    /// Forbid further puts. Queued records stay readable. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// Empty, reopen and shrink back to the initial capacity.
    pub fn reset_cache(&self) {
        *self.lock() = QueueState::with_capacity(self.initial_capacity);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Current priority tag, `None` when undefined.
    pub fn priority(&self) -> Option<i8> {
        self.lock().priority
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Priorities of all queued records, oldest first.
    pub fn queued_priorities(&self) -> Vec<i8> {
        let state = self.lock();
        let mut out = Vec::with_capacity(state.len());
        let mut i = state.read;
        while i != state.write {
            if let Some(record) = &state.slots[i] {
                out.push(record.priority());
            }
            i = (i + 1) % state.capacity();
        }
        out
    }
}

impl Default for RecordQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use std::sync::Arc;

    fn rec(n: i64, priority: i32) -> Record {
        Record::new(vec![Value::Int64(n)])
            .unwrap()
            .with_priority(priority)
            .unwrap()
    }

    fn value_of(r: &Record) -> i64 {
        r.get(0).unwrap().as_long().unwrap()
    }

    const NO_WAIT: Duration = Duration::ZERO;

    #[test]
    fn test_fifo_within_priority() {
        let q = RecordQueue::new();
        for i in 0..5 {
            assert_eq!(q.put(rec(i, 0)).unwrap(), PutOutcome::Put);
        }
        for i in 0..5 {
            match q.get_timeout(NO_WAIT) {
                GetOutcome::Record(r) => assert_eq!(value_of(&r), i),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_lower_priority_dropped() {
        let q = RecordQueue::new();
        q.put(rec(1, 5)).unwrap();
        assert_eq!(q.put(rec(2, 4)).unwrap(), PutOutcome::Dropped);
        assert_eq!(q.len(), 1);
        assert_eq!(q.priority(), Some(5));
    }

    #[test]
    fn test_higher_priority_clears() {
        let q = RecordQueue::new();
        q.put(rec(1, 0)).unwrap();
        q.put(rec(2, 0)).unwrap();
        q.put(rec(3, 0)).unwrap();
        assert_eq!(
            q.put(rec(4, 10)).unwrap(),
            PutOutcome::ClearedAndPut { cleared: 3 }
        );
        assert_eq!(q.len(), 1);
        assert_eq!(q.priority(), Some(10));
        assert_eq!(value_of(&q.get().unwrap()), 4);
    }

    #[test]
    fn test_tag_survives_until_consumer_waits() {
        let q = RecordQueue::new();
        q.put(rec(1, 7)).unwrap();
        assert!(matches!(q.get_timeout(NO_WAIT), GetOutcome::Record(_)));
        // consumer is busy with the record, tag still 7
        assert_eq!(q.put(rec(2, 0)).unwrap(), PutOutcome::Dropped);
        // consumer comes back to an empty queue
        assert_eq!(q.get_timeout(NO_WAIT), GetOutcome::Timeout);
        assert_eq!(q.priority(), None);
        assert_eq!(q.put(rec(3, -20)).unwrap(), PutOutcome::Put);
        assert_eq!(q.priority(), Some(-20));
    }

    #[test]
    fn test_growth_preserves_order() {
        let q = RecordQueue::with_capacity(4);
        // wrap the cursors before growing
        q.put(rec(-1, 0)).unwrap();
        q.put(rec(-2, 0)).unwrap();
        q.get().unwrap();
        q.get().unwrap();
        q.put(rec(0, 0)).unwrap();
        let initial = q.capacity();
        for i in 1..50 {
            q.put(rec(i, 0)).unwrap();
        }
        assert!(q.capacity() > initial);
        assert_eq!(q.len(), 50);
        for i in 0..50 {
            assert_eq!(value_of(&q.get().unwrap()), i);
        }
    }

    #[test]
    fn test_close_drains_then_ends() {
        let q = RecordQueue::new();
        q.put(rec(1, 0)).unwrap();
        q.put(rec(2, 0)).unwrap();
        q.close();
        q.close();
        assert_eq!(q.put(rec(3, 0)), Err(QueueError::Closed));
        assert_eq!(value_of(&q.get().unwrap()), 1);
        assert_eq!(value_of(&q.get().unwrap()), 2);
        assert!(q.get().is_none());
        assert_eq!(q.get_timeout(NO_WAIT), GetOutcome::EndOfStream);
    }

    #[test]
    fn test_reset_cache_reopens() {
        let q = RecordQueue::with_capacity(2);
        for i in 0..10 {
            q.put(rec(i, 3)).unwrap();
        }
        q.close();
        q.reset_cache();
        assert!(!q.is_closed());
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 2);
        assert_eq!(q.priority(), None);
        assert_eq!(q.put(rec(1, -3)).unwrap(), PutOutcome::Put);
    }

    #[test]
    fn test_blocking_get_wakes_on_put() {
        let q = Arc::new(RecordQueue::new().with_poll_interval(Duration::from_millis(10)));
        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.get())
        };
        std::thread::sleep(Duration::from_millis(30));
        q.put(rec(42, 0)).unwrap();
        let got = consumer.join().unwrap().unwrap();
        assert_eq!(value_of(&got), 42);
    }

    #[test]
    fn test_blocking_get_ends_on_close() {
        let q = Arc::new(RecordQueue::new().with_poll_interval(Duration::from_millis(10)));
        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.get())
        };
        std::thread::sleep(Duration::from_millis(30));
        q.close();
        assert!(consumer.join().unwrap().is_none());
    }

    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Put(i8),
        Get,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (-3i8..=3).prop_map(Op::Put),
            1 => Just(Op::Get),
        ]
    }

    proptest! {
        #[test]
        fn test_queue_is_monomorphic(ops in prop::collection::vec(op(), 1..200)) {
            let q = RecordQueue::with_capacity(2);
            let mut seq = 0i64;
            for op in ops {
                match op {
                    Op::Put(p) => {
                        let before = q.len();
                        let tag = q.priority();
                        let outcome = q.put(rec(seq, p as i32)).unwrap();
                        seq += 1;
                        match tag {
                            Some(t) if p < t => {
                                prop_assert_eq!(outcome, PutOutcome::Dropped);
                                prop_assert_eq!(q.len(), before);
                            }
                            Some(t) if p > t => {
                                prop_assert_eq!(q.len(), 1);
                            }
                            _ => prop_assert_eq!(q.len(), before + 1),
                        }
                    }
                    Op::Get => {
                        let _ = q.get_timeout(NO_WAIT);
                    }
                }
                let priorities = q.queued_priorities();
                if let Some(first) = priorities.first() {
                    prop_assert!(priorities.iter().all(|p| p == first));
                    prop_assert_eq!(q.priority(), Some(*first));
                }
            }
        }

        #[test]
        fn test_same_priority_never_lost(n in 1usize..300) {
            let q = RecordQueue::with_capacity(2);
            for i in 0..n {
                q.put(rec(i as i64, 1)).unwrap();
            }
            for i in 0..n {
                prop_assert_eq!(value_of(&q.get().unwrap()), i as i64);
            }
        }
    }
}
