//! Immutable record type flowing through the pipeline.

use crate::data::value::Value;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of fields a record can carry (3 bits of count in the binary header).
pub const MAX_FIELDS: usize = 8;

/// Lowest allowed priority.
pub const MIN_PRIORITY: i8 = -99;

/// Highest allowed priority.
pub const MAX_PRIORITY: i8 = 99;

/// Neutral priority used when none is given.
pub const DEFAULT_PRIORITY: i8 = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record has {0} fields, at most {MAX_FIELDS} are allowed")]
    TooManyFields(usize),

    #[error("Priority {0} outside of [{MIN_PRIORITY}, {MAX_PRIORITY}]")]
    PriorityOutOfRange(i32),
}

/// An ordered list of up to eight values plus a priority and an optional
/// scheduled time (milliseconds since pipeline start).
///
/// Records are never mutated once built. The `with_*` methods return a new
/// record that shares the value list with the original.
#[derive(Clone, PartialEq, Hash)]
pub struct Record {
    values: Arc<[Value]>,
    priority: i8,
    time_ms: Option<u32>,
}

impl Record {
    /// Build a record with default priority and no scheduled time.
    pub fn new(values: Vec<Value>) -> Result<Self, RecordError> {
        if values.len() > MAX_FIELDS {
            return Err(RecordError::TooManyFields(values.len()));
        }
        Ok(Self {
            values: values.into(),
            priority: DEFAULT_PRIORITY,
            time_ms: None,
        })
    }

    /// A record without fields. It has no binary encoding.
    pub fn empty() -> Self {
        Self {
            values: Arc::from(Vec::new()),
            priority: DEFAULT_PRIORITY,
            time_ms: None,
        }
    }

    /// Copy of this record with a different priority.
    pub fn with_priority(&self, priority: i32) -> Result<Self, RecordError> {
        Ok(Self {
            values: Arc::clone(&self.values),
            priority: check_priority(priority)?,
            time_ms: self.time_ms,
        })
    }

    /// Copy of this record scheduled `time_ms` after pipeline start.
    pub fn with_time(&self, time_ms: u32) -> Self {
        Self {
            values: Arc::clone(&self.values),
            priority: self.priority,
            time_ms: Some(time_ms),
        }
    }

    /// Copy of this record without a scheduled time.
    pub fn without_time(&self) -> Self {
        Self {
            values: Arc::clone(&self.values),
            priority: self.priority,
            time_ms: None,
        }
    }

    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn priority(&self) -> i8 {
        self.priority
    }

    #[inline]
    pub fn time_ms(&self) -> Option<u32> {
        self.time_ms
    }

    pub fn scheduled_time(&self) -> Option<Duration> {
        self.time_ms.map(|ms| Duration::from_millis(ms as u64))
    }

    /// Content hash used to key the conversion cycle guard.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Short single-line rendering for diagnostics.
    pub fn summary(&self) -> String {
        const MAX_LEN: usize = 80;
        let mut text = crate::codec::ascii::format_record(self);
        if text.len() > MAX_LEN {
            let mut cut = MAX_LEN;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("...");
        }
        text
    }
}

pub(crate) fn check_priority(priority: i32) -> Result<i8, RecordError> {
    if (MIN_PRIORITY as i32..=MAX_PRIORITY as i32).contains(&priority) {
        Ok(priority as i8)
    } else {
        Err(RecordError::PriorityOutOfRange(priority))
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("values", &self.values)
            .field("priority", &self.priority)
            .field("time_ms", &self.time_ms)
            .finish()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::codec::ascii::format_record(self))
    }
}
