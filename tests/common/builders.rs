//! Test data builders for creating records

use datapipe_rs::data::{Record, Value};

/// Builder for creating test Records
pub struct RecordBuilder {
    values: Vec<Value>,
    priority: i32,
    time_ms: Option<u32>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            priority: 0,
            time_ms: None,
        }
    }

    pub fn field(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn time(mut self, time_ms: u32) -> Self {
        self.time_ms = Some(time_ms);
        self
    }

    pub fn build(self) -> Record {
        let record = Record::new(self.values)
            .and_then(|r| r.with_priority(self.priority))
            .expect("valid test record");
        match self.time_ms {
            Some(ms) => record.with_time(ms),
            None => record,
        }
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-field int64 record with the given priority
pub fn tagged(tag: i64, priority: i32) -> Record {
    RecordBuilder::new().field(tag).priority(priority).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = RecordBuilder::new()
            .field(5i64)
            .field("x")
            .priority(-3)
            .time(120)
            .build();

        assert_eq!(record.len(), 2);
        assert_eq!(record.priority(), -3);
        assert_eq!(record.time_ms(), Some(120));
    }
}
