//! Record data model.
//!
//! A [`Record`] is the unit of data moved through the pipeline: up to
//! [`MAX_FIELDS`] typed [`Value`]s, a priority in `[-99, 99]` and an optional
//! scheduled time relative to pipeline start.

pub mod record;
pub mod value;

pub use record::{
    Record, RecordError, DEFAULT_PRIORITY, MAX_FIELDS, MAX_PRIORITY, MIN_PRIORITY,
};
pub use value::{Value, ValueError, ValueResult, ValueType};
