//! Pipeline-specific error types.

use crate::pipeline::executor::PipelineState;
use crate::pipeline::id::ComponentId;
use thiserror::Error;

/// Failure reported by an Input, Converter or Output.
///
/// `Temporary` skips the current record for that component only.
/// `Permanent` closes the component and removes it for the rest of the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComponentError {
    #[error("temporary failure: {0}")]
    Temporary(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ComponentError {
    pub fn temporary(message: impl Into<String>) -> Self {
        ComponentError::Temporary(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ComponentError::Permanent(message.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, ComponentError::Permanent(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ComponentError::Temporary(m) | ComponentError::Permanent(m) => m,
        }
    }
}

pub type ComponentResult<T> = std::result::Result<T, ComponentError>;

/// Errors raised by the record queue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue closed")]
    Closed,
}

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Operation '{operation}' not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },

    #[error("Unknown component {0}")]
    UnknownComponent(ComponentId),

    #[error("Deadlock detected: converter {converter} was handed record {record} twice")]
    Deadlock {
        converter: ComponentId,
        record: String,
    },

    #[error("No output accepted record {0}")]
    NoSink(String),

    #[error("{thread} thread failed: {message}")]
    WorkerFailed {
        thread: &'static str,
        message: String,
    },

    #[error("Both worker threads failed: {0}")]
    AllWorkersFailed(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Thread spawn error: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
