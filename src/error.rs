//! Error handling for datapipe-rs
//!
//! Each layer has its own `thiserror` enum; [`PipeError`] wraps them for
//! callers that drive the whole crate (config loading, the CLI).

use crate::codec::CodecError;
use crate::data::{RecordError, ValueError};
use crate::pipeline::PipelineError;
use thiserror::Error;

/// Crate-level error type
#[derive(Error, Debug)]
pub enum PipeError {
    /// Malformed wire data
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid record construction
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// Impossible value coercion
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// Pipeline state machine or worker failures
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to Rhai script compilation or execution
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipeError>,
    },
}

impl PipeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        PipeError::Script(err.to_string())
    }
}

impl From<Box<rhai::EvalAltResult>> for PipeError {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        PipeError::from_rhai_error(err)
    }
}

impl From<rhai::ParseError> for PipeError {
    fn from(err: rhai::ParseError) -> Self {
        PipeError::Script(err.to_string())
    }
}

/// Result type alias for datapipe-rs operations
pub type Result<T> = std::result::Result<T, PipeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<PipeError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipeError::Config("missing input".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing input");
    }

    #[test]
    fn test_error_with_context() {
        let result: std::result::Result<(), CodecError> = Err(CodecError::Truncated);
        let err = result.context("Failed to read records.bin").unwrap_err();
        assert!(err.to_string().starts_with("Failed to read records.bin"));
        assert!(matches!(
            err,
            PipeError::WithContext { ref source, .. } if matches!(**source, PipeError::Codec(_))
        ));
    }

    #[test]
    fn test_lazy_context_on_io() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"));
        let err = result.with_context(|| format!("open {}", "in.txt")).unwrap_err();
        assert!(err.to_string().contains("open in.txt"));
    }
}
