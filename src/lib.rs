//! # datapipe-rs: Priority-Preemptive Record Pipeline
//!
//! Moves small typed records from inputs, through converters, to outputs on
//! two worker threads. Records carry a priority that preempts lower-priority
//! traffic still queued, and an optional schedule that delays their delivery
//! to a fixed offset from pipeline start.
//!
//! ## Architecture
//!
//! - **Data**: [`Record`]s of up to eight typed [`data::Value`]s
//! - **Codecs**: compact binary and line-based ASCII wire formats
//! - **Pipeline**: component contracts, priority queue, converter engine,
//!   the Input/Output workers and the [`Pipeline`] coordinator
//! - **Components**: stream, channel and in-memory endpoints plus Rhai
//!   script converters
//! - **Config**: TOML pipeline description with bounded scheduler settings
//!
//! ## Configuration
//!
//! Without `--config` the `datapipe` binary reads its pipeline from the
//! platform data directory under `dev.hxyulin.datapipe-rs`:
//!
//! - **Linux**: `~/.local/share/dev.hxyulin.datapipe-rs/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.datapipe-rs/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.datapipe-rs\`
//!
//! ## Example
//!
//! ```no_run
//! use datapipe_rs::{
//!     codec::WireFormat,
//!     components::{ScriptConverter, StreamInput, StreamOutput},
//!     config::PipelineSettings,
//!     scripting::builtins,
//!     Pipeline,
//! };
//!
//! fn main() -> datapipe_rs::Result<()> {
//!     let mut pipeline = Pipeline::new(PipelineSettings::default());
//!     pipeline.add_input(Box::new(StreamInput::stdin(WireFormat::Ascii)))?;
//!     pipeline.add_converter(Box::new(ScriptConverter::builtin(builtins::SPLIT_FIELDS)))?;
//!     pipeline.add_output(Box::new(StreamOutput::stdout(WireFormat::Binary)))?;
//!
//!     let feedback = pipeline.execute()?;
//!     eprintln!("{}", feedback.summary());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod components;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod scripting;

// Re-export commonly used types
pub use codec::{CodecError, WireFormat};
pub use config::{AppConfig, PipelineSettings};
pub use data::{Record, Value, ValueType};
pub use error::{PipeError, Result, ResultExt};
pub use pipeline::{FeedbackSnapshot, Pipeline, PipelineBuilder};
pub use scripting::ScriptEngine;
