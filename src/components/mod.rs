//! Ready-made pipeline components.
//!
//! - [`StreamInput`] / [`StreamOutput`] read and write wire-encoded records
//!   on stdin/stdout, files or any reader/writer.
//! - [`ScriptConverter`] rewrites records with Rhai scripts.
//! - [`ChannelInput`] / [`ChannelOutput`] connect a pipeline to other threads.
//! - [`VecInput`] / [`CollectingOutput`] keep records in memory, mostly for
//!   tests and embedding.

pub mod channel;
pub mod memory;
pub mod script_converter;
pub mod stream;

pub use channel::{ChannelInput, ChannelOutput};
pub use memory::{CollectingOutput, SharedBuffer, VecInput};
pub use script_converter::ScriptConverter;
pub use stream::{StreamInput, StreamOutput};
