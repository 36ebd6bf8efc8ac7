//! Two-thread record pipeline.
//!
//! Records flow from inputs through converters into a priority queue and
//! from there to every output:
//!
//! ```text
//! [Input]…[Input] ─► ConverterEngine ─► RecordQueue ─► [Output]
//!     Input thread                          │          ├► [Output]
//!                                    Output thread     └► [Output]
//! ```
//!
//! # Design
//!
//! - **Closed capability set**: components implement [`Input`], [`Converter`]
//!   or [`Output`]; [`AnyComponent`] tags them for registration.
//! - **Priority preemption**: a higher-priority record clears lower-priority
//!   records still queued and wakes an output waiting on one.
//! - **Scheduled delivery**: records carrying a time are queued shortly
//!   before they are due and dispatched on time, or counted as late.
//! - **Failure isolation**: a permanent component failure removes only that
//!   component from the run; a temporary one skips one record.
//! - **Owned pipeline**: a [`Pipeline`] is an ordinary value owned by its
//!   caller; an [`AbortHandle`] cancels a run from another thread.

pub mod component;
pub mod converter_engine;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod id;
pub mod queue;
pub mod schedule;
pub mod worker;

pub use component::{
    AnyComponent, Component, ComponentKind, Converter, Input, Output, ReadOutcome, Slot,
    SlotStatus,
};
pub use converter_engine::{ConverterEngine, CycleGuard, MAX_CONVERSION_DEPTH};
pub use error::{
    ComponentError, ComponentResult, PipelineError, PipelineResult, QueueError,
};
pub use executor::{AbortHandle, ComponentInfo, Pipeline, PipelineBuilder, PipelineState};
pub use feedback::{Feedback, FeedbackSnapshot, MAX_KEPT_ERRORS};
pub use id::ComponentId;
pub use queue::{GetOutcome, PutOutcome, RecordQueue};
pub use schedule::{dispatch_timing, enqueue_delay, DispatchTiming};
