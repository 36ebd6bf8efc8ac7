//! Contracts for the pluggable pipeline components.
//!
//! Three capabilities exist:
//! - **[`Input`]**: produces records.
//! - **[`Converter`]**: expands one record into zero or more records.
//! - **[`Output`]**: consumes records.
//!
//! All three share the [`Component`] lifecycle (`configure` → `init` → `close`).
//! [`AnyComponent`] is the closed wrapper used when registering components so
//! callers can branch on [`ComponentKind`] without downcasting.

use crate::data::Record;
use crate::pipeline::error::{ComponentError, ComponentResult};
use crate::pipeline::id::ComponentId;

/// Lifecycle shared by every component. All hooks default to no-ops.
pub trait Component: Send {
    /// Human-readable name used in logs and feedback.
    fn name(&self) -> &str;

    /// Validate settings. A failure excludes the component from runs.
    fn configure(&mut self) -> ComponentResult<()> {
        Ok(())
    }

    /// Acquire resources before a run.
    fn init(&mut self) -> ComponentResult<()> {
        Ok(())
    }

    /// Release resources after a run or after a permanent failure.
    fn close(&mut self) -> ComponentResult<()> {
        Ok(())
    }
}

/// Result of a successful [`Input::read_data`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Record(Record),
    /// The input has no more data; the pipeline moves on to the next input.
    EndOfInput,
}

pub trait Input: Component {
    /// Whether the input can still produce data. `false` advances the
    /// pipeline to the next input.
    fn can_read_data(&mut self) -> bool {
        true
    }

    fn read_data(&mut self) -> ComponentResult<ReadOutcome>;
}

pub trait Converter: Component {
    fn can_handle(&self, record: &Record) -> bool;

    fn convert(&mut self, record: &Record) -> ComponentResult<Vec<Record>>;
}

pub trait Output: Component {
    /// Write one record. `Ok(false)` means the output did not accept it.
    fn write(&mut self, record: &Record) -> ComponentResult<bool>;
}

/// Capability tag of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Input,
    Converter,
    Output,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::Input => write!(f, "input"),
            ComponentKind::Converter => write!(f, "converter"),
            ComponentKind::Output => write!(f, "output"),
        }
    }
}

/// Wrapper that holds any one of the three component kinds.
pub enum AnyComponent {
    Input(Box<dyn Input>),
    Converter(Box<dyn Converter>),
    Output(Box<dyn Output>),
}

impl AnyComponent {
    pub fn kind(&self) -> ComponentKind {
        match self {
            AnyComponent::Input(_) => ComponentKind::Input,
            AnyComponent::Converter(_) => ComponentKind::Converter,
            AnyComponent::Output(_) => ComponentKind::Output,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AnyComponent::Input(c) => c.name(),
            AnyComponent::Converter(c) => c.name(),
            AnyComponent::Output(c) => c.name(),
        }
    }
}

impl std::fmt::Debug for AnyComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyComponent")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

/// Availability of a registered component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Ready,
    /// `configure` failed; skipped until reconfigured.
    Unconfigured(String),
    /// Failed permanently during the current run.
    Failed(String),
}

/// A registered component plus its bookkeeping.
pub struct Slot<C: ?Sized> {
    pub id: ComponentId,
    pub component: Box<C>,
    pub status: SlotStatus,
}

impl<C: Component + ?Sized> Slot<C> {
    pub fn new(id: ComponentId, component: Box<C>) -> Self {
        Self {
            id,
            component,
            status: SlotStatus::Ready,
        }
    }

    #[inline]
    pub fn is_usable(&self) -> bool {
        self.status == SlotStatus::Ready
    }

    pub fn name(&self) -> &str {
        self.component.name()
    }

    /// Mark the component permanently failed and release its resources.
    pub fn fail(&mut self, reason: &ComponentError) {
        if let Err(e) = self.component.close() {
            tracing::warn!(
                component = %self.id,
                name = self.component.name(),
                "Close after failure also failed: {}",
                e
            );
        }
        self.status = SlotStatus::Failed(reason.message().to_string());
    }

    pub(crate) fn configure(&mut self) {
        self.status = match self.component.configure() {
            Ok(()) => SlotStatus::Ready,
            Err(e) => {
                tracing::warn!(
                    component = %self.id,
                    name = self.component.name(),
                    "Configuration failed: {}",
                    e
                );
                SlotStatus::Unconfigured(e.message().to_string())
            }
        };
    }

    /// Reopen for a new run. Configuration failures stay in place.
    pub(crate) fn init(&mut self) -> ComponentResult<()> {
        if matches!(self.status, SlotStatus::Unconfigured(_)) {
            return Ok(());
        }
        match self.component.init() {
            Ok(()) => {
                self.status = SlotStatus::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    component = %self.id,
                    name = self.component.name(),
                    "Initialization failed: {}",
                    e
                );
                self.status = SlotStatus::Failed(e.message().to_string());
                Err(e)
            }
        }
    }

    /// Close a component that is still open after a run.
    pub(crate) fn shutdown(&mut self) {
        if !self.is_usable() {
            return;
        }
        if let Err(e) = self.component.close() {
            tracing::warn!(
                component = %self.id,
                name = self.component.name(),
                "Close failed: {}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        closed: usize,
        fail_configure: bool,
    }

    impl Component for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn configure(&mut self) -> ComponentResult<()> {
            if self.fail_configure {
                Err(ComponentError::permanent("bad settings"))
            } else {
                Ok(())
            }
        }

        fn close(&mut self) -> ComponentResult<()> {
            self.closed += 1;
            Ok(())
        }
    }

    impl Output for Recorder {
        fn write(&mut self, _record: &Record) -> ComponentResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_any_component_kind() {
        let c = AnyComponent::Output(Box::new(Recorder {
            closed: 0,
            fail_configure: false,
        }));
        assert_eq!(c.kind(), ComponentKind::Output);
        assert_eq!(c.name(), "recorder");
    }

    #[test]
    fn test_fail_closes_once() {
        let mut slot = Slot::new(
            ComponentId(0),
            Box::new(Recorder {
                closed: 0,
                fail_configure: false,
            }),
        );
        slot.fail(&ComponentError::permanent("gone"));
        assert!(!slot.is_usable());
        assert_eq!(slot.component.closed, 1);
        // already closed, shutdown skips it
        slot.shutdown();
        assert_eq!(slot.component.closed, 1);
        // a new run reopens it
        slot.init().unwrap();
        assert!(slot.is_usable());
    }

    #[test]
    fn test_configure_failure_sticks() {
        let mut slot = Slot::new(
            ComponentId(1),
            Box::new(Recorder {
                closed: 0,
                fail_configure: true,
            }),
        );
        slot.configure();
        assert!(matches!(slot.status, SlotStatus::Unconfigured(_)));
        slot.init().unwrap();
        assert!(!slot.is_usable());
    }
}
