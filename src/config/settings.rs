//! Bounded pipeline tuning settings
//!
//! The scheduler constants are exposed as named integer settings so a
//! configuration file or the command line can adjust them. Every setting has
//! a default and an inclusive range; an out-of-range value is replaced by the
//! default rather than clamped.
//!
//! | name | default | bounds |
//! |---|---|---|
//! | `overhead_reduction_ms` | 30 | 0..=1000 |
//! | `output_init_overhead_ms` | 5 | 0..=500 |
//! | `max_behind_ms` | 300 | 1..=60000 |
//! | `output_poll_ms` | 50 | 1..=1000 |
//! | `queue_initial_capacity` | 16 | 2..=65536 |

use crate::error::{PipeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static description of one setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub default: u64,
    pub min: u64,
    pub max: u64,
}

impl SettingDescriptor {
    pub fn contains(&self, value: i64) -> bool {
        value >= self.min as i64 && value <= self.max as i64
    }

    /// `value` if in range, the default otherwise.
    pub fn sanitize(&self, value: i64) -> u64 {
        if self.contains(value) {
            value as u64
        } else {
            tracing::warn!(
                setting = self.name,
                value,
                default = self.default,
                "Setting out of range [{}, {}], using default",
                self.min,
                self.max
            );
            self.default
        }
    }
}

pub const OVERHEAD_REDUCTION_MS: &str = "overhead_reduction_ms";
pub const OUTPUT_INIT_OVERHEAD_MS: &str = "output_init_overhead_ms";
pub const MAX_BEHIND_MS: &str = "max_behind_ms";
pub const OUTPUT_POLL_MS: &str = "output_poll_ms";
pub const QUEUE_INITIAL_CAPACITY: &str = "queue_initial_capacity";

/// All settings in display order.
pub const SETTINGS: &[SettingDescriptor] = &[
    SettingDescriptor {
        name: OVERHEAD_REDUCTION_MS,
        description: "How early a scheduled record is queued ahead of its due time",
        default: 30,
        min: 0,
        max: 1000,
    },
    SettingDescriptor {
        name: OUTPUT_INIT_OVERHEAD_MS,
        description: "Dispatch latency subtracted before the output waits for a record",
        default: 5,
        min: 0,
        max: 500,
    },
    SettingDescriptor {
        name: MAX_BEHIND_MS,
        description: "Lateness above which a dispatch counts as significantly late",
        default: 300,
        min: 1,
        max: 60_000,
    },
    SettingDescriptor {
        name: OUTPUT_POLL_MS,
        description: "Upper bound of one output-thread queue wait",
        default: 50,
        min: 1,
        max: 1000,
    },
    SettingDescriptor {
        name: QUEUE_INITIAL_CAPACITY,
        description: "Slots allocated by the record queue before it grows",
        default: 16,
        min: 2,
        max: 65_536,
    },
];

/// Look up a setting by name.
pub fn descriptor(name: &str) -> Option<&'static SettingDescriptor> {
    SETTINGS.iter().find(|d| d.name == name)
}

fn default_of(name: &str) -> u64 {
    descriptor(name).map(|d| d.default).unwrap_or_default()
}

/// Result of [`PipelineSettings::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingUpdate {
    Applied(u64),
    /// The requested value was out of range; the default was stored instead.
    FellBack { requested: i64, default: u64 },
}

/// Scheduler and queue tuning, always within bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPipelineSettings")]
pub struct PipelineSettings {
    overhead_reduction_ms: u64,
    output_init_overhead_ms: u64,
    max_behind_ms: u64,
    output_poll_ms: u64,
    queue_initial_capacity: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            overhead_reduction_ms: default_of(OVERHEAD_REDUCTION_MS),
            output_init_overhead_ms: default_of(OUTPUT_INIT_OVERHEAD_MS),
            max_behind_ms: default_of(MAX_BEHIND_MS),
            output_poll_ms: default_of(OUTPUT_POLL_MS),
            queue_initial_capacity: default_of(QUEUE_INITIAL_CAPACITY),
        }
    }
}

impl PipelineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut u64> {
        match name {
            OVERHEAD_REDUCTION_MS => Some(&mut self.overhead_reduction_ms),
            OUTPUT_INIT_OVERHEAD_MS => Some(&mut self.output_init_overhead_ms),
            MAX_BEHIND_MS => Some(&mut self.max_behind_ms),
            OUTPUT_POLL_MS => Some(&mut self.output_poll_ms),
            QUEUE_INITIAL_CAPACITY => Some(&mut self.queue_initial_capacity),
            _ => None,
        }
    }

    /// Current value of a named setting.
    pub fn get(&self, name: &str) -> Option<u64> {
        match name {
            OVERHEAD_REDUCTION_MS => Some(self.overhead_reduction_ms),
            OUTPUT_INIT_OVERHEAD_MS => Some(self.output_init_overhead_ms),
            MAX_BEHIND_MS => Some(self.max_behind_ms),
            OUTPUT_POLL_MS => Some(self.output_poll_ms),
            QUEUE_INITIAL_CAPACITY => Some(self.queue_initial_capacity),
            _ => None,
        }
    }

    /// Set a named setting. Out-of-range values store the default.
    pub fn set(&mut self, name: &str, value: i64) -> Result<SettingUpdate> {
        let desc = descriptor(name)
            .ok_or_else(|| PipeError::Config(format!("Unknown setting '{}'", name)))?;
        let stored = desc.sanitize(value);
        if let Some(field) = self.field_mut(name) {
            *field = stored;
        }
        if desc.contains(value) {
            Ok(SettingUpdate::Applied(stored))
        } else {
            Ok(SettingUpdate::FellBack {
                requested: value,
                default: stored,
            })
        }
    }

    /// Builder-style [`set`](Self::set) that ignores the outcome.
    pub fn with(mut self, name: &str, value: i64) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// `(descriptor, current value)` for every setting.
    pub fn entries(&self) -> Vec<(&'static SettingDescriptor, u64)> {
        SETTINGS
            .iter()
            .map(|d| (d, self.get(d.name).unwrap_or(d.default)))
            .collect()
    }

    pub fn overhead_reduction(&self) -> Duration {
        Duration::from_millis(self.overhead_reduction_ms)
    }

    pub fn output_init_overhead(&self) -> Duration {
        Duration::from_millis(self.output_init_overhead_ms)
    }

    pub fn max_behind(&self) -> Duration {
        Duration::from_millis(self.max_behind_ms)
    }

    pub fn output_poll(&self) -> Duration {
        Duration::from_millis(self.output_poll_ms)
    }

    pub fn queue_initial_capacity(&self) -> usize {
        self.queue_initial_capacity as usize
    }
}

/// Unchecked on-disk form; every field is optional and may be out of range.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPipelineSettings {
    overhead_reduction_ms: Option<i64>,
    output_init_overhead_ms: Option<i64>,
    max_behind_ms: Option<i64>,
    output_poll_ms: Option<i64>,
    queue_initial_capacity: Option<i64>,
}

impl From<RawPipelineSettings> for PipelineSettings {
    fn from(raw: RawPipelineSettings) -> Self {
        let pick = |name: &str, value: Option<i64>| match (descriptor(name), value) {
            (Some(desc), Some(v)) => desc.sanitize(v),
            _ => default_of(name),
        };
        Self {
            overhead_reduction_ms: pick(OVERHEAD_REDUCTION_MS, raw.overhead_reduction_ms),
            output_init_overhead_ms: pick(OUTPUT_INIT_OVERHEAD_MS, raw.output_init_overhead_ms),
            max_behind_ms: pick(MAX_BEHIND_MS, raw.max_behind_ms),
            output_poll_ms: pick(OUTPUT_POLL_MS, raw.output_poll_ms),
            queue_initial_capacity: pick(QUEUE_INITIAL_CAPACITY, raw.queue_initial_capacity),
        }
    }
}
