//! Components bridging a pipeline to other threads over crossbeam channels.

use crate::data::Record;
use crate::pipeline::{Component, ComponentError, ComponentResult, Input, Output, ReadOutcome};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::{Duration, Instant};

/// Polling step while waiting for records
const RECV_POLL: Duration = Duration::from_millis(50);

/// Reads records sent from another thread.
///
/// The input ends once every sender is dropped, or after `idle_timeout`
/// without a record when one is set.
pub struct ChannelInput {
    name: String,
    receiver: Receiver<Record>,
    idle_timeout: Option<Duration>,
}

impl ChannelInput {
    pub fn new(receiver: Receiver<Record>) -> Self {
        Self {
            name: "channel".to_string(),
            receiver,
            idle_timeout: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

impl Component for ChannelInput {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Input for ChannelInput {
    fn read_data(&mut self) -> ComponentResult<ReadOutcome> {
        let started = Instant::now();
        loop {
            match self.receiver.recv_timeout(RECV_POLL) {
                Ok(record) => return Ok(ReadOutcome::Record(record)),
                Err(RecvTimeoutError::Disconnected) => return Ok(ReadOutcome::EndOfInput),
                Err(RecvTimeoutError::Timeout) => {
                    if self.idle_timeout.is_some_and(|t| started.elapsed() >= t) {
                        tracing::debug!(name = %self.name, "Channel input idle, ending");
                        return Ok(ReadOutcome::EndOfInput);
                    }
                }
            }
        }
    }
}

/// Sends every written record to a channel.
///
/// A full bounded channel rejects the record (`Ok(false)`); a channel
/// without receivers fails the output permanently.
pub struct ChannelOutput {
    name: String,
    sender: Sender<Record>,
}

impl ChannelOutput {
    pub fn new(sender: Sender<Record>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Component for ChannelOutput {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Output for ChannelOutput {
    fn write(&mut self, record: &Record) -> ComponentResult<bool> {
        match self.sender.try_send(record.clone()) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => {
                Err(ComponentError::permanent("channel receiver dropped"))
            }
        }
    }
}
