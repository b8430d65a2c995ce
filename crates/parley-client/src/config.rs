//! Messenger configuration.

use std::time::Duration;

/// Default interval between remote feed polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(8);

/// Default capacity of the session event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Runtime settings for a [`crate::Messenger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessengerConfig {
    /// Interval between poll cycles of an open conversation
    pub poll_interval: Duration,
    /// Events buffered per subscriber before the slowest one starts lagging
    pub event_capacity: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self { poll_interval: DEFAULT_POLL_INTERVAL, event_capacity: DEFAULT_EVENT_CAPACITY }
    }
}
