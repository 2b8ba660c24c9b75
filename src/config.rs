//! Client and transport configuration.

use crate::events::DEFAULT_EVENT_BUFFER;
use crate::protocol::PROTOCOL_VERSION;
use serde::Deserialize;
use std::time::Duration;

/// Default idle threshold for the watchdog.
pub const DEFAULT_LAST_DATA_TIMEOUT: Duration = Duration::from_secs(120);

/// Client configuration.
///
/// Deserializes from the camelCase options object callers usually hold,
/// e.g. `{"paranoid": true, "lastDataTimeout": 30000}`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Watch for a silent connection and proactively replace it.
    pub paranoid: bool,

    /// How long without inbound data counts as idle.
    /// Default: 120s
    #[serde(with = "millis")]
    pub last_data_timeout: Duration,

    /// Version sent in the `connect` handshake.
    pub protocol_version: String,

    /// Max buffered events per listener before it is dropped.
    /// Default: 1000
    pub event_buffer_size: usize,

    /// Backoff handed to the transport.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            paranoid: false,
            last_data_timeout: DEFAULT_LAST_DATA_TIMEOUT,
            protocol_version: PROTOCOL_VERSION.to_string(),
            event_buffer_size: DEFAULT_EVENT_BUFFER,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Config with the idle watchdog enabled at `timeout`.
    pub fn paranoid(timeout: Duration) -> Self {
        Self {
            paranoid: true,
            last_data_timeout: timeout,
            ..Default::default()
        }
    }

    /// The idle threshold, when the watchdog is enabled. A zero
    /// `last_data_timeout` means the default.
    pub fn idle_timeout(&self) -> Option<Duration> {
        if !self.paranoid {
            return None;
        }
        if self.last_data_timeout.is_zero() {
            Some(DEFAULT_LAST_DATA_TIMEOUT)
        } else {
            Some(self.last_data_timeout)
        }
    }
}

/// Reconnect backoff. Owned and applied by the transport; the client only
/// passes it through when opening a connection.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// First retry delay.
    #[serde(with = "millis")]
    pub min: Duration,

    /// Upper bound on a single delay (None = unbounded).
    #[serde(with = "opt_millis")]
    pub max: Option<Duration>,

    /// Attempts before giving up.
    pub retries: u32,

    /// Growth per attempt.
    pub factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: None,
            retries: 10,
            factor: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry `attempt` (0-based), or None once retries are spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.retries {
            return None;
        }

        let scale = self.factor.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.min.as_secs_f64() * scale;
        let delay = if secs.is_finite() && secs < u64::MAX as f64 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::MAX
        };

        Some(match self.max {
            Some(max) => delay.min(max),
            None => delay,
        })
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
