use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (0 behaves as a single attempt)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig(format!(
                "retry.{name}.timeout_ms must be > 0"
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "retry.{name}.base_delay_ms {}ms exceeds max_delay_ms {}ms",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Divide strategies by the kind of harness-side I/O
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    /// Idempotent control-plane reads (directory, issues, status...)
    #[serde(default = "default_control_plane_read")]
    pub control_plane_read: BackoffPolicy,

    /// Upstream dials made by link relays while a server is still coming up
    #[serde(default = "default_relay_connect")]
    pub relay_connect: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            control_plane_read: default_control_plane_read(),
            relay_connect: default_relay_connect(),
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.control_plane_read.validate("control_plane_read")?;
        self.relay_connect.validate("relay_connect")?;
        Ok(())
    }
}

fn default_control_plane_read() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 5,
        timeout_ms: 2000,
        base_delay_ms: 100,
        max_delay_ms: 2000,
    }
}
fn default_relay_connect() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 3,
        timeout_ms: 1000,
        base_delay_ms: 50,
        max_delay_ms: 500,
    }
}
fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    100
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
