use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::utils::net::http_base_url;
use crate::utils::poll::PollPolicy;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControlPlaneConfig {
    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Admin URL template for when the admin port is reached through a
    /// forwarder. `{host}`, `{port}` and `{name}` are substituted per member;
    /// unset means `http://{host}:{port}`.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub convergence: ConvergenceConfig,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            endpoint: None,
            convergence: ConvergenceConfig::default(),
        }
    }
}

impl ControlPlaneConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "control_plane.request_timeout_ms must be > 0".into(),
            ));
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(Error::InvalidConfig(format!(
                    "control_plane.endpoint {endpoint} must be an http(s) URL"
                )));
            }
        }
        self.convergence.validate()
    }

    /// Admin base URL of the member `name` serving HTTP on `host:port`.
    pub fn endpoint_url(
        &self,
        host: &str,
        port: u16,
        name: &str,
    ) -> String {
        match &self.endpoint {
            Some(template) => template
                .replace("{host}", host)
                .replace("{port}", &port.to_string())
                .replace("{name}", name),
            None => http_base_url(host, port),
        }
    }
}

/// Thresholds of every convergence wait
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConvergenceConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Consecutive satisfied polls required before a goal counts as reached
    #[serde(default = "default_settle_polls")]
    pub settle_polls: u32,

    /// Issue types (e.g. `VCLOCK_CONFLICT`) ignored by the no-issues goal and
    /// by `assert_no_issues`
    #[serde(default)]
    pub tolerated_issues: Vec<String>,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            settle_polls: default_settle_polls(),
            tolerated_issues: Vec::new(),
        }
    }
}

impl ConvergenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "convergence.poll_interval_ms cannot be 0".into(),
            ));
        }
        if self.poll_interval_ms >= self.timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "convergence.poll_interval_ms {}ms should be less than timeout_ms {}ms",
                self.poll_interval_ms, self.timeout_ms
            )));
        }
        if self.settle_polls == 0 {
            return Err(Error::InvalidConfig(
                "convergence.settle_polls must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.timeout_ms),
        )
        .with_settle(self.settle_polls)
    }
}

fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_settle_polls() -> u32 {
    1
}
