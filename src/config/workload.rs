use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use nix::sys::signal::Signal;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Defaults shared by every workload run
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkloadConfig {
    /// Interpreter invoked as `<shell> -c <command>`
    #[serde(default = "default_shell")]
    pub shell: PathBuf,

    /// Upper bound of one split phase, or of a continuous run's final join
    #[serde(default = "default_phase_timeout_ms")]
    pub phase_timeout_ms: u64,

    /// Bounded wait after the stop signal before the workload is killed
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Signal asking a continuous workload to wind down, e.g. `SIGINT`
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Exported as `WORKLOAD_DURATION_SECS` when set
    #[serde(default)]
    pub duration_secs: Option<u64>,

    /// Exported as `WORKLOAD_OPS` when set
    #[serde(default)]
    pub ops: Option<u64>,

    /// Extra environment handed to every workload
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            phase_timeout_ms: default_phase_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            stop_signal: default_stop_signal(),
            duration_secs: None,
            ops: None,
            env: BTreeMap::new(),
        }
    }
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.phase_timeout_ms == 0 || self.stop_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "workload.phase_timeout_ms and workload.stop_timeout_ms must be > 0".into(),
            ));
        }
        self.stop_signal()?;
        Ok(())
    }

    pub fn stop_signal(&self) -> Result<Signal> {
        Signal::from_str(&self.stop_signal).map_err(|_| {
            Error::InvalidConfig(format!("workload.stop_signal {} is not a signal", self.stop_signal))
        })
    }
}

fn default_shell() -> PathBuf {
    PathBuf::from("/bin/sh")
}
fn default_phase_timeout_ms() -> u64 {
    300_000
}
fn default_stop_timeout_ms() -> u64 {
    30_000
}
fn default_stop_signal() -> String {
    "SIGINT".to_string()
}
