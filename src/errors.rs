//! Harness Error Hierarchy
//!
//! Every failure the harness can raise surfaces through [`Error`]. Nothing here is
//! retried implicitly: the only condition handled locally is a pending predicate
//! inside the poll loop (see [`crate::utils::poll`]).

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

use crate::control_plane::Issue;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Server process supervision failures
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Administrative interface failures
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    /// Workload generator failures
    #[error(transparent)]
    Workload(#[from] WorkloadError),

    /// A poll-until-converged wait ran out of budget
    #[error("Convergence on {goal} timed out after {waited:?} ({attempts} polls); last observed: {last_observed}")]
    ConvergenceTimeout {
        goal: String,
        waited: Duration,
        attempts: u32,
        last_observed: String,
    },

    /// Harness contract violation, e.g. operating on a process that is not ready
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A result did not match what the test asserted
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// The control plane reported issues the test did not expect
    #[error("Unexpected issues: {}", format_issues(.0))]
    UnexpectedIssues(Vec<Issue>),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The server binary could not be spawned
    #[error("Failed to launch {binary:?} for node {name}: {source}")]
    Launch {
        name: String,
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Readiness was not reached within the allowed time
    #[error("Node {name} not ready after {waited:?}; last state: {last_state}")]
    StartupTimeout {
        name: String,
        waited: Duration,
        last_state: String,
    },

    /// The process exited without being asked to
    #[error("Node {name} exited unexpectedly ({status})\n--- captured output ---\n{output}")]
    Crashed {
        name: String,
        status: String,
        output: String,
    },

    /// Delivering a signal to the process failed
    #[error("Failed to signal node {name}: {source}")]
    Signal {
        name: String,
        #[source]
        source: nix::errno::Errno,
    },

    /// Another live process already owns the data directory
    #[error("Data directory {0:?} is already owned by a running process")]
    DataDirInUse(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// Transport-level failure talking to the admin endpoint
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The admin endpoint answered with a non-success status
    #[error("Request to {url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    /// The response document could not be decoded
    #[error("Malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// A topology mutation would break a placement invariant
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown datacenter: {0}")]
    UnknownDatacenter(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    /// The workload command could not be spawned
    #[error("Failed to launch workload {name} ({phase}): {source}")]
    Launch {
        name: String,
        phase: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit: a correctness violation or an availability gap
    #[error("Workload {name} failed in phase {phase} ({status}); see {log:?}")]
    Failed {
        name: String,
        phase: String,
        status: String,
        log: PathBuf,
    },

    /// The workload did not finish in time and was killed
    #[error("Workload {name} timed out in phase {phase} after {waited:?}; see {log:?}")]
    Timeout {
        name: String,
        phase: String,
        waited: Duration,
        log: PathBuf,
    },

    #[error("Workload {0} is not running")]
    NotRunning(String),

    #[error("Workload {0} is already running")]
    AlreadyRunning(String),
}

impl Error {
    /// True for every bounded wait that ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::ConvergenceTimeout { .. }
                | Error::Process(ProcessError::StartupTimeout { .. })
                | Error::Workload(WorkloadError::Timeout { .. })
        )
    }
}

fn format_issues(issues: &[Issue]) -> String {
    issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ")
}
