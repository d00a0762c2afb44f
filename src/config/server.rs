use std::path::PathBuf;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::node::ServeOptions;
use crate::Error;
use crate::Result;

/// How ports are chosen for identities created without explicit ports.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PortMode {
    /// Harness picks free local ports right before launch
    #[default]
    Ephemeral,
    /// Server binds port 0 and reports the real ports in its log
    Reported,
}

/// Launch contract and supervision timings of server processes
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server executable
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Arguments placed before the subcommand, e.g. a script path for an interpreter
    #[serde(default)]
    pub binary_args: Vec<String>,

    /// Subcommand placed before the flags, if the binary needs one
    #[serde(default = "default_subcommand")]
    pub subcommand: Option<String>,

    #[serde(default)]
    pub port_mode: PortMode,

    /// Per-process knobs applied when a caller does not pass its own
    #[serde(default)]
    pub serve: ServeOptions,

    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    #[serde(default = "default_ready_poll_interval_ms")]
    pub ready_poll_interval_ms: u64,

    /// Time between SIGTERM and SIGKILL on a graceful stop
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Also require the admin port to accept TCP before a process counts as ready
    #[serde(default = "default_probe_admin_port")]
    pub probe_admin_port: bool,

    /// Line (substring) printed by the server once it serves requests
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,

    /// Regexes with one capture group holding the reported port
    #[serde(default = "default_cluster_port_pattern")]
    pub cluster_port_pattern: String,
    #[serde(default = "default_http_port_pattern")]
    pub http_port_pattern: String,
    #[serde(default = "default_driver_port_pattern")]
    pub driver_port_pattern: String,

    /// Captured output lines kept in memory for crash reports
    #[serde(default = "default_output_tail_lines")]
    pub output_tail_lines: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            binary_args: Vec::new(),
            subcommand: default_subcommand(),
            port_mode: PortMode::default(),
            serve: ServeOptions::default(),
            ready_timeout_ms: default_ready_timeout_ms(),
            ready_poll_interval_ms: default_ready_poll_interval_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            probe_admin_port: default_probe_admin_port(),
            ready_marker: default_ready_marker(),
            cluster_port_pattern: default_cluster_port_pattern(),
            http_port_pattern: default_http_port_pattern(),
            driver_port_pattern: default_driver_port_pattern(),
            output_tail_lines: default_output_tail_lines(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.binary.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("server.binary cannot be empty".into()));
        }
        if self.ready_timeout_ms == 0 || self.ready_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "server.ready_timeout_ms and server.ready_poll_interval_ms must be > 0".into(),
            ));
        }
        if self.ready_poll_interval_ms >= self.ready_timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "server.ready_poll_interval_ms {}ms should be less than ready_timeout_ms {}ms",
                self.ready_poll_interval_ms, self.ready_timeout_ms
            )));
        }
        if self.ready_marker.is_empty() {
            return Err(Error::InvalidConfig("server.ready_marker cannot be empty".into()));
        }
        if self.output_tail_lines == 0 {
            return Err(Error::InvalidConfig("server.output_tail_lines must be > 0".into()));
        }
        for (field, pattern) in [
            ("cluster_port_pattern", &self.cluster_port_pattern),
            ("http_port_pattern", &self.http_port_pattern),
            ("driver_port_pattern", &self.driver_port_pattern),
        ] {
            compile_port_pattern(field, pattern)?;
        }
        self.serve.validate()
    }
}

/// Compiles a port-report regex, requiring exactly one capture group.
pub(crate) fn compile_port_pattern(
    field: &str,
    pattern: &str,
) -> Result<Regex> {
    let re = Regex::new(pattern)
        .map_err(|e| Error::InvalidConfig(format!("server.{field} is not a valid regex: {e}")))?;
    if re.captures_len() != 2 {
        return Err(Error::InvalidConfig(format!(
            "server.{field} must contain exactly one capture group"
        )));
    }
    Ok(re)
}

fn default_binary() -> PathBuf {
    PathBuf::from("rethinkdb")
}
fn default_subcommand() -> Option<String> {
    Some("serve".to_string())
}
fn default_ready_timeout_ms() -> u64 {
    60_000
}
fn default_ready_poll_interval_ms() -> u64 {
    100
}
fn default_stop_grace_ms() -> u64 {
    10_000
}
fn default_probe_admin_port() -> bool {
    true
}
fn default_ready_marker() -> String {
    "Server ready".to_string()
}
fn default_cluster_port_pattern() -> String {
    r"Listening for intracluster connections on port (\d+)".to_string()
}
fn default_http_port_pattern() -> String {
    r"Listening for administrative HTTP connections on port (\d+)".to_string()
}
fn default_driver_port_pattern() -> String {
    r"Listening for client driver connections on port (\d+)".to_string()
}
fn default_output_tail_lines() -> usize {
    200
}
