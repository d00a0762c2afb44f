use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Split N nodes into k / N-k, then heal
    #[default]
    Netsplit,
    /// Kill one of two replicas and declare it dead
    Failover,
    /// Reshard 1 -> 2 -> 1 and compare record counts
    Reshard,
    /// Split-mode workload across a replica increase 1 -> 3
    Replicas,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadMode {
    Continuous,
    #[default]
    Split,
}

/// Selects and parameterizes the scenario run by the binary
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub name: ScenarioKind,

    /// Cluster size for the netsplit scenario
    #[serde(default = "default_nodes")]
    pub nodes: usize,

    /// Number of nodes moved to the second side of the split
    #[serde(default = "default_split_at")]
    pub split_at: usize,

    #[serde(default = "default_table")]
    pub table: String,

    /// Shell command run as the workload; scenarios without one skip workload phases
    #[serde(default)]
    pub workload_command: Option<String>,

    #[serde(default)]
    pub workload_mode: WorkloadMode,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: ScenarioKind::default(),
            nodes: default_nodes(),
            split_at: default_split_at(),
            table: default_table(),
            workload_command: None,
            workload_mode: WorkloadMode::default(),
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nodes < 2 {
            return Err(Error::InvalidConfig(format!(
                "scenario.nodes must be at least 2, got {}",
                self.nodes
            )));
        }
        if self.split_at == 0 || self.split_at >= self.nodes {
            return Err(Error::InvalidConfig(format!(
                "scenario.split_at must be in 1..{}, got {}",
                self.nodes, self.split_at
            )));
        }
        if self.table.is_empty() {
            return Err(Error::InvalidConfig("scenario.table cannot be empty".into()));
        }
        if self.name == ScenarioKind::Replicas && self.workload_command.is_none() {
            return Err(Error::InvalidConfig(
                "scenario.workload_command is required by the replicas scenario".into(),
            ));
        }
        Ok(())
    }
}

fn default_nodes() -> usize {
    3
}
fn default_split_at() -> usize {
    1
}
fn default_table() -> String {
    "test".to_string()
}
