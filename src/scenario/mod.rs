//! Canned fault-injection scenarios.
//!
//! Each scenario drives one [`PartitionRegistry`] through a topology change
//! (split, node loss, reshard, replica increase) and asserts what the cluster
//! reports afterwards. The `cluster-harness` binary runs the one named in
//! [`crate::ScenarioConfig`].

mod failover;
mod netsplit;
mod replicas;
mod reshard;

pub use failover::failover;
pub use netsplit::netsplit;
pub use replicas::replicas;
pub use reshard::reshard;

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::error;
use tracing::info;

use crate::control_plane::ControlPlaneClient;
use crate::control_plane::ConvergenceGoal;
use crate::control_plane::DatacenterId;
use crate::partition::GroupId;
use crate::partition::PartitionRegistry;
use crate::partition::ProcessId;
use crate::workload::PhasedWorkload;
use crate::workload::WorkloadSpec;
use crate::HarnessConfig;
use crate::Result;
use crate::ScenarioKind;
use crate::WorkloadMode;


const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Steps a scenario went through, in order.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: ScenarioKind,
    pub steps: Vec<StepRecord>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    /// Milliseconds since the scenario started
    pub at_ms: u64,
}

/// Phase-labelled progress of one scenario.
pub struct StepLog {
    scenario: ScenarioKind,
    started: Instant,
    steps: Vec<StepRecord>,
}

impl StepLog {
    pub fn new(scenario: ScenarioKind) -> Self {
        Self {
            scenario,
            started: Instant::now(),
            steps: Vec::new(),
        }
    }

    pub fn step(
        &mut self,
        step: impl Into<String>,
    ) {
        let step = step.into();
        let at_ms = self.started.elapsed().as_millis() as u64;
        info!(scenario = ?self.scenario, n = self.steps.len() + 1, "{}", step);
        self.steps.push(StepRecord { step, at_ms });
    }

    pub fn finish(self) -> ScenarioReport {
        ScenarioReport {
            scenario: self.scenario,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            steps: self.steps,
        }
    }
}

/// Runs the configured scenario against a fresh registry.
///
/// The registry is shut down whatever the outcome; the scenario's own error
/// wins over a teardown error.
pub async fn run(config: &HarnessConfig) -> Result<ScenarioReport> {
    config.scenario.validate()?;
    let mut registry = PartitionRegistry::new(config)?;
    let monitor = registry.spawn_health_monitor(HEALTH_CHECK_INTERVAL);
    let mut log = StepLog::new(config.scenario.name);

    let outcome = match config.scenario.name {
        ScenarioKind::Netsplit => netsplit(&mut registry, config, &mut log).await,
        ScenarioKind::Failover => failover(&mut registry, config, &mut log).await,
        ScenarioKind::Reshard => reshard(&mut registry, config, &mut log).await,
        ScenarioKind::Replicas => replicas(&mut registry, config, &mut log).await,
    };

    let crashed = monitor.stop().await;
    let shutdown = registry.shutdown().await;
    if let Err(e) = &outcome {
        error!("scenario {:?} failed: {}", config.scenario.name, e);
    }
    outcome?;
    crashed?;
    shutdown?;
    Ok(log.finish())
}

/// Waits until every member in `ids` reports a directory of `expected`.
pub async fn wait_directory_size(
    registry: &PartitionRegistry,
    ids: &[ProcessId],
    expected: usize,
) -> Result<()> {
    for id in ids {
        registry.control_plane(*id)?.wait_for(ConvergenceGoal::DirectorySize(expected)).await?;
    }
    Ok(())
}

/// Creates `name` and moves every process in `ids` into it.
pub async fn datacenter_of(
    registry: &PartitionRegistry,
    client: &ControlPlaneClient,
    name: &str,
    ids: &[ProcessId],
) -> Result<DatacenterId> {
    let datacenter = client.create_datacenter(name).await?;
    for id in ids {
        let node = client.node_id_by_name(registry.process(*id)?.name()).await?;
        client.assign_to_datacenter(&node, &datacenter).await?;
    }
    Ok(datacenter)
}

/// The configured workload aimed at `group`, if a command is configured.
pub fn workload_for(
    registry: &PartitionRegistry,
    config: &HarnessConfig,
    group: GroupId,
    mode: WorkloadMode,
) -> Result<Option<PhasedWorkload>> {
    let Some(command) = &config.scenario.workload_command else {
        return Ok(None);
    };
    let spec = WorkloadSpec::new("workload", command.clone(), registry.workload_target(group)?);
    Ok(Some(PhasedWorkload::new(
        mode,
        spec,
        config.workload.clone(),
        registry.log_dir().to_path_buf(),
        registry.teardown_token(),
    )))
}
