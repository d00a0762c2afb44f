use std::collections::BTreeMap;

use super::datacenter_of;
use super::wait_directory_size;
use super::workload_for;
use super::StepLog;
use crate::control_plane::ConvergenceGoal;
use crate::control_plane::MutationOutcome;
use crate::control_plane::Placement;
use crate::partition::PartitionRegistry;
use crate::Error;
use crate::HarnessConfig;
use crate::Result;
use crate::WorkloadMode;

const NODES: usize = 3;

/// Runs a split-mode workload around a replica increase from 1 to 3.
///
/// The increase is applied twice; the second call must change nothing and
/// the cluster must be free of issues afterwards.
pub async fn replicas(
    registry: &mut PartitionRegistry,
    config: &HarnessConfig,
    log: &mut StepLog,
) -> Result<()> {
    log.step(format!("starting {NODES} node(s)"));
    let group = registry.create_group("main");
    let ids = registry.spawn_processes(group, NODES, "node").await?;
    wait_directory_size(registry, &ids, NODES).await?;

    let client = registry.control_plane(ids[0])?;
    let datacenter = datacenter_of(registry, &client, "primary", &ids).await?;
    let table = client
        .create_table(&config.scenario.table, Placement::new(datacenter.clone()))
        .await?;
    client.wait_for(ConvergenceGoal::ReadyForWrites(table.clone())).await?;

    let mut workload = workload_for(registry, config, group, WorkloadMode::Split)?
        .ok_or_else(|| Error::InvalidConfig("replicas scenario needs a workload".into()))?;
    log.step("workload: before");
    workload.run_before().await?;

    log.step(format!("raising replicas to {NODES}"));
    let mut affinities = BTreeMap::new();
    affinities.insert(datacenter.clone(), NODES as u32);
    client.set_replica_affinities(&table, datacenter.clone(), affinities.clone()).await?;
    let again = client.set_replica_affinities(&table, datacenter, affinities).await?;
    if again != MutationOutcome::Unchanged {
        return Err(Error::Assertion(
            "repeating an identical replica change must not mutate again".into(),
        ));
    }

    client.wait_for(ConvergenceGoal::AllReplicasReady(table.clone())).await?;
    client.wait_for(ConvergenceGoal::NoIssues).await?;
    client.assert_no_issues().await?;
    registry.check_all()?;

    log.step("workload: after");
    workload.run_after().await?;
    log.step("replicas raised");
    Ok(())
}
