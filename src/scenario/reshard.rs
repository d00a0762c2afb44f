use parking_lot::Mutex;

use super::datacenter_of;
use super::wait_directory_size;
use super::workload_for;
use super::StepLog;
use crate::control_plane::ControlPlaneClient;
use crate::control_plane::ConvergenceGoal;
use crate::control_plane::Placement;
use crate::control_plane::TableId;
use crate::partition::PartitionRegistry;
use crate::poll::poll_until;
use crate::poll::Probe;
use crate::Error;
use crate::HarnessConfig;
use crate::Result;

const SPLIT_POINT: &str = "m";

/// Reshards a table 1 -> 2 -> 1 shards; the record count must survive.
pub async fn reshard(
    registry: &mut PartitionRegistry,
    config: &HarnessConfig,
    log: &mut StepLog,
) -> Result<()> {
    let nodes = config.scenario.nodes;
    log.step(format!("starting {nodes} node(s)"));
    let group = registry.create_group("main");
    let ids = registry.spawn_processes(group, nodes, "node").await?;
    wait_directory_size(registry, &ids, nodes).await?;

    let client = registry.control_plane(ids[0])?;
    let datacenter = datacenter_of(registry, &client, "primary", &ids).await?;
    let table = client.create_table(&config.scenario.table, Placement::new(datacenter)).await?;
    settle(&client, &table).await?;

    let mut workload = workload_for(registry, config, group, config.scenario.workload_mode)?;
    if let Some(w) = workload.as_mut() {
        log.step("workload: populate");
        w.run_before().await?;
    }
    let mut records = stable_record_count(&client, &table).await?;
    log.step(format!("{records} record(s) in 1 shard"));

    let split_point = vec![SPLIT_POINT.to_string()];
    client.change_shard_boundaries(&table, &split_point, &[]).await?;
    settle(&client, &table).await?;
    wait_record_count(&client, &table, records).await?;
    log.step(format!("resharded to 2 shards, {records} record(s) preserved"));
    if let Some(w) = workload.as_mut() {
        w.run_between().await?;
        records = stable_record_count(&client, &table).await?;
        log.step(format!("{records} record(s) in 2 shards"));
    }

    client.change_shard_boundaries(&table, &[], &split_point).await?;
    settle(&client, &table).await?;
    wait_record_count(&client, &table, records).await?;
    log.step(format!("resharded back to 1 shard, {records} record(s) preserved"));
    if let Some(w) = workload.as_mut() {
        w.run_after().await?;
    }

    client.assert_no_issues().await?;
    registry.check_all()?;
    Ok(())
}

async fn settle(
    client: &ControlPlaneClient,
    table: &TableId,
) -> Result<()> {
    client.wait_for(ConvergenceGoal::BlueprintSatisfied(table.clone())).await?;
    client.wait_for(ConvergenceGoal::ReadyForWrites(table.clone())).await
}

/// Record count once it reads the same on consecutive polls.
///
/// Counts lag behind writes, so a single read after a workload phase is not a
/// baseline.
async fn stable_record_count(
    client: &ControlPlaneClient,
    table: &TableId,
) -> Result<u64> {
    let previous = Mutex::new(None);
    let policy = client.poll_policy();
    poll_until(
        policy.with_settle(policy.settle.max(2)),
        || {
            let previous = &previous;
            async move {
                let total = client.get_distribution(table).await?.total();
                Ok(if previous.lock().replace(total) == Some(total) {
                    Probe::Ready(total)
                } else {
                    Probe::Pending(total)
                })
            }
        },
        |timeout| {
            Error::Assertion(format!(
                "record count of table {table} did not settle, last read {}",
                timeout.last.map(|n| n.to_string()).unwrap_or_else(|| "nothing".into())
            ))
        },
    )
    .await
}

/// Distribution counts lag behind a reshard; poll until they add up again.
async fn wait_record_count(
    client: &ControlPlaneClient,
    table: &TableId,
    expected: u64,
) -> Result<()> {
    poll_until(
        client.poll_policy(),
        || async {
            let total = client.get_distribution(table).await?.total();
            Ok(if total == expected {
                Probe::Ready(())
            } else {
                Probe::Pending(total)
            })
        },
        |timeout| {
            Error::Assertion(format!(
                "table {table} should hold {expected} record(s) after resharding, found {}",
                timeout.last.map(|n| n.to_string()).unwrap_or_else(|| "nothing".into())
            ))
        },
    )
    .await
}
