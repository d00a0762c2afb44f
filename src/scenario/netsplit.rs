use super::wait_directory_size;
use super::workload_for;
use super::StepLog;
use crate::control_plane::ConvergenceGoal;
use crate::partition::PartitionRegistry;
use crate::HarnessConfig;
use crate::Result;

/// Splits `nodes` processes into `nodes - split_at` / `split_at`, checks each
/// side only sees itself, heals, and checks the full cluster comes back
/// without leftover issues.
pub async fn netsplit(
    registry: &mut PartitionRegistry,
    config: &HarnessConfig,
    log: &mut StepLog,
) -> Result<()> {
    let nodes = config.scenario.nodes;
    let split_at = config.scenario.split_at;

    log.step(format!("starting {nodes} node(s)"));
    let main = registry.create_group("main");
    let ids = registry.spawn_processes(main, nodes, "node").await?;
    wait_directory_size(registry, &ids, nodes).await?;

    let mut workload = workload_for(registry, config, main, config.scenario.workload_mode)?;
    if let Some(w) = workload.as_mut() {
        log.step("workload: before");
        w.run_before().await?;
    }

    let (staying, leaving) = ids.split_at(nodes - split_at);
    log.step(format!("splitting {} / {}", staying.len(), leaving.len()));
    let split = registry.create_group("split");
    registry.move_processes(main, split, leaving)?;
    wait_directory_size(registry, staying, staying.len()).await?;
    wait_directory_size(registry, leaving, leaving.len()).await?;
    registry.check_all()?;

    if let Some(w) = workload.as_mut() {
        log.step("workload: during split");
        w.run_between().await?;
    }

    log.step("healing");
    registry.move_processes(split, main, leaving)?;
    wait_directory_size(registry, &ids, nodes).await?;
    for id in &ids {
        let client = registry.control_plane(*id)?;
        client.wait_for(ConvergenceGoal::NoIssues).await?;
        client.assert_no_issues().await?;
    }
    registry.remove_group(split)?;
    registry.check_all()?;

    if let Some(w) = workload.as_mut() {
        log.step("workload: after");
        w.run_after().await?;
    }
    log.step("healed");
    Ok(())
}
