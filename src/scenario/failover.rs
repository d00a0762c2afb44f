use super::datacenter_of;
use super::wait_directory_size;
use super::StepLog;
use crate::control_plane::ConvergenceGoal;
use crate::control_plane::IssueExpectation;
use crate::control_plane::Placement;
use crate::partition::PartitionRegistry;
use crate::HarnessConfig;
use crate::Result;

/// Kills one of two replicas: exactly one `MACHINE_DOWN` must name it, and
/// declaring it dead must clear every issue.
pub async fn failover(
    registry: &mut PartitionRegistry,
    config: &HarnessConfig,
    log: &mut StepLog,
) -> Result<()> {
    log.step("starting 2 replicas");
    let group = registry.create_group("main");
    let ids = registry.spawn_processes(group, 2, "replica").await?;
    wait_directory_size(registry, &ids, 2).await?;

    let (survivor, victim) = (ids[0], ids[1]);
    let client = registry.control_plane(survivor)?;
    let datacenter = datacenter_of(registry, &client, "primary", &ids).await?;
    let placement = Placement::new(datacenter.clone()).with_replicas(datacenter, 2);
    let table = client.create_table(&config.scenario.table, placement).await?;
    client.wait_for(ConvergenceGoal::AllReplicasReady(table)).await?;
    client.assert_no_issues().await?;

    let victim_id = client.node_id_by_name(registry.process(victim)?.name()).await?;
    log.step(format!("killing {}", registry.process(victim)?.name()));
    registry.kill_process(victim).await?;

    let down = vec![IssueExpectation::machine_down(victim_id.to_string())];
    client.wait_for(ConvergenceGoal::Issues(down.clone())).await?;
    client.expect_issues(&down).await?;

    log.step(format!("declaring {victim_id} dead"));
    client.declare_dead(&victim_id).await?;
    client.wait_for(ConvergenceGoal::NoIssues).await?;
    client.assert_no_issues().await?;
    registry.check_all()?;

    log.step("failover complete");
    Ok(())
}
