use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::runner::PhaseRun;
use super::WorkloadSpec;
use crate::Result;
use crate::WorkloadConfig;

/// A workload run as discrete phases around the topology changes.
///
/// Each phase is a full start, wait and verify cycle bounded by
/// `phase_timeout_ms`. The phase name is exported as `WORKLOAD_PHASE` so one
/// command can seed data before and verify it after.
pub struct SplitWorkload {
    spec: WorkloadSpec,
    config: WorkloadConfig,
    log_dir: PathBuf,
    cancel: CancellationToken,
    between_runs: u32,
}

impl SplitWorkload {
    pub fn new(
        spec: WorkloadSpec,
        config: WorkloadConfig,
        log_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            spec,
            config,
            log_dir,
            cancel,
            between_runs: 0,
        }
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    pub async fn run_before(&mut self) -> Result<()> {
        self.run_phase("before").await
    }

    /// Numbered from 1: `between-1`, `between-2`, ...
    pub async fn run_between(&mut self) -> Result<()> {
        self.between_runs += 1;
        let phase = format!("between-{}", self.between_runs);
        self.run_phase(&phase).await
    }

    pub async fn run_after(&mut self) -> Result<()> {
        self.run_phase("after").await
    }

    async fn run_phase(
        &self,
        phase: &str,
    ) -> Result<()> {
        PhaseRun::launch(&self.spec, &self.config, &self.log_dir, phase, self.cancel.clone())?
            .join(Duration::from_millis(self.config.phase_timeout_ms))
            .await
    }
}
