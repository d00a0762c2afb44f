//! Workload generators run alongside the fault-injection steps.
//!
//! A workload is a shell command aimed at one server's client port. It runs
//! either continuously across the whole scenario or as discrete phases
//! between topology changes; [`PhasedWorkload`] lets a scenario drive both
//! with the same calls.

mod continuous;
mod runner;
mod split;

pub use continuous::*;
pub use runner::phase_log_path;
pub use runner::WorkloadSpec;
pub use runner::WorkloadTarget;
pub use split::*;

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::WorkloadConfig;
use crate::WorkloadMode;

#[cfg(test)]
mod continuous_test;

pub enum PhasedWorkload {
    Continuous(ContinuousWorkload),
    Split(SplitWorkload),
}

impl PhasedWorkload {
    pub fn new(
        mode: WorkloadMode,
        spec: WorkloadSpec,
        config: WorkloadConfig,
        log_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        match mode {
            WorkloadMode::Continuous => {
                PhasedWorkload::Continuous(ContinuousWorkload::new(spec, config, log_dir, cancel))
            }
            WorkloadMode::Split => {
                PhasedWorkload::Split(SplitWorkload::new(spec, config, log_dir, cancel))
            }
        }
    }

    pub fn mode(&self) -> WorkloadMode {
        match self {
            PhasedWorkload::Continuous(_) => WorkloadMode::Continuous,
            PhasedWorkload::Split(_) => WorkloadMode::Split,
        }
    }

    /// Starts a continuous run, or runs the `before` phase.
    pub async fn run_before(&mut self) -> Result<()> {
        match self {
            PhasedWorkload::Continuous(w) => w.start(),
            PhasedWorkload::Split(w) => w.run_before().await,
        }
    }

    /// Split phases have nothing in flight to check.
    pub fn check(&mut self) -> Result<()> {
        match self {
            PhasedWorkload::Continuous(w) => w.check(),
            PhasedWorkload::Split(_) => Ok(()),
        }
    }

    pub async fn run_between(&mut self) -> Result<()> {
        match self {
            PhasedWorkload::Continuous(w) => w.check(),
            PhasedWorkload::Split(w) => w.run_between().await,
        }
    }

    /// Stops a continuous run, or runs the `after` phase.
    pub async fn run_after(&mut self) -> Result<()> {
        match self {
            PhasedWorkload::Continuous(w) => w.stop().await,
            PhasedWorkload::Split(w) => w.run_after().await,
        }
    }
}
