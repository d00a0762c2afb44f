use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::runner::PhaseRun;
use super::WorkloadSpec;
use crate::Result;
use crate::WorkloadConfig;
use crate::WorkloadError;

const PHASE: &str = "continuous";

/// One long-running workload spanning the whole scenario.
///
/// It is started before the first fault, checked between steps and asked to
/// stop with the configured signal at the end; its exit code is the verdict.
pub struct ContinuousWorkload {
    spec: WorkloadSpec,
    config: WorkloadConfig,
    log_dir: PathBuf,
    cancel: CancellationToken,
    run: Option<PhaseRun>,
}

impl ContinuousWorkload {
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
            run: None,
        }
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    pub fn is_running(&mut self) -> bool {
        match self.run.as_mut() {
            Some(run) => matches!(run.try_finished(), Ok(None)),
            None => false,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.run.is_some() {
            return Err(WorkloadError::AlreadyRunning(self.spec.name.clone()).into());
        }
        self.run = Some(PhaseRun::launch(
            &self.spec,
            &self.config,
            &self.log_dir,
            PHASE,
            self.cancel.clone(),
        )?);
        Ok(())
    }

    /// Passes while the workload runs, or once it has exited successfully.
    ///
    /// A failed exit is reported here rather than at [`Self::stop`].
    pub fn check(&mut self) -> Result<()> {
        let run = self
            .run
            .as_mut()
            .ok_or_else(|| WorkloadError::NotRunning(self.spec.name.clone()))?;
        match run.try_finished()? {
            None => Ok(()),
            Some(status) if status.success() => Ok(()),
            Some(status) => {
                let result = run.verify(status);
                self.run = None;
                result
            }
        }
    }

    /// Sends the stop signal and joins within `stop_timeout_ms`.
    pub async fn stop(&mut self) -> Result<()> {
        let mut run = self
            .run
            .take()
            .ok_or_else(|| WorkloadError::NotRunning(self.spec.name.clone()))?;
        if run.try_finished()?.is_none() {
            info!("Stopping workload {}", self.spec.name);
            run.signal(self.config.stop_signal()?)?;
        }
        run.join(Duration::from_millis(self.config.stop_timeout_ms)).await
    }
}
