use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::killpg;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::process::Command;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::file_io::open_file_for_append;
use crate::file_io::read_tail;
use crate::metrics::WORKLOAD_PHASES;
use crate::time::timestamp_millis;
use crate::Error;
use crate::Result;
use crate::WorkloadConfig;
use crate::WorkloadError;

const LOG_TAIL_LINES: usize = 20;
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Where a workload sends its traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadTarget {
    /// Name of the server process behind the ports
    pub node: String,
    pub host: String,
    pub driver_port: u16,
    pub http_port: u16,
}

/// A named shell command aimed at one target.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub name: String,
    pub command: String,
    pub target: WorkloadTarget,
    pub env: BTreeMap<String, String>,
}

impl WorkloadSpec {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        target: WorkloadTarget,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            target,
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Environment of one phase: target coordinates, config-wide limits,
    /// then config and caller variables (the caller wins).
    pub(crate) fn environment(
        &self,
        config: &WorkloadConfig,
        phase: &str,
    ) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("HOST".to_string(), self.target.host.clone());
        env.insert("PORT".to_string(), self.target.driver_port.to_string());
        env.insert("HTTP_PORT".to_string(), self.target.http_port.to_string());
        env.insert("WORKLOAD_PHASE".to_string(), phase.to_string());
        if let Some(secs) = config.duration_secs {
            env.insert("WORKLOAD_DURATION_SECS".to_string(), secs.to_string());
        }
        if let Some(ops) = config.ops {
            env.insert("WORKLOAD_OPS".to_string(), ops.to_string());
        }
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

/// `<log_dir>/<workload>-<phase>.log`
pub fn phase_log_path(
    log_dir: &Path,
    workload: &str,
    phase: &str,
) -> PathBuf {
    log_dir.join(format!("{workload}-{phase}.log"))
}

/// One running phase of a workload.
///
/// The command runs in its own process group; dropping the run, or
/// cancelling the teardown token it was launched with, kills the group.
pub(crate) struct PhaseRun {
    name: String,
    phase: String,
    log: PathBuf,
    child: Child,
    pid: Pid,
    started: Instant,
    cancel: CancellationToken,
    status: Option<ExitStatus>,
    _watch: DropGuard,
}

impl PhaseRun {
    pub(crate) fn launch(
        spec: &WorkloadSpec,
        config: &WorkloadConfig,
        log_dir: &Path,
        phase: &str,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if cancel.is_cancelled() {
            return Err(Error::IllegalState(format!(
                "workload {} cannot start {phase}: harness is tearing down",
                spec.name
            )));
        }

        let log = phase_log_path(log_dir, &spec.name, phase);
        let mut out = open_file_for_append(&log)?;
        writeln!(out, "=== [{}] {} {}: {}", timestamp_millis(), spec.name, phase, spec.command)?;
        let err = out.try_clone()?;

        let launch_error = |source| WorkloadError::Launch {
            name: spec.name.clone(),
            phase: phase.to_string(),
            source,
        };
        let child = Command::new(&config.shell)
            .arg("-c")
            .arg(&spec.command)
            .envs(spec.environment(config, phase))
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .kill_on_drop(true)
            .process_group(0)
            .spawn()
            .map_err(launch_error)?;
        let pid = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .map(Pid::from_raw)
            .ok_or_else(|| {
                Error::IllegalState(format!("workload {} exited before reporting a pid", spec.name))
            })?;

        // Teardown reaches a workload even while nobody awaits it.
        let done = CancellationToken::new();
        {
            let done = done.clone();
            let cancel = cancel.clone();
            let name = spec.name.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = done.cancelled() => {}
                    _ = cancel.cancelled() => {
                        warn!("Teardown kills workload {} (pid {})", name, pid);
                        let _ = killpg(pid, Signal::SIGKILL);
                    }
                }
            });
        }

        info!("Workload {} {} started (pid {}), log {:?}", spec.name, phase, pid, log);
        Ok(Self {
            name: spec.name.clone(),
            phase: phase.to_string(),
            log,
            child,
            pid,
            started: Instant::now(),
            cancel,
            status: None,
            _watch: done.drop_guard(),
        })
    }

    pub(crate) fn log(&self) -> &Path {
        &self.log
    }

    /// Exit status if the phase already finished; never blocks.
    pub(crate) fn try_finished(&mut self) -> Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Asks the process group to wind down with `signal`.
    pub(crate) fn signal(
        &mut self,
        signal: Signal,
    ) -> Result<()> {
        if self.try_finished()?.is_some() {
            return Ok(());
        }
        debug!("Sending {} to workload {} (pid {})", signal, self.name, self.pid);
        match killpg(self.pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::Io(std::io::Error::from(e))),
        }
    }

    /// Waits for the phase to exit and verifies its status.
    ///
    /// A phase still running after `wait` is killed and reported as a
    /// timeout. Nothing is retried.
    pub(crate) async fn join(
        mut self,
        wait: Duration,
    ) -> Result<()> {
        let status = match self.status {
            Some(status) => Ok(status),
            None => {
                let cancel = self.cancel.clone();
                tokio::select! {
                    status = self.child.wait() => status.map_err(Error::from),
                    _ = sleep(wait) => {
                        self.kill().await;
                        self.record("timeout");
                        return Err(WorkloadError::Timeout {
                            name: self.name.clone(),
                            phase: self.phase.clone(),
                            waited: self.started.elapsed(),
                            log: self.log.clone(),
                        }
                        .into());
                    }
                    _ = cancel.cancelled() => {
                        self.kill().await;
                        self.record("cancelled");
                        return Err(Error::IllegalState(format!(
                            "workload {} {} cancelled by teardown",
                            self.name, self.phase
                        )));
                    }
                }
            }
        }?;
        self.status = Some(status);
        self.verify(status)
    }

    /// Passes on success; anything else is a correctness or availability failure.
    pub(crate) fn verify(
        &self,
        status: ExitStatus,
    ) -> Result<()> {
        if status.success() {
            info!(
                "Workload {} {} passed after {:?}",
                self.name,
                self.phase,
                self.started.elapsed()
            );
            self.record("passed");
            return Ok(());
        }

        error!(
            "Workload {} {} failed with {}; last output:\n{}",
            self.name,
            self.phase,
            status,
            read_tail(&self.log, LOG_TAIL_LINES)
        );
        self.record("failed");
        Err(WorkloadError::Failed {
            name: self.name.clone(),
            phase: self.phase.clone(),
            status: status.to_string(),
            log: self.log.clone(),
        }
        .into())
    }

    async fn kill(&mut self) {
        warn!("Killing workload {} {} (pid {})", self.name, self.phase, self.pid);
        let _ = killpg(self.pid, Signal::SIGKILL);
        match tokio::time::timeout(KILL_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => self.status = Some(status),
            Ok(Err(e)) => error!("workload {} exit status lost: {}", self.name, e),
            Err(_) => error!("workload {} survived SIGKILL", self.name),
        }
    }

    fn record(
        &self,
        outcome: &str,
    ) {
        WORKLOAD_PHASES.with_label_values(&[&self.name, &self.phase, outcome]).inc();
    }
}

impl Drop for PhaseRun {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = killpg(self.pid, Signal::SIGKILL);
        }
    }
}
