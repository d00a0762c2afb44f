use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::signal::killpg;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::identity::DataDirLease;
use super::log_watch::join_capture;
use super::log_watch::spawn_capture;
use super::log_watch::LogMarkers;
use super::log_watch::LogSignals;
use super::log_watch::OutputTail;
use super::NodeIdentity;
use super::ServeOptions;
use super::ServerPorts;
use crate::config::ServerConfig;
use crate::metrics::PROCESS_CRASHES;
use crate::metrics::PROCESS_STARTS;
use crate::utils::file_io::create_parent_dir_if_not_exist;
use crate::utils::net::is_server_ready;
use crate::utils::net::socket_addr;
use crate::utils::poll::poll_until;
use crate::utils::poll::PollPolicy;
use crate::utils::poll::Probe;
use crate::utils::time::timestamp_millis;
use crate::Error;
use crate::ProcessError;
use crate::Result;

/// How long to wait for an exit after SIGKILL before giving up.
const KILL_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unstarted,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Crashed,
}

/// How a process ended.
#[derive(Debug, Clone)]
pub struct ProcessExit {
    pub status: Option<ExitStatus>,
    /// The harness asked for this exit (stop, kill or teardown)
    pub requested: bool,
}

impl fmt::Display for ProcessExit {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{status}"),
            None => write!(f, "unknown exit status"),
        }
    }
}

/// Launch settings shared by every process of one registry.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub server: ServerConfig,
    pub host: String,
    pub log_dir: PathBuf,
    markers: LogMarkers,
}

impl LaunchSettings {
    pub fn new(
        server: ServerConfig,
        host: impl Into<String>,
        log_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let markers = LogMarkers::from_config(&server)?;
        Ok(Self {
            server,
            host: host.into(),
            log_dir: log_dir.into(),
            markers,
        })
    }
}

/// Read-only view of a process's exit, usable from other tasks.
#[derive(Clone)]
pub(crate) struct ExitWatch {
    name: String,
    exit: watch::Receiver<Option<ProcessExit>>,
    tail: Arc<Mutex<OutputTail>>,
}

impl ExitWatch {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// The crash error if the process exited without being asked to.
    pub(crate) fn unexpected_exit(&self) -> Option<Error> {
        let exit = self.exit.borrow().clone()?;
        if exit.requested {
            return None;
        }
        Some(Error::Process(ProcessError::Crashed {
            name: self.name.clone(),
            status: exit.to_string(),
            output: self.tail.lock().render(),
        }))
    }
}

struct Running {
    pid: Pid,
    stopping: Arc<AtomicBool>,
    exit: watch::Receiver<Option<ProcessExit>>,
    signals: watch::Receiver<LogSignals>,
    _lease: DataDirLease,
}

impl Drop for Running {
    fn drop(&mut self) {
        if self.exit.borrow().is_none() {
            self.stopping.store(true, Ordering::SeqCst);
            let _ = killpg(self.pid, Signal::SIGKILL);
        }
    }
}

/// Supervises one OS process running the server.
///
/// Dropping the value kills the process (and its process group).
pub struct ServerProcess {
    identity: NodeIdentity,
    options: ServeOptions,
    settings: Arc<LaunchSettings>,
    state: ServerState,
    ports: Option<ServerPorts>,
    join: Vec<SocketAddr>,
    tail: Arc<Mutex<OutputTail>>,
    running: Option<Running>,
    last_exit: Option<ProcessExit>,
}

impl fmt::Debug for ServerProcess {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ServerProcess")
            .field("name", &self.identity.name())
            .field("state", &self.state)
            .field("ports", &self.ports)
            .finish()
    }
}

impl ServerProcess {
    pub fn new(
        identity: NodeIdentity,
        options: ServeOptions,
        settings: Arc<LaunchSettings>,
    ) -> Self {
        let tail = Arc::new(Mutex::new(OutputTail::new(settings.server.output_tail_lines)));
        Self {
            identity,
            options,
            settings,
            state: ServerState::Unstarted,
            ports: None,
            join: Vec::new(),
            tail,
            running: None,
            last_exit: None,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// Current lifecycle state, reflecting an exit the watcher has already
    /// seen even if nobody called [`Self::check`] since.
    pub fn state(&self) -> ServerState {
        match self.running.as_ref().and_then(|r| r.exit.borrow().clone()) {
            Some(exit) if exit.requested => ServerState::Stopped,
            Some(_) => ServerState::Crashed,
            None => self.state,
        }
    }

    /// Ports assigned at start; `None` until known.
    pub fn ports(&self) -> Option<ServerPorts> {
        self.ports
    }

    pub fn pid(&self) -> Option<i32> {
        self.running.as_ref().map(|r| r.pid.as_raw())
    }

    pub fn join_addrs(&self) -> &[SocketAddr] {
        &self.join
    }

    pub fn last_exit(&self) -> Option<&ProcessExit> {
        self.last_exit.as_ref()
    }

    /// `<log_dir>/<name>.log`; shared by every start of this identity.
    pub fn log_path(&self) -> PathBuf {
        self.settings.log_dir.join(format!("{}.log", self.identity.name()))
    }

    /// Most recent captured output lines.
    pub fn output_tail(&self) -> String {
        self.tail.lock().render()
    }

    pub fn admin_addr(&self) -> Result<SocketAddr> {
        self.addr_of(|p| p.http_admin)
    }

    pub fn driver_addr(&self) -> Result<SocketAddr> {
        self.addr_of(|p| p.client_driver)
    }

    pub fn cluster_addr(&self) -> Result<SocketAddr> {
        self.addr_of(|p| p.cluster)
    }

    fn addr_of(
        &self,
        pick: impl Fn(&ServerPorts) -> u16,
    ) -> Result<SocketAddr> {
        let ports = self.ports.ok_or_else(|| {
            Error::IllegalState(format!("ports of {} are not known yet", self.name()))
        })?;
        Ok(socket_addr(&self.settings.host, pick(&ports))?)
    }

    /// Command line handed to the binary (without the binary itself).
    pub(crate) fn launch_args(
        &self,
        ports: &ServerPorts,
    ) -> Vec<String> {
        let server = &self.settings.server;
        let mut args = server.binary_args.clone();
        if let Some(subcommand) = &server.subcommand {
            args.push(subcommand.clone());
        }
        args.push("--directory".into());
        args.push(self.identity.data_dir().to_string_lossy().into_owned());
        args.push("--server-name".into());
        args.push(self.identity.name().to_string());
        for tag in self.identity.tags() {
            args.push("--server-tag".into());
            args.push(tag.clone());
        }
        args.push("--bind".into());
        args.push(self.settings.host.clone());
        args.push("--cluster-port".into());
        args.push(ports.cluster.to_string());
        args.push("--http-port".into());
        args.push(ports.http_admin.to_string());
        args.push("--driver-port".into());
        args.push(ports.client_driver.to_string());
        for addr in &self.join {
            args.push("--join".into());
            args.push(addr.to_string());
        }
        if let Some(mb) = self.options.cache_size_mb {
            args.push("--cache-size".into());
            args.push(mb.to_string());
        }
        args.push("--durability".into());
        args.push(self.options.durability.as_flag().to_string());
        args.extend(self.options.extra_args.iter().cloned());
        args
    }

    /// Launches the server, joining the given cluster addresses.
    ///
    /// Returns once the process is spawned; use [`Self::wait_until_ready`]
    /// to wait for it to serve.
    pub async fn start(
        &mut self,
        join: &[SocketAddr],
    ) -> Result<()> {
        // A process that died on its own still holds the data-dir lease.
        self.absorb_exit();
        match self.state {
            ServerState::Unstarted | ServerState::Stopped | ServerState::Crashed => {}
            other => {
                return Err(Error::IllegalState(format!(
                    "cannot start {} while {:?}",
                    self.name(),
                    other
                )))
            }
        }

        let lease = self.identity.acquire_data_dir()?;
        create_parent_dir_if_not_exist(self.identity.data_dir())?;

        let (ports, final_ports) = self.identity.port_strategy().resolve(&self.settings.host)?;
        self.join = join.to_vec();
        let args = self.launch_args(&ports);
        let binary = self.settings.server.binary.clone();
        let name = self.identity.name().to_string();

        let log_path = self.log_path();
        create_parent_dir_if_not_exist(&log_path)?;
        let mut log_file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .await?;
        log_file
            .write_all(
                format!(
                    "=== [{}] launching {} {}\n",
                    timestamp_millis(),
                    binary.display(),
                    args.join(" ")
                )
                .as_bytes(),
            )
            .await?;

        let mut child = Command::new(&binary)
            .args(&args)
            .envs(&self.options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0)
            .spawn()
            .map_err(|source| ProcessError::Launch {
                name: name.clone(),
                binary: binary.clone(),
                source,
            })?;

        let raw_pid = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .ok_or_else(|| Error::IllegalState(format!("{name} exited before reporting a pid")))?;
        let pid = Pid::from_raw(raw_pid);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::IllegalState(format!("{name} has no stdout pipe")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::IllegalState(format!("{name} has no stderr pipe")))?;

        let (signals_tx, signals_rx) = watch::channel(LogSignals::default());
        let capture = spawn_capture(
            name.clone(),
            stdout,
            stderr,
            log_file,
            self.settings.markers.clone(),
            signals_tx,
            self.tail.clone(),
        );

        let stopping = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = watch::channel(None);
        {
            let stopping = stopping.clone();
            let name = name.clone();
            tokio::spawn(async move {
                let status = match child.wait().await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        error!("Node {} exit status could not be determined: {}", name, e);
                        None
                    }
                };
                join_capture(capture).await;

                let exit = ProcessExit {
                    status,
                    requested: stopping.load(Ordering::SeqCst),
                };
                if exit.requested {
                    info!("Node {} exited with {}", name, exit);
                } else {
                    error!("Node {} exited unexpectedly with {}", name, exit);
                    PROCESS_CRASHES.with_label_values(&[&name]).inc();
                }
                let _ = exit_tx.send(Some(exit));
            });
        }

        info!("Started node {} (pid {}) ports [{}]", name, raw_pid, ports);
        PROCESS_STARTS.with_label_values(&[&name]).inc();

        self.running = Some(Running {
            pid,
            stopping,
            exit: exit_rx,
            signals: signals_rx,
            _lease: lease,
        });
        self.ports = final_ports.then_some(ports);
        self.state = ServerState::Starting;
        self.last_exit = None;
        Ok(())
    }

    /// Polls until the readiness marker was logged, every port is known and,
    /// if configured, the admin port accepts connections.
    ///
    /// An exit during the wait aborts it with [`ProcessError::Crashed`].
    pub async fn wait_until_ready(
        &mut self,
        wait: Duration,
    ) -> Result<ServerPorts> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| Error::IllegalState(format!("{} is not running", self.name())))?;
        if self.state == ServerState::Ready {
            if let Some(ports) = self.ports {
                return Ok(ports);
            }
        }

        let policy = PollPolicy::new(
            Duration::from_millis(self.settings.server.ready_poll_interval_ms),
            wait,
        );
        let signals = running.signals.clone();
        let exit = running.exit.clone();
        let expected = self.ports;
        let probe_admin = self.settings.server.probe_admin_port;
        let host = self.settings.host.clone();
        let name = self.name().to_string();
        let tail = self.tail.clone();

        let probe = {
            let name = name.clone();
            move || {
                let observed = signals.borrow().clone();
                let exited = exit.borrow().clone();
                let host = host.clone();
                let name = name.clone();
                let tail = tail.clone();
                async move {
                    if let Some(exit) = exited {
                        return Err(Error::Process(ProcessError::Crashed {
                            name,
                            status: exit.to_string(),
                            output: tail.lock().render(),
                        }));
                    }
                    let Some(ports) = expected.or_else(|| observed.reported_ports()) else {
                        return Ok(Probe::Pending(format!("ports not reported yet: {observed:?}")));
                    };
                    if !observed.ready_seen {
                        return Ok(Probe::Pending(format!("ready marker not seen: {observed:?}")));
                    }
                    if probe_admin && !is_server_ready(socket_addr(&host, ports.http_admin)?).await
                    {
                        return Ok(Probe::Pending(format!(
                            "admin port {} not accepting connections",
                            ports.http_admin
                        )));
                    }
                    Ok(Probe::Ready(ports))
                }
            }
        };

        let result = poll_until(policy, probe, |t| {
            Error::Process(ProcessError::StartupTimeout {
                name: name.clone(),
                waited: t.waited,
                last_state: t.last.unwrap_or_else(|| "nothing observed".to_string()),
            })
        })
        .await;

        match result {
            Ok(ports) => {
                info!("Node {} ready [{}]", name, ports);
                self.ports = Some(ports);
                self.state = ServerState::Ready;
                Ok(ports)
            }
            Err(e) => {
                if matches!(e, Error::Process(ProcessError::Crashed { .. })) {
                    self.absorb_exit();
                }
                Err(e)
            }
        }
    }

    /// Fails if the process exited without the harness asking it to.
    pub fn check(&mut self) -> Result<()> {
        if self.running.is_some() {
            let exited = self.running.as_ref().and_then(|r| r.exit.borrow().clone());
            if exited.is_none() {
                return Ok(());
            }
            self.absorb_exit();
        }
        match (&self.state, &self.last_exit) {
            (ServerState::Crashed, Some(exit)) => Err(self.crashed(exit)),
            _ => Ok(()),
        }
    }

    /// SIGTERM, then SIGKILL once the grace period is over.
    pub async fn stop(&mut self) -> Result<()> {
        self.terminate(Signal::SIGTERM, Duration::from_millis(self.settings.server.stop_grace_ms))
            .await
    }

    /// SIGKILL right away, simulating abrupt node loss.
    pub async fn kill(&mut self) -> Result<()> {
        self.terminate(Signal::SIGKILL, Duration::ZERO).await
    }

    async fn terminate(
        &mut self,
        signal: Signal,
        grace: Duration,
    ) -> Result<()> {
        self.check()?;
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        let name = self.identity.name().to_string();

        self.state = ServerState::Stopping;
        running.stopping.store(true, Ordering::SeqCst);
        info!("Sending {} to node {} (pid {})", signal, name, running.pid);
        send_signal(&name, running.pid, signal, signal == Signal::SIGKILL)?;

        let exit = match wait_exit(&mut running.exit, grace).await {
            Some(exit) => exit,
            None => {
                if signal != Signal::SIGKILL {
                    warn!("Graceful shutdown deadline exceeded for node {}", name);
                    send_signal(&name, running.pid, Signal::SIGKILL, true)?;
                }
                wait_exit(&mut running.exit, KILL_WAIT).await.ok_or_else(|| {
                    Error::IllegalState(format!("{name} did not exit after SIGKILL"))
                })?
            }
        };

        debug!("Node {} stopped with {}", name, exit);
        self.last_exit = Some(exit);
        self.state = ServerState::Stopped;
        Ok(())
    }

    /// Moves a recorded exit out of the running slot into the final state.
    fn absorb_exit(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let exit = running.exit.borrow().clone();
        if let Some(exit) = exit {
            self.state = if exit.requested {
                ServerState::Stopped
            } else {
                ServerState::Crashed
            };
            self.last_exit = Some(exit);
        } else {
            self.running = Some(running);
        }
    }

    fn crashed(
        &self,
        exit: &ProcessExit,
    ) -> Error {
        Error::Process(ProcessError::Crashed {
            name: self.name().to_string(),
            status: exit.to_string(),
            output: self.output_tail(),
        })
    }

    pub(crate) fn exit_watch(&self) -> Option<ExitWatch> {
        self.running.as_ref().map(|r| ExitWatch {
            name: self.name().to_string(),
            exit: r.exit.clone(),
            tail: self.tail.clone(),
        })
    }

    /// Kills the process without waiting, e.g. from `Drop`.
    pub(crate) fn abort(&mut self) {
        if let Some(running) = self.running.take() {
            let exited = running.exit.borrow().clone();
            drop(running);
            self.last_exit = exited;
            self.state = ServerState::Stopped;
        }
    }

    /// True while an OS process is attached and has not exited.
    pub fn is_alive(&self) -> bool {
        self.running.as_ref().map(|r| r.exit.borrow().is_none()).unwrap_or(false)
    }

    pub fn data_dir(&self) -> &Path {
        self.identity.data_dir()
    }
}

fn send_signal(
    name: &str,
    pid: Pid,
    signal: Signal,
    whole_group: bool,
) -> Result<()> {
    let sent = if whole_group {
        killpg(pid, signal)
    } else {
        kill(pid, signal)
    };
    match sent {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            warn!("Node {} (pid {}) did not exist when sending {}", name, pid, signal);
            Ok(())
        }
        Err(source) => Err(Error::Process(ProcessError::Signal {
            name: name.to_string(),
            source,
        })),
    }
}

async fn wait_exit(
    exit: &mut watch::Receiver<Option<ProcessExit>>,
    wait: Duration,
) -> Option<ProcessExit> {
    match timeout(wait, exit.wait_for(|e| e.is_some())).await {
        Ok(Ok(exit)) => exit.clone(),
        _ => None,
    }
}
