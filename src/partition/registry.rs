use std::collections::BTreeMap;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::health_monitor::ExitBoard;
use super::ClusterView;
use super::ConnectivityGroup;
use super::GroupId;
use super::HealthMonitor;
use super::LinkTable;
use super::ProcessId;
use super::Reachability;
use crate::config::ControlPlaneConfig;
use crate::config::HarnessConfig;
use crate::config::RetryPolicies;
use crate::control_plane::ControlPlaneClient;
use crate::control_plane::SharedTopology;
use crate::node::LaunchSettings;
use crate::node::NodeIdentity;
use crate::node::PortStrategy;
use crate::node::ServeOptions;
use crate::node::ServerProcess;
use crate::node::ServerState;
use crate::workload::WorkloadTarget;
use crate::Error;
use crate::ProcessError;
use crate::Result;

/// Owns every connectivity group and server process of one test.
///
/// Processes are only ever created, moved and destroyed through the registry.
/// Moving processes between groups severs their links to the members left
/// behind and restores their links to the destination group.
///
/// Teardown is scoped: [`PartitionRegistry::shutdown`] stops everything
/// gracefully, and dropping the registry (including while unwinding from a
/// panic) kills every process and cancels every attached workload.
pub struct PartitionRegistry {
    settings: Arc<LaunchSettings>,
    work_dir: std::path::PathBuf,
    control_plane: ControlPlaneConfig,
    retry: RetryPolicies,
    default_ports: PortStrategy,
    default_options: ServeOptions,
    links: Arc<dyn Reachability>,
    topology: SharedTopology,
    groups: Vec<ConnectivityGroup>,
    processes: BTreeMap<ProcessId, ServerProcess>,
    board: ExitBoard,
    next_group: u32,
    next_process: u32,
    teardown: CancellationToken,
}

impl PartitionRegistry {
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        let links = Arc::new(LinkTable::new(config.cluster.host.clone(), config.retry.relay_connect));
        Self::with_reachability(config, links)
    }

    /// Same as [`Self::new`] with a caller-provided reachability layer.
    pub fn with_reachability(
        config: &HarnessConfig,
        links: Arc<dyn Reachability>,
    ) -> Result<Self> {
        let settings = LaunchSettings::new(
            config.server.clone(),
            config.cluster.host.clone(),
            config.cluster.log_dir.clone(),
        )?;
        std::fs::create_dir_all(&config.cluster.work_dir)?;
        std::fs::create_dir_all(&config.cluster.log_dir)?;

        Ok(Self {
            settings: Arc::new(settings),
            work_dir: config.cluster.work_dir.clone(),
            control_plane: config.control_plane.clone(),
            retry: config.retry.clone(),
            default_ports: config.server.port_mode.into(),
            default_options: config.server.serve.clone(),
            links,
            topology: SharedTopology::default(),
            groups: Vec::new(),
            processes: BTreeMap::new(),
            board: Arc::new(DashMap::new()),
            next_group: 0,
            next_process: 0,
            teardown: CancellationToken::new(),
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.settings.log_dir
    }

    pub fn host(&self) -> &str {
        &self.settings.host
    }

    /// Fresh identity under the work dir, using the configured port mode.
    pub fn new_identity(
        &self,
        prefix: &str,
    ) -> NodeIdentity {
        NodeIdentity::generated(&self.work_dir, prefix).with_port_strategy(self.default_ports)
    }

    //---------------------------------------------------------------
    // Groups

    pub fn create_group(
        &mut self,
        name: impl Into<String>,
    ) -> GroupId {
        let id = GroupId(self.next_group);
        self.next_group += 1;
        let group = ConnectivityGroup::new(id, name);
        info!("created {} ({})", id, group.name());
        self.groups.push(group);
        id
    }

    /// Removes an empty group.
    pub fn remove_group(
        &mut self,
        id: GroupId,
    ) -> Result<()> {
        let group = self.group(id)?;
        if !group.is_empty() {
            return Err(Error::IllegalState(format!(
                "{} still has {} member(s)",
                id,
                group.len()
            )));
        }
        self.groups.retain(|g| g.id() != id);
        Ok(())
    }

    /// Groups in creation order.
    pub fn groups(&self) -> &[ConnectivityGroup] {
        &self.groups
    }

    pub fn group(
        &self,
        id: GroupId,
    ) -> Result<&ConnectivityGroup> {
        self.groups
            .iter()
            .find(|g| g.id() == id)
            .ok_or_else(|| Error::IllegalState(format!("unknown {id}")))
    }

    fn group_mut(
        &mut self,
        id: GroupId,
    ) -> Result<&mut ConnectivityGroup> {
        self.groups
            .iter_mut()
            .find(|g| g.id() == id)
            .ok_or_else(|| Error::IllegalState(format!("unknown {id}")))
    }

    pub fn group_of(
        &self,
        process: ProcessId,
    ) -> Option<GroupId> {
        self.groups.iter().find(|g| g.contains(process)).map(|g| g.id())
    }

    //---------------------------------------------------------------
    // Processes

    pub fn process(
        &self,
        id: ProcessId,
    ) -> Result<&ServerProcess> {
        self.processes
            .get(&id)
            .ok_or_else(|| Error::IllegalState(format!("unknown {id}")))
    }

    fn process_mut(
        &mut self,
        id: ProcessId,
    ) -> Result<&mut ServerProcess> {
        self.processes
            .get_mut(&id)
            .ok_or_else(|| Error::IllegalState(format!("unknown {id}")))
    }

    pub fn processes(&self) -> impl Iterator<Item = (ProcessId, &ServerProcess)> {
        self.processes.iter().map(|(id, p)| (*id, p))
    }

    pub fn process_by_name(
        &self,
        name: &str,
    ) -> Option<ProcessId> {
        self.processes.iter().find(|(_, p)| p.name() == name).map(|(id, _)| *id)
    }

    /// Starts a process inside `group` and waits until it is ready.
    ///
    /// The new process joins every existing process through its own relay;
    /// relays to processes outside `group` start out severed.
    pub async fn spawn_process(
        &mut self,
        group: GroupId,
        identity: NodeIdentity,
        options: Option<ServeOptions>,
    ) -> Result<ProcessId> {
        self.group(group)?;
        if self
            .processes
            .values()
            .any(|p| p.is_alive() && p.data_dir() == identity.data_dir())
        {
            return Err(ProcessError::DataDirInUse(identity.data_dir().to_path_buf()).into());
        }

        let id = ProcessId(self.next_process);
        self.next_process += 1;

        let join = match self.open_routes(id, group) {
            Ok(join) => join,
            Err(e) => {
                self.links.close_routes(id);
                return Err(e);
            }
        };

        let options = options.unwrap_or_else(|| self.default_options.clone());
        let mut process = ServerProcess::new(identity, options, self.settings.clone());
        if let Err(e) = self.launch(&mut process, &join).await {
            self.links.close_routes(id);
            return Err(e);
        }

        if let Some(watch) = process.exit_watch() {
            self.board.insert(id, watch);
        }
        info!("{} ({}) joined {}", id, process.name(), group);
        self.processes.insert(id, process);
        self.group_mut(group)?.insert(id);
        Ok(id)
    }

    /// Spawns `count` processes with generated identities.
    pub async fn spawn_processes(
        &mut self,
        group: GroupId,
        count: usize,
        prefix: &str,
    ) -> Result<Vec<ProcessId>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let identity = self.new_identity(prefix);
            ids.push(self.spawn_process(group, identity, None).await?);
        }
        Ok(ids)
    }

    fn open_routes(
        &self,
        id: ProcessId,
        group: GroupId,
    ) -> Result<Vec<SocketAddr>> {
        let mut join = Vec::new();
        for (peer, process) in &self.processes {
            let Ok(target) = process.cluster_addr() else {
                continue;
            };
            join.push(self.links.open_route(id, *peer, target)?);
            if self.group_of(*peer) != Some(group) {
                self.links.set_reachable(id, *peer, false);
            }
        }
        Ok(join)
    }

    async fn launch(
        &self,
        process: &mut ServerProcess,
        join: &[SocketAddr],
    ) -> Result<()> {
        process.start(join).await?;
        process.wait_until_ready(self.ready_timeout()).await?;
        Ok(())
    }

    fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.server.ready_timeout_ms)
    }

    /// Atomically moves `ids` from one group to another.
    ///
    /// Every precondition is checked before anything changes: each process
    /// must be a member of `from` and be ready. A violation is an
    /// [`Error::IllegalState`] and leaves the registry untouched.
    pub fn move_processes(
        &mut self,
        from: GroupId,
        to: GroupId,
        ids: &[ProcessId],
    ) -> Result<()> {
        if from == to {
            return Err(Error::IllegalState(format!("cannot move processes from {from} to itself")));
        }
        let source = self.group(from)?;
        let destination = self.group(to)?;

        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(*id) {
                return Err(Error::IllegalState(format!("{id} listed twice")));
            }
            if !source.contains(*id) {
                return Err(Error::IllegalState(format!("{id} is not a member of {from}")));
            }
            let process = self.process(*id)?;
            if process.state() != ServerState::Ready || !process.is_alive() {
                return Err(Error::IllegalState(format!(
                    "{id} ({}) is {:?}, not ready",
                    process.name(),
                    process.state()
                )));
            }
        }

        let staying: Vec<ProcessId> =
            source.members().iter().copied().filter(|p| !seen.contains(p)).collect();
        let joining: Vec<ProcessId> = destination.members().to_vec();

        for id in ids {
            for other in &staying {
                self.links.set_reachable(*id, *other, false);
            }
            for other in &joining {
                self.links.set_reachable(*id, *other, true);
            }
        }

        for id in ids {
            self.group_mut(from)?.remove(*id);
            self.group_mut(to)?.insert(*id);
        }
        info!("moved {:?} from {} to {}", ids, from, to);
        Ok(())
    }

    /// Graceful stop; the process keeps its group membership.
    pub async fn stop_process(
        &mut self,
        id: ProcessId,
    ) -> Result<()> {
        self.process_mut(id)?.stop().await
    }

    /// SIGKILL, simulating abrupt node loss; the process keeps its group membership.
    pub async fn kill_process(
        &mut self,
        id: ProcessId,
    ) -> Result<()> {
        self.process_mut(id)?.kill().await
    }

    /// Stops the process if needed and starts it again against the same
    /// identity and data directory, in the same group. A crashed process is
    /// restarted as is.
    pub async fn restart_process(
        &mut self,
        id: ProcessId,
    ) -> Result<()> {
        let timeout = self.ready_timeout();
        let process = self.process_mut(id)?;
        if process.is_alive() {
            process.stop().await?;
        } else if process.state() == ServerState::Crashed {
            warn!("restarting {} ({}) after a crash", id, process.name());
        }
        let join = process.join_addrs().to_vec();
        process.start(&join).await?;
        process.wait_until_ready(timeout).await?;

        let target = process.cluster_addr()?;
        let watch = process.exit_watch();
        self.links.retarget(id, target);
        if let Some(watch) = watch {
            self.board.insert(id, watch);
        }
        Ok(())
    }

    /// Stops the process and forgets it; its log file is kept.
    pub async fn remove_process(
        &mut self,
        id: ProcessId,
    ) -> Result<()> {
        let mut process = self
            .processes
            .remove(&id)
            .ok_or_else(|| Error::IllegalState(format!("unknown {id}")))?;
        self.board.remove(&id);
        for group in &mut self.groups {
            group.remove(id);
        }
        self.links.close_routes(id);
        let stopped = process.stop().await;
        info!("removed {} ({})", id, process.name());
        stopped
    }

    /// Whether traffic currently flows between `a` and `b`.
    pub fn is_reachable(
        &self,
        a: ProcessId,
        b: ProcessId,
    ) -> bool {
        self.links.link_state(a, b).unwrap_or(false)
    }

    /// Fails on the first process that exited without being asked to.
    pub fn check_all(&mut self) -> Result<()> {
        for process in self.processes.values_mut() {
            process.check()?;
        }
        Ok(())
    }

    //---------------------------------------------------------------
    // Collaborators

    /// Admin client bound to the HTTP port of `id`.
    ///
    /// Every client handed out shares one view of what the harness created,
    /// so repeating a mutation through another member is still a no-op.
    pub fn control_plane(
        &self,
        id: ProcessId,
    ) -> Result<ControlPlaneClient> {
        let process = self.process(id)?;
        let ports = process.ports().ok_or_else(|| {
            Error::IllegalState(format!("{id} ({}) has no known ports", process.name()))
        })?;
        let url = self.control_plane.endpoint_url(&self.settings.host, ports.http_admin, process.name());
        let client = ControlPlaneClient::new(url, &self.control_plane, self.retry.control_plane_read)?;
        Ok(client.with_view(self.topology.clone()))
    }

    /// Connection details of the first ready member of `group`.
    pub fn workload_target(
        &self,
        group: GroupId,
    ) -> Result<WorkloadTarget> {
        let group = self.group(group)?;
        group
            .members()
            .iter()
            .filter_map(|id| self.processes.get(id))
            .filter(|p| p.state() == ServerState::Ready && p.is_alive())
            .find_map(|p| {
                p.ports().map(|ports| WorkloadTarget {
                    node: p.name().to_string(),
                    host: self.settings.host.clone(),
                    driver_port: ports.client_driver,
                    http_port: ports.http_admin,
                })
            })
            .ok_or_else(|| Error::IllegalState(format!("{} has no ready member", group.id())))
    }

    /// Read-only handle on membership and reachability for other tasks.
    pub fn view(&self) -> ClusterView {
        ClusterView::new(self.board.clone(), self.links.clone())
    }

    /// Watches every current and future process for unexpected exits.
    pub fn spawn_health_monitor(
        &self,
        interval: Duration,
    ) -> HealthMonitor {
        HealthMonitor::spawn(self.board.clone(), interval, self.teardown.child_token())
    }

    /// Cancelled when the registry shuts down or is dropped.
    pub fn teardown_token(&self) -> CancellationToken {
        self.teardown.child_token()
    }

    //---------------------------------------------------------------
    // Teardown

    /// Stops every process (falling back to SIGKILL) and closes every relay.
    ///
    /// Every process is stopped even if an earlier one fails; the first
    /// failure is returned.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("shutting down {} process(es)", self.processes.len());
        self.teardown.cancel();

        let mut first_error = None;
        for (id, process) in self.processes.iter_mut() {
            if let Err(e) = process.stop().await {
                warn!("{} ({}) did not stop cleanly: {}", id, process.name(), e);
                process.abort();
                first_error.get_or_insert(e);
            }
        }
        self.links.close_all();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for PartitionRegistry {
    fn drop(&mut self) {
        self.teardown.cancel();
        for process in self.processes.values_mut() {
            process.abort();
        }
        self.links.close_all();
    }
}
