use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::apply_boundary_change;
use super::issues::matches_exactly;
use super::issues::untolerated;
use super::ConvergenceGoal;
use super::DatacenterId;
use super::DatacenterSpec;
use super::DirectoryEntry;
use super::Distribution;
use super::Issue;
use super::IssueExpectation;
use super::Mutation;
use super::MutationOutcome;
use super::MutationResponse;
use super::NodeId;
use super::Placement;
use super::Progress;
use super::TableId;
use super::TableSpec;
use super::TableStatus;
use super::TopologySpec;
use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::metrics::CONVERGENCE_POLLS;
use crate::metrics::CONVERGENCE_WAIT_SECONDS;
use crate::poll::poll_until;
use crate::poll::PollPolicy;
use crate::poll::Probe;
use crate::BackoffPolicy;
use crate::ControlPlaneConfig;
use crate::ControlPlaneError;
use crate::ConvergenceConfig;
use crate::Error;
use crate::Result;

/// Topology view shared by every client handed out for one cluster.
pub type SharedTopology = Arc<Mutex<TopologySpec>>;

/// Talks to one member's administrative endpoint.
///
/// Mutations issued through clients sharing one [`SharedTopology`] are
/// serialized, and the view is only updated once the server accepted them.
/// A client built with [`ControlPlaneClient::new`] starts with a view of its
/// own; [`ControlPlaneClient::with_view`] and
/// [`ControlPlaneClient::for_member`] share one.
#[derive(Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    http: reqwest::Client,
    read_policy: BackoffPolicy,
    convergence: ConvergenceConfig,
    view: Arc<Mutex<TopologySpec>>,
}

impl std::fmt::Debug for ControlPlaneClient {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ControlPlaneClient").field("base_url", &self.base_url).finish()
    }
}

impl ControlPlaneClient {
    pub fn new(
        base_url: String,
        config: &ControlPlaneConfig,
        read_policy: BackoffPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|source| ControlPlaneError::Request {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            read_policy,
            convergence: config.convergence.clone(),
            view: Arc::new(Mutex::new(TopologySpec::default())),
        })
    }

    /// Replaces this client's view with one shared with other clients.
    pub fn with_view(
        mut self,
        view: SharedTopology,
    ) -> Self {
        self.view = view;
        self
    }

    /// Same settings and view, talking to another member.
    pub fn for_member(
        &self,
        base_url: &str,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..self.clone()
        }
    }

    pub fn shared_view(&self) -> SharedTopology {
        self.view.clone()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Cadence and deadline of this client's convergence waits.
    pub fn poll_policy(&self) -> PollPolicy {
        self.convergence.poll_policy()
    }

    /// Snapshot of what has been created or changed through this view.
    pub async fn topology(&self) -> TopologySpec {
        self.view.lock().await.clone()
    }

    // ---------------------------------------------------------------------
    // Mutations

    /// Creates a datacenter, or returns the id of the one this client
    /// already created under `name`.
    pub async fn create_datacenter(
        &self,
        name: &str,
    ) -> Result<DatacenterId> {
        let mut view = self.view.lock().await;
        if let Some(id) = view.datacenter_by_name(name) {
            debug!("[:ControlPlaneClient:create_datacenter] {name} already exists as {id}");
            return Ok(id.clone());
        }

        let mutation = Mutation::CreateDatacenter {
            name: name.to_string(),
        };
        let id = DatacenterId(created_id(&mutation, self.send_mutation(&mutation).await?)?);
        view.datacenters.insert(
            id.clone(),
            DatacenterSpec {
                name: name.to_string(),
                members: Default::default(),
            },
        );
        info!("Created datacenter {name} ({id})");
        Ok(id)
    }

    /// Moves `node` into `datacenter`, out of whichever it was in before.
    ///
    /// # Errors
    /// - [`ControlPlaneError::UnknownDatacenter`] if this client never created it
    pub async fn assign_to_datacenter(
        &self,
        node: &NodeId,
        datacenter: &DatacenterId,
    ) -> Result<MutationOutcome> {
        let mut view = self.view.lock().await;
        view.require_datacenter(datacenter)?;
        if view.datacenter_of(node) == Some(datacenter) {
            return Ok(MutationOutcome::Unchanged);
        }

        self.send_mutation(&Mutation::AssignDatacenter {
            node: node.clone(),
            datacenter: datacenter.clone(),
        })
        .await?;

        for dc in view.datacenters.values_mut() {
            dc.members.remove(node);
        }
        if let Some(dc) = view.datacenters.get_mut(datacenter) {
            dc.members.insert(node.clone());
        }
        Ok(MutationOutcome::Applied)
    }

    /// Creates a table with the given placement.
    ///
    /// Creating the same table twice with the same placement returns the
    /// existing id without contacting the server; a different placement under
    /// an existing name is rejected.
    ///
    /// # Errors
    /// - [`ControlPlaneError::UnknownDatacenter`] for a placement naming an unknown datacenter
    /// - [`ControlPlaneError::InvalidTopology`] for an unplaceable primary or unsorted boundaries
    pub async fn create_table(
        &self,
        name: &str,
        placement: Placement,
    ) -> Result<TableId> {
        let mut view = self.view.lock().await;
        view.validate_placement(&placement)?;

        if let Some(id) = view.table_by_name(name) {
            let existing = view.table(id)?;
            if existing.placement == placement {
                return Ok(id.clone());
            }
            return Err(ControlPlaneError::InvalidTopology(format!(
                "table {name} already exists with a different placement"
            ))
            .into());
        }

        let mutation = Mutation::CreateTable {
            name: name.to_string(),
            primary: placement.primary.clone(),
            affinities: placement.affinities.clone(),
            shard_boundaries: placement.shard_boundaries.clone(),
        };
        let id = TableId(created_id(&mutation, self.send_mutation(&mutation).await?)?);
        view.tables.insert(
            id.clone(),
            TableSpec {
                name: name.to_string(),
                placement,
            },
        );
        info!("Created table {name} ({id})");
        Ok(id)
    }

    pub async fn set_replica_affinities(
        &self,
        table: &TableId,
        primary: DatacenterId,
        affinities: std::collections::BTreeMap<DatacenterId, u32>,
    ) -> Result<MutationOutcome> {
        let mut view = self.view.lock().await;
        let current = view.table(table)?.placement.clone();
        let next = Placement {
            primary,
            affinities,
            shard_boundaries: current.shard_boundaries.clone(),
        };
        view.validate_placement(&next)?;
        if next == current {
            return Ok(MutationOutcome::Unchanged);
        }

        self.send_mutation(&Mutation::SetReplicaAffinities {
            table: table.clone(),
            primary: next.primary.clone(),
            affinities: next.affinities.clone(),
        })
        .await?;

        if let Some(spec) = view.tables.get_mut(table) {
            spec.placement = next;
        }
        Ok(MutationOutcome::Applied)
    }

    /// Removes `removes` then adds `adds` to the table's shard boundaries.
    pub async fn change_shard_boundaries(
        &self,
        table: &TableId,
        adds: &[String],
        removes: &[String],
    ) -> Result<MutationOutcome> {
        let mut view = self.view.lock().await;
        let current = view.table(table)?.placement.shard_boundaries.clone();
        let next = apply_boundary_change(&current, adds, removes)?;
        if next == current {
            return Ok(MutationOutcome::Unchanged);
        }

        self.send_mutation(&Mutation::SetShardBoundaries {
            table: table.clone(),
            boundaries: next.clone(),
        })
        .await?;

        if let Some(spec) = view.tables.get_mut(table) {
            spec.placement.shard_boundaries = next;
        }
        Ok(MutationOutcome::Applied)
    }

    /// Renames a member; a no-op when the directory already shows `name`.
    pub async fn rename_node(
        &self,
        node: &NodeId,
        name: &str,
    ) -> Result<MutationOutcome> {
        let _view = self.view.lock().await;
        let directory = self.get_directory().await?;
        let entry = directory
            .iter()
            .find(|e| &e.id == node)
            .ok_or_else(|| ControlPlaneError::UnknownNode(node.to_string()))?;
        if entry.name == name {
            return Ok(MutationOutcome::Unchanged);
        }

        self.send_mutation(&Mutation::RenameNode {
            node: node.clone(),
            name: name.to_string(),
        })
        .await?;
        Ok(MutationOutcome::Applied)
    }

    /// Tells the cluster a member is permanently gone.
    ///
    /// A member already declared dead through this view is not sent again.
    /// The directory cannot tell: it drops unreachable members as soon as
    /// they go down.
    pub async fn declare_dead(
        &self,
        node: &NodeId,
    ) -> Result<MutationOutcome> {
        let mut view = self.view.lock().await;
        if view.dead.contains(node) {
            debug!("[:ControlPlaneClient:declare_dead] {node} already declared dead");
            return Ok(MutationOutcome::Unchanged);
        }

        self.send_mutation(&Mutation::DeclareDead { node: node.clone() }).await?;
        for dc in view.datacenters.values_mut() {
            dc.members.remove(node);
        }
        view.dead.insert(node.clone());
        info!("Declared {node} dead");
        Ok(MutationOutcome::Applied)
    }

    // ---------------------------------------------------------------------
    // Reads

    pub async fn get_directory(&self) -> Result<Vec<DirectoryEntry>> {
        self.get("/ajax/directory").await
    }

    pub async fn get_issues(&self) -> Result<Vec<Issue>> {
        self.get("/ajax/issues").await
    }

    pub async fn get_progress(&self) -> Result<Progress> {
        self.get("/ajax/progress").await
    }

    pub async fn get_distribution(
        &self,
        table: &TableId,
    ) -> Result<Distribution> {
        self.get(&format!("/ajax/distribution?table={table}")).await
    }

    pub async fn table_status(
        &self,
        table: &TableId,
    ) -> Result<TableStatus> {
        self.get(&format!("/ajax/tables/{table}/status")).await
    }

    pub async fn node_id_by_name(
        &self,
        name: &str,
    ) -> Result<NodeId> {
        self.get_directory()
            .await?
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.id)
            .ok_or_else(|| ControlPlaneError::UnknownNode(name.to_string()).into())
    }

    // ---------------------------------------------------------------------
    // Assertions

    /// Fails with every issue that is not of a tolerated type.
    pub async fn assert_no_issues(&self) -> Result<()> {
        let issues = self.get_issues().await?;
        let remaining = untolerated(&issues, &self.convergence.tolerated_issues);
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(Error::UnexpectedIssues(remaining.into_iter().cloned().collect()))
        }
    }

    /// Asserts the current issues are exactly `expected`, and returns them.
    pub async fn expect_issues(
        &self,
        expected: &[IssueExpectation],
    ) -> Result<Vec<Issue>> {
        let issues = self.get_issues().await?;
        if matches_exactly(&issues, expected) {
            return Ok(issues);
        }
        Err(Error::Assertion(format!(
            "expected issues {{{}}}, found {{{}}}",
            join(expected),
            join(&issues)
        )))
    }

    // ---------------------------------------------------------------------
    // Convergence

    /// Polls until `goal` holds for `settle_polls` consecutive polls.
    ///
    /// # Errors
    /// - [`Error::ConvergenceTimeout`] with the last observed state
    pub async fn wait_for(
        &self,
        goal: ConvergenceGoal,
    ) -> Result<()> {
        let started = Instant::now();
        debug!("[:ControlPlaneClient:wait_for] waiting for {goal}");

        let result = poll_until(
            self.convergence.poll_policy(),
            || self.probe(&goal),
            |timeout| Error::ConvergenceTimeout {
                goal: goal.to_string(),
                waited: timeout.waited,
                attempts: timeout.attempts,
                last_observed: timeout.last.unwrap_or_else(|| "nothing".to_string()),
            },
        )
        .await;

        let outcome = if result.is_ok() { "converged" } else { "failed" };
        CONVERGENCE_WAIT_SECONDS
            .with_label_values(&[goal.label(), outcome])
            .observe(started.elapsed().as_secs_f64());
        match &result {
            Ok(()) => debug!("Reached {goal} after {:?}", started.elapsed()),
            Err(e) => warn!("Gave up waiting for {goal}: {e}"),
        }
        result
    }

    async fn probe(
        &self,
        goal: &ConvergenceGoal,
    ) -> Result<Probe<(), String>> {
        CONVERGENCE_POLLS.with_label_values(&[goal.label()]).inc();
        match self.observe(goal).await {
            Err(e) if is_transport(&e) => Ok(Probe::Pending(format!("unreachable: {e}"))),
            other => other,
        }
    }

    async fn observe(
        &self,
        goal: &ConvergenceGoal,
    ) -> Result<Probe<(), String>> {
        let probe = match goal {
            ConvergenceGoal::DirectorySize(expected) => {
                let directory = self.get_directory().await?;
                if directory.len() == *expected {
                    Probe::Ready(())
                } else {
                    let names: Vec<&str> = directory.iter().map(|e| e.name.as_str()).collect();
                    Probe::Pending(format!("{} member(s): [{}]", directory.len(), names.join(", ")))
                }
            }
            ConvergenceGoal::ReadyForWrites(table) => {
                flag(self.table_status(table).await?, |s| s.ready_for_writes)
            }
            ConvergenceGoal::AllReplicasReady(table) => {
                flag(self.table_status(table).await?, |s| s.all_replicas_ready)
            }
            ConvergenceGoal::BlueprintSatisfied(table) => {
                flag(self.table_status(table).await?, |s| s.blueprint_satisfied)
            }
            ConvergenceGoal::NoIssues => {
                let issues = self.get_issues().await?;
                let remaining = untolerated(&issues, &self.convergence.tolerated_issues);
                if remaining.is_empty() {
                    Probe::Ready(())
                } else {
                    Probe::Pending(format!("issues {{{}}}", join(&remaining)))
                }
            }
            ConvergenceGoal::Issues(expected) => {
                let issues = self.get_issues().await?;
                if matches_exactly(&issues, expected) {
                    Probe::Ready(())
                } else {
                    Probe::Pending(format!("issues {{{}}}", join(&issues)))
                }
            }
        };
        Ok(probe)
    }

    // ---------------------------------------------------------------------
    // Transport

    /// GET with retries on transport failures only.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let url = url.as_str();
        let this = self;
        task_with_timeout_and_exponential_backoff(
            || async move {
                match this.fetch::<T>(url).await {
                    Err(e) if is_transport(&e) => Err(e),
                    settled => Ok(settled),
                }
            },
            self.read_policy,
        )
        .await?
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T> {
        let response = self.http.get(url).send().await.map_err(|source| {
            ControlPlaneError::Request {
                url: url.to_string(),
                source,
            }
        })?;
        let body = read_body(url, response).await?;
        serde_json::from_str(&body).map_err(|source| {
            ControlPlaneError::Decode {
                url: url.to_string(),
                source,
            }
            .into()
        })
    }

    /// Sent exactly once; a failed mutation leaves the view untouched.
    async fn send_mutation(
        &self,
        mutation: &Mutation,
    ) -> Result<MutationResponse> {
        let url = format!("{}/ajax/mutations", self.base_url);
        debug!("[:ControlPlaneClient:mutate] {}: {:?}", mutation.op(), mutation);

        let response = self.http.post(&url).json(mutation).send().await.map_err(|source| {
            ControlPlaneError::Request {
                url: url.clone(),
                source,
            }
        })?;
        let body = read_body(&url, response).await?;
        if body.trim().is_empty() {
            return Ok(MutationResponse::default());
        }
        serde_json::from_str(&body)
            .map_err(|source| ControlPlaneError::Decode { url, source }.into())
    }
}

async fn read_body(
    url: &str,
    response: reqwest::Response,
) -> Result<String> {
    let status = response.status();
    let body = response.text().await.map_err(|source| ControlPlaneError::Request {
        url: url.to_string(),
        source,
    })?;
    if !status.is_success() {
        return Err(ControlPlaneError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }
    Ok(body)
}

fn created_id(
    mutation: &Mutation,
    response: MutationResponse,
) -> Result<String> {
    response
        .id
        .ok_or_else(|| Error::IllegalState(format!("{} answer carried no id", mutation.op())))
}

/// Connection failures and per-attempt timeouts; worth another try.
fn is_transport(e: &Error) -> bool {
    matches!(e, Error::ControlPlane(ControlPlaneError::Request { .. }) | Error::Io(_))
}

fn flag(
    status: TableStatus,
    pick: impl Fn(&TableStatus) -> bool,
) -> Probe<(), String> {
    if pick(&status) {
        Probe::Ready(())
    } else {
        Probe::Pending(format!("{status:?}"))
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ")
}
