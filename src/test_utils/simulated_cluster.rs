//! Admin endpoints of a whole cluster of fake servers.
//!
//! Every member is served under `/members/<name>/ajax/...`, so pointing
//! `control_plane.endpoint` at [`SimulatedCluster::endpoint`] routes each
//! registry client here. Once [`SimulatedCluster::attach`]ed to a registry's
//! view, directory and issues are computed per requesting member from live
//! membership and link state.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;
use tokio::sync::oneshot;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Filter;
use warp::Reply;

use crate::control_plane::DirectoryEntry;
use crate::control_plane::Distribution;
use crate::control_plane::Issue;
use crate::control_plane::IssueKind;
use crate::control_plane::ShardCount;
use crate::partition::ClusterView;
use crate::partition::MemberStatus;

/// Node id the simulated cluster reports for the member `name`.
pub(crate) fn node_id(name: &str) -> String {
    format!("{name}-id")
}

struct SimulatedTable {
    boundaries: Vec<String>,
    visible: u64,
}

pub(crate) struct ClusterState {
    view: Option<ClusterView>,
    dead: BTreeSet<String>,
    tables: BTreeMap<String, SimulatedTable>,
    /// Every mutation body received
    pub mutations: Vec<Value>,
    /// Records every created table ends up holding
    pub records: u64,
    /// Records that become visible per distribution read; 0 shows them all
    /// at once
    pub ingest_per_read: u64,
    next_id: u32,
}

impl ClusterState {
    fn new() -> Self {
        Self {
            view: None,
            dead: BTreeSet::new(),
            tables: BTreeMap::new(),
            mutations: Vec::new(),
            records: 0,
            ingest_per_read: 0,
            next_id: 0,
        }
    }

    fn members(&self) -> Vec<MemberStatus> {
        self.view.as_ref().map(ClusterView::members).unwrap_or_default()
    }

    fn reaches(
        &self,
        me: &MemberStatus,
        other: &MemberStatus,
    ) -> bool {
        self.view.as_ref().is_some_and(|v| v.is_reachable(me.id, other.id))
    }

    /// Members only answer while alive.
    fn requester(
        &self,
        name: &str,
    ) -> Option<MemberStatus> {
        self.members().into_iter().find(|m| m.name == name && m.alive)
    }

    fn directory(
        &self,
        me: &MemberStatus,
    ) -> Vec<DirectoryEntry> {
        self.members()
            .into_iter()
            .filter(|m| m.alive && !self.dead.contains(&node_id(&m.name)))
            .filter(|m| self.reaches(me, m))
            .map(|m| DirectoryEntry {
                id: node_id(&m.name).into(),
                name: m.name,
                tags: Vec::new(),
            })
            .collect()
    }

    fn issues(
        &self,
        me: &MemberStatus,
    ) -> Vec<Issue> {
        self.members()
            .into_iter()
            .filter(|m| m.id != me.id && !self.dead.contains(&node_id(&m.name)))
            .filter(|m| !m.alive || !self.reaches(me, m))
            .map(|m| Issue {
                kind: IssueKind::MachineDown,
                subject_ids: vec![node_id(&m.name)],
                detail: format!("{} is unreachable", m.name),
            })
            .collect()
    }

    fn distribution(
        &mut self,
        table: &str,
    ) -> Option<Distribution> {
        let (records, ingest) = (self.records, self.ingest_per_read);
        let table = self.tables.get_mut(table)?;
        table.visible = match ingest {
            0 => records,
            n => (table.visible + n).min(records),
        };

        let bounds = &table.boundaries;
        let shards = bounds.len() as u64 + 1;
        let shards = (0..bounds.len() + 1)
            .map(|i| ShardCount {
                lower: i.checked_sub(1).map(|j| bounds[j].clone()),
                upper: bounds.get(i).cloned(),
                count: table.visible / shards + u64::from((i as u64) < table.visible % shards),
            })
            .collect();
        Some(Distribution { shards })
    }

    fn mutate(
        &mut self,
        body: Value,
    ) -> Response {
        let op = body.get("op").and_then(Value::as_str).unwrap_or_default().to_string();
        self.mutations.push(body.clone());
        let text = |key: &str| body.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        let bounds = |key: &str| -> Vec<String> {
            body.get(key).and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default()
        };

        match op.as_str() {
            "create_datacenter" | "create_table" => {
                self.next_id += 1;
                let id = format!("{op}-{}", self.next_id);
                if op == "create_table" {
                    self.tables.insert(
                        id.clone(),
                        SimulatedTable {
                            boundaries: bounds("shard_boundaries"),
                            visible: 0,
                        },
                    );
                }
                return warp::reply::json(&json!({ "id": id })).into_response();
            }
            "set_shard_boundaries" => {
                if let Some(table) = self.tables.get_mut(&text("table")) {
                    table.boundaries = bounds("boundaries");
                }
            }
            "declare_dead" => {
                self.dead.insert(text("node"));
            }
            _ => {}
        }
        warp::reply::json(&json!({})).into_response()
    }

    pub(crate) fn mutation_ops(&self) -> Vec<String> {
        self.mutations
            .iter()
            .filter_map(|m| m.get("op").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

type Shared = Arc<Mutex<ClusterState>>;

fn not_a_member(name: &str) -> Response {
    warp::reply::with_status(format!("{name} is not serving"), StatusCode::NOT_FOUND).into_response()
}

pub(crate) struct SimulatedCluster {
    pub state: Shared,
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl SimulatedCluster {
    pub(crate) fn start() -> Self {
        let state = Arc::new(Mutex::new(ClusterState::new()));
        let with_state = {
            let state = state.clone();
            warp::any().map(move || state.clone())
        };

        let mutations = warp::post()
            .and(warp::path!("members" / String / "ajax" / "mutations"))
            .and(warp::body::json::<Value>())
            .and(with_state.clone())
            .map(|name: String, body, state: Shared| {
                let mut state = state.lock();
                match state.requester(&name) {
                    Some(_) => state.mutate(body),
                    None => not_a_member(&name),
                }
            });
        let directory = warp::get()
            .and(warp::path!("members" / String / "ajax" / "directory"))
            .and(with_state.clone())
            .map(|name: String, state: Shared| {
                let state = state.lock();
                match state.requester(&name) {
                    Some(me) => warp::reply::json(&state.directory(&me)).into_response(),
                    None => not_a_member(&name),
                }
            });
        let issues = warp::get()
            .and(warp::path!("members" / String / "ajax" / "issues"))
            .and(with_state.clone())
            .map(|name: String, state: Shared| {
                let state = state.lock();
                match state.requester(&name) {
                    Some(me) => warp::reply::json(&state.issues(&me)).into_response(),
                    None => not_a_member(&name),
                }
            });
        let progress = warp::get()
            .and(warp::path!("members" / String / "ajax" / "progress"))
            .map(|_name: String| warp::reply::json(&json!({})).into_response());
        let distribution = warp::get()
            .and(warp::path!("members" / String / "ajax" / "distribution"))
            .and(warp::query::<HashMap<String, String>>())
            .and(with_state.clone())
            .map(|_name: String, query: HashMap<String, String>, state: Shared| {
                let table = query.get("table").cloned().unwrap_or_default();
                match state.lock().distribution(&table) {
                    Some(distribution) => warp::reply::json(&distribution).into_response(),
                    None => warp::reply::with_status("no such table", StatusCode::NOT_FOUND)
                        .into_response(),
                }
            });
        let status = warp::get()
            .and(warp::path!("members" / String / "ajax" / "tables" / String / "status"))
            .map(|_name: String, _table: String| {
                warp::reply::json(&json!({
                    "ready_for_outdated_reads": true,
                    "ready_for_reads": true,
                    "ready_for_writes": true,
                    "all_replicas_ready": true,
                    "blueprint_satisfied": true,
                }))
                .into_response()
            });

        let routes = mutations
            .or(directory)
            .unify()
            .or(issues)
            .unify()
            .or(progress)
            .unify()
            .or(distribution)
            .unify()
            .or(status)
            .unify();

        let (tx, rx) = oneshot::channel::<()>();
        let (addr, server) =
            warp::serve(routes).bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async move {
                rx.await.ok();
            });
        tokio::spawn(server);

        Self {
            state,
            addr,
            shutdown: Some(tx),
        }
    }

    /// Answers for the members of `view` from now on.
    pub(crate) fn attach(
        &self,
        view: ClusterView,
    ) {
        self.state.lock().view = Some(view);
    }

    /// Value for `control_plane.endpoint` routing every member here.
    pub(crate) fn endpoint(&self) -> String {
        format!("http://{}/members/{{name}}", self.addr)
    }

    pub(crate) fn mutation_ops(&self) -> Vec<String> {
        self.state.lock().mutation_ops()
    }
}

impl Drop for SimulatedCluster {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
