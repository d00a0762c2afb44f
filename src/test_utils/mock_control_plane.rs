//! In-process stand-in for a member's administrative HTTP endpoint.

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

use crate::control_plane::ControlPlaneClient;
use crate::control_plane::DirectoryEntry;
use crate::control_plane::Distribution;
use crate::control_plane::Issue;
use crate::control_plane::Progress;
use crate::BackoffPolicy;
use crate::ControlPlaneConfig;
use crate::ConvergenceConfig;

#[derive(Default)]
pub(crate) struct MockState {
    pub directory: Vec<DirectoryEntry>,
    pub issues: Vec<Issue>,
    pub progress: Progress,
    pub distribution: Distribution,
    /// Every mutation body received, rejected ones included
    pub mutations: Vec<Value>,
    /// Mutation ops answered with a 500
    pub rejected_ops: Vec<String>,
    /// Status polls answered not-ready before a table turns ready
    pub status_polls_before_ready: u32,
    pub status_polls: u32,
    next_id: u32,
}

impl MockState {
    pub(crate) fn add_member(
        &mut self,
        id: &str,
        name: &str,
    ) {
        self.directory.push(DirectoryEntry {
            id: id.into(),
            name: name.to_string(),
            tags: Vec::new(),
        });
    }

    pub(crate) fn add_issue(
        &mut self,
        kind: &str,
        subject: &str,
    ) {
        self.issues.push(Issue {
            kind: kind.into(),
            subject_ids: vec![subject.to_string()],
            detail: String::new(),
        });
    }

    fn mutate(
        &mut self,
        body: Value,
    ) -> Response {
        let op = body.get("op").and_then(Value::as_str).unwrap_or_default().to_string();
        self.mutations.push(body.clone());
        if self.rejected_ops.contains(&op) {
            return warp::reply::with_status(
                warp::reply::json(&json!({ "error": format!("{op} rejected") })),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response();
        }

        let node = body.get("node").and_then(Value::as_str).map(str::to_string);
        match op.as_str() {
            "create_datacenter" | "create_table" => {
                self.next_id += 1;
                return warp::reply::json(&json!({ "id": format!("{op}-{}", self.next_id) }))
                    .into_response();
            }
            "declare_dead" => {
                if let Some(node) = node {
                    self.issues.retain(|i| !i.subject_ids.contains(&node));
                    self.directory.retain(|e| e.id.0 != node);
                }
            }
            "rename_node" => {
                let name = body.get("name").and_then(Value::as_str).unwrap_or_default();
                for entry in self.directory.iter_mut().filter(|e| Some(&e.id.0) == node.as_ref()) {
                    entry.name = name.to_string();
                }
            }
            _ => {}
        }
        warp::reply::json(&json!({})).into_response()
    }

    fn table_status(
        &mut self,
        table: &str,
    ) -> Response {
        if table == "missing" {
            return warp::reply::with_status("no such table", StatusCode::NOT_FOUND).into_response();
        }
        self.status_polls += 1;
        let ready = self.status_polls > self.status_polls_before_ready;
        warp::reply::json(&json!({
            "ready_for_outdated_reads": ready,
            "ready_for_reads": ready,
            "ready_for_writes": ready,
            "all_replicas_ready": ready,
            "blueprint_satisfied": ready,
        }))
        .into_response()
    }
}

pub(crate) struct MockControlPlane {
    pub state: Arc<Mutex<MockState>>,
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockControlPlane {
    pub(crate) fn start() -> Self {
        let state = Arc::new(Mutex::new(MockState::default()));
        let with_state = {
            let state = state.clone();
            warp::any().map(move || state.clone())
        };

        let mutations = warp::post()
            .and(warp::path!("ajax" / "mutations"))
            .and(warp::body::json::<Value>())
            .and(with_state.clone())
            .map(|body, state: Arc<Mutex<MockState>>| state.lock().mutate(body));
        let directory = warp::get()
            .and(warp::path!("ajax" / "directory"))
            .and(with_state.clone())
            .map(|state: Arc<Mutex<MockState>>| {
                warp::reply::json(&state.lock().directory).into_response()
            });
        let issues = warp::get()
            .and(warp::path!("ajax" / "issues"))
            .and(with_state.clone())
            .map(|state: Arc<Mutex<MockState>>| {
                warp::reply::json(&state.lock().issues).into_response()
            });
        let progress = warp::get()
            .and(warp::path!("ajax" / "progress"))
            .and(with_state.clone())
            .map(|state: Arc<Mutex<MockState>>| {
                warp::reply::json(&state.lock().progress).into_response()
            });
        let distribution = warp::get()
            .and(warp::path!("ajax" / "distribution"))
            .and(warp::query::<HashMap<String, String>>())
            .and(with_state.clone())
            .map(|_query: HashMap<String, String>, state: Arc<Mutex<MockState>>| {
                warp::reply::json(&state.lock().distribution).into_response()
            });
        let status = warp::get()
            .and(warp::path!("ajax" / "tables" / String / "status"))
            .and(with_state)
            .map(|table: String, state: Arc<Mutex<MockState>>| {
                state.lock().table_status(&table)
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

    pub(crate) fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn client(&self) -> ControlPlaneClient {
        self.client_with(fast_convergence())
    }

    pub(crate) fn client_with(
        &self,
        convergence: ConvergenceConfig,
    ) -> ControlPlaneClient {
        let config = ControlPlaneConfig {
            request_timeout_ms: 500,
            convergence,
            ..ControlPlaneConfig::default()
        };
        ControlPlaneClient::new(self.base_url(), &config, fast_reads()).unwrap()
    }

    pub(crate) fn mutation_ops(&self) -> Vec<String> {
        self.state
            .lock()
            .mutations
            .iter()
            .filter_map(|m| m.get("op").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

impl Drop for MockControlPlane {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub(crate) fn fast_convergence() -> ConvergenceConfig {
    ConvergenceConfig {
        poll_interval_ms: 20,
        timeout_ms: 1_000,
        settle_polls: 1,
        tolerated_issues: Vec::new(),
    }
}

pub(crate) fn fast_reads() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 2,
        timeout_ms: 500,
        base_delay_ms: 10,
        max_delay_ms: 20,
    }
}
