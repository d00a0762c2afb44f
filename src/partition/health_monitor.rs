use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;

use super::ProcessId;
use crate::node::ExitWatch;
use crate::Error;
use crate::ProcessError;
use crate::Result;

/// Exit views of every process a registry currently owns.
pub(crate) type ExitBoard = Arc<DashMap<ProcessId, ExitWatch>>;

#[derive(Debug, Clone)]
struct CrashRecord {
    name: String,
    status: String,
    output: String,
}

/// Background watcher that notices a server dying between explicit checks.
///
/// Only the first unexpected exit is kept; every one is logged once.
pub struct HealthMonitor {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    first_crash: Arc<Mutex<Option<CrashRecord>>>,
}

impl HealthMonitor {
    pub(crate) fn spawn(
        board: ExitBoard,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        let first_crash = Arc::new(Mutex::new(None));
        let handle = {
            let token = token.clone();
            let first_crash = first_crash.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                let mut reported = HashSet::new();
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => scan(&board, &first_crash, &mut reported),
                    }
                }
                debug!("health monitor stopped");
            })
        };
        Self {
            token,
            handle: Some(handle),
            first_crash,
        }
    }

    /// Fails with the first crash seen so far.
    pub fn check(&self) -> Result<()> {
        match self.first_crash.lock().clone() {
            None => Ok(()),
            Some(crash) => Err(Error::Process(ProcessError::Crashed {
                name: crash.name,
                status: crash.status,
                output: crash.output,
            })),
        }
    }

    pub async fn stop(mut self) -> Result<()> {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        self.check()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn scan(
    board: &ExitBoard,
    first_crash: &Mutex<Option<CrashRecord>>,
    reported: &mut HashSet<ProcessId>,
) {
    for entry in board.iter() {
        let Some(Error::Process(ProcessError::Crashed { name, status, output })) =
            entry.value().unexpected_exit()
        else {
            // live again after a restart
            reported.remove(entry.key());
            continue;
        };
        if !reported.insert(*entry.key()) {
            continue;
        }
        error!("node {} ({}) exited unexpectedly: {}", entry.value().name(), entry.key(), status);

        let mut slot = first_crash.lock();
        if slot.is_none() {
            *slot = Some(CrashRecord { name, status, output });
        }
    }
}
