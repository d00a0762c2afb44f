//! Captures a server's stdout/stderr into its log file and scans every line
//! for the readiness marker and the port reports.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use regex::Regex;
use tokio::fs::File;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::ServerPorts;
use crate::config::compile_port_pattern;
use crate::config::ServerConfig;
use crate::Result;

/// What the log has told us so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSignals {
    pub ready_seen: bool,
    pub cluster_port: Option<u16>,
    pub http_port: Option<u16>,
    pub driver_port: Option<u16>,
    pub lines: u64,
}

impl LogSignals {
    pub fn reported_ports(&self) -> Option<ServerPorts> {
        Some(ServerPorts {
            cluster: self.cluster_port?,
            http_admin: self.http_port?,
            client_driver: self.driver_port?,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LogMarkers {
    ready: String,
    cluster: Regex,
    http: Regex,
    driver: Regex,
}

impl LogMarkers {
    pub(crate) fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            ready: config.ready_marker.clone(),
            cluster: compile_port_pattern("cluster_port_pattern", &config.cluster_port_pattern)?,
            http: compile_port_pattern("http_port_pattern", &config.http_port_pattern)?,
            driver: compile_port_pattern("driver_port_pattern", &config.driver_port_pattern)?,
        })
    }

    /// Applies one line to `signals`; returns whether anything changed.
    pub(crate) fn observe(
        &self,
        line: &str,
        signals: &mut LogSignals,
    ) -> bool {
        let before = signals.clone();
        signals.lines += 1;
        if line.contains(&self.ready) {
            signals.ready_seen = true;
        }
        if let Some(port) = capture_port(&self.cluster, line) {
            signals.cluster_port = Some(port);
        }
        if let Some(port) = capture_port(&self.http, line) {
            signals.http_port = Some(port);
        }
        if let Some(port) = capture_port(&self.driver, line) {
            signals.driver_port = Some(port);
        }
        signals.ready_seen != before.ready_seen
            || signals.cluster_port != before.cluster_port
            || signals.http_port != before.http_port
            || signals.driver_port != before.driver_port
    }
}

fn capture_port(
    re: &Regex,
    line: &str,
) -> Option<u16> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Bounded in-memory copy of the most recent output lines.
#[derive(Debug)]
pub(crate) struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(
        &mut self,
        line: String,
    ) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub(crate) fn render(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Spawns the task that drains both pipes until they close.
pub(crate) fn spawn_capture<O, E>(
    node: String,
    stdout: O,
    stderr: E,
    mut log_file: File,
    markers: LogMarkers,
    signals: watch::Sender<LogSignals>,
    tail: Arc<Mutex<OutputTail>>,
) -> JoinHandle<()>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let out = LinesStream::new(BufReader::new(stdout).lines());
        let err = LinesStream::new(BufReader::new(stderr).lines());
        let mut lines = stream::select(out, err);

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(%node, "output capture stopped: {}", e);
                    break;
                }
            };
            trace!(%node, "{}", line);

            if let Err(e) = write_line(&mut log_file, &line).await {
                warn!(%node, "failed to append to node log: {}", e);
            }
            signals.send_if_modified(|s| markers.observe(&line, s));
            tail.lock().push(line);
        }

        if let Err(e) = log_file.flush().await {
            warn!(%node, "failed to flush node log: {}", e);
        }
        debug!(%node, "output pipes closed");
    })
}

async fn write_line(
    file: &mut File,
    line: &str,
) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.write_u8(b'\n').await
}

/// Waits for a capture task, giving up if grandchildren keep the pipes open.
pub(crate) async fn join_capture(capture: JoinHandle<()>) {
    if tokio::time::timeout(Duration::from_secs(2), capture).await.is_err() {
        debug!("output capture still draining after exit");
    }
}
