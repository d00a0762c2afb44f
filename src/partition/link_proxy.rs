//! Pairwise TCP relays standing between server processes.
//!
//! Every pair of processes talks through one relay owned by the harness.
//! Severing a relay tears down its live connections and refuses new ones,
//! which is how a network split is simulated without touching the firewall.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::io::copy_bidirectional;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ProcessId;
use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::metrics::LINK_CHANGES;
use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Who can reach whom.
#[cfg_attr(test, automock)]
pub trait Reachability: Send + Sync + 'static {
    /// Opens (or returns the existing) route for the pair `from`/`to`.
    ///
    /// The returned address relays to `target`, which must be the cluster
    /// address of `to`. A new route starts out reachable.
    fn open_route(
        &self,
        from: ProcessId,
        to: ProcessId,
        target: SocketAddr,
    ) -> Result<SocketAddr>;

    /// Points every route towards `process` at its new cluster address.
    fn retarget(
        &self,
        process: ProcessId,
        target: SocketAddr,
    );

    fn set_reachable(
        &self,
        a: ProcessId,
        b: ProcessId,
        reachable: bool,
    );

    /// `None` when no route exists between the pair.
    fn link_state(
        &self,
        a: ProcessId,
        b: ProcessId,
    ) -> Option<bool>;

    fn close_routes(
        &self,
        process: ProcessId,
    );

    fn close_all(&self);
}

fn key(
    a: ProcessId,
    b: ProcessId,
) -> (ProcessId, ProcessId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// State shared between a link entry and its accept loop.
#[derive(Clone)]
struct LinkShared {
    target: Arc<RwLock<SocketAddr>>,
    reachable: Arc<AtomicBool>,
    /// Cancelled to drop every live connection; replaced afterwards
    conns: Arc<Mutex<CancellationToken>>,
    closed: CancellationToken,
}

struct Link {
    listen: SocketAddr,
    toward: ProcessId,
    shared: LinkShared,
}

pub struct LinkTable {
    host: String,
    dial: BackoffPolicy,
    links: DashMap<(ProcessId, ProcessId), Link>,
    root: CancellationToken,
}

impl LinkTable {
    pub fn new(
        host: impl Into<String>,
        dial: BackoffPolicy,
    ) -> Self {
        Self {
            host: host.into(),
            dial,
            links: DashMap::new(),
            root: CancellationToken::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl Reachability for LinkTable {
    fn open_route(
        &self,
        from: ProcessId,
        to: ProcessId,
        target: SocketAddr,
    ) -> Result<SocketAddr> {
        if from == to {
            return Err(Error::IllegalState(format!("{from} cannot route to itself")));
        }
        if let Some(link) = self.links.get(&key(from, to)) {
            return Ok(link.listen);
        }

        let std_listener = std::net::TcpListener::bind((self.host.as_str(), 0))?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let listen = listener.local_addr()?;

        let closed = self.root.child_token();
        let shared = LinkShared {
            target: Arc::new(RwLock::new(target)),
            reachable: Arc::new(AtomicBool::new(true)),
            conns: Arc::new(Mutex::new(closed.child_token())),
            closed,
        };
        tokio::spawn(accept_loop(listener, shared.clone(), self.dial));

        debug!("route {} <-> {} listening on {} towards {}", from, to, listen, target);
        self.links.insert(
            key(from, to),
            Link {
                listen,
                toward: to,
                shared,
            },
        );
        Ok(listen)
    }

    fn retarget(
        &self,
        process: ProcessId,
        target: SocketAddr,
    ) {
        for link in self.links.iter() {
            if link.toward == process {
                *link.shared.target.write() = target;
            }
        }
    }

    fn set_reachable(
        &self,
        a: ProcessId,
        b: ProcessId,
        reachable: bool,
    ) {
        let Some(link) = self.links.get(&key(a, b)) else {
            warn!("no route between {} and {}", a, b);
            return;
        };
        let was = link.shared.reachable.swap(reachable, Ordering::SeqCst);
        if was == reachable {
            return;
        }
        if reachable {
            info!("link {} <-> {} restored", a, b);
            LINK_CHANGES.with_label_values(&["restored"]).inc();
        } else {
            let mut conns = link.shared.conns.lock();
            conns.cancel();
            *conns = link.shared.closed.child_token();
            info!("link {} <-> {} severed", a, b);
            LINK_CHANGES.with_label_values(&["severed"]).inc();
        }
    }

    fn link_state(
        &self,
        a: ProcessId,
        b: ProcessId,
    ) -> Option<bool> {
        self.links.get(&key(a, b)).map(|l| l.shared.reachable.load(Ordering::SeqCst))
    }

    fn close_routes(
        &self,
        process: ProcessId,
    ) {
        self.links.retain(|(a, b), link| {
            let keep = *a != process && *b != process;
            if !keep {
                link.shared.closed.cancel();
            }
            keep
        });
    }

    fn close_all(&self) {
        for link in self.links.iter() {
            link.shared.closed.cancel();
        }
        self.links.clear();
    }
}

impl Drop for LinkTable {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: LinkShared,
    dial: BackoffPolicy,
) {
    loop {
        tokio::select! {
            _ = shared.closed.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((inbound, peer)) => {
                    if !shared.reachable.load(Ordering::SeqCst) {
                        trace!("refusing {}: link severed", peer);
                        drop(inbound);
                        continue;
                    }
                    let token = shared.conns.lock().clone();
                    let target = *shared.target.read();
                    tokio::spawn(relay(inbound, target, token, dial));
                }
                Err(e) => {
                    warn!("relay accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
    trace!("relay listener closed");
}

async fn relay(
    mut inbound: TcpStream,
    target: SocketAddr,
    token: CancellationToken,
    dial: BackoffPolicy,
) {
    let connect = move || async move { TcpStream::connect(target).await.map_err(Error::from) };
    let outbound = tokio::select! {
        _ = token.cancelled() => return,
        dialed = task_with_timeout_and_exponential_backoff(connect, dial) => dialed,
    };
    let mut outbound = match outbound {
        Ok(stream) => stream,
        Err(e) => {
            debug!("relay could not reach {}: {}", target, e);
            return;
        }
    };

    tokio::select! {
        _ = token.cancelled() => trace!("relay to {} severed", target),
        copied = copy_bidirectional(&mut inbound, &mut outbound) => match copied {
            Ok((up, down)) => trace!("relay to {} closed ({} up, {} down)", target, up, down),
            Err(e) => trace!("relay to {} ended: {}", target, e),
        },
    }
}
