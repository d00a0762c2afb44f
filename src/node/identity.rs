use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use nanoid::nanoid;
use serde::Deserialize;
use serde::Serialize;

use crate::config::PortMode;
use crate::utils::net::pick_free_port;
use crate::Error;
use crate::ProcessError;
use crate::Result;

const NAME_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// The three ports every server listens on.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerPorts {
    pub cluster: u16,
    pub http_admin: u16,
    pub client_driver: u16,
}

impl fmt::Display for ServerPorts {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "cluster={} http={} driver={}",
            self.cluster, self.http_admin, self.client_driver
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStrategy {
    /// Ports chosen by the caller
    Fixed(ServerPorts),
    /// Free local ports picked right before each launch
    Ephemeral,
    /// Launched with port 0; the bound ports are read back from the log
    Reported,
}

impl From<PortMode> for PortStrategy {
    fn from(mode: PortMode) -> Self {
        match mode {
            PortMode::Ephemeral => PortStrategy::Ephemeral,
            PortMode::Reported => PortStrategy::Reported,
        }
    }
}

impl PortStrategy {
    /// Ports handed to the server on the command line, and whether they are final.
    pub(crate) fn resolve(
        &self,
        host: &str,
    ) -> Result<(ServerPorts, bool)> {
        match self {
            PortStrategy::Fixed(ports) => Ok((*ports, true)),
            PortStrategy::Reported => Ok((
                ServerPorts {
                    cluster: 0,
                    http_admin: 0,
                    client_driver: 0,
                },
                false,
            )),
            PortStrategy::Ephemeral => {
                let mut picked: Vec<u16> = Vec::with_capacity(3);
                while picked.len() < 3 {
                    let port = pick_free_port(host)?;
                    if !picked.contains(&port) {
                        picked.push(port);
                    }
                }
                Ok((
                    ServerPorts {
                        cluster: picked[0],
                        http_admin: picked[1],
                        client_driver: picked[2],
                    },
                    true,
                ))
            }
        }
    }
}

/// Static identity of a server: survives restarts of the process behind it.
///
/// Clones share one data-directory lease, so two processes started from the
/// same identity can never run against the same directory at once.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    name: String,
    data_dir: PathBuf,
    tags: Vec<String>,
    port_strategy: PortStrategy,
    lease: Arc<AtomicBool>,
}

impl NodeIdentity {
    pub fn new(
        name: impl Into<String>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            data_dir: data_dir.into(),
            tags: Vec::new(),
            port_strategy: PortStrategy::Ephemeral,
            lease: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identity named `<prefix>_<random>` with its data directory under `work_dir`.
    pub fn generated(
        work_dir: &Path,
        prefix: &str,
    ) -> Self {
        let name = format!("{prefix}_{}", nanoid!(8, &NAME_ALPHABET));
        let data_dir = work_dir.join(&name);
        Self::new(name, data_dir)
    }

    /// Adds a placement tag; tags keep insertion order and never repeat.
    pub fn with_tag(
        mut self,
        tag: impl Into<String>,
    ) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn with_port_strategy(
        mut self,
        strategy: PortStrategy,
    ) -> Self {
        self.port_strategy = strategy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn port_strategy(&self) -> PortStrategy {
        self.port_strategy
    }

    pub fn is_leased(&self) -> bool {
        self.lease.load(Ordering::SeqCst)
    }

    pub(crate) fn acquire_data_dir(&self) -> Result<DataDirLease> {
        self.lease
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::Process(ProcessError::DataDirInUse(self.data_dir.clone())))?;
        Ok(DataDirLease {
            flag: self.lease.clone(),
        })
    }
}

/// Released when the process holding it is gone.
#[derive(Debug)]
pub(crate) struct DataDirLease {
    flag: Arc<AtomicBool>,
}

impl Drop for DataDirLease {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
