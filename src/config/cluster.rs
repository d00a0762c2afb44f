use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::utils::time::run_dir_name;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Root under which every node's data directory is created
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Where server, workload and harness logs are written. Never cleaned up.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Host every process binds to and every client connects to
    #[serde(default = "default_host")]
    pub host: String,

    /// Nest both directories under a per-run `<scenario>-<pid>-<millis>` folder
    #[serde(default = "default_unique_run_dir")]
    pub unique_run_dir: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            log_dir: default_log_dir(),
            host: default_host(),
            unique_run_dir: default_unique_run_dir(),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("cluster.host cannot be empty".into()));
        }
        if self.work_dir.as_os_str().is_empty() || self.log_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "cluster.work_dir and cluster.log_dir must be set".into(),
            ));
        }
        Ok(())
    }

    /// Returns a copy whose directories are specific to one run of `label`.
    pub fn for_run(
        &self,
        label: &str,
    ) -> Self {
        if !self.unique_run_dir {
            return self.clone();
        }
        let run = run_dir_name(label);
        Self {
            work_dir: self.work_dir.join(&run),
            log_dir: self.log_dir.join(&run),
            host: self.host.clone(),
            unique_run_dir: false,
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./target/harness/data")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./target/harness/logs")
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_unique_run_dir() -> bool {
    true
}
