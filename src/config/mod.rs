//! Configuration management for the cluster harness.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod cluster;
mod control_plane;
mod retry;
mod scenario;
mod server;
mod workload;
pub use cluster::*;
pub use control_plane::*;
pub use retry::*;
pub use scenario::*;
pub use server::*;
pub use workload::*;

use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "HARNESS";

/// Top-level harness configuration
///
/// Layers, later overriding earlier:
/// 1. Default values from code
/// 2. Configuration file named by `CONFIG_PATH`
/// 3. Environment variables with `HARNESS__` prefix
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct HarnessConfig {
    /// Working and log directories shared by one run
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// How server processes are launched and supervised
    #[serde(default)]
    pub server: ServerConfig,
    /// Admin client and convergence thresholds
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    /// Workload runner defaults
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Retry policies for harness-side I/O
    #[serde(default)]
    pub retry: RetryPolicies,
    /// What the `cluster-harness` binary runs
    #[serde(default)]
    pub scenario: ScenarioConfig,
}

impl HarnessConfig {
    /// Loads configuration from defaults, `CONFIG_PATH` and the environment.
    ///
    /// Not validated: call [`HarnessConfig::validate`] once every override
    /// has been applied.
    ///
    /// ```ignore
    /// std::env::set_var("HARNESS__SERVER__BINARY", "/usr/bin/rethinkdb");
    /// let cfg = HarnessConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Layers a file and then the environment on top of the current values.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section, consuming and returning the configuration.
    pub fn validate(self) -> Result<Self> {
        self.cluster.validate()?;
        self.server.validate()?;
        self.control_plane.validate()?;
        self.workload.validate()?;
        self.retry.validate()?;
        self.scenario.validate()?;
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
