use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Write acknowledgement mode passed as `--durability`
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    #[default]
    Hard,
    Soft,
}

impl Durability {
    pub fn as_flag(&self) -> &'static str {
        match self {
            Durability::Hard => "hard",
            Durability::Soft => "soft",
        }
    }
}

/// Per-process launch knobs that are not part of a node's identity
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ServeOptions {
    /// Passed as `--cache-size` when set
    #[serde(default)]
    pub cache_size_mb: Option<u64>,

    #[serde(default)]
    pub durability: Durability,

    /// Appended verbatim after every harness-generated flag
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Extra environment for the server process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ServeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.cache_size_mb == Some(0) {
            return Err(Error::InvalidConfig("server.serve.cache_size_mb must be > 0".into()));
        }
        Ok(())
    }

    pub fn with_cache_size_mb(
        mut self,
        mb: u64,
    ) -> Self {
        self.cache_size_mb = Some(mb);
        self
    }

    pub fn with_durability(
        mut self,
        durability: Durability,
    ) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_extra_arg(
        mut self,
        arg: impl Into<String>,
    ) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn with_env(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
