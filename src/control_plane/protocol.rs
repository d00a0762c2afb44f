//! Documents exchanged with the administrative HTTP endpoint.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(
                &self,
                f: &mut fmt::Formatter<'_>,
            ) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Server-assigned id of a cluster member
    NodeId
);
string_id!(
    /// Server-assigned id of a datacenter
    DatacenterId
);
string_id!(
    /// Server-assigned id of a table
    TableId
);

/// One member as seen by the answering server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Readiness flags of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatus {
    #[serde(default)]
    pub ready_for_outdated_reads: bool,
    #[serde(default)]
    pub ready_for_reads: bool,
    #[serde(default)]
    pub ready_for_writes: bool,
    #[serde(default)]
    pub all_replicas_ready: bool,
    #[serde(default)]
    pub blueprint_satisfied: bool,
}

/// Record count of one shard; open bounds are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardCount {
    #[serde(default)]
    pub lower: Option<String>,
    #[serde(default)]
    pub upper: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    #[serde(default)]
    pub shards: Vec<ShardCount>,
}

impl Distribution {
    pub fn total(&self) -> u64 {
        self.shards.iter().map(|s| s.count).sum()
    }
}

/// Backfill fraction per table and node; `1.0` means done.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Progress(pub BTreeMap<String, BTreeMap<String, f64>>);

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.0.values().flat_map(|nodes| nodes.values()).all(|f| *f >= 1.0)
    }
}

/// Topology change sent to `POST /ajax/mutations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    CreateDatacenter {
        name: String,
    },
    AssignDatacenter {
        node: NodeId,
        datacenter: DatacenterId,
    },
    CreateTable {
        name: String,
        primary: DatacenterId,
        affinities: BTreeMap<DatacenterId, u32>,
        shard_boundaries: Vec<String>,
    },
    SetReplicaAffinities {
        table: TableId,
        primary: DatacenterId,
        affinities: BTreeMap<DatacenterId, u32>,
    },
    SetShardBoundaries {
        table: TableId,
        boundaries: Vec<String>,
    },
    RenameNode {
        node: NodeId,
        name: String,
    },
    DeclareDead {
        node: NodeId,
    },
}

impl Mutation {
    pub fn op(&self) -> &'static str {
        match self {
            Mutation::CreateDatacenter { .. } => "create_datacenter",
            Mutation::AssignDatacenter { .. } => "assign_datacenter",
            Mutation::CreateTable { .. } => "create_table",
            Mutation::SetReplicaAffinities { .. } => "set_replica_affinities",
            Mutation::SetShardBoundaries { .. } => "set_shard_boundaries",
            Mutation::RenameNode { .. } => "rename_node",
            Mutation::DeclareDead { .. } => "declare_dead",
        }
    }
}

/// Body of a mutation answer: creations carry the new id.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MutationResponse {
    #[serde(default)]
    pub id: Option<String>,
}

/// Whether a mutation actually went to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    /// Target state already matched the client's view; nothing was sent
    Unchanged,
}
