use std::collections::BTreeMap;
use std::collections::BTreeSet;

use super::DatacenterId;
use super::NodeId;
use super::TableId;
use crate::ControlPlaneError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatacenterSpec {
    pub name: String,
    pub members: BTreeSet<NodeId>,
}

/// Where a table's replicas live and how it is sharded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub primary: DatacenterId,
    /// Replica count per datacenter
    pub affinities: BTreeMap<DatacenterId, u32>,
    /// Split points; strictly increasing
    pub shard_boundaries: Vec<String>,
}

impl Placement {
    /// One replica in the primary datacenter, one shard.
    pub fn new(primary: DatacenterId) -> Self {
        let mut affinities = BTreeMap::new();
        affinities.insert(primary.clone(), 1);
        Self {
            primary,
            affinities,
            shard_boundaries: Vec::new(),
        }
    }

    pub fn with_replicas(
        mut self,
        datacenter: DatacenterId,
        replicas: u32,
    ) -> Self {
        self.affinities.insert(datacenter, replicas);
        self
    }

    pub fn with_shard_boundaries(
        mut self,
        boundaries: Vec<String>,
    ) -> Self {
        self.shard_boundaries = boundaries;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub placement: Placement,
}

/// What the harness has created or changed so far, shared by every client
/// of one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySpec {
    pub datacenters: BTreeMap<DatacenterId, DatacenterSpec>,
    pub tables: BTreeMap<TableId, TableSpec>,
    /// Members declared permanently gone
    pub dead: BTreeSet<NodeId>,
}

impl TopologySpec {
    pub fn datacenter_by_name(
        &self,
        name: &str,
    ) -> Option<&DatacenterId> {
        self.datacenters.iter().find(|(_, dc)| dc.name == name).map(|(id, _)| id)
    }

    pub fn table_by_name(
        &self,
        name: &str,
    ) -> Option<&TableId> {
        self.tables.iter().find(|(_, t)| t.name == name).map(|(id, _)| id)
    }

    pub fn table(
        &self,
        id: &TableId,
    ) -> Result<&TableSpec> {
        self.tables
            .get(id)
            .ok_or_else(|| ControlPlaneError::UnknownTable(id.to_string()).into())
    }

    pub fn datacenter_of(
        &self,
        node: &NodeId,
    ) -> Option<&DatacenterId> {
        self.datacenters.iter().find(|(_, dc)| dc.members.contains(node)).map(|(id, _)| id)
    }

    pub(crate) fn require_datacenter(
        &self,
        id: &DatacenterId,
    ) -> Result<()> {
        if self.datacenters.contains_key(id) {
            Ok(())
        } else {
            Err(ControlPlaneError::UnknownDatacenter(id.to_string()).into())
        }
    }

    /// Every datacenter must be known and the primary must hold a replica.
    pub fn validate_placement(
        &self,
        placement: &Placement,
    ) -> Result<()> {
        self.require_datacenter(&placement.primary)?;
        for datacenter in placement.affinities.keys() {
            self.require_datacenter(datacenter)?;
        }
        if placement.affinities.get(&placement.primary).copied().unwrap_or(0) == 0 {
            return Err(ControlPlaneError::InvalidTopology(format!(
                "primary datacenter {} must hold at least one replica",
                placement.primary
            ))
            .into());
        }
        validate_boundaries(&placement.shard_boundaries)
    }
}

pub fn validate_boundaries(boundaries: &[String]) -> Result<()> {
    for pair in boundaries.windows(2) {
        if pair[0] >= pair[1] {
            return Err(ControlPlaneError::InvalidTopology(format!(
                "shard boundaries must be strictly increasing: {:?} >= {:?}",
                pair[0], pair[1]
            ))
            .into());
        }
    }
    Ok(())
}

/// Applies removals then additions to a boundary list.
///
/// Removing an absent boundary or adding a present one is rejected, so a
/// change list never silently does less than it says.
pub fn apply_boundary_change(
    current: &[String],
    adds: &[String],
    removes: &[String],
) -> Result<Vec<String>> {
    let mut next: BTreeSet<String> = current.iter().cloned().collect();
    for boundary in removes {
        if !next.remove(boundary) {
            return Err(ControlPlaneError::InvalidTopology(format!(
                "cannot remove missing shard boundary {boundary:?}"
            ))
            .into());
        }
    }
    for boundary in adds {
        if !next.insert(boundary.clone()) {
            return Err(ControlPlaneError::InvalidTopology(format!(
                "shard boundary {boundary:?} already exists"
            ))
            .into());
        }
    }
    Ok(next.into_iter().collect())
}
