use std::sync::Arc;

use super::health_monitor::ExitBoard;
use super::ProcessId;
use super::Reachability;

/// One process as seen through a [`ClusterView`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberStatus {
    pub id: ProcessId,
    pub name: String,
    pub alive: bool,
}

/// Membership and reachability of a registry, readable while the registry
/// itself is borrowed mutably elsewhere.
///
/// Killed processes stay listed as not alive; removed ones disappear.
#[derive(Clone)]
pub struct ClusterView {
    board: ExitBoard,
    links: Arc<dyn Reachability>,
}

impl ClusterView {
    pub(crate) fn new(
        board: ExitBoard,
        links: Arc<dyn Reachability>,
    ) -> Self {
        Self { board, links }
    }

    /// Every process the registry still owns, ordered by id.
    pub fn members(&self) -> Vec<MemberStatus> {
        let mut members: Vec<MemberStatus> = self
            .board
            .iter()
            .map(|entry| MemberStatus {
                id: *entry.key(),
                name: entry.value().name().to_string(),
                alive: !entry.value().has_exited(),
            })
            .collect();
        members.sort_by_key(|m| m.id);
        members
    }

    pub fn member_by_name(
        &self,
        name: &str,
    ) -> Option<MemberStatus> {
        self.members().into_iter().find(|m| m.name == name)
    }

    /// Whether traffic currently flows between `a` and `b`; a process always
    /// reaches itself.
    pub fn is_reachable(
        &self,
        a: ProcessId,
        b: ProcessId,
    ) -> bool {
        a == b || self.links.link_state(a, b).unwrap_or(false)
    }
}

impl std::fmt::Debug for ClusterView {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ClusterView").field("members", &self.board.len()).finish()
    }
}
