use super::GroupId;
use super::ProcessId;

/// Insertion-ordered set of processes that can all reach each other.
///
/// Only a [`super::PartitionRegistry`] creates groups or changes membership.
#[derive(Debug, Clone)]
pub struct ConnectivityGroup {
    id: GroupId,
    name: String,
    members: Vec<ProcessId>,
}

impl ConnectivityGroup {
    pub(crate) fn new(
        id: GroupId,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[ProcessId] {
        &self.members
    }

    pub fn contains(
        &self,
        process: ProcessId,
    ) -> bool {
        self.members.contains(&process)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn insert(
        &mut self,
        process: ProcessId,
    ) {
        if !self.contains(process) {
            self.members.push(process);
        }
    }

    pub(crate) fn remove(
        &mut self,
        process: ProcessId,
    ) -> bool {
        let before = self.members.len();
        self.members.retain(|p| *p != process);
        before != self.members.len()
    }
}
