use std::fmt;

use super::IssueExpectation;
use super::TableId;

/// A cluster state worth waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceGoal {
    /// The answering server sees exactly this many members
    DirectorySize(usize),
    ReadyForWrites(TableId),
    AllReplicasReady(TableId),
    BlueprintSatisfied(TableId),
    /// No issues other than tolerated ones
    NoIssues,
    /// Exactly these issues, nothing more
    Issues(Vec<IssueExpectation>),
}

impl ConvergenceGoal {
    /// Low-cardinality name used as a metric label.
    pub fn label(&self) -> &'static str {
        match self {
            ConvergenceGoal::DirectorySize(_) => "directory_size",
            ConvergenceGoal::ReadyForWrites(_) => "ready_for_writes",
            ConvergenceGoal::AllReplicasReady(_) => "all_replicas_ready",
            ConvergenceGoal::BlueprintSatisfied(_) => "blueprint_satisfied",
            ConvergenceGoal::NoIssues => "no_issues",
            ConvergenceGoal::Issues(_) => "issues",
        }
    }
}

impl fmt::Display for ConvergenceGoal {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ConvergenceGoal::DirectorySize(n) => write!(f, "directory of {n} member(s)"),
            ConvergenceGoal::ReadyForWrites(t) => write!(f, "table {t} ready for writes"),
            ConvergenceGoal::AllReplicasReady(t) => write!(f, "all replicas of table {t} ready"),
            ConvergenceGoal::BlueprintSatisfied(t) => write!(f, "blueprint of table {t} satisfied"),
            ConvergenceGoal::NoIssues => write!(f, "no issues"),
            ConvergenceGoal::Issues(expected) => {
                let expected: Vec<String> = expected.iter().map(|e| e.to_string()).collect();
                write!(f, "exactly issues {{{}}}", expected.join("; "))
            }
        }
    }
}
