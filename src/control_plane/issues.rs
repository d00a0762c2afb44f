use std::fmt;

use serde::Deserialize;
use serde::Serialize;

pub const MACHINE_DOWN: &str = "MACHINE_DOWN";
pub const VCLOCK_CONFLICT: &str = "VCLOCK_CONFLICT";
pub const UNSATISFIABLE_GOALS: &str = "UNSATISFIABLE_GOALS";
pub const NAME_CONFLICT: &str = "NAME_CONFLICT_ISSUE";
pub const MACHINE_GHOST: &str = "MACHINE_GHOST";

/// Issue type; unknown types are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IssueKind {
    MachineDown,
    VclockConflict,
    UnsatisfiableGoals,
    NameConflict,
    MachineGhost,
    Other(String),
}

impl IssueKind {
    pub fn as_str(&self) -> &str {
        match self {
            IssueKind::MachineDown => MACHINE_DOWN,
            IssueKind::VclockConflict => VCLOCK_CONFLICT,
            IssueKind::UnsatisfiableGoals => UNSATISFIABLE_GOALS,
            IssueKind::NameConflict => NAME_CONFLICT,
            IssueKind::MachineGhost => MACHINE_GHOST,
            IssueKind::Other(other) => other,
        }
    }
}

impl From<String> for IssueKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            MACHINE_DOWN => IssueKind::MachineDown,
            VCLOCK_CONFLICT => IssueKind::VclockConflict,
            UNSATISFIABLE_GOALS => IssueKind::UnsatisfiableGoals,
            NAME_CONFLICT => IssueKind::NameConflict,
            MACHINE_GHOST => IssueKind::MachineGhost,
            _ => IssueKind::Other(s),
        }
    }
}

impl From<&str> for IssueKind {
    fn from(s: &str) -> Self {
        IssueKind::from(s.to_string())
    }
}

impl From<IssueKind> for String {
    fn from(kind: IssueKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for IssueKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Problem reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    #[serde(default)]
    pub subject_ids: Vec<String>,
    #[serde(default)]
    pub detail: String,
}

impl fmt::Display for Issue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} [{}]", self.kind, self.subject_ids.join(", "))?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// An issue a test expects to see: its type and the ids it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueExpectation {
    pub kind: IssueKind,
    pub subjects: Vec<String>,
}

impl IssueExpectation {
    pub fn new<S: Into<String>>(
        kind: impl Into<IssueKind>,
        subjects: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            kind: kind.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
        }
    }

    pub fn machine_down(node: impl Into<String>) -> Self {
        Self::new(IssueKind::MachineDown, [node.into()])
    }

    fn key(&self) -> (IssueKind, Vec<String>) {
        let mut subjects = self.subjects.clone();
        subjects.sort();
        (self.kind.clone(), subjects)
    }
}

impl fmt::Display for IssueExpectation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} [{}]", self.kind, self.subjects.join(", "))
    }
}

fn issue_key(issue: &Issue) -> (IssueKind, Vec<String>) {
    let mut subjects = issue.subject_ids.clone();
    subjects.sort();
    (issue.kind.clone(), subjects)
}

/// True when `issues` is exactly the multiset described by `expected`.
///
/// Subject order inside one issue does not matter; the detail text is ignored.
pub fn matches_exactly(
    issues: &[Issue],
    expected: &[IssueExpectation],
) -> bool {
    let mut seen: Vec<_> = issues.iter().map(issue_key).collect();
    let mut wanted: Vec<_> = expected.iter().map(IssueExpectation::key).collect();
    seen.sort();
    wanted.sort();
    seen == wanted
}

/// Issues whose type is not in `tolerated`.
pub fn untolerated<'a>(
    issues: &'a [Issue],
    tolerated: &[String],
) -> Vec<&'a Issue> {
    issues.iter().filter(|i| !tolerated.iter().any(|t| t == i.kind.as_str())).collect()
}
