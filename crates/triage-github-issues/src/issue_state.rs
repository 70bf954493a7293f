//! Explicit triage state for an issue, projected from its open flag, labels,
//! and assignee. Labels are treated as the visible projection of the state;
//! combinations that do not correspond to a state are rejected instead of
//! being guessed at.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::issue_labels::{
    label_set_contains, INSUFFICIENT_QUALITY_LABEL, SUFFICIENT_QUALITY_LABEL, UNKNOWN_LABEL,
};
use crate::triage_error::{TriageError, TriageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Which of the two linked repositories an issue lives in.
pub enum RepoRole {
    Validation,
    Findings,
}

impl RepoRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Findings => "findings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueRef {
    pub repo: RepoRole,
    pub number: u64,
}

impl IssueRef {
    pub fn validation(number: u64) -> Self {
        Self {
            repo: RepoRole::Validation,
            number,
        }
    }

    pub fn findings(number: u64) -> Self {
        Self {
            repo: RepoRole::Findings,
            number,
        }
    }
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo.as_str(), self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Assignment pool an open issue belongs to.
pub enum Pool {
    Standard,
    Unknown,
}

impl Pool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Terminal triage decision, also the target of `undo`.
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Accept => SUFFICIENT_QUALITY_LABEL,
            Self::Reject => INSUFFICIENT_QUALITY_LABEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Point-in-time view of an issue as read from the tracker.
pub struct IssueSnapshot {
    pub issue: IssueRef,
    pub title: String,
    pub body: String,
    pub open: bool,
    pub labels: BTreeSet<String>,
    pub assignees: Vec<String>,
    pub created_at: String,
    pub html_url: String,
}

impl IssueSnapshot {
    pub fn has_label(&self, label: &str) -> bool {
        label_set_contains(&self.labels, label)
    }

    pub fn pool(&self) -> Pool {
        if self.has_label(UNKNOWN_LABEL) {
            Pool::Unknown
        } else {
            Pool::Standard
        }
    }

    /// Primary assignee; the triage model tracks a single assignee per issue.
    pub fn assignee(&self) -> Option<&str> {
        self.assignees.first().map(String::as_str)
    }

    pub fn is_assigned_to(&self, login: &str) -> bool {
        self.assignees
            .iter()
            .any(|assignee| same_login(assignee, login))
    }

    pub fn with_open(mut self, open: bool) -> Self {
        self.open = open;
        self
    }

    pub fn with_assignees(mut self, assignees: Vec<String>) -> Self {
        self.assignees = assignees;
        self
    }

    /// Projects labels, open flag, and assignee onto the explicit state.
    pub fn state(&self) -> TriageResult<IssueState> {
        let sufficient = self.has_label(SUFFICIENT_QUALITY_LABEL);
        let insufficient = self.has_label(INSUFFICIENT_QUALITY_LABEL);
        let unknown = self.has_label(UNKNOWN_LABEL);
        let unrecognized = |reason: &str| TriageError::UnrecognizedState {
            issue: self.issue.to_string(),
            reason: reason.to_string(),
        };

        if sufficient && insufficient {
            return Err(unrecognized("both quality labels are present"));
        }
        if (sufficient || insufficient) && unknown {
            return Err(unrecognized(
                "`unknown` is present together with a quality label",
            ));
        }

        let assignee = self.assignee().map(str::to_string);
        if !self.open {
            return if sufficient {
                Ok(IssueState::Accepted { assignee })
            } else if insufficient {
                Ok(IssueState::Rejected { assignee })
            } else {
                Err(unrecognized("issue is closed without a triage decision"))
            };
        }
        if sufficient || insufficient {
            return Err(unrecognized("open issue carries a quality label"));
        }

        let pool = self.pool();
        Ok(match assignee {
            Some(assignee) => IssueState::Assigned { pool, assignee },
            None => IssueState::Unassigned { pool },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Lifecycle state of a validation issue.
pub enum IssueState {
    Unassigned { pool: Pool },
    Assigned { pool: Pool, assignee: String },
    Accepted { assignee: Option<String> },
    Rejected { assignee: Option<String> },
}

impl IssueState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unassigned {
                pool: Pool::Standard,
            } => "open/unassigned",
            Self::Assigned {
                pool: Pool::Standard,
                ..
            } => "open/assigned",
            Self::Unassigned {
                pool: Pool::Unknown,
            } => "unknown/unassigned",
            Self::Assigned {
                pool: Pool::Unknown,
                ..
            } => "unknown/assigned",
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::Rejected { .. })
    }

    /// Labels that must be present for this state; everything else managed
    /// by triage must be absent.
    pub fn projected_labels(&self) -> Vec<&'static str> {
        match self {
            Self::Unassigned {
                pool: Pool::Unknown,
            }
            | Self::Assigned {
                pool: Pool::Unknown,
                ..
            } => vec![UNKNOWN_LABEL],
            Self::Unassigned { .. } | Self::Assigned { .. } => Vec::new(),
            Self::Accepted { .. } => vec![SUFFICIENT_QUALITY_LABEL],
            Self::Rejected { .. } => vec![INSUFFICIENT_QUALITY_LABEL],
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// GitHub logins compare case-insensitively.
pub fn same_login(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}
