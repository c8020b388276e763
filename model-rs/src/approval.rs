//! Approval workflow states and the edges allowed between them

use serde::{Deserialize, Serialize};
use std::fmt;

/// Human approval state of a generated stylesheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Processing,
}

/// Raised when a requested status change is not an edge of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid approval transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ApprovalStatus,
    pub to: ApprovalStatus,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Processing => "processing",
        }
    }

    /// States reachable from `self` in a single step
    ///
    /// `Approved` has no outgoing edges; only a new fingerprint (a new entry)
    /// supersedes an approved style.
    pub fn allowed_targets(&self) -> &'static [ApprovalStatus] {
        use ApprovalStatus::*;
        match self {
            Pending => &[Approved, Rejected, Processing],
            Rejected => &[Processing, Pending],
            Processing => &[Pending, Rejected],
            Approved => &[],
        }
    }

    pub fn can_transition_to(&self, target: ApprovalStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Validate the edge `self -> target`
    pub fn check_transition(&self, target: ApprovalStatus) -> Result<(), TransitionError> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(TransitionError {
                from: *self,
                to: target,
            })
        }
    }

    /// Decode a persisted status string
    ///
    /// Anything non-canonical (legacy `unapproved`, typos, empty) maps to
    /// `Pending`. Approval is never inferred. The boolean reports whether the
    /// value had to be normalized.
    pub fn from_stored(raw: &str) -> (ApprovalStatus, bool) {
        match raw {
            "pending" => (ApprovalStatus::Pending, false),
            "approved" => (ApprovalStatus::Approved, false),
            "rejected" => (ApprovalStatus::Rejected, false),
            "processing" => (ApprovalStatus::Processing, false),
            _ => (ApprovalStatus::Pending, true),
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
