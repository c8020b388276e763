use crate::approval::{ApprovalStatus, TransitionError};
use crate::era::Era;
use crate::feedback::{Feedback, FeedbackError};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A site rendered in one era; at most one generation runs per site key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteKey {
    pub domain: String,
    pub era: Era,
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.era)
    }
}

/// Primary key of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub domain: String,
    pub era: Era,
    pub fingerprint: Fingerprint,
}

impl EntryKey {
    pub fn new(domain: impl Into<String>, era: Era, fingerprint: Fingerprint) -> Self {
        Self {
            domain: domain.into(),
            era,
            fingerprint,
        }
    }

    pub fn site(&self) -> SiteKey {
        SiteKey {
            domain: self.domain.clone(),
            era: self.era,
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.era, self.fingerprint.short())
    }
}

/// One generated style for a (domain, era, layout) triple and its approval state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub domain: String,
    pub era: Era,
    pub fingerprint: Fingerprint,
    pub css: String,
    pub approval_status: ApprovalStatus,
    pub generated_at: DateTime<Utc>,
    pub approval_updated_at: DateTime<Utc>,
    pub regeneration_count: u32,
    pub feedback_history: Vec<Feedback>,
}

impl CacheEntry {
    /// Entry reserved for a first generation that has not produced css yet
    pub fn placeholder(key: &EntryKey, now: DateTime<Utc>) -> Self {
        Self {
            domain: key.domain.clone(),
            era: key.era,
            fingerprint: key.fingerprint.clone(),
            css: String::new(),
            approval_status: ApprovalStatus::Processing,
            generated_at: now,
            approval_updated_at: now,
            regeneration_count: 0,
            feedback_history: Vec::new(),
        }
    }

    /// Freshly generated entry awaiting a human decision
    pub fn generated(key: &EntryKey, css: String, now: DateTime<Utc>) -> Self {
        Self {
            css,
            approval_status: ApprovalStatus::Pending,
            ..Self::placeholder(key, now)
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.domain.clone(), self.era, self.fingerprint.clone())
    }

    /// Whether the entry already holds a displayable stylesheet
    pub fn has_style(&self) -> bool {
        !self.css.is_empty()
    }

    pub fn css_bytes(&self) -> u64 {
        self.css.len() as u64
    }

    /// Most recent change to either the style or its approval state
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.generated_at.max(self.approval_updated_at)
    }

    pub fn latest_feedback(&self) -> Option<&Feedback> {
        self.feedback_history.last()
    }

    /// Move to `target` if the workflow allows it
    ///
    /// On error the entry is untouched. The approval timestamp never moves
    /// backwards, even if the wall clock does.
    pub fn request_transition(
        &mut self,
        target: ApprovalStatus,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.approval_status.check_transition(target)?;
        self.approval_status = target;
        self.approval_updated_at = now.max(self.approval_updated_at);
        Ok(())
    }

    /// Append a feedback record; history is append-only
    pub fn record_feedback(&mut self, feedback: Feedback) -> Result<(), FeedbackError> {
        feedback.validate()?;
        self.feedback_history.push(feedback);
        Ok(())
    }

    /// Install a newly generated stylesheet
    ///
    /// Counts as a regeneration when the entry already had a style. The entry
    /// must be `Processing`; it lands on `Pending`.
    pub fn apply_generated(
        &mut self,
        css: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.approval_status != ApprovalStatus::Processing {
            return Err(TransitionError {
                from: self.approval_status,
                to: ApprovalStatus::Pending,
            });
        }
        if self.has_style() {
            self.regeneration_count = self.regeneration_count.saturating_add(1);
        }
        self.css = css;
        self.generated_at = now.max(self.generated_at);
        self.request_transition(ApprovalStatus::Pending, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::FeedbackPreset;
    use crate::fingerprint::PageStructure;
    use chrono::Duration;

    fn key() -> EntryKey {
        EntryKey::new(
            "example.com",
            Era::Win95,
            PageStructure::default().fingerprint().unwrap(),
        )
    }

    #[test]
    fn test_legal_transition_updates_timestamp() {
        let t0 = Utc::now();
        let mut entry = CacheEntry::generated(&key(), "body{}".into(), t0);
        let t1 = t0 + Duration::seconds(5);

        entry.request_transition(ApprovalStatus::Approved, t1).unwrap();
        assert_eq!(entry.approval_status, ApprovalStatus::Approved);
        assert_eq!(entry.approval_updated_at, t1);
    }

    #[test]
    fn test_illegal_transition_leaves_entry_unchanged() {
        let t0 = Utc::now();
        let mut entry = CacheEntry::generated(&key(), "body{}".into(), t0);
        entry.request_transition(ApprovalStatus::Approved, t0).unwrap();
        let before = entry.clone();

        let err = entry
            .request_transition(ApprovalStatus::Pending, t0 + Duration::seconds(1))
            .unwrap_err();
        assert_eq!(err.from, ApprovalStatus::Approved);
        assert_eq!(err.to, ApprovalStatus::Pending);
        assert_eq!(entry, before);
    }

    #[test]
    fn test_timestamp_is_monotonic() {
        let t0 = Utc::now();
        let mut entry = CacheEntry::generated(&key(), "body{}".into(), t0);
        entry
            .request_transition(ApprovalStatus::Rejected, t0 - Duration::hours(1))
            .unwrap();
        assert_eq!(entry.approval_updated_at, t0);
    }

    #[test]
    fn test_apply_generated_counts_regenerations() {
        let t0 = Utc::now();
        let mut entry = CacheEntry::placeholder(&key(), t0);
        entry.apply_generated("a{}".into(), t0).unwrap();
        assert_eq!(entry.regeneration_count, 0);
        assert_eq!(entry.approval_status, ApprovalStatus::Pending);

        entry.request_transition(ApprovalStatus::Processing, t0).unwrap();
        entry.apply_generated("b{}".into(), t0).unwrap();
        assert_eq!(entry.regeneration_count, 1);
        assert_eq!(entry.css, "b{}");
    }

    #[test]
    fn test_apply_generated_requires_processing() {
        let t0 = Utc::now();
        let mut entry = CacheEntry::generated(&key(), "a{}".into(), t0);
        entry.request_transition(ApprovalStatus::Approved, t0).unwrap();
        assert!(entry.apply_generated("b{}".into(), t0).is_err());
        assert_eq!(entry.css, "a{}");
        assert_eq!(entry.regeneration_count, 0);
    }

    #[test]
    fn test_feedback_is_appended_in_order() {
        let t0 = Utc::now();
        let mut entry = CacheEntry::generated(&key(), "a{}".into(), t0);
        let first = Feedback::new(Some(FeedbackPreset::TooModern), None, t0).unwrap();
        let second = Feedback::new(None, Some("use teal"), t0).unwrap();

        entry.record_feedback(first.clone()).unwrap();
        entry.record_feedback(second.clone()).unwrap();
        assert_eq!(entry.feedback_history, vec![first, second.clone()]);
        assert_eq!(entry.latest_feedback(), Some(&second));
    }
}
