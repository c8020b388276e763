//! Append-only feedback recording and analytics

use crate::error::EngineError;
use crate::style_cache::locks::KeyedLocks;
use crate::style_cache::{FeedbackEvent, StyleStore, put_durably};
use chrono::Utc;
use retroweb_model::{CacheEntry, EntryKey, Era, Feedback};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Feedback counts for analytics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackStats {
    pub total_feedback: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_domain: BTreeMap<String, u64>,
    pub by_era: BTreeMap<String, u64>,
    /// Domains with the most feedback, busiest first
    pub recent_domains: Vec<DomainCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainCount {
    pub domain: String,
    pub count: u64,
}

/// Recent feedback records, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackSummary {
    pub feedback: Vec<FeedbackEvent>,
}

const RECENT_DOMAINS: usize = 10;

/// Records user feedback against cache entries
#[derive(Clone)]
pub struct FeedbackRecorder {
    store: Arc<dyn StyleStore>,
    locks: Arc<KeyedLocks<EntryKey>>,
}

impl FeedbackRecorder {
    pub fn new(store: Arc<dyn StyleStore>, locks: Arc<KeyedLocks<EntryKey>>) -> Self {
        Self { store, locks }
    }

    /// Append feedback to an existing entry
    pub async fn record(&self, key: &EntryKey, feedback: Feedback) -> Result<(), EngineError> {
        feedback.validate()?;
        let _guard = self.locks.lock(key).await;
        let mut entry = self
            .store
            .lookup(key)
            .await?
            .ok_or_else(|| EngineError::NotFound(key.to_string()))?;
        self.append(&mut entry, feedback).await
    }

    /// Append feedback, reserving a `processing` placeholder if the entry
    /// does not exist yet
    ///
    /// Only valid ahead of a generation request for the key, since that
    /// generation is what resolves the placeholder.
    pub(crate) async fn record_or_reserve(
        &self,
        key: &EntryKey,
        feedback: Feedback,
    ) -> Result<(), EngineError> {
        feedback.validate()?;
        let _guard = self.locks.lock(key).await;
        let mut entry = match self.store.lookup(key).await? {
            Some(entry) => entry,
            None => CacheEntry::placeholder(key, Utc::now()),
        };
        self.append(&mut entry, feedback).await
    }

    async fn append(&self, entry: &mut CacheEntry, feedback: Feedback) -> Result<(), EngineError> {
        let preset = feedback
            .preset_type
            .map(|p| p.as_str())
            .unwrap_or("text");
        entry.record_feedback(feedback)?;
        put_durably(self.store.as_ref(), entry).await?;
        info!(
            "📝 Recorded feedback for {} ({}), {} total",
            entry.key(),
            preset,
            entry.feedback_history.len()
        );
        Ok(())
    }

    /// Feedback left on one entry, in arrival order
    pub async fn history(&self, key: &EntryKey) -> Result<Vec<Feedback>, EngineError> {
        Ok(self
            .store
            .lookup(key)
            .await?
            .map(|entry| entry.feedback_history)
            .unwrap_or_default())
    }

    pub async fn stats(&self) -> Result<FeedbackStats, EngineError> {
        let mut stats = FeedbackStats::default();
        for event in self.store.feedback_events().await? {
            let kind = event
                .feedback
                .preset_type
                .map(|p| p.as_str())
                .unwrap_or("other");
            stats.total_feedback += 1;
            *stats.by_type.entry(kind.to_string()).or_default() += 1;
            *stats.by_domain.entry(event.domain).or_default() += 1;
            *stats.by_era.entry(event.era.as_str().to_string()).or_default() += 1;
        }

        let mut busiest: Vec<DomainCount> = stats
            .by_domain
            .iter()
            .map(|(domain, count)| DomainCount {
                domain: domain.clone(),
                count: *count,
            })
            .collect();
        // Stable sort keeps ties in domain order
        busiest.sort_by(|a, b| b.count.cmp(&a.count));
        busiest.truncate(RECENT_DOMAINS);
        stats.recent_domains = busiest;
        Ok(stats)
    }

    pub async fn summary(
        &self,
        domain: Option<&str>,
        era: Option<Era>,
        limit: usize,
    ) -> Result<FeedbackSummary, EngineError> {
        let feedback = self.store.recent_feedback(domain, era, limit).await?;
        Ok(FeedbackSummary { feedback })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style_cache::EvictionPolicy;
    use crate::style_cache::sqlite::SqliteStyleStore;
    use retroweb_model::{ApprovalStatus, FeedbackPreset, PageStructure};
    use tempfile::TempDir;

    fn setup() -> (FeedbackRecorder, Arc<dyn StyleStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn StyleStore> =
            Arc::new(SqliteStyleStore::new(temp_dir.path().join("test.db")).unwrap());
        let recorder = FeedbackRecorder::new(store.clone(), Arc::new(KeyedLocks::new()));
        (recorder, store, temp_dir)
    }

    fn key() -> EntryKey {
        EntryKey::new(
            "example.com",
            Era::Win95,
            PageStructure::default().fingerprint().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_record_requires_entry() {
        let (recorder, _store, _temp_dir) = setup();
        let fb = Feedback::new(Some(FeedbackPreset::Good), None, Utc::now()).unwrap();
        let err = recorder.record(&key(), fb).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_record_appends_in_order() {
        let (recorder, store, _temp_dir) = setup();
        store
            .put(&CacheEntry::generated(&key(), "a{}".into(), Utc::now()))
            .await
            .unwrap();

        let first = Feedback::new(Some(FeedbackPreset::TooSimple), None, Utc::now()).unwrap();
        let second = Feedback::new(None, Some("needs more teal"), Utc::now()).unwrap();
        recorder.record(&key(), first.clone()).await.unwrap();
        recorder.record(&key(), second.clone()).await.unwrap();

        assert_eq!(recorder.history(&key()).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_invalid_feedback_leaves_entry_untouched() {
        let (recorder, store, _temp_dir) = setup();
        let stored = CacheEntry::generated(&key(), "a{}".into(), Utc::now());
        store.put(&stored).await.unwrap();

        let empty = Feedback {
            preset_type: None,
            free_text: Some("  ".into()),
            submitted_at: Utc::now(),
        };
        let err = recorder.record(&key(), empty).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidFeedback(_)));
        assert_eq!(store.lookup(&key()).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_reserve_creates_processing_placeholder() {
        let (recorder, store, _temp_dir) = setup();
        let fb = Feedback::new(Some(FeedbackPreset::Regenerate), None, Utc::now()).unwrap();
        recorder.record_or_reserve(&key(), fb).await.unwrap();

        let entry = store.lookup(&key()).await.unwrap().unwrap();
        assert_eq!(entry.approval_status, ApprovalStatus::Processing);
        assert_eq!(entry.feedback_history.len(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let (recorder, store, _temp_dir) = setup();
        store
            .put(&CacheEntry::generated(&key(), "a{}".into(), Utc::now()))
            .await
            .unwrap();
        for preset in [FeedbackPreset::TooModern, FeedbackPreset::TooModern] {
            recorder
                .record(&key(), Feedback::new(Some(preset), None, Utc::now()).unwrap())
                .await
                .unwrap();
        }
        recorder
            .record(&key(), Feedback::new(None, Some("nice"), Utc::now()).unwrap())
            .await
            .unwrap();

        let stats = recorder.stats().await.unwrap();
        assert_eq!(stats.total_feedback, 3);
        assert_eq!(stats.by_type.get("too_modern"), Some(&2));
        assert_eq!(stats.by_type.get("other"), Some(&1));
        assert_eq!(stats.by_domain.get("example.com"), Some(&3));
        assert_eq!(stats.by_era.get("win95"), Some(&3));
        assert_eq!(
            stats.recent_domains,
            vec![DomainCount {
                domain: "example.com".into(),
                count: 3
            }]
        );
    }

    #[tokio::test]
    async fn test_recent_domains_busiest_first() {
        let (recorder, store, _temp_dir) = setup();
        let fingerprint = PageStructure::default().fingerprint().unwrap();
        for n in 0..12u64 {
            let key = EntryKey::new(format!("site{:02}.com", n), Era::Win98, fingerprint.clone());
            store
                .put(&CacheEntry::generated(&key, "a{}".into(), Utc::now()))
                .await
                .unwrap();
            for _ in 0..=(n % 3) {
                let fb = Feedback::new(Some(FeedbackPreset::Other), Some("x"), Utc::now()).unwrap();
                recorder.record(&key, fb).await.unwrap();
            }
        }

        let stats = recorder.stats().await.unwrap();
        assert_eq!(stats.recent_domains.len(), 10);
        assert_eq!(stats.recent_domains[0].domain, "site02.com");
        assert_eq!(stats.recent_domains[0].count, 3);
        assert!(stats.recent_domains.windows(2).all(|w| w[0].count >= w[1].count));
    }

    #[tokio::test]
    async fn test_stats_outlive_eviction() {
        let (recorder, store, _temp_dir) = setup();
        store
            .put(&CacheEntry::generated(&key(), "a{}".into(), Utc::now()))
            .await
            .unwrap();
        let fb = Feedback::new(Some(FeedbackPreset::TooModern), None, Utc::now()).unwrap();
        recorder.record(&key(), fb).await.unwrap();

        store
            .evict(EvictionPolicy::OlderThan(Utc::now() + chrono::Duration::days(1)))
            .await
            .unwrap();
        assert!(store.lookup(&key()).await.unwrap().is_none());

        let stats = recorder.stats().await.unwrap();
        assert_eq!(stats.total_feedback, 1);
        assert_eq!(stats.by_type.get("too_modern"), Some(&1));
    }

    #[tokio::test]
    async fn test_summary_filters_by_site() {
        let (recorder, store, _temp_dir) = setup();
        let other = EntryKey::new("other.com", Era::Win95, key().fingerprint);
        for k in [key(), other.clone()] {
            store
                .put(&CacheEntry::generated(&k, "a{}".into(), Utc::now()))
                .await
                .unwrap();
        }
        let first = Feedback::new(Some(FeedbackPreset::TooSimple), None, Utc::now()).unwrap();
        let second = Feedback::new(None, Some("darker"), Utc::now()).unwrap();
        recorder.record(&key(), first.clone()).await.unwrap();
        recorder.record(&other, first).await.unwrap();
        recorder.record(&key(), second.clone()).await.unwrap();

        let summary = recorder.summary(Some("example.com"), None, 100).await.unwrap();
        assert_eq!(summary.feedback.len(), 2);
        assert_eq!(summary.feedback[0].feedback, second);

        let limited = recorder.summary(None, Some(Era::Win95), 1).await.unwrap();
        assert_eq!(limited.feedback.len(), 1);
    }
}
