//! Command surface of the style engine
//!
//! [`StyleEngine`] is what the HTTP layer and the binary talk to. Every
//! command names its entry explicitly by (domain, era, fingerprint); the
//! engine keeps no per-tab state of its own.

use crate::config::EngineConfig;
use crate::coordinator::{
    CoordinatorSettings, GenerationCoordinator, StyleRequest, StyleResult, StyleSource,
};
use crate::error::EngineError;
use crate::feedback::{FeedbackRecorder, FeedbackStats, FeedbackSummary};
use crate::generator::StyleGenerator;
use crate::generator::sanitize::clean_css;
use crate::style_cache::locks::KeyedLocks;
use crate::style_cache::{
    EvictionPolicy, EvictionReport, StyleStore, evict_locked, normalize_domain, put_durably,
};
use chrono::{DateTime, Utc};
use retroweb_model::{
    ApprovalStatus, CacheEntry, EntryKey, Era, Feedback, Fingerprint, PageStructure,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Whether a site currently has a usable style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Cached,
    Generating,
    Missing,
}

/// Answer to a status query for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatus {
    pub domain: String,
    pub cache_status: CacheStatus,
    pub approval_status: Option<ApprovalStatus>,
    pub era: Option<Era>,
    pub fingerprint: Option<Fingerprint>,
    pub last_updated: Option<DateTime<Utc>>,
    pub regeneration_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub tracked_bytes: u64,
    pub in_flight: usize,
}

pub struct StyleEngine {
    store: Arc<dyn StyleStore>,
    locks: Arc<KeyedLocks<EntryKey>>,
    recorder: FeedbackRecorder,
    coordinator: GenerationCoordinator,
    config: EngineConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for StyleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StyleEngine")
            .field("store", &"<dyn StyleStore>")
            .field("config", &self.config)
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

impl StyleEngine {
    pub fn new(
        store: Arc<dyn StyleStore>,
        generator: Arc<dyn StyleGenerator>,
        config: EngineConfig,
    ) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let recorder = FeedbackRecorder::new(store.clone(), locks.clone());
        let coordinator = GenerationCoordinator::new(
            store.clone(),
            generator,
            locks.clone(),
            recorder.clone(),
            CoordinatorSettings {
                default_timeout: config.generation_timeout,
                max_cache_bytes: Some(config.cache_max_bytes),
            },
        );

        Self {
            store,
            locks,
            recorder,
            coordinator,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &GenerationCoordinator {
        &self.coordinator
    }

    #[cfg(test)]
    pub(crate) fn entry_locks(&self) -> &KeyedLocks<EntryKey> {
        &self.locks
    }

    fn entry_key(
        &self,
        domain: &str,
        era: Era,
        fingerprint: Fingerprint,
    ) -> Result<EntryKey, EngineError> {
        let domain = normalize_domain(domain)
            .ok_or_else(|| EngineError::InvalidRequest(format!("invalid domain: {:?}", domain)))?;
        Ok(EntryKey::new(domain, era, fingerprint))
    }

    /// Page-load path: fingerprint, look up, and generate when needed
    ///
    /// Approved and pending entries are served from cache. A miss, a
    /// rejected entry or an interrupted one goes through the coordinator.
    pub async fn visit(
        &self,
        domain: &str,
        era: Option<Era>,
        structure: &PageStructure,
        timeout: Option<Duration>,
    ) -> Result<StyleResult, EngineError> {
        let era = match era {
            Some(era) => era,
            None => self.selected_era().await?,
        };
        let key = self.entry_key(domain, era, structure.fingerprint()?)?;

        match self.store.lookup(&key).await? {
            Some(entry)
                if matches!(
                    entry.approval_status,
                    ApprovalStatus::Approved | ApprovalStatus::Pending
                ) =>
            {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {} ({})", key, entry.approval_status);
                return Ok(StyleResult::from_entry(&entry, StyleSource::Cache));
            }
            Some(entry) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cached entry for {} is {}, regenerating", key, entry.approval_status);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss for {}", key);
            }
        }

        self.coordinator
            .request_style(StyleRequest {
                key,
                feedback: None,
                dom_summary: Some(structure.describe()),
                timeout,
            })
            .await
    }

    /// Exact entry lookup
    pub async fn lookup(
        &self,
        domain: &str,
        era: Era,
        fingerprint: Fingerprint,
    ) -> Result<Option<CacheEntry>, EngineError> {
        let key = self.entry_key(domain, era, fingerprint)?;
        Ok(self.store.lookup(&key).await?)
    }

    /// Status of the most recently updated entry for a domain
    pub async fn get_site_status(&self, domain: &str) -> Result<SiteStatus, EngineError> {
        let domain = normalize_domain(domain)
            .ok_or_else(|| EngineError::InvalidRequest(format!("invalid domain: {:?}", domain)))?;

        let Some(entry) = self.store.lookup_latest_for_domain(&domain).await? else {
            return Ok(SiteStatus {
                domain,
                cache_status: CacheStatus::Missing,
                approval_status: None,
                era: None,
                fingerprint: None,
                last_updated: None,
                regeneration_count: None,
            });
        };

        let cache_status = if entry.approval_status == ApprovalStatus::Processing
            || self.coordinator.is_in_flight(&entry.key().site())
        {
            CacheStatus::Generating
        } else {
            CacheStatus::Cached
        };

        Ok(SiteStatus {
            domain,
            cache_status,
            approval_status: Some(entry.approval_status),
            era: Some(entry.era),
            last_updated: Some(entry.last_updated()),
            regeneration_count: Some(entry.regeneration_count),
            fingerprint: Some(entry.fingerprint),
        })
    }

    pub async fn approve(
        &self,
        domain: &str,
        era: Era,
        fingerprint: Fingerprint,
    ) -> Result<CacheEntry, EngineError> {
        let key = self.entry_key(domain, era, fingerprint)?;
        self.transition(&key, ApprovalStatus::Approved).await
    }

    /// Reject a style; while it is being generated this waits for the
    /// generation and returns its outcome instead
    pub async fn reject(
        &self,
        domain: &str,
        era: Era,
        fingerprint: Fingerprint,
    ) -> Result<CacheEntry, EngineError> {
        let key = self.entry_key(domain, era, fingerprint)?;

        let current = self
            .store
            .lookup(&key)
            .await?
            .ok_or_else(|| EngineError::NotFound(key.to_string()))?;
        if current.approval_status == ApprovalStatus::Processing {
            if let Some(outcome) = self.coordinator.wait_for(&key).await {
                outcome?;
                return self
                    .store
                    .lookup(&key)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(key.to_string()));
            }
        }

        self.transition(&key, ApprovalStatus::Rejected).await
    }

    async fn transition(
        &self,
        key: &EntryKey,
        target: ApprovalStatus,
    ) -> Result<CacheEntry, EngineError> {
        let _guard = self.locks.lock(key).await;
        let mut entry = self
            .store
            .lookup(key)
            .await?
            .ok_or_else(|| EngineError::NotFound(key.to_string()))?;

        let from = entry.approval_status;
        if let Err(e) = entry.request_transition(target, Utc::now()) {
            warn!("Refused transition for {}: {}", key, e);
            return Err(e.into());
        }
        put_durably(self.store.as_ref(), &entry).await?;
        info!("✅ {} moved {} -> {}", key, from, target);
        Ok(entry)
    }

    /// Record feedback and regenerate the style with it
    ///
    /// The feedback is persisted before the generator is called and stays
    /// recorded even if generation fails.
    pub async fn regenerate_with_feedback(
        &self,
        domain: &str,
        era: Era,
        fingerprint: Fingerprint,
        feedback: Feedback,
        timeout: Option<Duration>,
    ) -> Result<StyleResult, EngineError> {
        feedback.validate()?;
        let key = self.entry_key(domain, era, fingerprint)?;
        if self.store.lookup(&key).await?.is_none() {
            return Err(EngineError::NotFound(key.to_string()));
        }

        info!("🔁 Regeneration requested for {}", key);
        self.coordinator
            .request_style(StyleRequest {
                key,
                feedback: Some(feedback),
                dom_summary: None,
                timeout,
            })
            .await
    }

    /// Record feedback without triggering a regeneration
    pub async fn record_feedback(
        &self,
        domain: &str,
        era: Era,
        fingerprint: Fingerprint,
        feedback: Feedback,
    ) -> Result<(), EngineError> {
        let key = self.entry_key(domain, era, fingerprint)?;
        self.recorder.record(&key, feedback).await
    }

    /// Install hand-written css for a rejected entry, making it `pending`
    pub async fn replace_rejected_style(
        &self,
        domain: &str,
        era: Era,
        fingerprint: Fingerprint,
        css: &str,
    ) -> Result<CacheEntry, EngineError> {
        let key = self.entry_key(domain, era, fingerprint)?;
        let css = clean_css(css).map_err(|e| EngineError::InvalidRequest(e.to_string()))?;

        let _guard = self.locks.lock(&key).await;
        let mut entry = self
            .store
            .lookup(&key)
            .await?
            .ok_or_else(|| EngineError::NotFound(key.to_string()))?;
        if entry.approval_status != ApprovalStatus::Rejected {
            return Err(retroweb_model::TransitionError {
                from: entry.approval_status,
                to: ApprovalStatus::Pending,
            }
            .into());
        }

        let now = Utc::now();
        entry.request_transition(ApprovalStatus::Pending, now)?;
        entry.css = css;
        entry.generated_at = now;
        put_durably(self.store.as_ref(), &entry).await?;
        info!("🖊️  Replaced rejected style for {}", key);
        Ok(entry)
    }

    /// Era used when a visit does not name one
    pub async fn selected_era(&self) -> Result<Era, EngineError> {
        Ok(self.store.selected_era().await?.unwrap_or_default())
    }

    pub async fn set_selected_era(&self, era: Era) -> Result<(), EngineError> {
        self.store.set_selected_era(era).await?;
        info!("Selected era set to {}", era);
        Ok(())
    }

    pub async fn feedback_history(
        &self,
        domain: &str,
        era: Era,
        fingerprint: Fingerprint,
    ) -> Result<Vec<Feedback>, EngineError> {
        let key = self.entry_key(domain, era, fingerprint)?;
        self.recorder.history(&key).await
    }

    pub async fn feedback_stats(&self) -> Result<FeedbackStats, EngineError> {
        self.recorder.stats().await
    }

    /// Recent feedback, newest first, optionally for one domain and era
    pub async fn feedback_summary(
        &self,
        domain: Option<&str>,
        era: Option<Era>,
        limit: usize,
    ) -> Result<FeedbackSummary, EngineError> {
        let domain = match domain {
            Some(raw) => Some(normalize_domain(raw).ok_or_else(|| {
                EngineError::InvalidRequest(format!("invalid domain: {:?}", raw))
            })?),
            None => None,
        };
        self.recorder.summary(domain.as_deref(), era, limit).await
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, EngineError> {
        let stats = self.store.stats().await?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: stats.entries,
            tracked_bytes: stats.tracked_bytes,
            in_flight: self.coordinator.in_flight_count(),
        })
    }

    /// Retention sweep followed by the size ceiling
    ///
    /// Entry locks are held across each pass so an in-progress command cannot
    /// write back an entry that was just removed.
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> Result<EvictionReport, EngineError> {
        let cutoff = now - self.config.retention;
        let mut report =
            evict_locked(self.store.as_ref(), &self.locks, EvictionPolicy::OlderThan(cutoff))
                .await?;
        let ceiling = evict_locked(
            self.store.as_ref(),
            &self.locks,
            EvictionPolicy::SizeCeiling(self.config.cache_max_bytes),
        )
        .await?;
        report.removed.extend(ceiling.removed);
        report.bytes_freed += ceiling.bytes_freed;

        if !report.removed.is_empty() {
            info!(
                "🧹 Evicted {} entries ({} bytes)",
                report.removed.len(),
                report.bytes_freed
            );
        }
        Ok(report)
    }

    pub async fn recover_interrupted(&self) -> Result<usize, EngineError> {
        self.coordinator.recover_interrupted().await
    }
}
