//! Durable style cache for RetroWeb
//!
//! This module provides the storage abstraction for generated stylesheets and
//! their approval state, keyed by `(domain, era, fingerprint)`, plus the small
//! settings record holding the globally selected era.

pub mod locks;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use locks::KeyedLocks;
use retroweb_model::{ApprovalStatus, CacheEntry, EntryKey, Era, Feedback, Fingerprint};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Error type for style cache operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt cache row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Which entries an eviction pass removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Entries whose approval state last changed before the cutoff
    OlderThan(DateTime<Utc>),
    /// Least recently updated entries until tracked css fits in the budget
    SizeCeiling(u64),
}

/// Result of an eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub removed: Vec<EntryKey>,
    pub bytes_freed: u64,
}

/// Snapshot of store occupancy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub entries: u64,
    pub tracked_bytes: u64,
}

/// A feedback record together with the entry it was left on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    pub domain: String,
    pub era: Era,
    pub fingerprint: Fingerprint,
    pub feedback: Feedback,
}

/// Trait for durable storage of cache entries
///
/// This abstraction allows for different storage backends while keeping the
/// engine's locking and workflow rules in one place. Implementations must make
/// `put` atomic: a partially written entry is never observable.
#[async_trait]
pub trait StyleStore: Send + Sync {
    /// Fetch the entry for an exact key; a miss is `Ok(None)`
    async fn lookup(&self, key: &EntryKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Most recently updated entry for any era or layout of `domain`
    async fn lookup_latest_for_domain(&self, domain: &str)
    -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or fully replace an entry
    ///
    /// Feedback records beyond those already stored are appended to the
    /// feedback log in the same transaction.
    async fn put(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    /// Remove entries selected by `policy`; `processing` entries are never evicted
    async fn evict(&self, policy: EvictionPolicy) -> Result<EvictionReport, StoreError>;

    /// Keys `policy` would remove right now, oldest first
    async fn eviction_candidates(&self, policy: EvictionPolicy)
    -> Result<Vec<EntryKey>, StoreError>;

    /// Like [`StyleStore::evict`], restricted to `keys`
    async fn evict_among(
        &self,
        policy: EvictionPolicy,
        keys: &[EntryKey],
    ) -> Result<EvictionReport, StoreError>;

    /// All entries currently in `status`
    async fn entries_with_status(
        &self,
        status: ApprovalStatus,
    ) -> Result<Vec<CacheEntry>, StoreError>;

    /// Every feedback record ever accepted, in arrival order
    ///
    /// The log outlives eviction of the entries it refers to.
    async fn feedback_events(&self) -> Result<Vec<FeedbackEvent>, StoreError>;

    /// Newest feedback first, optionally narrowed to a domain and era
    async fn recent_feedback(
        &self,
        domain: Option<&str>,
        era: Option<Era>,
        limit: usize,
    ) -> Result<Vec<FeedbackEvent>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Running total of stored css bytes
    fn tracked_bytes(&self) -> u64;

    async fn selected_era(&self) -> Result<Option<Era>, StoreError>;

    async fn set_selected_era(&self, era: Era) -> Result<(), StoreError>;
}

const PUT_ATTEMPTS: u32 = 3;
const PUT_BACKOFF: Duration = Duration::from_millis(50);

/// Write an entry, retrying transient failures
///
/// Used for writes that record a user decision: the caller must learn about a
/// failure rather than have it swallowed.
pub async fn put_durably(store: &dyn StyleStore, entry: &CacheEntry) -> Result<(), StoreError> {
    let mut attempt = 1;
    loop {
        match store.put(entry).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < PUT_ATTEMPTS => {
                warn!(
                    "Write of {} failed (attempt {}/{}): {}",
                    entry.key(),
                    attempt,
                    PUT_ATTEMPTS,
                    e
                );
                tokio::time::sleep(PUT_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                error!("❌ Giving up writing {} after {} attempts: {}", entry.key(), attempt, e);
                return Err(e);
            }
        }
    }
}

/// Evict while holding the entry lock of every candidate
///
/// Read-modify-write paths hold the entry lock from lookup to put, so an
/// entry removed here cannot be written back by one of them. Locks are taken
/// in key order to avoid deadlocks between concurrent passes.
pub async fn evict_locked(
    store: &dyn StyleStore,
    locks: &KeyedLocks<EntryKey>,
    policy: EvictionPolicy,
) -> Result<EvictionReport, StoreError> {
    let mut candidates = store.eviction_candidates(policy).await?;
    if candidates.is_empty() {
        return Ok(EvictionReport::default());
    }
    candidates.sort_by(|a, b| {
        (a.domain.as_str(), a.era.as_str(), a.fingerprint.as_str()).cmp(&(
            b.domain.as_str(),
            b.era.as_str(),
            b.fingerprint.as_str(),
        ))
    });

    let mut guards = Vec::with_capacity(candidates.len());
    for key in &candidates {
        guards.push(locks.lock(key).await);
    }
    store.evict_among(policy, &candidates).await
}

/// Reduce a host name or URL to the lower-cased host used as a cache key
pub fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let parsed = url::Url::parse(&with_scheme).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() { None } else { Some(host) }
}
