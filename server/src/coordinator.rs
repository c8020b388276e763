//! Generation coordinator
//!
//! Runs the external style generator for cache misses and regenerations.
//! It guarantees:
//! - at most one generation in flight per (domain, era); later requests for
//!   the same entry join it, requests for another layout wait their turn
//! - the entry is `processing` for exactly the duration of the call and ends
//!   `pending` on success or `rejected` on failure
//! - callers always get displayable css, falling back to the era's static
//!   stylesheet on timeout or error
//! - per-entry locks are held only around the bookkeeping, never across the
//!   generator call

use crate::error::EngineError;
use crate::feedback::FeedbackRecorder;
use crate::generator::sanitize::clean_css;
use crate::generator::{GenerationRequest, GeneratorError, StyleGenerator};
use crate::style_cache::locks::KeyedLocks;
use crate::style_cache::{EvictionPolicy, StyleStore, evict_locked, put_durably};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use retroweb_model::{
    ApprovalStatus, CacheEntry, EntryKey, Era, Feedback, Fingerprint, SiteKey, fallback_css,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where the css in a [`StyleResult`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleSource {
    Cache,
    Generated,
    Fallback,
}

/// Why a fallback was served instead of generated css
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    GenerationFailure,
}

/// Style handed back to the requesting surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleResult {
    pub domain: String,
    pub era: Era,
    pub fingerprint: Fingerprint,
    pub css: String,
    pub approval_status: ApprovalStatus,
    pub source: StyleSource,
    pub regeneration_count: u32,
    pub failure: Option<FailureKind>,
}

impl StyleResult {
    pub fn from_entry(entry: &CacheEntry, source: StyleSource) -> Self {
        Self {
            domain: entry.domain.clone(),
            era: entry.era,
            fingerprint: entry.fingerprint.clone(),
            css: entry.css.clone(),
            approval_status: entry.approval_status,
            source,
            regeneration_count: entry.regeneration_count,
            failure: None,
        }
    }
}

/// One request for a generated style
#[derive(Debug, Clone)]
pub struct StyleRequest {
    pub key: EntryKey,
    /// Recorded on the entry as soon as the request arrives
    pub feedback: Option<Feedback>,
    pub dom_summary: Option<String>,
    /// How long this caller waits; the coordinator default when absent
    pub timeout: Option<Duration>,
}

impl StyleRequest {
    pub fn new(key: EntryKey) -> Self {
        Self {
            key,
            feedback: None,
            dom_summary: None,
            timeout: None,
        }
    }
}

/// Tunables for the coordinator
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub default_timeout: Duration,
    /// Size ceiling enforced after each successful write
    pub max_cache_bytes: Option<u64>,
}

type SharedOutcome = Shared<BoxFuture<'static, Result<StyleResult, EngineError>>>;

/// How a request relates to the generation registry
enum Claim {
    /// This request started the generation
    Led(SharedOutcome),
    /// Same entry already generating
    Joined(SharedOutcome),
    /// Another layout of the site is generating; wait, then claim again
    Queued(EntryKey, SharedOutcome),
}

struct InFlight {
    id: Uuid,
    key: EntryKey,
    outcome: SharedOutcome,
}

/// Removes a generation from the registry when its task ends, even by panic
struct InFlightGuard {
    registry: Arc<Mutex<HashMap<SiteKey, InFlight>>>,
    site: SiteKey,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(&self.site).is_some_and(|f| f.id == self.id) {
            in_flight.remove(&self.site);
        }
    }
}

#[derive(Clone)]
pub struct GenerationCoordinator {
    store: Arc<dyn StyleStore>,
    generator: Arc<dyn StyleGenerator>,
    locks: Arc<KeyedLocks<EntryKey>>,
    recorder: FeedbackRecorder,
    in_flight: Arc<Mutex<HashMap<SiteKey, InFlight>>>,
    settings: CoordinatorSettings,
}

impl GenerationCoordinator {
    pub fn new(
        store: Arc<dyn StyleStore>,
        generator: Arc<dyn StyleGenerator>,
        locks: Arc<KeyedLocks<EntryKey>>,
        recorder: FeedbackRecorder,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            generator,
            locks,
            recorder,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            settings,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SiteKey, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_in_flight(&self, site: &SiteKey) -> bool {
        self.registry().contains_key(site)
    }

    pub fn in_flight_count(&self) -> usize {
        self.registry().len()
    }

    /// Wait for the generation running for exactly `key`, if there is one
    pub async fn wait_for(&self, key: &EntryKey) -> Option<Result<StyleResult, EngineError>> {
        let outcome = self
            .registry()
            .get(&key.site())
            .filter(|f| &f.key == key)
            .map(|f| f.outcome.clone())?;
        Some(outcome.await)
    }

    /// Generate a style for `request.key`
    ///
    /// A request for the key already being generated joins that generation.
    /// A request for another layout of the same site and era waits for the
    /// running generation to finish, then starts its own. Each caller waits
    /// no longer than its own timeout and gets the era fallback past it.
    pub async fn request_style(&self, request: StyleRequest) -> Result<StyleResult, EngineError> {
        if let Some(feedback) = &request.feedback {
            feedback.validate()?;
        }

        let timeout = request.timeout.unwrap_or(self.settings.default_timeout);
        let deadline = tokio::time::Instant::now() + timeout;

        // Arrival order decides feedback order, whoever ends up generating
        if let Some(feedback) = request.feedback.clone() {
            self.recorder.record_or_reserve(&request.key, feedback).await?;
        }

        let site = request.key.site();
        loop {
            match self.claim(&site, &request, deadline) {
                Claim::Led(outcome) => return outcome.await,
                Claim::Joined(outcome) => {
                    debug!("Joining in-flight generation for {}", request.key);
                    return match tokio::time::timeout_at(deadline, outcome).await {
                        Ok(result) => result,
                        Err(_) => self.deadline_fallback(&request.key).await,
                    };
                }
                Claim::Queued(running, outcome) => {
                    debug!(
                        "Waiting for generation of {} before generating {}",
                        running, request.key
                    );
                    // The other layout's result is not ours to return
                    if tokio::time::timeout_at(deadline, outcome).await.is_err() {
                        return self.deadline_fallback(&request.key).await;
                    }
                }
            }
        }
    }

    /// Join, queue behind, or start the generation for the request's site
    fn claim(
        &self,
        site: &SiteKey,
        request: &StyleRequest,
        deadline: tokio::time::Instant,
    ) -> Claim {
        let mut in_flight = self.registry();
        if let Some(existing) = in_flight.get(site) {
            return if existing.key == request.key {
                Claim::Joined(existing.outcome.clone())
            } else {
                Claim::Queued(existing.key.clone(), existing.outcome.clone())
            };
        }

        let id = Uuid::new_v4();
        let guard = InFlightGuard {
            registry: self.in_flight.clone(),
            site: site.clone(),
            id,
        };
        let timeout = deadline.saturating_duration_since(tokio::time::Instant::now());
        let task = tokio::spawn(self.clone().run(guard, request.clone(), timeout));
        let outcome = async move {
            task.await.unwrap_or_else(|e| {
                Err(EngineError::Internal(format!("generation task failed: {}", e)))
            })
        }
        .boxed()
        .shared();
        in_flight.insert(
            site.clone(),
            InFlight {
                id,
                key: request.key.clone(),
                outcome: outcome.clone(),
            },
        );
        debug!("Started generation {} for {}", id, request.key);
        Claim::Led(outcome)
    }

    /// Fallback for a caller whose deadline passed while waiting on another
    /// caller's generation
    async fn deadline_fallback(&self, key: &EntryKey) -> Result<StyleResult, EngineError> {
        warn!("⏱️  Deadline passed waiting for {}; serving fallback", key);
        let (approval_status, regeneration_count) = match self.store.lookup(key).await? {
            Some(entry) => (entry.approval_status, entry.regeneration_count),
            None => (ApprovalStatus::Processing, 0),
        };
        Ok(StyleResult {
            domain: key.domain.clone(),
            era: key.era,
            fingerprint: key.fingerprint.clone(),
            css: fallback_css(key.era).to_string(),
            approval_status,
            source: StyleSource::Fallback,
            regeneration_count,
            failure: Some(FailureKind::Timeout),
        })
    }

    async fn run(
        self,
        guard: InFlightGuard,
        request: StyleRequest,
        timeout: Duration,
    ) -> Result<StyleResult, EngineError> {
        let id = guard.id;
        let result = self.generate(id, request, timeout).await;
        drop(guard);
        result
    }

    async fn generate(
        &self,
        id: Uuid,
        request: StyleRequest,
        timeout: Duration,
    ) -> Result<StyleResult, EngineError> {
        let StyleRequest { key, dom_summary, .. } = request;

        let latest_feedback = self.begin(&key).await?;

        let generation = GenerationRequest {
            domain: key.domain.clone(),
            era: key.era,
            fingerprint: key.fingerprint.clone(),
            dom_summary,
            feedback: latest_feedback,
        };

        info!(
            "🎨 Generating style for {} via {} (generation {}, timeout {:?})",
            key,
            self.generator.name(),
            id,
            timeout
        );
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.generator.generate(generation)).await
        {
            Ok(Ok(css)) => clean_css(&css),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GeneratorError::Timeout(timeout)),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(css) => self.complete(&key, css, elapsed).await,
            Err(err) => self.fail(&key, err, elapsed).await,
        }
    }

    /// Move the entry to `processing` before the call
    ///
    /// Returns the feedback the generator should see.
    async fn begin(&self, key: &EntryKey) -> Result<Option<Feedback>, EngineError> {
        let _guard = self.locks.lock(key).await;
        let now = Utc::now();
        let mut entry = match self.store.lookup(key).await? {
            Some(entry) => entry,
            None => CacheEntry::placeholder(key, now),
        };

        if entry.approval_status != ApprovalStatus::Processing {
            entry.request_transition(ApprovalStatus::Processing, now)?;
        }

        put_durably(self.store.as_ref(), &entry).await?;
        Ok(entry.latest_feedback().cloned())
    }

    async fn complete(
        &self,
        key: &EntryKey,
        css: String,
        elapsed: Duration,
    ) -> Result<StyleResult, EngineError> {
        let entry = {
            let _guard = self.locks.lock(key).await;
            let now = Utc::now();
            let mut entry = match self.store.lookup(key).await? {
                Some(entry) => entry,
                None => CacheEntry::placeholder(key, now),
            };
            entry.apply_generated(css, now)?;
            put_durably(self.store.as_ref(), &entry).await?;
            entry
        };

        info!(
            "✅ Generated style for {} in {:?} ({} bytes, regeneration #{})",
            key,
            elapsed,
            entry.css.len(),
            entry.regeneration_count
        );
        self.enforce_size_ceiling().await;
        Ok(StyleResult::from_entry(&entry, StyleSource::Generated))
    }

    async fn fail(
        &self,
        key: &EntryKey,
        err: GeneratorError,
        elapsed: Duration,
    ) -> Result<StyleResult, EngineError> {
        let failure = match err {
            GeneratorError::Timeout(_) => FailureKind::Timeout,
            GeneratorError::Failed(_) | GeneratorError::Invalid(_) => {
                FailureKind::GenerationFailure
            }
        };
        warn!(
            "⚠️  Style generation for {} failed after {:?}: {}; serving fallback",
            key, elapsed, err
        );

        let fallback = fallback_css(key.era);
        let entry = {
            let _guard = self.locks.lock(key).await;
            let now = Utc::now();
            let mut entry = match self.store.lookup(key).await? {
                Some(entry) => entry,
                None => CacheEntry::placeholder(key, now),
            };
            // Keep the last known style; a brand new entry gets the fallback
            if !entry.has_style() {
                entry.css = fallback.to_string();
            }
            if entry.approval_status == ApprovalStatus::Processing {
                entry.request_transition(ApprovalStatus::Rejected, now)?;
            }
            put_durably(self.store.as_ref(), &entry).await?;
            entry
        };

        Ok(StyleResult {
            css: fallback.to_string(),
            failure: Some(failure),
            ..StyleResult::from_entry(&entry, StyleSource::Fallback)
        })
    }

    async fn enforce_size_ceiling(&self) {
        let Some(max_bytes) = self.settings.max_cache_bytes else {
            return;
        };
        let policy = EvictionPolicy::SizeCeiling(max_bytes);
        if let Err(e) = evict_locked(self.store.as_ref(), &self.locks, policy).await {
            error!("❌ Size ceiling eviction failed: {}", e);
        }
    }

    /// Settle entries left `processing` by a previous run
    ///
    /// Entries holding css go back to `pending`; empty placeholders become
    /// `rejected` with the era fallback. Returns how many were repaired.
    pub async fn recover_interrupted(&self) -> Result<usize, EngineError> {
        let stuck = self
            .store
            .entries_with_status(ApprovalStatus::Processing)
            .await?;
        let mut repaired = 0;

        for stale in stuck {
            let key = stale.key();
            if self.is_in_flight(&key.site()) {
                continue;
            }

            let _guard = self.locks.lock(&key).await;
            let Some(mut entry) = self.store.lookup(&key).await? else {
                continue;
            };
            if entry.approval_status != ApprovalStatus::Processing {
                continue;
            }

            let now = Utc::now();
            if entry.has_style() {
                entry.request_transition(ApprovalStatus::Pending, now)?;
            } else {
                entry.css = fallback_css(key.era).to_string();
                entry.request_transition(ApprovalStatus::Rejected, now)?;
            }
            put_durably(self.store.as_ref(), &entry).await?;
            repaired += 1;
            warn!(
                "Recovered interrupted generation for {} as {}",
                key, entry.approval_status
            );
        }

        if repaired > 0 {
            info!("🔧 Recovered {} interrupted generations", repaired);
        }
        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style_cache::sqlite::SqliteStyleStore;
    use async_trait::async_trait;
    use retroweb_model::{FeedbackPreset, PageStructure};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Generator that counts calls and can stall or fail
    struct ScriptedGenerator {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl StyleGenerator for ScriptedGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<String, GeneratorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(GeneratorError::Failed("model offline".into()));
            }
            Ok(format!("body {{ color: #000; }} /* {} call {} */", request.era, call))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn setup(
        delay: Duration,
        fail: bool,
    ) -> (GenerationCoordinator, Arc<ScriptedGenerator>, Arc<dyn StyleStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn StyleStore> =
            Arc::new(SqliteStyleStore::new(temp_dir.path().join("test.db")).unwrap());
        let generator = Arc::new(ScriptedGenerator {
            calls: AtomicUsize::new(0),
            delay,
            fail,
        });
        let locks = Arc::new(KeyedLocks::new());
        let recorder = FeedbackRecorder::new(store.clone(), locks.clone());
        let coordinator = GenerationCoordinator::new(
            store.clone(),
            generator.clone(),
            locks,
            recorder,
            CoordinatorSettings {
                default_timeout: Duration::from_secs(5),
                max_cache_bytes: None,
            },
        );
        (coordinator, generator, store, temp_dir)
    }

    fn key() -> EntryKey {
        EntryKey::new(
            "example.com",
            Era::Win95,
            PageStructure::default().fingerprint().unwrap(),
        )
    }

    fn legacy_fingerprint() -> Fingerprint {
        PageStructure {
            landmarks: vec!["table".to_string()],
            ..Default::default()
        }
        .fingerprint()
        .unwrap()
    }

    #[tokio::test]
    async fn test_first_generation_is_pending() {
        let (coordinator, generator, store, _temp_dir) = setup(Duration::ZERO, false);

        let result = coordinator.request_style(StyleRequest::new(key())).await.unwrap();
        assert_eq!(result.source, StyleSource::Generated);
        assert_eq!(result.approval_status, ApprovalStatus::Pending);
        assert_eq!(result.regeneration_count, 0);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        let entry = store.lookup(&key()).await.unwrap().unwrap();
        assert_eq!(entry.css, result.css);
        assert!(!coordinator.is_in_flight(&key().site()));
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let (coordinator, generator, _store, _temp_dir) =
            setup(Duration::from_millis(100), false);

        let (a, b) = tokio::join!(
            coordinator.request_style(StyleRequest::new(key())),
            coordinator.request_style(StyleRequest::new(key())),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_joiner_gets_its_own_deadline() {
        let (coordinator, generator, _store, _temp_dir) =
            setup(Duration::from_millis(200), false);

        let mut impatient = StyleRequest::new(key());
        impatient.timeout = Some(Duration::from_millis(20));
        let (patient, impatient) = tokio::join!(
            coordinator.request_style(StyleRequest::new(key())),
            coordinator.request_style(impatient),
        );

        let patient = patient.unwrap();
        assert_eq!(patient.source, StyleSource::Generated);
        let impatient = impatient.unwrap();
        assert_eq!(impatient.source, StyleSource::Fallback);
        assert_eq!(impatient.failure, Some(FailureKind::Timeout));
        assert_eq!(impatient.css, fallback_css(Era::Win95));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_layout_waits_then_generates_its_own() {
        let (coordinator, generator, store, _temp_dir) =
            setup(Duration::from_millis(50), false);
        let other = EntryKey::new("example.com", Era::Win95, legacy_fingerprint());

        let (a, b) = tokio::join!(
            coordinator.request_style(StyleRequest::new(key())),
            coordinator.request_style(StyleRequest::new(other.clone())),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.fingerprint, key().fingerprint);
        assert_eq!(b.fingerprint, other.fingerprint);
        assert_eq!(b.source, StyleSource::Generated);
        assert_ne!(a.css, b.css);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            store.lookup(&other).await.unwrap().unwrap().approval_status,
            ApprovalStatus::Pending
        );
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_queued_layout_respects_deadline() {
        let (coordinator, generator, _store, _temp_dir) =
            setup(Duration::from_millis(200), false);
        let other = EntryKey::new("example.com", Era::Win95, legacy_fingerprint());

        let mut queued = StyleRequest::new(other);
        queued.timeout = Some(Duration::from_millis(20));
        let (_, queued) = tokio::join!(
            coordinator.request_style(StyleRequest::new(key())),
            coordinator.request_style(queued),
        );
        let queued = queued.unwrap();
        assert_eq!(queued.failure, Some(FailureKind::Timeout));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_serves_fallback_and_rejects() {
        let (coordinator, _generator, store, _temp_dir) = setup(Duration::ZERO, true);

        let result = coordinator.request_style(StyleRequest::new(key())).await.unwrap();
        assert_eq!(result.source, StyleSource::Fallback);
        assert_eq!(result.failure, Some(FailureKind::GenerationFailure));
        assert_eq!(result.css, fallback_css(Era::Win95));

        let entry = store.lookup(&key()).await.unwrap().unwrap();
        assert_eq!(entry.approval_status, ApprovalStatus::Rejected);
        assert!(entry.has_style());
    }

    #[tokio::test]
    async fn test_timeout_serves_fallback() {
        let (coordinator, _generator, store, _temp_dir) =
            setup(Duration::from_secs(30), false);

        let mut request = StyleRequest::new(key());
        request.timeout = Some(Duration::from_millis(20));
        let result = coordinator.request_style(request).await.unwrap();
        assert_eq!(result.failure, Some(FailureKind::Timeout));
        assert!(!result.css.is_empty());

        let entry = store.lookup(&key()).await.unwrap().unwrap();
        assert_eq!(entry.approval_status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn test_feedback_recorded_even_when_generation_fails() {
        let (coordinator, _generator, store, _temp_dir) = setup(Duration::ZERO, true);
        let mut request = StyleRequest::new(key());
        request.feedback =
            Some(Feedback::new(Some(FeedbackPreset::MakeUsable), None, Utc::now()).unwrap());

        coordinator.request_style(request).await.unwrap();
        let entry = store.lookup(&key()).await.unwrap().unwrap();
        assert_eq!(entry.feedback_history.len(), 1);
    }

    #[tokio::test]
    async fn test_approved_entry_cannot_regenerate() {
        let (coordinator, generator, store, _temp_dir) = setup(Duration::ZERO, false);
        let mut entry = CacheEntry::generated(&key(), "a{}".into(), Utc::now());
        entry.request_transition(ApprovalStatus::Approved, Utc::now()).unwrap();
        store.put(&entry).await.unwrap();

        let err = coordinator.request_style(StyleRequest::new(key())).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.lookup(&key()).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let (coordinator, _generator, store, _temp_dir) = setup(Duration::ZERO, false);
        let placeholder = CacheEntry::placeholder(&key(), Utc::now());
        store.put(&placeholder).await.unwrap();

        let other_key = EntryKey::new("other.com", Era::Win98, key().fingerprint);
        let mut styled = CacheEntry::generated(&other_key, "a{}".into(), Utc::now());
        styled.request_transition(ApprovalStatus::Processing, Utc::now()).unwrap();
        store.put(&styled).await.unwrap();

        assert_eq!(coordinator.recover_interrupted().await.unwrap(), 2);

        let recovered = store.lookup(&key()).await.unwrap().unwrap();
        assert_eq!(recovered.approval_status, ApprovalStatus::Rejected);
        assert_eq!(recovered.css, fallback_css(Era::Win95));

        let recovered = store.lookup(&other_key).await.unwrap().unwrap();
        assert_eq!(recovered.approval_status, ApprovalStatus::Pending);
        assert_eq!(recovered.css, "a{}");
    }
}
