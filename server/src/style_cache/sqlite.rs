//! SQLite implementation of the StyleStore trait

use crate::style_cache::{
    EvictionPolicy, EvictionReport, FeedbackEvent, StoreError, StoreStats, StyleStore,
};
use chrono::{DateTime, SecondsFormat, Utc};
use retroweb_model::{ApprovalStatus, CacheEntry, EntryKey, Era, Feedback, Fingerprint};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const SELECTED_ERA_KEY: &str = "selected_era";

const ENTRY_COLUMNS: &str = "domain, era, fingerprint, css, approval_status, generated_at, \
     approval_updated_at, regeneration_count, feedback_history";

/// SQLite-backed implementation of StyleStore
pub struct SqliteStyleStore {
    conn: Arc<Mutex<Connection>>,
    tracked_bytes: AtomicU64,
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically
fn encode_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", raw, e)))
}

/// Raw column values, decoded outside the rusqlite row callback
struct EntryRow {
    domain: String,
    era: String,
    fingerprint: String,
    css: String,
    approval_status: String,
    generated_at: String,
    approval_updated_at: String,
    regeneration_count: i64,
    feedback_history: String,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            domain: row.get(0)?,
            era: row.get(1)?,
            fingerprint: row.get(2)?,
            css: row.get(3)?,
            approval_status: row.get(4)?,
            generated_at: row.get(5)?,
            approval_updated_at: row.get(6)?,
            regeneration_count: row.get(7)?,
            feedback_history: row.get(8)?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, StoreError> {
        let era: Era = self
            .era
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{}", e)))?;
        let fingerprint = Fingerprint::parse(&self.fingerprint)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let (approval_status, normalized) = ApprovalStatus::from_stored(&self.approval_status);
        if normalized {
            warn!(
                "Normalized unknown approval status {:?} to pending for {}/{}",
                self.approval_status, self.domain, era
            );
        }

        let feedback_history: Vec<Feedback> = serde_json::from_str(&self.feedback_history)
            .map_err(|e| StoreError::Corrupt(format!("bad feedback history: {}", e)))?;

        Ok(CacheEntry {
            domain: self.domain,
            era,
            fingerprint,
            css: self.css,
            approval_status,
            generated_at: decode_time(&self.generated_at)?,
            approval_updated_at: decode_time(&self.approval_updated_at)?,
            regeneration_count: u32::try_from(self.regeneration_count).map_err(|_| {
                StoreError::Corrupt(format!("bad regeneration count {}", self.regeneration_count))
            })?,
            feedback_history,
        })
    }
}

impl SqliteStyleStore {
    /// Create a new SQLite style store
    ///
    /// If the database doesn't exist, it will be created with the required schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            tracked_bytes: AtomicU64::new(0),
        };
        store.init_schema()?;
        store.seed_tracked_bytes()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        // WAL keeps readers off half-committed writes after a crash
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Style cache journal mode: {}", mode);
        conn.pragma_update(None, "synchronous", "FULL")?;

        // One row per (domain, era, fingerprint); feedback is a JSON array
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS style_entries (
                domain TEXT NOT NULL,
                era TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                css TEXT NOT NULL,
                css_bytes INTEGER NOT NULL,
                approval_status TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                approval_updated_at TEXT NOT NULL,
                regeneration_count INTEGER NOT NULL DEFAULT 0,
                feedback_history TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (domain, era, fingerprint)
            )
            "#,
            [],
        )?;

        // Per-domain lookups for the popup
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_style_entries_domain ON style_entries(domain)",
            [],
        )?;

        // Eviction scans oldest approval changes first
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_style_entries_approval ON style_entries(approval_updated_at)",
            [],
        )?;

        // Append-only; rows survive eviction of the entry they were left on
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS feedback_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                era TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                preset_type TEXT,
                feedback TEXT NOT NULL,
                submitted_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_feedback_log_site ON feedback_log(domain, era)",
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            [],
        )?;

        info!("Style cache database schema initialized");
        Ok(())
    }

    /// Load the running css total once; writes keep it current afterwards
    fn seed_tracked_bytes(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(css_bytes), 0) FROM style_entries",
            [],
            |row| row.get(0),
        )?;
        self.tracked_bytes.store(total.max(0) as u64, Ordering::SeqCst);
        debug!("Style cache tracking {} css bytes", total);
        Ok(())
    }

    fn adjust_tracked(&self, removed: u64, added: u64) {
        self.tracked_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                Some(total.saturating_sub(removed).saturating_add(added))
            })
            .ok();
    }

    fn query_entries(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, EntryRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    fn query_feedback(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<FeedbackEvent>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(domain, era, fingerprint, feedback)| {
                Ok(FeedbackEvent {
                    era: era.parse().map_err(|e| StoreError::Corrupt(format!("{}", e)))?,
                    fingerprint: Fingerprint::parse(&fingerprint)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    feedback: serde_json::from_str(&feedback)
                        .map_err(|e| StoreError::Corrupt(format!("bad feedback record: {}", e)))?,
                    domain,
                })
            })
            .collect()
    }

    /// Entries `policy` removes, oldest approval change first
    ///
    /// Must run under the connection lock so `tracked` and the row sizes agree.
    fn select_victims(
        conn: &Connection,
        policy: EvictionPolicy,
        tracked: u64,
        only: Option<&HashSet<&EntryKey>>,
    ) -> Result<Vec<(EntryKey, u64)>, StoreError> {
        let (cutoff, mut excess) = match policy {
            EvictionPolicy::OlderThan(cutoff) => (Some(encode_time(&cutoff)), None),
            EvictionPolicy::SizeCeiling(max_bytes) => {
                if tracked <= max_bytes {
                    return Ok(Vec::new());
                }
                (None, Some(tracked - max_bytes))
            }
        };

        let mut stmt = conn.prepare(
            r#"
            SELECT domain, era, fingerprint, css_bytes
            FROM style_entries
            WHERE approval_status != 'processing'
              AND (?1 IS NULL OR approval_updated_at < ?1)
            ORDER BY approval_updated_at ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut victims = Vec::new();
        for (domain, era, fingerprint, bytes) in rows {
            let (era, fingerprint) = match (era.parse::<Era>(), Fingerprint::parse(&fingerprint)) {
                (Ok(era), Ok(fp)) => (era, fp),
                _ => {
                    warn!("Skipping unreadable row for {} during eviction", domain);
                    continue;
                }
            };
            let key = EntryKey::new(domain, era, fingerprint);
            if only.is_some_and(|only| !only.contains(&key)) {
                continue;
            }

            let bytes = bytes.max(0) as u64;
            if let Some(remaining) = excess.as_mut() {
                if *remaining == 0 {
                    break;
                }
                *remaining = remaining.saturating_sub(bytes);
            }
            victims.push((key, bytes));
        }
        Ok(victims)
    }

    /// Select and delete inside one transaction
    fn evict_where(
        &self,
        policy: EvictionPolicy,
        only: Option<&HashSet<&EntryKey>>,
    ) -> Result<EvictionReport, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let victims = Self::select_victims(&tx, policy, self.tracked_bytes(), only)?;

        let mut report = EvictionReport::default();
        for (key, bytes) in victims {
            let deleted = tx.execute(
                "DELETE FROM style_entries WHERE domain = ?1 AND era = ?2 AND fingerprint = ?3",
                params![key.domain, key.era.as_str(), key.fingerprint.as_str()],
            )?;
            if deleted > 0 {
                report.bytes_freed += bytes;
                report.removed.push(key);
            }
        }
        tx.commit()?;
        self.adjust_tracked(report.bytes_freed, 0);

        if !report.removed.is_empty() {
            info!(
                "🧹 Evicted {} style entries ({} bytes) under {:?}",
                report.removed.len(),
                report.bytes_freed,
                policy
            );
        }
        Ok(report)
    }
}

#[async_trait::async_trait]
impl StyleStore for SqliteStyleStore {
    async fn lookup(&self, key: &EntryKey) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM style_entries WHERE domain = ?1 AND era = ?2 AND fingerprint = ?3",
                    ENTRY_COLUMNS
                ),
                params![key.domain, key.era.as_str(), key.fingerprint.as_str()],
                EntryRow::from_row,
            )
            .optional()?;
        row.map(EntryRow::into_entry).transpose()
    }

    async fn lookup_latest_for_domain(
        &self,
        domain: &str,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM style_entries
                    WHERE domain = ?1
                    ORDER BY MAX(generated_at, approval_updated_at) DESC
                    LIMIT 1
                    "#,
                    ENTRY_COLUMNS
                ),
                params![domain],
                EntryRow::from_row,
            )
            .optional()?;
        row.map(EntryRow::into_entry).transpose()
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let feedback_json = serde_json::to_string(&entry.feedback_history)
            .map_err(|e| StoreError::Database(format!("failed to encode feedback: {}", e)))?;
        let new_bytes = entry.css_bytes();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let previous: Option<(i64, String)> = tx
            .query_row(
                "SELECT css_bytes, feedback_history FROM style_entries WHERE domain = ?1 AND era = ?2 AND fingerprint = ?3",
                params![entry.domain, entry.era.as_str(), entry.fingerprint.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (old_bytes, logged_feedback) = match previous {
            Some((bytes, history)) => {
                let logged = serde_json::from_str::<Vec<serde_json::Value>>(&history)
                    .map_err(|e| StoreError::Corrupt(format!("bad feedback history: {}", e)))?
                    .len();
                (bytes.max(0) as u64, logged)
            }
            None => (0, 0),
        };

        tx.execute(
            r#"
            INSERT INTO style_entries (
                domain, era, fingerprint, css, css_bytes, approval_status,
                generated_at, approval_updated_at, regeneration_count, feedback_history
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(domain, era, fingerprint) DO UPDATE SET
                css = excluded.css,
                css_bytes = excluded.css_bytes,
                approval_status = excluded.approval_status,
                generated_at = excluded.generated_at,
                approval_updated_at = excluded.approval_updated_at,
                regeneration_count = excluded.regeneration_count,
                feedback_history = excluded.feedback_history
            "#,
            params![
                entry.domain,
                entry.era.as_str(),
                entry.fingerprint.as_str(),
                entry.css,
                new_bytes as i64,
                entry.approval_status.as_str(),
                encode_time(&entry.generated_at),
                encode_time(&entry.approval_updated_at),
                i64::from(entry.regeneration_count),
                feedback_json,
            ],
        )?;

        // History is append-only, so anything past the stored length is new
        for feedback in entry.feedback_history.iter().skip(logged_feedback) {
            let record = serde_json::to_string(feedback)
                .map_err(|e| StoreError::Database(format!("failed to encode feedback: {}", e)))?;
            tx.execute(
                r#"
                INSERT INTO feedback_log (
                    domain, era, fingerprint, preset_type, feedback, submitted_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    entry.domain,
                    entry.era.as_str(),
                    entry.fingerprint.as_str(),
                    feedback.preset_type.map(|p| p.as_str()),
                    record,
                    encode_time(&feedback.submitted_at),
                ],
            )?;
        }
        tx.commit()?;

        // Still under the connection lock, so concurrent puts apply in commit order
        self.adjust_tracked(old_bytes, new_bytes);

        debug!(
            "Stored style entry {} status={} ({} bytes)",
            entry.key(),
            entry.approval_status,
            new_bytes
        );
        Ok(())
    }

    async fn evict(&self, policy: EvictionPolicy) -> Result<EvictionReport, StoreError> {
        self.evict_where(policy, None)
    }

    async fn eviction_candidates(
        &self,
        policy: EvictionPolicy,
    ) -> Result<Vec<EntryKey>, StoreError> {
        let conn = self.conn()?;
        let victims = Self::select_victims(&conn, policy, self.tracked_bytes(), None)?;
        Ok(victims.into_iter().map(|(key, _)| key).collect())
    }

    async fn evict_among(
        &self,
        policy: EvictionPolicy,
        keys: &[EntryKey],
    ) -> Result<EvictionReport, StoreError> {
        let only: HashSet<&EntryKey> = keys.iter().collect();
        self.evict_where(policy, Some(&only))
    }

    async fn entries_with_status(
        &self,
        status: ApprovalStatus,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        let conn = self.conn()?;
        Self::query_entries(
            &conn,
            &format!(
                "SELECT {} FROM style_entries WHERE approval_status = ?1",
                ENTRY_COLUMNS
            ),
            params![status.as_str()],
        )
    }

    async fn feedback_events(&self) -> Result<Vec<FeedbackEvent>, StoreError> {
        let conn = self.conn()?;
        Self::query_feedback(
            &conn,
            "SELECT domain, era, fingerprint, feedback FROM feedback_log ORDER BY id ASC",
            [],
        )
    }

    async fn recent_feedback(
        &self,
        domain: Option<&str>,
        era: Option<Era>,
        limit: usize,
    ) -> Result<Vec<FeedbackEvent>, StoreError> {
        let conn = self.conn()?;
        Self::query_feedback(
            &conn,
            r#"
            SELECT domain, era, fingerprint, feedback FROM feedback_log
            WHERE (?1 IS NULL OR domain = ?1) AND (?2 IS NULL OR era = ?2)
            ORDER BY id DESC
            LIMIT ?3
            "#,
            params![
                domain,
                era.map(|era| era.as_str()),
                i64::try_from(limit).unwrap_or(i64::MAX)
            ],
        )
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn()?;
        let entries: i64 =
            conn.query_row("SELECT COUNT(*) FROM style_entries", [], |row| row.get(0))?;
        Ok(StoreStats {
            entries: entries.max(0) as u64,
            tracked_bytes: self.tracked_bytes(),
        })
    }

    fn tracked_bytes(&self) -> u64 {
        self.tracked_bytes.load(Ordering::SeqCst)
    }

    async fn selected_era(&self) -> Result<Option<Era>, StoreError> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![SELECTED_ERA_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(raw) => match raw.parse() {
                Ok(era) => Ok(Some(era)),
                Err(e) => {
                    warn!("Ignoring stored era setting: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set_selected_era(&self, era: Era) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![SELECTED_ERA_KEY, era.as_str()],
        )?;
        info!("Selected era set to {}", era);
        Ok(())
    }
}
