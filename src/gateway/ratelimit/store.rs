//! Shared fixed-window counters.
//!
//! `PgCounterStore` is the authoritative store so multiple gateway instances
//! agree on one count; the upsert resets an expired window and increments a
//! live one in a single statement, so two racing requests never both observe
//! a pre-limit count. Keys are attacker-influenced (fingerprints, IPs,
//! phones), so expired windows are also deleted: the table stays bounded by
//! live keys, not by every key ever seen. `MemoryCounterStore` backs dev
//! mode and tests.

use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info_span, warn, Instrument};

/// One expired-row sweep per this many increments.
const SWEEP_EVERY: u64 = 1024;

/// Post-increment observation of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time until the window resets, the client-facing retry hint.
    pub retry_after: Duration,
}

pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key`, creating a fresh window
    /// of length `window` when none is live.
    fn incr<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<WindowCount>> + Send + 'a>>;
}

#[derive(Debug)]
pub struct PgCounterStore {
    pool: PgPool,
    increments: AtomicU64,
}

impl PgCounterStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            increments: AtomicU64::new(0),
        }
    }

    /// Create the counter table when it does not exist yet.
    ///
    /// # Errors
    /// Returns the database error if the DDL fails.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        let query = "CREATE TABLE IF NOT EXISTS rate_counters (
            key TEXT PRIMARY KEY,
            count BIGINT NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "CREATE");
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    /// Delete every row whose window has passed. Run opportunistically from
    /// `incr`, so one-shot keys (fresh fingerprints, rotating IPs) cannot
    /// grow the table without bound.
    ///
    /// # Errors
    /// Returns the database error if the delete fails.
    pub async fn sweep_expired(&self) -> anyhow::Result<u64> {
        let query = "DELETE FROM rate_counters WHERE expires_at <= NOW()";
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "DELETE");
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}

impl CounterStore for PgCounterStore {
    fn incr<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<WindowCount>> + Send + 'a>> {
        Box::pin(async move {
            let query = "INSERT INTO rate_counters AS rc (key, count, expires_at)
                VALUES ($1, 1, NOW() + $2::interval)
                ON CONFLICT (key) DO UPDATE SET
                    count = CASE WHEN rc.expires_at <= NOW() THEN 1 ELSE rc.count + 1 END,
                    expires_at = CASE WHEN rc.expires_at <= NOW()
                        THEN NOW() + $2::interval ELSE rc.expires_at END
                RETURNING count,
                    GREATEST(CEIL(EXTRACT(EPOCH FROM (expires_at - NOW()))), 0)::BIGINT
                        AS retry_after";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            let row = sqlx::query(query)
                .bind(key)
                .bind(format!("{} seconds", window.as_secs()))
                .fetch_one(&self.pool)
                .instrument(span)
                .await?;

            let count: i64 = row.get("count");
            let retry_after: i64 = row.get("retry_after");

            // sweep failure never fails the request that triggered it
            if self.increments.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == 0 {
                if let Err(err) = self.sweep_expired().await {
                    warn!(error = %err, "expired counter sweep failed");
                }
            }

            Ok(WindowCount {
                count: u64::try_from(count).unwrap_or(0),
                retry_after: Duration::from_secs(u64::try_from(retry_after).unwrap_or(0)),
            })
        })
    }
}

/// Single-instance fallback. The mutex is held only for the map operation,
/// never across an await point. Expired entries are dropped on every
/// increment, so the map holds live windows only.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

impl CounterStore for MemoryCounterStore {
    fn incr<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<WindowCount>> + Send + 'a>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| anyhow::anyhow!("counter store poisoned"))?;

            entries.retain(|_, (_, deadline)| *deadline > now);

            let entry = entries
                .entry(key.to_string())
                .and_modify(|(count, _)| *count += 1)
                .or_insert((1, now + window));

            Ok(WindowCount {
                count: entry.0,
                retry_after: entry.1.saturating_duration_since(now),
            })
        })
    }
}
