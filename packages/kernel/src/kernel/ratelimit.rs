//! Per-(scope, goal) token-bucket rate limiting over the store.
//!
//! Buckets refill continuously at `refill_per_sec` up to `capacity`. Each
//! admission decision is exactly one read-modify-write inside a transaction,
//! so updates for a given key are serialized by the store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::common::time::{from_millis, to_millis};
use crate::kernel::error::KernelResult;

/// Refill rule for one goal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

/// Outcome of a single token take.
#[derive(Debug, Clone, PartialEq)]
pub struct TakeOutcome {
    pub allowed: bool,
    /// Tokens remaining after this take.
    pub tokens: f64,
    /// Earliest instant a token will be available again. `None` when allowed,
    /// or when the bucket never refills (`refill_per_sec <= 0`).
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct RateLimiter {
    pool: SqlitePool,
}

impl RateLimiter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Rate-limit partitioning key derived from mission context.
    pub fn scope_key(
        org_id: Option<&str>,
        site_id: Option<&str>,
        machine_id: Option<&str>,
    ) -> String {
        format!(
            "{}/{}/{}",
            org_id.unwrap_or("unknown-org"),
            site_id.unwrap_or("unknown-site"),
            machine_id.unwrap_or("unknown-machine")
        )
    }

    /// Try to take one token from the bucket for `(scope_key, goal)`.
    ///
    /// An absent bucket is treated as full. The refill/consume/upsert happens
    /// in one transaction; concurrent takes on the same key serialize at the
    /// store.
    pub async fn take(
        &self,
        scope_key: &str,
        goal: &str,
        rule: &RateLimitRule,
        now: DateTime<Utc>,
    ) -> KernelResult<TakeOutcome> {
        let key = format!("{scope_key}|{goal}");
        let mut tx = self.pool.begin().await?;

        let row: Option<(f64, i64)> =
            sqlx::query_as("SELECT tokens, updated_at FROM rate_limit_buckets WHERE key = ?")
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await?;

        let (tokens, updated_at) = match row {
            Some((tokens, updated_ms)) => (tokens, from_millis(updated_ms)),
            None => (rule.capacity, now),
        };

        let elapsed_sec = (now - updated_at).num_milliseconds().max(0) as f64 / 1000.0;
        let refilled = (tokens + elapsed_sec * rule.refill_per_sec).min(rule.capacity);

        let outcome = if refilled >= 1.0 {
            TakeOutcome {
                allowed: true,
                tokens: refilled - 1.0,
                next_retry_at: None,
            }
        } else {
            let next_retry_at = (rule.refill_per_sec > 0.0).then(|| {
                let wait_ms = ((1.0 - refilled) / rule.refill_per_sec * 1000.0).ceil() as i64;
                now + Duration::milliseconds(wait_ms)
            });
            TakeOutcome {
                allowed: false,
                tokens: refilled,
                next_retry_at,
            }
        };

        sqlx::query(
            r#"
            INSERT INTO rate_limit_buckets (key, tokens, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                tokens = excluded.tokens,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key)
        .bind(outcome.tokens)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_key_substitutes_unknowns() {
        assert_eq!(
            RateLimiter::scope_key(Some("org-1"), None, Some("m-9")),
            "org-1/unknown-site/m-9"
        );
    }
}
