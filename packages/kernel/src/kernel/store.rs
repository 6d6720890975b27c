//! Sqlite-backed durable store.
//!
//! Single source of truth for missions, rate-limit buckets, governor
//! settings, command proposals, and device keys. The pool is tuned for a
//! single-process service: WAL journaling plus a busy timeout so concurrent
//! request handlers serialize on conditional updates instead of erroring.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::common::time::{from_millis, to_millis};
use crate::kernel::error::KernelResult;

/// Embedded schema migrations, applied on startup and by test harnesses.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct KernelStore {
    pool: SqlitePool,
}

impl KernelStore {
    /// Open (creating if missing) the database at `db_path`.
    pub async fn connect(db_path: &str) -> KernelResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (test harnesses).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> KernelResult<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Cheap connectivity probe for the health endpoint.
    pub async fn ping(&self) -> KernelResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    // ── kernel_settings ──────────────────────────────────────────────

    pub async fn get_setting(&self, key: &str) -> KernelResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value_json FROM kernel_settings WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    pub async fn put_setting(
        &self,
        key: &str,
        value_json: &str,
        now: DateTime<Utc>,
    ) -> KernelResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kernel_settings (key, value_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value_json)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── device_keys ──────────────────────────────────────────────────

    pub async fn put_device_key(
        &self,
        device_id: &str,
        org_id: &str,
        public_key: &str,
        now: DateTime<Utc>,
    ) -> KernelResult<()> {
        sqlx::query(
            r#"
            INSERT INTO device_keys (device_id, org_id, public_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(device_id) DO UPDATE SET
                org_id = excluded.org_id,
                public_key = excluded.public_key,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(device_id)
        .bind(org_id)
        .bind(public_key)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_device_key(&self, device_id: &str) -> KernelResult<Option<DeviceKey>> {
        let row = sqlx::query_as::<_, DeviceKeyRow>(
            r#"
            SELECT device_id, org_id, public_key, created_at, updated_at
            FROM device_keys
            WHERE device_id = ?
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DeviceKey::from))
    }
}

/// A device public key registered by an agent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceKey {
    pub device_id: String,
    pub org_id: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct DeviceKeyRow {
    device_id: String,
    org_id: String,
    public_key: String,
    created_at: i64,
    updated_at: i64,
}

impl From<DeviceKeyRow> for DeviceKey {
    fn from(row: DeviceKeyRow) -> Self {
        Self {
            device_id: row.device_id,
            org_id: row.org_id,
            public_key: row.public_key,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

/// Whether an error is a unique-constraint violation, without matching on
/// message strings.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
