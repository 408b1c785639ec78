use std::collections::HashSet;
use std::path::{Path, PathBuf};

use finsync_core::{EntityKind, Record, ValidationError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{
    Row, SqliteConnection, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions,
};
use thiserror::Error;
use tracing::warn;

use super::queue::{OperationType, PendingSyncItem, QueueError, now_millis};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub const LAST_SYNC_KEY: &str = "last_sync";
pub const NETWORK_STATUS_KEY: &str = "network_status";
pub const SYNC_STATUS_KEY: &str = "sync_status";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("storage unavailable: migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("storage unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage unavailable: XDG data directory is unavailable")]
    MissingDataDir,
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
    #[error("invalid record: {0}")]
    Validation(#[from] ValidationError),
    #[error("duplicate id {id} in {key}")]
    DuplicateId { key: &'static str, id: String },
    #[error("invalid pending sync row: {0}")]
    InvalidRow(#[from] QueueError),
}

/// SQLite-backed key-value store for cached collections, the pending
/// operation queue and sync metadata.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        Self::open(&default_db_path()?).await
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row.try_get("value")?))
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_raw(&mut *conn, key, value).await
    }

    /// Reads a JSON value; a value that no longer parses reads as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key, error = %err, "ignoring malformed persisted value");
                Ok(None)
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set_raw(key, &raw).await
    }

    pub async fn remove_data(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Loads a cached collection. Missing or malformed collections read as
    /// empty; records that fail validation or repeat an id are dropped.
    pub async fn load<T: Record>(&self) -> Result<Vec<T>, StoreError> {
        let key = T::KIND.collection_key();
        let Some(values) = self.get_json::<Vec<Value>>(key).await? else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(values.len());
        for value in values {
            let record: T = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(err) => {
                    warn!(key, error = %err, "dropping unreadable cached record");
                    continue;
                }
            };
            if let Err(err) = record.validate() {
                warn!(key, id = record.id(), error = %err, "dropping invalid cached record");
                continue;
            }
            if !seen.insert(record.id().to_string()) {
                warn!(key, id = record.id(), "dropping duplicate cached record");
                continue;
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Overwrites a cached collection in one statement.
    pub async fn save<T: Record>(&self, items: &[T]) -> Result<(), StoreError> {
        let key = T::KIND.collection_key();
        let raw = encode_collection(key, items)?;
        self.set_raw(key, &raw).await
    }

    /// Replaces the record with the same id, or appends it.
    pub async fn upsert_record<T: Record>(&self, record: T) -> Result<bool, StoreError> {
        record.validate()?;
        let mut items = self.load::<T>().await?;
        let existed = match items.iter_mut().find(|item| item.id() == record.id()) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => {
                items.push(record);
                false
            }
        };
        self.save(&items).await?;
        Ok(existed)
    }

    pub async fn remove_record<T: Record>(&self, id: &str) -> Result<bool, StoreError> {
        let mut items = self.load::<T>().await?;
        let before = items.len();
        items.retain(|item| item.id() != id);
        if items.len() == before {
            return Ok(false);
        }
        self.save(&items).await?;
        Ok(true)
    }

    pub async fn add_to_pending_sync(&self, item: &PendingSyncItem) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_pending(&mut *conn, item).await
    }

    /// Overwrites a cached collection and queues `item` in one transaction,
    /// so the cache never holds a local change the queue does not know about.
    pub async fn commit_local_change<T: Record>(
        &self,
        items: &[T],
        item: &PendingSyncItem,
    ) -> Result<(), StoreError> {
        let key = T::KIND.collection_key();
        let raw = encode_collection(key, items)?;
        let mut tx = self.pool.begin().await?;
        write_raw(&mut *tx, key, &raw).await?;
        insert_pending(&mut *tx, item).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Whether any queued operation still targets this record.
    pub async fn has_pending_for(
        &self,
        kind: EntityKind,
        record_id: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM pending_sync WHERE entity = ?1 AND record_id = ?2) AS queued",
        )
        .bind(kind.as_str())
        .bind(record_id)
        .fetch_one(&self.pool)
        .await?;
        let queued: i64 = row.try_get("queued")?;
        Ok(queued != 0)
    }

    /// Pending items in insertion order.
    pub async fn get_pending_sync(&self) -> Result<Vec<PendingSyncItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, entity, op, record_id, data, timestamp, attempts, failed, last_error
             FROM pending_sync
             ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let entity: String = row.try_get("entity")?;
            let op: String = row.try_get("op")?;
            let data: Option<String> = row.try_get("data")?;
            let failed: i64 = row.try_get("failed")?;
            let data = match data.map(|raw| serde_json::from_str::<Value>(&raw)).transpose() {
                Ok(data) => data,
                Err(err) => {
                    warn!(id = %id, error = %err, "pending item payload is malformed");
                    None
                }
            };
            out.push(PendingSyncItem {
                id,
                entity: EntityKind::parse(&entity)?,
                op: OperationType::parse(&op)?,
                record_id: row.try_get("record_id")?,
                data,
                timestamp: row.try_get("timestamp")?,
                attempts: row.try_get("attempts")?,
                failed: failed != 0,
                last_error: row.try_get("last_error")?,
            });
        }
        Ok(out)
    }

    pub async fn remove_pending(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pending_sync WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_pending_failed(&self, id: &str, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE pending_sync
             SET failed = 1, attempts = attempts + 1, last_error = ?2
             WHERE id = ?1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn reset_failed_pending(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE pending_sync SET failed = 0, attempts = 0, last_error = NULL WHERE failed = 1",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Returns `(queued, flagged_failed)`.
    pub async fn pending_counts(&self) -> Result<(usize, usize), StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(SUM(failed), 0) AS failed FROM pending_sync",
        )
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        let failed: i64 = row.try_get("failed")?;
        Ok((total.max(0) as usize, failed.max(0) as usize))
    }

    pub async fn is_online(&self) -> Result<bool, StoreError> {
        Ok(self
            .get_json::<bool>(NETWORK_STATUS_KEY)
            .await?
            .unwrap_or(true))
    }

    pub async fn set_online(&self, online: bool) -> Result<(), StoreError> {
        self.set_json(NETWORK_STATUS_KEY, &online).await
    }

    pub async fn get_last_sync(&self) -> Result<Option<i64>, StoreError> {
        self.get_json::<i64>(LAST_SYNC_KEY).await
    }

    /// Never moves the stored timestamp backwards; returns the stored value.
    pub async fn set_last_sync(&self, timestamp: i64) -> Result<i64, StoreError> {
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = CASE
                    WHEN CAST(excluded.value AS INTEGER) > CAST(kv.value AS INTEGER)
                        THEN excluded.value
                    ELSE kv.value
                END,
                updated_at = excluded.updated_at",
        )
        .bind(LAST_SYNC_KEY)
        .bind(timestamp.to_string())
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(self.get_last_sync().await?.unwrap_or(timestamp))
    }

    /// Drops every cached collection, the queue and sync metadata.
    pub async fn clear_all_offline_data(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for kind in EntityKind::ALL {
            sqlx::query("DELETE FROM kv WHERE key = ?1")
                .bind(kind.collection_key())
                .execute(&mut *tx)
                .await?;
        }
        for key in [LAST_SYNC_KEY, SYNC_STATUS_KEY] {
            sqlx::query("DELETE FROM kv WHERE key = ?1")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM pending_sync")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn encode_collection<T: Record>(key: &'static str, items: &[T]) -> Result<String, StoreError> {
    let mut seen = HashSet::new();
    for item in items {
        item.validate()?;
        if !seen.insert(item.id()) {
            return Err(StoreError::DuplicateId {
                key,
                id: item.id().to_string(),
            });
        }
    }
    serde_json::to_string(items).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })
}

async fn write_raw(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(now_millis())
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_pending(
    conn: &mut SqliteConnection,
    item: &PendingSyncItem,
) -> Result<(), StoreError> {
    let data = item
        .data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|source| StoreError::Encode {
            key: item.id.clone(),
            source,
        })?;
    sqlx::query(
        "INSERT INTO pending_sync (id, entity, op, record_id, data, timestamp, attempts, failed, last_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&item.id)
    .bind(item.entity.as_str())
    .bind(item.op.as_str())
    .bind(&item.record_id)
    .bind(data)
    .bind(item.timestamp)
    .bind(item.attempts)
    .bind(if item.failed { 1 } else { 0 })
    .bind(&item.last_error)
    .execute(conn)
    .await?;
    Ok(())
}

pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("finsync");
    path.push("offline.db");
    Ok(path)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
