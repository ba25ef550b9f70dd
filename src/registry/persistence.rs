use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::registry::error::{RegistryError, RegistryResult};
use crate::registry::types::TransferRecord;

/// Durable backing for the registry. `save` replaces the stored sequence
/// wholesale, so applying the same state twice is a no-op.
#[async_trait]
pub trait RegistryPersistence: Send + Sync {
    /// Records in stored order (most recent first)
    async fn load(&self) -> RegistryResult<Vec<TransferRecord>>;

    async fn save(&self, records: &[TransferRecord]) -> RegistryResult<()>;

    async fn clear(&self) -> RegistryResult<()>;
}

/// SQLite-backed persistence; one row per record keyed by list position.
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Connect using a sqlx URL such as `sqlite::memory:` or `sqlite://history.db`.
    /// A missing database file is created.
    pub async fn new(db_url: &str) -> RegistryResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        // Each connection to `:memory:` is its own database
        let max_connections = if db_url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Open (creating if needed) a database file
    pub async fn open_file(path: &Path) -> RegistryResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// In-memory database (for testing)
    pub async fn new_in_memory() -> RegistryResult<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn with_pool(pool: SqlitePool) -> RegistryResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfer_history (
                position INTEGER PRIMARY KEY,
                transfer_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_type TEXT NOT NULL,
                completed_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                owner_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl RegistryPersistence for SqlitePersistence {
    async fn load(&self) -> RegistryResult<Vec<TransferRecord>> {
        let rows = sqlx::query("SELECT * FROM transfer_history ORDER BY position ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> RegistryResult<TransferRecord> {
                let position: i64 = row.try_get("position")?;
                let millis: i64 = row.try_get("completed_at")?;
                let size: i64 = row.try_get("size_bytes")?;
                let completed_at = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                    RegistryError::CorruptRecord {
                        position,
                        reason: format!("timestamp {millis} out of range"),
                    }
                })?;
                let size_bytes = u64::try_from(size).map_err(|_| RegistryError::CorruptRecord {
                    position,
                    reason: format!("negative size {size}"),
                })?;

                Ok(TransferRecord {
                    transfer_id: row.try_get("transfer_id")?,
                    file_name: row.try_get("file_name")?,
                    file_type: row.try_get("file_type")?,
                    completed_at,
                    size_bytes,
                    owner_id: row.try_get("owner_id")?,
                })
            })
            .collect()
    }

    async fn save(&self, records: &[TransferRecord]) -> RegistryResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM transfer_history")
            .execute(&mut *tx)
            .await?;

        for (position, record) in records.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO transfer_history
                (position, transfer_id, file_name, file_type, completed_at, size_bytes, owner_id)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(position as i64)
            .bind(&record.transfer_id)
            .bind(&record.file_name)
            .bind(&record.file_type)
            .bind(record.completed_at.timestamp_millis())
            .bind(record.size_bytes as i64)
            .bind(&record.owner_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self) -> RegistryResult<()> {
        sqlx::query("DELETE FROM transfer_history")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Persistence that lives only as long as the process, stored as JSON the
/// way a browser key-value store would hold it.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    stored: Arc<Mutex<Option<String>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored value, if anything has been saved
    pub fn raw(&self) -> Option<String> {
        self.stored.lock().clone()
    }
}

#[async_trait]
impl RegistryPersistence for MemoryPersistence {
    async fn load(&self) -> RegistryResult<Vec<TransferRecord>> {
        match self.stored.lock().as_deref() {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, records: &[TransferRecord]) -> RegistryResult<()> {
        let json = serde_json::to_string(records)?;
        *self.stored.lock() = Some(json);
        Ok(())
    }

    async fn clear(&self) -> RegistryResult<()> {
        *self.stored.lock() = None;
        Ok(())
    }
}
