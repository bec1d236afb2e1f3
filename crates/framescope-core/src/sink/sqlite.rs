use std::path::Path;

use log::info;
use serde::Serialize;
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use super::{FrameRecord, FrameSink, SinkError};

/// A row of the `frames` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StoredFrame {
    pub id: i64,
    pub captured_at: String,
    pub type_code: i64,
    pub payload_len: i64,
    pub payload: Vec<u8>,
    pub src: String,
    pub dst: String,
}

/// SQLite frame store; one row per frame, one transaction per write.
#[derive(Debug, Clone)]
pub struct SqliteFrameStore {
    pool: Pool<Sqlite>,
}

impl SqliteFrameStore {
    /// Open (creating if needed) the database at `path` and its schema.
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        // A single connection keeps writes strictly sequential.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS frames (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                captured_at TEXT NOT NULL,
                type_code INTEGER NOT NULL,
                payload_len INTEGER NOT NULL,
                payload BLOB NOT NULL,
                src TEXT NOT NULL,
                dst TEXT NOT NULL
            );",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_frames_type_code ON frames (type_code);")
            .execute(&pool)
            .await?;

        info!("frame store ready at {}", path.display());
        Ok(Self { pool })
    }

    /// Frames in insertion order, optionally restricted to one type code.
    pub async fn frames_by_type(
        &self,
        type_code: Option<u32>,
        limit: u32,
    ) -> Result<Vec<StoredFrame>, SinkError> {
        let rows = match type_code {
            Some(code) => {
                sqlx::query_as::<_, StoredFrame>(
                    "SELECT id, captured_at, type_code, payload_len, payload, src, dst
                     FROM frames WHERE type_code = ?1 ORDER BY id LIMIT ?2",
                )
                .bind(code as i64)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, StoredFrame>(
                    "SELECT id, captured_at, type_code, payload_len, payload, src, dst
                     FROM frames ORDER BY id LIMIT ?1",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64, SinkError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM frames")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl FrameSink for SqliteFrameStore {
    async fn write(&mut self, record: &FrameRecord) -> Result<(), SinkError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO frames (captured_at, type_code, payload_len, payload, src, dst)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(record.captured_at_rfc3339())
        .bind(record.frame.type_code as i64)
        .bind(record.frame.payload.len() as i64)
        .bind(record.frame.payload.as_slice())
        .bind(record.direction.src().to_string())
        .bind(record.direction.dst().to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        self.close().await;
        Ok(())
    }
}
