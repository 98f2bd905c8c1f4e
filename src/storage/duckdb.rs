use super::traits::{rank_windows, SearchFilter, StorageError, WindowStore};
use crate::window::event::{RawEvent, StreamKey};
use crate::window::types::{EmbeddedWindow, ScoredWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::types::Value;
use duckdb::{Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const SELECT_COLUMNS: &str = "window_id, stream_key, partition_id, epoch_us(start_time), epoch_us(end_time), \
     event_count, context_text, embedding, raw_events";

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Pull the holder PID out of a DuckDB "Could not set lock" message
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

fn remove_wal_file(db_path: &Path) -> std::io::Result<()> {
    let wal_path = PathBuf::from(format!("{}.wal", db_path.display()));
    if wal_path.exists() {
        std::fs::remove_file(&wal_path)?;
        tracing::info!(path = %wal_path.display(), "Removed stale WAL file");
    }
    Ok(())
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn conversion_error(column: usize, ty: duckdb::types::Type, msg: &str) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(
        column,
        ty,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())),
    )
}

fn micros_to_datetime(column: usize, micros: i64) -> Result<DateTime<Utc>, duckdb::Error> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| conversion_error(column, duckdb::types::Type::BigInt, "invalid timestamp"))
}

/// Decode a row selected with [`SELECT_COLUMNS`]
fn window_from_row(row: &Row<'_>) -> Result<EmbeddedWindow, duckdb::Error> {
    let raw_events = match row.get::<_, Option<String>>(8)? {
        Some(text) => Some(serde_json::from_str::<Vec<RawEvent>>(&text).map_err(|e| {
            duckdb::Error::FromSqlConversionFailure(8, duckdb::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };

    Ok(EmbeddedWindow {
        window_id: row.get(0)?,
        stream_key: StreamKey::from(row.get::<_, String>(1)?),
        partition: row.get(2)?,
        start_time: micros_to_datetime(3, row.get(3)?)?,
        end_time: micros_to_datetime(4, row.get(4)?)?,
        event_count: row.get::<_, i64>(5)? as usize,
        context_text: row.get(6)?,
        embedding: decode_embedding(&row.get::<_, Vec<u8>>(7)?),
        raw_events,
    })
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

/// DuckDB-backed window store. Similarity ranking runs in process over the
/// rows that pass the scalar filters.
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    /// Open (or create) a database file, recovering from a lock left behind
    /// by a process that no longer exists.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Database(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let err = match Connection::open(path) {
            Ok(conn) => {
                return Ok(Self {
                    conn: Arc::new(Mutex::new(conn)),
                })
            }
            Err(e) => e,
        };

        let error_msg = err.to_string();
        if !error_msg.contains("Could not set lock") {
            return Err(err.into());
        }
        tracing::warn!(error = %error_msg, "Database lock detected");

        let Some(pid) = extract_pid_from_lock_error(&error_msg) else {
            return Err(err.into());
        };
        if is_process_running(pid) {
            tracing::error!(pid = pid, "Database is locked by a running process");
            return Err(err.into());
        }

        tracing::warn!(pid = pid, "Lock holder is gone, retrying open");
        if let Err(io_err) = remove_wal_file(path) {
            tracing::error!(error = %io_err, "Failed to remove WAL file");
            return Err(err.into());
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl WindowStore for DuckDbStore {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS windows (
                    window_id VARCHAR PRIMARY KEY,
                    stream_key VARCHAR NOT NULL,
                    partition_id INTEGER NOT NULL,
                    start_time TIMESTAMPTZ NOT NULL,
                    end_time TIMESTAMPTZ NOT NULL,
                    event_count BIGINT NOT NULL,
                    context_text VARCHAR NOT NULL,
                    embedding BLOB NOT NULL,
                    raw_events VARCHAR
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_windows_stream ON windows(stream_key)",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_windows_start ON windows(start_time)",
                [],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn upsert_window(&self, window: &EmbeddedWindow) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let window = window.clone();

        tokio::task::spawn_blocking(move || {
            let raw_events = window
                .raw_events
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let conn = lock(&conn)?;

            conn.execute(
                "INSERT OR REPLACE INTO windows
                    (window_id, stream_key, partition_id, start_time, end_time, event_count, context_text, embedding, raw_events)
                 VALUES (?, ?, ?, to_timestamp(? / 1000000.0), to_timestamp(? / 1000000.0), ?, ?, ?, ?)",
                duckdb::params![
                    window.window_id,
                    window.stream_key.as_str(),
                    window.partition,
                    window.start_time.timestamp_micros(),
                    window.end_time.timestamp_micros(),
                    window.event_count as i64,
                    window.context_text,
                    encode_embedding(&window.embedding),
                    raw_events,
                ],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn get_window(&self, window_id: &str) -> Result<Option<EmbeddedWindow>, StorageError> {
        let conn = self.conn.clone();
        let window_id = window_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM windows WHERE window_id = ?",
                SELECT_COLUMNS
            ))?;

            let mut rows = stmt.query(duckdb::params![window_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(window_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn search_similar(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredWindow>, StorageError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.clone();
        let query = query.to_vec();
        let filter = filter.clone();

        tokio::task::spawn_blocking(move || {
            let mut clauses = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(key) = &filter.stream_key {
                clauses.push("stream_key = ?");
                values.push(Value::Text(key.to_string()));
            }
            if let Some(partition) = filter.partition {
                clauses.push("partition_id = ?");
                values.push(Value::Int(partition));
            }
            if let Some(after) = filter.start_after {
                clauses.push("start_time >= to_timestamp(? / 1000000.0)");
                values.push(Value::BigInt(after.timestamp_micros()));
            }
            if let Some(before) = filter.end_before {
                clauses.push("end_time <= to_timestamp(? / 1000000.0)");
                values.push(Value::BigInt(before.timestamp_micros()));
            }

            let mut sql = format!("SELECT {} FROM windows", SELECT_COLUMNS);
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }

            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(duckdb::params_from_iter(values), window_from_row)?;

            let mut candidates = Vec::new();
            for row in rows {
                candidates.push(row?);
            }
            rank_windows(&query, candidates, k)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn count_windows(&self) -> Result<u64, StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM windows", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }
}
