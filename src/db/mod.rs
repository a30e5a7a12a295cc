//! Database layer for sideload-dl
//!
//! Handles SQLite persistence for the install queue and runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`tasks`] — Install queue: ordering, status transitions, progress
//! - [`state`] — Runtime state (shutdown tracking)
//!
//! Every queue mutation runs inside a transaction while holding the in-process
//! write lock, so position arithmetic never interleaves.

use crate::types::{InstallTask, ReleaseId, Status};
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod state;
mod tasks;

/// Install task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Release identifier (primary key)
    pub release_id: String,
    /// Persisted status string
    pub status: String,
    /// Overall progress as a fraction (0.0-1.0)
    pub progress: f64,
    /// Bytes on disk, if known
    pub downloaded_bytes: Option<i64>,
    /// Total bytes to download, if known
    pub total_bytes: Option<i64>,
    /// Queue position (0 = next)
    pub queue_position: i64,
    /// Stop after extraction (0 = no, 1 = yes)
    pub download_only: i64,
    /// Error message if the task failed
    pub error_message: Option<String>,
    /// Creation time (ms since epoch)
    pub created_at: i64,
    /// Last write time (ms since epoch)
    pub last_updated_at: i64,
}

impl TaskRow {
    /// Decoded status (unknown strings become QUEUED)
    pub fn status(&self) -> Status {
        Status::from_db_str(&self.status)
    }
}

impl From<TaskRow> for InstallTask {
    fn from(row: TaskRow) -> Self {
        let status = row.status();
        InstallTask {
            release_id: ReleaseId(row.release_id),
            status,
            progress: (row.progress as f32).clamp(0.0, 1.0),
            downloaded_bytes: row.downloaded_bytes.map(|b| b.max(0) as u64),
            total_bytes: row.total_bytes.filter(|b| *b > 0).map(|b| b as u64),
            queue_position: row.queue_position,
            download_only: row.download_only != 0,
            error_message: row.error_message,
            created_at: millis_to_datetime(row.created_at),
            last_updated_at: millis_to_datetime(row.last_updated_at),
        }
    }
}

fn millis_to_datetime(ms: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Database handle for sideload-dl
pub struct Database {
    pool: SqlitePool,
    write_lock: tokio::sync::Mutex<()>,
}
