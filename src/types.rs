//! Core types for sideload-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a release (and for the install task driving it)
///
/// The identifier is the release name as it appears in the catalog.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(pub String);

impl ReleaseId {
    /// Create a new ReleaseId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the release name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase hex MD5 of the release name followed by a newline
    ///
    /// Names the release directory on the mirror and the per-release working
    /// directories on disk.
    pub fn hash(&self) -> String {
        format!("{:x}", md5::compute(format!("{}\n", self.0)))
    }
}

impl From<&str> for ReleaseId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ReleaseId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for ReleaseId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ReleaseId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ReleaseId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Install task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Waiting for the processor
    Queued,
    /// Fetching segments from the mirror
    Downloading,
    /// Merging parts and extracting artifacts
    Extracting,
    /// Placing expansion data in the shared storage root
    CopyingObb,
    /// Staging and handing the package to the installer
    Installing,
    /// Stopped by the user or by shutdown
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an unrecoverable error
    Failed,
}

impl Status {
    /// Persisted representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "QUEUED",
            Status::Downloading => "DOWNLOADING",
            Status::Extracting => "EXTRACTING",
            Status::CopyingObb => "COPYING_OBB",
            Status::Installing => "INSTALLING",
            Status::Paused => "PAUSED",
            Status::Completed => "COMPLETED",
            Status::Failed => "FAILED",
        }
    }

    /// Decode a persisted status string
    ///
    /// Unknown values decode to [`Status::Queued`] so the row is re-driven rather than
    /// lost.
    pub fn from_db_str(value: &str) -> Self {
        match value {
            "QUEUED" => Status::Queued,
            "DOWNLOADING" => Status::Downloading,
            "EXTRACTING" => Status::Extracting,
            "COPYING_OBB" => Status::CopyingObb,
            "INSTALLING" => Status::Installing,
            "PAUSED" => Status::Paused,
            "COMPLETED" => Status::Completed,
            "FAILED" => Status::Failed,
            other => {
                tracing::warn!(status = other, "unknown persisted status, treating as QUEUED");
                Status::Queued
            }
        }
    }

    /// COMPLETED or FAILED
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }

    /// A phase the processor is currently driving
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Status::Downloading | Status::Extracting | Status::CopyingObb | Status::Installing
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one install task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstallTask {
    /// Release the task installs
    pub release_id: ReleaseId,

    /// Current status
    pub status: Status,

    /// Overall progress (0.0 to 1.0)
    pub progress: f32,

    /// Bytes on disk for the current release, if known
    pub downloaded_bytes: Option<u64>,

    /// Total bytes to download, if known
    pub total_bytes: Option<u64>,

    /// Position in the queue (0 = next)
    pub queue_position: i64,

    /// Stop after extraction instead of installing
    pub download_only: bool,

    /// Reason for the last failure
    pub error_message: Option<String>,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// When the task was last written
    pub last_updated_at: DateTime<Utc>,
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task added (or re-added) to the queue
    Queued {
        /// Release ID
        id: ReleaseId,
        /// Position at which the task was placed
        position: i64,
    },

    /// Task removed from the queue
    Removed {
        /// Release ID
        id: ReleaseId,
    },

    /// Task entered a new status
    StatusChanged {
        /// Release ID
        id: ReleaseId,
        /// The new status
        status: Status,
    },

    /// Progress update
    Progress {
        /// Release ID
        id: ReleaseId,
        /// Overall progress (0.0 to 1.0)
        progress: f32,
        /// Bytes on disk
        #[serde(skip_serializing_if = "Option::is_none")]
        downloaded_bytes: Option<u64>,
        /// Total bytes to download
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
    },

    /// Task failed
    Failed {
        /// Release ID
        id: ReleaseId,
        /// Error message
        error: String,
        /// Machine-readable error code
        code: String,
    },

    /// Task completed
    Completed {
        /// Release ID
        id: ReleaseId,
    },

    /// Graceful shutdown initiated
    Shutdown,
}
