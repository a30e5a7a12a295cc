//! Error types for sideload-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Download, Extract, Install, Database)
//! - Failure classification ([`FailureKind`]) deciding how the queue reacts
//! - Machine-readable error codes surfaced alongside failed tasks

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sideload-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sideload-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "mirror.base_url")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Download-related error (catalog, mirror, segment transfer)
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Archive assembly or extraction error
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// Artifact placement, staging or platform install error
    #[error("install error: {0}")]
    Install(#[from] InstallError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Unexpected HTTP status from the mirror
    #[error("HTTP {status} from {url}")]
    Http {
        /// Status code returned by the mirror
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Task not found in the queue
    #[error("task not found: {0}")]
    NotFound(String),

    /// Operation was cancelled (pause or shutdown)
    #[error("operation cancelled")]
    Cancelled,

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the operation
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// External tool execution failed (adb)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Download-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Release identifier has no catalog entry
    #[error("release {release} is not in the catalog")]
    ReleaseNotInCatalog {
        /// The release that was looked up
        release: String,
    },

    /// Mirror has no directory for the release
    #[error("mirror has no directory for release {release} ({url})")]
    MirrorNotFound {
        /// The release that was looked up
        release: String,
        /// The directory URL that returned not-found
        url: String,
    },

    /// Directory listing contained nothing installable
    #[error("no downloadable artifacts found for release {release}")]
    NoArtifacts {
        /// The release whose listing was empty
        release: String,
    },

    /// Local segment disagrees with the server's declared size and could not be healed
    #[error(
        "segment {segment} is corrupt (local {local} bytes, server declares {declared:?}) after {attempts} repair attempts"
    )]
    CorruptSegment {
        /// Remote segment name
        segment: String,
        /// Size of the local file when the mismatch was detected
        local: u64,
        /// Total declared by the server, if any
        declared: Option<u64>,
        /// Number of delete-and-restart attempts made
        attempts: u32,
    },

    /// Transfer ended before the declared content length
    #[error("segment {segment} truncated: expected {expected} bytes, received {received}")]
    Truncated {
        /// Remote segment name
        segment: String,
        /// Bytes announced by Content-Length
        expected: u64,
        /// Bytes actually received
        received: u64,
    },

    /// Server sent nothing for longer than the read timeout
    #[error("segment {segment} stalled: no data for {idle:?}")]
    Stalled {
        /// Remote segment name
        segment: String,
        /// How long the transfer sat idle
        idle: std::time::Duration,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The release whose task is in an invalid state for the operation
        id: String,
        /// The operation that was attempted (e.g., "pause", "resume", "retry")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },
}

/// Archive assembly and extraction errors
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Archive extraction failed
    #[error("extraction failed for {archive}: {reason}")]
    ExtractionFailed {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// Wrong password for encrypted archive
    #[error("wrong password for encrypted archive {archive}")]
    WrongPassword {
        /// The encrypted archive that could not be opened
        archive: PathBuf,
    },

    /// Multi-part archive is missing a part
    #[error("archive part missing: {path}")]
    MissingPart {
        /// Expected local path of the part
        path: PathBuf,
    },

    /// Archive contained no package or expansion files
    #[error("archive {archive} contains no installable entries")]
    NoInstallableEntries {
        /// The archive that was scanned
        archive: PathBuf,
    },

    /// Entry would be written outside the extraction directory
    #[error("entry {entry} escapes the extraction directory")]
    PathTraversal {
        /// Entry name as stored in the archive
        entry: String,
    },
}

/// Artifact placement and installation errors
#[derive(Debug, Error)]
pub enum InstallError {
    /// No executable package in the extraction directory
    #[error("no package found in {dir}")]
    NoPackage {
        /// Directory that was searched
        dir: PathBuf,
    },

    /// Staged package is empty
    #[error("staged package {path} is empty")]
    EmptyPackage {
        /// Path of the staged package
        path: PathBuf,
    },

    /// Staged package is not a structurally valid package
    #[error("invalid package {path}: {reason}")]
    InvalidPackage {
        /// Path of the staged package
        path: PathBuf,
        /// Why parsing failed
        reason: String,
    },

    /// Staged package does not carry the expected identifier
    #[error("package {path} does not declare identifier {expected}")]
    PackageMismatch {
        /// Path of the staged package
        path: PathBuf,
        /// Identifier the catalog expects
        expected: String,
    },

    /// File move failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path of the file being moved
        source_path: PathBuf,
        /// The destination path where the file should be moved
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// Platform installer rejected the package
    #[error("installer failed for {package}: {reason}")]
    InstallerFailed {
        /// Target package identifier
        package: String,
        /// Installer output or reason
        reason: String,
    },
}

/// How the queue reacts to an error
///
/// Errors are classified where they occur; the queue processor only reads the
/// classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Fail immediately without consuming retry budget
    NonRetryable,
    /// Transient; retried with exponential backoff
    Retryable,
    /// Local data disagrees with the server; healed by restarting the segment
    Corruption,
    /// User pause or shutdown; the task becomes PAUSED
    Cancellation,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Cancelled => FailureKind::Cancellation,

            Error::Network(e) => {
                if e.is_builder() || e.is_redirect() {
                    FailureKind::NonRetryable
                } else {
                    FailureKind::Retryable
                }
            }
            Error::Http { status, .. } => match *status {
                408 | 429 | 500..=599 => FailureKind::Retryable,
                _ => FailureKind::NonRetryable,
            },
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::Interrupted => FailureKind::Retryable,
                _ => FailureKind::NonRetryable,
            },

            Error::Download(DownloadError::Truncated { .. })
            | Error::Download(DownloadError::Stalled { .. }) => FailureKind::Retryable,
            Error::Download(DownloadError::CorruptSegment { .. }) => FailureKind::Corruption,
            Error::Download(_) => FailureKind::NonRetryable,

            Error::Extract(_) => FailureKind::NonRetryable,
            Error::Install(_) => FailureKind::NonRetryable,
            Error::InsufficientSpace { .. } => FailureKind::NonRetryable,
            Error::DiskSpaceCheckFailed(_) => FailureKind::NonRetryable,
            Error::Config { .. } => FailureKind::NonRetryable,
            Error::Database(_) | Error::Sqlx(_) => FailureKind::NonRetryable,
            Error::NotFound(_) => FailureKind::NonRetryable,
            Error::ShuttingDown => FailureKind::NonRetryable,
            Error::ExternalTool(_) => FailureKind::NonRetryable,
            Error::Serialization(_) => FailureKind::NonRetryable,
            Error::Other(_) => FailureKind::NonRetryable,
        }
    }

    /// True when this error is a user-initiated stop rather than a failure
    pub fn is_cancelled(&self) -> bool {
        self.kind() == FailureKind::Cancellation
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Download(e) => match e {
                DownloadError::ReleaseNotInCatalog { .. } => "release_not_in_catalog",
                DownloadError::MirrorNotFound { .. } => "mirror_not_found",
                DownloadError::NoArtifacts { .. } => "no_artifacts",
                DownloadError::CorruptSegment { .. } => "corrupt_segment",
                DownloadError::Truncated { .. } => "truncated_transfer",
                DownloadError::Stalled { .. } => "stalled_transfer",
                DownloadError::InvalidState { .. } => "invalid_state",
            },
            Error::Extract(e) => match e {
                ExtractError::ExtractionFailed { .. } => "extraction_failed",
                ExtractError::WrongPassword { .. } => "wrong_password",
                ExtractError::MissingPart { .. } => "missing_part",
                ExtractError::NoInstallableEntries { .. } => "no_installable_entries",
                ExtractError::PathTraversal { .. } => "path_traversal",
            },
            Error::Install(e) => match e {
                InstallError::NoPackage { .. } => "no_package",
                InstallError::EmptyPackage { .. } => "empty_package",
                InstallError::InvalidPackage { .. } => "invalid_package",
                InstallError::PackageMismatch { .. } => "package_mismatch",
                InstallError::MoveFailed { .. } => "move_failed",
                InstallError::InstallerFailed { .. } => "installer_failed",
            },
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Http { .. } => "http_error",
            Error::NotFound(_) => "not_found",
            Error::Cancelled => "cancelled",
            Error::ShuttingDown => "shutting_down",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::DiskSpaceCheckFailed(_) => "disk_space_check_failed",
            Error::ExternalTool(_) => "external_tool_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}
