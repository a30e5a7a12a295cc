//! Configuration types for sideload-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (directories, buffering, progress cadence)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root for per-release download directories (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Root for per-release extraction directories and markers (default: "./extract")
    #[serde(default = "default_extract_dir")]
    pub extract_dir: PathBuf,

    /// Write buffer used by the segment fetcher and the assembler (default: 64 KiB)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Minimum interval between persisted progress writes (default: 500 ms)
    #[serde(default = "default_progress_interval", with = "duration_millis_serde")]
    pub progress_interval: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            extract_dir: default_extract_dir(),
            buffer_size: default_buffer_size(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// Mirror connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Base URL of the mirror; release directories live directly beneath it
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User-Agent sent on every request (the mirror rejects unknown agents)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Password of the encrypted release archives
    #[serde(default)]
    pub archive_password: Option<String>,

    /// Try the empty password when the configured one fails (default: true)
    #[serde(default = "default_true")]
    pub try_empty_password: bool,

    /// Per-request timeout for listing and HEAD requests (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum concurrent HEAD requests while sizing segments (default: 5)
    #[serde(default = "default_max_concurrent_heads")]
    pub max_concurrent_heads: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            archive_password: None,
            try_empty_password: true,
            request_timeout: default_request_timeout(),
            max_concurrent_heads: default_max_concurrent_heads(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Disk space checking configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Headroom added on top of the estimate (default: 0)
    #[serde(default)]
    pub min_free_space: u64,

    /// Estimate used when no segment size is known (default: 4 GiB)
    #[serde(default = "default_unknown_size_fallback")]
    pub unknown_size_fallback: u64,

    /// Multiplier for encrypted archives whose downloads are retained (default: 3.5)
    #[serde(default = "default_retained_multiplier")]
    pub retained_archive_multiplier: f64,

    /// Multiplier for encrypted archives whose downloads are deleted (default: 2.5)
    #[serde(default = "default_archive_multiplier")]
    pub archive_multiplier: f64,

    /// Multiplier for releases shipped uncompressed (default: 1.1)
    #[serde(default = "default_uncompressed_multiplier")]
    pub uncompressed_multiplier: f64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_free_space: 0,
            unknown_size_fallback: default_unknown_size_fallback(),
            retained_archive_multiplier: default_retained_multiplier(),
            archive_multiplier: default_archive_multiplier(),
            uncompressed_multiplier: default_uncompressed_multiplier(),
        }
    }
}

/// Artifact placement and installation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Shared expansion-data root; files land in `<obb_root>/<package>/` (default: "./obb")
    #[serde(default = "default_obb_root")]
    pub obb_root: PathBuf,

    /// Directory for staged packages handed to the installer (default: "./staging")
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Keep downloaded segments after a successful install (default: false)
    #[serde(default)]
    pub keep_downloads: bool,

    /// Delay before scratch files are removed after install (default: 2 seconds)
    #[serde(default = "default_cleanup_grace", with = "duration_serde")]
    pub cleanup_grace: Duration,

    /// Path to the adb executable (discovered on PATH if None)
    #[serde(default)]
    pub adb_path: Option<PathBuf>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            obb_root: default_obb_root(),
            staging_dir: default_staging_dir(),
            keep_downloads: false,
            cleanup_grace: default_cleanup_grace(),
            adb_path: None,
        }
    }
}

/// Wake lock settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WakeLockConfig {
    /// Hard timeout handed to the backend on acquire (default: 30 minutes)
    #[serde(default = "default_wake_lock_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for WakeLockConfig {
    fn default() -> Self {
        Self {
            timeout: default_wake_lock_timeout(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./sideload-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Queue processor settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long an idle processor waits for a wake before re-checking (default: 500 ms)
    #[serde(default = "default_idle_timeout", with = "duration_millis_serde")]
    pub idle_timeout: Duration,

    /// How long shutdown waits for the active task to stop (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Main configuration for [`Sideloader`](crate::Sideloader)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directories, buffering and progress cadence
    #[serde(default)]
    pub download: DownloadConfig,

    /// Mirror endpoint and request settings
    #[serde(default)]
    pub mirror: MirrorConfig,

    /// Backoff for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pre-flight free-space admission
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Artifact placement and installer settings
    #[serde(default)]
    pub install: InstallConfig,

    /// Wake lock timeout
    #[serde(default)]
    pub wake_lock: WakeLockConfig,

    /// Database location
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Processor idle and shutdown behavior
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.mirror.base_url.trim().is_empty() {
            return Err(crate::Error::Config {
                message: "mirror base URL must not be empty".to_string(),
                key: Some("mirror.base_url".to_string()),
            });
        }
        if url::Url::parse(&self.mirror.base_url).is_err() {
            return Err(crate::Error::Config {
                message: format!("invalid mirror base URL: {}", self.mirror.base_url),
                key: Some("mirror.base_url".to_string()),
            });
        }
        if self.download.buffer_size == 0 {
            return Err(crate::Error::Config {
                message: "buffer size must be greater than zero".to_string(),
                key: Some("download.buffer_size".to_string()),
            });
        }
        if self.download.progress_interval.is_zero() {
            return Err(crate::Error::Config {
                message: "progress interval must be greater than zero".to_string(),
                key: Some("download.progress_interval".to_string()),
            });
        }
        if self.queue.idle_timeout.is_zero() {
            return Err(crate::Error::Config {
                message: "queue idle timeout must be greater than zero".to_string(),
                key: Some("queue.idle_timeout".to_string()),
            });
        }
        if self.mirror.max_concurrent_heads == 0 {
            return Err(crate::Error::Config {
                message: "at least one concurrent HEAD request is required".to_string(),
                key: Some("mirror.max_concurrent_heads".to_string()),
            });
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_extract_dir() -> PathBuf {
    PathBuf::from("./extract")
}

fn default_buffer_size() -> usize {
    64 * 1024
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_base_url() -> String {
    "http://localhost/".to_string()
}

fn default_user_agent() -> String {
    format!("sideload-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_concurrent_heads() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_unknown_size_fallback() -> u64 {
    4 * 1024 * 1024 * 1024
}

fn default_retained_multiplier() -> f64 {
    3.5
}

fn default_archive_multiplier() -> f64 {
    2.5
}

fn default_uncompressed_multiplier() -> f64 {
    1.1
}

fn default_obb_root() -> PathBuf {
    PathBuf::from("./obb")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}

fn default_cleanup_grace() -> Duration {
    Duration::from_secs(2)
}

fn default_wake_lock_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./sideload-dl.db")
}

fn default_idle_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
