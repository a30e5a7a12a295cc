//! Test configuration helpers for creating test sideloaders

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use sideload_dl::config::RetryConfig;
use sideload_dl::{
    CatalogEntry, Collaborators, Config, PackageInstaller, Sideloader, StaticCatalog,
    WakeLockBackend,
};
use tempfile::TempDir;

/// Package identifier used by fixture releases
pub const TEST_PACKAGE: &str = "com.example.game";

/// Installer that records the packages it was handed
#[derive(Default)]
pub struct RecordingInstaller {
    installed: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingInstaller {
    /// Package names and bytes, in install order
    pub fn installed(&self) -> Vec<(String, Vec<u8>)> {
        self.installed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PackageInstaller for RecordingInstaller {
    async fn install(&self, package_path: &Path, package_name: &str) -> sideload_dl::Result<()> {
        let bytes = tokio::fs::read(package_path).await?;
        self.installed
            .lock()
            .unwrap()
            .push((package_name.to_string(), bytes));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Wake lock backend counting platform calls
#[derive(Default)]
pub struct CountingWakeLock {
    /// Platform acquisitions
    pub acquired: AtomicU32,
    /// Platform releases
    pub released: AtomicU32,
}

impl CountingWakeLock {
    /// Whether every acquisition was released
    pub fn balanced(&self) -> bool {
        self.acquired.load(Ordering::SeqCst) == self.released.load(Ordering::SeqCst)
    }
}

impl WakeLockBackend for CountingWakeLock {
    fn acquire(&self, _timeout: Duration) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything a test needs to drive and inspect a sideloader
pub struct TestHarness {
    /// The instance under test
    pub sideloader: Sideloader,
    /// Installer collaborator
    pub installer: Arc<RecordingInstaller>,
    /// Wake lock collaborator
    pub wake_lock: Arc<CountingWakeLock>,
    /// Configuration the instance was built from
    pub config: Config,
    /// Root of every working directory
    pub temp_dir: TempDir,
}

/// Configuration rooted in `root`, pointed at `base_url`, with fast timers
pub fn test_config(root: &Path, base_url: &str) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = root.join("sideload.db");
    config.download.download_dir = root.join("downloads");
    config.download.extract_dir = root.join("extract");
    config.download.progress_interval = Duration::from_millis(20);
    config.install.obb_root = root.join("obb");
    config.install.staging_dir = root.join("staging");
    config.install.cleanup_grace = Duration::from_millis(10);
    config.mirror.base_url = base_url.to_string();
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.disk_space.enabled = false;
    config.queue.idle_timeout = Duration::from_millis(100);
    config
}

/// Catalog entry for a fixture release
pub fn catalog_entry(name: &str) -> CatalogEntry {
    CatalogEntry {
        release_name: name.to_string(),
        package_name: TEST_PACKAGE.to_string(),
        declared_size: None,
        version_code: Some(1),
    }
}

/// Build a sideloader through the public constructor
pub async fn create_harness(base_url: &str, releases: &[&str]) -> TestHarness {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path(), base_url);
    create_harness_in(temp_dir, config, releases).await
}

/// Build a sideloader from an existing directory and configuration
pub async fn create_harness_in(temp_dir: TempDir, config: Config, releases: &[&str]) -> TestHarness {
    let catalog = Arc::new(StaticCatalog::from_entries(
        releases.iter().map(|name| catalog_entry(name)),
    ));
    let installer = Arc::new(RecordingInstaller::default());
    let wake_lock = Arc::new(CountingWakeLock::default());

    let sideloader = Sideloader::new(
        config.clone(),
        Collaborators {
            catalog,
            installer: installer.clone(),
            wake_lock: wake_lock.clone(),
        },
    )
    .await
    .unwrap();

    TestHarness {
        sideloader,
        installer,
        wake_lock,
        config,
        temp_dir,
    }
}
