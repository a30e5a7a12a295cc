//! Shared test helpers for creating Sideloader instances in tests.

use crate::catalog::{CatalogEntry, StaticCatalog};
use crate::config::{Config, RetryConfig};
use crate::db::Database;
use crate::downloader::{QueueState, Sideloader, Transfer};
use crate::fetch::SegmentFetcher;
use crate::install::PackageInstaller;
use crate::mirror::MirrorClient;
use crate::types::ReleaseId;
use crate::wake_lock::{WakeLock, WakeLockBackend};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Package identifier used by the default catalog entries
pub(crate) const TEST_PACKAGE: &str = "com.example.game";

/// One recorded installer invocation
#[derive(Clone, Debug)]
pub(crate) struct InstallCall {
    pub staged_path: PathBuf,
    pub package_name: String,
    pub bytes: Vec<u8>,
}

/// Installer that records what it was handed
#[derive(Default)]
pub(crate) struct RecordingInstaller {
    pub calls: Mutex<Vec<InstallCall>>,
    pub fail_with: Mutex<Option<String>>,
}

impl RecordingInstaller {
    pub(crate) fn calls(&self) -> Vec<InstallCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PackageInstaller for RecordingInstaller {
    async fn install(&self, package_path: &Path, package_name: &str) -> crate::Result<()> {
        let bytes = tokio::fs::read(package_path).await?;
        self.calls.lock().unwrap().push(InstallCall {
            staged_path: package_path.to_path_buf(),
            package_name: package_name.to_string(),
            bytes,
        });
        if let Some(reason) = self.fail_with.lock().unwrap().clone() {
            return Err(crate::error::InstallError::InstallerFailed {
                package: package_name.to_string(),
                reason,
            }
            .into());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Wake lock backend counting platform calls
#[derive(Default)]
pub(crate) struct CountingWakeLock {
    pub acquired: AtomicU32,
    pub released: AtomicU32,
}

impl WakeLockBackend for CountingWakeLock {
    fn acquire(&self, _timeout: Duration) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A sideloader plus the collaborators tests inspect
pub(crate) struct TestSideloader {
    pub sideloader: Sideloader,
    pub catalog: Arc<StaticCatalog>,
    pub installer: Arc<RecordingInstaller>,
    pub wake_lock: Arc<CountingWakeLock>,
    pub temp_dir: tempfile::TempDir,
}

/// Configuration rooted in `root` with fast retries and timers
pub(crate) fn test_config(root: &Path, base_url: &str) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = root.join("test.db");
    config.download.download_dir = root.join("downloads");
    config.download.extract_dir = root.join("extract");
    config.download.progress_interval = Duration::from_millis(20);
    config.install.obb_root = root.join("obb");
    config.install.staging_dir = root.join("staging");
    config.install.cleanup_grace = Duration::from_millis(10);
    config.mirror.base_url = base_url.to_string();
    config.mirror.request_timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.disk_space.enabled = false;
    config.queue.idle_timeout = Duration::from_millis(50);
    config.queue.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Catalog entry for a test release
pub(crate) fn catalog_entry(name: &str) -> CatalogEntry {
    CatalogEntry {
        release_name: name.to_string(),
        package_name: TEST_PACKAGE.to_string(),
        declared_size: None,
        version_code: Some(1),
    }
}

/// Helper to create a test Sideloader with a persistent database and no running
/// processor. Releases named in `releases` are in the catalog.
pub(crate) async fn create_test_sideloader_with(
    base_url: &str,
    releases: &[&str],
    configure: impl FnOnce(&mut Config),
) -> TestSideloader {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path(), base_url);
    configure(&mut config);

    for dir in [
        &config.download.download_dir,
        &config.download.extract_dir,
        &config.install.staging_dir,
    ] {
        std::fs::create_dir_all(dir).unwrap();
    }

    let db = Database::new(&config.persistence.database_path)
        .await
        .unwrap();
    let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
    let (snapshot_tx, _snapshot_rx) = tokio::sync::watch::channel(Vec::new());

    let catalog = Arc::new(StaticCatalog::from_entries(
        releases.iter().map(|name| catalog_entry(name)),
    ));
    let installer = Arc::new(RecordingInstaller::default());
    let wake_backend = Arc::new(CountingWakeLock::default());

    let mirror = MirrorClient::new(&config.mirror, &config.retry).unwrap();
    let fetcher = SegmentFetcher::new(
        mirror.http().clone(),
        config.retry.clone(),
        config.download.buffer_size,
        config.mirror.request_timeout,
    );

    let sideloader = Sideloader {
        db: Arc::new(db),
        event_tx,
        snapshot_tx: Arc::new(snapshot_tx),
        wake_lock: WakeLock::new(wake_backend.clone(), config.wake_lock.timeout),
        config: Arc::new(config),
        catalog: catalog.clone(),
        installer: installer.clone(),
        transfer: Transfer { mirror, fetcher },
        queue_state: QueueState::new(),
    };

    TestSideloader {
        sideloader,
        catalog,
        installer,
        wake_lock: wake_backend,
        temp_dir,
    }
}

/// Test Sideloader for queue-only tests: the mirror is unreachable and the
/// processor is parked, so enqueued tasks stay QUEUED.
pub(crate) async fn create_test_sideloader() -> (Sideloader, tempfile::TempDir) {
    let harness = create_test_sideloader_with(
        "http://127.0.0.1:9/",
        &["Game A", "Game B", "Game C"],
        |_| {},
    )
    .await;
    park_processor(&harness.sideloader);
    (harness.sideloader, harness.temp_dir)
}

/// Make the sideloader believe a processor is running so none is spawned
pub(crate) fn park_processor(sideloader: &Sideloader) {
    sideloader
        .queue_state
        .processor_running
        .store(true, Ordering::SeqCst);
}

/// Wait until `id` reaches `status`, panicking after a few seconds
pub(crate) async fn wait_for_status(
    sideloader: &Sideloader,
    id: &ReleaseId,
    status: crate::types::Status,
) -> crate::types::InstallTask {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(task) = sideloader.get_task(id).await.unwrap()
            && task.status == status
        {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {} never reached {:?}: {:?}",
            id,
            status,
            sideloader.get_task(id).await.unwrap()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Write an APK whose manifest declares `package` in binary (UTF-16LE) form
pub(crate) fn write_apk(path: &Path, package: &str) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    let mut manifest = b"\x03\x00\x08\x00".to_vec();
    manifest.extend(package.encode_utf16().flat_map(|u| u.to_le_bytes()));
    writer.start_file("AndroidManifest.xml", options).unwrap();
    writer.write_all(&manifest).unwrap();
    writer.start_file("classes.dex", options).unwrap();
    writer.write_all(b"dex\n035").unwrap();
    writer.finish().unwrap();
}

/// Build a 7z holding `game.apk`, `main.1.<package>.obb` and a readme; returns its bytes
pub(crate) fn build_release_archive(work: &Path, package: &str) -> Vec<u8> {
    let source = work.join("release-src");
    std::fs::create_dir_all(&source).unwrap();
    write_apk(&source.join("game.apk"), package);
    std::fs::write(
        source.join(format!("main.1.{}.obb", package)),
        vec![7u8; 4096],
    )
    .unwrap();
    std::fs::write(source.join("readme.txt"), b"not installed").unwrap();

    let archive = work.join("release.7z");
    sevenz_rust::compress_to_path(&source, &archive).unwrap();
    std::fs::read(&archive).unwrap()
}

/// Mirror directory path for a release
pub(crate) fn release_dir(name: &str) -> String {
    format!("/{}/", ReleaseId::new(name).hash())
}

/// Serve a release directory: listing, HEAD sizes, and full-body GETs
pub(crate) async fn mount_release(server: &MockServer, name: &str, files: &[(&str, Vec<u8>)]) {
    let dir = release_dir(name);
    let mut html = String::from("<html><body><pre><a href=\"../\">../</a>\n");
    for (file, _) in files {
        html.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            urlencoding::encode(file),
            file
        ));
    }
    html.push_str("</pre></body></html>");

    Mock::given(method("GET"))
        .and(path(dir.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;

    for (file, bytes) in files {
        let file_path = format!("{}{}", dir, urlencoding::encode(file));
        Mock::given(method("HEAD"))
            .and(path(file_path.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(file_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
            .mount(server)
            .await;
    }
}
