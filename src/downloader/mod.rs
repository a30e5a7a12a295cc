//! Core sideloader implementation split into focused submodules.
//!
//! The `Sideloader` struct and its methods are organized by domain:
//! - [`queue`] - Enqueue, promote, retry and inspection of the install queue
//! - [`control`] - Task lifecycle control (pause/resume/cancel)
//! - [`lifecycle`] - Startup restore and shutdown coordination
//! - [`queue_processor`] - Single-flight processor loop
//! - [`pipeline`] - Per-task phase orchestration and progress reporting

mod control;
mod lifecycle;
mod pipeline;
mod queue;
mod queue_processor;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::fetch::SegmentFetcher;
use crate::install::{PackageInstaller, installer_from_config};
use crate::mirror::MirrorClient;
use crate::types::{Event, InstallTask, ReleaseId};
use crate::wake_lock::{NoopWakeLock, WakeLock, WakeLockBackend};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio_util::sync::CancellationToken;

/// Bookkeeping for the task the processor is currently driving
#[derive(Clone, Debug)]
pub(crate) struct ActiveTask {
    /// Token observed by every phase of the task
    pub(crate) token: CancellationToken,
    /// A resume arrived while the pause was propagating: finish as QUEUED
    pub(crate) requeue_on_pause: bool,
    /// The task was cancelled: its row and files are gone, record nothing
    pub(crate) discard: bool,
}

impl ActiveTask {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            requeue_on_pause: false,
            discard: false,
        }
    }
}

/// Queue and processor state management
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Active tasks keyed by release (at most one entry); claims happen under this lock
    pub(crate) active_tasks: Arc<tokio::sync::Mutex<HashMap<ReleaseId, ActiveTask>>>,
    /// Flag to indicate whether new work is accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Wakes an idle processor
    pub(crate) wake: Arc<tokio::sync::Notify>,
    /// Set while a processor loop is alive
    pub(crate) processor_running: Arc<AtomicBool>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            active_tasks: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
            wake: Arc::new(tokio::sync::Notify::new()),
            processor_running: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Collaborators supplied by the host application
#[derive(Clone)]
pub struct Collaborators {
    /// Release lookup
    pub catalog: Arc<dyn Catalog>,
    /// Platform package installer
    pub installer: Arc<dyn PackageInstaller>,
    /// Platform wake lock
    pub wake_lock: Arc<dyn WakeLockBackend>,
}

impl Collaborators {
    /// Catalog only; the installer comes from configuration and no wake lock is taken
    pub fn with_catalog(catalog: Arc<dyn Catalog>, config: &Config) -> Self {
        Self {
            catalog,
            installer: installer_from_config(&config.install),
            wake_lock: Arc::new(NoopWakeLock),
        }
    }
}

/// Network side of the pipeline
#[derive(Clone)]
pub(crate) struct Transfer {
    /// Directory listing and sizing
    pub(crate) mirror: MirrorClient,
    /// Range-resume segment downloads
    pub(crate) fetcher: SegmentFetcher,
}

/// Main sideloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Sideloader {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to query task status
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Latest ordered queue snapshot
    pub(crate) snapshot_tx: Arc<tokio::sync::watch::Sender<Vec<InstallTask>>>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Release lookup
    pub(crate) catalog: Arc<dyn Catalog>,
    /// Platform package installer
    pub(crate) installer: Arc<dyn PackageInstaller>,
    /// Counted wake lock held around extraction
    pub(crate) wake_lock: WakeLock,
    /// Mirror and fetcher
    pub(crate) transfer: Transfer,
    /// Queue and processor state management
    pub(crate) queue_state: QueueState,
}

impl Sideloader {
    /// Create a new Sideloader instance
    ///
    /// This initializes all core components:
    /// - Creates the working directories
    /// - Opens/creates the SQLite database and runs migrations
    /// - Sets up the event broadcast channel and the queue snapshot channel
    /// - Restores tasks interrupted by a previous process and starts the
    ///   processor if QUEUED work exists
    pub async fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        for (label, dir) in [
            ("download", &config.download.download_dir),
            ("extraction", &config.download.extract_dir),
            ("staging", &config.install.staging_dir),
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create {} directory '{}': {}",
                        label,
                        dir.display(),
                        e
                    ),
                ))
            })?;
        }

        let db = Database::new(&config.persistence.database_path).await?;
        let unclean = db.was_unclean_shutdown().await?;

        // Mark that we're starting up (for unclean shutdown detection)
        db.set_clean_start().await?;

        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
        let (snapshot_tx, _snapshot_rx) = tokio::sync::watch::channel(Vec::new());

        let mirror = MirrorClient::new(&config.mirror, &config.retry)?;
        let fetcher = SegmentFetcher::new(
            mirror.http().clone(),
            config.retry.clone(),
            config.download.buffer_size,
            config.mirror.request_timeout,
        );

        tracing::info!(
            installer = collaborators.installer.name(),
            mirror = %config.mirror.base_url,
            "Sideloader initialized"
        );

        let wake_lock = WakeLock::new(collaborators.wake_lock, config.wake_lock.timeout);

        let sideloader = Self {
            db: Arc::new(db),
            event_tx,
            snapshot_tx: Arc::new(snapshot_tx),
            config: Arc::new(config),
            catalog: collaborators.catalog,
            installer: collaborators.installer,
            wake_lock,
            transfer: Transfer { mirror, fetcher },
            queue_state: QueueState::new(),
        };

        sideloader.restore_queue(unclean).await?;
        Ok(sideloader)
    }

    /// Subscribe to task events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Stream of ordered queue snapshots
    ///
    /// The stream yields the current snapshot immediately, then a new one after
    /// every queue mutation. Intermediate snapshots may be skipped if the consumer
    /// is slow; the latest is never lost.
    pub fn watch_queue(&self) -> tokio_stream::wrappers::WatchStream<Vec<InstallTask>> {
        tokio_stream::wrappers::WatchStream::new(self.snapshot_tx.subscribe())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Re-read the queue and publish it to snapshot watchers
    pub(crate) async fn publish_snapshot(&self) {
        match self.db.list_tasks().await {
            Ok(tasks) => {
                self.snapshot_tx.send_replace(tasks);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read queue for snapshot");
            }
        }
    }

    /// Remove a release's working files: downloads, extracted artifacts, marker and
    /// staged package
    pub(crate) async fn remove_working_files(&self, id: &ReleaseId) {
        let download = crate::recovery::download_dir(&self.config.download.download_dir, id);
        let extract = crate::recovery::extraction_dir(&self.config.download.extract_dir, id);
        let marker = crate::recovery::marker_path(&self.config.download.extract_dir, id);

        let mut paths = vec![download, extract, marker];
        if let Some(entry) = self.catalog.lookup(id) {
            paths.push(crate::install::staged_package_path(
                &self.config.install.staging_dir,
                &entry.package_name,
                &id.hash(),
            ));
        }

        for path in paths {
            if let Err(e) = crate::utils::remove_path(&path).await {
                tracing::warn!(release = %id, ?path, error = %e, "Failed to remove working files");
            }
        }
    }
}
