//! Install task context — shared state for one run of one task.

use crate::catalog::CatalogEntry;
use crate::error::{Error, ExtractError, Result};
use crate::mirror::Segment;
use crate::types::{Event, InstallTask, ReleaseId, Status};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::super::Sideloader;
use super::progress::ProgressTracker;

/// Shared context for a single install task, reducing parameter passing between phases.
pub(crate) struct TaskContext {
    pub(crate) id: ReleaseId,
    pub(crate) task: InstallTask,
    pub(crate) entry: CatalogEntry,
    pub(crate) sideloader: Sideloader,
    pub(crate) cancel: CancellationToken,
    pub(crate) progress: Arc<ProgressTracker>,
    /// `<download_root>/<release-hash>/`
    pub(crate) download_dir: PathBuf,
    /// `<extract_root>/<release-hash>/`
    pub(crate) extract_dir: PathBuf,
}

impl TaskContext {
    pub(super) fn new(
        sideloader: &Sideloader,
        task: InstallTask,
        entry: CatalogEntry,
        cancel: CancellationToken,
    ) -> Self {
        let id = task.release_id.clone();
        let config = &sideloader.config;
        let progress = Arc::new(ProgressTracker::new(
            id.clone(),
            Arc::clone(&sideloader.db),
            sideloader.event_tx.clone(),
            task.progress,
        ));

        Self {
            download_dir: crate::recovery::download_dir(&config.download.download_dir, &id),
            extract_dir: crate::recovery::extraction_dir(&config.download.extract_dir, &id),
            id,
            task,
            entry,
            sideloader: sideloader.clone(),
            cancel,
            progress,
        }
    }

    /// Downloads outlive the task: download-only mode or `install.keep_downloads`
    pub(super) fn retained(&self) -> bool {
        self.task.download_only || self.sideloader.config.install.keep_downloads
    }

    pub(super) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Record and announce a phase transition
    pub(super) async fn enter_phase(&self, status: Status) -> Result<()> {
        self.check_cancelled()?;
        self.sideloader.db.set_status(&self.id, status).await?;
        tracing::info!(release = %self.id, %status, "Phase entered");
        self.sideloader.emit_event(Event::StatusChanged {
            id: self.id.clone(),
            status,
        });
        self.sideloader.publish_snapshot().await;
        Ok(())
    }

    /// Local path of a remote segment inside the release's download directory
    pub(super) fn segment_path(&self, segment: &Segment) -> Result<PathBuf> {
        crate::utils::safe_join(&self.download_dir, &segment.name).ok_or_else(|| {
            Error::Extract(ExtractError::PathTraversal {
                entry: segment.name.clone(),
            })
        })
    }
}
