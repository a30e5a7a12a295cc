//! Install queue management: enqueue, ordering, retry and inspection.

use crate::error::{DownloadError, Error, Result};
use crate::types::{Event, InstallTask, ReleaseId, Status};
use std::collections::HashSet;
use std::sync::atomic::Ordering;

use super::Sideloader;

impl Sideloader {
    /// Add a release to the tail of the install queue
    ///
    /// Enqueuing a release that already has a live task is a no-op returning that
    /// task. A COMPLETED or FAILED task for the release is reset to QUEUED at the
    /// tail. The processor is woken (or restarted if it had gone idle).
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once [`Sideloader::shutdown`] has begun
    /// - [`DownloadError::ReleaseNotInCatalog`] if the catalog does not know the release
    pub async fn enqueue(&self, id: &ReleaseId, download_only: bool) -> Result<InstallTask> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if self.catalog.lookup(id).is_none() {
            return Err(Error::Download(DownloadError::ReleaseNotInCatalog {
                release: id.to_string(),
            }));
        }

        let outcome = self.db.enqueue_task(id, download_only).await?;
        if outcome.queued {
            tracing::info!(
                release = %id,
                position = outcome.task.queue_position,
                download_only,
                "Release queued"
            );
            self.emit_event(Event::Queued {
                id: id.clone(),
                position: outcome.task.queue_position,
            });
            self.publish_snapshot().await;
            self.ensure_processor();
        } else {
            tracing::debug!(release = %id, status = %outcome.task.status, "Release already queued");
        }

        Ok(outcome.task)
    }

    /// Move a task to the front of the queue
    ///
    /// A PAUSED or FAILED task is set back to QUEUED. The running task is never
    /// preempted; a promoted task runs next.
    pub async fn promote(&self, id: &ReleaseId) -> Result<InstallTask> {
        let before = self.require_task(id).await?;
        let task = self.db.promote_task(id).await?;

        if before.status != task.status {
            self.emit_event(Event::StatusChanged {
                id: id.clone(),
                status: task.status,
            });
        }
        if before.queue_position != task.queue_position || before.status != task.status {
            tracing::info!(release = %id, "Task promoted to front of queue");
            self.publish_snapshot().await;
        }
        if task.status == Status::Queued {
            self.ensure_processor();
        }
        Ok(task)
    }

    /// Re-queue a FAILED task at the tail, clearing its error and progress
    ///
    /// Downloaded segments are kept, so the retry resumes by range.
    pub async fn retry(&self, id: &ReleaseId) -> Result<InstallTask> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let task = self.db.requeue_failed(id).await?;
        tracing::info!(release = %id, position = task.queue_position, "Retrying failed task");

        self.emit_event(Event::Queued {
            id: id.clone(),
            position: task.queue_position,
        });
        self.publish_snapshot().await;
        self.ensure_processor();
        Ok(task)
    }

    /// Delete every COMPLETED and FAILED task
    ///
    /// Working files of FAILED tasks are removed with them. Artifacts left by a
    /// completed download-only task stay on disk. Returns the number of tasks removed.
    pub async fn clear_finished(&self) -> Result<usize> {
        let failed: HashSet<ReleaseId> = self
            .db
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| t.status == Status::Failed)
            .map(|t| t.release_id)
            .collect();

        let removed = self.db.delete_finished().await?;
        for id in &removed {
            if failed.contains(id) {
                self.remove_working_files(id).await;
            }
            self.emit_event(Event::Removed { id: id.clone() });
        }

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Cleared finished tasks");
            self.publish_snapshot().await;
        }
        Ok(removed.len())
    }

    /// All tasks: live ones in queue order, then finished ones
    pub async fn list_tasks(&self) -> Result<Vec<InstallTask>> {
        self.db.list_tasks().await
    }

    /// Get one task
    pub async fn get_task(&self, id: &ReleaseId) -> Result<Option<InstallTask>> {
        self.db.get_task(id).await
    }

    /// Fetch a task or fail with [`Error::NotFound`]
    pub(crate) async fn require_task(&self, id: &ReleaseId) -> Result<InstallTask> {
        self.db
            .get_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {} not found", id)))
    }
}
