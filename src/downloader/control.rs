//! Task lifecycle control — pause, resume, cancel.

use crate::error::{DownloadError, Error, Result};
use crate::types::{Event, ReleaseId, Status};

use super::Sideloader;

fn invalid_state(id: &ReleaseId, operation: &str, status: Status) -> Error {
    Error::Download(DownloadError::InvalidState {
        id: id.to_string(),
        operation: operation.to_string(),
        current_state: status.to_string(),
    })
}

impl Sideloader {
    /// Pause a task
    ///
    /// A QUEUED task becomes PAUSED immediately. An active task has its
    /// cancellation token signalled; the pipeline stops at the next chunk
    /// boundary and records PAUSED itself. Pausing a PAUSED task is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the task doesn't exist or is COMPLETED/FAILED.
    pub async fn pause(&self, id: &ReleaseId) -> Result<()> {
        let task = self.require_task(id).await?;
        match task.status {
            Status::Paused => return Ok(()),
            status if status.is_terminal() => return Err(invalid_state(id, "pause", status)),
            _ => {}
        }

        let mut active = self.queue_state.active_tasks.lock().await;
        if let Some(entry) = active.get_mut(id) {
            entry.requeue_on_pause = false;
            entry.token.cancel();
            tracing::info!(release = %id, "Signaled pause to active task");
            return Ok(());
        }

        let previous = self
            .db
            .transition(id, &[Status::Queued], Status::Paused, "pause")
            .await?;
        drop(active);

        if previous != Status::Paused {
            tracing::info!(release = %id, "Task paused");
            self.emit_event(Event::StatusChanged {
                id: id.clone(),
                status: Status::Paused,
            });
            self.publish_snapshot().await;
        }
        Ok(())
    }

    /// Resume a paused task
    ///
    /// The task returns to QUEUED at its existing position and the processor is
    /// woken. Resuming a QUEUED or running task is a no-op; resuming a task whose
    /// pause is still propagating re-queues it once it stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the task doesn't exist or is COMPLETED/FAILED.
    pub async fn resume(&self, id: &ReleaseId) -> Result<()> {
        if !self
            .queue_state
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::ShuttingDown);
        }

        let task = self.require_task(id).await?;
        if task.status.is_terminal() {
            return Err(invalid_state(id, "resume", task.status));
        }

        let mut active = self.queue_state.active_tasks.lock().await;
        if let Some(entry) = active.get_mut(id) {
            if entry.token.is_cancelled() && !entry.discard {
                entry.requeue_on_pause = true;
                tracing::debug!(release = %id, "Resume requested while pause propagates");
            }
            return Ok(());
        }

        let previous = self
            .db
            .transition(id, &[Status::Paused], Status::Queued, "resume")
            .await?;
        drop(active);

        if previous == Status::Paused {
            tracing::info!(release = %id, "Task resumed");
            self.emit_event(Event::StatusChanged {
                id: id.clone(),
                status: Status::Queued,
            });
            self.publish_snapshot().await;
        }
        self.ensure_processor();
        Ok(())
    }

    /// Cancel a task and delete it
    ///
    /// An active task is stopped first. The row is deleted, the remaining queue is
    /// compacted, and the task's download directory, extraction directory and
    /// marker are removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such task exists.
    pub async fn cancel(&self, id: &ReleaseId) -> Result<()> {
        let mut active = self.queue_state.active_tasks.lock().await;
        let was_active = match active.get_mut(id) {
            Some(entry) => {
                entry.discard = true;
                entry.token.cancel();
                true
            }
            None => false,
        };

        let deleted = self.db.delete_task(id).await?;
        drop(active);

        if !deleted && !was_active {
            return Err(Error::NotFound(format!("task {} not found", id)));
        }

        self.remove_working_files(id).await;
        tracing::info!(release = %id, was_active, "Task cancelled");

        self.emit_event(Event::Removed { id: id.clone() });
        self.publish_snapshot().await;
        Ok(())
    }
}
