//! Queue processor — drives one task at a time through the pipeline.
//!
//! The processor claims the lowest-position QUEUED task, runs it to a final
//! status, and repeats. With nothing to claim it suspends on the wake notifier
//! or the idle timeout; if the queue is still empty after the timeout it exits,
//! and the next enqueue, resume, retry or promote starts a fresh loop.

use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use super::pipeline::run_install_task;
use super::{ActiveTask, Sideloader};
use crate::error::Result;
use crate::types::{Event, InstallTask, ReleaseId, Status};

impl Sideloader {
    /// Start the queue processor task unless one is already running
    ///
    /// Returns the handle of the newly spawned loop, or `None` when a loop was
    /// already alive (it is woken instead).
    pub fn start_queue_processor(&self) -> Option<tokio::task::JoinHandle<()>> {
        self.queue_state.wake.notify_one();
        if self
            .queue_state
            .processor_running
            .swap(true, Ordering::SeqCst)
        {
            return None;
        }

        let sideloader = self.clone();
        Some(tokio::spawn(async move {
            sideloader.run_processor().await;
        }))
    }

    /// Wake or start the processor
    pub(crate) fn ensure_processor(&self) {
        if self.queue_state.accepting_new.load(Ordering::SeqCst) {
            self.start_queue_processor();
        }
    }

    async fn run_processor(&self) {
        tracing::debug!("Queue processor started");
        let idle_timeout = self.config.queue.idle_timeout;

        loop {
            if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
                break;
            }

            match self.claim_next_task().await {
                Ok(Some((task, token))) => {
                    self.drive_task(task, token).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim next task");
                }
            }

            tokio::select! {
                _ = self.queue_state.wake.notified() => continue,
                _ = tokio::time::sleep(idle_timeout) => {}
            }

            if matches!(self.db.has_queued().await, Ok(true)) {
                continue;
            }

            self.queue_state
                .processor_running
                .store(false, Ordering::SeqCst);

            // An enqueue that raced the store above saw a live loop and only notified
            let raced = self.queue_state.accepting_new.load(Ordering::SeqCst)
                && matches!(self.db.has_queued().await, Ok(true))
                && !self
                    .queue_state
                    .processor_running
                    .swap(true, Ordering::SeqCst);
            if raced {
                continue;
            }

            tracing::debug!("Queue empty, processor exiting");
            return;
        }

        self.queue_state
            .processor_running
            .store(false, Ordering::SeqCst);
        tracing::debug!("Queue processor stopped");
    }

    /// Claim the next task and register its token under the active-task lock
    async fn claim_next_task(&self) -> Result<Option<(InstallTask, CancellationToken)>> {
        let mut active = self.queue_state.active_tasks.lock().await;
        let Some(task) = self.db.claim_next().await? else {
            return Ok(None);
        };

        let token = CancellationToken::new();
        active.insert(task.release_id.clone(), ActiveTask::new(token.clone()));
        Ok(Some((task, token)))
    }

    async fn drive_task(&self, task: InstallTask, token: CancellationToken) {
        let id = task.release_id.clone();
        tracing::info!(release = %id, position = task.queue_position, "Starting install task");

        self.emit_event(Event::StatusChanged {
            id: id.clone(),
            status: Status::Downloading,
        });
        self.publish_snapshot().await;

        let result = run_install_task(self, task, token).await;
        self.finish_task(&id, result).await;
    }

    /// Record the final status of a run
    ///
    /// The status is written while the active-task lock is held, so control
    /// operations never observe a task that is neither active nor settled.
    async fn finish_task(&self, id: &ReleaseId, result: Result<()>) {
        let mut active = self.queue_state.active_tasks.lock().await;
        let entry = active.remove(id);
        let (discard, requeue) = entry
            .map(|e| (e.discard, e.requeue_on_pause))
            .unwrap_or((false, false));

        if discard {
            drop(active);
            tracing::info!(release = %id, "Cancelled task stopped");
            self.remove_working_files(id).await;
            self.publish_snapshot().await;
            return;
        }

        let event = match result {
            Ok(()) => {
                if let Err(e) = self.db.mark_completed(id).await {
                    tracing::error!(release = %id, error = %e, "Failed to mark task completed");
                }
                tracing::info!(release = %id, "Install task completed");
                Event::Completed { id: id.clone() }
            }
            Err(e) if e.is_cancelled() => {
                let status = if requeue {
                    Status::Queued
                } else {
                    Status::Paused
                };
                if let Err(e) = self.db.set_status(id, status).await {
                    tracing::error!(release = %id, error = %e, "Failed to record paused task");
                }
                tracing::info!(release = %id, %status, "Install task stopped");
                Event::StatusChanged {
                    id: id.clone(),
                    status,
                }
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(db_err) = self.db.mark_failed(id, &message).await {
                    tracing::error!(release = %id, error = %db_err, "Failed to mark task failed");
                }
                tracing::error!(
                    release = %id,
                    error = %e,
                    kind = ?e.kind(),
                    "Install task failed"
                );
                Event::Failed {
                    id: id.clone(),
                    error: message,
                    code: e.error_code().to_string(),
                }
            }
        };
        drop(active);

        if matches!(event, Event::Failed { .. })
            && let Err(e) =
                crate::recovery::remove_marker(&self.config.download.extract_dir, id).await
        {
            tracing::warn!(release = %id, error = %e, "Failed to remove extraction marker");
        }

        self.emit_event(event);
        self.publish_snapshot().await;
    }
}
