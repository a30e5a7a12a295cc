//! Startup and shutdown coordination.

use crate::error::Result;
use crate::types::Event;

use super::Sideloader;

impl Sideloader {
    /// Restore tasks from the database on startup
    ///
    /// Tasks left in an active phase by the previous process go back to QUEUED at
    /// their position; the recovery sentinel decides where each one resumes.
    /// Stored byte counts are reconciled against the files on disk, and the
    /// processor is started if anything is waiting.
    pub(crate) async fn restore_queue(&self, unclean_shutdown: bool) -> Result<()> {
        tracing::info!("Restoring queue from database");
        if unclean_shutdown {
            tracing::warn!("Previous session did not shut down cleanly");
        }

        let reset = self.db.reset_active_to_queued().await?;
        if reset > 0 {
            tracing::info!(count = reset, "Re-queued tasks interrupted by the previous process");
        }

        for task in self.db.list_tasks().await? {
            if task.status.is_terminal() {
                continue;
            }
            if let Err(e) = crate::recovery::reconcile_downloaded_bytes(
                &self.db,
                &task,
                &self.config.download.download_dir,
                &self.config.download.extract_dir,
            )
            .await
            {
                tracing::warn!(release = %task.release_id, error = %e, "Failed to reconcile downloaded bytes");
            }
        }

        self.publish_snapshot().await;

        if self.db.has_queued().await? {
            tracing::info!("Queued work found, starting processor");
            self.start_queue_processor();
        } else {
            tracing::info!("No queued tasks to restore");
        }
        Ok(())
    }

    /// Gracefully shut down the sideloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new work and lets an idle processor exit
    /// 2. Cancels the active task, which finishes as PAUSED
    /// 3. Waits for it to settle, up to `queue.shutdown_timeout`
    /// 4. Releases the wake lock and marks a clean shutdown
    /// 5. Emits [`Event::Shutdown`]
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.queue_state
            .accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);
        self.queue_state.wake.notify_one();
        tracing::info!("Stopped accepting new tasks");

        self.pause_all_active().await;

        let shutdown_timeout = self.config.queue.shutdown_timeout;
        match tokio::time::timeout(shutdown_timeout, self.wait_for_active_tasks()).await {
            Ok(()) => tracing::info!("Active task settled"),
            Err(_) => tracing::warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "Timeout waiting for active task, proceeding with shutdown"
            ),
        }

        self.wake_lock.force_release();

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Signal cancellation to every active task
    async fn pause_all_active(&self) {
        let mut active = self.queue_state.active_tasks.lock().await;
        for (id, entry) in active.iter_mut() {
            tracing::debug!(release = %id, "Signaling pause for shutdown");
            entry.requeue_on_pause = false;
            entry.token.cancel();
        }
    }

    async fn wait_for_active_tasks(&self) {
        loop {
            let active_count = self.queue_state.active_tasks.lock().await.len();
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "Waiting for active task to settle");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
