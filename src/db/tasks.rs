//! Install queue operations: ordering, status transitions, progress.
//!
//! Positions are contiguous from 0 among non-terminal rows. Terminal rows
//! (COMPLETED/FAILED) keep their last position but are outside the ordering.

use crate::error::{DatabaseError, DownloadError};
use crate::types::{InstallTask, ReleaseId, Status};
use crate::{Error, Result};
use sqlx::SqliteConnection;

use super::{Database, TaskRow};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn query_failed(what: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::QueryFailed(format!("Failed to {}: {}", what, e)))
}

/// Result of [`Database::enqueue_task`]
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    /// Snapshot after the operation
    pub task: InstallTask,
    /// False when a non-terminal row already existed and nothing changed
    pub queued: bool,
}

impl Database {
    async fn fetch_row(conn: &mut SqliteConnection, id: &ReleaseId) -> Result<Option<TaskRow>> {
        sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT
                release_id, status, progress, downloaded_bytes, total_bytes,
                queue_position, download_only, error_message, created_at, last_updated_at
            FROM install_tasks
            WHERE release_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("get install task"))
    }

    async fn require_row(conn: &mut SqliteConnection, id: &ReleaseId) -> Result<TaskRow> {
        Self::fetch_row(conn, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {} not found", id)))
    }

    /// Renumber non-terminal rows 0..n keeping their relative order
    async fn compact_positions(conn: &mut SqliteConnection) -> Result<()> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT release_id FROM install_tasks
            WHERE status NOT IN ('COMPLETED', 'FAILED')
            ORDER BY queue_position ASC, created_at ASC, release_id ASC
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(query_failed("list queue positions"))?;

        for (position, id) in ids.iter().enumerate() {
            sqlx::query(
                "UPDATE install_tasks SET queue_position = ? WHERE release_id = ? AND queue_position != ?",
            )
            .bind(position as i64)
            .bind(id)
            .bind(position as i64)
            .execute(&mut *conn)
            .await
            .map_err(query_failed("compact queue positions"))?;
        }

        Ok(())
    }

    /// Add a release at the tail of the queue
    ///
    /// A release with a non-terminal row is left untouched. A terminal row is reset
    /// to QUEUED at the tail, keeping its creation time.
    pub async fn enqueue_task(&self, id: &ReleaseId, download_only: bool) -> Result<EnqueueOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(query_failed("begin transaction"))?;
        let now = now_ms();

        let existing = Self::fetch_row(&mut tx, id).await?;
        let queued = match existing {
            Some(row) if !row.status().is_terminal() => {
                tx.commit().await.map_err(query_failed("commit transaction"))?;
                return Ok(EnqueueOutcome {
                    task: row.into(),
                    queued: false,
                });
            }
            Some(_) => {
                sqlx::query(
                    r#"
                    UPDATE install_tasks SET
                        status = 'QUEUED',
                        progress = 0.0,
                        downloaded_bytes = NULL,
                        total_bytes = NULL,
                        error_message = NULL,
                        download_only = ?,
                        queue_position = (
                            SELECT COALESCE(MAX(queue_position) + 1, 0) FROM install_tasks
                            WHERE status NOT IN ('COMPLETED', 'FAILED')
                        ),
                        last_updated_at = MAX(last_updated_at, ?)
                    WHERE release_id = ?
                    "#,
                )
                .bind(download_only as i64)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(query_failed("re-queue install task"))?;
                true
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO install_tasks (
                        release_id, status, progress, downloaded_bytes, total_bytes,
                        queue_position, download_only, error_message, created_at, last_updated_at
                    )
                    SELECT ?, 'QUEUED', 0.0, NULL, NULL, COALESCE(MAX(queue_position) + 1, 0), ?, NULL, ?, ?
                    FROM install_tasks
                    WHERE status NOT IN ('COMPLETED', 'FAILED')
                    "#,
                )
                .bind(id)
                .bind(download_only as i64)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(query_failed("insert install task"))?;
                true
            }
        };

        let row = Self::require_row(&mut tx, id).await?;
        tx.commit().await.map_err(query_failed("commit transaction"))?;

        Ok(EnqueueOutcome {
            task: row.into(),
            queued,
        })
    }

    /// Move a task to position 0
    ///
    /// Non-terminal tasks ahead of it shift back by one. A PAUSED or FAILED task is
    /// set back to QUEUED. Promoting a task already at position 0 only un-pauses it.
    pub async fn promote_task(&self, id: &ReleaseId) -> Result<InstallTask> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(query_failed("begin transaction"))?;
        let now = now_ms();

        let row = Self::require_row(&mut tx, id).await?;
        let status = row.status();

        match status {
            Status::Completed => {
                return Err(Error::Download(DownloadError::InvalidState {
                    id: id.to_string(),
                    operation: "promote".to_string(),
                    current_state: status.to_string(),
                }));
            }
            Status::Failed => {
                sqlx::query(
                    r#"
                    UPDATE install_tasks SET queue_position = queue_position + 1
                    WHERE status NOT IN ('COMPLETED', 'FAILED')
                    "#,
                )
                .execute(&mut *tx)
                .await
                .map_err(query_failed("shift queue positions"))?;

                sqlx::query(
                    r#"
                    UPDATE install_tasks SET
                        queue_position = 0,
                        status = 'QUEUED',
                        progress = 0.0,
                        error_message = NULL,
                        last_updated_at = MAX(last_updated_at, ?)
                    WHERE release_id = ?
                    "#,
                )
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(query_failed("promote install task"))?;
            }
            _ => {
                if row.queue_position != 0 {
                    sqlx::query(
                        r#"
                        UPDATE install_tasks SET queue_position = queue_position + 1
                        WHERE status NOT IN ('COMPLETED', 'FAILED') AND queue_position < ?
                        "#,
                    )
                    .bind(row.queue_position)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_failed("shift queue positions"))?;
                }

                if row.queue_position != 0 || status == Status::Paused {
                    sqlx::query(
                        r#"
                        UPDATE install_tasks SET
                            queue_position = 0,
                            status = CASE WHEN status = 'PAUSED' THEN 'QUEUED' ELSE status END,
                            last_updated_at = MAX(last_updated_at, ?)
                        WHERE release_id = ?
                        "#,
                    )
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_failed("promote install task"))?;
                }
            }
        }

        let row = Self::require_row(&mut tx, id).await?;
        tx.commit().await.map_err(query_failed("commit transaction"))?;
        Ok(row.into())
    }

    /// Atomically move a task from one of `from` to `to`
    ///
    /// Returns the previous status. A task already in `to` is left untouched. Any
    /// other status is an [`DownloadError::InvalidState`] naming `operation`.
    pub async fn transition(
        &self,
        id: &ReleaseId,
        from: &[Status],
        to: Status,
        operation: &str,
    ) -> Result<Status> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(query_failed("begin transaction"))?;

        let row = Self::require_row(&mut tx, id).await?;
        let current = row.status();

        if current == to {
            tx.commit().await.map_err(query_failed("commit transaction"))?;
            return Ok(current);
        }
        if !from.contains(&current) {
            return Err(Error::Download(DownloadError::InvalidState {
                id: id.to_string(),
                operation: operation.to_string(),
                current_state: current.to_string(),
            }));
        }

        sqlx::query(
            "UPDATE install_tasks SET status = ?, last_updated_at = MAX(last_updated_at, ?) WHERE release_id = ?",
        )
        .bind(to.as_str())
        .bind(now_ms())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("update status"))?;

        tx.commit().await.map_err(query_failed("commit transaction"))?;
        Ok(current)
    }

    /// Move a FAILED task back to QUEUED at the tail, clearing error and progress
    pub async fn requeue_failed(&self, id: &ReleaseId) -> Result<InstallTask> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(query_failed("begin transaction"))?;

        let row = Self::require_row(&mut tx, id).await?;
        if row.status() != Status::Failed {
            return Err(Error::Download(DownloadError::InvalidState {
                id: id.to_string(),
                operation: "retry".to_string(),
                current_state: row.status().to_string(),
            }));
        }

        sqlx::query(
            r#"
            UPDATE install_tasks SET
                status = 'QUEUED',
                progress = 0.0,
                error_message = NULL,
                queue_position = (
                    SELECT COALESCE(MAX(queue_position) + 1, 0) FROM install_tasks
                    WHERE status NOT IN ('COMPLETED', 'FAILED')
                ),
                last_updated_at = MAX(last_updated_at, ?)
            WHERE release_id = ?
            "#,
        )
        .bind(now_ms())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("retry install task"))?;

        let row = Self::require_row(&mut tx, id).await?;
        tx.commit().await.map_err(query_failed("commit transaction"))?;
        Ok(row.into())
    }

    /// Claim the lowest-position QUEUED task, marking it DOWNLOADING
    pub async fn claim_next(&self) -> Result<Option<InstallTask>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(query_failed("begin transaction"))?;

        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT
                release_id, status, progress, downloaded_bytes, total_bytes,
                queue_position, download_only, error_message, created_at, last_updated_at
            FROM install_tasks
            WHERE status = 'QUEUED'
            ORDER BY queue_position ASC, created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_failed("select next task"))?;

        let Some(row) = row else {
            tx.commit().await.map_err(query_failed("commit transaction"))?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE install_tasks SET status = 'DOWNLOADING', last_updated_at = MAX(last_updated_at, ?) WHERE release_id = ?",
        )
        .bind(now_ms())
        .bind(&row.release_id)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("claim task"))?;

        let id = ReleaseId(row.release_id);
        let row = Self::require_row(&mut tx, &id).await?;
        tx.commit().await.map_err(query_failed("commit transaction"))?;
        Ok(Some(row.into()))
    }

    /// Whether any task is waiting in QUEUED
    pub async fn has_queued(&self) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM install_tasks WHERE status = 'QUEUED'")
                .fetch_one(&self.pool)
                .await
                .map_err(query_failed("count queued tasks"))?;
        Ok(count > 0)
    }

    /// Set the status of a task (phase entry, pause)
    ///
    /// Missing rows are ignored: a cancelled task may still be unwinding.
    pub async fn set_status(&self, id: &ReleaseId, status: Status) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "UPDATE install_tasks SET status = ?, last_updated_at = MAX(last_updated_at, ?) WHERE release_id = ?",
        )
        .bind(status.as_str())
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_failed("update status"))?;
        Ok(())
    }

    /// Persist progress and byte counts
    ///
    /// `None` byte counts keep the stored value. The stored downloaded count never
    /// exceeds the stored total.
    pub async fn update_progress(
        &self,
        id: &ReleaseId,
        progress: f32,
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(query_failed("begin transaction"))?;

        let Some(row) = Self::fetch_row(&mut tx, id).await? else {
            return Ok(());
        };

        let total = total_bytes
            .map(|t| t as i64)
            .or(row.total_bytes)
            .filter(|t| *t > 0);
        let downloaded = downloaded_bytes.map(|d| d as i64).or(row.downloaded_bytes);
        let downloaded = match (downloaded, total) {
            (Some(d), Some(t)) => Some(d.min(t)),
            (d, _) => d,
        };

        sqlx::query(
            r#"
            UPDATE install_tasks SET
                progress = ?,
                downloaded_bytes = ?,
                total_bytes = ?,
                last_updated_at = MAX(last_updated_at, ?)
            WHERE release_id = ?
            "#,
        )
        .bind(progress.clamp(0.0, 1.0) as f64)
        .bind(downloaded)
        .bind(total)
        .bind(now_ms())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("update progress"))?;

        tx.commit().await.map_err(query_failed("commit transaction"))?;
        Ok(())
    }

    /// Mark a task FAILED with a reason and compact the remaining queue
    pub async fn mark_failed(&self, id: &ReleaseId, error_message: &str) -> Result<()> {
        self.finish_task(id, Status::Failed, Some(error_message)).await
    }

    /// Mark a task COMPLETED and compact the remaining queue
    pub async fn mark_completed(&self, id: &ReleaseId) -> Result<()> {
        self.finish_task(id, Status::Completed, None).await
    }

    async fn finish_task(
        &self,
        id: &ReleaseId,
        status: Status,
        error_message: Option<&str>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(query_failed("begin transaction"))?;

        sqlx::query(
            r#"
            UPDATE install_tasks SET
                status = ?,
                progress = CASE WHEN ? = 'COMPLETED' THEN 1.0 ELSE progress END,
                error_message = ?,
                last_updated_at = MAX(last_updated_at, ?)
            WHERE release_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(error_message)
        .bind(now_ms())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("finish install task"))?;

        Self::compact_positions(&mut tx).await?;
        tx.commit().await.map_err(query_failed("commit transaction"))?;
        Ok(())
    }

    /// Delete a task and compact the remaining queue
    ///
    /// Returns false if no such task existed.
    pub async fn delete_task(&self, id: &ReleaseId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(query_failed("begin transaction"))?;

        let result = sqlx::query("DELETE FROM install_tasks WHERE release_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("delete install task"))?;

        Self::compact_positions(&mut tx).await?;
        tx.commit().await.map_err(query_failed("commit transaction"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all COMPLETED and FAILED tasks, returning their identifiers
    pub async fn delete_finished(&self) -> Result<Vec<ReleaseId>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(query_failed("begin transaction"))?;

        let ids: Vec<ReleaseId> = sqlx::query_scalar(
            "SELECT release_id FROM install_tasks WHERE status IN ('COMPLETED', 'FAILED')",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(query_failed("list finished tasks"))?;

        sqlx::query("DELETE FROM install_tasks WHERE status IN ('COMPLETED', 'FAILED')")
            .execute(&mut *tx)
            .await
            .map_err(query_failed("clear finished tasks"))?;

        tx.commit().await.map_err(query_failed("commit transaction"))?;
        Ok(ids)
    }

    /// Reset tasks left in an active phase by a previous process back to QUEUED
    ///
    /// Positions are kept. Returns the number of rows reset.
    pub async fn reset_active_to_queued(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            UPDATE install_tasks SET status = 'QUEUED', last_updated_at = MAX(last_updated_at, ?)
            WHERE status IN ('DOWNLOADING', 'EXTRACTING', 'COPYING_OBB', 'INSTALLING')
            "#,
        )
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(query_failed("reset active tasks"))?;
        Ok(result.rows_affected())
    }

    /// Get a task by release
    pub async fn get_task(&self, id: &ReleaseId) -> Result<Option<InstallTask>> {
        let mut conn = self.pool.acquire().await.map_err(query_failed("acquire connection"))?;
        Ok(Self::fetch_row(&mut conn, id).await?.map(Into::into))
    }

    /// List all tasks: queue order first, then finished tasks by last update
    pub async fn list_tasks(&self) -> Result<Vec<InstallTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT
                release_id, status, progress, downloaded_bytes, total_bytes,
                queue_position, download_only, error_message, created_at, last_updated_at
            FROM install_tasks
            ORDER BY
                CASE WHEN status IN ('COMPLETED', 'FAILED') THEN 1 ELSE 0 END ASC,
                CASE WHEN status IN ('COMPLETED', 'FAILED') THEN 0 ELSE queue_position END ASC,
                last_updated_at DESC,
                release_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("list install tasks"))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
