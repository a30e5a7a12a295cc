//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self {
            pool,
            write_lock: tokio::sync::Mutex::new(()),
        };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?;

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Run `steps` between BEGIN and COMMIT, rolling back on failure
    async fn apply_migration<F>(conn: &mut SqliteConnection, version: i32, steps: F) -> Result<()>
    where
        F: for<'c> FnOnce(
            &'c mut SqliteConnection,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<()>> + Send + 'c>,
        >,
    {
        tracing::info!(version, "Applying database migration");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            steps(&mut *conn).await?;
            Self::record_migration(conn, version).await
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!(version, "Database migration complete");
        Ok(())
    }

    /// Migration v1: install queue
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        Self::apply_migration(conn, 1, |conn| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    CREATE TABLE install_tasks (
                        release_id TEXT PRIMARY KEY,
                        status TEXT NOT NULL DEFAULT 'QUEUED',
                        progress REAL NOT NULL DEFAULT 0.0,
                        downloaded_bytes INTEGER,
                        total_bytes INTEGER,
                        queue_position INTEGER NOT NULL,
                        download_only INTEGER NOT NULL DEFAULT 0,
                        error_message TEXT,
                        created_at INTEGER NOT NULL,
                        last_updated_at INTEGER NOT NULL
                    )
                    "#,
                )
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to create install_tasks table: {}",
                        e
                    )))
                })?;

                sqlx::query(
                    "CREATE INDEX idx_install_tasks_position ON install_tasks(status, queue_position)",
                )
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to create index: {}",
                        e
                    )))
                })?;

                Ok(())
            })
        })
        .await
    }

    /// Migration v2: runtime state table for shutdown tracking
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        Self::apply_migration(conn, 2, |conn| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS runtime_state (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL,
                        updated_at INTEGER NOT NULL
                    )
                    "#,
                )
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to create runtime_state table: {}",
                        e
                    )))
                })?;

                // Unclean until the first graceful shutdown
                let now = chrono::Utc::now().timestamp();
                sqlx::query(
                    r#"
                    INSERT INTO runtime_state (key, value, updated_at)
                    VALUES ('clean_shutdown', 'false', ?)
                    "#,
                )
                .bind(now)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to initialize runtime_state: {}",
                        e
                    )))
                })?;

                Ok(())
            })
        })
        .await
    }

    /// Record a migration version
    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
