//! # sideload-dl
//!
//! Resumable download, extraction and installation pipeline for sideloaded
//! application releases.
//!
//! ## Design Philosophy
//!
//! sideload-dl is designed to be:
//! - **Crash-safe** - The queue lives in SQLite; interrupted transfers resume by byte range
//! - **Single-flight** - One release moves through the pipeline at a time, in queue order
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events or watch queue snapshots
//!
//! A release goes through these phases:
//! `DOWNLOADING` (range-resumed segment fetches) → `EXTRACTING` (split-archive merge
//! and selective 7z extraction) → `COPYING_OBB` (expansion files placed under the
//! package's OBB directory) → `INSTALLING` (package staged, verified and handed to
//! the platform installer).
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sideload_dl::{Collaborators, Config, ReleaseId, Sideloader, StaticCatalog, CatalogEntry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.mirror.base_url = "https://mirror.example/releases/".to_string();
//!
//!     let catalog = Arc::new(StaticCatalog::from_entries([CatalogEntry {
//!         release_name: "Example Game v42".to_string(),
//!         package_name: "com.example.game".to_string(),
//!         declared_size: None,
//!         version_code: Some(42),
//!     }]));
//!
//!     let sideloader =
//!         Sideloader::new(config.clone(), Collaborators::with_catalog(catalog, &config)).await?;
//!
//!     // Subscribe to events
//!     let mut events = sideloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     sideloader.enqueue(&ReleaseId::new("Example Game v42"), false).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Release catalog lookup
pub mod catalog;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Core sideloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Split-archive assembly and archive extraction
pub mod extraction;
/// Range-resume segment downloads
pub mod fetch;
/// Expansion placement, package staging and installers
pub mod install;
/// Mirror directory listing and segment sizing
pub mod mirror;
/// Extraction markers and crash recovery
pub mod recovery;
/// Retry logic with exponential backoff
pub mod retry;
/// Free-space check before downloading
pub mod space_guard;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Counted wake lock
pub mod wake_lock;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogEntry, StaticCatalog};
pub use config::Config;
pub use db::Database;
pub use downloader::{Collaborators, Sideloader};
pub use error::{
    DatabaseError, DownloadError, Error, ExtractError, FailureKind, InstallError, Result,
};
pub use install::{AdbInstaller, PackageInstaller, UnavailableInstaller};
pub use types::{Event, InstallTask, ReleaseId, Status};
pub use wake_lock::{NoopWakeLock, WakeLock, WakeLockBackend};

/// Helper function to run the sideloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the sideloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use sideload_dl::{Collaborators, Config, Sideloader, StaticCatalog, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let catalog = Arc::new(StaticCatalog::new());
///     let sideloader =
///         Sideloader::new(config.clone(), Collaborators::with_catalog(catalog, &config)).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(sideloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(sideloader: Sideloader) -> Result<()> {
    wait_for_signal().await;
    sideloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
