//! Artifact placement and package installation
//!
//! Expansion files are moved into the shared expansion root, the package is staged
//! under a name unique to its package and release, verified, and handed to a
//! [`PackageInstaller`]. Scratch files are removed after a short grace delay.

mod adb;
mod artifacts;
mod traits;

pub use adb::{AdbInstaller, UnavailableInstaller};
pub use artifacts::{
    compare_expansion_names, find_expansions, find_package, manifest_declares, place_expansions,
    stage_package, staged_package_path, verify_package,
};
pub use traits::PackageInstaller;

use crate::config::InstallConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pick the installer for a configuration
///
/// An explicit `adb_path` wins; otherwise adb is looked up on PATH. Without adb,
/// installs fail and download-only tasks still work.
pub fn installer_from_config(config: &InstallConfig) -> Arc<dyn PackageInstaller> {
    if let Some(path) = &config.adb_path {
        return Arc::new(AdbInstaller::new(path.clone()));
    }
    match AdbInstaller::from_path() {
        Some(installer) => {
            info!(path = ?installer.binary_path(), "using adb from PATH");
            Arc::new(installer)
        }
        None => {
            warn!("adb not found in PATH, package installation unavailable");
            Arc::new(UnavailableInstaller)
        }
    }
}

/// Delete scratch paths after `grace`, in a detached task
pub fn schedule_cleanup(paths: Vec<PathBuf>, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        for path in paths {
            match crate::utils::remove_path(&path).await {
                Ok(()) => debug!(?path, "removed scratch path"),
                Err(e) => warn!(?path, error = %e, "failed to remove scratch path"),
            }
        }
    })
}
