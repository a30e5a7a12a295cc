//! Installer backed by the external `adb` binary

use super::traits::PackageInstaller;
use crate::error::InstallError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Installs packages with `adb install -r`
///
/// # Examples
///
/// ```no_run
/// use sideload_dl::install::AdbInstaller;
/// use std::path::PathBuf;
///
/// // Create with explicit path
/// let installer = AdbInstaller::new(PathBuf::from("/usr/bin/adb"));
///
/// // Or auto-discover from PATH
/// let installer = AdbInstaller::from_path().expect("adb not found in PATH");
/// ```
pub struct AdbInstaller {
    binary_path: PathBuf,
}

impl AdbInstaller {
    /// Create an installer with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find adb in PATH
    pub fn from_path() -> Option<Self> {
        which::which("adb").ok().map(Self::new)
    }

    /// Path of the adb binary in use
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }
}

#[async_trait]
impl PackageInstaller for AdbInstaller {
    async fn install(&self, package_path: &Path, package_name: &str) -> crate::Result<()> {
        debug!(?package_path, package = package_name, "running adb install");

        let output = Command::new(&self.binary_path)
            .arg("install")
            .arg("-r")
            .arg(package_path)
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute adb: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        // Older adb versions report "Failure [...]" with a zero exit code
        if output.status.success() && !stdout.contains("Failure") {
            info!(package = package_name, "package installed");
            return Ok(());
        }

        let reason = [stdout.trim(), stderr.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        Err(InstallError::InstallerFailed {
            package: package_name.to_string(),
            reason: if reason.is_empty() {
                format!("adb exited with {}", output.status)
            } else {
                reason
            },
        }
        .into())
    }

    fn name(&self) -> &'static str {
        "adb"
    }
}

/// Installer used when no platform installer is available
///
/// Every install fails with an external tool error, which fails the task
/// without retry. Download-only tasks never reach it.
pub struct UnavailableInstaller;

#[async_trait]
impl PackageInstaller for UnavailableInstaller {
    async fn install(&self, _package_path: &Path, _package_name: &str) -> crate::Result<()> {
        Err(crate::Error::ExternalTool(
            "package installation requires the adb binary. \
             Configure install.adb_path or ensure adb is in PATH."
                .into(),
        ))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}
