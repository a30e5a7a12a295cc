//! Platform installer seam

use async_trait::async_trait;
use std::path::Path;

/// Hands a verified package to the platform package manager
///
/// Implementations can drive an external binary (see [`super::AdbInstaller`]),
/// a platform API, or a test double.
///
/// # Examples
///
/// ```no_run
/// use sideload_dl::install::{AdbInstaller, PackageInstaller};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let installer = AdbInstaller::from_path().expect("adb not found in PATH");
/// installer
///     .install(Path::new("staging/com.example.game-abc.apk"), "com.example.game")
///     .await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install (or replace) the package at `package_path`
    async fn install(&self, package_path: &Path, package_name: &str) -> crate::Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
