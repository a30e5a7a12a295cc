//! Archive reassembly and selective extraction
//!
//! Split 7z archives are merged into one container, then only package (`.apk`) and
//! expansion (`.obb`) entries are extracted into the release's scratch directory.
//! Releases shipped without an archive skip both steps and are moved into place.

mod assembler;
mod password_list;
mod sevenz;
mod shared;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

// Re-exports
pub use assembler::{ArchiveSource, assemble, plan_archives};
pub use password_list::PasswordList;
pub use sevenz::SevenZipExtractor;
pub use shared::{StageProgress, collect_files, is_installable_entry};

use crate::error::{Error, ExtractError, Result};
use crate::mirror::ArtifactKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Extract the installable entries of an assembled container into `dest_path`
pub async fn extract_archive(
    archive_path: &Path,
    dest_path: &Path,
    passwords: &PasswordList,
    progress: Arc<StageProgress>,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    let is_7z = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(ArtifactKind::of)
        == Some(ArtifactKind::Archive);
    if !is_7z {
        return Err(Error::Extract(ExtractError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason: format!("unknown archive type for file: {}", archive_path.display()),
        }));
    }

    info!(?archive_path, ?dest_path, "extracting installable entries");
    SevenZipExtractor::extract_with_passwords(archive_path, dest_path, passwords, progress, cancel)
        .await
}

/// Move the package and expansion files of an unarchived release into `dest_path`
///
/// `files` are paths relative to `download_dir`; sub-directories are kept.
pub async fn stage_uncompressed(
    download_dir: &Path,
    files: &[String],
    dest_path: &Path,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dest_path).await?;

    let mut moved = Vec::new();
    for relative in files {
        if !is_installable_entry(relative) {
            continue;
        }
        let source = crate::utils::safe_join(download_dir, relative).ok_or_else(|| {
            Error::Extract(ExtractError::PathTraversal {
                entry: relative.clone(),
            })
        })?;
        let target = crate::utils::safe_join(dest_path, relative).ok_or_else(|| {
            Error::Extract(ExtractError::PathTraversal {
                entry: relative.clone(),
            })
        })?;
        crate::utils::move_file(&source, &target).await?;
        moved.push(target);
    }

    info!(?dest_path, files = moved.len(), "staged uncompressed release");
    Ok(moved)
}
