//! Crash recovery: extraction markers and on-disk byte reconciliation
//!
//! A marker `<extract_root>/<release-hash>.extracted` sits next to the release's
//! extraction directory `<extract_root>/<release-hash>/`. When both exist and the
//! marker parses, a restarted task skips straight to artifact installation.

use crate::db::Database;
use crate::error::Result;
use crate::extraction::{ArchiveSource, collect_files, plan_archives};
use crate::types::{InstallTask, ReleaseId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Share of overall progress covered by the download phase
pub const DOWNLOAD_PHASE_END: f32 = 0.80;

/// Contents of an extraction marker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMarker {
    /// Release the extraction belongs to
    pub release_id: ReleaseId,
    /// Files written into the extraction directory, relative to it
    pub files: Vec<String>,
    /// When extraction finished
    pub extracted_at: DateTime<Utc>,
}

/// Where a (re)started task picks up
#[derive(Clone, Debug, PartialEq)]
pub enum RecoveryPoint {
    /// Run the whole pipeline (downloads resume by range)
    FromStart,
    /// Extraction already finished; continue at expansion placement
    Extracted(ExtractionMarker),
}

/// Per-release scratch directory for extracted artifacts
pub fn extraction_dir(extract_root: &Path, id: &ReleaseId) -> PathBuf {
    extract_root.join(id.hash())
}

/// Marker path for a release
pub fn marker_path(extract_root: &Path, id: &ReleaseId) -> PathBuf {
    extract_root.join(format!("{}.extracted", id.hash()))
}

/// Per-release download directory
pub fn download_dir(download_root: &Path, id: &ReleaseId) -> PathBuf {
    download_root.join(id.hash())
}

/// Durably write the marker for a finished extraction
pub async fn write_marker(extract_root: &Path, marker: &ExtractionMarker) -> Result<PathBuf> {
    let path = marker_path(extract_root, &marker.release_id);
    let tmp = path.with_extension("extracted.tmp");
    let json = serde_json::to_vec_pretty(marker)?;

    tokio::fs::create_dir_all(extract_root).await?;
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&json).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, &path).await?;

    info!(release = %marker.release_id, ?path, "extraction marker written");
    Ok(path)
}

/// Decide where a task should resume
///
/// An unreadable marker is renamed to `*.corrupt` and the task starts over.
pub async fn inspect(extract_root: &Path, id: &ReleaseId) -> Result<RecoveryPoint> {
    let marker = marker_path(extract_root, id);
    let dir = extraction_dir(extract_root, id);

    if !tokio::fs::try_exists(&marker).await? {
        return Ok(RecoveryPoint::FromStart);
    }
    if !tokio::fs::try_exists(&dir).await? {
        warn!(release = %id, ?marker, "marker without extraction directory, starting over");
        crate::utils::remove_path(&marker).await?;
        return Ok(RecoveryPoint::FromStart);
    }

    let bytes = tokio::fs::read(&marker).await?;
    match serde_json::from_slice::<ExtractionMarker>(&bytes) {
        Ok(parsed) if parsed.release_id == *id => {
            info!(release = %id, "extraction already complete, resuming at installation");
            Ok(RecoveryPoint::Extracted(parsed))
        }
        Ok(_) | Err(_) => {
            let corrupt = marker.with_extension("extracted.corrupt");
            warn!(release = %id, ?marker, ?corrupt, "unreadable extraction marker, preserving and starting over");
            tokio::fs::rename(&marker, &corrupt).await?;
            Ok(RecoveryPoint::FromStart)
        }
    }
}

/// Delete a release's marker
pub async fn remove_marker(extract_root: &Path, id: &ReleaseId) -> Result<()> {
    crate::utils::remove_path(&marker_path(extract_root, id)).await?;
    Ok(())
}

/// Whether a finished extraction is on disk: the marker and its directory both exist
pub async fn has_completed_extraction(extract_root: &Path, id: &ReleaseId) -> Result<bool> {
    Ok(tokio::fs::try_exists(marker_path(extract_root, id)).await?
        && tokio::fs::try_exists(extraction_dir(extract_root, id)).await?)
}

/// Size of the downloaded segments under a directory (0 when it does not exist)
///
/// Containers merged from split parts sit next to those parts and are not counted.
pub fn bytes_on_disk(dir: &Path) -> Result<u64> {
    let files = collect_files(dir)?;
    let merged: HashSet<PathBuf> = plan_archives(&files)
        .into_iter()
        .filter_map(|archive| match archive {
            ArchiveSource::Split { container, .. } => Some(container),
            ArchiveSource::Single(_) => None,
        })
        .collect();

    Ok(files
        .iter()
        .filter(|p| !merged.contains(*p))
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum())
}

/// Correct the stored downloaded-bytes figure from what is actually on disk
///
/// Tasks whose extraction already finished are left alone since their downloads
/// may already be deleted. Progress is never written below the stored value.
/// Returns the corrected figure when the store was out of date.
pub async fn reconcile_downloaded_bytes(
    db: &Database,
    task: &InstallTask,
    download_root: &Path,
    extract_root: &Path,
) -> Result<Option<u64>> {
    if has_completed_extraction(extract_root, &task.release_id).await? {
        debug!(release = %task.release_id, "extraction complete, keeping stored byte count");
        return Ok(None);
    }

    let dir = download_dir(download_root, &task.release_id);
    let on_disk = {
        let dir = dir.clone();
        tokio::task::spawn_blocking(move || bytes_on_disk(&dir))
            .await
            .map_err(|e| crate::Error::Other(format!("disk scan task panicked: {}", e)))??
    };

    let stored = task.downloaded_bytes.unwrap_or(0);
    if stored == on_disk {
        return Ok(None);
    }

    let from_disk = match task.total_bytes {
        Some(total) if total > 0 => {
            DOWNLOAD_PHASE_END * (on_disk.min(total) as f64 / total as f64) as f32
        }
        _ => task.progress.min(DOWNLOAD_PHASE_END),
    };
    let progress = from_disk.max(task.progress);

    warn!(
        release = %task.release_id,
        stored,
        on_disk,
        "stored download size disagrees with disk, correcting"
    );
    db.update_progress(&task.release_id, progress, Some(on_disk), None)
        .await?;
    Ok(Some(on_disk))
}
