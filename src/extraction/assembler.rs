//! Multi-part archive reassembly
//!
//! Parts are concatenated in numeric suffix order (`.7z.1 < .7z.2 < .7z.10`) into a
//! single `.7z` container next to them. Parts are streamed through a fixed buffer.

use crate::error::{Error, ExtractError, Result};
use crate::mirror::ArtifactKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::shared::StageProgress;

const MERGE_BUFFER_SIZE: usize = 64 * 1024;

/// Local files that make up one archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveSource {
    /// Unsplit `.7z`, used in place
    Single(PathBuf),
    /// Numbered parts, sorted by part number
    Split {
        /// Container path the parts merge into
        container: PathBuf,
        /// Parts in merge order
        parts: Vec<PathBuf>,
    },
}

impl ArchiveSource {
    /// Path of the container once assembled
    pub fn container(&self) -> &Path {
        match self {
            ArchiveSource::Single(path) => path,
            ArchiveSource::Split { container, .. } => container,
        }
    }
}

/// Group archive files found among `files` into their archives
///
/// Parts sharing a base name (`game.7z.001`, `game.7z.002`) form one split archive.
/// Non-archive files are ignored.
pub fn plan_archives(files: &[PathBuf]) -> Vec<ArchiveSource> {
    let mut singles = Vec::new();
    let mut groups: BTreeMap<PathBuf, Vec<(u32, PathBuf)>> = BTreeMap::new();

    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match ArtifactKind::of(name) {
            Some(ArtifactKind::Archive) => singles.push(ArchiveSource::Single(path.clone())),
            Some(ArtifactKind::ArchivePart(number)) => {
                // Strip the numeric suffix: "game.7z.001" -> "game.7z"
                let container_name = match name.rfind('.') {
                    Some(idx) => &name[..idx],
                    None => name,
                };
                let container = path.with_file_name(container_name);
                groups
                    .entry(container)
                    .or_default()
                    .push((number, path.clone()));
            }
            _ => {}
        }
    }

    let mut plans = singles;
    for (container, mut parts) in groups {
        parts.sort_by_key(|(number, _)| *number);
        plans.push(ArchiveSource::Split {
            container,
            parts: parts.into_iter().map(|(_, p)| p).collect(),
        });
    }
    plans
}

/// Merge the parts of a split archive into its container
///
/// A single archive is returned unchanged. Unless `retain_parts` is set, the parts
/// are deleted once the container is complete.
pub async fn assemble(
    source: &ArchiveSource,
    retain_parts: bool,
    progress: &StageProgress,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let (container, parts) = match source {
        ArchiveSource::Single(path) => {
            debug!(?path, "single archive, no assembly needed");
            progress.set_total(1);
            progress.add(1);
            return Ok(path.clone());
        }
        ArchiveSource::Split { container, parts } => (container, parts),
    };

    let mut total = 0u64;
    for part in parts {
        let meta = tokio::fs::metadata(part).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Extract(ExtractError::MissingPart { path: part.clone() })
            } else {
                Error::Io(e)
            }
        })?;
        total += meta.len();
    }
    progress.reset();
    progress.set_total(total);

    info!(?container, parts = parts.len(), bytes = total, "merging archive parts");

    let out = tokio::fs::File::create(container).await?;
    let mut writer = BufWriter::with_capacity(MERGE_BUFFER_SIZE, out);
    let mut buffer = vec![0u8; MERGE_BUFFER_SIZE];

    for part in parts {
        let mut input = tokio::fs::File::open(part).await?;
        loop {
            if cancel.is_cancelled() {
                writer.flush().await?;
                return Err(Error::Cancelled);
            }
            let n = input.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n]).await?;
            progress.add(n as u64);
        }
    }
    writer.flush().await?;
    writer.get_ref().sync_all().await?;

    if !retain_parts {
        for part in parts {
            crate::utils::remove_path(part).await?;
        }
        debug!(?container, "removed merged parts");
    }

    Ok(container.clone())
}
