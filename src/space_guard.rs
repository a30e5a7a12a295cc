//! Pre-download free-space check
//!
//! The estimate is the sum of known segment sizes times a multiplier that depends
//! on how much scratch space the rest of the pipeline needs:
//! - archive, downloads retained after install: `retained_archive_multiplier`
//! - archive, downloads deleted after merge: `archive_multiplier`
//! - uncompressed release (no merge, no extraction): `uncompressed_multiplier`
//!
//! When no segment size is known, `unknown_size_fallback` is used instead of the sum.

use crate::config::DiskSpaceConfig;
use crate::error::{Error, Result};
use crate::mirror::Segment;
use std::path::Path;
use tracing::debug;

/// Space requirement computed for a release
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpaceEstimate {
    /// Sum of known segment sizes, or the fallback when none is known
    pub payload_bytes: u64,
    /// Multiplier applied to the payload
    pub multiplier: f64,
    /// Bytes that must be free, headroom included
    pub required: u64,
}

/// Whether every segment is an already-uncompressed artifact
pub fn is_uncompressed_release(segments: &[Segment]) -> bool {
    !segments.is_empty()
        && segments
            .iter()
            .all(|s| s.kind().is_some_and(|k| k.is_uncompressed()))
}

/// Compute the space requirement for a release
///
/// `retained` is true when the downloaded segments are kept after the task
/// finishes (download-only tasks, or `install.keep_downloads`).
pub fn estimate(segments: &[Segment], retained: bool, config: &DiskSpaceConfig) -> SpaceEstimate {
    let known: Vec<u64> = segments.iter().filter_map(|s| s.size).collect();
    let payload_bytes = if known.is_empty() {
        config.unknown_size_fallback
    } else {
        known.iter().sum()
    };

    let multiplier = if is_uncompressed_release(segments) {
        config.uncompressed_multiplier
    } else if retained {
        config.retained_archive_multiplier
    } else {
        config.archive_multiplier
    };

    let required = ((payload_bytes as f64) * multiplier).ceil() as u64;
    SpaceEstimate {
        payload_bytes,
        multiplier,
        required: required.saturating_add(config.min_free_space),
    }
}

/// Compare an estimate against the bytes available
pub fn ensure_fits(estimate: &SpaceEstimate, available: u64) -> Result<()> {
    if available < estimate.required {
        return Err(Error::InsufficientSpace {
            required: estimate.required,
            available,
        });
    }
    Ok(())
}

/// Check that the partition holding `download_dir` can take the release
///
/// Returns the estimate when the check passes or is disabled.
pub fn check(
    segments: &[Segment],
    retained: bool,
    config: &DiskSpaceConfig,
    download_dir: &Path,
) -> Result<Option<SpaceEstimate>> {
    if !config.enabled {
        return Ok(None);
    }

    let estimate = estimate(segments, retained, config);
    let available = crate::utils::get_available_space(download_dir).map_err(|e| {
        Error::DiskSpaceCheckFailed(format!(
            "Failed to check disk space for '{}': {}",
            download_dir.display(),
            e
        ))
    })?;

    debug!(
        required = estimate.required,
        available,
        multiplier = estimate.multiplier,
        "disk space check"
    );

    ensure_fits(&estimate, available)?;
    Ok(Some(estimate))
}
