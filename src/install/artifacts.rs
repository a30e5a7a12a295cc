//! Locating, ordering, placing and verifying extracted artifacts

use crate::error::{Error, InstallError, Result};
use crate::extraction::collect_files;
use crate::mirror::ArtifactKind;
use std::cmp::Ordering;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

fn kind_of(path: &Path) -> Option<ArtifactKind> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(ArtifactKind::of)
}

/// Find the package to install under `dir`
///
/// When several packages are present the largest one wins.
pub fn find_package(dir: &Path) -> Result<PathBuf> {
    let mut packages: Vec<(u64, PathBuf)> = collect_files(dir)?
        .into_iter()
        .filter(|p| kind_of(p) == Some(ArtifactKind::Package))
        .map(|p| (std::fs::metadata(&p).map(|m| m.len()).unwrap_or(0), p))
        .collect();

    if packages.is_empty() {
        return Err(InstallError::NoPackage {
            dir: dir.to_path_buf(),
        }
        .into());
    }
    if packages.len() > 1 {
        warn!(
            ?dir,
            count = packages.len(),
            "multiple packages found, installing the largest"
        );
    }

    packages.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(packages.swap_remove(0).1)
}

/// Find expansion files under `dir`, in installation order
pub fn find_expansions(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut obbs: Vec<PathBuf> = collect_files(dir)?
        .into_iter()
        .filter(|p| kind_of(p) == Some(ArtifactKind::Expansion))
        .collect();
    obbs.sort_by(|a, b| {
        let name_a = a.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let name_b = b.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        compare_expansion_names(name_a, name_b)
    });
    Ok(obbs)
}

/// Natural order of expansion file names
///
/// `main` before `patch` before anything else, then numeric version ascending,
/// then name: `main.2.pkg.obb < main.10.pkg.obb < patch.2.pkg.obb`.
pub fn compare_expansion_names(a: &str, b: &str) -> Ordering {
    fn key(name: &str) -> (u8, u64, String) {
        let lower = name.to_ascii_lowercase();
        let mut parts = lower.split('.');
        let variant = match parts.next() {
            Some("main") => 0,
            Some("patch") => 1,
            _ => 2,
        };
        let version = parts
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(u64::MAX);
        (variant, version, lower)
    }
    key(a).cmp(&key(b))
}

/// Move expansion files into `<obb_root>/<package_name>/`
pub async fn place_expansions(
    obbs: &[PathBuf],
    obb_root: &Path,
    package_name: &str,
) -> Result<Vec<PathBuf>> {
    let target_dir = obb_root.join(package_name);
    tokio::fs::create_dir_all(&target_dir).await?;

    let mut placed = Vec::with_capacity(obbs.len());
    for obb in obbs {
        let Some(file_name) = obb.file_name() else {
            continue;
        };
        let target = target_dir.join(file_name);
        crate::utils::move_file(obb, &target).await?;
        debug!(?target, "placed expansion file");
        placed.push(target);
    }
    Ok(placed)
}

/// Path a package is staged at: unique per target package and release
pub fn staged_package_path(staging_dir: &Path, package_name: &str, release_hash: &str) -> PathBuf {
    staging_dir.join(format!("{}-{}.apk", package_name, release_hash))
}

/// Move the package to its staging path
pub async fn stage_package(
    package: &Path,
    staging_dir: &Path,
    package_name: &str,
    release_hash: &str,
) -> Result<PathBuf> {
    let target = staged_package_path(staging_dir, package_name, release_hash);
    crate::utils::move_file(package, &target).await?;
    Ok(target)
}

/// Check that a staged package is structurally valid before installing it
///
/// The file must be non-empty, open as a ZIP with a manifest entry, and, when
/// `expected_package` is given, the manifest must carry that identifier in
/// UTF-16LE or UTF-8.
pub async fn verify_package(path: &Path, expected_package: Option<&str>) -> Result<()> {
    let len = tokio::fs::metadata(path).await?.len();
    if len == 0 {
        return Err(InstallError::EmptyPackage {
            path: path.to_path_buf(),
        }
        .into());
    }

    let owned_path = path.to_path_buf();
    let expected = expected_package
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    tokio::task::spawn_blocking(move || verify_package_blocking(&owned_path, expected.as_deref()))
        .await
        .map_err(|e| Error::Other(format!("package verification task panicked: {}", e)))?
}

fn verify_package_blocking(path: &Path, expected_package: Option<&str>) -> Result<()> {
    let invalid = |reason: String| -> Error {
        InstallError::InvalidPackage {
            path: path.to_path_buf(),
            reason,
        }
        .into()
    };

    let file = std::fs::File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| invalid(format!("not a zip archive: {}", e)))?;
    let mut manifest = archive
        .by_name(MANIFEST_ENTRY)
        .map_err(|_| invalid(format!("missing {}", MANIFEST_ENTRY)))?;

    let mut bytes = Vec::new();
    manifest
        .read_to_end(&mut bytes)
        .map_err(|e| invalid(format!("unreadable {}: {}", MANIFEST_ENTRY, e)))?;

    if let Some(expected) = expected_package
        && !manifest_declares(&bytes, expected)
    {
        return Err(InstallError::PackageMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
        }
        .into());
    }

    Ok(())
}

/// Whether manifest bytes contain `package` as UTF-16LE (binary XML) or UTF-8 text
pub fn manifest_declares(manifest: &[u8], package: &str) -> bool {
    let utf8 = package.as_bytes();
    let utf16: Vec<u8> = package.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    contains(manifest, utf8) || contains(manifest, &utf16)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
