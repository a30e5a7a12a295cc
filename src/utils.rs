//! Utility functions for file operations and disk space

use crate::error::{Error, InstallError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Move a file, falling back to copy + delete across filesystems
///
/// The destination's parent directory is created if needed and an existing
/// destination file is replaced.
pub async fn move_file(source: &Path, destination: &Path) -> Result<()> {
    use tokio::fs;

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            // EXDEV and friends: rename cannot cross mount points
            debug!(
                ?source,
                ?destination,
                error = %rename_err,
                "rename failed, falling back to copy"
            );
            let move_failed = |reason: String| {
                Error::Install(InstallError::MoveFailed {
                    source_path: source.to_path_buf(),
                    dest_path: destination.to_path_buf(),
                    reason,
                })
            };

            let copied = fs::copy(source, destination)
                .await
                .map_err(|e| move_failed(format!("copy after failed rename: {}", e)))?;
            let expected = fs::metadata(source)
                .await
                .map_err(|e| move_failed(e.to_string()))?
                .len();
            if copied != expected {
                let _ = fs::remove_file(destination).await;
                return Err(move_failed(format!(
                    "copied {} of {} bytes",
                    copied, expected
                )));
            }
            fs::remove_file(source)
                .await
                .map_err(|e| move_failed(format!("removing source after copy: {}", e)))?;
            Ok(())
        }
    }
}

/// Remove a file or directory tree, treating a missing path as success
pub async fn remove_path(path: &Path) -> std::io::Result<()> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Size of a file on disk, or 0 when it does not exist
pub async fn file_len(path: &Path) -> std::io::Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Join an archive or listing relative path under `base`, rejecting escapes
///
/// Returns `None` for absolute paths and any path containing `..` or a root or
/// prefix component.
pub fn safe_join(base: &Path, relative: &str) -> Option<PathBuf> {
    use std::path::Component;

    let normalized = relative.replace('\\', "/");
    let mut out = base.to_path_buf();
    let mut pushed = false;
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    pushed.then_some(out)
}

/// Nearest existing ancestor of `path` (the path itself if it exists)
///
/// Used so free space can be measured before the download directory is created.
fn existing_ancestor(path: &Path) -> &Path {
    let mut current = path;
    loop {
        if current.exists() {
            return current;
        }
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => return Path::new("."),
        }
    }
}

/// Get available disk space for a given path
///
/// Returns the space available to unprivileged users on the partition holding
/// `path`, or its nearest existing ancestor.
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    let path = existing_ancestor(path);

    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid, null-terminated C string, stat is zeroed before
        // the call, and it is only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is available blocks for unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is null-terminated and every output pointer refers to a
        // live, aligned u64 that is only read after a successful call.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
