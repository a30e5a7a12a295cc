use crate::error::{Error, ExtractError, Result};
use crate::utils::safe_join;
use sevenz_rust::{Password, SevenZReader};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::password_list::PasswordList;
use super::shared::{StageProgress, is_installable_entry};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Selective extractor for 7z containers
///
/// Only package and expansion entries are written to disk; every other entry is
/// decoded and discarded so the solid stream stays in sync.
pub struct SevenZipExtractor;

impl SevenZipExtractor {
    /// Try to extract an archive with a single password
    ///
    /// Blocking; run on a blocking thread. Returns the written files.
    pub fn try_extract(
        archive_path: &Path,
        password: &str,
        dest_path: &Path,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        debug!(
            ?archive_path,
            password_length = password.len(),
            ?dest_path,
            "attempting 7z extraction"
        );

        std::fs::create_dir_all(dest_path).map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "failed to create destination: {}",
                e
            )))
        })?;

        let pw = if password.is_empty() {
            Password::empty()
        } else {
            Password::from(password)
        };
        let mut reader = SevenZReader::open(archive_path, pw)
            .map_err(|e| classify_archive_error(archive_path, &e.to_string()))?;

        let total: u64 = reader
            .archive()
            .files
            .iter()
            .filter(|f| !f.is_directory() && is_installable_entry(f.name()))
            .map(|f| f.size())
            .sum();
        progress.reset();
        progress.set_total(total);

        let mut extracted = Vec::new();
        let mut failure: Option<Error> = None;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

        let result = reader.for_each_entries(|entry, data| {
            if cancel.is_cancelled() {
                failure = Some(Error::Cancelled);
                return Ok(false);
            }
            if entry.is_directory() {
                return Ok(true);
            }

            let target = if is_installable_entry(entry.name()) {
                match safe_join(dest_path, entry.name()) {
                    Some(path) => Some(path),
                    None => {
                        failure = Some(Error::Extract(ExtractError::PathTraversal {
                            entry: entry.name().to_string(),
                        }));
                        return Ok(false);
                    }
                }
            } else {
                None
            };

            // Tracked before writing so a partial file is discarded too
            if let Some(path) = &target {
                extracted.push(path.clone());
            }
            match copy_entry(data, target.as_deref(), &mut buffer, progress, cancel) {
                Ok(()) => Ok(true),
                Err(e) => {
                    failure = Some(e);
                    Ok(false)
                }
            }
        });

        let outcome = match failure {
            Some(Error::Io(io)) => Err(classify_archive_error(archive_path, &io.to_string())),
            Some(other) => Err(other),
            None => result
                .map(|_| ())
                .map_err(|e| classify_archive_error(archive_path, &e.to_string())),
        };
        if let Err(e) = outcome {
            discard_written(&extracted);
            return Err(e);
        }

        if extracted.is_empty() {
            return Err(Error::Extract(ExtractError::NoInstallableEntries {
                archive: archive_path.to_path_buf(),
            }));
        }

        info!(
            ?archive_path,
            extracted_count = extracted.len(),
            "7z extraction successful"
        );
        Ok(extracted)
    }

    /// Extract an archive, trying each password in order on a blocking thread
    pub async fn extract_with_passwords(
        archive_path: &Path,
        dest_path: &Path,
        passwords: &PasswordList,
        progress: Arc<StageProgress>,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        if passwords.is_empty() {
            warn!(?archive_path, "no passwords configured, trying without one");
        }
        let candidates: Vec<String> = if passwords.is_empty() {
            vec![String::new()]
        } else {
            passwords.iter().cloned().collect()
        };

        for (i, password) in candidates.iter().enumerate() {
            let archive_owned = archive_path.to_path_buf();
            let dest_owned = dest_path.to_path_buf();
            let password_owned = password.clone();
            let progress = progress.clone();
            let cancel_owned = cancel.clone();

            let result = spawn_blocking(move || {
                Self::try_extract(
                    &archive_owned,
                    &password_owned,
                    &dest_owned,
                    &progress,
                    &cancel_owned,
                )
            })
            .await
            .map_err(|e| {
                Error::Extract(ExtractError::ExtractionFailed {
                    archive: archive_path.to_path_buf(),
                    reason: format!("extraction task panicked: {}", e),
                })
            })?;

            match result {
                Ok(files) => {
                    info!(
                        ?archive_path,
                        attempt = i + 1,
                        "7z extraction successful on attempt {}/{}",
                        i + 1,
                        candidates.len()
                    );
                    return Ok(files);
                }
                Err(Error::Extract(ExtractError::WrongPassword { .. }))
                    if i + 1 < candidates.len() =>
                {
                    debug!(attempt = i + 1, "wrong password, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Extract(ExtractError::WrongPassword {
            archive: archive_path.to_path_buf(),
        }))
    }
}

fn copy_entry(
    data: &mut dyn Read,
    target: Option<&Path>,
    buffer: &mut [u8],
    progress: &StageProgress,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut sink: Box<dyn Write> = match target {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Box::new(std::io::BufWriter::new(std::fs::File::create(path)?))
        }
        None => Box::new(std::io::sink()),
    };

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let n = match data.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        };
        sink.write_all(&buffer[..n])?;
        if target.is_some() {
            progress.add(n as u64);
        }
    }
    sink.flush()?;
    Ok(())
}

/// Map a decoder failure to a wrong-password or generic extraction error
///
/// With AES the decoder only sees garbage on a wrong key, so data-integrity
/// failures are treated as a password mismatch.
fn classify_archive_error(archive_path: &Path, message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("password")
        || lower.contains("checksum")
        || lower.contains("crc")
        || lower.contains("invalid data")
        || lower.contains("corrupt")
    {
        Error::Extract(ExtractError::WrongPassword {
            archive: archive_path.to_path_buf(),
        })
    } else {
        Error::Extract(ExtractError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to extract 7z archive: {}", message),
        })
    }
}

/// Remove the files a failed attempt wrote, leaving the rest of the directory alone
fn discard_written(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(?path, error = %e, "failed to discard partially extracted file"),
        }
    }
}
