//! Resumable segment transfer
//!
//! Each segment is fetched with `Range: bytes=<local length>-`. A 206 reply is
//! appended to the partial file, a 200 reply replaces it from byte 0. A 416 reply
//! is checked against the declared total: a match means the file is already
//! complete, a mismatch means the local file is corrupt and is restarted from zero
//! a bounded number of times. A server that goes silent for longer than the read
//! timeout, before or during the body, fails the attempt as retryable.

use crate::config::RetryConfig;
use crate::error::{DownloadError, Error, Result};
use crate::mirror::{Segment, cancellable};
use crate::retry::download_with_retry;
use crate::utils::file_len;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use std::path::Path;
use std::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delete-and-restart attempts allowed after a 416 size mismatch
pub const MAX_CORRECTIVE_RESTARTS: u32 = 3;

/// How a segment transfer finished
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The server confirmed the local file already holds the whole segment
    AlreadyComplete {
        /// Final file size
        size: u64,
    },
    /// Bytes were appended to an existing partial file
    Resumed {
        /// Local length before the transfer
        from: u64,
        /// Final file size
        size: u64,
    },
    /// The file was written from byte 0
    Restarted {
        /// Final file size
        size: u64,
    },
}

impl FetchOutcome {
    /// Size of the segment on disk after the transfer
    pub fn size(&self) -> u64 {
        match *self {
            FetchOutcome::AlreadyComplete { size }
            | FetchOutcome::Resumed { size, .. }
            | FetchOutcome::Restarted { size } => size,
        }
    }
}

/// Downloads segments with range resume, retry and cancellation
#[derive(Clone)]
pub struct SegmentFetcher {
    http: reqwest::Client,
    retry: RetryConfig,
    buffer_size: usize,
    read_timeout: Duration,
}

enum Attempt {
    Done(FetchOutcome),
    Restart { local: u64, declared: Option<u64> },
}

impl SegmentFetcher {
    /// Create a fetcher sharing the mirror's HTTP client
    ///
    /// `read_timeout` bounds the wait for response headers and for each body chunk.
    pub fn new(
        http: reqwest::Client,
        retry: RetryConfig,
        buffer_size: usize,
        read_timeout: Duration,
    ) -> Self {
        Self {
            http,
            retry,
            buffer_size: buffer_size.max(1),
            read_timeout,
        }
    }

    fn stalled(&self, segment: &Segment) -> Error {
        Error::Download(DownloadError::Stalled {
            segment: segment.name.clone(),
            idle: self.read_timeout,
        })
    }

    /// Fetch one segment into `dest`, resuming from whatever is already on disk
    ///
    /// `progress` holds the bytes-on-disk total for the whole release; it is
    /// adjusted as this segment's file grows, shrinks or is truncated.
    pub async fn fetch(
        &self,
        segment: &Segment,
        dest: &Path,
        progress: &AtomicU64,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut restarts = 0u32;
        loop {
            let attempt = download_with_retry(&self.retry, cancel, || {
                self.attempt(segment, dest, progress, cancel)
            })
            .await?;

            match attempt {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Restart { local, declared } => {
                    restarts += 1;
                    if restarts > MAX_CORRECTIVE_RESTARTS {
                        return Err(Error::Download(DownloadError::CorruptSegment {
                            segment: segment.name.clone(),
                            local,
                            declared,
                            attempts: MAX_CORRECTIVE_RESTARTS,
                        }));
                    }
                    warn!(
                        segment = %segment.name,
                        local,
                        declared = ?declared,
                        restart = restarts,
                        "local segment disagrees with server size, restarting from zero"
                    );
                    crate::utils::remove_path(dest).await?;
                    saturating_sub(progress, local);
                }
            }
        }
    }

    async fn attempt(
        &self,
        segment: &Segment,
        dest: &Path,
        progress: &AtomicU64,
        cancel: &CancellationToken,
    ) -> Result<Attempt> {
        let existing = file_len(dest).await?;

        let request = self
            .http
            .get(segment.url.clone())
            .header(RANGE, format!("bytes={}-", existing))
            .send();
        let mut response =
            match cancellable(cancel, tokio::time::timeout(self.read_timeout, request)).await? {
                Ok(sent) => sent?,
                Err(_) => return Err(self.stalled(segment)),
            };
        let status = response.status();

        let append = match status {
            StatusCode::PARTIAL_CONTENT => true,
            StatusCode::OK => false,
            StatusCode::RANGE_NOT_SATISFIABLE => {
                let declared = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range_total);
                if declared == Some(existing) {
                    debug!(segment = %segment.name, size = existing, "segment already complete");
                    return Ok(Attempt::Done(FetchOutcome::AlreadyComplete { size: existing }));
                }
                return Ok(Attempt::Restart {
                    local: existing,
                    declared,
                });
            }
            other => {
                return Err(Error::Http {
                    status: other.as_u16(),
                    url: segment.url.to_string(),
                });
            }
        };

        let expected = response.content_length();
        let file = if append {
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dest)
                .await?
        } else {
            if existing > 0 {
                info!(
                    segment = %segment.name,
                    discarded = existing,
                    "server ignored range request, rewriting segment from zero"
                );
            }
            let file = tokio::fs::File::create(dest).await?;
            saturating_sub(progress, existing);
            file
        };
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);

        let mut received = 0u64;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    writer.flush().await?;
                    return Err(Error::Cancelled);
                }
                chunk = tokio::time::timeout(self.read_timeout, response.chunk()) => match chunk {
                    Ok(chunk) => chunk?,
                    Err(_) => {
                        // Keep what arrived; the retry resumes after it
                        writer.flush().await?;
                        writer.get_ref().sync_all().await?;
                        warn!(segment = %segment.name, received, "transfer stalled");
                        return Err(self.stalled(segment));
                    }
                },
            };
            let Some(chunk) = chunk else { break };
            writer.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        if let Some(expected) = expected
            && received < expected
        {
            return Err(Error::Download(DownloadError::Truncated {
                segment: segment.name.clone(),
                expected,
                received,
            }));
        }

        let size = if append { existing + received } else { received };
        Ok(Attempt::Done(if append && existing > 0 {
            FetchOutcome::Resumed {
                from: existing,
                size,
            }
        } else {
            FetchOutcome::Restarted { size }
        }))
    }
}

fn saturating_sub(counter: &AtomicU64, amount: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(amount))
    });
}

/// Total length from a `Content-Range` header (`bytes */5000`, `bytes 0-9/5000`)
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}
