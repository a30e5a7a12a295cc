//! Mirror client: release directory discovery and segment sizing
//!
//! A release lives in `<base_url>/<md5(release_name + "\n")>/`. The directory page
//! is an HTML listing; sub-directories are followed exactly one level. Every
//! candidate is sized with a HEAD request, at most `max_concurrent_heads` at a
//! time. A failed HEAD leaves the size unknown rather than failing discovery.

mod listing;

pub use listing::{ArtifactKind, ListingEntry, parse_listing};

use crate::config::{MirrorConfig, RetryConfig};
use crate::error::{DownloadError, Error, Result};
use crate::retry::download_with_retry;
use futures::StreamExt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// One remote file of a release
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Path relative to the release directory (decoded, `/`-separated)
    pub name: String,
    /// Absolute URL of the file
    pub url: Url,
    /// Size from HEAD `Content-Length`, if the mirror reported one
    pub size: Option<u64>,
}

impl Segment {
    /// File name without any sub-directory
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Classification of this segment
    pub fn kind(&self) -> Option<ArtifactKind> {
        ArtifactKind::of(self.file_name())
    }
}

/// HTTP client for the release mirror
#[derive(Clone)]
pub struct MirrorClient {
    http: reqwest::Client,
    base_url: Url,
    config: MirrorConfig,
    retry: RetryConfig,
}

impl MirrorClient {
    /// Create a client for the configured mirror
    ///
    /// The User-Agent is attached to every request, downloads included.
    pub fn new(config: &MirrorConfig, retry: &RetryConfig) -> Result<Self> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| Error::Config {
            message: format!("invalid mirror base URL '{}': {}", config.base_url, e),
            key: Some("mirror.base_url".to_string()),
        })?;

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            config: config.clone(),
            retry: retry.clone(),
        })
    }

    /// Underlying HTTP client (shared with the segment fetcher)
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// URL of the release directory
    pub fn release_url(&self, release_name: &str) -> Result<Url> {
        let dir = format!("{:x}/", md5::compute(format!("{}\n", release_name)));
        self.base_url
            .join(&dir)
            .map_err(|e| Error::Other(format!("Failed to build release URL: {}", e)))
    }

    /// Discover and size every segment of a release
    ///
    /// Segments come back in listing order. Fails with `MirrorNotFound` when the
    /// release directory is missing and `NoArtifacts` when it holds nothing usable.
    pub async fn list_segments(
        &self,
        release_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Segment>> {
        let root = self.release_url(release_name)?;

        let entries = self.fetch_listing(&root, release_name, cancel).await?;
        let mut files: Vec<(String, Url)> = Vec::new();

        for entry in entries {
            match entry {
                ListingEntry::File { href, name } => {
                    files.push((name, join_href(&root, &href)?));
                }
                ListingEntry::Directory { href, name } => {
                    let sub_url = join_href(&root, &href)?;
                    let sub_entries = self.fetch_listing(&sub_url, release_name, cancel).await?;
                    for sub in sub_entries {
                        // One level only
                        if let ListingEntry::File { href, name: file } = sub {
                            files.push((format!("{}/{}", name, file), join_href(&sub_url, &href)?));
                        }
                    }
                }
            }
        }

        if files.is_empty() {
            return Err(Error::Download(DownloadError::NoArtifacts {
                release: release_name.to_string(),
            }));
        }

        debug!(release = release_name, count = files.len(), "sizing segments");

        let mut sized: Vec<(usize, Segment)> =
            futures::stream::iter(files.into_iter().enumerate().map(|(index, (name, url))| {
                async move {
                    let size = self.head_size(&url, cancel).await;
                    (index, Segment { name, url, size })
                }
            }))
            .buffer_unordered(self.config.max_concurrent_heads.max(1))
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        sized.sort_by_key(|(index, _)| *index);
        let segments: Vec<Segment> = sized.into_iter().map(|(_, s)| s).collect();

        info!(
            release = release_name,
            segments = segments.len(),
            known_bytes = segments.iter().filter_map(|s| s.size).sum::<u64>(),
            "discovered release segments"
        );

        Ok(segments)
    }

    async fn fetch_listing(
        &self,
        url: &Url,
        release_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ListingEntry>> {
        download_with_retry(&self.retry, cancel, || async {
            let request = self
                .http
                .get(url.clone())
                .timeout(self.config.request_timeout)
                .send();
            let response = cancellable(cancel, request).await??;

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(Error::Download(DownloadError::MirrorNotFound {
                    release: release_name.to_string(),
                    url: url.to_string(),
                }));
            }
            if !status.is_success() {
                return Err(Error::Http {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let body = cancellable(cancel, response.text()).await??;
            Ok(parse_listing(&body))
        })
        .await
    }

    async fn head_size(&self, url: &Url, cancel: &CancellationToken) -> Option<u64> {
        let request = self
            .http
            .head(url.clone())
            .timeout(self.config.request_timeout)
            .send();
        match cancellable(cancel, request).await {
            Ok(Ok(response)) if response.status().is_success() => response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok()),
            Ok(Ok(response)) => {
                debug!(url = %url, status = %response.status(), "HEAD failed, size unknown");
                None
            }
            Ok(Err(e)) => {
                debug!(url = %url, error = %e, "HEAD failed, size unknown");
                None
            }
            Err(_) => None,
        }
    }
}

fn join_href(base: &Url, href: &str) -> Result<Url> {
    base.join(href)
        .map_err(|e| Error::Other(format!("Invalid listing href '{}': {}", href, e)))
}

/// Race a future against cancellation
pub(crate) async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}
