//! HTML directory listing parsing and artifact name classification.

use regex::Regex;
use std::sync::LazyLock;

static HREF_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#));

static PART_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?i)\.7z\.(\d+)$"));

/// Kind of file a remote or local name refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Installable package (`.apk`)
    Package,
    /// Expansion data (`.obb`)
    Expansion,
    /// Single, unsplit archive (`.7z`)
    Archive,
    /// Numbered part of a split archive (`.7z.001`), carrying its part number
    ArchivePart(u32),
}

impl ArtifactKind {
    /// Classify a file name; `None` for anything the pipeline ignores
    pub fn of(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".apk") {
            return Some(ArtifactKind::Package);
        }
        if lower.ends_with(".obb") {
            return Some(ArtifactKind::Expansion);
        }
        if lower.ends_with(".7z") {
            return Some(ArtifactKind::Archive);
        }
        let re = PART_RE.as_ref().ok()?;
        let caps = re.captures(&lower)?;
        caps.get(1)?.as_str().parse().ok().map(ArtifactKind::ArchivePart)
    }

    /// Package or expansion data, shipped without an archive
    pub fn is_uncompressed(&self) -> bool {
        matches!(self, ArtifactKind::Package | ArtifactKind::Expansion)
    }
}

/// One usable anchor from a listing page
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListingEntry {
    /// Sub-directory (href ends in `/`)
    Directory {
        /// Href as it appears in the page, used to build URLs
        href: String,
        /// Percent-decoded name without the trailing slash
        name: String,
    },
    /// File whose name is an artifact
    File {
        /// Href as it appears in the page, used to build URLs
        href: String,
        /// Percent-decoded name
        name: String,
    },
}

/// Extract usable entries from an HTML directory listing
///
/// Parent links, query links, absolute links, hidden entries and files that are
/// not artifacts are skipped. Duplicate hrefs are reported once.
pub fn parse_listing(html: &str) -> Vec<ListingEntry> {
    let Ok(re) = HREF_RE.as_ref() else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut entries = Vec::new();

    for caps in re.captures_iter(html) {
        let Some(href) = caps.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        if href.is_empty()
            || href.contains('?')
            || href.starts_with('#')
            || href.starts_with('/')
            || href.contains("://")
            || href.starts_with("mailto:")
        {
            continue;
        }
        let Ok(decoded) = urlencoding::decode(href) else {
            continue;
        };
        let decoded = decoded.into_owned();
        if decoded.starts_with('.') || decoded.contains("../") || decoded == ".." {
            continue;
        }
        if !seen.insert(href.to_string()) {
            continue;
        }

        if let Some(dir) = decoded.strip_suffix('/') {
            if dir.is_empty() || dir.contains('/') {
                continue;
            }
            entries.push(ListingEntry::Directory {
                href: href.to_string(),
                name: dir.to_string(),
            });
        } else if !decoded.contains('/') && ArtifactKind::of(&decoded).is_some() {
            entries.push(ListingEntry::File {
                href: href.to_string(),
                name: decoded,
            });
        }
    }

    entries
}
