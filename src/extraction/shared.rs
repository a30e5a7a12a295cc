use crate::error::{Error, Result};
use crate::mirror::ArtifactKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Byte counters shared between a blocking stage and its progress reporter
#[derive(Debug, Default)]
pub struct StageProgress {
    done: AtomicU64,
    total: AtomicU64,
}

impl StageProgress {
    /// Create a counter with nothing done
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total amount of work
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Record finished work
    pub fn add(&self, amount: u64) {
        self.done.fetch_add(amount, Ordering::Relaxed);
    }

    /// Forget finished work (a failed password attempt)
    pub fn reset(&self) {
        self.done.store(0, Ordering::Relaxed);
    }

    /// Fraction of the stage that is done, in `0.0..=1.0`
    pub fn fraction(&self) -> f32 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let done = self.done.load(Ordering::Relaxed).min(total);
        (done as f64 / total as f64) as f32
    }
}

/// Whether an archive entry name is materialized on extraction
pub fn is_installable_entry(name: &str) -> bool {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    ArtifactKind::of(file).is_some_and(|k| k.is_uncompressed())
}

/// Recursively collect all files (not directories) under a directory, sorted
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    fn visit_dir(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "failed to read directory {}: {}",
                dir.display(),
                e
            )))
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                visit_dir(&path, files)?;
            } else {
                files.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    if dir.exists() {
        visit_dir(dir, &mut files)?;
    }
    files.sort();
    Ok(files)
}
