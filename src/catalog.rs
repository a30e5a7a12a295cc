//! Release catalog collaborator
//!
//! The host application owns catalog ingestion. The pipeline only needs to map a
//! release identifier to its package name and declared size.

use crate::types::ReleaseId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// One catalog row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Release name; also names the mirror directory
    pub release_name: String,
    /// Package identifier of the installable artifact (e.g. "com.example.game")
    pub package_name: String,
    /// Size declared by the catalog, in bytes
    pub declared_size: Option<u64>,
    /// Version code of the release
    pub version_code: Option<i64>,
}

/// Read-only lookup of releases
pub trait Catalog: Send + Sync {
    /// Find the entry for a release
    fn lookup(&self, id: &ReleaseId) -> Option<CatalogEntry>;
}

/// In-memory catalog keyed by release name
#[derive(Default)]
pub struct StaticCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl StaticCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from entries
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let catalog = Self::new();
        for entry in entries {
            catalog.insert(entry);
        }
        catalog
    }

    /// Add or replace an entry
    pub fn insert(&self, entry: CatalogEntry) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(entry.release_name.clone(), entry);
    }
}

impl Catalog for StaticCatalog {
    fn lookup(&self, id: &ReleaseId) -> Option<CatalogEntry> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(id.as_str()).cloned()
    }
}
