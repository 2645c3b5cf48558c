//! The project's dependency manifest: a flat list of id/version pairs.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::package::PackageIdentifier;
use crate::runtime::Runtime;
use crate::version::SemVersion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub version: String,
}

impl ManifestEntry {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }

    pub fn identifier(&self) -> Result<PackageIdentifier> {
        PackageIdentifier::new(&self.id, Some(&self.version))
            .with_context(|| format!("Invalid manifest entry {} {}", self.id, self.version))
    }
}

/// Add/remove/load/save contract of the dependency manifest.
#[cfg_attr(test, mockall::automock)]
pub trait ManifestStore: Send + Sync {
    fn load(&mut self) -> Result<()>;
    fn save(&self) -> Result<()>;
    fn entries(&self) -> Vec<ManifestEntry>;
    /// Add an entry, replacing any other version of the same id.
    fn add(&mut self, entry: ManifestEntry);
    /// Remove every entry with `id`; true when something was removed.
    fn remove(&mut self, id: &str) -> bool;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PackagesDocument {
    #[serde(default)]
    packages: Vec<ManifestEntry>,
}

/// JSON manifest (`packages.json`) stored through the runtime.
pub struct PackagesFile<R: Runtime> {
    runtime: Arc<R>,
    path: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl<R: Runtime> PackagesFile<R> {
    pub fn new(runtime: Arc<R>, path: &Path) -> Self {
        Self {
            runtime,
            path: path.to_path_buf(),
            entries: Vec::new(),
        }
    }

    /// Open and load `path`; a missing file is an empty manifest.
    pub fn open(runtime: Arc<R>, path: &Path) -> Result<Self> {
        let mut file = Self::new(runtime, path);
        file.load()?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sorted(&self) -> Vec<ManifestEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| {
            a.id.to_lowercase().cmp(&b.id.to_lowercase()).then_with(|| {
                match (SemVersion::parse(&a.version), SemVersion::parse(&b.version)) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => a.version.cmp(&b.version),
                }
            })
        });
        entries
    }
}

impl<R: Runtime> ManifestStore for PackagesFile<R> {
    #[tracing::instrument(skip(self), fields(path = ?self.path))]
    fn load(&mut self) -> Result<()> {
        if !self.runtime.exists(&self.path) {
            debug!("No manifest at {:?}", self.path);
            self.entries.clear();
            return Ok(());
        }
        let content = self.runtime.read_to_string(&self.path)?;
        let document: PackagesDocument = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest {:?}", self.path))?;
        self.entries = document.packages;
        Ok(())
    }

    /// Write sorted by id then version, through a temporary file.
    #[tracing::instrument(skip(self), fields(path = ?self.path))]
    fn save(&self) -> Result<()> {
        let document = PackagesDocument {
            packages: self.sorted(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        if let Some(parent) = self.path.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        self.runtime.write(&tmp, json.as_bytes())?;
        self.runtime.rename(&tmp, &self.path)?;
        debug!("Saved {} manifest entries", document.packages.len());
        Ok(())
    }

    fn entries(&self) -> Vec<ManifestEntry> {
        self.entries.clone()
    }

    fn add(&mut self, entry: ManifestEntry) {
        self.entries.retain(|e| !e.id.eq_ignore_ascii_case(&entry.id));
        self.entries.push(entry);
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.id.eq_ignore_ascii_case(id));
        self.entries.len() != before
    }
}
