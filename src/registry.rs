//! In-memory index of installed packages.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::Path;

use crate::archive::read_nuspec;
use crate::package::{ARCHIVE_EXTENSION, MANIFEST_EXTENSION, Nuspec, Package, PackageLocation};
use crate::runtime::Runtime;

/// At most one installed package per id, keyed by lower-cased id.
#[derive(Debug, Default, Clone)]
pub struct InstalledRegistry {
    packages: BTreeMap<String, Package>,
}

impl InstalledRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with what is installed under `root`.
    ///
    /// Every directory of `root` is inspected: an archived package wins over a
    /// loose manifest. Unreadable entries are logged and skipped. The registry
    /// is only replaced once the whole scan has finished.
    #[tracing::instrument(skip(self, runtime))]
    pub fn rebuild<R: Runtime>(&mut self, runtime: &R, root: &Path) -> Result<()> {
        let mut packages = BTreeMap::new();

        if runtime.exists(root) {
            let entries = runtime
                .read_dir(root)
                .with_context(|| format!("Failed to scan install root {:?}", root))?;
            for dir in entries.into_iter().filter(|p| runtime.is_dir(p)) {
                match Self::scan_package_dir(runtime, &dir) {
                    Ok(Some(package)) => {
                        debug!("Found installed {} in {:?}", package, dir);
                        if let Some(previous) = packages.insert(package.identifier.key(), package) {
                            warn!(
                                "Several versions of {} are installed; keeping the last one scanned",
                                previous.id()
                            );
                        }
                    }
                    Ok(None) => debug!("No package marker in {:?}", dir),
                    Err(e) => warn!("Skipping {:?}: {:#}", dir, e),
                }
            }
        } else {
            debug!("Install root {:?} does not exist yet", root);
        }

        self.packages = packages;
        Ok(())
    }

    fn scan_package_dir<R: Runtime>(runtime: &R, dir: &Path) -> Result<Option<Package>> {
        let files = runtime.read_dir(dir)?;
        let with_extension = |ext: &str| {
            files.iter().find(|p| {
                !runtime.is_dir(p)
                    && p.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext))
            })
        };

        if let Some(archive) = with_extension(ARCHIVE_EXTENSION) {
            let package = Package::from_nuspec(read_nuspec(runtime, archive)?)?;
            return Ok(Some(package.with_location(PackageLocation::Local(archive.clone()))));
        }
        if let Some(manifest) = with_extension(MANIFEST_EXTENSION) {
            let xml = runtime.read_to_string(manifest)?;
            let nuspec = Nuspec::parse(&xml)
                .with_context(|| format!("Invalid manifest {:?}", manifest))?;
            return Ok(Some(Package::from_nuspec(nuspec)?));
        }
        Ok(None)
    }

    pub fn add(&mut self, package: Package) {
        self.packages.insert(package.identifier.key(), package);
    }

    pub fn remove(&mut self, id: &str) -> Option<Package> {
        self.packages.remove(&id.to_ascii_lowercase())
    }

    pub fn get(&self, id: &str) -> Option<&Package> {
        self.packages.get(&id.to_ascii_lowercase())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.packages.contains_key(&id.to_ascii_lowercase())
    }

    /// Installed packages sorted by id.
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn clear(&mut self) {
        self.packages.clear();
    }
}
