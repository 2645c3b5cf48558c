//! Directory feed.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::read_nuspec;
use crate::credential::Credential;
use crate::package::{ARCHIVE_EXTENSION, Package, PackageIdentifier, PackageLocation};
use crate::runtime::Runtime;

use super::{
    PackageSource, SearchQuery, UpdateOptions, newer_versions, select_version, source_ref,
    supports_frameworks,
};

/// A feed backed by a directory holding `<dir>/*.nupkg` or
/// `<dir>/<id>/<version>/*.nupkg`.
pub struct LocalSource<R: Runtime> {
    runtime: Arc<R>,
    name: String,
    url: String,
    dir: PathBuf,
}

impl<R: Runtime> LocalSource<R> {
    pub fn new(runtime: Arc<R>, name: &str, dir: &Path) -> Self {
        Self {
            runtime,
            name: name.to_string(),
            url: dir.to_string_lossy().into_owned(),
            dir: dir.to_path_buf(),
        }
    }

    fn is_archive(&self, path: &Path) -> bool {
        !self.runtime.is_dir(path)
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
    }

    fn archive_paths(&self) -> Vec<PathBuf> {
        let mut archives = Vec::new();
        let Ok(entries) = self.runtime.read_dir(&self.dir) else {
            warn!("Local source {} at {:?} is not readable", self.name, self.dir);
            return archives;
        };

        for entry in entries {
            if self.is_archive(&entry) {
                archives.push(entry);
            } else if self.runtime.is_dir(&entry) {
                // <id>/<version>/*.nupkg
                for version_dir in self.runtime.read_dir(&entry).unwrap_or_default() {
                    if !self.runtime.is_dir(&version_dir) {
                        continue;
                    }
                    archives.extend(
                        self.runtime
                            .read_dir(&version_dir)
                            .unwrap_or_default()
                            .into_iter()
                            .filter(|p| self.is_archive(p)),
                    );
                }
            }
        }
        archives
    }

    /// Every readable package of the directory.
    fn packages(&self) -> Vec<Package> {
        self.archive_paths()
            .into_iter()
            .filter_map(|path| match self.load(&path) {
                Ok(package) => Some(package),
                Err(e) => {
                    warn!("Skipping {:?}: {:#}", path, e);
                    None
                }
            })
            .collect()
    }

    fn load(&self, path: &Path) -> Result<Package> {
        let nuspec = read_nuspec(self.runtime.as_ref(), path)?;
        let package = Package::from_nuspec(nuspec)?;
        Ok(package.with_source(source_ref(self), PackageLocation::Local(path.to_path_buf())))
    }

    fn packages_with_id(&self, id: &str) -> Vec<Package> {
        self.packages()
            .into_iter()
            .filter(|p| p.identifier.has_id(id))
            .collect()
    }
}

#[async_trait]
impl<R: Runtime> PackageSource for LocalSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn is_local(&self) -> bool {
        true
    }

    #[tracing::instrument(skip(self))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Package>> {
        let term = query.term.to_lowercase();
        let mut by_id: BTreeMap<String, Vec<Package>> = BTreeMap::new();
        for package in self.packages() {
            if !term.is_empty() && !package.id().to_lowercase().contains(&term) {
                continue;
            }
            if package.version.is_prerelease() && !query.include_prerelease {
                continue;
            }
            by_id.entry(package.identifier.key()).or_default().push(package);
        }

        let mut results = Vec::new();
        for (_, mut versions) in by_id {
            versions.sort_by(|a, b| a.version.cmp(&b.version));
            if query.include_all_versions {
                results.extend(versions);
            } else {
                results.extend(versions.pop());
            }
        }
        Ok(results.into_iter().skip(query.skip).take(query.take).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn get_specific_package(
        &self,
        identifier: &PackageIdentifier,
    ) -> Result<Option<Package>> {
        let candidates = self.packages_with_id(identifier.id());
        let chosen = select_version(identifier, candidates.iter().map(|p| &p.version)).cloned();
        let Some(version) = chosen else {
            debug!("No version of {} in {}", identifier, self.name);
            return Ok(None);
        };
        Ok(candidates.into_iter().find(|p| p.version == version))
    }

    #[tracing::instrument(skip(self, installed))]
    async fn get_updates(
        &self,
        installed: &[Package],
        options: &UpdateOptions,
    ) -> Result<Vec<Package>> {
        let mut updates = Vec::new();
        for package in installed {
            let candidates = self.packages_with_id(package.id());
            let newer: Vec<_> = newer_versions(package, candidates.iter().map(|p| &p.version), options)
                .into_iter()
                .cloned()
                .collect();
            updates.extend(candidates.into_iter().filter(|candidate| {
                newer.contains(&candidate.version)
                    && supports_frameworks(candidate, &options.frameworks)
            }));
        }
        Ok(updates)
    }

    async fn credential(&self) -> Option<Credential> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use crate::test_utils::write_package;
    use crate::version::SemVersion;
    use tempfile::tempdir;

    fn source(dir: &Path) -> LocalSource<RealRuntime> {
        LocalSource::new(Arc::new(RealRuntime), "local", dir)
    }

    #[tokio::test]
    async fn test_scans_flat_and_nested_layouts() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), "Flat", "1.0.0", &[], &[]).unwrap();
        write_package(&dir.path().join("nested").join("2.0.0"), "Nested", "2.0.0", &[], &[])
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let found = source(dir.path())
            .search(&SearchQuery::default())
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["Flat", "Nested"]);
        assert!(matches!(found[0].location, Some(PackageLocation::Local(_))));
        assert!(found[0].source.as_ref().unwrap().is_local);
    }

    #[tokio::test]
    async fn test_search_term_and_versions() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), "Json.Lib", "1.0.0", &[], &[]).unwrap();
        write_package(dir.path(), "Json.Lib", "1.1.0", &[], &[]).unwrap();
        write_package(dir.path(), "Json.Lib", "2.0.0-beta", &[], &[]).unwrap();
        write_package(dir.path(), "Other", "1.0.0", &[], &[]).unwrap();
        let source = source(dir.path());

        let latest = source
            .search(&SearchQuery {
                term: "json".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version.to_string(), "1.1.0");

        let all = source
            .search(&SearchQuery {
                term: "JSON".into(),
                include_all_versions: true,
                include_prerelease: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_get_specific_package() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), "A", "1.0.0", &[("", "B", "1.0")], &[]).unwrap();
        write_package(dir.path(), "A", "1.5.0", &[], &[]).unwrap();
        let source = source(dir.path());

        let exact = PackageIdentifier::new("a", Some("1.0.0")).unwrap();
        let package = source.get_specific_package(&exact).await.unwrap().unwrap();
        assert_eq!(package.version, SemVersion::parse("1.0.0").unwrap());
        assert_eq!(package.dependency_groups[0].dependencies[0].id(), "B");

        let range = PackageIdentifier::new("A", Some("[1.0,)")).unwrap();
        let package = source.get_specific_package(&range).await.unwrap().unwrap();
        assert_eq!(package.version.to_string(), "1.5.0");

        let missing = PackageIdentifier::new("A", Some("3.0")).unwrap();
        assert!(source.get_specific_package(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_updates() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), "A", "1.0.0", &[], &[]).unwrap();
        write_package(dir.path(), "A", "1.2.0", &[], &[]).unwrap();
        write_package(dir.path(), "A", "1.3.0", &[], &[]).unwrap();

        let installed = vec![Package::new("A", SemVersion::parse("1.0.0").unwrap()).unwrap()];
        let updates = source(dir.path())
            .get_updates(
                &installed,
                &UpdateOptions {
                    include_all_versions: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let mut versions: Vec<String> = updates.iter().map(|p| p.version.to_string()).collect();
        versions.sort();
        assert_eq!(versions, vec!["1.2.0", "1.3.0"]);
    }

    #[tokio::test]
    async fn test_unreadable_archive_is_skipped() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Broken.1.0.0.nupkg"), "not a zip").unwrap();
        write_package(dir.path(), "Good", "1.0.0", &[], &[]).unwrap();

        let found = source(dir.path())
            .search(&SearchQuery::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "Good");
    }
}
