//! Tiered package lookup: installed, then cache, then sources.

use anyhow::Result;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::archive::read_nuspec;
use crate::package::{ARCHIVE_EXTENSION, Package, PackageIdentifier, PackageLocation};
use crate::registry::InstalledRegistry;
use crate::runtime::Runtime;
use crate::source::SourceSet;
use crate::version::SemVersion;

/// Which tier produced a resolved package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Installed,
    Cache,
    Source,
}

/// Deterministic cache path of an exact package version.
pub fn cache_path(cache_dir: &Path, id: &str, version: &SemVersion) -> PathBuf {
    cache_dir.join(format!("{}.{}.{}", id, version.normalized(), ARCHIVE_EXTENSION))
}

pub struct PackageResolver<'a, R: Runtime> {
    runtime: &'a R,
    registry: &'a InstalledRegistry,
    sources: &'a SourceSet,
    cache_dir: &'a Path,
    install_from_cache: bool,
}

impl<'a, R: Runtime> PackageResolver<'a, R> {
    pub fn new(
        runtime: &'a R,
        registry: &'a InstalledRegistry,
        sources: &'a SourceSet,
        cache_dir: &'a Path,
        install_from_cache: bool,
    ) -> Self {
        Self {
            runtime,
            registry,
            sources,
            cache_dir,
            install_from_cache,
        }
    }

    /// The best package for `identifier`, or `None` when no tier has it.
    pub async fn get_specific_package(&self, identifier: &PackageIdentifier) -> Option<Package> {
        self.resolve(identifier).await.map(|(package, _)| package)
    }

    /// Like [`get_specific_package`](Self::get_specific_package), also
    /// reporting the tier that answered.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, identifier: &PackageIdentifier) -> Option<(Package, Tier)> {
        if let Some(package) = self.from_installed(identifier) {
            return Some((package, Tier::Installed));
        }
        if self.install_from_cache
            && let Some(package) = self.from_cache(identifier)
        {
            return Some((package, Tier::Cache));
        }
        if let Some(package) = self.from_sources(identifier).await {
            return Some((package, Tier::Source));
        }
        info!("{} was not found in any tier", identifier);
        None
    }

    fn from_installed(&self, identifier: &PackageIdentifier) -> Option<Package> {
        let installed = self.registry.get(identifier.id())?;
        if identifier.exact_version() == Some(&installed.version) {
            debug!("{} is installed", installed);
            return Some(installed.clone());
        }
        if identifier.in_range(&installed.identifier) {
            info!(
                "Using installed {} for requested {}; a more specific version was asked for",
                installed, identifier
            );
            return Some(installed.clone());
        }
        debug!("Installed {} is outside the requested {}", installed, identifier);
        None
    }

    fn from_cache(&self, identifier: &PackageIdentifier) -> Option<Package> {
        let version = identifier.exact_version()?;
        let Some(path) = self.find_cached(identifier.id(), version) else {
            debug!("{} {} is not cached", identifier.id(), version);
            return None;
        };
        match self.load_cached(&path) {
            Ok(package) => {
                debug!("Found {} in the cache", package);
                Some(package)
            }
            Err(e) => {
                warn!("Ignoring unreadable cache entry {:?}: {:#}", path, e);
                None
            }
        }
    }

    /// The cache entry for `id` and `version`, matching the id in any casing.
    fn find_cached(&self, id: &str, version: &SemVersion) -> Option<PathBuf> {
        let path = cache_path(self.cache_dir, id, version);
        if self.runtime.exists(&path) {
            return Some(path);
        }
        let wanted = path.file_name()?.to_string_lossy().into_owned();
        self.runtime
            .read_dir(self.cache_dir)
            .ok()?
            .into_iter()
            .find(|entry| {
                entry
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().eq_ignore_ascii_case(&wanted))
            })
    }

    fn load_cached(&self, path: &Path) -> Result<Package> {
        let package = Package::from_nuspec(read_nuspec(self.runtime, path)?)?;
        Ok(package.with_location(PackageLocation::Local(path.to_path_buf())))
    }

    /// First exact hit across sources; failing that, the greatest admitted
    /// candidate any source offered.
    async fn from_sources(&self, identifier: &PackageIdentifier) -> Option<Package> {
        let mut best: Option<Package> = None;
        for source in self.sources.iter() {
            let candidate = match source.get_specific_package(identifier).await {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Lookup of {} on {} failed: {:#}", identifier, source.name(), e);
                    continue;
                }
            };
            if identifier.exact_version() == Some(&candidate.version) {
                debug!("{} has the exact {}", source.name(), candidate);
                return Some(candidate);
            }
            if !identifier.in_range_version(&candidate.version) {
                debug!("{} offered {} outside {}", source.name(), candidate, identifier);
                continue;
            }
            if best.as_ref().is_none_or(|b| candidate.version > b.version) {
                best = Some(candidate);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpClient;
    use crate::runtime::RealRuntime;
    use crate::source::{MockPackageSource, PackageSource};
    use crate::test_utils::write_package;
    use anyhow::anyhow;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn pkg(id: &str, version: &str) -> Package {
        Package::new(id, SemVersion::parse(version).unwrap()).unwrap()
    }

    fn ident(id: &str, version: &str) -> PackageIdentifier {
        PackageIdentifier::new(id, Some(version)).unwrap()
    }

    /// A source that answers with the highest listed version admitted by
    /// the request.
    fn source_with(name: &str, versions: &[&str]) -> Arc<dyn PackageSource> {
        let versions: Vec<SemVersion> = versions.iter().map(|v| SemVersion::parse(v).unwrap()).collect();
        let mut mock = MockPackageSource::new();
        mock.expect_name().return_const(name.to_string());
        mock.expect_get_specific_package().returning(move |identifier| {
            let chosen = versions
                .iter()
                .filter(|v| identifier.in_range_version(v))
                .max()
                .cloned();
            Ok(chosen.map(|v| Package::new(identifier.id(), v).unwrap()))
        });
        Arc::new(mock)
    }

    fn sources(list: Vec<Arc<dyn PackageSource>>) -> SourceSet {
        SourceSet::new(list, HttpClient::new(reqwest::Client::new()))
    }

    #[tokio::test]
    async fn test_installed_tier_wins_for_ranges() {
        let cache = tempdir().unwrap();
        write_package(cache.path(), "A", "1.0.0", &[], &[]).unwrap();
        let mut registry = InstalledRegistry::new();
        registry.add(pkg("A", "1.0.0"));
        let set = sources(vec![source_with("feed", &["2.0.0"])]);

        let resolver = PackageResolver::new(&RealRuntime, &registry, &set, cache.path(), true);
        let (package, tier) = resolver.resolve(&ident("A", "[1.0,)")).await.unwrap();
        assert_eq!(tier, Tier::Installed);
        assert_eq!(package.version.to_string(), "1.0.0");
    }

    #[tokio::test]
    async fn test_exact_request_falls_through_to_sources() {
        let cache = tempdir().unwrap();
        write_package(cache.path(), "A", "1.0.0", &[], &[]).unwrap();
        let mut registry = InstalledRegistry::new();
        registry.add(pkg("A", "1.0.0"));
        let set = sources(vec![source_with("feed", &["2.0.0"])]);

        let resolver = PackageResolver::new(&RealRuntime, &registry, &set, cache.path(), true);
        let (package, tier) = resolver.resolve(&ident("A", "2.0")).await.unwrap();
        assert_eq!(tier, Tier::Source);
        assert_eq!(package.version.to_string(), "2.0.0");
    }

    #[tokio::test]
    async fn test_cache_tier_exact_only() {
        let cache = tempdir().unwrap();
        write_package(cache.path(), "A", "1.0.0", &[], &[]).unwrap();
        let registry = InstalledRegistry::new();
        let set = sources(vec![source_with("feed", &["1.0.0", "1.5.0"])]);

        let resolver = PackageResolver::new(&RealRuntime, &registry, &set, cache.path(), true);
        let (package, tier) = resolver.resolve(&ident("A", "1.0.0")).await.unwrap();
        assert_eq!(tier, Tier::Cache);
        assert!(matches!(package.location, Some(PackageLocation::Local(_))));

        // A range never hits the cache.
        let (package, tier) = resolver.resolve(&ident("A", "[1.0,)")).await.unwrap();
        assert_eq!(tier, Tier::Source);
        assert_eq!(package.version.to_string(), "1.5.0");
    }

    #[tokio::test]
    async fn test_cache_tier_ignores_id_case() {
        let cache = tempdir().unwrap();
        write_package(cache.path(), "A", "1.0.0", &[], &[]).unwrap();
        let registry = InstalledRegistry::new();
        let set = sources(vec![]);

        let resolver = PackageResolver::new(&RealRuntime, &registry, &set, cache.path(), true);
        let (package, tier) = resolver.resolve(&ident("a", "1.0.0")).await.unwrap();
        assert_eq!(tier, Tier::Cache);
        assert_eq!(package.id(), "A");
        assert!(matches!(package.location, Some(PackageLocation::Local(_))));
    }

    #[tokio::test]
    async fn test_cache_tier_disabled() {
        let cache = tempdir().unwrap();
        write_package(cache.path(), "A", "1.0.0", &[], &[]).unwrap();
        let registry = InstalledRegistry::new();
        let set = sources(vec![]);

        let resolver = PackageResolver::new(&RealRuntime, &registry, &set, cache.path(), false);
        assert!(resolver.get_specific_package(&ident("A", "1.0.0")).await.is_none());
    }

    #[tokio::test]
    async fn test_first_exact_source_hit_wins() {
        let cache = tempdir().unwrap();
        let registry = InstalledRegistry::new();

        let mut unused = MockPackageSource::new();
        unused.expect_name().return_const("late".to_string());
        unused.expect_get_specific_package().never();

        let set = sources(vec![
            source_with("near", &["1.1.0"]),
            source_with("exact", &["1.0.0"]),
            Arc::new(unused),
        ]);

        let resolver = PackageResolver::new(&RealRuntime, &registry, &set, cache.path(), true);
        let package = resolver.get_specific_package(&ident("A", "1.0.0")).await.unwrap();
        assert_eq!(package.version.to_string(), "1.0.0");
    }

    #[tokio::test]
    async fn test_closest_admitted_version_across_sources() {
        let cache = tempdir().unwrap();
        let registry = InstalledRegistry::new();

        let mut broken = MockPackageSource::new();
        broken.expect_name().return_const("broken".to_string());
        broken
            .expect_get_specific_package()
            .returning(|_| Err(anyhow!("timeout")));

        let set = sources(vec![
            source_with("one", &["1.2.0"]),
            Arc::new(broken),
            source_with("two", &["1.4.0"]),
            source_with("three", &["1.3.0"]),
        ]);

        let resolver = PackageResolver::new(&RealRuntime, &registry, &set, cache.path(), true);
        let package = resolver
            .get_specific_package(&ident("A", "[1.0,2.0)"))
            .await
            .unwrap();
        assert_eq!(package.version.to_string(), "1.4.0");
    }

    #[tokio::test]
    async fn test_installed_out_of_range_is_a_miss() {
        let cache = tempdir().unwrap();
        let mut registry = InstalledRegistry::new();
        registry.add(pkg("A", "0.9.0"));
        let set = sources(vec![]);

        let resolver = PackageResolver::new(&RealRuntime, &registry, &set, cache.path(), true);
        assert!(resolver.get_specific_package(&ident("A", "[1.0,)")).await.is_none());
    }
}
