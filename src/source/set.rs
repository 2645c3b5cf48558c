use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::credential::CredentialLookup;
use crate::download::download_file;
use crate::http::HttpClient;
use crate::package::{Package, PackageLocation};
use crate::runtime::Runtime;

use super::{LocalSource, PackageSource, RemoteSource, SearchQuery, SourceConfig, UpdateOptions};

/// The enabled feeds of a session, in configuration order.
pub struct SourceSet {
    sources: Vec<Arc<dyn PackageSource>>,
    http_client: HttpClient,
}

impl SourceSet {
    pub fn new(sources: Vec<Arc<dyn PackageSource>>, http_client: HttpClient) -> Self {
        Self {
            sources,
            http_client,
        }
    }

    /// Build the enabled sources of `configs`.
    pub fn from_configs<R: Runtime + 'static>(
        runtime: Arc<R>,
        configs: &[SourceConfig],
        http_client: HttpClient,
        credentials: Option<Arc<dyn CredentialLookup>>,
    ) -> Self {
        let sources = configs
            .iter()
            .filter(|c| {
                if !c.enabled {
                    debug!("Source {} is disabled", c.name);
                }
                c.enabled
            })
            .map(|c| -> Arc<dyn PackageSource> {
                if c.is_local() {
                    Arc::new(LocalSource::new(runtime.clone(), &c.name, &c.local_path()))
                } else {
                    Arc::new(RemoteSource::from_config(
                        c,
                        http_client.clone(),
                        credentials.clone(),
                    ))
                }
            })
            .collect();
        Self::new(sources, http_client)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PackageSource>> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PackageSource>> {
        self.sources.iter().find(|s| s.name() == name)
    }

    /// Search every source; a failing source is logged and skipped.
    /// Results are de-duplicated by id and version, first source wins.
    #[tracing::instrument(skip(self))]
    pub async fn search(&self, query: &SearchQuery) -> Vec<Package> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for source in &self.sources {
            match source.search(query).await {
                Ok(packages) => {
                    for package in packages {
                        if seen.insert((package.identifier.key(), package.version.clone())) {
                            results.push(package);
                        }
                    }
                }
                Err(e) => warn!("Search on {} failed: {:#}", source.name(), e),
            }
        }
        results
    }

    /// Updates across every source. Unless all versions are requested,
    /// only the newest update per id is kept.
    #[tracing::instrument(skip(self, installed))]
    pub async fn get_updates(&self, installed: &[Package], options: &UpdateOptions) -> Vec<Package> {
        let mut updates: Vec<Package> = Vec::new();
        for source in &self.sources {
            let found = match source.get_updates(installed, options).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("Update query on {} failed: {:#}", source.name(), e);
                    continue;
                }
            };
            for package in found {
                let existing = updates.iter().position(|u| {
                    u.identifier.same_id(&package.identifier)
                        && (!options.include_all_versions || u.version == package.version)
                });
                match existing {
                    Some(i) if updates[i].version < package.version => updates[i] = package,
                    Some(_) => {}
                    None => updates.push(package),
                }
            }
        }
        updates
    }

    /// Copy or download the archive of `package` to `dest`.
    #[tracing::instrument(skip(self, runtime, package), fields(package = %package))]
    pub async fn fetch_archive<R: Runtime>(
        &self,
        runtime: &R,
        package: &Package,
        dest: &Path,
    ) -> Result<()> {
        match &package.location {
            Some(PackageLocation::Local(path)) => {
                if let Some(parent) = dest.parent() {
                    runtime.create_dir_all(parent)?;
                }
                runtime
                    .copy(path, dest)
                    .with_context(|| format!("Failed to copy {:?} into the cache", path))?;
                Ok(())
            }
            Some(PackageLocation::Remote(url)) => {
                let source = package.source.as_ref().and_then(|s| self.get(&s.name));
                let credential = match source {
                    Some(source) => source.credential().await,
                    None => None,
                };
                download_file(runtime, url, dest, &self.http_client, credential.as_ref()).await
            }
            None => Err(anyhow!("{} has no download location", package)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::SourceRef;
    use crate::runtime::RealRuntime;
    use crate::source::MockPackageSource;
    use crate::test_utils::write_package;
    use crate::version::SemVersion;
    use reqwest::Client;
    use tempfile::tempdir;

    fn pkg(id: &str, version: &str) -> Package {
        Package::new(id, SemVersion::parse(version).unwrap()).unwrap()
    }

    fn mock_source(name: &str, results: Vec<Package>) -> Arc<dyn PackageSource> {
        let mut mock = MockPackageSource::new();
        mock.expect_name().return_const(name.to_string());
        mock.expect_search()
            .returning(move |_| Ok(results.clone()));
        mock.expect_get_updates().returning(|installed, _| {
            Ok(installed
                .iter()
                .map(|p| pkg(p.id(), "9.0.0"))
                .collect())
        });
        Arc::new(mock)
    }

    fn failing_source(name: &str) -> Arc<dyn PackageSource> {
        let mut mock = MockPackageSource::new();
        mock.expect_name().return_const(name.to_string());
        mock.expect_search()
            .returning(|_| Err(anyhow!("connection refused")));
        mock.expect_get_updates()
            .returning(|_, _| Err(anyhow!("connection refused")));
        Arc::new(mock)
    }

    fn http() -> HttpClient {
        HttpClient::new(Client::new())
    }

    #[tokio::test]
    async fn test_search_aggregates_and_deduplicates() {
        let set = SourceSet::new(
            vec![
                mock_source("one", vec![pkg("A", "1.0.0"), pkg("B", "1.0.0")]),
                failing_source("broken"),
                mock_source("two", vec![pkg("a", "1.0"), pkg("C", "2.0.0")]),
            ],
            http(),
        );

        let results = set.search(&SearchQuery::default()).await;
        let names: Vec<String> = results.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["A 1.0.0", "B 1.0.0", "C 2.0.0"]);
    }

    #[tokio::test]
    async fn test_get_updates_keeps_newest_per_id() {
        let mut older = MockPackageSource::new();
        older.expect_name().return_const("older".to_string());
        older
            .expect_get_updates()
            .returning(|_, _| Ok(vec![pkg("A", "1.5.0")]));

        let set = SourceSet::new(
            vec![Arc::new(older), mock_source("newer", vec![]), failing_source("x")],
            http(),
        );
        let updates = set
            .get_updates(&[pkg("A", "1.0.0")], &UpdateOptions::default())
            .await;

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].version.to_string(), "9.0.0");
    }

    #[test]
    fn test_from_configs_skips_disabled() {
        let mut disabled = SourceConfig::new("off", "https://off.test/index.json");
        disabled.enabled = false;
        let configs = vec![
            SourceConfig::nuget_org(),
            disabled,
            SourceConfig::new("dir", "/srv/packages"),
        ];

        let set = SourceSet::from_configs(Arc::new(RealRuntime), &configs, http(), None);
        assert_eq!(set.len(), 2);
        assert!(set.get("off").is_none());
        assert!(set.get("dir").unwrap().is_local());
        assert!(!set.get("nuget.org").unwrap().is_local());
    }

    #[tokio::test]
    async fn test_fetch_archive_copies_local_package() {
        let feed = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let archive = write_package(feed.path(), "A", "1.0.0", &[], &[]).unwrap();

        let package = pkg("A", "1.0.0").with_source(
            SourceRef {
                name: "dir".into(),
                url: feed.path().to_string_lossy().into_owned(),
                is_local: true,
            },
            PackageLocation::Local(archive),
        );

        let dest = cache.path().join("nested").join("A.1.0.0.nupkg");
        SourceSet::new(vec![], http())
            .fetch_archive(&RealRuntime, &package, &dest)
            .await
            .unwrap();
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_archive_downloads_with_source_credential() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/a.1.0.0.nupkg")
            .match_header("authorization", "Basic dTpw")
            .with_status(200)
            .with_body("zip")
            .create_async()
            .await;

        let mut source = MockPackageSource::new();
        source.expect_name().return_const("feed".to_string());
        source
            .expect_credential()
            .returning(|| Some(crate::credential::Credential::new("u", "p")));

        let package = pkg("A", "1.0.0").with_source(
            SourceRef {
                name: "feed".into(),
                url: server.url(),
                is_local: false,
            },
            PackageLocation::Remote(format!("{}/a.1.0.0.nupkg", server.url())),
        );

        let cache = tempdir().unwrap();
        let dest = cache.path().join("A.1.0.0.nupkg");
        SourceSet::new(vec![Arc::new(source)], http())
            .fetch_archive(&RealRuntime, &package, &dest)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "zip");
    }

    #[tokio::test]
    async fn test_fetch_archive_without_location_fails() {
        let cache = tempdir().unwrap();
        let result = SourceSet::new(vec![], http())
            .fetch_archive(&RealRuntime, &pkg("A", "1.0.0"), &cache.path().join("x"))
            .await;
        assert!(result.unwrap_err().to_string().contains("no download location"));
    }
}
