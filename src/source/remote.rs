//! NuGet v3 HTTP feed.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::credential::{Credential, CredentialLookup};
use crate::http::{HttpClient, NonRetryableError};
use crate::package::{Nuspec, Package, PackageIdentifier, PackageLocation};
use crate::version::SemVersion;

use super::{
    PackageSource, SearchQuery, SourceConfig, UpdateOptions, newer_versions, select_version,
    source_ref, supports_frameworks,
};

/// v3 API response types (internal).
mod api {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct ServiceIndex {
        pub resources: Vec<Resource>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Resource {
        #[serde(rename = "@id")]
        pub id: String,
        #[serde(rename = "@type")]
        pub kind: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct SearchResponse {
        pub data: Vec<SearchHit>,
    }

    #[derive(Deserialize, Debug)]
    pub struct SearchHit {
        pub id: String,
        pub version: String,
        pub title: Option<String>,
        pub description: Option<String>,
        #[serde(default)]
        pub authors: Authors,
        #[serde(default)]
        pub versions: Vec<SearchVersion>,
    }

    #[derive(Deserialize, Debug)]
    pub struct SearchVersion {
        pub version: String,
    }

    /// `authors` is a string on some servers and an array on others.
    #[derive(Deserialize, Debug, Default)]
    #[serde(untagged)]
    pub enum Authors {
        #[default]
        None,
        One(String),
        Many(Vec<String>),
    }

    impl Authors {
        pub fn joined(&self) -> Option<String> {
            match self {
                Authors::None => None,
                Authors::One(a) => Some(a.clone()),
                Authors::Many(list) if list.is_empty() => None,
                Authors::Many(list) => Some(list.join(", ")),
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub struct VersionIndex {
        pub versions: Vec<String>,
    }
}

const SEARCH_RESOURCE: &str = "SearchQueryService";
const PACKAGE_BASE_RESOURCE: &str = "PackageBaseAddress/3.0.0";

#[derive(Debug)]
struct Resources {
    search: Option<String>,
    package_base: String,
}

/// A NuGet v3 feed reached over HTTP.
pub struct RemoteSource {
    name: String,
    url: String,
    http_client: HttpClient,
    credential: Option<Credential>,
    credentials: Option<Arc<dyn CredentialLookup>>,
    resources: OnceCell<Resources>,
}

impl RemoteSource {
    pub fn new(name: &str, url: &str, http_client: HttpClient) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            http_client,
            credential: None,
            credentials: None,
            resources: OnceCell::new(),
        }
    }

    /// Build from configuration; sources without a stored credential ask
    /// `credentials` instead.
    pub fn from_config(
        config: &SourceConfig,
        http_client: HttpClient,
        credentials: Option<Arc<dyn CredentialLookup>>,
    ) -> Self {
        let mut source = Self::new(&config.name, &config.url, http_client);
        source.credential = config.credential();
        source.credentials = credentials;
        source
    }

    async fn resources(&self) -> Result<&Resources> {
        self.resources
            .get_or_try_init(|| async {
                let credential = self.credential().await;
                let index: api::ServiceIndex = self
                    .http_client
                    .get_json(&self.url, credential.as_ref())
                    .await
                    .with_context(|| format!("Failed to read service index of {}", self.name))?;

                let find = |prefix: &str| {
                    index
                        .resources
                        .iter()
                        .find(|r| r.kind.starts_with(prefix))
                        .map(|r| r.id.trim_end_matches('/').to_string())
                };

                let package_base = find(PACKAGE_BASE_RESOURCE).ok_or_else(|| {
                    anyhow!("{} does not offer {}", self.url, PACKAGE_BASE_RESOURCE)
                })?;
                Ok(Resources {
                    search: find(SEARCH_RESOURCE),
                    package_base,
                })
            })
            .await
    }

    fn package_url(base: &str, id: &str, version: &SemVersion, file: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            base,
            id.to_lowercase(),
            version.normalized().to_lowercase(),
            file
        )
    }

    fn archive_url(base: &str, id: &str, version: &SemVersion) -> String {
        let file = format!(
            "{}.{}.nupkg",
            id.to_lowercase(),
            version.normalized().to_lowercase()
        );
        Self::package_url(base, id, version, &file)
    }

    /// Versions listed for `id`; empty when the feed does not know it.
    async fn list_versions(&self, id: &str) -> Result<Vec<SemVersion>> {
        let resources = self.resources().await?;
        let url = format!("{}/{}/index.json", resources.package_base, id.to_lowercase());
        let credential = self.credential().await;

        let index: api::VersionIndex = match self.http_client.get_json(&url, credential.as_ref()).await {
            Ok(index) => index,
            Err(e) if matches!(e.downcast_ref::<NonRetryableError>(), Some(NonRetryableError::NotFound(_))) => {
                debug!("{} not found on {}", id, self.name);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(index
            .versions
            .iter()
            .filter_map(|v| match SemVersion::parse(v) {
                Ok(version) => Some(version),
                Err(e) => {
                    debug!("Skipping unparseable version of {}: {}", id, e);
                    None
                }
            })
            .collect())
    }

    /// Full package metadata from the version's manifest.
    async fn fetch_package(&self, id: &str, version: &SemVersion) -> Result<Package> {
        let resources = self.resources().await?;
        let nuspec_url = Self::package_url(
            &resources.package_base,
            id,
            version,
            &format!("{}.nuspec", id.to_lowercase()),
        );
        let credential = self.credential().await;
        let xml = self
            .http_client
            .get_text(&nuspec_url, credential.as_ref())
            .await
            .with_context(|| format!("Failed to fetch manifest of {} {}", id, version))?;

        let package = Package::from_nuspec(Nuspec::parse(&xml)?)?;
        let location = PackageLocation::Remote(Self::archive_url(&resources.package_base, id, version));
        Ok(package.with_source(source_ref(self), location))
    }

    fn hit_to_package(&self, hit: &api::SearchHit, version: &str, base: &str) -> Option<Package> {
        let version = SemVersion::parse(version).ok()?;
        let mut package = Package::new(hit.id.as_str(), version).ok()?;
        package.title = hit.title.clone();
        package.description = hit.description.clone();
        package.authors = hit.authors.joined();
        let location = PackageLocation::Remote(Self::archive_url(base, &hit.id, &package.version));
        Some(package.with_source(source_ref(self), location))
    }
}

#[async_trait]
impl PackageSource for RemoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn is_local(&self) -> bool {
        false
    }

    #[tracing::instrument(skip(self))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Package>> {
        let resources = self.resources().await?;
        let Some(search_url) = resources.search.as_deref() else {
            warn!("{} does not support search", self.name);
            return Ok(Vec::new());
        };

        let skip = query.skip.to_string();
        let take = query.take.to_string();
        let prerelease = query.include_prerelease.to_string();
        let params = [
            ("q", query.term.as_str()),
            ("skip", skip.as_str()),
            ("take", take.as_str()),
            ("prerelease", prerelease.as_str()),
            ("semVerLevel", "2.0.0"),
        ];

        let credential = self.credential().await;
        let response: api::SearchResponse = self
            .http_client
            .get_json_with_query(search_url, &params, credential.as_ref())
            .await
            .with_context(|| format!("Search on {} failed", self.name))?;

        let mut packages = Vec::new();
        for hit in &response.data {
            if query.include_all_versions && !hit.versions.is_empty() {
                packages.extend(
                    hit.versions
                        .iter()
                        .filter_map(|v| self.hit_to_package(hit, &v.version, &resources.package_base))
                        .filter(|p| query.include_prerelease || !p.version.is_prerelease()),
                );
            } else {
                packages.extend(self.hit_to_package(hit, &hit.version, &resources.package_base));
            }
        }
        Ok(packages)
    }

    #[tracing::instrument(skip(self))]
    async fn get_specific_package(
        &self,
        identifier: &PackageIdentifier,
    ) -> Result<Option<Package>> {
        let versions = self.list_versions(identifier.id()).await?;
        let Some(version) = select_version(identifier, &versions) else {
            debug!("No version of {} on {} satisfies the request", identifier, self.name);
            return Ok(None);
        };
        let package = self.fetch_package(identifier.id(), version).await?;
        Ok(Some(package))
    }

    #[tracing::instrument(skip(self, installed))]
    async fn get_updates(
        &self,
        installed: &[Package],
        options: &UpdateOptions,
    ) -> Result<Vec<Package>> {
        let mut updates = Vec::new();
        for package in installed {
            let versions = self.list_versions(package.id()).await?;
            for version in newer_versions(package, &versions, options) {
                let candidate = if options.frameworks.is_empty() {
                    let resources = self.resources().await?;
                    let mut candidate = Package::new(package.id(), version.clone())?;
                    candidate.title = package.title.clone();
                    candidate.description = package.description.clone();
                    candidate.authors = package.authors.clone();
                    let location = PackageLocation::Remote(Self::archive_url(
                        &resources.package_base,
                        package.id(),
                        version,
                    ));
                    candidate.with_source(source_ref(self), location)
                } else {
                    self.fetch_package(package.id(), version).await?
                };
                if supports_frameworks(&candidate, &options.frameworks) {
                    updates.push(candidate);
                }
            }
        }
        Ok(updates)
    }

    async fn credential(&self) -> Option<Credential> {
        if let Some(credential) = &self.credential {
            return Some(credential.clone());
        }
        match &self.credentials {
            Some(lookup) => lookup.get_credential(&self.url).await,
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MockCredentialLookup;
    use crate::test_utils::nuspec_xml;
    use mockito::{Matcher, Server, ServerGuard};
    use reqwest::Client;

    async fn feed() -> (ServerGuard, RemoteSource) {
        let mut server = Server::new_async().await;
        let base = server.url();
        server
            .mock("GET", "/v3/index.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"version":"3.0.0","resources":[
                    {{"@id":"{base}/query","@type":"SearchQueryService/3.0.0-rc"}},
                    {{"@id":"{base}/flat/","@type":"PackageBaseAddress/3.0.0"}}
                ]}}"#
            ))
            .create_async()
            .await;
        let source = RemoteSource::new(
            "test",
            &format!("{}/v3/index.json", base),
            HttpClient::new(Client::new()),
        );
        (server, source)
    }

    async fn serve_versions(server: &mut ServerGuard, id: &str, versions: &[&str]) {
        let list: Vec<String> = versions.iter().map(|v| format!("\"{}\"", v)).collect();
        server
            .mock("GET", format!("/flat/{}/index.json", id.to_lowercase()).as_str())
            .with_status(200)
            .with_body(format!(r#"{{"versions":[{}]}}"#, list.join(",")))
            .create_async()
            .await;
    }

    async fn serve_nuspec(server: &mut ServerGuard, id: &str, version: &str, xml: String) {
        let lower = id.to_lowercase();
        server
            .mock(
                "GET",
                format!("/flat/{}/{}/{}.nuspec", lower, version, lower).as_str(),
            )
            .with_status(200)
            .with_body(xml)
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn test_get_specific_package_exact() {
        let (mut server, source) = feed().await;
        serve_versions(&mut server, "Newtonsoft.Json", &["12.0.3", "13.0.1"]).await;
        serve_nuspec(
            &mut server,
            "Newtonsoft.Json",
            "12.0.3",
            nuspec_xml("Newtonsoft.Json", "12.0.3", &[("netstandard2.0", "Dep", "1.0")]),
        )
        .await;

        let identifier = PackageIdentifier::new("Newtonsoft.Json", Some("12.0.3")).unwrap();
        let package = source.get_specific_package(&identifier).await.unwrap().unwrap();

        assert_eq!(package.version, SemVersion::parse("12.0.3").unwrap());
        assert_eq!(package.dependency_groups.len(), 1);
        assert_eq!(package.source.as_ref().unwrap().name, "test");
        assert_eq!(
            package.location,
            Some(PackageLocation::Remote(format!(
                "{}/flat/newtonsoft.json/12.0.3/newtonsoft.json.12.0.3.nupkg",
                server.url()
            )))
        );
    }

    #[tokio::test]
    async fn test_get_specific_package_highest_in_range() {
        let (mut server, source) = feed().await;
        serve_versions(&mut server, "A", &["1.0.0", "1.4.0", "2.0.0"]).await;
        serve_nuspec(&mut server, "A", "1.4.0", nuspec_xml("A", "1.4.0", &[])).await;

        let identifier = PackageIdentifier::new("A", Some("[1.0,2.0)")).unwrap();
        let package = source.get_specific_package(&identifier).await.unwrap().unwrap();
        assert_eq!(package.version.to_string(), "1.4.0");
    }

    #[tokio::test]
    async fn test_get_specific_package_unknown_id() {
        let (mut server, source) = feed().await;
        server
            .mock("GET", "/flat/missing/index.json")
            .with_status(404)
            .create_async()
            .await;

        let identifier = PackageIdentifier::new("Missing", None).unwrap();
        assert!(source.get_specific_package(&identifier).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_sends_query_and_expands_versions() {
        let (mut server, source) = feed().await;
        let mock = server
            .mock("GET", "/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "json".into()),
                Matcher::UrlEncoded("take".into(), "5".into()),
                Matcher::UrlEncoded("skip".into(), "0".into()),
                Matcher::UrlEncoded("prerelease".into(), "false".into()),
                Matcher::UrlEncoded("semVerLevel".into(), "2.0.0".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"totalHits":1,"data":[{"id":"Json.Lib","version":"2.0.0",
                    "authors":["a","b"],"description":"d",
                    "versions":[{"version":"1.0.0"},{"version":"2.0.0-beta"},{"version":"2.0.0"}]}]}"#,
            )
            .expect(2)
            .create_async()
            .await;

        let query = SearchQuery {
            term: "json".into(),
            take: 5,
            ..Default::default()
        };
        let latest = source.search(&query).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].authors.as_deref(), Some("a, b"));

        let all = source
            .search(&SearchQuery {
                include_all_versions: true,
                ..query
            })
            .await
            .unwrap();
        let versions: Vec<String> = all.iter().map(|p| p.version.to_string()).collect();
        assert_eq!(versions, vec!["1.0.0", "2.0.0"]);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_updates_newest_only() {
        let (mut server, source) = feed().await;
        serve_versions(&mut server, "A", &["1.0.0", "1.1.0", "1.2.0"]).await;

        let installed = vec![Package::new("A", SemVersion::parse("1.0.0").unwrap()).unwrap()];
        let updates = source
            .get_updates(&installed, &UpdateOptions::default())
            .await
            .unwrap();

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].version.to_string(), "1.2.0");
    }

    #[tokio::test]
    async fn test_get_updates_filters_by_framework() {
        let (mut server, source) = feed().await;
        serve_versions(&mut server, "A", &["1.0.0", "2.0.0"]).await;
        serve_nuspec(
            &mut server,
            "A",
            "2.0.0",
            nuspec_xml("A", "2.0.0", &[("net6.0", "B", "1.0")]),
        )
        .await;

        let installed = vec![Package::new("A", SemVersion::parse("1.0.0").unwrap()).unwrap()];
        let options = UpdateOptions {
            frameworks: vec!["netstandard2.0".into()],
            ..Default::default()
        };
        let updates = source.get_updates(&installed, &options).await.unwrap();
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn test_credential_from_lookup() {
        let mut lookup = MockCredentialLookup::new();
        lookup
            .expect_get_credential()
            .with(mockall::predicate::eq("https://feed.test/v3/index.json"))
            .returning(|_| Some(Credential::new("u", "p")));

        let config = SourceConfig::new("private", "https://feed.test/v3/index.json");
        let source = RemoteSource::from_config(
            &config,
            HttpClient::new(Client::new()),
            Some(Arc::new(lookup)),
        );
        assert_eq!(source.credential().await, Some(Credential::new("u", "p")));
    }

    #[tokio::test]
    async fn test_configured_credential_wins() {
        let mut config = SourceConfig::new("private", "https://feed.test/v3/index.json");
        config.username = Some("me".into());
        config.password = Some("secret".into());

        // No expectations: the lookup must not be consulted.
        let lookup = MockCredentialLookup::new();
        let source = RemoteSource::from_config(
            &config,
            HttpClient::new(Client::new()),
            Some(Arc::new(lookup)),
        );
        assert_eq!(source.credential().await, Some(Credential::new("me", "secret")));
    }
}
