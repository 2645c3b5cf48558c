//! Package feeds.
//!
//! A feed is either a NuGet v3 HTTP endpoint ([`RemoteSource`]) or a
//! directory of `.nupkg` files ([`LocalSource`]). Both expose the same
//! [`PackageSource`] contract; [`SourceSet`] aggregates the enabled ones.

mod local;
mod remote;
mod set;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::credential::Credential;
use crate::framework::moniker_matches;
use crate::package::{Package, PackageIdentifier, SourceRef};
use crate::version::SemVersion;

pub use local::LocalSource;
pub use remote::RemoteSource;
pub use set::SourceSet;

/// The public nuget.org feed, used when nothing is configured.
pub const DEFAULT_SOURCE_URL: &str = "https://api.nuget.org/v3/index.json";

fn default_enabled() -> bool {
    true
}

/// A configured feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// HTTP(S) URL of a v3 service index, or a local directory.
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            username: None,
            password: None,
        }
    }

    pub fn nuget_org() -> Self {
        Self::new("nuget.org", DEFAULT_SOURCE_URL)
    }

    /// Local when the url is not an HTTP(S) address.
    pub fn is_local(&self) -> bool {
        let lower = self.url.to_lowercase();
        !(lower.starts_with("http://") || lower.starts_with("https://"))
    }

    /// Directory of a local source (`file://` prefix removed).
    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(self.url.strip_prefix("file://").unwrap_or(&self.url))
    }

    /// Credential stored with the source, if a username is configured.
    pub fn credential(&self) -> Option<Credential> {
        let username = self.username.as_ref()?;
        Some(Credential::new(
            username.clone(),
            self.password.clone().unwrap_or_default(),
        ))
    }
}

/// Parameters of a feed search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    pub include_all_versions: bool,
    pub include_prerelease: bool,
    pub take: usize,
    pub skip: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            term: String::new(),
            include_all_versions: false,
            include_prerelease: false,
            take: 20,
            skip: 0,
        }
    }
}

/// Parameters of an update query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    pub include_prerelease: bool,
    pub include_all_versions: bool,
    /// Target frameworks an update must support; empty means any.
    pub frameworks: Vec<String>,
    /// Per-id version constraints an update must satisfy.
    pub constraints: Vec<PackageIdentifier>,
}

/// One package feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageSource: Send + Sync {
    fn name(&self) -> &str;

    fn url(&self) -> &str;

    fn is_local(&self) -> bool;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Package>>;

    /// The exact version of `identifier` if the feed has it, otherwise the
    /// highest version its range admits.
    async fn get_specific_package(&self, identifier: &PackageIdentifier)
    -> Result<Option<Package>>;

    async fn get_updates(
        &self,
        installed: &[Package],
        options: &UpdateOptions,
    ) -> Result<Vec<Package>>;

    /// Credential to send to this feed, if any.
    async fn credential(&self) -> Option<Credential>;
}

pub(crate) fn source_ref(source: &dyn PackageSource) -> SourceRef {
    SourceRef {
        name: source.name().to_string(),
        url: source.url().to_string(),
        is_local: source.is_local(),
    }
}

/// The version to serve for `identifier`: the literal version when listed,
/// else the highest admitted one. Pre-releases are only admitted when the
/// identifier itself names one.
pub(crate) fn select_version<'a, I>(identifier: &PackageIdentifier, versions: I) -> Option<&'a SemVersion>
where
    I: IntoIterator<Item = &'a SemVersion>,
{
    let allow_prerelease = identifier.spec().allows_prerelease();
    let mut best: Option<&'a SemVersion> = None;
    for version in versions {
        if identifier.exact_version() == Some(version) {
            return Some(version);
        }
        if (!version.is_prerelease() || allow_prerelease)
            && identifier.in_range_version(version)
            && best.is_none_or(|b| version > b)
        {
            best = Some(version);
        }
    }
    best
}

/// Versions newer than `installed` that an update may move to, ascending.
/// Only the newest one is kept unless all versions are requested.
pub(crate) fn newer_versions<'a, I>(
    installed: &Package,
    available: I,
    options: &UpdateOptions,
) -> Vec<&'a SemVersion>
where
    I: IntoIterator<Item = &'a SemVersion>,
{
    let constraint = options
        .constraints
        .iter()
        .find(|c| c.has_id(installed.id()));

    let mut newer: Vec<&SemVersion> = available
        .into_iter()
        .filter(|v| **v > installed.version)
        .filter(|v| options.include_prerelease || !v.is_prerelease())
        .filter(|v| constraint.is_none_or(|c| c.in_range_version(v)))
        .collect();
    newer.sort();
    newer.dedup();

    if !options.include_all_versions && newer.len() > 1 {
        newer.drain(..newer.len() - 1);
    }
    newer
}

/// Whether `package` has a dependency group usable on one of `frameworks`.
pub(crate) fn supports_frameworks(package: &Package, frameworks: &[String]) -> bool {
    if frameworks.is_empty() || package.dependency_groups.is_empty() {
        return true;
    }
    package.dependency_groups.iter().any(|group| {
        group.target_framework.is_empty()
            || frameworks.iter().any(|f| {
                moniker_matches(&group.target_framework, f) || moniker_matches(f, &group.target_framework)
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::DependencyGroup;

    fn v(s: &str) -> SemVersion {
        SemVersion::parse(s).unwrap()
    }

    fn ident(id: &str, version: Option<&str>) -> PackageIdentifier {
        PackageIdentifier::new(id, version).unwrap()
    }

    #[test]
    fn test_source_config_kind() {
        assert!(!SourceConfig::nuget_org().is_local());
        let local = SourceConfig::new("local", "file:///srv/feed");
        assert!(local.is_local());
        assert_eq!(local.local_path(), PathBuf::from("/srv/feed"));
        assert!(SourceConfig::new("dir", "./packages").is_local());
    }

    #[test]
    fn test_source_config_credential() {
        let mut config = SourceConfig::new("private", "https://feed.test/index.json");
        assert!(config.credential().is_none());
        config.username = Some("me".into());
        config.password = Some("pat".into());
        assert_eq!(config.credential(), Some(Credential::new("me", "pat")));
    }

    #[test]
    fn test_source_config_enabled_defaults_true() {
        let config: SourceConfig =
            serde_json::from_str(r#"{"name":"a","url":"https://a/index.json"}"#).unwrap();
        assert!(config.enabled);
    }

    #[test]
    fn test_select_version_prefers_exact() {
        let versions = [v("1.0.0"), v("1.5.0"), v("2.0.0")];
        let chosen = select_version(&ident("A", Some("1.5")), &versions);
        assert_eq!(chosen, Some(&v("1.5.0")));
    }

    #[test]
    fn test_select_version_highest_in_range() {
        let versions = [v("1.0.0"), v("1.5.0"), v("2.0.0"), v("1.9.0-beta")];
        let chosen = select_version(&ident("A", Some("[1.0,2.0)")), &versions);
        assert_eq!(chosen, Some(&v("1.5.0")));

        let chosen = select_version(&ident("A", None), &versions);
        assert_eq!(chosen, Some(&v("2.0.0")));

        assert_eq!(select_version(&ident("A", Some("3.0")), &versions), None);
    }

    #[test]
    fn test_select_version_prerelease_when_requested() {
        let versions = [v("1.0.0"), v("2.0.0-rc.1")];
        let chosen = select_version(&ident("A", Some("[2.0.0-alpha,)")), &versions);
        assert_eq!(chosen, Some(&v("2.0.0-rc.1")));
    }

    #[test]
    fn test_newer_versions() {
        let installed = Package::new("A", v("1.0.0")).unwrap();
        let available = [v("0.9.0"), v("1.0.0"), v("1.1.0"), v("1.2.0"), v("2.0.0-beta")];

        let newest = newer_versions(&installed, &available, &UpdateOptions::default());
        assert_eq!(newest, vec![&v("1.2.0")]);

        let options = UpdateOptions {
            include_all_versions: true,
            include_prerelease: true,
            ..Default::default()
        };
        let all = newer_versions(&installed, &available, &options);
        assert_eq!(all, vec![&v("1.1.0"), &v("1.2.0"), &v("2.0.0-beta")]);
    }

    #[test]
    fn test_newer_versions_respects_constraints() {
        let installed = Package::new("A", v("1.0.0")).unwrap();
        let available = [v("1.1.0"), v("2.0.0")];
        let options = UpdateOptions {
            constraints: vec![ident("a", Some("[1.0,2.0)"))],
            ..Default::default()
        };
        assert_eq!(newer_versions(&installed, &available, &options), vec![&v("1.1.0")]);
    }

    #[test]
    fn test_supports_frameworks() {
        let mut package = Package::new("A", v("1.0.0")).unwrap();
        assert!(supports_frameworks(&package, &["net45".into()]));

        package.dependency_groups = vec![DependencyGroup {
            target_framework: "netstandard2.0".into(),
            dependencies: vec![],
        }];
        assert!(supports_frameworks(&package, &[]));
        assert!(supports_frameworks(&package, &["netstandard2.0".into()]));
        assert!(!supports_frameworks(&package, &["net45".into()]));
    }
}
