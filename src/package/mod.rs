//! Package identifiers and package metadata.
//!
//! A [`PackageIdentifier`] is an id plus a version field that may be an exact
//! version or a range; a [`Package`] is an identifier with an exact version
//! together with its dependency groups and where it can be downloaded from.

mod nuspec;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::str::FromStr;

use crate::version::{SemVersion, VersionError, VersionSpec};

pub use nuspec::Nuspec;

/// Archive file extension of packages.
pub const ARCHIVE_EXTENSION: &str = "nupkg";

/// Manifest file extension inside package archives.
pub const MANIFEST_EXTENSION: &str = "nuspec";

/// A package id with an exact version, a version range, or no version.
///
/// Ids compare case-insensitively. Two identifiers are equal when their ids
/// match and their version specs are equal; ordering is defined only between
/// exact versions of the same id.
#[derive(Debug, Clone)]
pub struct PackageIdentifier {
    id: String,
    version: Option<String>,
    spec: VersionSpec,
}

impl PackageIdentifier {
    pub fn new(id: impl Into<String>, version: Option<&str>) -> Result<Self, VersionError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(VersionError::EmptyId);
        }
        let version = version.map(str::trim).filter(|v| !v.is_empty());
        let spec = match version {
            Some(v) => VersionSpec::parse(v)?,
            None => VersionSpec::Any,
        };
        Ok(Self {
            id,
            version: version.map(str::to_string),
            spec,
        })
    }

    /// Identifier for an exact version.
    pub fn exact(id: impl Into<String>, version: &SemVersion) -> Result<Self, VersionError> {
        Self::new(id, Some(version.as_str()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The version field as written.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn spec(&self) -> &VersionSpec {
        &self.spec
    }

    pub fn is_exact(&self) -> bool {
        matches!(self.spec, VersionSpec::Exact(_))
    }

    pub fn exact_version(&self) -> Option<&SemVersion> {
        match &self.spec {
            VersionSpec::Exact(v) => Some(v),
            _ => None,
        }
    }

    pub fn same_id(&self, other: &PackageIdentifier) -> bool {
        self.id.eq_ignore_ascii_case(&other.id)
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }

    /// Whether `candidate` satisfies this identifier's version field.
    ///
    /// A missing version on either side always satisfies.
    pub fn in_range(&self, candidate: &PackageIdentifier) -> bool {
        match candidate.spec.anchor() {
            Some(version) => self.spec.contains(version),
            None => true,
        }
    }

    pub fn in_range_version(&self, version: &SemVersion) -> bool {
        self.spec.contains(version)
    }

    /// Lower-cased id, used as map key.
    pub fn key(&self) -> String {
        self.id.to_ascii_lowercase()
    }
}

impl PartialEq for PackageIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.same_id(other) && self.spec == other.spec
    }
}

impl Eq for PackageIdentifier {}

impl Hash for PackageIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for PackageIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.same_id(other) {
            return None;
        }
        match (&self.spec, &other.spec) {
            (VersionSpec::Exact(a), VersionSpec::Exact(b)) => Some(a.cmp(b)),
            (VersionSpec::Any, VersionSpec::Any) => Some(Ordering::Equal),
            (a, b) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {}", self.id, version),
            None => write!(f, "{}", self.id),
        }
    }
}

impl FromStr for PackageIdentifier {
    type Err = VersionError;

    /// Parses `Id` or `Id@version-or-range`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((id, version)) => PackageIdentifier::new(id, Some(version)),
            None => PackageIdentifier::new(s, None),
        }
    }
}

/// The dependencies declared for one target framework.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DependencyGroup {
    /// Short framework folder name; empty when unrestricted.
    pub target_framework: String,
    pub dependencies: Vec<PackageIdentifier>,
}

/// The feed a package was found on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub name: String,
    pub url: String,
    pub is_local: bool,
}

/// Where the package archive can be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageLocation {
    Remote(String),
    Local(PathBuf),
}

/// A concrete package version and its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub identifier: PackageIdentifier,
    pub version: SemVersion,
    pub title: Option<String>,
    pub description: Option<String>,
    pub authors: Option<String>,
    pub dependency_groups: Vec<DependencyGroup>,
    pub source: Option<SourceRef>,
    pub location: Option<PackageLocation>,
}

impl Package {
    pub fn new(id: impl Into<String>, version: SemVersion) -> Result<Self, VersionError> {
        Ok(Self {
            identifier: PackageIdentifier::exact(id, &version)?,
            version,
            title: None,
            description: None,
            authors: None,
            dependency_groups: Vec::new(),
            source: None,
            location: None,
        })
    }

    pub fn from_nuspec(nuspec: Nuspec) -> Result<Self, VersionError> {
        let version = SemVersion::parse(&nuspec.version)?;
        let mut package = Package::new(nuspec.id, version)?;
        package.title = nuspec.title;
        package.description = nuspec.description;
        package.authors = nuspec.authors;
        package.dependency_groups = nuspec.dependency_groups;
        Ok(package)
    }

    pub fn id(&self) -> &str {
        self.identifier.id()
    }

    /// `<Id>.<Version>`, the install directory name.
    pub fn dir_name(&self) -> String {
        format!("{}.{}", self.id(), self.version)
    }

    /// `<Id>.<Version>.nupkg`, the archive file name.
    pub fn archive_name(&self) -> String {
        format!("{}.{}", self.dir_name(), ARCHIVE_EXTENSION)
    }

    pub fn with_source(mut self, source: SourceRef, location: PackageLocation) -> Self {
        self.source = Some(source);
        self.location = Some(location);
        self
    }

    pub fn with_location(mut self, location: PackageLocation) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id(), self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(id: &str, version: Option<&str>) -> PackageIdentifier {
        PackageIdentifier::new(id, version).unwrap()
    }

    fn v(s: &str) -> SemVersion {
        SemVersion::parse(s).unwrap()
    }

    #[test]
    fn test_identifier_requires_id() {
        assert_eq!(
            PackageIdentifier::new("  ", Some("1.0")).unwrap_err(),
            VersionError::EmptyId
        );
    }

    #[test]
    fn test_identifier_rejects_bad_version() {
        assert!(PackageIdentifier::new("A", Some("not-a-version")).is_err());
        assert!(PackageIdentifier::new("A", Some("[2.0,1.0]")).is_err());
    }

    #[test]
    fn test_exact_identifier_equals_and_contains_itself() {
        for version in ["1.0", "2.3.4-beta", "1.2.3.4"] {
            let p = ident("Pkg", Some(version));
            assert!(p == p.clone());
            assert!(p.in_range(&p));
            assert!(p.in_range_version(p.exact_version().unwrap()));
        }
    }

    #[test]
    fn test_ids_compare_case_insensitively() {
        assert_eq!(ident("Newtonsoft.Json", Some("1.0")), ident("newtonsoft.json", Some("1.0.0")));
        assert_ne!(ident("A", Some("1.0")), ident("B", Some("1.0")));
    }

    #[test]
    fn test_key_folds_like_equality() {
        use std::collections::HashSet;

        let ascii = [ident("Contoso.Core", Some("1.0")), ident("CONTOSO.core", Some("1.0"))];
        assert_eq!(ascii[0].key(), ascii[1].key());
        assert_eq!(ascii.iter().collect::<HashSet<_>>().len(), 1);

        // Only ASCII letters fold, for keys and equality alike.
        let accented = [ident("Paket.Ä", Some("1.0")), ident("paket.ä", Some("1.0"))];
        assert_ne!(accented[0], accented[1]);
        assert_ne!(accented[0].key(), accented[1].key());
        assert_eq!(accented.iter().collect::<HashSet<_>>().len(), 2);
    }

    #[test]
    fn test_ordering_between_exact_versions() {
        let older = ident("A", Some("1.0"));
        let newer = ident("A", Some("2.0"));
        assert!(older < newer);
        assert!(newer > older);
        assert!(!(older == newer));
    }

    #[test]
    fn test_ordering_undefined_across_ids_and_ranges() {
        assert_eq!(ident("A", Some("1.0")).partial_cmp(&ident("B", Some("2.0"))), None);
        assert_eq!(ident("A", Some("[1.0,)")).partial_cmp(&ident("A", Some("2.0"))), None);
    }

    #[test]
    fn test_in_range_with_range_identifier() {
        let request = ident("A", Some("[1.0,2.0)"));
        assert!(request.in_range(&ident("A", Some("1.0"))));
        assert!(request.in_range(&ident("A", Some("1.9.9"))));
        assert!(!request.in_range(&ident("A", Some("2.0"))));
    }

    #[test]
    fn test_missing_version_always_satisfies() {
        let any = ident("A", None);
        assert!(any.in_range(&ident("A", Some("0.0.1"))));
        assert!(any.in_range(&ident("A", Some("99.0-alpha"))));

        let exact = ident("A", Some("1.0"));
        assert!(exact.in_range(&ident("A", None)));
    }

    #[test]
    fn test_identifier_from_str() {
        let p: PackageIdentifier = "Newtonsoft.Json@13.0.1".parse().unwrap();
        assert_eq!(p.id(), "Newtonsoft.Json");
        assert_eq!(p.version(), Some("13.0.1"));
        assert!(p.is_exact());

        let p: PackageIdentifier = "Serilog@[2.0,3.0)".parse().unwrap();
        assert!(!p.is_exact());

        let p: PackageIdentifier = "Serilog".parse().unwrap();
        assert_eq!(p.version(), None);
        assert_eq!(p.to_string(), "Serilog");
    }

    #[test]
    fn test_package_names() {
        let package = Package::new("Newtonsoft.Json", v("13.0.1")).unwrap();
        assert_eq!(package.dir_name(), "Newtonsoft.Json.13.0.1");
        assert_eq!(package.archive_name(), "Newtonsoft.Json.13.0.1.nupkg");
        assert!(package.identifier.is_exact());
        assert_eq!(package.to_string(), "Newtonsoft.Json 13.0.1");
    }

    #[test]
    fn test_package_from_nuspec_requires_exact_version() {
        let nuspec = Nuspec {
            id: "A".into(),
            version: "[1.0,)".into(),
            ..Default::default()
        };
        assert!(Package::from_nuspec(nuspec).is_err());
    }
}
