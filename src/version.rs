//! Package versions and version ranges.
//!
//! A version is one to four numeric components with an optional
//! `-prerelease` tag and `+build` metadata (ignored for precedence).
//! Ranges use interval notation: `[1.0,2.0)`, `(,1.5]`, `[1.2]`.
//! A bare version is the singleton range containing only itself, and an
//! empty or `*` version admits everything.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing versions, ranges or identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    #[error("Invalid version range '{0}'")]
    InvalidRange(String),

    #[error("Package id must not be empty")]
    EmptyId,
}

/// An exact package version.
#[derive(Debug, Clone)]
pub struct SemVersion {
    numbers: [u64; 4],
    prerelease: Vec<String>,
    build: Option<String>,
    original: String,
}

impl SemVersion {
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let original = s.trim();
        if original.is_empty() {
            return Err(VersionError::InvalidVersion(s.to_string()));
        }
        let invalid = || VersionError::InvalidVersion(original.to_string());

        let (without_build, build) = match original.split_once('+') {
            Some((v, b)) if !b.is_empty() => (v, Some(b.to_string())),
            Some(_) => return Err(invalid()),
            None => (original, None),
        };

        let (core, prerelease) = match without_build.split_once('-') {
            Some((c, p)) => {
                let tags: Vec<String> = p.split('.').map(str::to_string).collect();
                let valid = tags.iter().all(|t| {
                    !t.is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                });
                if !valid {
                    return Err(invalid());
                }
                (c, tags)
            }
            None => (without_build, Vec::new()),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(invalid());
        }

        let mut numbers = [0u64; 4];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        Ok(SemVersion {
            numbers,
            prerelease,
            build,
            original: original.to_string(),
        })
    }

    pub fn major(&self) -> u64 {
        self.numbers[0]
    }

    pub fn minor(&self) -> u64 {
        self.numbers[1]
    }

    pub fn patch(&self) -> u64 {
        self.numbers[2]
    }

    pub fn revision(&self) -> u64 {
        self.numbers[3]
    }

    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    /// The text the version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Normalized form: at least three components, the fourth only when
    /// non-zero, pre-release kept, build metadata dropped.
    pub fn normalized(&self) -> String {
        let mut s = format!(
            "{}.{}.{}",
            self.numbers[0], self.numbers[1], self.numbers[2]
        );
        if self.numbers[3] != 0 {
            s.push_str(&format!(".{}", self.numbers[3]));
        }
        if self.is_prerelease() {
            s.push('-');
            s.push_str(&self.prerelease.join("."));
        }
        s
    }

    fn compare_prerelease(a: &[String], b: &[String]) -> Ordering {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Ordering::Equal,
            // A release sorts above any of its pre-releases
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }

        for (x, y) in a.iter().zip(b) {
            let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase()),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        a.len().cmp(&b.len())
    }
}

impl PartialEq for SemVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemVersion {}

impl PartialOrd for SemVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numbers
            .cmp(&other.numbers)
            .then_with(|| Self::compare_prerelease(&self.prerelease, &other.prerelease))
    }
}

impl Hash for SemVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.numbers.hash(state);
        for tag in &self.prerelease {
            tag.to_ascii_lowercase().hash(state);
        }
    }
}

impl fmt::Display for SemVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for SemVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SemVersion::parse(s)
    }
}

/// An interval of versions with optional, inclusive or exclusive bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub min: Option<SemVersion>,
    pub min_inclusive: bool,
    pub max: Option<SemVersion>,
    pub max_inclusive: bool,
}

impl VersionRange {
    /// The range admitting every version.
    pub fn any() -> Self {
        VersionRange {
            min: None,
            min_inclusive: false,
            max: None,
            max_inclusive: false,
        }
    }

    /// The singleton range `[v]`.
    pub fn exact(version: SemVersion) -> Self {
        VersionRange {
            min: Some(version.clone()),
            min_inclusive: true,
            max: Some(version),
            max_inclusive: true,
        }
    }

    /// `[v,)`.
    pub fn at_least(version: SemVersion) -> Self {
        VersionRange {
            min: Some(version),
            min_inclusive: true,
            max: None,
            max_inclusive: false,
        }
    }

    /// Parse interval notation, e.g. `[1.0,2.0)` or `[1.2]`.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let text = s.trim();
        let invalid = || VersionError::InvalidRange(text.to_string());

        let min_inclusive = match text.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(invalid()),
        };
        let max_inclusive = match text.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(invalid()),
        };
        if text.len() < 2 {
            return Err(invalid());
        }
        let inner = text[1..text.len() - 1].trim();

        let Some((lower, upper)) = inner.split_once(',') else {
            // `[1.0]` is the only form without a comma
            if !(min_inclusive && max_inclusive) || inner.is_empty() {
                return Err(invalid());
            }
            let version = SemVersion::parse(inner).map_err(|_| invalid())?;
            return Ok(VersionRange::exact(version));
        };

        let parse_bound = |bound: &str| -> Result<Option<SemVersion>, VersionError> {
            let bound = bound.trim();
            if bound.is_empty() {
                Ok(None)
            } else {
                SemVersion::parse(bound).map(Some).map_err(|_| invalid())
            }
        };
        let min = parse_bound(lower)?;
        let max = parse_bound(upper)?;

        if let (Some(lo), Some(hi)) = (&min, &max) {
            match lo.cmp(hi) {
                Ordering::Greater => return Err(invalid()),
                Ordering::Equal if !(min_inclusive && max_inclusive) => return Err(invalid()),
                _ => {}
            }
        }

        Ok(VersionRange {
            min_inclusive: min_inclusive && min.is_some(),
            max_inclusive: max_inclusive && max.is_some(),
            min,
            max,
        })
    }

    pub fn contains(&self, version: &SemVersion) -> bool {
        let above_min = match &self.min {
            Some(min) if self.min_inclusive => version >= min,
            Some(min) => version > min,
            None => true,
        };
        let below_max = match &self.max {
            Some(max) if self.max_inclusive => version <= max,
            Some(max) => version < max,
            None => true,
        };
        above_min && below_max
    }

    pub fn is_singleton(&self) -> bool {
        self.min_inclusive && self.max_inclusive && self.min.is_some() && self.min == self.max
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_singleton() {
            if let Some(v) = &self.min {
                return write!(f, "[{}]", v);
            }
        }
        let open = if self.min_inclusive { '[' } else { '(' };
        let close = if self.max_inclusive { ']' } else { ')' };
        let min = self.min.as_ref().map(|v| v.to_string()).unwrap_or_default();
        let max = self.max.as_ref().map(|v| v.to_string()).unwrap_or_default();
        write!(f, "{}{},{}{}", open, min, max, close)
    }
}

/// What an identifier's version field asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// No version given: every version satisfies it.
    Any,
    Exact(SemVersion),
    Range(VersionRange),
}

impl VersionSpec {
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let text = s.trim();
        if text.is_empty() || text == "*" {
            return Ok(VersionSpec::Any);
        }
        if text.starts_with('[') || text.starts_with('(') {
            let range = VersionRange::parse(text)?;
            if range.is_singleton() {
                if let Some(v) = range.min {
                    return Ok(VersionSpec::Exact(v));
                }
            }
            return Ok(VersionSpec::Range(range));
        }
        SemVersion::parse(text).map(VersionSpec::Exact)
    }

    pub fn contains(&self, version: &SemVersion) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Exact(v) => v == version,
            VersionSpec::Range(range) => range.contains(version),
        }
    }

    /// The version that represents this spec when ordering: the exact
    /// version, or the range's lower bound (upper bound if unbounded below).
    pub fn anchor(&self) -> Option<&SemVersion> {
        match self {
            VersionSpec::Any => None,
            VersionSpec::Exact(v) => Some(v),
            VersionSpec::Range(range) => range.min.as_ref().or(range.max.as_ref()),
        }
    }

    /// Whether pre-release candidates should be considered for this spec.
    pub fn allows_prerelease(&self) -> bool {
        match self {
            VersionSpec::Any => false,
            VersionSpec::Exact(v) => v.is_prerelease(),
            VersionSpec::Range(range) => {
                range.min.as_ref().is_some_and(SemVersion::is_prerelease)
                    || range.max.as_ref().is_some_and(SemVersion::is_prerelease)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> SemVersion {
        SemVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_components() {
        let version = v("1.2.3.4-beta.2+sha.abc");
        assert_eq!(version.major(), 1);
        assert_eq!(version.minor(), 2);
        assert_eq!(version.patch(), 3);
        assert_eq!(version.revision(), 4);
        assert!(version.is_prerelease());
        assert_eq!(version.build(), Some("sha.abc"));
        assert_eq!(version.to_string(), "1.2.3.4-beta.2+sha.abc");
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", "a.b", "1..2", "1.2.3.4.5", "1.0-", "1.0+", "1.0-be_ta", "-1.0"] {
            assert!(SemVersion::parse(bad).is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_missing_components_compare_as_zero() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1"), v("1.0.0.0"));
        assert!(v("1.0.0.1") > v("1.0"));
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("2.0") > v("1.99.99"));
        assert!(v("0.0.1") < v("0.1"));
    }

    #[test]
    fn test_prerelease_sorts_below_release() {
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-alpha.1"));
        assert!(v("1.0.0-alpha.1") < v("1.0.0-alpha.beta"));
        assert!(v("1.0.0-beta.2") < v("1.0.0-beta.11"));
        assert!(v("1.0.0-rc.1") > v("1.0.0-beta.11"));
        assert_eq!(v("1.0.0-RC"), v("1.0.0-rc"));
    }

    #[test]
    fn test_build_metadata_ignored() {
        assert_eq!(v("1.0.0+a"), v("1.0.0+b"));
    }

    #[test]
    fn test_normalized() {
        assert_eq!(v("1.0").normalized(), "1.0.0");
        assert_eq!(v("1.2.3.0").normalized(), "1.2.3");
        assert_eq!(v("1.2.3.4").normalized(), "1.2.3.4");
        assert_eq!(v("1.0-beta+x").normalized(), "1.0.0-beta");
    }

    #[test]
    fn test_range_inclusive_exclusive() {
        let range = VersionRange::parse("[1.0,2.0)").unwrap();
        assert!(range.contains(&v("1.0")));
        assert!(range.contains(&v("1.5.3")));
        assert!(!range.contains(&v("2.0")));
        assert!(!range.contains(&v("0.9")));

        let range = VersionRange::parse("(1.0,2.0]").unwrap();
        assert!(!range.contains(&v("1.0")));
        assert!(range.contains(&v("2.0")));
    }

    #[test]
    fn test_range_open_ended() {
        let range = VersionRange::parse("[1.0,)").unwrap();
        assert!(range.contains(&v("99.0")));
        assert!(!range.contains(&v("0.9")));

        let range = VersionRange::parse("(,1.0]").unwrap();
        assert!(range.contains(&v("0.1")));
        assert!(!range.contains(&v("1.0.1")));
    }

    #[test]
    fn test_range_singleton() {
        let range = VersionRange::parse("[1.2]").unwrap();
        assert!(range.is_singleton());
        assert!(range.contains(&v("1.2.0")));
        assert!(!range.contains(&v("1.2.1")));
        assert_eq!(range.to_string(), "[1.2]");
    }

    #[test]
    fn test_range_invalid() {
        for bad in ["[", "[1.0", "1.0]", "(1.0)", "[2.0,1.0]", "(1.0,1.0]", "[]", "[x,2.0]"] {
            assert!(VersionRange::parse(bad).is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_range_display() {
        assert_eq!(VersionRange::parse("[1.0,2.0)").unwrap().to_string(), "[1.0,2.0)");
        assert_eq!(VersionRange::parse("(,3.0]").unwrap().to_string(), "(,3.0]");
    }

    #[test]
    fn test_spec_parse() {
        assert_eq!(VersionSpec::parse("").unwrap(), VersionSpec::Any);
        assert_eq!(VersionSpec::parse("*").unwrap(), VersionSpec::Any);
        assert_eq!(VersionSpec::parse("1.0").unwrap(), VersionSpec::Exact(v("1.0")));
        assert_eq!(VersionSpec::parse("[1.0]").unwrap(), VersionSpec::Exact(v("1.0")));
        assert!(matches!(
            VersionSpec::parse("[1.0,)").unwrap(),
            VersionSpec::Range(_)
        ));
    }

    #[test]
    fn test_spec_exact_is_singleton() {
        let spec = VersionSpec::parse("1.0").unwrap();
        assert!(spec.contains(&v("1.0.0")));
        assert!(!spec.contains(&v("1.0.1")));
    }

    #[test]
    fn test_spec_any_contains_everything() {
        let spec = VersionSpec::Any;
        assert!(spec.contains(&v("0.0.1-alpha")));
        assert!(spec.anchor().is_none());
    }

    #[test]
    fn test_spec_allows_prerelease() {
        assert!(!VersionSpec::parse("[1.0,)").unwrap().allows_prerelease());
        assert!(VersionSpec::parse("[1.0-beta,)").unwrap().allows_prerelease());
        assert!(VersionSpec::parse("2.0-rc.1").unwrap().allows_prerelease());
    }
}
