//! Target framework compatibility ranking.
//!
//! Target framework monikers are opaque strings. Instead of parsing them,
//! the resolver holds an explicit preference ladder: ordered groups of
//! acceptable monikers, each group ordered from most to least specific.
//! A candidate's priority is `group_index * 1000 + index_within_group`;
//! the candidate with the lowest priority wins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::package::DependencyGroup;

/// Folder names of the legacy compatibility family; pruning keeps all of
/// them together when the best match is one of them.
pub const LEGACY_FAMILY: [&str; 3] = ["unity", "net35-unity full v3.5", "net35-unity subset v3.5"];

const GROUP_STRIDE: usize = 1000;

/// Host version from which `netstandard2.1` and `net48` are offered.
const MODERN_API_HOST: HostVersion = HostVersion::new(2021, 2);

const NETSTANDARD_BELOW_21: [&str; 7] = [
    "netstandard2.0",
    "netstandard1.6",
    "netstandard1.5",
    "netstandard1.4",
    "netstandard1.3",
    "netstandard1.2",
    "netstandard1.1",
];

const NETFRAMEWORK_BELOW_48: [&str; 17] = [
    "net472",
    "net471",
    "net47",
    "net462",
    "net461",
    "net46",
    "net452",
    "net451",
    "net45",
    "net403",
    "net40",
    "net4",
    "net35-unity full v3.5",
    "net35-unity subset v3.5",
    "net35",
    "net20",
    "net11",
];

/// The scripting runtime profile the host compiles against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeProfile {
    /// .NET Standard 2.x, cross-platform.
    #[default]
    Modern,
    /// .NET Framework 4.x.
    Full,
}

impl fmt::Display for RuntimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeProfile::Modern => write!(f, "modern"),
            RuntimeProfile::Full => write!(f, "full"),
        }
    }
}

impl FromStr for RuntimeProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "modern" | "netstandard" => Ok(RuntimeProfile::Modern),
            "full" | "netframework" => Ok(RuntimeProfile::Full),
            _ => anyhow::bail!("Unknown runtime profile: {}. Expected modern or full.", s),
        }
    }
}

/// The host application's own `major.minor` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostVersion {
    pub major: u32,
    pub minor: u32,
}

impl HostVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl Default for HostVersion {
    fn default() -> Self {
        HostVersion::new(2022, 3)
    }
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for HostVersion {
    type Err = anyhow::Error;

    /// Accepts `2021.3`, `2021.3.5` or `2021.3.5f1`; only major and minor matter.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("Invalid host version: {}", s))?;
        let minor = match parts.next() {
            Some(p) => {
                let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid host version: {}", s))?
            }
            None => 0,
        };
        Ok(HostVersion::new(major, minor))
    }
}

impl Serialize for HostVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HostVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ranks candidate target framework monikers against the preference ladder
/// built for one runtime profile and host version.
#[derive(Debug, Clone)]
pub struct FrameworkResolver {
    groups: Vec<Vec<&'static str>>,
}

impl FrameworkResolver {
    pub fn new(profile: RuntimeProfile, host: HostVersion) -> Self {
        let modern_host = host >= MODERN_API_HOST;

        let mut netstandard = Vec::new();
        if modern_host {
            netstandard.push("netstandard2.1");
        }
        netstandard.extend(NETSTANDARD_BELOW_21);
        netstandard.push("netstandard1.0");

        let mut netframework = Vec::new();
        if modern_host {
            netframework.push("net48");
        }
        netframework.extend(NETFRAMEWORK_BELOW_48);

        let unity = vec!["unity"];
        let unrestricted = vec![""];

        let groups = match profile {
            RuntimeProfile::Modern => vec![unity, netstandard, netframework, unrestricted],
            RuntimeProfile::Full => vec![unity, netframework, netstandard, unrestricted],
        };

        Self { groups }
    }

    /// The preference ladder, most preferred group first.
    pub fn groups(&self) -> &[Vec<&'static str>] {
        &self.groups
    }

    /// Priority of a candidate, or `None` when it matches no ladder entry.
    ///
    /// A candidate matches an entry when equal to it ignoring case, or
    /// equal after removing every `.` from the candidate.
    pub fn priority(&self, candidate: &str) -> Option<usize> {
        self.groups
            .iter()
            .enumerate()
            .find_map(|(group_index, group)| {
                group
                    .iter()
                    .position(|entry| moniker_matches(entry, candidate))
                    .map(|index| group_index * GROUP_STRIDE + index)
            })
    }

    /// The best candidate; earlier candidates win ties.
    pub fn best_match<'a, I>(&self, candidates: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(usize, &'a str)> = None;
        for candidate in candidates {
            if let Some(priority) = self.priority(candidate)
                && best.is_none_or(|(current, _)| priority < current)
            {
                best = Some((priority, candidate));
            }
        }
        best.map(|(_, candidate)| candidate)
    }

    /// The dependency group whose framework ranks best.
    pub fn best_dependency_group<'a>(
        &self,
        groups: &'a [DependencyGroup],
    ) -> Option<&'a DependencyGroup> {
        let best = self.best_match(groups.iter().map(|g| g.target_framework.as_str()))?;
        groups.iter().find(|g| g.target_framework == best)
    }

    /// Whether the matched framework belongs to the legacy compatibility family.
    pub fn is_legacy_family(framework: &str) -> bool {
        LEGACY_FAMILY
            .iter()
            .any(|name| name.eq_ignore_ascii_case(framework))
    }
}

/// Whether `candidate` names the ladder entry `entry`: equal ignoring case,
/// or equal once every `.` is removed from the candidate.
pub fn moniker_matches(entry: &str, candidate: &str) -> bool {
    entry.eq_ignore_ascii_case(candidate) || entry.eq_ignore_ascii_case(&candidate.replace('.', ""))
}

/// Convert a manifest framework name to its short folder form.
///
/// `.NETStandard2.0` and `.NETStandard,Version=v2.0` become `netstandard2.0`,
/// `.NETFramework4.7.2` becomes `net472`, `Unity` becomes `unity`. Anything
/// else is lower-cased unchanged.
pub fn short_folder_name(framework: &str) -> String {
    let lower = framework.trim().to_lowercase();
    let lower = lower.replace(",version=v", "").replace(",version=", "");

    if let Some(rest) = lower.strip_prefix(".netstandard") {
        format!("netstandard{}", rest)
    } else if let Some(rest) = lower.strip_prefix(".netframework") {
        format!("net{}", rest.replace('.', ""))
    } else {
        lower
    }
}
