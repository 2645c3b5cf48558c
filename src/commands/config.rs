use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::framework::{HostVersion, RuntimeProfile};
use crate::installer::{RelocationOverrides, Relocations};
use crate::runtime::Runtime;
use crate::session::SessionSettings;
use crate::source::SourceConfig;

/// Name of the per-project configuration file.
pub const CONFIG_FILE_NAME: &str = "nupm.json";

/// Overrides the default package cache directory.
pub const CACHE_DIR_ENV: &str = "NUPM_CACHE";

fn default_true() -> bool {
    true
}

fn default_provider_timeout() -> u64 {
    60
}

/// Persisted settings. Relative paths are taken from the project directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub install_from_cache: bool,
    #[serde(default)]
    pub read_only_package_files: bool,
    #[serde(default)]
    pub runtime_profile: RuntimeProfile,
    #[serde(default)]
    pub host_version: HostVersion,
    #[serde(default)]
    pub provided_packages: Vec<String>,
    #[serde(default = "default_provider_timeout")]
    pub credential_provider_timeout_secs: u64,
    #[serde(default)]
    pub relocations: RelocationOverrides,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            install_root: None,
            manifest_path: None,
            cache_dir: None,
            install_from_cache: true,
            read_only_package_files: false,
            runtime_profile: RuntimeProfile::default(),
            host_version: HostVersion::default(),
            provided_packages: Vec::new(),
            credential_provider_timeout_secs: default_provider_timeout(),
            relocations: RelocationOverrides::default(),
        }
    }
}

impl Config {
    /// Load `explicit` when given, else `<project>/nupm.json` when present,
    /// else the defaults.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, project: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = project.join(CONFIG_FILE_NAME);
                if !runtime.exists(&path) {
                    debug!("No configuration at {:?}, using defaults", path);
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = runtime
            .read_to_string(&path)
            .with_context(|| format!("Failed to read configuration {:?}", path))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid configuration in {:?}", path))?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Configured sources, or nuget.org when there are none.
    pub fn effective_sources(&self) -> Vec<SourceConfig> {
        if self.sources.is_empty() {
            vec![SourceConfig::nuget_org()]
        } else {
            self.sources.clone()
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.credential_provider_timeout_secs)
    }

    /// Session layout for `project`.
    pub fn session_settings<R: Runtime>(&self, runtime: &R, project: &Path) -> Result<SessionSettings> {
        let cache_dir = match &self.cache_dir {
            Some(dir) => project.join(dir),
            None => default_cache_dir(runtime)?,
        };

        let mut settings = SessionSettings::for_project(project, &cache_dir);
        if let Some(root) = &self.install_root {
            settings.install_root = project.join(root);
        }
        if let Some(manifest) = &self.manifest_path {
            settings.manifest_path = project.join(manifest);
        }
        settings.install_from_cache = self.install_from_cache;
        settings.read_only_package_files = self.read_only_package_files;

        let overrides = RelocationOverrides {
            tools: self.relocations.tools.as_ref().map(|p| project.join(p)),
            android: self.relocations.android.as_ref().map(|p| project.join(p)),
            ios: self.relocations.ios.as_ref().map(|p| project.join(p)),
            streaming_assets: self.relocations.streaming_assets.as_ref().map(|p| project.join(p)),
        };
        settings.relocations = Relocations::for_project(project).with_overrides(&overrides);
        Ok(settings)
    }
}

/// `NUPM_CACHE`, else `<cache dir>/nupm/packages`.
pub fn default_cache_dir<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    if let Ok(dir) = runtime.env_var(CACHE_DIR_ENV)
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    let base = runtime
        .cache_dir()
        .context("Could not determine the cache directory")?;
    Ok(base.join("nupm").join("packages"))
}
