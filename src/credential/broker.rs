use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::http::HttpClient;
use crate::runtime::Runtime;

use super::bootstrap::{BundlePattern, default_bundle_patterns, install_bundles};
use super::{Credential, CredentialLookup, ProcessRunner, is_provider_name, truncate_feed_uri};

/// Environment variable listing extra provider directories, `;`-separated.
pub const PROVIDER_PATH_ENV: &str = "NUGET_CREDENTIALPROVIDERS_PATH";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

enum ProviderOutcome {
    Found(Credential),
    /// A provider claimed the feed but failed; stop searching.
    Failed,
    /// Every provider declined, or none exist.
    NotApplicable,
}

/// Resolves feed credentials through external credential providers,
/// caching every outcome per truncated feed URI.
pub struct CredentialBroker<R: Runtime> {
    runtime: Arc<R>,
    runner: Arc<dyn ProcessRunner>,
    http_client: HttpClient,
    bundle_patterns: Vec<BundlePattern>,
    timeout: Duration,
    cache: Mutex<HashMap<String, Option<Credential>>>,
}

impl<R: Runtime> CredentialBroker<R> {
    pub fn new(runtime: Arc<R>, runner: Arc<dyn ProcessRunner>, http_client: HttpClient) -> Self {
        Self {
            runtime,
            runner,
            http_client,
            bundle_patterns: default_bundle_patterns(),
            timeout: DEFAULT_TIMEOUT,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bundle_patterns(mut self, patterns: Vec<BundlePattern>) -> Self {
        self.bundle_patterns = patterns;
        self
    }

    fn cached(&self, key: &str) -> Option<Option<Credential>> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(key).cloned()
    }

    fn store(&self, key: String, credential: Option<Credential>) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, credential);
    }

    fn env_provider_dirs(&self) -> Vec<PathBuf> {
        self.runtime
            .env_var(PROVIDER_PATH_ENV)
            .map(|value| {
                value
                    .split(';')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn local_data_provider_dir(&self) -> Option<PathBuf> {
        self.runtime
            .data_local_dir()
            .map(|d| d.join("NuGet").join("CredentialProviders"))
    }

    /// Directories searched for providers, in order.
    pub fn provider_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        dirs.extend(self.local_data_provider_dir());
        dirs.extend(self.env_provider_dirs());
        dirs.extend(
            self.runtime
                .home_dir()
                .map(|h| h.join(".nuget").join("plugins").join("netfx")),
        );
        dirs
    }

    /// Where downloaded bundles are unpacked.
    fn bootstrap_dir(&self) -> Option<PathBuf> {
        self.env_provider_dirs()
            .into_iter()
            .next()
            .or_else(|| self.local_data_provider_dir())
    }

    /// Every provider executable below the provider directories.
    pub fn find_providers(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for dir in self.provider_dirs() {
            self.collect_providers(&dir, &mut found);
        }
        let mut seen = HashSet::new();
        found.retain(|path| seen.insert(path.clone()));
        found
    }

    fn collect_providers(&self, dir: &Path, found: &mut Vec<PathBuf>) {
        if !self.runtime.is_dir(dir) {
            return;
        }
        let entries = match self.runtime.read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read provider directory {:?}: {}", dir, e);
                return;
            }
        };
        for entry in entries {
            if self.runtime.is_dir(&entry) {
                self.collect_providers(&entry, found);
            } else if entry
                .file_name()
                .is_some_and(|name| is_provider_name(&name.to_string_lossy()))
            {
                found.push(entry);
            }
        }
    }

    async fn run_providers(&self, feed_uri: &str) -> ProviderOutcome {
        let args = vec!["-uri".to_string(), feed_uri.to_string()];

        for provider in self.find_providers() {
            debug!("Trying credential provider {:?} for {}", provider, feed_uri);
            let output = match self.runner.run(&provider, &args, Some(self.timeout)).await {
                Ok(output) => output,
                Err(e) => {
                    warn!("Credential provider {:?} could not run: {:#}", provider, e);
                    continue;
                }
            };

            match output.exit_code {
                Some(0) => match serde_json::from_str::<Credential>(output.stdout.trim()) {
                    Ok(credential) => {
                        info!("Credential for {} provided by {:?}", feed_uri, provider);
                        return ProviderOutcome::Found(credential);
                    }
                    Err(e) => {
                        warn!(
                            "Credential provider {:?} returned unreadable output: {}",
                            provider, e
                        );
                    }
                },
                Some(1) => debug!("Credential provider {:?} declined {}", provider, feed_uri),
                Some(2) => {
                    warn!(
                        "Credential provider {:?} failed for {}: {} {}",
                        provider,
                        feed_uri,
                        output.stdout.trim(),
                        output.stderr.trim()
                    );
                    return ProviderOutcome::Failed;
                }
                other => warn!(
                    "Credential provider {:?} exited with {:?}: {}",
                    provider,
                    other,
                    output.stderr.trim()
                ),
            }
        }

        ProviderOutcome::NotApplicable
    }

    async fn resolve(&self, feed_uri: &str) -> Option<Credential> {
        match self.run_providers(feed_uri).await {
            ProviderOutcome::Found(credential) => return Some(credential),
            ProviderOutcome::Failed => return None,
            ProviderOutcome::NotApplicable => {}
        }

        let Some(dest) = self.bootstrap_dir() else {
            return None;
        };
        if !self
            .bundle_patterns
            .iter()
            .any(|p| p.bundle_url(feed_uri).is_some())
        {
            return None;
        }

        match install_bundles(
            self.runtime.as_ref(),
            &self.http_client,
            &self.bundle_patterns,
            feed_uri,
            &dest,
        )
        .await
        {
            Ok(installed) if !installed.is_empty() => {
                info!("Installed {} credential provider(s) into {:?}", installed.len(), dest);
            }
            Ok(_) => {
                warn!("Credential provider bundle for {} contained no providers", feed_uri);
                return None;
            }
            Err(e) => {
                warn!("Failed to download credential providers for {}: {:#}", feed_uri, e);
                return None;
            }
        }

        // Single retry, no second download.
        match self.run_providers(feed_uri).await {
            ProviderOutcome::Found(credential) => Some(credential),
            _ => None,
        }
    }

    /// Credential for `feed_uri`, consulting the cache first.
    #[tracing::instrument(skip(self))]
    pub async fn get_credential(&self, feed_uri: &str) -> Option<Credential> {
        let key = truncate_feed_uri(feed_uri);
        if let Some(cached) = self.cached(&key) {
            debug!("Credential cache hit for {}", key);
            return cached;
        }

        let credential = self.resolve(&key).await;
        self.store(key, credential.clone());
        credential
    }

    /// Forget every cached outcome.
    pub fn clear(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.clear();
    }
}

#[async_trait]
impl<R: Runtime> CredentialLookup for CredentialBroker<R> {
    async fn get_credential(&self, feed_uri: &str) -> Option<Credential> {
        CredentialBroker::get_credential(self, feed_uri).await
    }

    fn clear(&self) {
        CredentialBroker::clear(self)
    }
}
