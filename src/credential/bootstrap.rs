//! Downloading credential-provider bundles for known authenticated feeds.

use anyhow::{Context, Result};
use log::{debug, info};
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::archive::{ArchiveExtractor, ArchiveExtractorImpl};
use crate::download::download_file;
use crate::http::HttpClient;
use crate::runtime::Runtime;

use super::is_provider_name;

const DEFAULT_PATTERNS: [(&str, &str); 2] = [
    (
        r"^https://(?P<account>[-a-zA-Z0-9]+)\.pkgs\.visualstudio\.com/",
        "https://{account}.pkgs.visualstudio.com/_apis/public/nuget/client/CredentialProviderBundle.zip",
    ),
    (
        r"^https://pkgs\.dev\.azure\.com/(?P<account>[-a-zA-Z0-9]+)/",
        "https://pkgs.dev.azure.com/{account}/_apis/public/nuget/client/CredentialProviderBundle.zip",
    ),
];

const DEFAULT_BUNDLE_NAME: &str = "CredentialProviderBundle.zip";

/// A feed URI pattern capturing an `account`, paired with the URL of the
/// provider bundle for that account.
#[derive(Debug, Clone)]
pub struct BundlePattern {
    pattern: Regex,
    url_template: String,
}

impl BundlePattern {
    pub fn new(pattern: &str, url_template: &str) -> Result<Self> {
        let pattern =
            Regex::new(pattern).with_context(|| format!("Invalid feed pattern {}", pattern))?;
        Ok(Self {
            pattern,
            url_template: url_template.to_string(),
        })
    }

    /// The bundle URL for `feed_uri`, if the pattern matches it.
    pub fn bundle_url(&self, feed_uri: &str) -> Option<String> {
        let captures = self.pattern.captures(feed_uri)?;
        let account = captures.name("account").map_or("", |m| m.as_str());
        Some(self.url_template.replace("{account}", account))
    }
}

/// Patterns for Azure DevOps / Visual Studio Team Services feeds.
pub fn default_bundle_patterns() -> Vec<BundlePattern> {
    DEFAULT_PATTERNS
        .iter()
        .filter_map(|(pattern, template)| BundlePattern::new(pattern, template).ok())
        .collect()
}

fn bundle_file_name(url: &str) -> String {
    let name = url
        .split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .unwrap_or_default();
    if ArchiveExtractorImpl::new().can_handle(Path::new(name)) {
        name.to_string()
    } else {
        DEFAULT_BUNDLE_NAME.to_string()
    }
}

/// Download and unpack the bundle of every pattern matching `feed_uri` into
/// `dest`. Returns the provider executables written.
#[tracing::instrument(skip(runtime, http_client, patterns))]
pub async fn install_bundles<R: Runtime>(
    runtime: &R,
    http_client: &HttpClient,
    patterns: &[BundlePattern],
    feed_uri: &str,
    dest: &Path,
) -> Result<Vec<PathBuf>> {
    let extractor = ArchiveExtractorImpl::new();
    let mut installed = Vec::new();

    for url in patterns.iter().filter_map(|p| p.bundle_url(feed_uri)) {
        info!("Downloading credential provider bundle from {}", url);
        let bundle = dest.join(bundle_file_name(&url));
        download_file(runtime, &url, &bundle, http_client, None).await?;

        let written = extractor
            .extract_matching(runtime, &bundle, dest, &is_provider_name)
            .with_context(|| format!("Failed to unpack credential providers from {}", url))?;

        #[cfg(unix)]
        for path in &written {
            if let Err(e) = runtime.set_permissions(path, 0o755) {
                debug!("Failed to mark {:?} executable: {}", path, e);
            }
        }

        if let Err(e) = runtime.remove_file(&bundle) {
            debug!("Failed to remove bundle {:?}: {}", bundle, e);
        }
        installed.extend(written);
    }

    Ok(installed)
}
