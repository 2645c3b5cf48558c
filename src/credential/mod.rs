//! Feed authentication.
//!
//! Credentials come from the source configuration or, failing that, from
//! external credential-provider executables speaking the NuGet provider
//! protocol: `<provider> -uri <feed>`, exit code 0 with a JSON
//! `{"Username": .., "Password": ..}` body on success, 1 when the provider
//! does not handle the feed, 2 when it handles the feed but failed.

mod bootstrap;
mod broker;
mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

pub use bootstrap::{BundlePattern, default_bundle_patterns};
pub use broker::{CredentialBroker, PROVIDER_PATH_ENV};
#[cfg(test)]
pub use process::MockProcessRunner;
pub use process::{ProcessOutput, ProcessRunner, TokioProcessRunner};

const PROVIDER_PREFIX: &str = "credentialprovider";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "Username", alias = "username")]
    pub username: String,
    #[serde(rename = "Password", alias = "password")]
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Anything able to produce a credential for a feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    async fn get_credential(&self, feed_uri: &str) -> Option<Credential>;

    fn clear(&self);
}

/// Reduce a feed URI to scheme, host, port and path.
///
/// The query is dropped, and so is a trailing method segment such as
/// `FindPackagesById()`.
pub fn truncate_feed_uri(uri: &str) -> String {
    let Ok(parsed) = Url::parse(uri) else {
        return uri.split('?').next().unwrap_or(uri).to_string();
    };

    let mut path = parsed.path().to_string();
    if let Some(idx) = path.rfind('/')
        && path[idx + 1..].contains('(')
    {
        path.truncate(idx + 1);
    }

    let mut truncated = format!("{}://{}", parsed.scheme(), parsed.host_str().unwrap_or(""));
    if let Some(port) = parsed.port() {
        truncated.push_str(&format!(":{}", port));
    }
    truncated.push_str(&path);
    truncated
}

/// Whether a file name looks like a credential provider executable.
pub(crate) fn is_provider_name(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    let Some(rest) = lower.strip_prefix(PROVIDER_PREFIX) else {
        return false;
    };
    if rest.ends_with(".exe") {
        return true;
    }
    cfg!(unix) && (rest.ends_with(".sh") || !rest.contains('.'))
}
