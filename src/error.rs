//! Install and resolution failures.

use thiserror::Error;

use crate::framework::RuntimeProfile;
use crate::http::NonRetryableError;

#[derive(Debug, Error)]
pub enum InstallError {
    /// No tier produced the package.
    #[error("Package {0} was not found on any source")]
    NotFound(String),

    #[error("Failed to install dependency {id} of {parent}")]
    Dependency {
        parent: String,
        id: String,
        #[source]
        source: Box<InstallError>,
    },

    #[error("Circular dependency: {}", chain(.0))]
    CircularDependency(Vec<String>),

    #[error("Failed to download {package}")]
    Network { package: String, source: BoxError },

    #[error("Failed to extract {package}")]
    Extraction { package: String, source: BoxError },

    #[error("Package archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("{}", authentication_hint(.profile))]
    AuthenticationFormat { url: String, profile: RuntimeProfile },

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn chain(ids: &[String]) -> String {
    ids.join(" -> ")
}

fn authentication_hint(profile: &RuntimeProfile) -> String {
    match profile {
        RuntimeProfile::Full => "The source only offers Windows integrated authentication, which the \
             full runtime profile cannot use. Switch the runtime profile to `modern` \
             (--profile modern) and try again."
            .to_string(),
        RuntimeProfile::Modern => "The source only offers Windows integrated authentication. \
             Configure a username and token for it, or install a credential provider."
            .to_string(),
    }
}

impl InstallError {
    /// Classify a download failure for `package`.
    pub fn from_network(package: &str, url: &str, error: anyhow::Error, profile: RuntimeProfile) -> Self {
        let unsupported = error.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<NonRetryableError>(),
                Some(NonRetryableError::UnsupportedAuthScheme(_))
            )
        });
        if unsupported {
            InstallError::AuthenticationFormat {
                url: url.to_string(),
                profile,
            }
        } else {
            InstallError::Network {
                package: package.to_string(),
                source: error.into(),
            }
        }
    }

    pub fn extraction(package: &str, error: anyhow::Error) -> Self {
        InstallError::Extraction {
            package: package.to_string(),
            source: error.into(),
        }
    }

    /// Errors that abort the whole top-level operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InstallError::Dependency { .. }
                | InstallError::CircularDependency(_)
                | InstallError::ArchiveNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_unsupported_scheme_becomes_authentication_format() {
        let error = anyhow::Error::new(NonRetryableError::UnsupportedAuthScheme("NTLM".into()))
            .context("Failed to download");
        let err = InstallError::from_network("A 1.0.0", "https://feed", error, RuntimeProfile::Full);

        assert!(matches!(err, InstallError::AuthenticationFormat { .. }));
        assert!(err.to_string().contains("--profile modern"));
    }

    #[test]
    fn test_other_errors_stay_network_failures() {
        let err = InstallError::from_network(
            "A 1.0.0",
            "https://feed",
            anyhow!("connection reset"),
            RuntimeProfile::Modern,
        );
        assert!(matches!(err, InstallError::Network { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_display() {
        let cycle = InstallError::CircularDependency(vec!["A".into(), "B".into(), "A".into()]);
        assert_eq!(cycle.to_string(), "Circular dependency: A -> B -> A");
        assert!(cycle.is_fatal());

        let dep = InstallError::Dependency {
            parent: "A 1.0.0".into(),
            id: "B".into(),
            source: Box::new(InstallError::NotFound("B".into())),
        };
        assert_eq!(dep.to_string(), "Failed to install dependency B of A 1.0.0");
        assert!(dep.is_fatal());
    }
}
