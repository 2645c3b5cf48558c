//! Hooks into the host application.

use log::{debug, info};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::framework::{HostVersion, RuntimeProfile};

#[cfg_attr(test, mockall::automock)]
pub trait HostEnvironment: Send + Sync {
    fn version(&self) -> HostVersion;

    fn profile(&self) -> RuntimeProfile;

    /// Called once after a batch of installs or uninstalls.
    fn refresh_assets(&self);

    /// `fraction` is in `0.0..=1.0`.
    fn report_progress(&self, message: &str, fraction: f32);
}

/// Ids the host already ships, so installing them is a no-op.
#[cfg_attr(test, mockall::automock)]
pub trait AlreadyProvidedChecker: Send + Sync {
    fn is_provided(&self, id: &str) -> bool;
}

/// A fixed set of host-provided ids, compared case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct ProvidedSet {
    ids: HashSet<String>,
}

impl ProvidedSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ids: ids.into_iter().map(|id| id.as_ref().to_lowercase()).collect(),
        }
    }
}

impl AlreadyProvidedChecker for ProvidedSet {
    fn is_provided(&self, id: &str) -> bool {
        self.ids.contains(&id.to_lowercase())
    }
}

/// Host used by the command line: settings come from configuration and
/// notifications go to the log.
#[derive(Debug)]
pub struct ConsoleHost {
    version: HostVersion,
    profile: RuntimeProfile,
    refreshes: AtomicUsize,
}

impl ConsoleHost {
    pub fn new(version: HostVersion, profile: RuntimeProfile) -> Self {
        Self {
            version,
            profile,
            refreshes: AtomicUsize::new(0),
        }
    }

    /// How many refreshes were requested so far.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }
}

impl HostEnvironment for ConsoleHost {
    fn version(&self) -> HostVersion {
        self.version
    }

    fn profile(&self) -> RuntimeProfile {
        self.profile
    }

    fn refresh_assets(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        info!("Installed packages changed; assets refreshed");
    }

    fn report_progress(&self, message: &str, fraction: f32) {
        debug!("[{:>3.0}%] {}", fraction.clamp(0.0, 1.0) * 100.0, message);
    }
}
