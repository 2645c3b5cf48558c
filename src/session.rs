//! Explicit state of one package-management session.

use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::ArchiveExtractorImpl;
use crate::credential::CredentialLookup;
use crate::framework::FrameworkResolver;
use crate::host::{AlreadyProvidedChecker, HostEnvironment};
use crate::installer::{Installer, Relocations};
use crate::manifest::{ManifestStore, PackagesFile};
use crate::registry::InstalledRegistry;
use crate::resolver::PackageResolver;
use crate::runtime::Runtime;
use crate::source::SourceSet;

/// Filesystem layout and install behaviour.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub install_root: PathBuf,
    pub manifest_path: PathBuf,
    pub cache_dir: PathBuf,
    pub install_from_cache: bool,
    pub read_only_package_files: bool,
    pub relocations: Relocations,
}

impl SessionSettings {
    /// Default layout of `project` with packages cached in `cache_dir`.
    pub fn for_project(project: &Path, cache_dir: &Path) -> Self {
        let assets = project.join("Assets");
        Self {
            install_root: assets.join("Packages"),
            manifest_path: assets.join("packages.json"),
            cache_dir: cache_dir.to_path_buf(),
            install_from_cache: true,
            read_only_package_files: false,
            relocations: Relocations::for_project(project),
        }
    }
}

/// Installed registry, sources, manifest and host hooks shared by the
/// resolver and installer. Operations on a session run one at a time.
pub struct Session<R: Runtime> {
    pub(crate) runtime: Arc<R>,
    pub(crate) settings: SessionSettings,
    pub(crate) registry: InstalledRegistry,
    pub(crate) sources: SourceSet,
    pub(crate) manifest: Box<dyn ManifestStore>,
    pub(crate) host: Arc<dyn HostEnvironment>,
    pub(crate) provided: Arc<dyn AlreadyProvidedChecker>,
    pub(crate) credentials: Option<Arc<dyn CredentialLookup>>,
    pub(crate) extractor: ArchiveExtractorImpl,
}

impl<R: Runtime + 'static> Session<R> {
    /// Load the manifest and scan the install root.
    #[tracing::instrument(skip_all, fields(root = ?settings.install_root))]
    pub fn open(
        runtime: Arc<R>,
        settings: SessionSettings,
        sources: SourceSet,
        host: Arc<dyn HostEnvironment>,
        provided: Arc<dyn AlreadyProvidedChecker>,
        credentials: Option<Arc<dyn CredentialLookup>>,
    ) -> Result<Self> {
        let manifest = PackagesFile::open(runtime.clone(), &settings.manifest_path)?;
        let mut session = Self {
            runtime,
            settings,
            registry: InstalledRegistry::new(),
            sources,
            manifest: Box::new(manifest),
            host,
            provided,
            credentials,
            extractor: ArchiveExtractorImpl::new(),
        };
        session.rebuild()?;
        Ok(session)
    }
}

impl<R: Runtime> Session<R> {
    /// Rescan the install root into the registry.
    pub fn rebuild(&mut self) -> Result<()> {
        self.registry
            .rebuild(self.runtime.as_ref(), &self.settings.install_root)?;
        info!("{} installed package(s)", self.registry.len());
        Ok(())
    }

    /// Forget the registry and every cached credential.
    pub fn reset(&mut self) {
        self.registry.clear();
        if let Some(credentials) = &self.credentials {
            credentials.clear();
        }
        debug!("Session state cleared");
    }

    pub fn registry(&self) -> &InstalledRegistry {
        &self.registry
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn manifest(&self) -> &dyn ManifestStore {
        self.manifest.as_ref()
    }

    pub fn runtime(&self) -> &R {
        self.runtime.as_ref()
    }

    pub fn frameworks(&self) -> FrameworkResolver {
        FrameworkResolver::new(self.host.profile(), self.host.version())
    }

    pub fn resolver(&self) -> PackageResolver<'_, R> {
        PackageResolver::new(
            self.runtime.as_ref(),
            &self.registry,
            &self.sources,
            &self.settings.cache_dir,
            self.settings.install_from_cache,
        )
    }

    pub fn installer(&mut self) -> Installer<'_, R> {
        Installer::new(self)
    }

    /// Delete every cached archive.
    #[tracing::instrument(skip(self))]
    pub fn clear_cache(&self) -> Result<usize> {
        let dir = &self.settings.cache_dir;
        if !self.runtime.exists(dir) {
            return Ok(0);
        }
        let entries = self
            .runtime
            .read_dir(dir)
            .with_context(|| format!("Failed to read cache {:?}", dir))?;
        let mut removed = 0;
        for entry in entries {
            if self.runtime.is_dir(&entry) {
                self.runtime.remove_dir_all(&entry)?;
            } else {
                self.runtime.remove_file(&entry)?;
            }
            removed += 1;
        }
        info!("Removed {} cache entries from {:?}", removed, dir);
        Ok(removed)
    }
}
