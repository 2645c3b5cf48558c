//! Install, uninstall, restore and update.
//!
//! Installing a package evaluates its [`InstallState`] against what is
//! installed. Only a missing package runs the install sequence: install the
//! best dependency group, record the package in the manifest, obtain the
//! archive, extract it, keep a copy of the archive next to the extracted
//! files, prune the directory and register the package. Nothing is rolled
//! back when a later step fails.

mod clean;
mod report;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use log::{debug, error, info, warn};
use std::path::PathBuf;

use crate::archive::ArchiveExtractor;
use crate::error::InstallError;
use crate::manifest::ManifestEntry;
use crate::package::{Package, PackageIdentifier, PackageLocation};
use crate::resolver::cache_path;
use crate::runtime::Runtime;
use crate::session::Session;
use crate::source::UpdateOptions;

pub use clean::{CleanContext, RelocationOverrides, Relocations, clean_package};
pub use report::{Failure, InstallReport, Issue, IssueKind};

/// How an installed package relates to the one being installed.
#[derive(Debug, Clone, PartialEq)]
pub enum InstallState {
    /// The host already ships the package.
    AlreadyImportedInHost,
    NotInstalled,
    InstalledOlder(Package),
    InstalledNewer,
    InstalledExact,
}

pub struct Installer<'s, R: Runtime> {
    session: &'s mut Session<R>,
    force: bool,
}

impl<'s, R: Runtime> Installer<'s, R> {
    pub fn new(session: &'s mut Session<R>) -> Self {
        Self {
            session,
            force: false,
        }
    }

    /// Install even when the host already provides the package; every
    /// library variant is then kept.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn state(&self, package: &Package) -> InstallState {
        if !self.force && self.session.provided.is_provided(package.id()) {
            return InstallState::AlreadyImportedInHost;
        }
        match self.session.registry.get(package.id()) {
            None => InstallState::NotInstalled,
            Some(installed) if installed.version == package.version => InstallState::InstalledExact,
            Some(installed) if installed.version > package.version => InstallState::InstalledNewer,
            Some(installed) => InstallState::InstalledOlder(installed.clone()),
        }
    }

    /// Resolve `identifier` and install the result. An installed version
    /// the identifier admits is kept as is.
    #[tracing::instrument(skip(self))]
    pub async fn install_identifier(
        &mut self,
        identifier: &PackageIdentifier,
    ) -> Result<InstallReport, InstallError> {
        let mut report = InstallReport::default();
        self.install_request(identifier, &mut Vec::new(), &mut report)
            .await?;
        self.refresh(&report);
        Ok(report)
    }

    /// Install a resolved package and its dependencies.
    #[tracing::instrument(skip(self, package), fields(package = %package))]
    pub async fn install(&mut self, package: &Package) -> Result<InstallReport, InstallError> {
        let mut report = InstallReport::default();
        self.install_package(package.clone(), &mut Vec::new(), &mut report)
            .await?;
        self.refresh(&report);
        Ok(report)
    }

    /// Uninstall the package with `id`. `refresh` controls the host
    /// notification.
    #[tracing::instrument(skip(self))]
    pub fn uninstall(&mut self, id: &str, refresh: bool) -> Result<InstallReport, InstallError> {
        let package = self
            .session
            .registry
            .get(id)
            .cloned()
            .ok_or_else(|| InstallError::NotFound(id.to_string()))?;

        let mut report = InstallReport::default();
        self.uninstall_package(&package, &mut report)?;
        if refresh {
            self.refresh(&report);
        }
        Ok(report)
    }

    /// Uninstall every installed package, refreshing the host once.
    #[tracing::instrument(skip(self))]
    pub fn uninstall_all(&mut self) -> Result<InstallReport, InstallError> {
        let installed: Vec<Package> = self.session.registry.iter().cloned().collect();
        let mut report = InstallReport::default();
        for package in &installed {
            self.uninstall_package(package, &mut report)?;
        }
        self.refresh(&report);
        Ok(report)
    }

    /// Install every manifest entry that is missing. A failing entry is
    /// recorded and the others continue.
    #[tracing::instrument(skip(self))]
    pub async fn restore(&mut self) -> Result<InstallReport, InstallError> {
        let entries = self.session.manifest.entries();
        let mut report = InstallReport::default();
        let total = entries.len().max(1) as f32;

        for (index, entry) in entries.iter().enumerate() {
            let label = format!("{} {}", entry.id, entry.version);
            self.session
                .host
                .report_progress(&format!("Restoring {}", label), index as f32 / total);

            let result = match entry.identifier() {
                Ok(identifier) => {
                    self.install_request(&identifier, &mut Vec::new(), &mut report)
                        .await
                }
                Err(e) => Err(InstallError::Io(e)),
            };
            if let Err(e) = result {
                error!("Failed to restore {}: {}", label, e);
                report.failures.push(Failure {
                    package: label,
                    error: e,
                });
            }
        }

        self.session.host.report_progress("Restore finished", 1.0);
        self.refresh(&report);
        Ok(report)
    }

    /// Move installed packages (or only `id`) to the newest version the
    /// sources offer.
    #[tracing::instrument(skip(self, options))]
    pub async fn update(
        &mut self,
        id: Option<&str>,
        options: &UpdateOptions,
    ) -> Result<InstallReport, InstallError> {
        let installed: Vec<Package> = self
            .session
            .registry
            .iter()
            .filter(|p| id.is_none_or(|id| p.identifier.has_id(id)))
            .cloned()
            .collect();
        if let Some(id) = id
            && installed.is_empty()
        {
            return Err(InstallError::NotFound(id.to_string()));
        }

        let updates = self.session.sources.get_updates(&installed, options).await;
        let mut report = InstallReport::default();
        if updates.is_empty() {
            info!("Everything is up to date");
        }
        for update in updates {
            let label = update.to_string();
            // Update listings may omit dependency groups; resolve the full package.
            let result = match PackageIdentifier::exact(update.id(), &update.version) {
                Ok(identifier) => {
                    self.install_request(&identifier, &mut Vec::new(), &mut report)
                        .await
                }
                Err(e) => Err(InstallError::Io(e.into())),
            };
            if let Err(e) = result {
                error!("Failed to update to {}: {}", label, e);
                report.failures.push(Failure {
                    package: label,
                    error: e,
                });
            }
        }
        self.refresh(&report);
        Ok(report)
    }

    fn refresh(&self, report: &InstallReport) {
        if !report.is_unchanged() {
            self.session.host.refresh_assets();
        }
    }

    /// Install what `identifier` asks for unless the installed version
    /// already satisfies it.
    fn install_request<'a>(
        &'a mut self,
        identifier: &'a PackageIdentifier,
        in_flight: &'a mut Vec<String>,
        report: &'a mut InstallReport,
    ) -> LocalBoxFuture<'a, Result<(), InstallError>> {
        async move {
            if let Some(installed) = self.session.registry.get(identifier.id())
                && identifier.in_range(&installed.identifier)
            {
                debug!("{} already satisfies {}", installed, identifier);
                return Ok(());
            }

            let package = self
                .session
                .resolver()
                .get_specific_package(identifier)
                .await
                .ok_or_else(|| InstallError::NotFound(identifier.to_string()))?;
            self.install_package(package, in_flight, report).await
        }
        .boxed_local()
    }

    fn install_package<'a>(
        &'a mut self,
        package: Package,
        in_flight: &'a mut Vec<String>,
        report: &'a mut InstallReport,
    ) -> LocalBoxFuture<'a, Result<(), InstallError>> {
        async move {
            let key = package.identifier.key();
            if in_flight.contains(&key) {
                let mut chain: Vec<String> = in_flight.clone();
                chain.push(key);
                return Err(InstallError::CircularDependency(chain));
            }

            let older = match self.state(&package) {
                InstallState::AlreadyImportedInHost => {
                    info!("{} is already provided by the host", package);
                    return Ok(());
                }
                InstallState::InstalledExact | InstallState::InstalledNewer => {
                    debug!("{} or newer is already installed", package);
                    return Ok(());
                }
                InstallState::InstalledOlder(older) => Some(older),
                InstallState::NotInstalled => None,
            };

            in_flight.push(key);
            let dependencies = self.install_dependencies(&package, in_flight, report).await;
            in_flight.pop();
            dependencies?;

            // The older version stays until every dependency is in place.
            if let Some(older) = older {
                info!("Replacing {} with {}", older, package);
                self.uninstall_package(&older, report)?;
            }

            self.install_files(&package, report).await.inspect_err(|e| {
                error!("Failed to install {}: {}", package, e);
            })
        }
        .boxed_local()
    }

    async fn install_dependencies(
        &mut self,
        package: &Package,
        in_flight: &mut Vec<String>,
        report: &mut InstallReport,
    ) -> Result<(), InstallError> {
        let frameworks = self.session.frameworks();
        let Some(group) = frameworks.best_dependency_group(&package.dependency_groups) else {
            if !package.dependency_groups.is_empty() {
                warn!("No dependency group of {} matches the runtime profile", package);
            }
            return Ok(());
        };
        debug!(
            "Using dependency group '{}' of {}",
            group.target_framework, package
        );

        for dependency in group.dependencies.clone() {
            match self.install_request(&dependency, in_flight, report).await {
                Ok(()) => {}
                Err(e @ InstallError::CircularDependency(_)) => return Err(e),
                Err(e) => {
                    return Err(InstallError::Dependency {
                        parent: package.to_string(),
                        id: dependency.id().to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(())
    }

    /// Install steps that touch the disk, for a package whose dependencies
    /// are in place.
    async fn install_files(
        &mut self,
        package: &Package,
        report: &mut InstallReport,
    ) -> Result<(), InstallError> {
        let label = package.to_string();
        let host = self.session.host.clone();
        host.report_progress(&format!("Installing {}", label), 0.0);

        self.session
            .manifest
            .add(ManifestEntry::new(package.id(), package.version.to_string()));
        self.session.manifest.save()?;

        let archive = self.obtain_archive(package).await?;
        host.report_progress(&format!("Extracting {}", label), 0.5);

        let runtime = self.session.runtime.clone();
        let dir = self.session.settings.install_root.join(package.dir_name());
        let extracted = self
            .session
            .extractor
            .extract(runtime.as_ref(), &archive, &dir)
            .map_err(|e| InstallError::extraction(&label, e))?;
        debug!("Extracted {} files of {} to {:?}", extracted.len(), label, dir);

        let installed_archive = dir.join(package.archive_name());
        runtime
            .copy(&archive, &installed_archive)
            .map_err(|e| InstallError::extraction(&label, e))?;

        let frameworks = self.session.frameworks();
        let context = CleanContext {
            frameworks: &frameworks,
            relocations: &self.session.settings.relocations,
            host_provided: self.session.provided.is_provided(package.id()),
        };
        report
            .issues
            .extend(clean_package(runtime.as_ref(), &label, &dir, &context));

        if self.session.settings.read_only_package_files {
            report
                .issues
                .extend(set_read_only(runtime.as_ref(), &label, &extracted, true));
        }

        let installed = package
            .clone()
            .with_location(PackageLocation::Local(installed_archive));
        self.session.registry.add(installed.clone());
        report.installed.push(installed);

        host.report_progress(&format!("Installed {}", label), 1.0);
        info!("Installed {}", label);
        Ok(())
    }

    /// The cached archive of `package`, copying or downloading it first
    /// when needed.
    async fn obtain_archive(&self, package: &Package) -> Result<PathBuf, InstallError> {
        let runtime = self.session.runtime.as_ref();
        let cache_dir = &self.session.settings.cache_dir;
        if let Some(PackageLocation::Local(path)) = &package.location
            && path.parent() == Some(cache_dir.as_path())
            && runtime.exists(path)
        {
            debug!("Using cached {:?}", path);
            return Ok(path.clone());
        }
        let cached = cache_path(cache_dir, package.id(), &package.version);
        if runtime.exists(&cached) {
            debug!("Using cached {:?}", cached);
            return Ok(cached);
        }

        match &package.location {
            Some(PackageLocation::Local(path)) if !runtime.exists(path) => {
                return Err(InstallError::ArchiveNotFound(path.display().to_string()));
            }
            Some(location) => {
                let url = match location {
                    PackageLocation::Remote(url) => url.clone(),
                    PackageLocation::Local(path) => path.display().to_string(),
                };
                self.session
                    .sources
                    .fetch_archive(runtime, package, &cached)
                    .await
                    .map_err(|e| {
                        InstallError::from_network(
                            &package.to_string(),
                            &url,
                            e,
                            self.session.host.profile(),
                        )
                    })?;
            }
            None => {}
        }

        if !runtime.exists(&cached) {
            return Err(InstallError::ArchiveNotFound(package.to_string()));
        }
        Ok(cached)
    }

    fn install_dir(&self, package: &Package) -> PathBuf {
        let root = &self.session.settings.install_root;
        if let Some(PackageLocation::Local(archive)) = &package.location
            && let Some(dir) = archive.parent()
            && dir.parent() == Some(root.as_path())
        {
            return dir.to_path_buf();
        }
        root.join(package.dir_name())
    }

    fn uninstall_package(
        &mut self,
        package: &Package,
        report: &mut InstallReport,
    ) -> Result<(), InstallError> {
        let runtime = self.session.runtime.clone();
        let dir = self.install_dir(package);
        let label = package.to_string();

        if runtime.is_dir(&dir) {
            if self.session.settings.read_only_package_files
                && let Ok(files) = clean::walk_files(runtime.as_ref(), &dir)
            {
                for issue in set_read_only(runtime.as_ref(), &label, &files, false) {
                    debug!("{}", issue);
                }
            }
            runtime.remove_dir_all(&dir)?;
        } else {
            warn!("Install directory {:?} of {} is already gone", dir, label);
        }

        self.session.manifest.remove(package.id());
        self.session.manifest.save()?;
        self.session.registry.remove(package.id());
        report.uninstalled.push(package.clone());
        info!("Uninstalled {}", label);
        Ok(())
    }
}

fn set_read_only<R: Runtime>(runtime: &R, package: &str, files: &[PathBuf], readonly: bool) -> Vec<Issue> {
    files
        .iter()
        .filter(|file| runtime.exists(file))
        .filter_map(|file| {
            runtime.set_readonly(file, readonly).err().map(|e| {
                warn!("Failed to change permissions of {:?}: {:#}", file, e);
                Issue::new(IssueKind::ReadOnly, package, file.clone(), &e)
            })
        })
        .collect()
}
