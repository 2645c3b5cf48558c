use anyhow::{Context, Result, bail};
use log::debug;
use std::path::PathBuf;

use crate::{
    framework::RuntimeProfile,
    installer::InstallReport,
    package::PackageIdentifier,
    runtime::Runtime,
    source::{SearchQuery, UpdateOptions},
};

pub mod config;
mod services;

pub use services::{build_http_client, load_config, open_session, source_configs};

/// Command-line overrides shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub project: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub sources: Vec<String>,
    pub profile: Option<RuntimeProfile>,
    pub no_cache: bool,
}

/// Install a package given as `Id` or `Id@version-or-range`.
#[tracing::instrument(skip(runtime, options))]
pub async fn install<R: Runtime + 'static>(
    runtime: R,
    options: &Options,
    package: &str,
    force: bool,
) -> Result<()> {
    let identifier: PackageIdentifier = package
        .parse()
        .with_context(|| format!("Invalid package: {}", package))?;
    let mut session = open_session(runtime, options)?;
    let report = session
        .installer()
        .with_force(force)
        .install_identifier(&identifier)
        .await?;

    if report.is_unchanged() {
        match session.registry().get(identifier.id()) {
            Some(installed) => println!("{} is already installed.", installed),
            None => println!("{} is provided by the host, nothing to do.", identifier.id()),
        }
    }
    print_report(&report)
}

/// Uninstall one package, or every package with `all`.
#[tracing::instrument(skip(runtime, options))]
pub fn uninstall<R: Runtime + 'static>(
    runtime: R,
    options: &Options,
    id: Option<&str>,
    all: bool,
) -> Result<()> {
    let mut session = open_session(runtime, options)?;
    let report = match (id, all) {
        (_, true) => session.installer().uninstall_all()?,
        (Some(id), false) => session.installer().uninstall(id, true)?,
        (None, false) => bail!("Specify a package id or --all"),
    };
    if report.uninstalled.is_empty() {
        println!("No packages installed.");
    }
    print_report(&report)
}

/// Install every manifest entry that is missing.
#[tracing::instrument(skip(runtime, options))]
pub async fn restore<R: Runtime + 'static>(runtime: R, options: &Options) -> Result<()> {
    let mut session = open_session(runtime, options)?;
    let report = session.installer().restore().await?;
    if report.is_empty() {
        println!("All packages are installed.");
    }
    print_report(&report)
}

/// List installed packages.
#[tracing::instrument(skip(runtime, options))]
pub fn list<R: Runtime + 'static>(runtime: R, options: &Options) -> Result<()> {
    let session = open_session(runtime, options)?;
    if session.registry().is_empty() {
        println!("No packages installed.");
        return Ok(());
    }

    debug!("Found {} package(s)", session.registry().len());
    for package in session.registry().iter() {
        match &package.title {
            Some(title) if title != package.id() => println!("{} ({})", package, title),
            _ => println!("{}", package),
        }
    }
    Ok(())
}

/// Search the enabled sources.
#[tracing::instrument(skip(runtime, options, query))]
pub async fn search<R: Runtime + 'static>(
    runtime: R,
    options: &Options,
    query: &SearchQuery,
) -> Result<()> {
    let session = open_session(runtime, options)?;
    let results = session.sources().search(query).await;
    if results.is_empty() {
        println!("No packages found.");
        return Ok(());
    }

    for package in results {
        let installed = session
            .registry()
            .get(package.id())
            .is_some_and(|p| p.version == package.version);
        let marker = if installed { " [installed]" } else { "" };
        match &package.description {
            Some(description) => println!("{}{}  {}", package, marker, first_line(description)),
            None => println!("{}{}", package, marker),
        }
    }
    Ok(())
}

/// Update installed packages, or only `id`, to their newest versions.
#[tracing::instrument(skip(runtime, options, update))]
pub async fn update<R: Runtime + 'static>(
    runtime: R,
    options: &Options,
    id: Option<&str>,
    update: &UpdateOptions,
) -> Result<()> {
    let mut session = open_session(runtime, options)?;
    let report = session.installer().update(id, update).await?;
    if report.is_empty() {
        println!("All packages are up to date.");
    }
    print_report(&report)
}

/// Delete every cached archive.
#[tracing::instrument(skip(runtime, options))]
pub fn clear_cache<R: Runtime + 'static>(runtime: R, options: &Options) -> Result<()> {
    let session = open_session(runtime, options)?;
    let removed = session.clear_cache()?;
    println!(
        "Removed {} cached file(s) from {}",
        removed,
        session.settings().cache_dir.display()
    );
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

/// Print what changed; fails when a package of a batch failed.
fn print_report(report: &InstallReport) -> Result<()> {
    for package in &report.uninstalled {
        println!("Uninstalled {}", package);
    }
    for package in &report.installed {
        println!("Installed {}", package);
    }
    for issue in &report.issues {
        eprintln!("warning: {}", issue);
    }
    for failure in &report.failures {
        eprintln!("error: {}: {}", failure.package, failure.error);
    }
    if !report.failures.is_empty() {
        bail!("{} package(s) failed", report.failures.len());
    }
    Ok(())
}
