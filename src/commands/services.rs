//! Service factory for building a session.
//!
//! This module separates the construction of the session's collaborators
//! (HTTP client, credential broker, sources, host hooks) from the
//! configuration they are derived from.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::debug;
use reqwest::Client;

use crate::{
    credential::{CredentialBroker, CredentialLookup, TokioProcessRunner},
    host::{ConsoleHost, ProvidedSet},
    http::HttpClient,
    runtime::Runtime,
    session::Session,
    source::{SourceConfig, SourceSet},
};

use super::Options;
use super::config::Config;

/// Build the HTTP client shared by every feed and the broker.
pub fn build_http_client() -> Result<HttpClient> {
    let client = Client::builder()
        .user_agent(concat!("nupm/", env!("NUPM_VERSION")))
        .build()?;
    Ok(HttpClient::new(client))
}

/// Build the credential broker from configuration.
pub fn build_credentials<R: Runtime + 'static>(
    runtime: Arc<R>,
    http_client: HttpClient,
    config: &Config,
) -> Arc<dyn CredentialLookup> {
    Arc::new(
        CredentialBroker::new(runtime, Arc::new(TokioProcessRunner), http_client)
            .with_timeout(config.provider_timeout()),
    )
}

/// The configured sources followed by the ones given on the command line.
/// Without either, nuget.org.
pub fn source_configs(config: &Config, extra: &[String]) -> Vec<SourceConfig> {
    let extra: Vec<SourceConfig> = extra
        .iter()
        .enumerate()
        .map(|(i, url)| SourceConfig::new(format!("source{}", i + 1), url.clone()))
        .collect();

    if config.sources.is_empty() && !extra.is_empty() {
        return extra;
    }
    let mut sources = config.effective_sources();
    sources.extend(extra);
    sources
}

/// The project directory and its effective configuration.
pub fn load_config<R: Runtime>(runtime: &R, options: &Options) -> Result<(PathBuf, Config)> {
    let project = match &options.project {
        Some(path) => path.clone(),
        None => runtime.current_dir()?,
    };
    let mut config = Config::load(runtime, &project, options.config.as_deref())?;
    if let Some(profile) = options.profile {
        config.runtime_profile = profile;
    }
    if options.no_cache {
        config.install_from_cache = false;
    }
    Ok((project, config))
}

/// Open a session on the project named by `options`.
pub fn open_session<R: Runtime + 'static>(runtime: R, options: &Options) -> Result<Session<R>> {
    let runtime = Arc::new(runtime);
    let (project, config) = load_config(runtime.as_ref(), options)?;
    debug!("Project {:?}, profile {}", project, config.runtime_profile);

    let http_client = build_http_client()?;
    let credentials = build_credentials(runtime.clone(), http_client.clone(), &config);
    let sources = SourceSet::from_configs(
        runtime.clone(),
        &source_configs(&config, &options.sources),
        http_client,
        Some(credentials.clone()),
    );
    let settings = config.session_settings(runtime.as_ref(), &project)?;
    let host = Arc::new(ConsoleHost::new(config.host_version, config.runtime_profile));
    let provided = Arc::new(ProvidedSet::new(&config.provided_packages));

    Session::open(runtime, settings, sources, host, provided, Some(credentials))
}
