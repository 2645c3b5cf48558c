use crate::credential::Credential;
use crate::http::HttpClient;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use log::info;
use std::path::Path;

/// Downloads `url` into `dest`, going through a sibling `.part` file so an
/// interrupted download never leaves a truncated file at `dest`.
#[tracing::instrument(skip(runtime, dest, http_client, credential))]
pub async fn download_file<R: Runtime>(
    runtime: &R,
    url: &str,
    dest: &Path,
    http_client: &HttpClient,
    credential: Option<&Credential>,
) -> Result<()> {
    info!("Downloading {}...", url);

    if let Some(parent) = dest.parent() {
        runtime.create_dir_all(parent)?;
    }

    let part_path = dest.with_extension("part");
    let bytes = http_client
        .download_file(url, credential, || {
            runtime
                .create_file(&part_path)
                .with_context(|| format!("Failed to create file at {:?}", part_path))
        })
        .await;

    if let Err(e) = bytes {
        if runtime.exists(&part_path) {
            let _ = runtime.remove_file(&part_path);
        }
        return Err(e);
    }

    runtime
        .rename(&part_path, dest)
        .with_context(|| format!("Failed to move download into {:?}", dest))?;

    info!("Download complete: {:?}", dest);
    Ok(())
}
