mod tar_gz;
mod zip;

use crate::package::{MANIFEST_EXTENSION, Nuspec};
use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

pub use tar_gz::TarGzExtractor;
pub use zip::ZipExtractor;

/// Trait for format-specific archive extractors
pub trait ArchiveExtractor: Send + Sync {
    /// Check if this extractor can handle the given archive format
    fn can_handle(&self, archive_path: &Path) -> bool;

    /// List the names of all file entries (directories excluded)
    fn list_entries<R: Runtime>(&self, runtime: &R, archive_path: &Path) -> Result<Vec<String>>;

    /// Extract every file entry below `extract_to`, keeping the entry paths.
    /// Directory entries are skipped. Returns the written files.
    fn extract<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<Vec<PathBuf>>;

    /// Extract the file entries whose file name satisfies `filter` directly
    /// into `dest` (entry directories are flattened). Returns the written files.
    fn extract_matching<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        dest: &Path,
        filter: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<PathBuf>>;
}

/// Dispatcher that selects the appropriate extractor based on archive format.
/// Holds all available extractors and dispatches to the correct one.
#[derive(Default)]
pub struct ArchiveExtractorImpl {
    tar_gz: TarGzExtractor,
    zip: ZipExtractor,
}

impl ArchiveExtractorImpl {
    pub fn new() -> Self {
        Self {
            tar_gz: TarGzExtractor,
            zip: ZipExtractor,
        }
    }

    fn unsupported(archive_path: &Path) -> anyhow::Error {
        anyhow!("Unsupported archive format: {}", archive_path.display())
    }
}

impl ArchiveExtractor for ArchiveExtractorImpl {
    fn can_handle(&self, archive_path: &Path) -> bool {
        self.tar_gz.can_handle(archive_path) || self.zip.can_handle(archive_path)
    }

    fn list_entries<R: Runtime>(&self, runtime: &R, archive_path: &Path) -> Result<Vec<String>> {
        if self.tar_gz.can_handle(archive_path) {
            return self.tar_gz.list_entries(runtime, archive_path);
        }
        if self.zip.can_handle(archive_path) {
            return self.zip.list_entries(runtime, archive_path);
        }
        Err(Self::unsupported(archive_path))
    }

    #[tracing::instrument(skip(self, runtime, archive_path, extract_to))]
    fn extract<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<Vec<PathBuf>> {
        if self.tar_gz.can_handle(archive_path) {
            return self.tar_gz.extract(runtime, archive_path, extract_to);
        }
        if self.zip.can_handle(archive_path) {
            return self.zip.extract(runtime, archive_path, extract_to);
        }
        Err(Self::unsupported(archive_path))
    }

    #[tracing::instrument(skip(self, runtime, archive_path, dest, filter))]
    fn extract_matching<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        dest: &Path,
        filter: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<PathBuf>> {
        if self.tar_gz.can_handle(archive_path) {
            return self
                .tar_gz
                .extract_matching(runtime, archive_path, dest, filter);
        }
        if self.zip.can_handle(archive_path) {
            return self.zip.extract_matching(runtime, archive_path, dest, filter);
        }
        Err(Self::unsupported(archive_path))
    }
}

/// Read the manifest stored at the root of a package archive.
#[tracing::instrument(skip(runtime))]
pub fn read_nuspec<R: Runtime>(runtime: &R, archive_path: &Path) -> Result<Nuspec> {
    let xml = ZipExtractor
        .read_root_entry(runtime, archive_path, MANIFEST_EXTENSION)?
        .ok_or_else(|| anyhow!("No manifest found in {}", archive_path.display()))?;
    Nuspec::parse(&xml).with_context(|| format!("Invalid manifest in {}", archive_path.display()))
}
