use crate::runtime::Runtime;
use anyhow::{Context, Result};
use log::{debug, info};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use super::ArchiveExtractor;

/// Extractor for .zip archives, including `.nupkg` packages
#[derive(Default)]
pub struct ZipExtractor;

impl ZipExtractor {
    /// zip requires Read + Seek, but Runtime::open returns Box<dyn Read + Send>,
    /// so the archive is buffered in memory.
    fn open_archive<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
    ) -> Result<ZipArchive<Cursor<Vec<u8>>>> {
        let mut reader = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?;

        ZipArchive::new(Cursor::new(buffer))
            .with_context(|| format!("Failed to parse ZIP archive {:?}", archive_path))
    }

    /// Read the first root-level entry with the given extension as text.
    pub fn read_root_entry<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extension: &str,
    ) -> Result<Option<String>> {
        let mut archive = self.open_archive(runtime, archive_path)?;
        let suffix = format!(".{}", extension.to_lowercase());

        let name = archive
            .file_names()
            .find(|name| !name.contains('/') && name.to_lowercase().ends_with(&suffix))
            .map(str::to_string);

        let Some(name) = name else {
            return Ok(None);
        };

        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("Failed to read ZIP entry {}", name))?;
        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .with_context(|| format!("Failed to read ZIP entry {}", name))?;
        Ok(Some(content))
    }

    fn write_entry<R: Runtime>(
        runtime: &R,
        entry: &mut dyn Read,
        mode: Option<u32>,
        full_path: &Path,
    ) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            runtime.create_dir_all(parent)?;
        }
        let mut dest_file = runtime.create_file(full_path)?;
        std::io::copy(entry, &mut dest_file)
            .with_context(|| format!("Failed to extract file {:?}", full_path))?;

        // Set file permissions from archive metadata (Unix only)
        #[cfg(unix)]
        if let Some(mode) = mode
            && let Err(e) = runtime.set_permissions(full_path, mode)
        {
            debug!("Failed to set permissions on {:?}: {}", full_path, e);
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }
}

impl ArchiveExtractor for ZipExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".zip") || name.ends_with(".nupkg")
    }

    fn list_entries<R: Runtime>(&self, runtime: &R, archive_path: &Path) -> Result<Vec<String>> {
        let mut archive = self.open_archive(runtime, archive_path)?;
        let mut names = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;
            if !entry.is_dir() {
                names.push(entry.name().to_string());
            }
        }
        Ok(names)
    }

    fn extract<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<Vec<PathBuf>> {
        debug!("Extracting zip archive {:?} to {:?}...", archive_path, extract_to);
        let mut archive = self.open_archive(runtime, archive_path)?;
        runtime.create_dir_all(extract_to)?;

        let mut written = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;

            if entry.is_dir() {
                continue;
            }

            let entry_path = match entry.enclosed_name() {
                Some(path) => path.to_path_buf(),
                None => {
                    debug!("Skipping entry with invalid path: {}", entry.name());
                    continue;
                }
            };

            let full_path = extract_to.join(&entry_path);
            let mode = entry.unix_mode();
            Self::write_entry(runtime, &mut entry, mode, &full_path)?;
            written.push(full_path);
        }

        info!("Extracted {} file(s) to {:?}", written.len(), extract_to);
        Ok(written)
    }

    fn extract_matching<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        dest: &Path,
        filter: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<PathBuf>> {
        let mut archive = self.open_archive(runtime, archive_path)?;

        let mut written = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;
            if entry.is_dir() {
                continue;
            }

            let file_name = entry
                .enclosed_name()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
            let Some(file_name) = file_name else {
                continue;
            };
            if !filter(&file_name) {
                continue;
            }

            let full_path = dest.join(&file_name);
            let mode = entry.unix_mode();
            Self::write_entry(runtime, &mut entry, mode, &full_path)?;
            written.push(full_path);
        }
        Ok(written)
    }
}
