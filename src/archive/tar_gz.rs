use crate::runtime::Runtime;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::debug;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

use super::ArchiveExtractor;

/// Extractor for .tar.gz / .tgz archives
#[derive(Default)]
pub struct TarGzExtractor;

impl TarGzExtractor {
    fn open_archive<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
    ) -> Result<Archive<GzDecoder<Box<dyn std::io::Read + Send>>>> {
        let reader = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
        Ok(Archive::new(GzDecoder::new(reader)))
    }

    /// Walk every regular file entry, handing its sanitized path and reader
    /// to `visit`.
    fn for_each_file<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        mut visit: impl FnMut(&Path, &mut dyn std::io::Read, Option<u32>) -> Result<()>,
    ) -> Result<()> {
        let mut archive = self.open_archive(runtime, archive_path)?;
        let entries = archive
            .entries()
            .with_context(|| format!("Failed to read tar entries from {:?}", archive_path))?;

        for entry in entries {
            let mut entry = entry.context("Failed to read tar entry")?;
            if entry.header().entry_type() != EntryType::Regular {
                continue;
            }
            let path = entry.path().context("Invalid tar entry path")?.into_owned();
            let Some(path) = sanitize(&path) else {
                debug!("Skipping entry with invalid path: {:?}", path);
                continue;
            };
            let mode = entry.header().mode().ok();
            visit(&path, &mut entry, mode)?;
        }
        Ok(())
    }

    fn write_entry<R: Runtime>(
        runtime: &R,
        reader: &mut dyn std::io::Read,
        mode: Option<u32>,
        full_path: &Path,
    ) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            runtime.create_dir_all(parent)?;
        }
        let mut dest = runtime.create_file(full_path)?;
        std::io::copy(reader, &mut dest)
            .with_context(|| format!("Failed to extract file {:?}", full_path))?;

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

/// Strip `./` prefixes and reject absolute or parent-relative paths.
fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

impl ArchiveExtractor for TarGzExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".tar.gz") || name.ends_with(".tgz")
    }

    fn list_entries<R: Runtime>(&self, runtime: &R, archive_path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        self.for_each_file(runtime, archive_path, |path, _, _| {
            names.push(path.to_string_lossy().replace('\\', "/"));
            Ok(())
        })?;
        Ok(names)
    }

    fn extract<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<Vec<PathBuf>> {
        debug!("Extracting tar.gz archive {:?} to {:?}...", archive_path, extract_to);
        runtime.create_dir_all(extract_to)?;

        let mut written = Vec::new();
        self.for_each_file(runtime, archive_path, |path, reader, mode| {
            let full_path = extract_to.join(path);
            Self::write_entry(runtime, reader, mode, &full_path)?;
            written.push(full_path);
            Ok(())
        })?;
        Ok(written)
    }

    fn extract_matching<R: Runtime>(
        &self,
        runtime: &R,
        archive_path: &Path,
        dest: &Path,
        filter: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        self.for_each_file(runtime, archive_path, |path, reader, mode| {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                return Ok(());
            };
            if filter(&file_name) {
                let full_path = dest.join(&file_name);
                Self::write_entry(runtime, reader, mode, &full_path)?;
                written.push(full_path);
            }
            Ok(())
        })?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs::{self, File};
    use tar::Builder;
    use tempfile::tempdir;

    fn create_tar_gz(path: &Path, files: &[(&str, &str)]) -> Result<()> {
        let file = File::create(path)?;
        let enc = GzEncoder::new(file, Compression::default());
        let mut tar = Builder::new(enc);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(name)?;
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, content.as_bytes())?;
        }
        tar.into_inner()?.finish()?;
        Ok(())
    }

    #[test]
    fn test_can_handle() {
        assert!(TarGzExtractor.can_handle(Path::new("a.tar.gz")));
        assert!(TarGzExtractor.can_handle(Path::new("A.TGZ")));
        assert!(!TarGzExtractor.can_handle(Path::new("a.zip")));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(Path::new("./a/b")), Some(PathBuf::from("a/b")));
        assert_eq!(sanitize(Path::new("../evil")), None);
        assert_eq!(sanitize(Path::new("/etc/passwd")), None);
        assert_eq!(sanitize(Path::new(".")), None);
    }

    #[test]
    fn test_extract_and_list() -> Result<()> {
        let dir = tempdir()?;
        let archive = dir.path().join("bundle.tar.gz");
        create_tar_gz(&archive, &[("a.txt", "A"), ("sub/b.txt", "B")])?;

        let names = TarGzExtractor.list_entries(&RealRuntime, &archive)?;
        assert_eq!(names, vec!["a.txt", "sub/b.txt"]);

        let out = dir.path().join("out");
        let written = TarGzExtractor.extract(&RealRuntime, &archive, &out)?;
        assert_eq!(written.len(), 2);
        assert_eq!(fs::read_to_string(out.join("sub/b.txt"))?, "B");
        Ok(())
    }

    #[test]
    fn test_extract_nonexistent_archive() {
        let dir = tempdir().unwrap();
        let result = TarGzExtractor.extract(
            &RealRuntime,
            &dir.path().join("missing.tgz"),
            &dir.path().join("out"),
        );
        assert!(result.unwrap_err().to_string().contains("Failed to open archive"));
    }
}
