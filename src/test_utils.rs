//! Fixture builders shared by unit tests.

use anyhow::Result;
use std::fs::File;
use std::io::{Cursor, Seek, Write};
use std::path::Path;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::FileOptions;

use crate::package::Nuspec;

fn write_entries<W: Write + Seek>(writer: W, files: &[(&str, &str)]) -> Result<W> {
    let mut zip = ZipWriter::new(writer);
    let options: FileOptions<()> =
        FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in files {
        zip.start_file(*name, options)?;
        zip.write_all(content.as_bytes())?;
    }
    Ok(zip.finish()?)
}

/// Write a zip archive holding `files` (name, content).
pub fn write_zip(path: &Path, files: &[(&str, &str)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_entries(File::create(path)?, files)?;
    Ok(())
}

/// A zip archive holding `files`, in memory.
pub fn zip_bytes(files: &[(&str, &str)]) -> Result<Vec<u8>> {
    Ok(write_entries(Cursor::new(Vec::new()), files)?.into_inner())
}

/// A manifest document. `dependencies` are (framework, id, version)
/// triples; consecutive triples sharing a framework form one group and an
/// empty version is omitted.
pub fn nuspec_xml(id: &str, version: &str, dependencies: &[(&str, &str, &str)]) -> String {
    let mut groups = String::new();
    let mut current: Option<&str> = None;
    for (framework, dep_id, dep_version) in dependencies {
        if current != Some(*framework) {
            if current.is_some() {
                groups.push_str("</group>");
            }
            if framework.is_empty() {
                groups.push_str("<group>");
            } else {
                groups.push_str(&format!(r#"<group targetFramework="{}">"#, framework));
            }
            current = Some(*framework);
        }
        if dep_version.is_empty() {
            groups.push_str(&format!(r#"<dependency id="{}" />"#, dep_id));
        } else {
            groups.push_str(&format!(
                r#"<dependency id="{}" version="{}" />"#,
                dep_id, dep_version
            ));
        }
    }
    if current.is_some() {
        groups.push_str("</group>");
    }

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>{id}</id>
    <version>{version}</version>
    <authors>tests</authors>
    <description>{id} fixture</description>
    <dependencies>{groups}</dependencies>
  </metadata>
</package>"#
    )
}

/// Write a package archive: the manifest at `<id>.nuspec` plus `files`.
pub fn write_nupkg(path: &Path, nuspec: &str, files: &[(&str, &str)]) -> Result<()> {
    let id = Nuspec::parse(nuspec)?.id;
    let manifest_name = format!("{}.nuspec", id);
    let mut entries = vec![(manifest_name.as_str(), nuspec)];
    entries.extend_from_slice(files);
    write_zip(path, &entries)
}

/// Write `<dir>/<Id>.<Version>.nupkg` and return its path.
pub fn write_package(
    dir: &Path,
    id: &str,
    version: &str,
    dependencies: &[(&str, &str, &str)],
    files: &[(&str, &str)],
) -> Result<std::path::PathBuf> {
    let path = dir.join(format!("{}.{}.nupkg", id, version));
    write_nupkg(&path, &nuspec_xml(id, version, dependencies), files)?;
    Ok(path)
}
