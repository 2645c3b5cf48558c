//! `.nuspec` manifest parsing.

use anyhow::{Context, Result, anyhow};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{DependencyGroup, PackageIdentifier};
use crate::framework::short_folder_name;

/// The manifest fields the package manager relies on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Nuspec {
    pub id: String,
    pub version: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub authors: Option<String>,
    pub dependency_groups: Vec<DependencyGroup>,
}

impl Nuspec {
    /// Parse a manifest document.
    ///
    /// Dependencies may be grouped per `targetFramework` or listed flat; a
    /// flat list becomes one group with an empty framework.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut nuspec = Nuspec::default();
        let mut path: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut group: Option<DependencyGroup> = None;
        let mut flat: Vec<PackageIdentifier> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let name = local_name(e);
                    match name.as_str() {
                        "group" => group = Some(start_group(e)?),
                        "dependency" => push_dependency(e, &mut group, &mut flat)?,
                        _ => {}
                    }
                    path.push(name);
                    text.clear();
                }
                Ok(Event::Empty(ref e)) => match local_name(e).as_str() {
                    "group" => nuspec.dependency_groups.push(start_group(e)?),
                    "dependency" => push_dependency(e, &mut group, &mut flat)?,
                    _ => {}
                },
                Ok(Event::Text(ref t)) => {
                    text.push_str(&t.unescape().context("Invalid text in nuspec")?);
                }
                Ok(Event::CData(ref c)) => {
                    text.push_str(&String::from_utf8_lossy(c.as_ref()));
                }
                Ok(Event::End(_)) => {
                    let name = path.pop().unwrap_or_default();
                    let in_metadata = path.last().is_some_and(|parent| parent == "metadata");
                    if in_metadata {
                        let value = text.trim().to_string();
                        match name.as_str() {
                            "id" => nuspec.id = value,
                            "version" => nuspec.version = value,
                            "title" => nuspec.title = Some(value).filter(|v| !v.is_empty()),
                            "description" => {
                                nuspec.description = Some(value).filter(|v| !v.is_empty())
                            }
                            "authors" => nuspec.authors = Some(value).filter(|v| !v.is_empty()),
                            _ => {}
                        }
                    }
                    if name == "group"
                        && let Some(finished) = group.take()
                    {
                        nuspec.dependency_groups.push(finished);
                    }
                    text.clear();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(anyhow!(
                        "Failed to parse nuspec at position {}: {}",
                        reader.error_position(),
                        e
                    ));
                }
            }
        }

        if !flat.is_empty() {
            nuspec.dependency_groups.push(DependencyGroup {
                target_framework: String::new(),
                dependencies: flat,
            });
        }

        if nuspec.id.is_empty() {
            return Err(anyhow!("nuspec has no <id>"));
        }
        if nuspec.version.is_empty() {
            return Err(anyhow!("nuspec for {} has no <version>", nuspec.id));
        }

        Ok(nuspec)
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart, key: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.context("Invalid attribute in nuspec")?;
        if attr.key.local_name().as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .context("Invalid attribute value in nuspec")?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn start_group(e: &BytesStart) -> Result<DependencyGroup> {
    let framework = attribute(e, "targetFramework")?.unwrap_or_default();
    Ok(DependencyGroup {
        target_framework: short_folder_name(&framework),
        dependencies: Vec::new(),
    })
}

fn push_dependency(
    e: &BytesStart,
    group: &mut Option<DependencyGroup>,
    flat: &mut Vec<PackageIdentifier>,
) -> Result<()> {
    let id = attribute(e, "id")?.ok_or_else(|| anyhow!("<dependency> without id"))?;
    let version = attribute(e, "version")?;
    let dependency = PackageIdentifier::new(id.as_str(), version.as_deref())
        .with_context(|| format!("Invalid dependency {}", id))?;
    match group {
        Some(group) => group.dependencies.push(dependency),
        None => flat.push(dependency),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>Serilog.Sinks.File</id>
    <version>5.0.0</version>
    <title>Serilog File Sink</title>
    <authors>Serilog Contributors</authors>
    <description>Write Serilog events to text files &amp; more.</description>
    <dependencies>
      <group targetFramework=".NETFramework4.5">
        <dependency id="Serilog" version="[2.10.0,3.0)" />
      </group>
      <group targetFramework=".NETStandard2.0">
        <dependency id="Serilog" version="2.10.0" exclude="Build" />
        <dependency id="System.Memory" />
      </group>
      <group targetFramework="net5.0" />
    </dependencies>
  </metadata>
</package>"#;

    #[test]
    fn test_parse_grouped_dependencies() {
        let nuspec = Nuspec::parse(GROUPED).unwrap();
        assert_eq!(nuspec.id, "Serilog.Sinks.File");
        assert_eq!(nuspec.version, "5.0.0");
        assert_eq!(nuspec.title.as_deref(), Some("Serilog File Sink"));
        assert_eq!(nuspec.authors.as_deref(), Some("Serilog Contributors"));
        assert_eq!(
            nuspec.description.as_deref(),
            Some("Write Serilog events to text files & more.")
        );

        let frameworks: Vec<&str> = nuspec
            .dependency_groups
            .iter()
            .map(|g| g.target_framework.as_str())
            .collect();
        assert_eq!(frameworks, vec!["net45", "netstandard2.0", "net5.0"]);

        let net45 = &nuspec.dependency_groups[0];
        assert_eq!(net45.dependencies.len(), 1);
        assert_eq!(net45.dependencies[0].id(), "Serilog");
        assert_eq!(net45.dependencies[0].version(), Some("[2.10.0,3.0)"));

        let netstandard = &nuspec.dependency_groups[1];
        assert_eq!(netstandard.dependencies.len(), 2);
        assert_eq!(netstandard.dependencies[1].version(), None);

        assert!(nuspec.dependency_groups[2].dependencies.is_empty());
    }

    #[test]
    fn test_parse_flat_dependencies() {
        let xml = r#"<package><metadata>
            <id>Flat</id><version>1.0.0</version>
            <dependencies>
              <dependency id="A" version="1.0" />
              <dependency id="B" version="[2.0,)" />
            </dependencies>
        </metadata></package>"#;

        let nuspec = Nuspec::parse(xml).unwrap();
        assert_eq!(nuspec.dependency_groups.len(), 1);
        assert_eq!(nuspec.dependency_groups[0].target_framework, "");
        assert_eq!(nuspec.dependency_groups[0].dependencies.len(), 2);
    }

    #[test]
    fn test_parse_without_dependencies() {
        let xml = "<package><metadata><id>Solo</id><version>0.1.0-beta</version></metadata></package>";
        let nuspec = Nuspec::parse(xml).unwrap();
        assert_eq!(nuspec.id, "Solo");
        assert_eq!(nuspec.version, "0.1.0-beta");
        assert!(nuspec.dependency_groups.is_empty());
        assert!(nuspec.title.is_none());
    }

    #[test]
    fn test_parse_ignores_nested_elements_named_like_fields() {
        let xml = r#"<package><metadata>
            <id>Outer</id><version>1.0.0</version>
            <repository><id>not-the-id</id></repository>
        </metadata></package>"#;
        let nuspec = Nuspec::parse(xml).unwrap();
        assert_eq!(nuspec.id, "Outer");
    }

    #[test]
    fn test_parse_missing_id_fails() {
        let xml = "<package><metadata><version>1.0.0</version></metadata></package>";
        assert!(Nuspec::parse(xml).is_err());
    }

    #[test]
    fn test_parse_missing_version_fails() {
        let xml = "<package><metadata><id>A</id></metadata></package>";
        assert!(Nuspec::parse(xml).unwrap_err().to_string().contains("version"));
    }

    #[test]
    fn test_parse_malformed_xml_fails() {
        assert!(Nuspec::parse("<package><metadata><id>A</metadata>").is_err());
    }

    #[test]
    fn test_parse_dependency_without_id_fails() {
        let xml = r#"<package><metadata><id>A</id><version>1.0</version>
            <dependencies><dependency version="1.0" /></dependencies>
        </metadata></package>"#;
        assert!(Nuspec::parse(xml).is_err());
    }
}
