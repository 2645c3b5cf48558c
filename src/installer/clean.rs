//! Post-extraction pruning of an installed package directory.

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::framework::{FrameworkResolver, LEGACY_FAMILY};
use crate::runtime::Runtime;

use super::report::{Issue, IssueKind};

/// Folders that only matter to packaging or build tooling.
const ARTIFACT_DIRS: [&str; 8] = [
    "_rels",
    "package",
    "build",
    "buildTransitive",
    "docs",
    "src",
    "ref",
    "runtimes",
];

/// Root-level files describing the archive itself.
const ARTIFACT_FILES: [&str; 2] = ["*.nuspec", "[[]Content_Types[]].xml"];

/// Debug symbols, removed anywhere in the tree.
const SYMBOL_FILES: &str = "*.pdb";

const LIB_DIR: &str = "lib";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Destination directories for special content folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocations {
    /// Target of a package's `tools` folder.
    pub tools: PathBuf,
    /// Target of a package's `Android` folder.
    pub android: PathBuf,
    /// Target of a package's `iOS` folder.
    pub ios: PathBuf,
    /// Target of a package's `StreamingAssets` folder.
    pub streaming_assets: PathBuf,
}

impl Relocations {
    pub fn for_project(project: &Path) -> Self {
        let assets = project.join("Assets");
        Self {
            tools: project.join("Tools"),
            android: assets.join("Plugins").join("Android"),
            ios: assets.join("Plugins").join("iOS"),
            streaming_assets: assets.join("StreamingAssets"),
        }
    }

    pub fn with_overrides(mut self, overrides: &RelocationOverrides) -> Self {
        if let Some(path) = &overrides.tools {
            self.tools = path.clone();
        }
        if let Some(path) = &overrides.android {
            self.android = path.clone();
        }
        if let Some(path) = &overrides.ios {
            self.ios = path.clone();
        }
        if let Some(path) = &overrides.streaming_assets {
            self.streaming_assets = path.clone();
        }
        self
    }

    fn entries(&self) -> [(&'static str, &Path); 4] {
        [
            ("tools", self.tools.as_path()),
            ("Android", self.android.as_path()),
            ("iOS", self.ios.as_path()),
            ("StreamingAssets", self.streaming_assets.as_path()),
        ]
    }
}

/// Configured replacements for the default relocation targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<PathBuf>,
    #[serde(default, rename = "Android", skip_serializing_if = "Option::is_none")]
    pub android: Option<PathBuf>,
    #[serde(default, rename = "iOS", skip_serializing_if = "Option::is_none")]
    pub ios: Option<PathBuf>,
    #[serde(default, rename = "StreamingAssets", skip_serializing_if = "Option::is_none")]
    pub streaming_assets: Option<PathBuf>,
}

pub struct CleanContext<'a> {
    pub frameworks: &'a FrameworkResolver,
    pub relocations: &'a Relocations,
    /// The host already ships an assembly with this package's id.
    pub host_provided: bool,
}

fn patterns(globs: &[&str]) -> Vec<Pattern> {
    globs.iter().filter_map(|g| Pattern::new(g).ok()).collect()
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// Every file below `dir`, depth first.
pub(crate) fn walk_files<R: Runtime>(runtime: &R, dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in runtime.read_dir(dir)? {
        if runtime.is_dir(&entry) {
            files.extend(walk_files(runtime, &entry)?);
        } else {
            files.push(entry);
        }
    }
    Ok(files)
}

/// Prune `package_dir` after extraction. Failures are returned as issues
/// and never abort the clean.
#[tracing::instrument(skip(runtime, context))]
pub fn clean_package<R: Runtime>(
    runtime: &R,
    package: &str,
    package_dir: &Path,
    context: &CleanContext<'_>,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    remove_artifacts(runtime, package, package_dir, &mut issues);
    if context.host_provided {
        info!("{} is provided by the host; keeping every library variant", package);
    } else {
        prune_lib(runtime, package, package_dir, context.frameworks, &mut issues);
    }
    relocate(runtime, package, package_dir, context.relocations, &mut issues);
    issues
}

fn remove_artifacts<R: Runtime>(runtime: &R, package: &str, dir: &Path, issues: &mut Vec<Issue>) {
    let mut doomed: Vec<PathBuf> = ARTIFACT_DIRS
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| runtime.is_dir(path))
        .collect();

    let root_files = patterns(&ARTIFACT_FILES);
    for entry in runtime.read_dir(dir).unwrap_or_default() {
        if !runtime.is_dir(&entry)
            && root_files.iter().any(|p| p.matches_with(file_name(&entry), MATCH_OPTIONS))
        {
            doomed.push(entry);
        }
    }

    let symbols = patterns(&[SYMBOL_FILES]);
    match walk_files(runtime, dir) {
        Ok(files) => doomed.extend(files.into_iter().filter(|f| {
            symbols.iter().any(|p| p.matches_with(file_name(f), MATCH_OPTIONS))
        })),
        Err(e) => warn!("Could not scan {:?} for symbol files: {:#}", dir, e),
    }

    for path in doomed {
        if !runtime.exists(&path) {
            continue;
        }
        let result = if runtime.is_dir(&path) {
            runtime.remove_dir_all(&path)
        } else {
            runtime.remove_file(&path)
        };
        match result {
            Ok(()) => debug!("Removed {:?}", path),
            Err(e) => {
                warn!("Failed to remove {:?} from {}: {:#}", path, package, e);
                issues.push(Issue::new(IssueKind::Cleanup, package, path, &e));
            }
        }
    }
}

/// Library variant folders to keep for `best`.
fn kept_variants(names: &[String], best: &str) -> HashSet<String> {
    if FrameworkResolver::is_legacy_family(best) {
        names
            .iter()
            .filter(|name| LEGACY_FAMILY.iter().any(|f| f.eq_ignore_ascii_case(name)))
            .cloned()
            .collect()
    } else {
        HashSet::from([best.to_string()])
    }
}

fn prune_lib<R: Runtime>(
    runtime: &R,
    package: &str,
    dir: &Path,
    frameworks: &FrameworkResolver,
    issues: &mut Vec<Issue>,
) {
    let lib = dir.join(LIB_DIR);
    if !runtime.is_dir(&lib) {
        return;
    }
    let variants: Vec<PathBuf> = runtime
        .read_dir(&lib)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| runtime.is_dir(p))
        .collect();
    let names: Vec<String> = variants.iter().map(|p| file_name(p).to_string()).collect();

    let Some(best) = frameworks.best_match(names.iter().map(String::as_str)) else {
        warn!(
            "No library variant of {} matches the runtime profile; keeping all of {:?}",
            package, names
        );
        return;
    };
    let keep = kept_variants(&names, best);
    info!("Keeping library variants {:?} of {}", keep, package);

    for (path, name) in variants.iter().zip(&names) {
        if keep.contains(name) {
            continue;
        }
        if let Err(e) = runtime.remove_dir_all(path) {
            warn!("Failed to remove variant {:?} of {}: {:#}", path, package, e);
            issues.push(Issue::new(IssueKind::Cleanup, package, path.clone(), &e));
        }
    }
}

fn relocate<R: Runtime>(
    runtime: &R,
    package: &str,
    dir: &Path,
    relocations: &Relocations,
    issues: &mut Vec<Issue>,
) {
    for (folder, dest) in relocations.entries() {
        let source = dir.join(folder);
        if !runtime.is_dir(&source) {
            continue;
        }
        info!("Moving {:?} of {} to {:?}", folder, package, dest);

        let files = match walk_files(runtime, &source) {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to read {:?}: {:#}", source, e);
                issues.push(Issue::new(IssueKind::Relocation, package, source, &e));
                continue;
            }
        };

        let mut moved_all = true;
        for file in files {
            if let Err(e) = move_file(runtime, &source, &file, dest) {
                warn!("Failed to move {:?} of {}: {:#}", file, package, e);
                issues.push(Issue::new(IssueKind::Relocation, package, file, &e));
                moved_all = false;
            }
        }
        if moved_all && let Err(e) = runtime.remove_dir_all(&source) {
            warn!("Failed to remove {:?}: {:#}", source, e);
            issues.push(Issue::new(IssueKind::Relocation, package, source, &e));
        }
    }
}

/// Move `file` (below `root`) to the same relative path below `dest`,
/// overwriting an existing file.
fn move_file<R: Runtime>(runtime: &R, root: &Path, file: &Path, dest: &Path) -> Result<()> {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let target = dest.join(relative);
    if let Some(parent) = target.parent() {
        runtime.create_dir_all(parent)?;
    }
    if runtime.exists(&target) {
        runtime.set_readonly(&target, false)?;
        runtime.remove_file(&target)?;
    }
    runtime
        .copy(file, &target)
        .with_context(|| format!("Failed to copy to {:?}", target))?;
    runtime.remove_file(file)?;
    Ok(())
}
