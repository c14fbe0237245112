use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::git::Repo;
use crate::types::ResourceKind;

/// Mandatory version label on every indexed manifest.
const VERSION_LABEL: &str = "app.kubernetes.io/version";

const DISPLAY_NAME_ANNOTATION: &str = "tekton.dev/displayName";
const MIN_PIPELINES_ANNOTATION: &str = "tekton.dev/pipelines.minVersion";
const TAGS_ANNOTATION: &str = "tekton.dev/tags";
const CATEGORIES_ANNOTATION: &str = "tekton.dev/categories";
const PLATFORMS_ANNOTATION: &str = "tekton.dev/platforms";
const DEPRECATED_ANNOTATION: &str = "tekton.dev/deprecated";

/// Catalog directories scanned for resources, by kind.
const KIND_DIRS: &[(&str, ResourceKind)] = &[
    ("task", ResourceKind::Task),
    ("pipeline", ResourceKind::Pipeline),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal structural problem found in a manifest. Issues coexist
/// with otherwise-successful results; they never stop the parse.
#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
}

/// Outcome of a parse. `errors` is reserved for conditions that make the
/// entire parse unusable; a partially-parsed catalog has zero errors and
/// one issue per problem.
#[derive(Debug, Default)]
pub struct ParseReport {
    pub errors: Vec<String>,
    pub issues: Vec<Issue>,
}

impl ParseReport {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn issue(&mut self, severity: Severity, message: impl Into<String>) {
        self.issues.push(Issue {
            severity,
            message: message.into(),
        });
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ParsedVersion {
    pub version: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub min_pipelines_version: Option<String>,
    pub deprecated: bool,
    /// Manifest path relative to the repository root.
    pub path: PathBuf,
    pub platforms: Vec<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ParsedResource {
    pub name: String,
    pub kind: ResourceKind,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub versions: Vec<ParsedVersion>,
}

/// Raw manifest shape. Only the fields the hub indexes are decoded; the
/// task/pipeline body is opaque to the engine.
#[derive(Debug, Deserialize)]
struct Manifest {
    kind: Option<String>,
    metadata: Option<Metadata>,
    spec: Option<ManifestSpec>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: Option<String>,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ManifestSpec {
    description: Option<String>,
}

/// Walks a catalog checkout and extracts the resources it contains.
///
/// Expected layout, rooted at the optional context directory:
///
/// ```text
/// task/<name>/<version>/<name>.yaml
/// pipeline/<name>/<version>/<name>.yaml
/// ```
pub struct Parser<'a> {
    repo: &'a Repo,
    context_dir: Option<&'a str>,
}

impl<'a> Parser<'a> {
    #[must_use]
    pub fn new(repo: &'a Repo, context_dir: Option<&'a str>) -> Self {
        Self { repo, context_dir }
    }

    pub fn parse(&self) -> (Vec<ParsedResource>, ParseReport) {
        let mut report = ParseReport::default();
        let mut resources = Vec::new();
        let mut discovered = 0usize;

        let root = match self.context_dir {
            Some(dir) if !dir.is_empty() => self.repo.path().join(dir),
            _ => self.repo.path().to_path_buf(),
        };

        for (dir, kind) in KIND_DIRS {
            let kind_dir = root.join(dir);
            if !kind_dir.is_dir() {
                continue;
            }

            for name_dir in sorted_subdirs(&kind_dir) {
                discovered += 1;
                if let Some(resource) = self.parse_resource(*kind, &name_dir, &mut report) {
                    resources.push(resource);
                }
            }
        }

        if discovered == 0 {
            report.error("no resources found in repo");
        }

        (resources, report)
    }

    fn parse_resource(
        &self,
        kind: ResourceKind,
        name_dir: &Path,
        report: &mut ParseReport,
    ) -> Option<ParsedResource> {
        let name = dir_name(name_dir);

        let version_dirs = sorted_subdirs(name_dir);
        if version_dirs.is_empty() {
            report.issue(
                Severity::Critical,
                format!("{kind} {name}: no version directories found"),
            );
            return None;
        }

        let mut versions = Vec::new();
        let mut tags = Vec::new();
        let mut categories = Vec::new();

        for version_dir in &version_dirs {
            let dir_version = dir_name(version_dir);
            let manifest_path = version_dir.join(format!("{name}.yaml"));

            if !manifest_path.is_file() {
                report.issue(
                    Severity::Critical,
                    format!("{kind} {name} version {dir_version}: no manifest named {name}.yaml"),
                );
                continue;
            }

            if let Some(version) =
                self.parse_version(kind, &name, &dir_version, &manifest_path, report)
            {
                merge_names(&mut tags, &version.1);
                merge_names(&mut categories, &version.2);
                versions.push(version.0);
            }
        }

        versions.sort_by(|a, b| compare_versions(&a.version, &b.version));

        Some(ParsedResource {
            name,
            kind,
            tags,
            categories,
            versions,
        })
    }

    /// Returns the parsed version plus the tag and category names its
    /// manifest declares. A manifest that does not decode to a Task or
    /// Pipeline is skipped without an issue; one that does but violates
    /// the layout conventions produces issues instead.
    fn parse_version(
        &self,
        kind: ResourceKind,
        name: &str,
        dir_version: &str,
        manifest_path: &Path,
        report: &mut ParseReport,
    ) -> Option<(ParsedVersion, Vec<String>, Vec<String>)> {
        let raw = match fs::read_to_string(manifest_path) {
            Ok(raw) => raw,
            Err(e) => {
                report.issue(
                    Severity::Critical,
                    format!("{kind} {name} version {dir_version}: unreadable manifest: {e}"),
                );
                return None;
            }
        };

        let manifest: Manifest = match serde_yaml::from_str(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                report.issue(
                    Severity::Critical,
                    format!("{kind} {name} version {dir_version}: invalid manifest: {e}"),
                );
                return None;
            }
        };

        let manifest_kind = manifest.kind.as_deref().unwrap_or_default();
        if !manifest_kind.eq_ignore_ascii_case(kind.as_str()) {
            debug!(path = %manifest_path.display(), kind = manifest_kind, "ignoring unrecognized kind");
            return None;
        }

        let metadata = match manifest.metadata {
            Some(metadata) => metadata,
            None => {
                report.issue(
                    Severity::Critical,
                    format!("{kind} {name} version {dir_version}: manifest has no metadata"),
                );
                return None;
            }
        };

        if let Some(manifest_name) = metadata.name.as_deref() {
            if manifest_name != name {
                report.issue(
                    Severity::Critical,
                    format!(
                        "{kind} {name} version {dir_version}: manifest name {manifest_name} does not match directory"
                    ),
                );
                return None;
            }
        }

        let version = match metadata.labels.get(VERSION_LABEL) {
            Some(version) => version.trim().to_string(),
            None => {
                report.issue(
                    Severity::Critical,
                    format!("{kind} {name} version {dir_version}: missing label {VERSION_LABEL}"),
                );
                return None;
            }
        };

        if version != dir_version {
            report.issue(
                Severity::Critical,
                format!(
                    "{kind} {name}: version label {version} does not match directory {dir_version}"
                ),
            );
            return None;
        }

        let display_name = metadata.annotations.get(DISPLAY_NAME_ANNOTATION).cloned();
        if display_name.is_none() {
            report.issue(
                Severity::Info,
                format!("{kind} {name} version {version}: missing display name"),
            );
        }

        let min_pipelines_version = metadata.annotations.get(MIN_PIPELINES_ANNOTATION).cloned();
        if min_pipelines_version.is_none() {
            report.issue(
                Severity::Warning,
                format!("{kind} {name} version {version}: missing pipelines.minVersion"),
            );
        }

        let deprecated = metadata
            .annotations
            .get(DEPRECATED_ANNOTATION)
            .is_some_and(|v| v.trim() == "true");

        let rel_path = manifest_path
            .strip_prefix(self.repo.path())
            .unwrap_or(manifest_path)
            .to_path_buf();

        let modified_at = match self.repo.modified_time(&rel_path) {
            Ok(time) => Some(time),
            Err(e) => {
                debug!(path = %rel_path.display(), "no modification time: {e}");
                None
            }
        };

        let parsed = ParsedVersion {
            version,
            display_name,
            description: manifest.spec.and_then(|s| s.description),
            min_pipelines_version,
            deprecated,
            path: rel_path,
            platforms: split_names(metadata.annotations.get(PLATFORMS_ANNOTATION)),
            modified_at,
        };

        let tags = split_names(metadata.annotations.get(TAGS_ANNOTATION));
        let categories = split_names(metadata.annotations.get(CATEGORIES_ANNOTATION));

        Some((parsed, tags, categories))
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn sorted_subdirs(path: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Splits a comma-separated annotation value into trimmed names.
fn split_names(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn merge_names(into: &mut Vec<String>, names: &[String]) {
    for name in names {
        if !into.iter().any(|n| n == name) {
            into.push(name.clone());
        }
    }
}

/// Orders dotted version strings numerically where possible, so "0.2"
/// sorts before "0.12".
fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parts = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|p| p.parse::<u64>().unwrap_or(0))
            .collect()
    };
    parts(a).cmp(&parts(b)).then_with(|| a.cmp(b))
}
