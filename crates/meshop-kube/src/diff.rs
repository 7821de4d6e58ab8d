//! Object-level comparison of two manifests
//!
//! Objects are matched by `kind:namespace:name`, so document order never
//! matters. Selectors use the same three fields, each an optional glob.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use glob::Pattern;
use walkdir::WalkDir;

use meshop_core::compare::{compile_patterns, diff_yaml};
use meshop_core::{K8sObject, parse_manifest};

use crate::error::{KubeError, Result};

pub const DEFAULT_SELECT: &str = "::";

/// `kind:namespace:name`, each field a glob; an empty field matches anything
#[derive(Debug, Clone)]
pub struct ObjectSelector {
    fields: [Option<Pattern>; 3],
}

impl ObjectSelector {
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |message: String| KubeError::InvalidSelector {
            selector: s.to_string(),
            message,
        };
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(invalid("expected kind:namespace:name".into()));
        }
        let field = |p: &str| -> Result<Option<Pattern>> {
            match p.trim() {
                "" | "*" => Ok(None),
                glob => Pattern::new(glob).map(Some).map_err(|e| invalid(e.to_string())),
            }
        };
        Ok(Self {
            fields: [field(parts[0])?, field(parts[1])?, field(parts[2])?],
        })
    }

    pub fn matches(&self, obj: &K8sObject) -> bool {
        let values = [obj.kind(), obj.namespace.as_deref().unwrap_or(""), obj.name.as_str()];
        self.fields
            .iter()
            .zip(values)
            .all(|(pattern, value)| pattern.as_ref().is_none_or(|p| p.matches(value)))
    }
}

/// Parse a comma separated selector list
pub fn parse_selectors(list: &str) -> Result<Vec<ObjectSelector>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(ObjectSelector::parse)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Only compare objects matching one of these
    pub select: Option<String>,
    /// Compare everything except objects matching one of these
    pub ignore: Option<String>,
    /// Globs over dotted field paths left out of the comparison
    pub ignore_paths: Vec<String>,
}

enum Filter {
    Select(Vec<ObjectSelector>),
    Ignore(Vec<ObjectSelector>),
}

impl Filter {
    fn new(opts: &DiffOptions) -> Result<Self> {
        match (&opts.select, &opts.ignore) {
            (Some(_), Some(_)) => Err(KubeError::InvalidConfig(
                "only one of select and ignore can be set".into(),
            )),
            (_, Some(ignore)) => Ok(Filter::Ignore(parse_selectors(ignore)?)),
            (select, None) => Ok(Filter::Select(parse_selectors(
                select.as_deref().unwrap_or(DEFAULT_SELECT),
            )?)),
        }
    }

    fn keep(&self, obj: &K8sObject) -> bool {
        match self {
            Filter::Select(s) => s.iter().any(|s| s.matches(obj)),
            Filter::Ignore(s) => !s.iter().any(|s| s.matches(obj)),
        }
    }
}

fn object_map(manifest: &str, filter: &Filter) -> Result<BTreeMap<String, K8sObject>> {
    Ok(parse_manifest(manifest)?
        .into_iter()
        .filter(|o| filter.keep(o))
        .map(|o| (o.hash(), o))
        .collect())
}

/// Compare two manifests. Empty when they hold the same objects.
pub fn diff_manifests(a: &str, b: &str, opts: &DiffOptions) -> Result<String> {
    let filter = Filter::new(opts)?;
    let ignore = compile_patterns(&opts.ignore_paths)
        .map_err(|e| KubeError::InvalidConfig(format!("invalid ignore path: {}", e)))?;
    let a = object_map(a, &filter)?;
    let b = object_map(b, &filter)?;

    let mut out = String::new();
    for (key, ao) in &a {
        match b.get(key) {
            Some(bo) => {
                let diff = diff_yaml(&ao.body, &bo.body, &ignore)?;
                if !diff.is_empty() {
                    out.push_str(&format!("\n\nObject {} has diffs:\n\n{}", key, diff));
                }
            }
            None => out.push_str(&format!("\n\nObject {} is missing:\n\n{}", key, ao.to_yaml()?)),
        }
    }
    for (key, bo) in b.iter().filter(|(k, _)| !a.contains_key(*k)) {
        out.push_str(&format!("\n\nObject {} is missing:\n\n{}", key, bo.to_yaml()?));
    }
    Ok(out)
}

/// Read a manifest file, or every `.yaml`/`.yml` file in a directory (sorted
/// by path, descending into subdirectories only when `recursive`)
pub fn read_manifests(path: &Path, recursive: bool) -> Result<String> {
    if path.is_file() {
        return Ok(fs::read_to_string(path)?);
    }
    let mut walker = WalkDir::new(path).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }
    let mut docs = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| KubeError::Io(e.into()))?;
        let is_yaml = entry
            .path()
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if entry.file_type().is_file() && is_yaml {
            docs.push(fs::read_to_string(entry.path())?);
        }
    }
    Ok(docs.join("\n---\n"))
}

/// [`diff_manifests`] over two files or directories
pub fn diff_paths(a: &Path, b: &Path, recursive: bool, opts: &DiffOptions) -> Result<String> {
    diff_manifests(&read_manifests(a, recursive)?, &read_manifests(b, recursive)?, opts)
}
