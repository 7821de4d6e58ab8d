//! Core error types

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid path {path:?}: {message}")]
    InvalidPath { path: String, message: String },

    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("element not found: {path}")]
    ElementNotFound { path: String },

    #[error("ambiguous match at {path}: {count} elements match")]
    AmbiguousMatch { path: String, count: usize },

    #[error("node at {path} is a {found}, cannot traverse into it")]
    NotTraversable { path: String, found: &'static str },

    #[error("bad argument {arg}: expect format key=value")]
    BadSetArgument { arg: String },

    #[error("bad path=value {arg}: {source}")]
    BadSetValue {
        arg: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("could not parse spec: {message}")]
    InvalidSpec { message: String },

    #[error("unknown profile {name:?}, available profiles: {available}")]
    UnknownProfile { name: String, available: String },

    #[error("merged YAML differs from merged spec:\n{diff}")]
    RoundTrip { diff: String },

    #[error("unsupported version {version}")]
    UnsupportedVersion { version: String },

    #[error("upgrade is currently not supported: {current} -> {target}")]
    UnsupportedUpgrade { current: String, target: String },

    #[error("invalid tag {tag:?}: {message}")]
    InvalidTag { tag: String, message: String },

    #[error("invalid manifest: {message}")]
    InvalidManifest { message: String },

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// A single failed check at a document path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Every validation failure found in one pass over a document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate as an error
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed with {} error(s)", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  - {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
