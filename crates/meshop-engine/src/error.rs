//! Engine error types

use std::fmt;

use meshop_core::{ComponentName, CoreError};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("chart error in {path}: {message}")]
    Chart { path: String, message: String },

    #[error("install package path is not set")]
    MissingPackagePath,

    #[error("unsupported version {version}: no translation table")]
    UnsupportedVersion { version: String },

    #[error("overlay for {kind}/{name}: {message}")]
    Overlay {
        kind: String,
        name: String,
        message: String,
    },

    #[error("failed to render components:\n{0}")]
    Render(RenderErrors),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    SyntaxError,
    InvalidOperation,
    Other,
}

/// Template failure with the offending line highlighted
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(meshop::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,
}

impl TemplateError {
    pub fn from_minijinja(err: minijinja::Error, template_name: &str, template_source: &str) -> Self {
        let kind = match err.kind() {
            minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
            minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
            minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
            minijinja::ErrorKind::InvalidOperation => TemplateErrorKind::InvalidOperation,
            _ => TemplateErrorKind::Other,
        };
        let span = err.line().and_then(|line| calculate_span(template_source, line));

        Self {
            message: format!("{}: {}", template_name, err),
            kind,
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
        }
    }
}

fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;
    for (i, line) in source.lines().enumerate() {
        if i + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }
    None
}

/// Per-component render failures, in render order
#[derive(Debug, Default)]
pub struct RenderErrors(Vec<(ComponentName, EngineError)>);

impl RenderErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, component: ComponentName, err: EngineError) {
        self.0.push((component, err));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn components(&self) -> impl Iterator<Item = ComponentName> + '_ {
        self.0.iter().map(|(c, _)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ComponentName, EngineError)> {
        self.0.iter()
    }
}

impl fmt::Display for RenderErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (component, err)) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}: {}", component, err)?;
        }
        Ok(())
    }
}
