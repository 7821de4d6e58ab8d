//! Chart rendering based on MiniJinja
//!
//! A chart is a directory with an optional `values.yaml` holding defaults and a
//! `templates/` directory. Templates whose file name starts with `_` are
//! helpers: they can be imported or included but produce no output of their own.

use std::path::{Path, PathBuf};

use minijinja::Environment;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use meshop_core::{ComponentName, merge};

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;

/// Release name charts see as `release.name`
pub const RELEASE_NAME: &str = "istio";

/// Values shared by every chart, read from the package root when present
pub const GLOBAL_VALUES_FILE: &str = "global.yaml";

const TEMPLATE_EXTENSIONS: &[&str] = &["yaml", "yml", "tpl", "j2"];

/// Turns a values document into manifest text
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, values_yaml: &str) -> Result<String>;
}

/// Hands out the renderer for a component's chart
pub trait RendererProvider: Send + Sync {
    fn renderer(&self, component: ComponentName, namespace: &str) -> Result<Box<dyn TemplateRenderer>>;
}

#[derive(Debug, Clone, Serialize)]
struct ReleaseInfo {
    name: String,
    namespace: String,
}

/// Renderer for one chart, with all templates loaded up front
#[derive(Debug, Clone)]
pub struct ChartRenderer {
    name: String,
    /// (name relative to `templates/`, source), sorted by name
    templates: Vec<(String, String)>,
    defaults: Value,
    release: ReleaseInfo,
    strict: bool,
}

impl ChartRenderer {
    /// Load the chart at `chart_dir`. `global_values` sits underneath the
    /// chart's own defaults.
    pub fn load(chart_dir: &Path, namespace: &str, global_values: &Value) -> Result<Self> {
        let chart_err = |message: String| EngineError::Chart {
            path: chart_dir.display().to_string(),
            message,
        };

        let templates_dir = chart_dir.join("templates");
        if !templates_dir.is_dir() {
            return Err(chart_err("no templates directory".to_string()));
        }

        let mut templates = Vec::new();
        for entry in WalkDir::new(&templates_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| chart_err(e.to_string()))?;
            let path = entry.path();
            let is_template = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| TEMPLATE_EXTENSIONS.contains(&e));
            if !entry.file_type().is_file() || !is_template {
                continue;
            }
            let rel = path.strip_prefix(&templates_dir).unwrap_or(path);
            let name = rel.to_string_lossy().replace('\\', "/");
            templates.push((name, std::fs::read_to_string(path)?));
        }

        let values_file = chart_dir.join("values.yaml");
        let chart_defaults: Value = if values_file.is_file() {
            parse_values(&std::fs::read_to_string(&values_file)?)?
        } else {
            Value::Null
        };

        debug!(chart = %chart_dir.display(), templates = templates.len(), "loaded chart");

        let name = chart_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self::from_templates(name, templates, namespace)
            .with_defaults(merge::overlay_all([global_values, &chart_defaults])))
    }

    /// Build a renderer from in-memory templates
    pub fn from_templates(name: impl Into<String>, mut templates: Vec<(String, String)>, namespace: &str) -> Self {
        templates.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.into(),
            templates,
            defaults: Value::Null,
            release: ReleaseInfo {
                name: RELEASE_NAME.to_string(),
                namespace: namespace.to_string(),
            },
            strict: false,
        }
    }

    pub fn with_defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }

    /// Fail on undefined variables instead of rendering them empty
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn environment(&self) -> Result<Environment<'static>> {
        let mut env = Environment::new();
        env.set_undefined_behavior(if self.strict {
            minijinja::UndefinedBehavior::Strict
        } else {
            minijinja::UndefinedBehavior::Lenient
        });
        filters::register(&mut env);

        for (name, source) in &self.templates {
            env.add_template_owned(name.clone(), source.clone())
                .map_err(|e| TemplateError::from_minijinja(e, name, source))?;
        }
        Ok(env)
    }
}

impl TemplateRenderer for ChartRenderer {
    fn render(&self, values_yaml: &str) -> Result<String> {
        let values = merge::overlay_all([&self.defaults, &parse_values(values_yaml)?]);
        let env = self.environment()?;
        let ctx = minijinja::context! {
            values => &values,
            release => &self.release,
        };

        let mut out = String::new();
        for (name, source) in &self.templates {
            let is_helper = name.rsplit('/').next().is_some_and(|f| f.starts_with('_'));
            if is_helper {
                continue;
            }
            let rendered = env
                .get_template(name)
                .and_then(|t| t.render(&ctx))
                .map_err(|e| TemplateError::from_minijinja(e, name, source))?;

            let trimmed = rendered.trim();
            if trimmed.is_empty() || trimmed == "---" {
                continue;
            }
            if !out.is_empty() {
                out.push_str("---\n");
            }
            out.push_str(trimmed.trim_start_matches("---\n"));
            out.push('\n');
        }
        Ok(out)
    }
}

/// Loads charts from an install package directory
#[derive(Debug, Clone)]
pub struct ChartRendererProvider {
    root: PathBuf,
    global_values: Value,
}

impl ChartRendererProvider {
    /// `path` may carry a `file://` prefix. An empty path is an error.
    pub fn from_install_package_path(path: &str) -> Result<Self> {
        let path = path.strip_prefix("file://").unwrap_or(path);
        if path.is_empty() {
            return Err(EngineError::MissingPackagePath);
        }
        Self::new(PathBuf::from(path))
    }

    pub fn new(root: PathBuf) -> Result<Self> {
        let global_file = root.join(GLOBAL_VALUES_FILE);
        let global_values = if global_file.is_file() {
            parse_values(&std::fs::read_to_string(&global_file)?)?
        } else {
            Value::Null
        };
        Ok(Self { root, global_values })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RendererProvider for ChartRendererProvider {
    fn renderer(&self, component: ComponentName, namespace: &str) -> Result<Box<dyn TemplateRenderer>> {
        let dir = self.root.join(component.chart_dir());
        Ok(Box::new(ChartRenderer::load(&dir, namespace, &self.global_values)?))
    }
}

fn parse_values(yaml: &str) -> Result<Value> {
    if yaml.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_yaml::from_str(yaml)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_chart(root: &Path, dir: &str, files: &[(&str, &str)]) {
        for (name, content) in files {
            let path = root.join(dir).join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn test_render_inline() {
        let r = ChartRenderer::from_templates(
            "pilot",
            vec![(
                "deployment.yaml".into(),
                "kind: Deployment\nmetadata:\n  name: istio-pilot\n  namespace: {{ release.namespace }}\nspec:\n  replicas: {{ values.pilot.replicaCount }}\n".into(),
            )],
            "istio-system",
        );
        let out = r.render("pilot:\n  replicaCount: 2\n").unwrap();
        assert!(out.contains("namespace: istio-system"));
        assert!(out.contains("replicas: 2"));
    }

    #[test]
    fn test_documents_are_separated_and_helpers_skipped() {
        let r = ChartRenderer::from_templates(
            "x",
            vec![
                ("b.yaml".into(), "b: {{ values.v }}".into()),
                ("_helpers.tpl".into(), "{% macro name() %}helper{% endmacro %}".into()),
                ("a.yaml".into(), "{% from '_helpers.tpl' import name %}a: {{ name() }}".into()),
                ("empty.yaml".into(), "{% if values.missing %}x: 1{% endif %}".into()),
            ],
            "ns",
        );
        assert_eq!(r.render("v: 1").unwrap(), "a: helper\n---\nb: 1\n");
    }

    #[test]
    fn test_strict_mode_reports_undefined() {
        let r = ChartRenderer::from_templates("x", vec![("a.yaml".into(), "a: {{ values.nope.deeper }}".into())], "ns")
            .strict(true);
        match r.render("").unwrap_err() {
            EngineError::Template(e) => assert!(e.message.starts_with("a.yaml")),
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_load_chart_with_defaults_and_globals() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("global.yaml"), "global:\n  hub: docker.io/istio\n  tag: 1.2.0\n").unwrap();
        write_chart(
            tmp.path(),
            "istio-control/istio-discovery",
            &[
                ("values.yaml", "global:\n  tag: 1.3.0\npilot:\n  replicaCount: 1\n"),
                (
                    "templates/deployment.yaml",
                    "image: {{ values.global.hub }}/pilot:{{ values.global.tag }}\nreplicas: {{ values.pilot.replicaCount }}\n",
                ),
                ("templates/NOTES.txt", "not a template"),
            ],
        );

        let provider = ChartRendererProvider::from_install_package_path(&format!("file://{}", tmp.path().display())).unwrap();
        let renderer = provider.renderer(ComponentName::Pilot, "istio-system").unwrap();
        let out = renderer.render("pilot:\n  replicaCount: 3\n").unwrap();
        assert_eq!(out, "image: docker.io/istio/pilot:1.3.0\nreplicas: 3\n");
    }

    #[test]
    fn test_missing_chart_and_empty_path() {
        assert!(matches!(
            ChartRendererProvider::from_install_package_path("file://"),
            Err(EngineError::MissingPackagePath)
        ));
        let tmp = tempfile::tempdir().unwrap();
        let provider = ChartRendererProvider::new(tmp.path().to_path_buf()).unwrap();
        let err = provider.renderer(ComponentName::Galley, "istio-system").err().unwrap();
        assert!(err.to_string().contains("no templates directory"), "{}", err);
    }
}
