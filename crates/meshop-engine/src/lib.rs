//! meshop Engine - turns a merged spec into component manifests
//!
//! The pipeline is:
//! - [`Translator`]: spec fields to chart values, per minor version
//! - [`ComponentRenderer`]: values layering, chart render and object overlays
//! - [`ControlPlaneRenderer`]: every component in fixed order, errors aggregated

pub mod component;
pub mod control_plane;
pub mod error;
pub mod filters;
pub mod overlay;
pub mod renderer;
pub mod translate;

pub use component::ComponentRenderer;
pub use control_plane::{ControlPlaneRenderer, ManifestMap};
pub use error::{EngineError, RenderErrors, Result, TemplateError, TemplateErrorKind};
pub use overlay::apply_overlays;
pub use renderer::{ChartRenderer, ChartRendererProvider, RendererProvider, TemplateRenderer};
pub use translate::{InstanceValues, TranslatedValues, Translator};

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use meshop_core::ComponentName;

    use crate::error::Result;
    use crate::renderer::{ChartRenderer, RendererProvider, TemplateRenderer};

    /// One in-memory template per component; records which charts were asked for
    #[derive(Default)]
    pub struct StaticProvider {
        templates: BTreeMap<ComponentName, String>,
        requested: Mutex<Vec<(ComponentName, String)>>,
    }

    impl StaticProvider {
        pub fn with(mut self, component: ComponentName, template: &str) -> Self {
            self.templates.insert(component, template.to_string());
            self
        }

        pub fn requested(&self) -> Vec<(ComponentName, String)> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl RendererProvider for StaticProvider {
        fn renderer(&self, component: ComponentName, namespace: &str) -> Result<Box<dyn TemplateRenderer>> {
            self.requested.lock().unwrap().push((component, namespace.to_string()));
            let templates = self
                .templates
                .get(&component)
                .map(|t| vec![("manifest.yaml".to_string(), t.clone())])
                .unwrap_or_default();
            Ok(Box::new(ChartRenderer::from_templates(component.as_str(), templates, namespace)))
        }
    }
}
