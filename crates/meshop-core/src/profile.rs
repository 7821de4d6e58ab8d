//! Builtin profiles
//!
//! A profile is a spec document used as the base layer. Every profile other than
//! `default` is applied on top of `default`, so profiles only carry what differs.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::merge;
use crate::values::Values;

pub const DEFAULT_PROFILE: &str = "default";

/// Document layered between the profile and the user overlay
pub const COMPILED_DEFAULTS: &str = "defaultNamespace: istio-system\n";

static BUILTIN_PROFILES: &[(&str, &str)] = &[
    ("default", include_str!("../profiles/default.yaml")),
    ("demo", include_str!("../profiles/demo.yaml")),
    ("minimal", include_str!("../profiles/minimal.yaml")),
    ("sds", include_str!("../profiles/sds.yaml")),
];

/// Names of the builtin profiles, sorted
pub fn builtin_names() -> Vec<&'static str> {
    BUILTIN_PROFILES.iter().map(|(name, _)| *name).collect()
}

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_PROFILES.iter().any(|(n, _)| *n == name)
}

/// Raw YAML of a builtin profile as shipped
pub fn builtin_yaml(name: &str) -> Option<&'static str> {
    BUILTIN_PROFILES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, yaml)| *yaml)
}

/// True for values that look like a file path rather than a profile name
fn looks_like_path(name: &str) -> bool {
    name.contains('/') || name.ends_with(".yaml") || name.ends_with(".yml")
}

/// Resolve a profile name or file path to its full document, `default` applied underneath.
/// An empty name selects `default`.
pub fn load(name_or_path: &str) -> Result<Value> {
    let name = if name_or_path.is_empty() {
        DEFAULT_PROFILE
    } else {
        name_or_path
    };

    let mut doc = Values::from_yaml(builtin_yaml(DEFAULT_PROFILE).unwrap_or_default())?.0;
    if name == DEFAULT_PROFILE {
        return Ok(doc);
    }

    let overlay = if let Some(yaml) = builtin_yaml(name) {
        debug!(profile = name, "using builtin profile");
        Values::from_yaml(yaml)?
    } else if looks_like_path(name) {
        debug!(path = name, "reading profile file");
        Values::from_file(Path::new(name))?
    } else {
        return Err(CoreError::UnknownProfile {
            name: name.to_string(),
            available: builtin_names().join(", "),
        });
    };

    merge::overlay(&mut doc, &overlay.0);
    Ok(doc)
}

/// The compiled-in defaults document
pub fn compiled_defaults() -> Result<Value> {
    Ok(Values::from_yaml(COMPILED_DEFAULTS)?.0)
}
