//! Layered configuration merge
//!
//! The merged spec is built from four layers, later layers winning:
//!
//! 1. the selected profile (with `default` underneath it)
//! 2. the compiled-in defaults
//! 3. the user overlay file
//! 4. the `--set path=value` entries
//!
//! The overlay, the base and the final result are each parsed into
//! [`ControlPlaneSpec`] and validated; nothing invalid leaves this module.

use std::path::Path as FsPath;

use serde_json::Value;
use tracing::{debug, info};

use crate::compare;
use crate::error::{CoreError, Result};
use crate::merge;
use crate::path::Path;
use crate::profile;
use crate::spec::ControlPlaneSpec;
use crate::tree;
use crate::validation::validate_tree;
use crate::values::{Values, split_set_argument};

/// A validated merge result: the untyped tree and its typed form
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSpec {
    pub tree: Value,
    pub spec: ControlPlaneSpec,
}

impl MergedSpec {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.tree)?)
    }
}

/// Builds [`MergedSpec`]s from profiles, overlays and `--set` entries
#[derive(Debug, Clone, Default)]
pub struct ConfigMerger {
    /// Profile used when neither the overlay nor `--set` names one
    default_profile: Option<String>,
}

impl ConfigMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `profile` when the inputs select none
    pub fn with_default_profile(mut self, profile: impl Into<String>) -> Self {
        self.default_profile = Some(profile.into());
        self
    }

    /// Read the overlay file (if any), pick the profile and merge everything.
    /// A missing or empty overlay path means "no overlay".
    pub fn generate(&self, overlay_file: Option<&FsPath>, set_values: &[String]) -> Result<MergedSpec> {
        let overlay = match overlay_file {
            Some(path) if !path.as_os_str().is_empty() => {
                debug!(path = %path.display(), "reading overlay");
                Values::from_file(path)?.0
            }
            _ => empty(),
        };
        self.generate_from_value(&overlay, set_values)
    }

    /// Same as [`ConfigMerger::generate`] with the overlay already parsed
    pub fn generate_from_value(&self, overlay: &Value, set_values: &[String]) -> Result<MergedSpec> {
        let set_overlay = make_tree_from_set_list(set_values)?;
        let overlay = if overlay.is_null() { empty() } else { overlay.clone() };

        let profile_name = self.select_profile(&overlay, &set_overlay);
        info!(profile = %profile_name, "selected profile");
        let profile_doc = profile::load(&profile_name)?;

        merge_layers(&profile_doc, &profile::compiled_defaults()?, &overlay, &set_overlay)
    }

    /// `--set profile=` wins over the overlay's `profile`, then the default
    fn select_profile(&self, overlay: &Value, set_overlay: &Value) -> String {
        [set_overlay, overlay]
            .iter()
            .find_map(|doc| doc.get("profile").and_then(Value::as_str))
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| profile::DEFAULT_PROFILE.to_string())
    }
}

/// Merge the four layers in order and validate.
///
/// The overlay on its own, the base (profile + defaults) and the final merge are
/// each parsed and validated. The final tree must survive a round trip through
/// the typed spec unchanged.
pub fn merge_layers(
    profile_doc: &Value,
    defaults_doc: &Value,
    overlay_doc: &Value,
    set_overlay_doc: &Value,
) -> Result<MergedSpec> {
    check_stage(overlay_doc, "overlay")?;

    let base = merge::overlay_all([profile_doc, defaults_doc]);
    check_stage(&base, "base profile")?;

    let merged = merge::overlay_all([&base, overlay_doc, set_overlay_doc]);
    let spec = check_stage(&merged, "merged spec")?;

    // `--set` writes strings; typed fields come back as bools and integers
    let reserialized = spec.to_value()?;
    let diff = compare::diff_yaml(
        &canonical_scalars(&strip_nulls(&merged)),
        &canonical_scalars(&strip_nulls(&reserialized)),
        &[],
    )?;
    if !diff.is_empty() {
        return Err(CoreError::RoundTrip { diff });
    }

    Ok(MergedSpec { tree: reserialized, spec })
}

/// Build the `--set` overlay document. Entries are applied in order, so a
/// repeated path keeps its last value. Each entry must leave a valid spec.
pub fn make_tree_from_set_list(set_values: &[String]) -> Result<Value> {
    let mut tree = empty();
    for arg in set_values {
        let (key, val) = split_set_argument(arg)?;
        let bad = |source: CoreError| CoreError::BadSetValue {
            arg: arg.clone(),
            source: Box::new(source),
        };
        let path = Path::parse(key).map_err(bad)?;
        tree::set(&mut tree, &path, Value::String(val.to_string()), true).map_err(bad)?;
        check_stage(&tree, "--set").map_err(bad)?;
    }
    Ok(tree)
}

/// Parse `doc` into the typed spec and run the validation table over it
fn check_stage(doc: &Value, stage: &str) -> Result<ControlPlaneSpec> {
    let spec = ControlPlaneSpec::from_value(doc).map_err(|e| match e {
        CoreError::InvalidSpec { message } => CoreError::InvalidSpec {
            message: format!("{}: {}", stage, message),
        },
        other => other,
    })?;
    validate_tree(doc).into_result()?;
    Ok(spec)
}

fn strip_nulls(v: &Value) -> Value {
    match v {
        Value::Object(m) => Value::Object(
            m.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(l) => Value::Array(l.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

fn canonical_scalars(v: &Value) -> Value {
    match v {
        Value::Object(m) => Value::Object(m.iter().map(|(k, v)| (k.clone(), canonical_scalars(v))).collect()),
        Value::Array(l) => Value::Array(l.iter().map(canonical_scalars).collect()),
        Value::String(s) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => s.parse::<i64>().map(Value::from).unwrap_or_else(|_| v.clone()),
        },
        other => other.clone(),
    }
}

fn empty() -> Value {
    Value::Object(serde_json::Map::new())
}
