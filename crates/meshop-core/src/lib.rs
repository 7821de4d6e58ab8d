//! meshop Core - configuration model for the control plane installer
//!
//! This crate provides the foundational types used throughout meshop:
//! - `Path` / `tree`: path-addressed access to untyped documents
//! - `merge`: structural overlay with list items joined by key
//! - `ConfigMerger`: profile + defaults + overlay + `--set` layering with validation
//! - `ControlPlaneSpec`: the typed spec, with closed feature/component names
//! - `K8sObject`: objects inside rendered manifests
//! - `VersionsMap`: upgrade compatibility

pub mod compare;
pub mod config;
pub mod error;
pub mod merge;
pub mod names;
pub mod object;
pub mod path;
pub mod profile;
pub mod spec;
pub mod tree;
pub mod validation;
pub mod values;
pub mod version;

pub use config::{ConfigMerger, MergedSpec, make_tree_from_set_list, merge_layers};
pub use error::{CoreError, Result, ValidationError, ValidationErrors};
pub use names::{ComponentName, FeatureName};
pub use object::{Gvk, K8sObject, parse_manifest};
pub use path::{Path, PathElement};
pub use spec::{ComponentInstance, ComponentSpec, ControlPlaneSpec, K8sObjectOverlay, OverlayPatch};
pub use values::{Values, parse_set_values};
pub use version::{CompatibilityMapping, MinorVersion, VersionsMap, tag_to_version};
