//! Profile commands - list and dump

use std::path::Path as FsPath;

use console::style;

use meshop_core::version::operator_version;
use meshop_core::{ConfigMerger, MinorVersion, Path, profile, tree};
use meshop_engine::Translator;
use meshop_kube::{DefaultFetcher, load_versions_map};

use crate::error::{CliError, Result};

pub async fn list(versions_uri: &str) -> Result<()> {
    println!("Builtin profiles:");
    for name in profile::builtin_names() {
        println!("  {}", style(name).cyan());
    }

    let fetcher = DefaultFetcher::new()?;
    let map = load_versions_map(&fetcher, versions_uri).await?;
    let version = operator_version();
    let Some(mapping) = map.find(&version) else {
        return Err(CliError::config(format!(
            "This operator version ({}) was not found in the global versions map.",
            version
        )));
    };

    println!("\nOperator version is {}.\n", style(&version).yellow());
    println!("The following installation package versions are recommended for use with this version of the operator:");
    println!("  {}", mapping.recommended_istio_versions);
    println!("\nThe following installation package versions are supported by this version of the operator:");
    println!("  {}", mapping.supported_istio_versions);
    Ok(())
}

/// Print the merged spec, or the chart values it translates to, optionally
/// narrowed to one subtree
pub fn dump(
    profile: Option<&str>,
    filename: Option<&FsPath>,
    set: &[String],
    config_path: Option<&str>,
    helm_values: bool,
) -> Result<()> {
    let mut set_values: Vec<String> = profile.map(|p| format!("profile={}", p)).into_iter().collect();
    set_values.extend(set.iter().cloned());

    let merged = ConfigMerger::new().generate(filename, &set_values)?;
    let doc = if helm_values {
        Translator::for_version(MinorVersion::from(&operator_version()))?
            .translate(&merged.spec)?
            .tree
    } else {
        merged.tree
    };

    let doc = match config_path.filter(|p| !p.is_empty()) {
        Some(p) => tree::get(&doc, &Path::parse(p)?)?
            .cloned()
            .ok_or_else(|| CliError::config(format!("path {} not found in the configuration", p)))?,
        None => doc,
    };

    let yaml = serde_yaml::to_string(&doc).map_err(|e| CliError::config(e.to_string()))?;
    print!("{}", yaml);
    Ok(())
}
