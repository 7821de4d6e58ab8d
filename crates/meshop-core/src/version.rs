//! Versions, tags and the upgrade compatibility map

use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Version of this build
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compatibility map shipped with the binary
pub const BUILTIN_VERSIONS_MAP: &str = include_str!("../versions.yaml");

/// The running operator version
pub fn operator_version() -> Version {
    Version::parse(OPERATOR_VERSION).unwrap_or_else(|_| Version::new(0, 0, 0))
}

/// A `major.minor` product version; translator tables are keyed by it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinorVersion {
    pub major: u64,
    pub minor: u64,
}

impl MinorVersion {
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }
}

impl From<&Version> for MinorVersion {
    fn from(v: &Version) -> Self {
        Self::new(v.major, v.minor)
    }
}

impl FromStr for MinorVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || CoreError::UnsupportedVersion {
            version: s.to_string(),
        };
        let mut parts = s.trim_start_matches('v').split('.');
        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let minor = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        Ok(Self::new(major, minor))
    }
}

impl fmt::Display for MinorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Convert an image tag to a version: `1.3.0`, `v1.3.0`, `1.3` and
/// `1.3.0-beta.1` are accepted, build suffixes such as `-distroless` are dropped.
pub fn tag_to_version(tag: &str) -> Result<Version> {
    let invalid = |message: &str| CoreError::InvalidTag {
        tag: tag.to_string(),
        message: message.to_string(),
    };

    let trimmed = tag.trim().trim_start_matches('v');
    if trimmed.is_empty() {
        return Err(invalid("empty tag"));
    }

    if let Ok(v) = Version::parse(trimmed) {
        return Ok(strip_variant(v));
    }

    let (core, pre) = match trimmed.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (trimmed, None),
    };
    let numbers: Vec<&str> = core.split('.').collect();
    if numbers.is_empty() || numbers.len() > 3 || numbers.iter().any(|n| n.parse::<u64>().is_err()) {
        return Err(invalid("expected a version like 1.3.0"));
    }
    let mut padded = numbers.join(".");
    for _ in numbers.len()..3 {
        padded.push_str(".0");
    }
    if let Some(pre) = pre {
        padded.push('-');
        padded.push_str(pre);
    }
    Version::parse(&padded)
        .map(strip_variant)
        .map_err(|e| invalid(&e.to_string()))
}

/// Image variants (`-distroless`, `-debug`) are not prereleases
fn strip_variant(mut v: Version) -> Version {
    if matches!(v.pre.as_str(), "distroless" | "debug") {
        v.pre = semver::Prerelease::EMPTY;
    }
    v
}

/// Which installed versions an operator version can upgrade from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityMapping {
    pub operator_version: Version,
    pub supported_istio_versions: VersionReq,
    pub recommended_istio_versions: VersionReq,
}

/// The parsed compatibility map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionsMap(pub Vec<CompatibilityMapping>);

impl VersionsMap {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_VERSIONS_MAP)
    }

    pub fn find(&self, operator_version: &Version) -> Option<&CompatibilityMapping> {
        self.0.iter().find(|m| &m.operator_version == operator_version)
    }

    /// Whether an installed `current` version can be upgraded to `target`.
    ///
    /// Same version and downgrades are never allowed. Otherwise `target` must be
    /// listed and `current` must satisfy its supported range.
    pub fn check_upgrade(&self, current: &Version, target: &Version) -> Result<()> {
        let unsupported = || CoreError::UnsupportedUpgrade {
            current: current.to_string(),
            target: target.to_string(),
        };
        if current >= target {
            return Err(unsupported());
        }
        match self.find(target) {
            Some(m) if m.supported_istio_versions.matches(current) => Ok(()),
            _ => Err(unsupported()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_tag_to_version() {
        assert_eq!(tag_to_version("1.3.0").unwrap(), v("1.3.0"));
        assert_eq!(tag_to_version("v1.3.2").unwrap(), v("1.3.2"));
        assert_eq!(tag_to_version("1.3").unwrap(), v("1.3.0"));
        assert_eq!(tag_to_version("1.3.0-beta.1").unwrap(), v("1.3.0-beta.1"));
        assert_eq!(tag_to_version("1.3.0-distroless").unwrap(), v("1.3.0"));
        assert!(tag_to_version("latest").is_err());
        assert!(tag_to_version("").is_err());
    }

    #[test]
    fn test_minor_version() {
        let mv: MinorVersion = "1.3".parse().unwrap();
        assert_eq!(mv, MinorVersion::new(1, 3));
        assert_eq!(MinorVersion::from(&v("1.3.2")), mv);
        assert_eq!(mv.to_string(), "1.3");
        assert!("one".parse::<MinorVersion>().is_err());
    }

    #[test]
    fn test_builtin_map_parses() {
        let map = VersionsMap::builtin().unwrap();
        let m = map.find(&v("1.3.0")).unwrap();
        assert!(m.supported_istio_versions.matches(&v("1.2.5")));
        assert!(map.find(&operator_version()).is_some());
    }

    #[test]
    fn test_upgrade_edges() {
        let map = VersionsMap::builtin().unwrap();
        assert!(map.check_upgrade(&v("1.3.0"), &v("1.3.2")).is_ok());

        let err = map.check_upgrade(&v("1.2.0"), &v("1.3.2")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "upgrade is currently not supported: 1.2.0 -> 1.3.2"
        );

        // same version and downgrade
        assert!(map.check_upgrade(&v("1.3.2"), &v("1.3.2")).is_err());
        assert!(map.check_upgrade(&v("1.3.2"), &v("1.3.0")).is_err());
        // target not listed
        assert!(map.check_upgrade(&v("1.3.0"), &v("1.9.0")).is_err());
    }
}
