//! Closed sets of feature groups and components
//!
//! Declaration order is render order: features render in [`FeatureName::ALL`]
//! order and components in [`ComponentName::ALL`] order, so a `BTreeMap` keyed by
//! either iterates deterministically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A logical feature group sharing one top-level `enabled` flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureName {
    Base,
    TrafficManagement,
    Policy,
    Telemetry,
    Security,
    ConfigManagement,
    AutoInjection,
    Gateways,
}

impl FeatureName {
    pub const ALL: [FeatureName; 8] = [
        FeatureName::Base,
        FeatureName::TrafficManagement,
        FeatureName::Policy,
        FeatureName::Telemetry,
        FeatureName::Security,
        FeatureName::ConfigManagement,
        FeatureName::AutoInjection,
        FeatureName::Gateways,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::Base => "Base",
            FeatureName::TrafficManagement => "TrafficManagement",
            FeatureName::Policy => "Policy",
            FeatureName::Telemetry => "Telemetry",
            FeatureName::Security => "Security",
            FeatureName::ConfigManagement => "ConfigManagement",
            FeatureName::AutoInjection => "AutoInjection",
            FeatureName::Gateways => "Gateways",
        }
    }

    /// Key of this feature in the spec document
    pub fn spec_key(&self) -> &'static str {
        match self {
            FeatureName::Base => "base",
            FeatureName::TrafficManagement => "trafficManagement",
            FeatureName::Policy => "policy",
            FeatureName::Telemetry => "telemetry",
            FeatureName::Security => "security",
            FeatureName::ConfigManagement => "configManagement",
            FeatureName::AutoInjection => "autoInjection",
            FeatureName::Gateways => "gateways",
        }
    }

    /// Components owned by this feature, in render order
    pub fn components(&self) -> &'static [ComponentName] {
        match self {
            FeatureName::Base => &[ComponentName::Base],
            FeatureName::TrafficManagement => &[ComponentName::Pilot],
            FeatureName::Policy => &[ComponentName::Policy],
            FeatureName::Telemetry => &[ComponentName::Telemetry],
            FeatureName::Security => &[
                ComponentName::Citadel,
                ComponentName::CertManager,
                ComponentName::NodeAgent,
            ],
            FeatureName::ConfigManagement => &[ComponentName::Galley],
            FeatureName::AutoInjection => &[ComponentName::SidecarInjector],
            FeatureName::Gateways => &[ComponentName::IngressGateway, ComponentName::EgressGateway],
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One installable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentName {
    Base,
    Pilot,
    Policy,
    Telemetry,
    Citadel,
    CertManager,
    NodeAgent,
    Galley,
    SidecarInjector,
    IngressGateway,
    EgressGateway,
}

impl ComponentName {
    pub const ALL: [ComponentName; 11] = [
        ComponentName::Base,
        ComponentName::Pilot,
        ComponentName::Policy,
        ComponentName::Telemetry,
        ComponentName::Citadel,
        ComponentName::CertManager,
        ComponentName::NodeAgent,
        ComponentName::Galley,
        ComponentName::SidecarInjector,
        ComponentName::IngressGateway,
        ComponentName::EgressGateway,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentName::Base => "Base",
            ComponentName::Pilot => "Pilot",
            ComponentName::Policy => "Policy",
            ComponentName::Telemetry => "Telemetry",
            ComponentName::Citadel => "Citadel",
            ComponentName::CertManager => "CertManager",
            ComponentName::NodeAgent => "NodeAgent",
            ComponentName::Galley => "Galley",
            ComponentName::SidecarInjector => "SidecarInjector",
            ComponentName::IngressGateway => "IngressGateway",
            ComponentName::EgressGateway => "EgressGateway",
        }
    }

    pub fn feature(&self) -> FeatureName {
        match self {
            ComponentName::Base => FeatureName::Base,
            ComponentName::Pilot => FeatureName::TrafficManagement,
            ComponentName::Policy => FeatureName::Policy,
            ComponentName::Telemetry => FeatureName::Telemetry,
            ComponentName::Citadel | ComponentName::CertManager | ComponentName::NodeAgent => {
                FeatureName::Security
            }
            ComponentName::Galley => FeatureName::ConfigManagement,
            ComponentName::SidecarInjector => FeatureName::AutoInjection,
            ComponentName::IngressGateway | ComponentName::EgressGateway => FeatureName::Gateways,
        }
    }

    /// Key of this component under `<feature>.components` in the spec document
    pub fn spec_key(&self) -> &'static str {
        match self {
            ComponentName::Base => "crds",
            ComponentName::Pilot => "pilot",
            ComponentName::Policy => "policy",
            ComponentName::Telemetry => "telemetry",
            ComponentName::Citadel => "citadel",
            ComponentName::CertManager => "certManager",
            ComponentName::NodeAgent => "nodeAgent",
            ComponentName::Galley => "galley",
            ComponentName::SidecarInjector => "injector",
            ComponentName::IngressGateway => "ingressGateway",
            ComponentName::EgressGateway => "egressGateway",
        }
    }

    /// Root key of this component's chart values. Gateway instances use
    /// `gateways.<instance name>`, see [`ComponentName::values_root_for`].
    pub fn values_root(&self) -> &'static str {
        match self {
            ComponentName::Base => "base",
            ComponentName::Pilot => "pilot",
            ComponentName::Policy => "mixer.policy",
            ComponentName::Telemetry => "mixer.telemetry",
            ComponentName::Citadel => "citadel",
            ComponentName::CertManager => "certmanager",
            ComponentName::NodeAgent => "nodeagent",
            ComponentName::Galley => "galley",
            ComponentName::SidecarInjector => "sidecarInjectorWebhook",
            ComponentName::IngressGateway => "gateways.istio-ingressgateway",
            ComponentName::EgressGateway => "gateways.istio-egressgateway",
        }
    }

    /// Values root for one instance. Only gateways are multi-instance.
    pub fn values_root_for(&self, instance: Option<&str>) -> String {
        match instance {
            Some(name) if self.is_gateway() => format!("gateways.{}", name),
            _ => self.values_root().to_string(),
        }
    }

    /// Chart directory relative to the install package path
    pub fn chart_dir(&self) -> &'static str {
        match self {
            ComponentName::Base => "crds",
            ComponentName::Pilot => "istio-control/istio-discovery",
            ComponentName::Policy => "istio-policy",
            ComponentName::Telemetry => "istio-telemetry",
            ComponentName::Citadel => "security/citadel",
            ComponentName::CertManager => "security/certmanager",
            ComponentName::NodeAgent => "security/nodeagent",
            ComponentName::Galley => "istio-control/istio-config",
            ComponentName::SidecarInjector => "istio-control/istio-autoinject",
            ComponentName::IngressGateway => "gateways/istio-ingress",
            ComponentName::EgressGateway => "gateways/istio-egress",
        }
    }

    /// Instance name used when a gateway entry gives none
    pub fn default_instance_name(&self) -> Option<&'static str> {
        match self {
            ComponentName::IngressGateway => Some("istio-ingressgateway"),
            ComponentName::EgressGateway => Some("istio-egressgateway"),
            _ => None,
        }
    }

    pub fn is_gateway(&self) -> bool {
        matches!(self, ComponentName::IngressGateway | ComponentName::EgressGateway)
    }

    /// Manifest text emitted for a disabled component
    pub fn disabled_manifest(&self) -> String {
        format!("# {} component is disabled.\n", self.as_str())
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentName::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s) || c.spec_key() == s)
            .copied()
            .ok_or_else(|| CoreError::InvalidSpec {
                message: format!("unknown component {:?}", s),
            })
    }
}
