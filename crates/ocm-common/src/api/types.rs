//! Shared spec fragments for the ClusterManager and Klusterlet CRDs

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Install mode for the hub components
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterManagerInstallMode {
    /// Hub components run on the hub cluster itself
    #[default]
    Default,
    /// Hub components run on a separate hosting cluster
    Hosted,
}

/// Install mode for the spoke agents
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum KlusterletInstallMode {
    /// Registration and work agents run as separate deployments
    #[default]
    Default,
    /// A single combined agent deployment
    Singleton,
    /// Agents run on a separate hosting cluster
    Hosted,
}

/// Deploy option wrapper for the Klusterlet
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KlusterletDeployOption {
    /// Install mode of the agents
    #[serde(default)]
    pub mode: KlusterletInstallMode,
}

/// Scheduling constraints propagated into every managed deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    /// Node selector applied to managed pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations applied to managed pods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

/// Whether a feature gate is switched on or off
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FeatureGateMode {
    /// The feature is enabled
    #[default]
    Enable,
    /// The feature is disabled
    Disable,
}

/// One feature gate record on a spec
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGate {
    /// Name of the gate, e.g. "ManifestWorkReplicaSet"
    pub feature: String,

    /// Enable or Disable
    #[serde(default)]
    pub mode: FeatureGateMode,
}

/// Registration subsystem configuration on the ClusterManager
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationConfiguration {
    /// Users whose certificate signing requests are approved automatically
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_approve_users: Vec<String>,

    /// Feature gates for the registration subsystem
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_gates: Vec<FeatureGate>,
}

/// Work subsystem configuration on the ClusterManager
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkConfiguration {
    /// Feature gates for the work subsystem
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_gates: Vec<FeatureGate>,
}

/// Addon-manager subsystem configuration on the ClusterManager
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddOnManagerConfiguration {
    /// Feature gates for the addon-manager subsystem
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_gates: Vec<FeatureGate>,
}
