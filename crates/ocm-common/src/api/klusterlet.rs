//! Klusterlet Custom Resource Definition
//!
//! The Klusterlet CRD declares the spoke-side agents: the namespace they run
//! in, the install mode, and the images. The hub endpoint the agents
//! bootstrap against is carried by the externally provided
//! `bootstrap-hub-kubeconfig` secret in the agent namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;
use crate::generations::{GenerationStatus, RelatedResourceMeta};

use super::types::KlusterletDeployOption;

/// Specification for a Klusterlet
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.open-cluster-management.io",
    version = "v1",
    kind = "Klusterlet",
    plural = "klusterlets",
    status = "KlusterletStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KlusterletSpec {
    /// Name this spoke registers under on the hub
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,

    /// Namespace the agent workloads run in; defaults to
    /// `open-cluster-management-agent` when empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Image pull spec for the registration agent
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registration_image_pull_spec: String,

    /// Image pull spec for the work agent
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub work_image_pull_spec: String,

    /// Endpoints on the spoke reachable from the hub, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_server_urls: Vec<String>,

    /// Deploy option for the agents
    #[serde(default)]
    pub deploy_option: KlusterletDeployOption,
}

impl KlusterletSpec {
    /// The namespace agent workloads run in
    pub fn agent_namespace(&self) -> &str {
        if self.namespace.is_empty() {
            crate::AGENT_NAMESPACE
        } else {
            &self.namespace
        }
    }
}

/// Status for a Klusterlet
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KlusterletStatus {
    /// The generation of the spec that was last fully reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions representing the agent state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Last reconciled generation of each managed child
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generations: Vec<GenerationStatus>,

    /// Every resource the operator currently owns for this spec
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_resources: Vec<RelatedResourceMeta>,
}
