//! ClusterManager Custom Resource Definition
//!
//! The ClusterManager CRD declares the hub-side control plane: which images
//! to run, where to schedule them, and which subsystem features are enabled.
//! The operator expands it into the full set of hub child resources.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;
use crate::generations::{GenerationStatus, RelatedResourceMeta};

use super::types::{
    AddOnManagerConfiguration, ClusterManagerInstallMode, NodePlacement,
    RegistrationConfiguration, WorkConfiguration,
};

/// Specification for a ClusterManager
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.open-cluster-management.io",
    version = "v1",
    kind = "ClusterManager",
    plural = "clustermanagers",
    shortname = "cm",
    status = "ClusterManagerStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManagerSpec {
    /// Image pull spec for the registration controller and webhook
    pub registration_image_pull_spec: String,

    /// Image pull spec for the work controller and webhook
    pub work_image_pull_spec: String,

    /// Image pull spec for the placement controller
    pub placement_image_pull_spec: String,

    /// Image pull spec for the addon-manager controller
    pub add_on_manager_image_pull_spec: String,

    /// Scheduling constraints for every hub deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_placement: Option<NodePlacement>,

    /// Registration subsystem configuration (auto-approve users, gates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_configuration: Option<RegistrationConfiguration>,

    /// Work subsystem configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_configuration: Option<WorkConfiguration>,

    /// Addon-manager subsystem configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_on_manager_configuration: Option<AddOnManagerConfiguration>,

    /// Deploy option for the hub components
    #[serde(default)]
    pub deploy_option: ClusterManagerDeployOption,
}

/// Deploy option wrapper for the ClusterManager
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManagerDeployOption {
    /// Install mode of the hub components
    #[serde(default)]
    pub mode: ClusterManagerInstallMode,
}

impl ClusterManagerSpec {
    /// Validate the spec before expanding it into child resources
    pub fn validate(&self, name: &str) -> Result<(), crate::Error> {
        for (field, value) in [
            ("registrationImagePullSpec", &self.registration_image_pull_spec),
            ("workImagePullSpec", &self.work_image_pull_spec),
            ("placementImagePullSpec", &self.placement_image_pull_spec),
            ("addOnManagerImagePullSpec", &self.add_on_manager_image_pull_spec),
        ] {
            if value.is_empty() {
                return Err(crate::Error::validation(
                    name,
                    format!("{} cannot be empty", field),
                ));
            }
        }
        Ok(())
    }
}

/// Status for a ClusterManager
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManagerStatus {
    /// The generation of the spec that was last fully reconciled.
    ///
    /// Consumers compare this to `metadata.generation` to determine whether
    /// the operator has converged on the most recent spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions representing the hub control-plane state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Last reconciled generation of each managed child
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generations: Vec<GenerationStatus>,

    /// Every resource the operator currently owns for this spec
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_resources: Vec<RelatedResourceMeta>,
}
