//! Custom Resource Definitions consumed by the operators
//!
//! - [`ClusterManager`] - the hub's desired-state document
//! - [`Klusterlet`] - a spoke's desired-state document

mod cluster_manager;
mod klusterlet;
mod types;

pub use cluster_manager::{
    ClusterManager, ClusterManagerDeployOption, ClusterManagerSpec, ClusterManagerStatus,
};
pub use klusterlet::{Klusterlet, KlusterletSpec, KlusterletStatus};
pub use types::{
    AddOnManagerConfiguration, ClusterManagerInstallMode, FeatureGate, FeatureGateMode,
    KlusterletDeployOption, KlusterletInstallMode, NodePlacement, RegistrationConfiguration,
    WorkConfiguration,
};
