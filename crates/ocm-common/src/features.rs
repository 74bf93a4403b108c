//! Per-subsystem feature gates
//!
//! Each subsystem has a closed set of known gates plus an `Unknown` catch-all.
//! Unknown names are never silently ignored: they are collected so the
//! reconciler can flip `FeatureGatesValid=False` naming the offenders.

use crate::api::{FeatureGate, FeatureGateMode};

/// Feature gates recognized by the registration subsystem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistrationFeature {
    /// Place every managed cluster into a default cluster set
    DefaultClusterSet,
    /// Approve registrations from configured users without manual review
    ManagedClusterAutoApproval,
}

impl RegistrationFeature {
    const ALL: [RegistrationFeature; 2] = [
        RegistrationFeature::DefaultClusterSet,
        RegistrationFeature::ManagedClusterAutoApproval,
    ];

    /// Gates enabled when the spec does not mention them
    const DEFAULT_ENABLED: [RegistrationFeature; 1] = [RegistrationFeature::DefaultClusterSet];

    fn parse(name: &str) -> Option<Self> {
        match name {
            "DefaultClusterSet" => Some(Self::DefaultClusterSet),
            "ManagedClusterAutoApproval" => Some(Self::ManagedClusterAutoApproval),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::DefaultClusterSet => "DefaultClusterSet",
            Self::ManagedClusterAutoApproval => "ManagedClusterAutoApproval",
        }
    }
}

/// Feature gates recognized by the work subsystem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkFeature {
    /// Replicated manifest work across placements
    ManifestWorkReplicaSet,
    /// Validate manifest works carrying no executor
    NilExecutorValidating,
}

impl WorkFeature {
    const ALL: [WorkFeature; 2] = [
        WorkFeature::ManifestWorkReplicaSet,
        WorkFeature::NilExecutorValidating,
    ];

    const DEFAULT_ENABLED: [WorkFeature; 2] = [
        WorkFeature::ManifestWorkReplicaSet,
        WorkFeature::NilExecutorValidating,
    ];

    fn parse(name: &str) -> Option<Self> {
        match name {
            "ManifestWorkReplicaSet" => Some(Self::ManifestWorkReplicaSet),
            "NilExecutorValidating" => Some(Self::NilExecutorValidating),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ManifestWorkReplicaSet => "ManifestWorkReplicaSet",
            Self::NilExecutorValidating => "NilExecutorValidating",
        }
    }
}

/// Feature gates recognized by the addon-manager subsystem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddOnManagerFeature {
    /// Lifecycle management of addons from the hub
    AddonManagement,
}

impl AddOnManagerFeature {
    const ALL: [AddOnManagerFeature; 1] = [AddOnManagerFeature::AddonManagement];

    const DEFAULT_ENABLED: [AddOnManagerFeature; 1] = [AddOnManagerFeature::AddonManagement];

    fn parse(name: &str) -> Option<Self> {
        match name {
            "AddonManagement" => Some(Self::AddonManagement),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::AddonManagement => "AddonManagement",
        }
    }
}

/// The resolved gate state for every subsystem, plus any unknown names
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedFeatureGates {
    /// Enabled registration gates
    pub registration: Vec<&'static str>,
    /// Enabled work gates
    pub work: Vec<&'static str>,
    /// Enabled addon-manager gates
    pub addon_manager: Vec<&'static str>,
    /// Gate names no subsystem recognizes, verbatim from the spec
    pub unknown: Vec<String>,
}

impl ResolvedFeatureGates {
    /// Whether the work subsystem runs the ManifestWorkReplicaSet controller
    pub fn manifest_work_replica_set_enabled(&self) -> bool {
        self.work.contains(&"ManifestWorkReplicaSet")
    }

    /// Whether the addon-manager subsystem is deployed at all
    pub fn addon_management_enabled(&self) -> bool {
        self.addon_manager.contains(&"AddonManagement")
    }

    /// Render `--feature-gates=Name=bool` args for the registration container
    pub fn registration_args(&self) -> Vec<String> {
        gate_args(&RegistrationFeature::ALL.map(|f| f.name()), &self.registration)
    }

    /// Render `--feature-gates=Name=bool` args for the work containers
    pub fn work_args(&self) -> Vec<String> {
        gate_args(&WorkFeature::ALL.map(|f| f.name()), &self.work)
    }
}

fn gate_args(all: &[&'static str], enabled: &[&'static str]) -> Vec<String> {
    all.iter()
        .map(|name| format!("--feature-gates={}={}", name, enabled.contains(name)))
        .collect()
}

fn resolve_subsystem<F: Copy + PartialEq>(
    gates: &[FeatureGate],
    parse: impl Fn(&str) -> Option<F>,
    defaults: &[F],
    name: impl Fn(&F) -> &'static str,
    unknown: &mut Vec<String>,
) -> Vec<&'static str> {
    let mut enabled: Vec<F> = defaults.to_vec();
    for gate in gates {
        match parse(&gate.feature) {
            Some(feature) => match gate.mode {
                FeatureGateMode::Enable => {
                    if !enabled.contains(&feature) {
                        enabled.push(feature);
                    }
                }
                FeatureGateMode::Disable => enabled.retain(|f| *f != feature),
            },
            None => unknown.push(gate.feature.clone()),
        }
    }
    enabled.iter().map(|f| name(f)).collect()
}

/// Resolve the three subsystem gate lists into enabled sets.
///
/// Gates not mentioned keep their defaults; unknown names are collected in
/// `unknown` in the order they appear.
pub fn resolve(
    registration: &[FeatureGate],
    work: &[FeatureGate],
    addon_manager: &[FeatureGate],
) -> ResolvedFeatureGates {
    let mut unknown = Vec::new();
    let registration = resolve_subsystem(
        registration,
        RegistrationFeature::parse,
        &RegistrationFeature::DEFAULT_ENABLED,
        RegistrationFeature::name,
        &mut unknown,
    );
    let work = resolve_subsystem(
        work,
        WorkFeature::parse,
        &WorkFeature::DEFAULT_ENABLED,
        WorkFeature::name,
        &mut unknown,
    );
    let addon_manager = resolve_subsystem(
        addon_manager,
        AddOnManagerFeature::parse,
        &AddOnManagerFeature::DEFAULT_ENABLED,
        AddOnManagerFeature::name,
        &mut unknown,
    );
    ResolvedFeatureGates {
        registration,
        work,
        addon_manager,
        unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FeatureGateMode;

    fn gate(feature: &str, mode: FeatureGateMode) -> FeatureGate {
        FeatureGate {
            feature: feature.to_string(),
            mode,
        }
    }

    #[test]
    fn defaults_when_spec_is_silent() {
        let resolved = resolve(&[], &[], &[]);
        assert!(resolved.registration.contains(&"DefaultClusterSet"));
        assert!(resolved.manifest_work_replica_set_enabled());
        assert!(resolved.addon_management_enabled());
        assert!(resolved.unknown.is_empty());
    }

    #[test]
    fn default_args_match_public_contract() {
        let resolved = resolve(&[], &[], &[]);
        assert!(resolved
            .registration_args()
            .contains(&"--feature-gates=DefaultClusterSet=true".to_string()));
        assert!(resolved
            .work_args()
            .contains(&"--feature-gates=NilExecutorValidating=true".to_string()));
        assert!(resolved
            .work_args()
            .contains(&"--feature-gates=ManifestWorkReplicaSet=true".to_string()));
    }

    #[test]
    fn disabling_manifest_work_replica_set() {
        let resolved = resolve(
            &[],
            &[gate("ManifestWorkReplicaSet", FeatureGateMode::Disable)],
            &[],
        );
        assert!(!resolved.manifest_work_replica_set_enabled());
        assert!(resolved
            .work_args()
            .contains(&"--feature-gates=ManifestWorkReplicaSet=false".to_string()));
    }

    #[test]
    fn disabling_addon_management() {
        let resolved = resolve(&[], &[], &[gate("AddonManagement", FeatureGateMode::Disable)]);
        assert!(!resolved.addon_management_enabled());
    }

    #[test]
    fn re_enabling_restores_defaults() {
        let resolved = resolve(
            &[],
            &[gate("ManifestWorkReplicaSet", FeatureGateMode::Enable)],
            &[],
        );
        assert!(resolved.manifest_work_replica_set_enabled());
    }

    /// Story: a typo in a gate name is loud, never silently dropped
    #[test]
    fn story_unknown_gates_are_collected_not_ignored() {
        let resolved = resolve(
            &[gate("DefaultClustrSet", FeatureGateMode::Enable)],
            &[gate("ManifestWorkReplicaSet", FeatureGateMode::Disable)],
            &[gate("AddonManagment", FeatureGateMode::Enable)],
        );
        assert_eq!(
            resolved.unknown,
            vec!["DefaultClustrSet".to_string(), "AddonManagment".to_string()]
        );
        // The recognized gate still took effect.
        assert!(!resolved.manifest_work_replica_set_enabled());
    }

    #[test]
    fn enabling_twice_does_not_duplicate() {
        let resolved = resolve(
            &[
                gate("DefaultClusterSet", FeatureGateMode::Enable),
                gate("DefaultClusterSet", FeatureGateMode::Enable),
            ],
            &[],
            &[],
        );
        assert_eq!(
            resolved
                .registration
                .iter()
                .filter(|n| **n == "DefaultClusterSet")
                .count(),
            1
        );
    }
}
