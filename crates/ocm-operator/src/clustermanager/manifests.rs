//! Desired child resources for a ClusterManager
//!
//! [`desired_resources`] is a pure function of the spec and the resolved
//! feature gates: given identical inputs it produces the identical set, and
//! disabling a subsystem shrinks the set deterministically. The inventory
//! cardinality is part of the public contract (46 fully enabled, 42 without
//! ManifestWorkReplicaSet, 41 without AddonManagement).

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, ServiceReference, ValidatingWebhook,
    ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, Namespace, PodSpec, PodTemplateSpec, Service, ServiceAccount, ServicePort,
    ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion, CustomResourceValidation, JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use ocm_common::api::ClusterManagerSpec;
use ocm_common::apply::{owner_labels, ManagedResource};
use ocm_common::features::ResolvedFeatureGates;
use ocm_common::HUB_NAMESPACE;

/// Name of the registration controller deployment for a given ClusterManager
pub fn registration_deployment_name(cm_name: &str) -> String {
    format!("{}-registration-controller", cm_name)
}

/// Name of the registration webhook deployment
pub fn registration_webhook_name(cm_name: &str) -> String {
    format!("{}-registration-webhook", cm_name)
}

/// Name of the work webhook deployment
pub fn work_webhook_name(cm_name: &str) -> String {
    format!("{}-work-webhook", cm_name)
}

/// Name of the work controller deployment
pub fn work_controller_name(cm_name: &str) -> String {
    format!("{}-work-controller", cm_name)
}

/// Name of the addon-manager controller deployment
pub fn addon_manager_deployment_name(cm_name: &str) -> String {
    format!("{}-addon-manager-controller", cm_name)
}

/// Name of the placement controller deployment
pub fn placement_deployment_name(cm_name: &str) -> String {
    format!("{}-placement-controller", cm_name)
}

/// Name of the validating webhook configuration for cluster admission
pub const REGISTRATION_VALIDATING_WEBHOOK: &str =
    "managedclustervalidators.admission.cluster.open-cluster-management.io";

/// Name of the mutating webhook configuration for cluster admission
pub const REGISTRATION_MUTATING_WEBHOOK: &str =
    "managedclustermutators.admission.cluster.open-cluster-management.io";

/// Name of the validating webhook configuration for work admission
pub const WORK_VALIDATING_WEBHOOK: &str =
    "manifestworkvalidators.admission.work.open-cluster-management.io";

/// The full set of child resources for the given spec and gate state.
///
/// Order is stable; the set is a pure function of its inputs.
pub fn desired_resources(
    cm_name: &str,
    spec: &ClusterManagerSpec,
    gates: &ResolvedFeatureGates,
) -> Vec<ManagedResource> {
    let mut resources = vec![ManagedResource::Namespace(hub_namespace(cm_name))];

    resources.extend(hub_crds(cm_name));
    resources.extend(registration_controller(cm_name, spec, gates));
    resources.extend(registration_webhook(cm_name, spec));
    resources.extend(work_webhook(cm_name, spec, gates));
    if gates.manifest_work_replica_set_enabled() {
        resources.extend(work_controller(cm_name, spec, gates));
    }
    if gates.addon_management_enabled() {
        resources.extend(addon_manager(cm_name, spec));
    }
    resources.extend(placement_controller(cm_name, spec));

    resources
}

/// The desired set with every gated subsystem enabled.
///
/// Pruning deletes `full_universe - desired`, which is how disabling a gate
/// removes its children deterministically.
pub fn full_universe(cm_name: &str, spec: &ClusterManagerSpec) -> Vec<ManagedResource> {
    let all_enabled = ocm_common::features::resolve(&[], &[], &[]);
    desired_resources(cm_name, spec, &all_enabled)
}

fn hub_namespace(cm_name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(HUB_NAMESPACE.to_string()),
            labels: Some(owner_labels(cm_name)),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn hub_crds(cm_name: &str) -> Vec<ManagedResource> {
    [
        ("cluster.open-cluster-management.io", "ManagedCluster", "managedclusters"),
        ("cluster.open-cluster-management.io", "ManagedClusterSet", "managedclustersets"),
        (
            "cluster.open-cluster-management.io",
            "ManagedClusterSetBinding",
            "managedclustersetbindings",
        ),
        ("cluster.open-cluster-management.io", "Placement", "placements"),
        ("cluster.open-cluster-management.io", "PlacementDecision", "placementdecisions"),
        ("work.open-cluster-management.io", "ManifestWork", "manifestworks"),
        ("addon.open-cluster-management.io", "AddOnDeploymentConfig", "addondeploymentconfigs"),
    ]
    .into_iter()
    .map(|(group, kind, plural)| {
        ManagedResource::CustomResourceDefinition(hub_crd(cm_name, group, kind, plural))
    })
    .collect()
}

fn hub_crd(cm_name: &str, group: &str, kind: &str, plural: &str) -> CustomResourceDefinition {
    // Namespaced except for the cluster-scoped cluster.* kinds.
    let scope = match plural {
        "managedclusters" | "managedclustersets" => "Cluster",
        _ => "Namespaced",
    };
    CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(format!("{}.{}", plural, group)),
            labels: Some(owner_labels(cm_name)),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: group.to_string(),
            names: CustomResourceDefinitionNames {
                kind: kind.to_string(),
                plural: plural.to_string(),
                singular: Some(kind.to_lowercase()),
                list_kind: Some(format!("{}List", kind)),
                ..Default::default()
            },
            scope: scope.to_string(),
            versions: vec![CustomResourceDefinitionVersion {
                name: "v1".to_string(),
                served: true,
                storage: true,
                schema: Some(CustomResourceValidation {
                    open_api_v3_schema: Some(JSONSchemaProps {
                        type_: Some("object".to_string()),
                        x_kubernetes_preserve_unknown_fields: Some(true),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }],
            ..Default::default()
        },
        ..Default::default()
    }
}

fn registration_controller(
    cm_name: &str,
    spec: &ClusterManagerSpec,
    gates: &ResolvedFeatureGates,
) -> Vec<ManagedResource> {
    let sa = "registration-controller-sa";
    let rbac_name = format!("open-cluster-management:{}-registration:controller", cm_name);

    let mut args = vec!["/registration".to_string(), "controller".to_string()];
    args.extend(gates.registration_args());
    if let Some(registration) = &spec.registration_configuration {
        if !registration.auto_approve_users.is_empty() {
            args.push(format!(
                "--cluster-auto-approval-users={}",
                registration.auto_approve_users.join(",")
            ));
        }
    }

    vec![
        ManagedResource::ServiceAccount(service_account(cm_name, sa)),
        ManagedResource::ClusterRole(cluster_role(cm_name, &rbac_name, controller_policy_rules())),
        ManagedResource::ClusterRoleBinding(cluster_role_binding(cm_name, &rbac_name, sa)),
        ManagedResource::Role(role(cm_name, &rbac_name)),
        ManagedResource::RoleBinding(role_binding(cm_name, &rbac_name, sa)),
        ManagedResource::Deployment(deployment(
            cm_name,
            &registration_deployment_name(cm_name),
            &spec.registration_image_pull_spec,
            args,
            sa,
            spec,
        )),
    ]
}

fn registration_webhook(cm_name: &str, spec: &ClusterManagerSpec) -> Vec<ManagedResource> {
    let sa = "registration-webhook-sa";
    let rbac_name = format!("open-cluster-management:{}-registration:webhook", cm_name);
    let deployment_name = registration_webhook_name(cm_name);

    let args = vec!["/registration".to_string(), "webhook-server".to_string()];

    vec![
        ManagedResource::ServiceAccount(service_account(cm_name, sa)),
        ManagedResource::ClusterRole(cluster_role(cm_name, &rbac_name, webhook_policy_rules())),
        ManagedResource::ClusterRoleBinding(cluster_role_binding(cm_name, &rbac_name, sa)),
        ManagedResource::Role(role(cm_name, &rbac_name)),
        ManagedResource::RoleBinding(role_binding(cm_name, &rbac_name, sa)),
        ManagedResource::Deployment(deployment(
            cm_name,
            &deployment_name,
            &spec.registration_image_pull_spec,
            args,
            sa,
            spec,
        )),
        ManagedResource::Service(webhook_service(cm_name, &deployment_name)),
        ManagedResource::ValidatingWebhookConfiguration(validating_webhook(
            cm_name,
            REGISTRATION_VALIDATING_WEBHOOK,
            &deployment_name,
            "/validate-cluster",
        )),
        ManagedResource::MutatingWebhookConfiguration(mutating_webhook(
            cm_name,
            REGISTRATION_MUTATING_WEBHOOK,
            &deployment_name,
            "/mutate-cluster",
        )),
    ]
}

fn work_webhook(
    cm_name: &str,
    spec: &ClusterManagerSpec,
    gates: &ResolvedFeatureGates,
) -> Vec<ManagedResource> {
    let sa = "work-webhook-sa";
    let rbac_name = format!("open-cluster-management:{}-work:webhook", cm_name);
    let deployment_name = work_webhook_name(cm_name);

    let mut args = vec!["/work".to_string(), "webhook-server".to_string()];
    args.extend(gates.work_args());

    vec![
        ManagedResource::ServiceAccount(service_account(cm_name, sa)),
        ManagedResource::ClusterRole(cluster_role(cm_name, &rbac_name, webhook_policy_rules())),
        ManagedResource::ClusterRoleBinding(cluster_role_binding(cm_name, &rbac_name, sa)),
        ManagedResource::Role(role(cm_name, &rbac_name)),
        ManagedResource::RoleBinding(role_binding(cm_name, &rbac_name, sa)),
        ManagedResource::Deployment(deployment(
            cm_name,
            &deployment_name,
            &spec.work_image_pull_spec,
            args,
            sa,
            spec,
        )),
        ManagedResource::Service(webhook_service(cm_name, &deployment_name)),
        ManagedResource::ValidatingWebhookConfiguration(validating_webhook(
            cm_name,
            WORK_VALIDATING_WEBHOOK,
            &deployment_name,
            "/validate-work",
        )),
    ]
}

fn work_controller(
    cm_name: &str,
    spec: &ClusterManagerSpec,
    gates: &ResolvedFeatureGates,
) -> Vec<ManagedResource> {
    let sa = "work-controller-sa";
    let rbac_name = format!("open-cluster-management:{}-work:controller", cm_name);

    let mut args = vec!["/work".to_string(), "manager".to_string()];
    args.extend(gates.work_args());

    vec![
        ManagedResource::ServiceAccount(service_account(cm_name, sa)),
        ManagedResource::ClusterRole(cluster_role(cm_name, &rbac_name, controller_policy_rules())),
        ManagedResource::ClusterRoleBinding(cluster_role_binding(cm_name, &rbac_name, sa)),
        ManagedResource::Deployment(deployment(
            cm_name,
            &work_controller_name(cm_name),
            &spec.work_image_pull_spec,
            args,
            sa,
            spec,
        )),
    ]
}

fn addon_manager(cm_name: &str, spec: &ClusterManagerSpec) -> Vec<ManagedResource> {
    let sa = "addon-manager-controller-sa";
    let rbac_name = format!("open-cluster-management:{}-addon-manager:controller", cm_name);

    let args = vec!["/addon".to_string(), "controller".to_string()];

    vec![
        ManagedResource::ServiceAccount(service_account(cm_name, sa)),
        ManagedResource::ClusterRole(cluster_role(cm_name, &rbac_name, controller_policy_rules())),
        ManagedResource::ClusterRoleBinding(cluster_role_binding(cm_name, &rbac_name, sa)),
        ManagedResource::Role(role(cm_name, &rbac_name)),
        ManagedResource::Deployment(deployment(
            cm_name,
            &addon_manager_deployment_name(cm_name),
            &spec.add_on_manager_image_pull_spec,
            args,
            sa,
            spec,
        )),
    ]
}

fn placement_controller(cm_name: &str, spec: &ClusterManagerSpec) -> Vec<ManagedResource> {
    let sa = "placement-controller-sa";
    let rbac_name = format!("open-cluster-management:{}-placement:controller", cm_name);

    let args = vec!["/placement".to_string(), "controller".to_string()];

    vec![
        ManagedResource::ServiceAccount(service_account(cm_name, sa)),
        ManagedResource::ClusterRole(cluster_role(cm_name, &rbac_name, controller_policy_rules())),
        ManagedResource::ClusterRoleBinding(cluster_role_binding(cm_name, &rbac_name, sa)),
        ManagedResource::Role(role(cm_name, &rbac_name)),
        ManagedResource::RoleBinding(role_binding(cm_name, &rbac_name, sa)),
        ManagedResource::Deployment(deployment(
            cm_name,
            &placement_deployment_name(cm_name),
            &spec.placement_image_pull_spec,
            args,
            sa,
            spec,
        )),
    ]
}

fn service_account(cm_name: &str, name: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(HUB_NAMESPACE.to_string()),
            labels: Some(owner_labels(cm_name)),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn controller_policy_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec![
                "configmaps".to_string(),
                "secrets".to_string(),
                "events".to_string(),
            ]),
            verbs: vec!["get", "list", "watch", "create", "update", "patch", "delete"]
                .into_iter()
                .map(String::from)
                .collect(),
            ..Default::default()
        },
        PolicyRule {
            api_groups: Some(vec![
                "cluster.open-cluster-management.io".to_string(),
                "work.open-cluster-management.io".to_string(),
                "addon.open-cluster-management.io".to_string(),
            ]),
            resources: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        },
    ]
}

fn webhook_policy_rules() -> Vec<PolicyRule> {
    vec![PolicyRule {
        api_groups: Some(vec![
            "cluster.open-cluster-management.io".to_string(),
            "work.open-cluster-management.io".to_string(),
        ]),
        resources: Some(vec!["*".to_string()]),
        verbs: vec!["get", "list", "watch"].into_iter().map(String::from).collect(),
        ..Default::default()
    }]
}

fn cluster_role(cm_name: &str, name: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(owner_labels(cm_name)),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

fn cluster_role_binding(cm_name: &str, name: &str, sa: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(owner_labels(cm_name)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: sa.to_string(),
            namespace: Some(HUB_NAMESPACE.to_string()),
            ..Default::default()
        }]),
    }
}

fn role(cm_name: &str, name: &str) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(HUB_NAMESPACE.to_string()),
            labels: Some(owner_labels(cm_name)),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["configmaps".to_string(), "secrets".to_string()]),
            verbs: vec!["get", "list", "watch", "create", "update", "patch", "delete"]
                .into_iter()
                .map(String::from)
                .collect(),
            ..Default::default()
        }]),
    }
}

fn role_binding(cm_name: &str, name: &str, sa: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(HUB_NAMESPACE.to_string()),
            labels: Some(owner_labels(cm_name)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: sa.to_string(),
            namespace: Some(HUB_NAMESPACE.to_string()),
            ..Default::default()
        }]),
    }
}

fn deployment(
    cm_name: &str,
    name: &str,
    image: &str,
    args: Vec<String>,
    sa: &str,
    spec: &ClusterManagerSpec,
) -> Deployment {
    let mut pod_labels = owner_labels(cm_name);
    pod_labels.insert("app".to_string(), name.to_string());

    let (node_selector, tolerations) = match &spec.node_placement {
        Some(placement) => (
            (!placement.node_selector.is_empty()).then(|| placement.node_selector.clone()),
            (!placement.tolerations.is_empty()).then(|| placement.tolerations.clone()),
        ),
        None => (None, None),
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(HUB_NAMESPACE.to_string()),
            labels: Some(pod_labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(sa.to_string()),
                    node_selector,
                    tolerations,
                    containers: vec![Container {
                        name: name.to_string(),
                        image: Some(image.to_string()),
                        args: Some(args),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn webhook_service(cm_name: &str, deployment_name: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(deployment_name.to_string()),
            namespace: Some(HUB_NAMESPACE.to_string()),
            labels: Some(owner_labels(cm_name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                "app".to_string(),
                deployment_name.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                port: 443,
                target_port: Some(IntOrString::Int(9443)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn webhook_client_config(deployment_name: &str, path: &str) -> WebhookClientConfig {
    WebhookClientConfig {
        service: Some(ServiceReference {
            name: deployment_name.to_string(),
            namespace: HUB_NAMESPACE.to_string(),
            path: Some(path.to_string()),
            port: Some(443),
        }),
        ..Default::default()
    }
}

fn validating_webhook(
    cm_name: &str,
    name: &str,
    deployment_name: &str,
    path: &str,
) -> ValidatingWebhookConfiguration {
    ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(owner_labels(cm_name)),
            ..Default::default()
        },
        webhooks: Some(vec![ValidatingWebhook {
            name: name.to_string(),
            admission_review_versions: vec!["v1".to_string()],
            client_config: webhook_client_config(deployment_name, path),
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            ..Default::default()
        }]),
    }
}

fn mutating_webhook(
    cm_name: &str,
    name: &str,
    deployment_name: &str,
    path: &str,
) -> MutatingWebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(owner_labels(cm_name)),
            ..Default::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: name.to_string(),
            admission_review_versions: vec!["v1".to_string()],
            client_config: webhook_client_config(deployment_name, path),
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            ..Default::default()
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocm_common::api::{
        FeatureGate, FeatureGateMode, NodePlacement, RegistrationConfiguration, WorkConfiguration,
    };
    use ocm_common::features::resolve;

    fn spec() -> ClusterManagerSpec {
        ClusterManagerSpec {
            registration_image_pull_spec: "quay.io/open-cluster-management/registration:latest"
                .to_string(),
            work_image_pull_spec: "quay.io/open-cluster-management/work:latest".to_string(),
            placement_image_pull_spec: "quay.io/open-cluster-management/placement:latest"
                .to_string(),
            add_on_manager_image_pull_spec: "quay.io/open-cluster-management/addon-manager:latest"
                .to_string(),
            ..Default::default()
        }
    }

    fn gate(feature: &str, mode: FeatureGateMode) -> FeatureGate {
        FeatureGate {
            feature: feature.to_string(),
            mode,
        }
    }

    fn names(resources: &[ManagedResource]) -> Vec<String> {
        resources.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn fully_enabled_inventory_is_46() {
        let gates = resolve(&[], &[], &[]);
        let resources = desired_resources("cluster-manager", &spec(), &gates);
        assert_eq!(resources.len(), 46);
    }

    #[test]
    fn disabling_manifest_work_replica_set_yields_42() {
        let gates = resolve(
            &[],
            &[gate("ManifestWorkReplicaSet", FeatureGateMode::Disable)],
            &[],
        );
        let resources = desired_resources("cluster-manager", &spec(), &gates);
        assert_eq!(resources.len(), 42);
        let names = names(&resources);
        assert!(!names.contains(&"cluster-manager-work-controller".to_string()));
        assert!(!names.contains(
            &"open-cluster-management:cluster-manager-work:controller".to_string()
        ));
        assert!(!names.contains(&"work-controller-sa".to_string()));
    }

    #[test]
    fn disabling_addon_management_yields_41() {
        let gates = resolve(&[], &[], &[gate("AddonManagement", FeatureGateMode::Disable)]);
        let resources = desired_resources("cluster-manager", &spec(), &gates);
        assert_eq!(resources.len(), 41);
        let names = names(&resources);
        assert!(!names.contains(&"cluster-manager-addon-manager-controller".to_string()));
        assert!(!names.contains(&"addon-manager-controller-sa".to_string()));
    }

    #[test]
    fn expected_deployments_present() {
        let gates = resolve(&[], &[], &[]);
        let resources = desired_resources("cluster-manager", &spec(), &gates);
        let deployments: Vec<String> = resources
            .iter()
            .filter(|r| matches!(r, ManagedResource::Deployment(_)))
            .map(|r| r.name())
            .collect();
        assert_eq!(
            deployments,
            vec![
                "cluster-manager-registration-controller",
                "cluster-manager-registration-webhook",
                "cluster-manager-work-webhook",
                "cluster-manager-work-controller",
                "cluster-manager-addon-manager-controller",
                "cluster-manager-placement-controller",
            ]
        );
    }

    #[test]
    fn inventory_is_deterministic() {
        let gates = resolve(&[], &[], &[]);
        let a = desired_resources("cluster-manager", &spec(), &gates);
        let b = desired_resources("cluster-manager", &spec(), &gates);
        assert_eq!(
            a.iter().map(|r| r.related_meta()).collect::<Vec<_>>(),
            b.iter().map(|r| r.related_meta()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn auto_approve_users_render_as_single_arg() {
        let mut cm_spec = spec();
        cm_spec.registration_configuration = Some(RegistrationConfiguration {
            auto_approve_users: vec!["user1".to_string(), "user2".to_string()],
            ..Default::default()
        });
        let gates = resolve(&[], &[], &[]);
        let resources = desired_resources("cluster-manager", &cm_spec, &gates);

        let args = deployment_args(&resources, "cluster-manager-registration-controller");
        assert!(args.contains(&"--cluster-auto-approval-users=user1,user2".to_string()));
    }

    #[test]
    fn default_feature_gate_args_present() {
        let gates = resolve(&[], &[], &[]);
        let resources = desired_resources("cluster-manager", &spec(), &gates);

        let args = deployment_args(&resources, "cluster-manager-registration-controller");
        assert!(args.contains(&"--feature-gates=DefaultClusterSet=true".to_string()));

        let args = deployment_args(&resources, "cluster-manager-work-webhook");
        assert!(args.contains(&"--feature-gates=NilExecutorValidating=true".to_string()));
        assert!(args.contains(&"--feature-gates=ManifestWorkReplicaSet=true".to_string()));

        let args = deployment_args(&resources, "cluster-manager-work-controller");
        assert!(args.contains(&"manager".to_string()));
    }

    #[test]
    fn image_pull_spec_flows_into_containers() {
        let mut cm_spec = spec();
        cm_spec.registration_image_pull_spec = "testimage:latest".to_string();
        let gates = resolve(&[], &[], &[]);
        let resources = desired_resources("cluster-manager", &cm_spec, &gates);

        let deployment = find_deployment(&resources, "cluster-manager-registration-controller");
        let containers = &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].image.as_deref(), Some("testimage:latest"));
    }

    #[test]
    fn node_placement_propagates_to_pods() {
        let mut cm_spec = spec();
        cm_spec.node_placement = Some(NodePlacement {
            node_selector: BTreeMap::from([(
                "node-role.kubernetes.io/infra".to_string(),
                String::new(),
            )]),
            tolerations: vec![k8s_openapi::api::core::v1::Toleration {
                key: Some("node-role.kubernetes.io/infra".to_string()),
                operator: Some("Exists".to_string()),
                effect: Some("NoSchedule".to_string()),
                ..Default::default()
            }],
        });
        let gates = resolve(&[], &[], &[]);
        let resources = desired_resources("cluster-manager", &cm_spec, &gates);

        let deployment = find_deployment(&resources, "cluster-manager-registration-controller");
        let pod_spec = deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert!(pod_spec
            .node_selector
            .as_ref()
            .unwrap()
            .contains_key("node-role.kubernetes.io/infra"));
        assert_eq!(
            pod_spec.tolerations.as_ref().unwrap()[0].key.as_deref(),
            Some("node-role.kubernetes.io/infra")
        );
    }

    #[test]
    fn gate_toggle_round_trips_the_inventory() {
        let cm_spec = spec();
        let disabled = resolve(
            &[],
            &[gate("ManifestWorkReplicaSet", FeatureGateMode::Disable)],
            &[],
        );
        let enabled = resolve(
            &[],
            &[gate("ManifestWorkReplicaSet", FeatureGateMode::Enable)],
            &[],
        );
        assert_eq!(desired_resources("cluster-manager", &cm_spec, &disabled).len(), 42);
        assert_eq!(desired_resources("cluster-manager", &cm_spec, &enabled).len(), 46);
    }

    #[test]
    fn full_universe_matches_all_enabled() {
        let cm_spec = spec();
        assert_eq!(full_universe("cluster-manager", &cm_spec).len(), 46);
        let work_spec = WorkConfiguration {
            feature_gates: vec![gate("ManifestWorkReplicaSet", FeatureGateMode::Disable)],
        };
        // The universe ignores the spec's own gate state.
        let mut gated = cm_spec.clone();
        gated.work_configuration = Some(work_spec);
        assert_eq!(full_universe("cluster-manager", &gated).len(), 46);
    }

    fn find_deployment<'a>(resources: &'a [ManagedResource], name: &str) -> &'a Deployment {
        resources
            .iter()
            .find_map(|r| match r {
                ManagedResource::Deployment(d) if r.name() == name => Some(d),
                _ => None,
            })
            .unwrap_or_else(|| panic!("deployment {} not in desired set", name))
    }

    fn deployment_args(resources: &[ManagedResource], name: &str) -> Vec<String> {
        find_deployment(resources, name)
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
            .args
            .clone()
            .unwrap()
    }
}
