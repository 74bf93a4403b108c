//! Desired child resources for a Klusterlet
//!
//! The spoke runs either split registration/work agents (Default and Hosted
//! modes) or one combined agent (Singleton mode). The agent deployments mount
//! the bootstrap credential secret; the durable hub identity secret is minted
//! by the registration agent itself and is never a child of the operator.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, Namespace, PodSpec, PodTemplateSpec, SecretVolumeSource, ServiceAccount, Volume,
    VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use ocm_common::api::{KlusterletInstallMode, KlusterletSpec};
use ocm_common::apply::{owner_labels, ManagedResource};
use ocm_common::{BOOTSTRAP_HUB_KUBECONFIG, HUB_KUBECONFIG_SECRET};

/// Name of the split-mode registration agent deployment
pub fn registration_agent_name(klusterlet_name: &str) -> String {
    format!("{}-registration-agent", klusterlet_name)
}

/// Name of the split-mode work agent deployment
pub fn work_agent_name(klusterlet_name: &str) -> String {
    format!("{}-work-agent", klusterlet_name)
}

/// Name of the combined Singleton-mode agent deployment
pub fn singleton_agent_name(klusterlet_name: &str) -> String {
    format!("{}-agent", klusterlet_name)
}

/// The deployment the registration state machine lives in.
///
/// This is the deployment the rebootstrap controller scales down before
/// discarding the hub identity secret.
pub fn agent_deployment_name(klusterlet_name: &str, mode: KlusterletInstallMode) -> String {
    match mode {
        KlusterletInstallMode::Singleton => singleton_agent_name(klusterlet_name),
        _ => registration_agent_name(klusterlet_name),
    }
}

/// Every child any install mode of this spec could own.
///
/// Pruning deletes `full_universe - desired`, so flipping the install mode
/// removes the other mode's leftovers deterministically.
pub fn full_universe(klusterlet_name: &str, spec: &KlusterletSpec) -> Vec<ManagedResource> {
    let mut universe = Vec::new();
    let mut seen = Vec::new();
    for mode in [
        KlusterletInstallMode::Default,
        KlusterletInstallMode::Singleton,
    ] {
        let mut mode_spec = spec.clone();
        mode_spec.deploy_option.mode = mode;
        for resource in desired_resources(klusterlet_name, &mode_spec) {
            let meta = resource.related_meta();
            if !seen.contains(&meta) {
                seen.push(meta);
                universe.push(resource);
            }
        }
    }
    universe
}

/// The full set of child resources for the given Klusterlet spec
pub fn desired_resources(klusterlet_name: &str, spec: &KlusterletSpec) -> Vec<ManagedResource> {
    let namespace = spec.agent_namespace();
    let registration_rbac = format!("open-cluster-management:{}-registration:agent", klusterlet_name);
    let work_rbac = format!("open-cluster-management:{}-work:agent", klusterlet_name);

    let mut resources = vec![ManagedResource::Namespace(agent_namespace(
        klusterlet_name,
        namespace,
    ))];

    match spec.deploy_option.mode {
        KlusterletInstallMode::Singleton => {
            let sa = format!("{}-agent-sa", klusterlet_name);
            resources.push(ManagedResource::ServiceAccount(service_account(
                klusterlet_name,
                namespace,
                &sa,
            )));
            resources.push(ManagedResource::ClusterRole(cluster_role(
                klusterlet_name,
                &registration_rbac,
            )));
            resources.push(ManagedResource::ClusterRole(cluster_role(
                klusterlet_name,
                &work_rbac,
            )));
            resources.push(ManagedResource::ClusterRoleBinding(cluster_role_binding(
                klusterlet_name,
                &registration_rbac,
                namespace,
                &sa,
            )));
            resources.push(ManagedResource::ClusterRoleBinding(cluster_role_binding(
                klusterlet_name,
                &work_rbac,
                namespace,
                &sa,
            )));
            resources.push(ManagedResource::Deployment(agent_deployment(
                klusterlet_name,
                namespace,
                &singleton_agent_name(klusterlet_name),
                &spec.registration_image_pull_spec,
                singleton_args(spec),
                &sa,
            )));
        }
        _ => {
            let registration_sa = format!("{}-registration-sa", klusterlet_name);
            let work_sa = format!("{}-work-sa", klusterlet_name);
            resources.push(ManagedResource::ServiceAccount(service_account(
                klusterlet_name,
                namespace,
                &registration_sa,
            )));
            resources.push(ManagedResource::ServiceAccount(service_account(
                klusterlet_name,
                namespace,
                &work_sa,
            )));
            resources.push(ManagedResource::ClusterRole(cluster_role(
                klusterlet_name,
                &registration_rbac,
            )));
            resources.push(ManagedResource::ClusterRole(cluster_role(
                klusterlet_name,
                &work_rbac,
            )));
            resources.push(ManagedResource::ClusterRoleBinding(cluster_role_binding(
                klusterlet_name,
                &registration_rbac,
                namespace,
                &registration_sa,
            )));
            resources.push(ManagedResource::ClusterRoleBinding(cluster_role_binding(
                klusterlet_name,
                &work_rbac,
                namespace,
                &work_sa,
            )));
            resources.push(ManagedResource::Deployment(agent_deployment(
                klusterlet_name,
                namespace,
                &registration_agent_name(klusterlet_name),
                &spec.registration_image_pull_spec,
                registration_args(spec),
                &registration_sa,
            )));
            resources.push(ManagedResource::Deployment(agent_deployment(
                klusterlet_name,
                namespace,
                &work_agent_name(klusterlet_name),
                &spec.work_image_pull_spec,
                work_args(),
                &work_sa,
            )));
        }
    }

    resources
}

fn registration_args(spec: &KlusterletSpec) -> Vec<String> {
    let mut args = vec![
        "/registration".to_string(),
        "agent".to_string(),
        format!("--cluster-name={}", spec.cluster_name),
        "--bootstrap-kubeconfig=/spoke/bootstrap/kubeconfig".to_string(),
        format!("--hub-kubeconfig-secret={}", HUB_KUBECONFIG_SECRET),
    ];
    for url in &spec.external_server_urls {
        args.push(format!("--spoke-external-server-urls={}", url));
    }
    args
}

fn work_args() -> Vec<String> {
    vec![
        "/work".to_string(),
        "agent".to_string(),
        format!("--hub-kubeconfig-secret={}", HUB_KUBECONFIG_SECRET),
    ]
}

fn singleton_args(spec: &KlusterletSpec) -> Vec<String> {
    let mut args = registration_args(spec);
    args[1] = "singleton-agent".to_string();
    args
}

fn agent_namespace(klusterlet_name: &str, namespace: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            labels: Some(owner_labels(klusterlet_name)),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn service_account(klusterlet_name: &str, namespace: &str, name: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(owner_labels(klusterlet_name)),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn cluster_role(klusterlet_name: &str, name: &str) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(owner_labels(klusterlet_name)),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec![
                "secrets".to_string(),
                "configmaps".to_string(),
                "events".to_string(),
            ]),
            verbs: vec!["get", "list", "watch", "create", "update", "patch", "delete"]
                .into_iter()
                .map(String::from)
                .collect(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn cluster_role_binding(
    klusterlet_name: &str,
    name: &str,
    namespace: &str,
    sa: &str,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(owner_labels(klusterlet_name)),
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
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

fn agent_deployment(
    klusterlet_name: &str,
    namespace: &str,
    name: &str,
    image: &str,
    args: Vec<String>,
    sa: &str,
) -> Deployment {
    let mut pod_labels = owner_labels(klusterlet_name);
    pod_labels.insert("app".to_string(), name.to_string());

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
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
                    containers: vec![Container {
                        name: name.to_string(),
                        image: Some(image.to_string()),
                        args: Some(args),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "bootstrap-kubeconfig".to_string(),
                            mount_path: "/spoke/bootstrap".to_string(),
                            read_only: Some(true),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "bootstrap-kubeconfig".to_string(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(BOOTSTRAP_HUB_KUBECONFIG.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocm_common::api::KlusterletDeployOption;

    fn spec(mode: KlusterletInstallMode) -> KlusterletSpec {
        KlusterletSpec {
            cluster_name: "cluster1".to_string(),
            namespace: "test".to_string(),
            registration_image_pull_spec: "quay.io/ocm/registration:latest".to_string(),
            work_image_pull_spec: "quay.io/ocm/work:latest".to_string(),
            deploy_option: KlusterletDeployOption { mode },
            ..Default::default()
        }
    }

    #[test]
    fn default_mode_runs_split_agents() {
        let resources = desired_resources("klusterlet", &spec(KlusterletInstallMode::Default));
        assert_eq!(resources.len(), 9);
        let deployments: Vec<String> = resources
            .iter()
            .filter(|r| matches!(r, ManagedResource::Deployment(_)))
            .map(|r| r.name())
            .collect();
        assert_eq!(
            deployments,
            vec!["klusterlet-registration-agent", "klusterlet-work-agent"]
        );
    }

    #[test]
    fn singleton_mode_collapses_to_one_agent() {
        let resources = desired_resources("klusterlet", &spec(KlusterletInstallMode::Singleton));
        assert_eq!(resources.len(), 7);
        let deployments: Vec<String> = resources
            .iter()
            .filter(|r| matches!(r, ManagedResource::Deployment(_)))
            .map(|r| r.name())
            .collect();
        assert_eq!(deployments, vec!["klusterlet-agent"]);
    }

    #[test]
    fn agent_deployment_name_tracks_mode() {
        assert_eq!(
            agent_deployment_name("test", KlusterletInstallMode::Default),
            "test-registration-agent"
        );
        assert_eq!(
            agent_deployment_name("test", KlusterletInstallMode::Singleton),
            "test-agent"
        );
        assert_eq!(
            agent_deployment_name("test", KlusterletInstallMode::Hosted),
            "test-registration-agent"
        );
    }

    #[test]
    fn registration_agent_carries_cluster_name_and_secret_refs() {
        let resources = desired_resources("klusterlet", &spec(KlusterletInstallMode::Default));
        let deployment = resources
            .iter()
            .find_map(|r| match r {
                ManagedResource::Deployment(d) if r.name() == "klusterlet-registration-agent" => {
                    Some(d)
                }
                _ => None,
            })
            .unwrap();
        let args = deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .args
            .as_ref()
            .unwrap();
        assert!(args.contains(&"--cluster-name=cluster1".to_string()));
        assert!(args.contains(&"--hub-kubeconfig-secret=hub-kubeconfig-secret".to_string()));
    }

    #[test]
    fn agents_mount_the_bootstrap_credential() {
        let resources = desired_resources("klusterlet", &spec(KlusterletInstallMode::Singleton));
        let deployment = resources
            .iter()
            .find_map(|r| match r {
                ManagedResource::Deployment(d) => Some(d),
                _ => None,
            })
            .unwrap();
        let volumes = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .volumes
            .as_ref()
            .unwrap();
        assert_eq!(
            volumes[0].secret.as_ref().unwrap().secret_name.as_deref(),
            Some("bootstrap-hub-kubeconfig")
        );
    }

    #[test]
    fn namespace_defaults_when_unset() {
        let mut s = spec(KlusterletInstallMode::Default);
        s.namespace = String::new();
        let resources = desired_resources("klusterlet", &s);
        assert_eq!(resources[0].name(), "open-cluster-management-agent");
    }
}
