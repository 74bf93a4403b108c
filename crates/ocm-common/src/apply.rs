//! Idempotent declarative writer for managed child resources
//!
//! The engine projects a desired object into the cluster, comparing by a
//! content-hash annotation so an unchanged desired state never produces a
//! write. Runtime type dispatch is replaced by a closed tagged-variant
//! registry: [`ManagedResource`] enumerates every kind the operators manage
//! and carries the `{group, resource}` coordinates and patch shape per
//! variant.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Error;
use crate::generations::{GenerationStatus, RelatedResourceMeta};
use crate::Result;

/// Annotation holding the SHA-256 of the desired object's controlled fields
pub const SPEC_HASH_ANNOTATION: &str = "operator.open-cluster-management.io/spec-hash";

/// Label tying every managed child back to the spec that owns it
pub const OWNER_LABEL: &str = "operator.open-cluster-management.io/owner";

/// Labels stamped on every child of the given owning spec
pub fn owner_labels(owner: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(OWNER_LABEL.to_string(), owner.to_string())])
}

/// Outcome of projecting one desired object into the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppliedResource {
    /// Whether a create or update was issued
    pub changed: bool,
    /// `metadata.generation` of the live object after the apply
    pub generation: i64,
}

/// A desired child resource of one of the known managed kinds
#[derive(Clone, Debug)]
pub enum ManagedResource {
    /// A v1 Namespace
    Namespace(Namespace),
    /// A v1 ServiceAccount
    ServiceAccount(ServiceAccount),
    /// An rbac/v1 ClusterRole
    ClusterRole(ClusterRole),
    /// An rbac/v1 ClusterRoleBinding
    ClusterRoleBinding(ClusterRoleBinding),
    /// An rbac/v1 Role
    Role(Role),
    /// An rbac/v1 RoleBinding
    RoleBinding(RoleBinding),
    /// An apps/v1 Deployment
    Deployment(Deployment),
    /// A v1 Service
    Service(Service),
    /// A v1 Secret
    Secret(Secret),
    /// A v1 ConfigMap
    ConfigMap(ConfigMap),
    /// An admissionregistration/v1 ValidatingWebhookConfiguration
    ValidatingWebhookConfiguration(ValidatingWebhookConfiguration),
    /// An admissionregistration/v1 MutatingWebhookConfiguration
    MutatingWebhookConfiguration(MutatingWebhookConfiguration),
    /// An apiextensions/v1 CustomResourceDefinition
    CustomResourceDefinition(CustomResourceDefinition),
}

impl ManagedResource {
    /// `{group, version, resource}` coordinates of this variant
    pub fn gvr(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Namespace(_) => ("", "v1", "namespaces"),
            Self::ServiceAccount(_) => ("", "v1", "serviceaccounts"),
            Self::ClusterRole(_) => ("rbac.authorization.k8s.io", "v1", "clusterroles"),
            Self::ClusterRoleBinding(_) => {
                ("rbac.authorization.k8s.io", "v1", "clusterrolebindings")
            }
            Self::Role(_) => ("rbac.authorization.k8s.io", "v1", "roles"),
            Self::RoleBinding(_) => ("rbac.authorization.k8s.io", "v1", "rolebindings"),
            Self::Deployment(_) => ("apps", "v1", "deployments"),
            Self::Service(_) => ("", "v1", "services"),
            Self::Secret(_) => ("", "v1", "secrets"),
            Self::ConfigMap(_) => ("", "v1", "configmaps"),
            Self::ValidatingWebhookConfiguration(_) => (
                "admissionregistration.k8s.io",
                "v1",
                "validatingwebhookconfigurations",
            ),
            Self::MutatingWebhookConfiguration(_) => (
                "admissionregistration.k8s.io",
                "v1",
                "mutatingwebhookconfigurations",
            ),
            Self::CustomResourceDefinition(_) => (
                "apiextensions.k8s.io",
                "v1",
                "customresourcedefinitions",
            ),
        }
    }

    /// Name of the desired object
    pub fn name(&self) -> String {
        self.with_meta(|m| m.name.clone().unwrap_or_default())
    }

    /// Namespace of the desired object (empty for cluster-scoped kinds)
    pub fn namespace(&self) -> String {
        self.with_meta(|m| m.namespace.clone().unwrap_or_default())
    }

    fn with_meta<T>(&self, f: impl Fn(&k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> T) -> T {
        match self {
            Self::Namespace(o) => f(&o.metadata),
            Self::ServiceAccount(o) => f(&o.metadata),
            Self::ClusterRole(o) => f(&o.metadata),
            Self::ClusterRoleBinding(o) => f(&o.metadata),
            Self::Role(o) => f(&o.metadata),
            Self::RoleBinding(o) => f(&o.metadata),
            Self::Deployment(o) => f(&o.metadata),
            Self::Service(o) => f(&o.metadata),
            Self::Secret(o) => f(&o.metadata),
            Self::ConfigMap(o) => f(&o.metadata),
            Self::ValidatingWebhookConfiguration(o) => f(&o.metadata),
            Self::MutatingWebhookConfiguration(o) => f(&o.metadata),
            Self::CustomResourceDefinition(o) => f(&o.metadata),
        }
    }

    /// The inventory entry for this resource
    pub fn related_meta(&self) -> RelatedResourceMeta {
        let (group, version, resource) = self.gvr();
        RelatedResourceMeta {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            namespace: self.namespace(),
            name: self.name(),
        }
    }

    /// A generation record for this resource with the given live generation
    pub fn generation_status(&self, last_generation: i64) -> GenerationStatus {
        let (group, version, resource) = self.gvr();
        GenerationStatus {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            namespace: self.namespace(),
            name: self.name(),
            last_generation,
        }
    }

    /// Project this desired object into the cluster
    pub async fn apply(&self, client: &Client) -> Result<AppliedResource> {
        self.apply_impl(client, false).await
    }

    /// Project this desired object even when the stored content hash still
    /// matches.
    ///
    /// The hash comparison cannot see out-of-band edits (they leave the
    /// annotation in place), so reconcilers force a write when the live
    /// generation has moved past the one they recorded.
    pub async fn apply_force(&self, client: &Client) -> Result<AppliedResource> {
        self.apply_impl(client, true).await
    }

    async fn apply_impl(&self, client: &Client, force: bool) -> Result<AppliedResource> {
        match self {
            Self::Namespace(o) => apply_cluster_scoped(client, o.clone(), force).await,
            Self::ServiceAccount(o) => apply_namespaced(client, o.clone(), force).await,
            Self::ClusterRole(o) => apply_cluster_scoped(client, o.clone(), force).await,
            Self::ClusterRoleBinding(o) => apply_cluster_scoped(client, o.clone(), force).await,
            Self::Role(o) => apply_namespaced(client, o.clone(), force).await,
            Self::RoleBinding(o) => apply_namespaced(client, o.clone(), force).await,
            Self::Deployment(o) => apply_namespaced(client, o.clone(), force).await,
            Self::Service(o) => apply_namespaced(client, o.clone(), force).await,
            Self::Secret(o) => apply_namespaced(client, o.clone(), force).await,
            Self::ConfigMap(o) => apply_namespaced(client, o.clone(), force).await,
            Self::ValidatingWebhookConfiguration(o) => {
                apply_cluster_scoped(client, o.clone(), force).await
            }
            Self::MutatingWebhookConfiguration(o) => {
                apply_cluster_scoped(client, o.clone(), force).await
            }
            Self::CustomResourceDefinition(o) => apply_cluster_scoped(client, o.clone(), force).await,
        }
    }

    /// Delete this resource from the cluster; absent resources are a no-op
    pub async fn delete(&self, client: &Client) -> Result<()> {
        match self {
            Self::Namespace(o) => delete_cluster_scoped(client, o).await,
            Self::ServiceAccount(o) => delete_namespaced(client, o).await,
            Self::ClusterRole(o) => delete_cluster_scoped(client, o).await,
            Self::ClusterRoleBinding(o) => delete_cluster_scoped(client, o).await,
            Self::Role(o) => delete_namespaced(client, o).await,
            Self::RoleBinding(o) => delete_namespaced(client, o).await,
            Self::Deployment(o) => delete_namespaced(client, o).await,
            Self::Service(o) => delete_namespaced(client, o).await,
            Self::Secret(o) => delete_namespaced(client, o).await,
            Self::ConfigMap(o) => delete_namespaced(client, o).await,
            Self::ValidatingWebhookConfiguration(o) => delete_cluster_scoped(client, o).await,
            Self::MutatingWebhookConfiguration(o) => delete_cluster_scoped(client, o).await,
            Self::CustomResourceDefinition(o) => delete_cluster_scoped(client, o).await,
        }
    }
}

/// Compute the content hash of a desired object.
///
/// Server-managed fields (`resourceVersion`, `uid`, timestamps, managed
/// fields, `generation`, `status`) and the hash annotation itself are
/// excluded, so a round-trip through the API server cannot flip the hash
/// and start an apply loop.
pub fn spec_hash<T: Serialize>(resource: &T) -> Result<String> {
    let mut value =
        serde_json::to_value(resource).map_err(|e| Error::serialization(e.to_string()))?;

    if let Some(object) = value.as_object_mut() {
        object.remove("status");
    }
    if let Some(metadata) = value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for field in [
            "resourceVersion",
            "uid",
            "creationTimestamp",
            "managedFields",
            "generation",
        ] {
            metadata.remove(field);
        }
        if let Some(annotations) = metadata
            .get_mut("annotations")
            .and_then(|a| a.as_object_mut())
        {
            annotations.remove(SPEC_HASH_ANNOTATION);
        }
    }

    // serde_json maps are ordered, so the serialization is deterministic.
    let canonical =
        serde_json::to_string(&value).map_err(|e| Error::serialization(e.to_string()))?;
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

async fn apply_namespaced<K>(client: &Client, desired: K, force: bool) -> Result<AppliedResource>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned,
{
    let namespace = desired.meta().namespace.clone().ok_or_else(|| {
        Error::internal_with_context("apply", "namespaced resource without namespace")
    })?;
    let api: Api<K> = Api::namespaced(client.clone(), &namespace);
    apply_object(api, desired, force).await
}

async fn apply_cluster_scoped<K>(client: &Client, desired: K, force: bool) -> Result<AppliedResource>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned,
{
    let api: Api<K> = Api::all(client.clone());
    apply_object(api, desired, force).await
}

async fn apply_object<K>(api: Api<K>, mut desired: K, force: bool) -> Result<AppliedResource>
where
    K: Resource<DynamicType = ()> + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::internal_with_context("apply", "resource without a name"))?;

    let hash = spec_hash(&desired)?;
    desired
        .annotations_mut()
        .insert(SPEC_HASH_ANNOTATION.to_string(), hash.clone());

    match api.get(&name).await {
        Ok(live) => {
            let live_hash = live
                .meta()
                .annotations
                .as_ref()
                .and_then(|a| a.get(SPEC_HASH_ANNOTATION));
            if !force && live_hash == Some(&hash) {
                return Ok(AppliedResource {
                    changed: false,
                    generation: live.meta().generation.unwrap_or(0),
                });
            }
            debug!(name = %name, "desired state diverged from live, updating");
            desired.meta_mut().resource_version = live.meta().resource_version.clone();
            match api.replace(&name, &PostParams::default(), &desired).await {
                Ok(replaced) => Ok(AppliedResource {
                    changed: true,
                    generation: replaced.meta().generation.unwrap_or(0),
                }),
                // Deleted underneath us between the read and the write.
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    desired.meta_mut().resource_version = None;
                    create_object(&api, &desired).await
                }
                Err(e) => Err(map_write_error(e)),
            }
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => create_object(&api, &desired).await,
        Err(e) => Err(e.into()),
    }
}

async fn create_object<K>(api: &Api<K>, desired: &K) -> Result<AppliedResource>
where
    K: Resource<DynamicType = ()> + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
{
    match api.create(&PostParams::default(), desired).await {
        Ok(created) => Ok(AppliedResource {
            changed: true,
            generation: created.meta().generation.unwrap_or(0),
        }),
        Err(e) => Err(map_write_error(e)),
    }
}

async fn delete_namespaced<K>(client: &Client, desired: &K) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + DeserializeOwned,
{
    let namespace = desired.meta().namespace.clone().unwrap_or_default();
    let api: Api<K> = Api::namespaced(client.clone(), &namespace);
    delete_object(api, desired).await
}

async fn delete_cluster_scoped<K>(client: &Client, desired: &K) -> Result<()>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + DeserializeOwned,
{
    let api: Api<K> = Api::all(client.clone());
    delete_object(api, desired).await
}

async fn delete_object<K>(api: Api<K>, desired: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + std::fmt::Debug + DeserializeOwned,
{
    let name = desired.meta().name.clone().unwrap_or_default();
    match api.delete(&name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn map_write_error(e: kube::Error) -> Error {
    match &e {
        kube::Error::Api(ae) if ae.code == 403 => Error::forbidden(ae.message.clone()),
        _ => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn deployment(name: &str, image: &str) -> Deployment {
        use k8s_openapi::api::apps::v1::DeploymentSpec;
        use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("open-cluster-management-hub".to_string()),
                labels: Some(owner_labels("cluster-manager")),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: name.to_string(),
                            image: Some(image.to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn spec_hash_is_stable() {
        let a = deployment("registration", "img:1");
        let b = deployment("registration", "img:1");
        assert_eq!(spec_hash(&a).unwrap(), spec_hash(&b).unwrap());
    }

    #[test]
    fn spec_hash_tracks_controlled_fields() {
        let a = deployment("registration", "img:1");
        let b = deployment("registration", "img:2");
        assert_ne!(spec_hash(&a).unwrap(), spec_hash(&b).unwrap());
    }

    /// A round-trip through the API server stamps resourceVersion, uid,
    /// creationTimestamp and generation; none of them may move the hash.
    #[test]
    fn spec_hash_ignores_server_managed_fields() {
        let desired = deployment("registration", "img:1");
        let mut live = desired.clone();
        live.metadata.resource_version = Some("12345".to_string());
        live.metadata.uid = Some("b1f0".to_string());
        live.metadata.generation = Some(7);
        live.metadata.creation_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                chrono::Utc::now(),
            ));
        assert_eq!(spec_hash(&desired).unwrap(), spec_hash(&live).unwrap());
    }

    #[test]
    fn spec_hash_ignores_its_own_annotation() {
        let desired = deployment("registration", "img:1");
        let mut stamped = desired.clone();
        stamped
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(SPEC_HASH_ANNOTATION.to_string(), "something".to_string());
        assert_eq!(spec_hash(&desired).unwrap(), spec_hash(&stamped).unwrap());
    }

    #[test]
    fn gvr_coordinates_per_variant() {
        let resource = ManagedResource::Deployment(deployment("registration", "img"));
        assert_eq!(resource.gvr(), ("apps", "v1", "deployments"));
        assert_eq!(resource.name(), "registration");
        assert_eq!(resource.namespace(), "open-cluster-management-hub");

        let role = ManagedResource::ClusterRole(ClusterRole {
            metadata: ObjectMeta {
                name: Some("open-cluster-management:cluster-manager-registration:controller".into()),
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(role.gvr(), ("rbac.authorization.k8s.io", "v1", "clusterroles"));
        assert_eq!(role.namespace(), "");
    }

    #[test]
    fn related_meta_matches_coordinates() {
        let resource = ManagedResource::Deployment(deployment("registration", "img"));
        let meta = resource.related_meta();
        assert_eq!(meta.resource, "deployments");
        assert_eq!(meta.group, "apps");
        assert_eq!(meta.name, "registration");
        assert_eq!(meta.namespace, "open-cluster-management-hub");
    }

    #[test]
    fn generation_status_carries_live_generation() {
        let resource = ManagedResource::Deployment(deployment("registration", "img"));
        let status = resource.generation_status(4);
        assert_eq!(status.last_generation, 4);
        assert_eq!(status.resource, "deployments");
    }
}
