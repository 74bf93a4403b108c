//! ClusterManager controller implementation
//!
//! Follows the Kubernetes controller pattern: re-read the spec, compute the
//! desired child set from spec + feature gates, apply it through the
//! hash-comparing engine, prune what is no longer desired, then publish
//! conditions and inventories on the status subresource.
//!
//! Admission webhook configurations are held back until their backing
//! webhook deployment reports an available replica, so API calls never hit
//! an un-ready webhook target.

pub mod manifests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use ocm_common::api::{ClusterManager, ClusterManagerStatus};
use ocm_common::apply::{AppliedResource, ManagedResource};
use ocm_common::conditions::{set_condition, Condition, ConditionStatus};
use ocm_common::features::{self, ResolvedFeatureGates};
use ocm_common::generations::{find_generation, set_generation, GenerationStatus};
use ocm_common::{Error, Result, HUB_NAMESPACE};

/// Condition type set when all child applies succeeded
pub const CONDITION_APPLIED: &str = "Applied";
/// Reason for a successful apply pass
pub const REASON_APPLIED: &str = "ClusterManagerApplied";
/// Reason for a failed apply pass
pub const REASON_APPLY_FAILED: &str = "ClusterManagerApplyFailed";

/// Condition type tracking rollout progress
pub const CONDITION_PROGRESSING: &str = "Progressing";
/// Reason while any deployment is still rolling out
pub const REASON_ROLLING: &str = "ClusterManagerDeploymentRolling";
/// Reason once every deployment matches the desired state
pub const REASON_UP_TO_DATE: &str = "ClusterManagerUpToDate";

/// Condition type for the registration subsystem health
pub const CONDITION_HUB_REGISTRATION_DEGRADED: &str = "HubRegistrationDegraded";
/// Reason when the registration controller has no ready pod
pub const REASON_UNAVAILABLE_REGISTRATION_POD: &str = "UnavailableRegistrationPod";
/// Reason when the registration controller is serving
pub const REASON_REGISTRATION_FUNCTIONAL: &str = "RegistrationFunctional";

/// Condition type reporting feature gate validity
pub const CONDITION_FEATURE_GATES_VALID: &str = "FeatureGatesValid";
/// Reason when every referenced gate is recognized
pub const REASON_FEATURE_GATES_ALL_VALID: &str = "FeatureGatesAllValid";
/// Reason when a spec references unrecognized gates
pub const REASON_INVALID_FEATURE_GATES: &str = "InvalidFeatureGatesExisting";

/// Finalizer guarding child cleanup on ClusterManager deletion
pub const CLEANUP_FINALIZER: &str = "operator.open-cluster-management.io/cleanup";

/// Trait abstracting the Kubernetes operations the reconciler performs.
///
/// Allows mocking the cluster in tests while the real implementation wraps
/// the apply engine.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Project a desired child into the cluster; `force` skips the content
    /// hash shortcut to overwrite out-of-band edits
    async fn apply(&self, resource: &ManagedResource, force: bool) -> Result<AppliedResource>;

    /// Delete a child from the cluster (absent children are a no-op)
    async fn delete(&self, resource: &ManagedResource) -> Result<()>;

    /// Fetch a deployment's live state, None when absent
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Patch the status subresource of a ClusterManager
    async fn patch_status(&self, name: &str, status: &ClusterManagerStatus) -> Result<()>;

    /// Add the cleanup finalizer if not present
    async fn ensure_finalizer(&self, name: &str) -> Result<()>;

    /// Drop the cleanup finalizer
    async fn remove_finalizer(&self, name: &str) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct HubClientImpl {
    client: Client,
}

impl HubClientImpl {
    /// Create a new HubClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HubClient for HubClientImpl {
    async fn apply(&self, resource: &ManagedResource, force: bool) -> Result<AppliedResource> {
        if force {
            resource.apply_force(&self.client).await
        } else {
            resource.apply(&self.client).await
        }
    }

    async fn delete(&self, resource: &ManagedResource) -> Result<()> {
        resource.delete(&self.client).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_status(&self, name: &str, status: &ClusterManagerStatus) -> Result<()> {
        let api: Api<ClusterManager> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn ensure_finalizer(&self, name: &str) -> Result<()> {
        let api: Api<ClusterManager> = Api::all(self.client.clone());
        let cm = api.get(name).await?;
        let mut finalizers = cm.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == CLEANUP_FINALIZER) {
            return Ok(());
        }
        finalizers.push(CLEANUP_FINALIZER.to_string());
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_finalizer(&self, name: &str) -> Result<()> {
        let api: Api<ClusterManager> = Api::all(self.client.clone());
        let cm = api.get(name).await?;
        let finalizers: Vec<String> = cm
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != CLEANUP_FINALIZER)
            .collect();
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Shared context for ClusterManager reconciliations
pub struct Context {
    /// Client seam used for all cluster access
    pub client: Arc<dyn HubClient>,
    /// Requeue period for steady-state resyncs
    pub resync: Duration,
}

/// Reconcile one ClusterManager
pub async fn reconcile(cm: Arc<ClusterManager>, ctx: Arc<Context>) -> Result<Action> {
    let name = cm.name_any();

    if cm.metadata.deletion_timestamp.is_some() {
        info!(cluster_manager = %name, "cleaning up deleted ClusterManager");
        cleanup(&name, &cm, ctx.client.as_ref()).await?;
        ctx.client.remove_finalizer(&name).await?;
        return Ok(Action::await_change());
    }

    ctx.client.ensure_finalizer(&name).await?;
    cm.spec.validate(&name)?;

    let status = sync(&name, &cm, ctx.client.as_ref()).await?;
    ctx.client.patch_status(&name, &status).await?;

    Ok(Action::requeue(ctx.resync))
}

/// Requeue policy: transient failures come back quickly, spec mistakes wait
pub fn error_policy(cm: Arc<ClusterManager>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(cluster_manager = %cm.name_any(), error = %error, "reconciliation failed");
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(5))
    } else {
        Action::requeue(Duration::from_secs(300))
    }
}

/// Delete every child the spec could own, gated subsystems included
async fn cleanup(name: &str, cm: &ClusterManager, client: &dyn HubClient) -> Result<()> {
    for resource in manifests::full_universe(name, &cm.spec) {
        // The hub namespace is left in place; see DESIGN notes.
        if matches!(resource, ManagedResource::Namespace(_)) {
            continue;
        }
        client.delete(&resource).await?;
    }
    Ok(())
}

/// One compare-and-apply pass; returns the status to publish
pub async fn sync(
    name: &str,
    cm: &ClusterManager,
    client: &dyn HubClient,
) -> Result<ClusterManagerStatus> {
    let previous = cm.status.clone().unwrap_or_default();
    let mut conditions = previous.conditions.clone();
    let mut generations = previous.generations.clone();

    let gates = resolve_gates(cm);
    set_feature_gate_condition(&mut conditions, &gates);

    let desired = manifests::desired_resources(name, &cm.spec, &gates);
    let universe = manifests::full_universe(name, &cm.spec);

    // Apply pass. Webhook configurations are gated on their backing
    // deployment reporting a ready replica. Deployments whose live
    // generation moved past the recorded one were edited out-of-band and
    // are rewritten unconditionally.
    let mut apply_errors: Vec<String> = Vec::new();
    for resource in &desired {
        if let Some(backing) = webhook_backing_deployment(name, resource) {
            let available = deployment_available_replicas(client, &backing).await?;
            if available < 1 {
                info!(
                    webhook = %resource.name(),
                    deployment = %backing,
                    "webhook deployment not ready, holding back webhook configuration"
                );
                continue;
            }
        }
        let force = deployment_drifted(client, HUB_NAMESPACE, resource, &generations).await?;
        match client.apply(resource, force).await {
            Ok(applied) => {
                if matches!(resource, ManagedResource::Deployment(_)) {
                    set_generation(&mut generations, resource.generation_status(applied.generation));
                }
            }
            Err(e) => {
                warn!(resource = %resource.name(), error = %e, "apply failed");
                apply_errors.push(format!("{} {}: {}", resource.gvr().2, resource.name(), e));
            }
        }
    }

    // Prune pass: anything in the universe that is no longer desired.
    let desired_metas: Vec<_> = desired.iter().map(|r| r.related_meta()).collect();
    for resource in &universe {
        if !desired_metas.contains(&resource.related_meta()) {
            client.delete(resource).await?;
        }
    }

    set_condition(
        &mut conditions,
        if apply_errors.is_empty() {
            Condition::new(
                CONDITION_APPLIED,
                ConditionStatus::True,
                REASON_APPLIED,
                "all hub components applied",
            )
        } else {
            Condition::new(
                CONDITION_APPLIED,
                ConditionStatus::False,
                REASON_APPLY_FAILED,
                apply_errors.join("; "),
            )
        },
    );

    // Progress and health off the live deployments.
    let mut live_generations: HashMap<String, i64> = HashMap::new();
    let mut rolling = false;
    for resource in &desired {
        let ManagedResource::Deployment(_) = resource else {
            continue;
        };
        let deployment_name = resource.name();
        match client.get_deployment(HUB_NAMESPACE, &deployment_name).await? {
            Some(live) => {
                live_generations.insert(
                    deployment_name,
                    live.metadata.generation.unwrap_or(0),
                );
                if !deployment_settled(&live) {
                    rolling = true;
                }
            }
            None => {
                rolling = true;
            }
        }
    }

    let registration_available = deployment_available_replicas(
        client,
        &manifests::registration_deployment_name(name),
    )
    .await?;
    set_condition(
        &mut conditions,
        if registration_available == 0 {
            Condition::new(
                CONDITION_HUB_REGISTRATION_DEGRADED,
                ConditionStatus::True,
                REASON_UNAVAILABLE_REGISTRATION_POD,
                "no registration controller pod is ready",
            )
        } else {
            Condition::new(
                CONDITION_HUB_REGISTRATION_DEGRADED,
                ConditionStatus::False,
                REASON_REGISTRATION_FUNCTIONAL,
                "registration is serving",
            )
        },
    );

    set_condition(
        &mut conditions,
        if rolling {
            Condition::new(
                CONDITION_PROGRESSING,
                ConditionStatus::True,
                REASON_ROLLING,
                "hub deployments are rolling out",
            )
        } else {
            Condition::new(
                CONDITION_PROGRESSING,
                ConditionStatus::False,
                REASON_UP_TO_DATE,
                "hub components are up to date",
            )
        },
    );

    // observedGeneration moves only once every recorded child generation
    // matches the live object and nothing is rolling or failing.
    let tuples_match = generations.iter().all(|g| {
        g.resource != "deployments"
            || live_generations.get(&g.name) == Some(&g.last_generation)
    });
    let observed_generation = if apply_errors.is_empty() && !rolling && tuples_match {
        cm.metadata.generation
    } else {
        previous.observed_generation
    };

    Ok(ClusterManagerStatus {
        observed_generation,
        conditions,
        generations,
        related_resources: desired_metas,
    })
}

fn resolve_gates(cm: &ClusterManager) -> ResolvedFeatureGates {
    let registration = cm
        .spec
        .registration_configuration
        .as_ref()
        .map(|c| c.feature_gates.clone())
        .unwrap_or_default();
    let work = cm
        .spec
        .work_configuration
        .as_ref()
        .map(|c| c.feature_gates.clone())
        .unwrap_or_default();
    let addon = cm
        .spec
        .add_on_manager_configuration
        .as_ref()
        .map(|c| c.feature_gates.clone())
        .unwrap_or_default();
    features::resolve(&registration, &work, &addon)
}

fn set_feature_gate_condition(conditions: &mut Vec<Condition>, gates: &ResolvedFeatureGates) {
    set_condition(
        conditions,
        if gates.unknown.is_empty() {
            Condition::new(
                CONDITION_FEATURE_GATES_VALID,
                ConditionStatus::True,
                REASON_FEATURE_GATES_ALL_VALID,
                "all feature gates are recognized",
            )
        } else {
            Condition::new(
                CONDITION_FEATURE_GATES_VALID,
                ConditionStatus::False,
                REASON_INVALID_FEATURE_GATES,
                format!("unrecognized feature gates: {}", gates.unknown.join(",")),
            )
        },
    );
}

/// The deployment a webhook configuration routes to, if this is one
fn webhook_backing_deployment(cm_name: &str, resource: &ManagedResource) -> Option<String> {
    match resource {
        ManagedResource::ValidatingWebhookConfiguration(_)
        | ManagedResource::MutatingWebhookConfiguration(_) => {
            if resource.name() == manifests::WORK_VALIDATING_WEBHOOK {
                Some(manifests::work_webhook_name(cm_name))
            } else {
                Some(manifests::registration_webhook_name(cm_name))
            }
        }
        _ => None,
    }
}

/// Whether a deployment's live generation moved past the recorded one,
/// which means someone edited it behind the reconciler's back
async fn deployment_drifted(
    client: &dyn HubClient,
    namespace: &str,
    resource: &ManagedResource,
    generations: &[GenerationStatus],
) -> Result<bool> {
    if !matches!(resource, ManagedResource::Deployment(_)) {
        return Ok(false);
    }
    let Some(recorded) = find_generation(generations, &resource.generation_status(0)) else {
        return Ok(false);
    };
    let live = client
        .get_deployment(namespace, &resource.name())
        .await?
        .and_then(|d| d.metadata.generation)
        .unwrap_or(0);
    Ok(live != recorded.last_generation)
}

async fn deployment_available_replicas(client: &dyn HubClient, name: &str) -> Result<i32> {
    Ok(client
        .get_deployment(HUB_NAMESPACE, name)
        .await?
        .and_then(|d| d.status)
        .and_then(|s| s.available_replicas)
        .unwrap_or(0))
}

/// Whether a live deployment has converged on its own spec
fn deployment_settled(live: &Deployment) -> bool {
    let generation = live.metadata.generation.unwrap_or(0);
    let desired = live.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let Some(status) = &live.status else {
        return false;
    };
    status.observed_generation.unwrap_or(0) >= generation
        && status.available_replicas.unwrap_or(0) >= desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::predicate;
    use ocm_common::api::{
        ClusterManagerSpec, FeatureGate, FeatureGateMode, WorkConfiguration,
    };
    use ocm_common::conditions::{find_condition, is_condition_true};

    fn cluster_manager() -> ClusterManager {
        let mut cm = ClusterManager::new(
            "cluster-manager",
            ClusterManagerSpec {
                registration_image_pull_spec: "quay.io/ocm/registration:latest".to_string(),
                work_image_pull_spec: "quay.io/ocm/work:latest".to_string(),
                placement_image_pull_spec: "quay.io/ocm/placement:latest".to_string(),
                add_on_manager_image_pull_spec: "quay.io/ocm/addon-manager:latest".to_string(),
                ..Default::default()
            },
        );
        cm.metadata.generation = Some(3);
        cm
    }

    fn ready_deployment(name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(HUB_NAMESPACE.to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                observed_generation: Some(1),
                available_replicas: Some(1),
                ..Default::default()
            }),
        }
    }

    fn unavailable_deployment(name: &str) -> Deployment {
        let mut d = ready_deployment(name);
        d.status.as_mut().unwrap().available_replicas = Some(0);
        d
    }

    /// Story: a healthy hub reports the full inventory and converges
    #[tokio::test]
    async fn story_healthy_hub_reaches_steady_state() {
        let mut client = MockHubClient::new();
        client
            .expect_apply()
            .times(46)
            .returning(|_, _| Ok(AppliedResource { changed: false, generation: 1 }));
        client
            .expect_get_deployment()
            .returning(|_, name| Ok(Some(ready_deployment(name))));

        let cm = cluster_manager();
        let status = sync("cluster-manager", &cm, &client).await.unwrap();

        assert_eq!(status.related_resources.len(), 46);
        assert!(is_condition_true(&status.conditions, CONDITION_APPLIED));
        assert!(!is_condition_true(&status.conditions, CONDITION_PROGRESSING));
        assert_eq!(
            find_condition(&status.conditions, CONDITION_PROGRESSING).unwrap().reason,
            REASON_UP_TO_DATE
        );
        assert!(!is_condition_true(&status.conditions, CONDITION_HUB_REGISTRATION_DEGRADED));
        assert_eq!(
            find_condition(&status.conditions, CONDITION_HUB_REGISTRATION_DEGRADED)
                .unwrap()
                .reason,
            REASON_REGISTRATION_FUNCTIONAL
        );
        assert!(is_condition_true(&status.conditions, CONDITION_FEATURE_GATES_VALID));
        assert_eq!(status.observed_generation, Some(3));
    }

    /// Story: webhook configurations wait for their webhook deployments
    ///
    /// With no ready replicas anywhere, the three webhook configurations are
    /// held back (46 - 3 applies), the registration subsystem is degraded and
    /// the rollout is still progressing.
    #[tokio::test]
    async fn story_webhooks_held_back_until_deployments_ready() {
        let mut client = MockHubClient::new();
        client
            .expect_apply()
            .times(43)
            .returning(|_, _| Ok(AppliedResource { changed: true, generation: 1 }));
        client
            .expect_get_deployment()
            .returning(|_, name| Ok(Some(unavailable_deployment(name))));

        let cm = cluster_manager();
        let status = sync("cluster-manager", &cm, &client).await.unwrap();

        // The inventory still lists the held-back webhooks: it is a pure
        // function of the desired state, not of rollout progress.
        assert_eq!(status.related_resources.len(), 46);
        assert!(is_condition_true(&status.conditions, CONDITION_PROGRESSING));
        assert_eq!(
            find_condition(&status.conditions, CONDITION_PROGRESSING).unwrap().reason,
            REASON_ROLLING
        );
        assert!(is_condition_true(&status.conditions, CONDITION_HUB_REGISTRATION_DEGRADED));
        assert_eq!(
            find_condition(&status.conditions, CONDITION_HUB_REGISTRATION_DEGRADED)
                .unwrap()
                .reason,
            REASON_UNAVAILABLE_REGISTRATION_POD
        );
        assert_eq!(status.observed_generation, None);
    }

    /// Story: disabling a feature gate prunes its subsystem
    #[tokio::test]
    async fn story_disabling_gate_prunes_children() {
        let mut client = MockHubClient::new();
        client
            .expect_apply()
            .times(42)
            .returning(|_, _| Ok(AppliedResource { changed: false, generation: 1 }));
        client
            .expect_get_deployment()
            .returning(|_, name| Ok(Some(ready_deployment(name))));
        client
            .expect_delete()
            .times(4)
            .withf(|resource| {
                resource.name().contains("work-controller")
                    || resource.name().contains("work:controller")
            })
            .returning(|_| Ok(()));

        let mut cm = cluster_manager();
        cm.spec.work_configuration = Some(WorkConfiguration {
            feature_gates: vec![FeatureGate {
                feature: "ManifestWorkReplicaSet".to_string(),
                mode: FeatureGateMode::Disable,
            }],
        });

        let status = sync("cluster-manager", &cm, &client).await.unwrap();
        assert_eq!(status.related_resources.len(), 42);
    }

    #[tokio::test]
    async fn unknown_feature_gate_is_loud() {
        let mut client = MockHubClient::new();
        client
            .expect_apply()
            .returning(|_, _| Ok(AppliedResource { changed: false, generation: 1 }));
        client
            .expect_get_deployment()
            .returning(|_, name| Ok(Some(ready_deployment(name))));
        client.expect_delete().returning(|_| Ok(()));

        let mut cm = cluster_manager();
        cm.spec.work_configuration = Some(WorkConfiguration {
            feature_gates: vec![FeatureGate {
                feature: "ManifestWorkReplicaSets".to_string(),
                mode: FeatureGateMode::Enable,
            }],
        });

        let status = sync("cluster-manager", &cm, &client).await.unwrap();
        let condition = find_condition(&status.conditions, CONDITION_FEATURE_GATES_VALID).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, REASON_INVALID_FEATURE_GATES);
        assert!(condition.message.contains("ManifestWorkReplicaSets"));
    }

    #[tokio::test]
    async fn apply_failure_blocks_observed_generation() {
        let mut client = MockHubClient::new();
        client.expect_apply().returning(|resource, _| {
            if resource.name() == "cluster-manager-work-controller" {
                Err(Error::forbidden("denied by test"))
            } else {
                Ok(AppliedResource { changed: false, generation: 1 })
            }
        });
        client
            .expect_get_deployment()
            .returning(|_, name| Ok(Some(ready_deployment(name))));

        let cm = cluster_manager();
        let status = sync("cluster-manager", &cm, &client).await.unwrap();

        let applied = find_condition(&status.conditions, CONDITION_APPLIED).unwrap();
        assert_eq!(applied.status, ConditionStatus::False);
        assert_eq!(applied.reason, REASON_APPLY_FAILED);
        assert!(applied.message.contains("cluster-manager-work-controller"));
        assert_eq!(status.observed_generation, None);
    }

    #[tokio::test]
    async fn stale_deployment_generation_keeps_converging() {
        let mut client = MockHubClient::new();
        client
            .expect_apply()
            .returning(|_, _| Ok(AppliedResource { changed: true, generation: 2 }));
        // Live deployments still report the old generation.
        client.expect_get_deployment().returning(|_, name| {
            let mut d = ready_deployment(name);
            d.metadata.generation = Some(1);
            d.status.as_mut().unwrap().observed_generation = Some(1);
            Ok(Some(d))
        });

        let cm = cluster_manager();
        let status = sync("cluster-manager", &cm, &client).await.unwrap();
        // Recorded tuples (generation 2) do not match live (1): still converging.
        assert_eq!(status.observed_generation, None);
    }

    /// Story: a manual edit to a managed deployment is reverted.
    ///
    /// The hash annotation survives out-of-band edits, so the hash shortcut
    /// alone would keep the edit. The recorded generation does not match the
    /// live one anymore, which forces the rewrite.
    #[tokio::test]
    async fn story_manual_edit_is_reverted() {
        let mut client = MockHubClient::new();
        client
            .expect_apply()
            .withf(|resource, force| {
                // Only the edited deployment is force-applied.
                *force == (resource.name() == "cluster-manager-registration-controller")
            })
            .returning(|resource, force| {
                Ok(AppliedResource {
                    changed: force,
                    generation: if resource.name() == "cluster-manager-registration-controller" {
                        3
                    } else {
                        1
                    },
                })
            });
        // The live registration deployment was edited: generation 2, past
        // the recorded 1.
        client.expect_get_deployment().returning(|_, name| {
            let mut d = ready_deployment(name);
            if name == "cluster-manager-registration-controller" {
                d.metadata.generation = Some(2);
                d.status.as_mut().unwrap().observed_generation = Some(2);
            }
            Ok(Some(d))
        });

        let mut cm = cluster_manager();
        cm.status = Some(ClusterManagerStatus {
            generations: vec![GenerationStatus {
                group: "apps".to_string(),
                version: "v1".to_string(),
                resource: "deployments".to_string(),
                namespace: HUB_NAMESPACE.to_string(),
                name: "cluster-manager-registration-controller".to_string(),
                last_generation: 1,
            }],
            ..Default::default()
        });

        let status = sync("cluster-manager", &cm, &client).await.unwrap();

        // The rewrite bumped the recorded generation past the edit.
        let recorded = status
            .generations
            .iter()
            .find(|g| g.name == "cluster-manager-registration-controller")
            .unwrap();
        assert_eq!(recorded.last_generation, 3);
    }

    #[tokio::test]
    async fn deletion_cleans_up_children_but_not_namespace() {
        let mut client = MockHubClient::new();
        client
            .expect_delete()
            .times(45)
            .withf(|resource| !matches!(resource, ManagedResource::Namespace(_)))
            .returning(|_| Ok(()));
        client
            .expect_remove_finalizer()
            .with(predicate::eq("cluster-manager"))
            .times(1)
            .returning(|_| Ok(()));

        let mut cm = cluster_manager();
        cm.metadata.deletion_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()));

        let ctx = Arc::new(Context {
            client: Arc::new(client),
            resync: Duration::from_secs(60),
        });
        reconcile(Arc::new(cm), ctx).await.unwrap();
    }
}
