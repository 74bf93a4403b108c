//! Klusterlet controller implementation
//!
//! Expands a Klusterlet into the spoke agent workloads and publishes the
//! same condition/generation/inventory surface as the hub reconciler. The
//! sibling [`bootstrap`] module watches the spoke's credentials and drives
//! the supervised return to the bootstrap state after identity loss.

pub mod bootstrap;
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

use ocm_common::api::{Klusterlet, KlusterletStatus};
use ocm_common::apply::{AppliedResource, ManagedResource};
use ocm_common::conditions::{set_condition, Condition, ConditionStatus};
use ocm_common::generations::{find_generation, set_generation, GenerationStatus};
use ocm_common::{Error, Result};

/// Condition type set when all agent applies succeeded
pub const CONDITION_APPLIED: &str = "Applied";
/// Reason for a successful apply pass
pub const REASON_APPLIED: &str = "KlusterletApplied";
/// Reason for a failed apply pass
pub const REASON_APPLY_FAILED: &str = "KlusterletApplyFailed";

/// Condition type tracking agent rollout progress
pub const CONDITION_PROGRESSING: &str = "Progressing";
/// Reason while an agent deployment is still rolling out
pub const REASON_ROLLING: &str = "KlusterletDeploymentRolling";
/// Reason once the agents match the desired state
pub const REASON_UP_TO_DATE: &str = "KlusterletUpToDate";

/// Condition type for registration agent health
pub const CONDITION_REGISTRATION_DEGRADED: &str = "RegistrationDegraded";
/// Reason when no registration agent pod is ready
pub const REASON_UNAVAILABLE_REGISTRATION_AGENT: &str = "UnavailableRegistrationAgent";
/// Reason when the registration agent is serving
pub const REASON_REGISTRATION_AGENT_FUNCTIONAL: &str = "RegistrationAgentFunctional";

/// Finalizer guarding child cleanup on Klusterlet deletion
pub const CLEANUP_FINALIZER: &str = "operator.open-cluster-management.io/agent-cleanup";

/// Trait abstracting the spoke-side Kubernetes operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpokeClient: Send + Sync {
    /// Project a desired child into the spoke cluster; `force` skips the
    /// content hash shortcut to overwrite out-of-band edits
    async fn apply(&self, resource: &ManagedResource, force: bool) -> Result<AppliedResource>;

    /// Delete a child from the spoke cluster
    async fn delete(&self, resource: &ManagedResource) -> Result<()>;

    /// Fetch a deployment's live state, None when absent
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Patch the status subresource of a Klusterlet
    async fn patch_status(&self, name: &str, status: &KlusterletStatus) -> Result<()>;

    /// Add the cleanup finalizer if not present
    async fn ensure_finalizer(&self, name: &str) -> Result<()>;

    /// Drop the cleanup finalizer
    async fn remove_finalizer(&self, name: &str) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct SpokeClientImpl {
    client: Client,
}

impl SpokeClientImpl {
    /// Create a new SpokeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpokeClient for SpokeClientImpl {
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

    async fn patch_status(&self, name: &str, status: &KlusterletStatus) -> Result<()> {
        let api: Api<Klusterlet> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn ensure_finalizer(&self, name: &str) -> Result<()> {
        let api: Api<Klusterlet> = Api::all(self.client.clone());
        let klusterlet = api.get(name).await?;
        let mut finalizers = klusterlet.metadata.finalizers.unwrap_or_default();
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
        let api: Api<Klusterlet> = Api::all(self.client.clone());
        let klusterlet = api.get(name).await?;
        let finalizers: Vec<String> = klusterlet
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

/// Shared context for Klusterlet reconciliations
pub struct Context {
    /// Client seam used for all cluster access
    pub client: Arc<dyn SpokeClient>,
    /// Requeue period for steady-state resyncs
    pub resync: Duration,
}

/// Reconcile one Klusterlet
pub async fn reconcile(klusterlet: Arc<Klusterlet>, ctx: Arc<Context>) -> Result<Action> {
    let name = klusterlet.name_any();

    if klusterlet.metadata.deletion_timestamp.is_some() {
        info!(klusterlet = %name, "cleaning up deleted Klusterlet");
        for resource in manifests::full_universe(&name, &klusterlet.spec) {
            if matches!(resource, ManagedResource::Namespace(_)) {
                continue;
            }
            ctx.client.delete(&resource).await?;
        }
        ctx.client.remove_finalizer(&name).await?;
        return Ok(Action::await_change());
    }

    ctx.client.ensure_finalizer(&name).await?;

    let status = sync(&name, &klusterlet, ctx.client.as_ref()).await?;
    ctx.client.patch_status(&name, &status).await?;

    Ok(Action::requeue(ctx.resync))
}

/// Requeue policy shared with the hub reconciler
pub fn error_policy(klusterlet: Arc<Klusterlet>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(klusterlet = %klusterlet.name_any(), error = %error, "reconciliation failed");
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(5))
    } else {
        Action::requeue(Duration::from_secs(300))
    }
}

/// One compare-and-apply pass; returns the status to publish
pub async fn sync(
    name: &str,
    klusterlet: &Klusterlet,
    client: &dyn SpokeClient,
) -> Result<KlusterletStatus> {
    let previous = klusterlet.status.clone().unwrap_or_default();
    let mut conditions = previous.conditions.clone();
    let mut generations = previous.generations.clone();

    let desired = manifests::desired_resources(name, &klusterlet.spec);
    let namespace = klusterlet.spec.agent_namespace();

    let mut apply_errors: Vec<String> = Vec::new();
    for resource in &desired {
        let force = agent_deployment_drifted(client, namespace, resource, &generations).await?;
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

    // Prune the other install mode's leftovers.
    let desired_metas: Vec<_> = desired.iter().map(|r| r.related_meta()).collect();
    for resource in manifests::full_universe(name, &klusterlet.spec) {
        if !desired_metas.contains(&resource.related_meta()) {
            client.delete(&resource).await?;
        }
    }

    set_condition(
        &mut conditions,
        if apply_errors.is_empty() {
            Condition::new(
                CONDITION_APPLIED,
                ConditionStatus::True,
                REASON_APPLIED,
                "all agent components applied",
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

    let mut live_generations: HashMap<String, i64> = HashMap::new();
    let mut rolling = false;
    for resource in &desired {
        let ManagedResource::Deployment(_) = resource else {
            continue;
        };
        match client.get_deployment(namespace, &resource.name()).await? {
            Some(live) => {
                live_generations.insert(resource.name(), live.metadata.generation.unwrap_or(0));
                let generation = live.metadata.generation.unwrap_or(0);
                let desired_replicas =
                    live.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let settled = live
                    .status
                    .as_ref()
                    .map(|s| {
                        s.observed_generation.unwrap_or(0) >= generation
                            && s.available_replicas.unwrap_or(0) >= desired_replicas
                    })
                    .unwrap_or(false);
                if !settled {
                    rolling = true;
                }
            }
            None => rolling = true,
        }
    }

    let registration_agent = manifests::agent_deployment_name(name, klusterlet.spec.deploy_option.mode);

    let registration_available = client
        .get_deployment(namespace, &registration_agent)
        .await?
        .and_then(|d| d.status)
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    set_condition(
        &mut conditions,
        if registration_available == 0 {
            Condition::new(
                CONDITION_REGISTRATION_DEGRADED,
                ConditionStatus::True,
                REASON_UNAVAILABLE_REGISTRATION_AGENT,
                "no registration agent pod is ready",
            )
        } else {
            Condition::new(
                CONDITION_REGISTRATION_DEGRADED,
                ConditionStatus::False,
                REASON_REGISTRATION_AGENT_FUNCTIONAL,
                "registration agent is serving",
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
                "agent deployments are rolling out",
            )
        } else {
            Condition::new(
                CONDITION_PROGRESSING,
                ConditionStatus::False,
                REASON_UP_TO_DATE,
                "agent components are up to date",
            )
        },
    );

    let tuples_match = generations.iter().all(|g| {
        g.resource != "deployments" || live_generations.get(&g.name) == Some(&g.last_generation)
    });
    let observed_generation = if apply_errors.is_empty() && !rolling && tuples_match {
        klusterlet.metadata.generation
    } else {
        previous.observed_generation
    };

    Ok(KlusterletStatus {
        observed_generation,
        conditions,
        generations,
        related_resources: desired_metas,
    })
}

/// Whether an agent deployment's live generation moved past the recorded
/// one, which means someone edited it behind the reconciler's back
async fn agent_deployment_drifted(
    client: &dyn SpokeClient,
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

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use ocm_common::api::{KlusterletDeployOption, KlusterletInstallMode, KlusterletSpec};
    use ocm_common::conditions::{find_condition, is_condition_true};

    fn klusterlet(mode: KlusterletInstallMode) -> Klusterlet {
        let mut k = Klusterlet::new(
            "klusterlet",
            KlusterletSpec {
                cluster_name: "cluster1".to_string(),
                namespace: "test".to_string(),
                registration_image_pull_spec: "quay.io/ocm/registration:latest".to_string(),
                work_image_pull_spec: "quay.io/ocm/work:latest".to_string(),
                deploy_option: KlusterletDeployOption { mode },
                ..Default::default()
            },
        );
        k.metadata.generation = Some(2);
        k
    }

    fn ready_deployment(name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("test".to_string()),
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

    #[tokio::test]
    async fn healthy_agents_converge() {
        let mut client = MockSpokeClient::new();
        client
            .expect_apply()
            .times(9)
            .returning(|_, _| Ok(AppliedResource { changed: false, generation: 1 }));
        client
            .expect_get_deployment()
            .returning(|_, name| Ok(Some(ready_deployment(name))));
        // Singleton-mode leftovers are pruned on every pass.
        client.expect_delete().times(2).returning(|_| Ok(()));

        let k = klusterlet(KlusterletInstallMode::Default);
        let status = sync("klusterlet", &k, &client).await.unwrap();

        assert_eq!(status.related_resources.len(), 9);
        assert!(is_condition_true(&status.conditions, CONDITION_APPLIED));
        assert!(!is_condition_true(&status.conditions, CONDITION_PROGRESSING));
        assert_eq!(status.observed_generation, Some(2));
    }

    #[tokio::test]
    async fn missing_agent_deployment_is_progressing_and_degraded() {
        let mut client = MockSpokeClient::new();
        client
            .expect_apply()
            .returning(|_, _| Ok(AppliedResource { changed: true, generation: 1 }));
        client.expect_get_deployment().returning(|_, _| Ok(None));
        // Split-mode leftovers are pruned on every pass.
        client.expect_delete().times(4).returning(|_| Ok(()));

        let k = klusterlet(KlusterletInstallMode::Singleton);
        let status = sync("klusterlet", &k, &client).await.unwrap();

        assert_eq!(status.related_resources.len(), 7);
        assert!(is_condition_true(&status.conditions, CONDITION_PROGRESSING));
        let degraded = find_condition(&status.conditions, CONDITION_REGISTRATION_DEGRADED).unwrap();
        assert_eq!(degraded.status, ConditionStatus::True);
        assert_eq!(degraded.reason, REASON_UNAVAILABLE_REGISTRATION_AGENT);
        assert_eq!(status.observed_generation, None);
    }
}
