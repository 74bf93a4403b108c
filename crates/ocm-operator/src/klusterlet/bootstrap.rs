//! Rebootstrap controller
//!
//! Watches the bootstrap credential, the durable hub identity secret and the
//! agent deployment. When the identity is lost (embedded client certificate
//! expired) or stale (bootstrap endpoint no longer matches the endpoint the
//! identity was minted against), the spoke is driven back to the bootstrap
//! state in a fixed order: mark `RebootstrapProgressing`, scale the agent to
//! zero, wait until no replica is available, then delete the identity secret
//! and clear the condition. Deleting the secret while the agent still runs
//! would race with the agent re-persisting stale state, so the ordering is
//! mandatory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use ocm_common::api::Klusterlet;
use ocm_common::conditions::{is_condition_true, set_condition, Condition, ConditionStatus};
use ocm_common::kubeconfig::{parse_kubeconfig, server_and_proxy};
use ocm_common::{
    certs, Result, BOOTSTRAP_HUB_KUBECONFIG, HUB_KUBECONFIG_SECRET, KUBECONFIG_KEY, TLS_CERT_KEY,
};

/// Condition type set while a spoke is being driven back to bootstrap
pub const CONDITION_REBOOTSTRAP_PROGRESSING: &str = "RebootstrapProgressing";
/// Reason while the rebootstrap sequence is running
pub const REASON_REBOOTSTRAP_STARTED: &str = "RebootstrapStarted";
/// Reason once the identity secret is gone and the sequence completed
pub const REASON_REBOOTSTRAP_COMPLETED: &str = "RebootstrapCompleted";

/// Trait abstracting the agent-namespace operations of the controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AgentNamespaceClient: Send + Sync {
    /// Fetch a secret, None when absent
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Delete a secret; absent secrets are a no-op
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    /// Fetch a deployment, None when absent
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Set a deployment's replica count
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct AgentNamespaceClientImpl {
    client: Client,
}

impl AgentNamespaceClientImpl {
    /// Create a new implementation wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentNamespaceClient for AgentNamespaceClientImpl {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Outcome of one rebootstrap pass
#[derive(Clone, Debug)]
pub struct RebootstrapOutcome {
    /// Updated condition list to publish on the Klusterlet
    pub conditions: Vec<Condition>,
    /// Whether the controller should requeue soon to finish the sequence
    pub requeue: bool,
}

impl RebootstrapOutcome {
    /// Whether the rebootstrap sequence is in flight after this pass
    pub fn rebootstrapping(&self) -> bool {
        is_condition_true(&self.conditions, CONDITION_REBOOTSTRAP_PROGRESSING)
    }
}

/// One pass of the rebootstrap controller for a single Klusterlet
pub async fn sync(
    klusterlet: &Klusterlet,
    client: &dyn AgentNamespaceClient,
) -> Result<RebootstrapOutcome> {
    let name = klusterlet.name_any();
    let namespace = klusterlet.spec.agent_namespace();
    let agent = super::manifests::agent_deployment_name(&name, klusterlet.spec.deploy_option.mode);

    let mut conditions = klusterlet
        .status
        .clone()
        .unwrap_or_default()
        .conditions;

    if is_condition_true(&conditions, CONDITION_REBOOTSTRAP_PROGRESSING) {
        return finish_rebootstrap(namespace, &agent, client, conditions).await;
    }

    // Not rebootstrapping: decide whether the identity warrants it.
    let Some(hub_secret) = client.get_secret(namespace, HUB_KUBECONFIG_SECRET).await? else {
        // Bootstrap has not produced an identity yet, nothing to supervise.
        return Ok(RebootstrapOutcome {
            conditions,
            requeue: false,
        });
    };

    let bootstrap_secret = client.get_secret(namespace, BOOTSTRAP_HUB_KUBECONFIG).await?;
    if let Some(reason) = rebootstrap_trigger(&hub_secret, bootstrap_secret.as_ref()) {
        info!(klusterlet = %name, trigger = %reason, "starting rebootstrap");
        set_condition(
            &mut conditions,
            Condition::new(
                CONDITION_REBOOTSTRAP_PROGRESSING,
                ConditionStatus::True,
                REASON_REBOOTSTRAP_STARTED,
                reason,
            ),
        );
        return Ok(RebootstrapOutcome {
            conditions,
            requeue: true,
        });
    }

    Ok(RebootstrapOutcome {
        conditions,
        requeue: false,
    })
}

/// Scale down, wait, then discard the identity and clear the condition
async fn finish_rebootstrap(
    namespace: &str,
    agent: &str,
    client: &dyn AgentNamespaceClient,
    mut conditions: Vec<Condition>,
) -> Result<RebootstrapOutcome> {
    if let Some(deployment) = client.get_deployment(namespace, agent).await? {
        let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        if desired != 0 {
            info!(deployment = %agent, "scaling agent down for rebootstrap");
            client.scale_deployment(namespace, agent, 0).await?;
            return Ok(RebootstrapOutcome {
                conditions,
                requeue: true,
            });
        }
        let available = deployment
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        if available > 0 {
            // Still draining; deleting the secret now would race with the
            // agent re-persisting stale state.
            return Ok(RebootstrapOutcome {
                conditions,
                requeue: true,
            });
        }
    }

    client.delete_secret(namespace, HUB_KUBECONFIG_SECRET).await?;
    set_condition(
        &mut conditions,
        Condition::new(
            CONDITION_REBOOTSTRAP_PROGRESSING,
            ConditionStatus::False,
            REASON_REBOOTSTRAP_COMPLETED,
            "hub identity discarded, agent will bootstrap again",
        ),
    );
    Ok(RebootstrapOutcome {
        conditions,
        requeue: false,
    })
}

/// Decide whether the hub identity must be discarded.
///
/// Returns the human-readable trigger, or None when the identity is still
/// usable. Kubeconfigs are compared by parsed server and proxy URL, so
/// whitespace-only differences are inert.
fn rebootstrap_trigger(hub_secret: &Secret, bootstrap_secret: Option<&Secret>) -> Option<String> {
    let hub_data = hub_secret.data.as_ref();

    // An identity without a parseable, unexpired client certificate is lost.
    match hub_data.and_then(|d| d.get(TLS_CERT_KEY)) {
        Some(cert) => match certs::parse_cert_chain_pem(&cert.0) {
            Ok(metas) => {
                let now = chrono::Utc::now();
                if metas.iter().any(|m| !m.is_valid_at(now)) {
                    return Some("hub client certificate is expired".to_string());
                }
            }
            Err(_) => return Some("hub client certificate is unreadable".to_string()),
        },
        None => return Some("hub identity secret has no client certificate".to_string()),
    }

    // Endpoint drift: the bootstrap credential points somewhere else than
    // the identity was minted against.
    let bootstrap_endpoint = bootstrap_secret
        .and_then(|s| s.data.as_ref())
        .and_then(|d| d.get(KUBECONFIG_KEY))
        .and_then(|raw| parse_kubeconfig(&raw.0).ok())
        .and_then(|config| server_and_proxy(&config).ok());
    let hub_endpoint = hub_data
        .and_then(|d| d.get(KUBECONFIG_KEY))
        .and_then(|raw| parse_kubeconfig(&raw.0).ok())
        .and_then(|config| server_and_proxy(&config).ok());

    match (bootstrap_endpoint, hub_endpoint) {
        (Some((bootstrap_server, bootstrap_proxy)), Some((hub_server, hub_proxy))) => {
            if bootstrap_server != hub_server {
                return Some(format!(
                    "hub server URL changed from {} to {}",
                    hub_server, bootstrap_server
                ));
            }
            if bootstrap_proxy != hub_proxy {
                return Some("hub proxy URL changed".to_string());
            }
            None
        }
        // Without both endpoints there is nothing to compare.
        _ => None,
    }
}

/// Run the rebootstrap controller on a resync loop.
///
/// The reconcile surface is a single Klusterlet per pass; enqueues are
/// deduplicated by the kube runtime at the watch layer, this loop is the
/// timed fallback.
pub async fn run(
    klusterlets: Api<Klusterlet>,
    client: Arc<dyn AgentNamespaceClient>,
    resync: Duration,
) {
    let mut interval = tokio::time::interval(resync);
    loop {
        interval.tick().await;
        let list = match klusterlets.list(&Default::default()).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "failed to list klusterlets");
                continue;
            }
        };
        for klusterlet in list {
            let name = klusterlet.name_any();
            match sync(&klusterlet, client.as_ref()).await {
                Ok(outcome) => {
                    let patch = serde_json::json!({
                        "status": { "conditions": outcome.conditions }
                    });
                    if let Err(e) = klusterlets
                        .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                        .await
                    {
                        warn!(klusterlet = %name, error = %e, "failed to patch conditions");
                    }
                }
                Err(e) => warn!(klusterlet = %name, error = %e, "rebootstrap sync failed"),
            }
        }
    }
}
