//! Spoke registration state machine
//!
//! Drives the spoke through `Unregistered -> Bootstrapping ->
//! AwaitingApproval -> Registered`. Bootstrapping opens a signing request on
//! the hub whose subject is the exact agent identity; once the hub approves
//! and attaches a certificate, the spoke materializes the durable
//! `hub-kubeconfig-secret` in one write. Renewal re-enters the request flow
//! before a fifth of the issued lifetime remains and atomically replaces the
//! cert/key pair. Rebootstrapping is driven from the outside by the
//! operator's rebootstrap controller, which discards the identity secret;
//! this state machine then observes the missing identity and bootstraps
//! again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::Api;
use kube::Client;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use ocm_common::certs::ClientCertRequest;
use ocm_common::error::Error;
use ocm_common::kubeconfig::{certificate_authority_data, serialize_kubeconfig, server_and_proxy};
use ocm_common::{
    agent_common_name, Result, AGENT_USER_GROUP, HUB_KUBECONFIG_SECRET,
    KUBE_APISERVER_CLIENT_SIGNER, KUBECONFIG_KEY, TLS_CERT_KEY, TLS_KEY_KEY,
};

use crate::clientcert::{
    build_hub_kubeconfig, cert_validity_period, has_valid_hub_kubeconfig, is_certificate_valid,
};
use crate::csr::{CsrControl, CsrSpec, CLUSTER_NAME_LABEL};

/// Secret data key echoing the cluster name the identity was minted for
pub const CLUSTER_NAME_DATA_KEY: &str = "cluster-name";

/// Secret data key echoing the agent name the identity was minted for
pub const AGENT_NAME_DATA_KEY: &str = "agent-name";

/// Where a spoke currently stands in the registration protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationState {
    /// No identity and no bootstrap credential to acquire one with
    Unregistered,
    /// A signing request was just opened with the bootstrap credential
    Bootstrapping,
    /// Waiting for the hub to approve the signing request
    AwaitingApproval,
    /// A valid hub identity is held (renewal may be in flight)
    Registered,
    /// The operator is tearing the identity down; set by the rebootstrap
    /// controller, never by this state machine
    Rebootstrapping,
}

/// Options of the spoke registration agent
#[derive(Clone, Debug)]
pub struct SpokeAgentOptions {
    /// Path to the bootstrap kubeconfig (required)
    pub bootstrap_kubeconfig: String,
    /// Name of the durable identity secret
    pub hub_kubeconfig_secret: String,
    /// Period between spoke health re-checks
    pub cluster_healthcheck_period: Duration,
    /// Upper bound on custom cluster claims exposed to the hub
    pub max_custom_cluster_claims: usize,
    /// Requested client certificate lifetime in seconds (0 = signer default)
    pub client_cert_expiration_seconds: i32,
    /// Endpoints on the spoke reachable from the hub
    pub spoke_external_server_urls: Vec<String>,
}

impl Default for SpokeAgentOptions {
    fn default() -> Self {
        Self {
            bootstrap_kubeconfig: String::new(),
            hub_kubeconfig_secret: HUB_KUBECONFIG_SECRET.to_string(),
            cluster_healthcheck_period: Duration::from_secs(60),
            max_custom_cluster_claims: 20,
            client_cert_expiration_seconds: 0,
            spoke_external_server_urls: Vec::new(),
        }
    }
}

impl SpokeAgentOptions {
    /// Validate the options before the agent starts
    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_kubeconfig.is_empty() {
            return Err(Error::validation("spoke-agent", "bootstrap-kubeconfig is required"));
        }
        for url in &self.spoke_external_server_urls {
            if !is_valid_https_url(url) {
                return Err(Error::validation(
                    "spoke-agent",
                    format!("\"{}\" is invalid", url),
                ));
            }
        }
        if self.cluster_healthcheck_period.is_zero() {
            return Err(Error::validation(
                "spoke-agent",
                "cluster healthcheck period must be greater than zero",
            ));
        }
        if self.client_cert_expiration_seconds != 0 && self.client_cert_expiration_seconds < 3600 {
            return Err(Error::validation(
                "spoke-agent",
                "client certificate expiration seconds must be greater or equal to 3600",
            ));
        }
        Ok(())
    }
}

fn is_valid_https_url(url: &str) -> bool {
    url.strip_prefix("https://")
        .map(|rest| !rest.is_empty())
        .unwrap_or(false)
}

/// A random eight-character agent name
pub fn generate_agent_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Hub endpoint details extracted from the bootstrap credential
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    /// Hub API server URL
    pub server: String,
    /// Proxy in front of the hub, if any
    pub proxy_url: Option<String>,
    /// CA bundle verifying the hub endpoint
    pub ca_data: Option<Vec<u8>>,
}

impl BootstrapConfig {
    /// Extract the endpoint from a parsed bootstrap kubeconfig
    pub fn from_kubeconfig(config: &kube::config::Kubeconfig) -> Result<Self> {
        let (server, proxy_url) = server_and_proxy(config)?;
        Ok(Self {
            server,
            proxy_url,
            ca_data: certificate_authority_data(config)?,
        })
    }
}

/// Trait abstracting the spoke-side identity secret access
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpokeSecretStore: Send + Sync {
    /// Fetch the hub identity secret, None when absent
    async fn get_hub_kubeconfig_secret(&self) -> Result<Option<Secret>>;

    /// Create or replace the hub identity secret in one write
    async fn apply_hub_kubeconfig_secret(&self, data: BTreeMap<String, Vec<u8>>) -> Result<()>;
}

/// SpokeSecretStore over the agent namespace of a real cluster
pub struct SpokeSecretStoreImpl {
    client: Client,
    namespace: String,
    secret_name: String,
}

impl SpokeSecretStoreImpl {
    /// Create a store for the given agent namespace
    pub fn new(client: Client, namespace: impl Into<String>, secret_name: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            secret_name: secret_name.into(),
        }
    }
}

#[async_trait]
impl SpokeSecretStore for SpokeSecretStoreImpl {
    async fn get_hub_kubeconfig_secret(&self) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api.get_opt(&self.secret_name).await?)
    }

    async fn apply_hub_kubeconfig_secret(&self, data: BTreeMap<String, Vec<u8>>) -> Result<()> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            data: Some(data.into_iter().map(|(k, v)| (k, ByteString(v))).collect()),
            ..Default::default()
        };
        ocm_common::apply::ManagedResource::Secret(secret)
            .apply(&self.client)
            .await?;
        Ok(())
    }
}

struct PendingCsr {
    name: String,
    key_pem: String,
}

/// The client certificate state machine of one spoke agent
pub struct ClientCertController {
    cluster_name: String,
    agent_name: String,
    bootstrap: Option<BootstrapConfig>,
    store: Arc<dyn SpokeSecretStore>,
    csr_control: Arc<dyn CsrControl>,
    expiration_seconds: Option<i32>,
    pending: tokio::sync::Mutex<Option<PendingCsr>>,
}

impl ClientCertController {
    /// Create a controller for the given identity
    pub fn new(
        cluster_name: impl Into<String>,
        agent_name: impl Into<String>,
        bootstrap: Option<BootstrapConfig>,
        store: Arc<dyn SpokeSecretStore>,
        csr_control: Arc<dyn CsrControl>,
        expiration_seconds: Option<i32>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            agent_name: agent_name.into(),
            bootstrap,
            store,
            csr_control,
            expiration_seconds,
            pending: tokio::sync::Mutex::new(None),
        }
    }

    /// The identity this spoke presents to the hub
    pub fn common_name(&self) -> String {
        agent_common_name(&self.cluster_name, &self.agent_name)
    }

    /// One pass of the state machine; returns the state after the pass
    pub async fn sync(&self, now: DateTime<Utc>) -> Result<RegistrationState> {
        let common_name = self.common_name();
        let secret = self.store.get_hub_kubeconfig_secret().await?;

        let valid = secret
            .as_ref()
            .map(|s| has_valid_hub_kubeconfig(s, Some(&common_name)))
            .unwrap_or(false);
        let fresh = valid
            && secret
                .as_ref()
                .and_then(|s| cert_validity_period(s).ok())
                .map(|(not_before, not_after)| (not_after - now) > (not_after - not_before) / 5)
                .unwrap_or(false);

        if fresh {
            *self.pending.lock().await = None;
            return Ok(RegistrationState::Registered);
        }

        let mut pending = self.pending.lock().await;
        if let Some(request) = pending.as_ref() {
            if self.csr_control.is_approved(&request.name).await? {
                match self.csr_control.issued_certificate(&request.name).await? {
                    Some(cert) if is_certificate_valid(&cert, Some(&common_name)) => {
                        self.persist_identity(&cert, &request.key_pem).await?;
                        info!(identity = %common_name, "hub identity materialized");
                        *pending = None;
                        return Ok(RegistrationState::Registered);
                    }
                    Some(_) => {
                        // Issued for the wrong subject: discard and reissue.
                        warn!(request = %request.name, "issued certificate does not match identity");
                        *pending = None;
                    }
                    None => {
                        return Ok(self.waiting_state(valid));
                    }
                }
            } else {
                return Ok(self.waiting_state(valid));
            }
        }

        if self.bootstrap.is_none() && !valid {
            return Ok(RegistrationState::Unregistered);
        }

        let request = ClientCertRequest::new(
            &common_name,
            &[
                AGENT_USER_GROUP.to_string(),
                format!("{}:{}", AGENT_USER_GROUP, self.cluster_name),
            ],
        )?;
        let name = self
            .csr_control
            .create(&CsrSpec {
                name_prefix: self.cluster_name.clone(),
                labels: BTreeMap::from([(
                    CLUSTER_NAME_LABEL.to_string(),
                    self.cluster_name.clone(),
                )]),
                csr_pem: request.csr_pem().to_string(),
                signer_name: KUBE_APISERVER_CLIENT_SIGNER.to_string(),
                expiration_seconds: self.expiration_seconds,
            })
            .await?;
        info!(request = %name, identity = %common_name, "signing request opened");
        *pending = Some(PendingCsr {
            name,
            key_pem: request.private_key_pem().to_string(),
        });

        Ok(if valid {
            // Renewal: the old identity keeps serving until the new one lands.
            RegistrationState::Registered
        } else {
            RegistrationState::Bootstrapping
        })
    }

    fn waiting_state(&self, still_valid: bool) -> RegistrationState {
        if still_valid {
            RegistrationState::Registered
        } else {
            RegistrationState::AwaitingApproval
        }
    }

    /// Write the minted identity: kubeconfig, cert, key and the identity
    /// echo keys, all in one apply so renewal swaps cert and key atomically.
    async fn persist_identity(&self, cert_pem: &[u8], key_pem: &str) -> Result<()> {
        let bootstrap = self.bootstrap.as_ref().ok_or_else(|| {
            Error::internal_with_context("registration", "no bootstrap endpoint to persist against")
        })?;
        let kubeconfig = build_hub_kubeconfig(
            &bootstrap.server,
            bootstrap.ca_data.as_deref(),
            bootstrap.proxy_url.as_deref(),
        );
        let data = BTreeMap::from([
            (KUBECONFIG_KEY.to_string(), serialize_kubeconfig(&kubeconfig)?),
            (TLS_CERT_KEY.to_string(), cert_pem.to_vec()),
            (TLS_KEY_KEY.to_string(), key_pem.as_bytes().to_vec()),
            (
                CLUSTER_NAME_DATA_KEY.to_string(),
                self.cluster_name.clone().into_bytes(),
            ),
            (
                AGENT_NAME_DATA_KEY.to_string(),
                self.agent_name.clone().into_bytes(),
            ),
        ]);
        self.store.apply_hub_kubeconfig_secret(data).await
    }
}
