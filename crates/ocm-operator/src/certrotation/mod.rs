//! Certificate rotation engine
//!
//! Maintains three kinds of state under rolling renewal with an overlap
//! window:
//!
//! - the signing key pair in `signer-secret`, reminted when less than a
//!   fifth of its validity remains;
//! - the CA bundle in `ca-bundle-configmap`, the deduplicated union of every
//!   unexpired signing certificate (legacy signers stay until expiry so
//!   their serving certs remain verifiable);
//! - one serving secret per target, reminted when missing, unreadable,
//!   inside its own tail window, or signed by an issuer that left the bundle.
//!
//! Evaluation order per resync is fixed: signer, then bundle, then targets,
//! so verifiers always hold an issuer before they can see a cert signed by
//! it. All validity windows are plumbed in at construction; every decision
//! takes `now` explicitly so the rules can be exercised against a fabricated
//! clock.

use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::Api;
use kube::Client;
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use ocm_common::apply::ManagedResource;
use ocm_common::certs::{
    generate_signing_cert_key_pair, parse_cert_chain_pem, sign_serving_cert_key_pair, CertKeyPair,
    CertMeta,
};
use ocm_common::{
    Result, CA_BUNDLE_CONFIGMAP, CA_BUNDLE_KEY, HUB_NAMESPACE, SIGNER_SECRET, TLS_CERT_KEY,
    TLS_KEY_KEY,
};

/// Validity windows and resync cadence for one rotation engine instance
#[derive(Clone, Debug)]
pub struct CertRotationConfig {
    /// Signing certificate validity (S)
    pub signing_validity: Duration,
    /// Serving certificate validity (T), expected T << S
    pub target_validity: Duration,
    /// How often the rotation rules are evaluated
    pub resync_interval: StdDuration,
    /// Prefix for signing certificate common names
    pub signer_name_prefix: String,
}

impl Default for CertRotationConfig {
    fn default() -> Self {
        Self {
            signing_validity: Duration::days(90),
            target_validity: Duration::days(30),
            resync_interval: StdDuration::from_secs(60),
            signer_name_prefix: "cluster-manager-signer".to_string(),
        }
    }
}

/// One serving certificate the engine keeps fresh
#[derive(Clone, Debug)]
pub struct TargetCert {
    /// Secret the cert/key pair is written to
    pub secret_name: String,
    /// Subject common name of the serving certificate
    pub common_name: String,
    /// DNS names and IPs the certificate must cover
    pub hosts: Vec<String>,
}

/// The serving certificates of a ClusterManager's webhook servers
pub fn hub_targets(cm_name: &str) -> Vec<TargetCert> {
    let registration = format!("{}-registration-webhook", cm_name);
    let work = format!("{}-work-webhook", cm_name);
    vec![
        TargetCert {
            secret_name: "registration-webhook-serving-cert".to_string(),
            common_name: registration.clone(),
            hosts: vec![format!("{}.{}.svc", registration, HUB_NAMESPACE)],
        },
        TargetCert {
            secret_name: "work-webhook-serving-cert".to_string(),
            common_name: work.clone(),
            hosts: vec![format!("{}.{}.svc", work, HUB_NAMESPACE)],
        },
    ]
}

/// Storage seam for the rotation engine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertStore: Send + Sync {
    /// Fetch a secret by name, None when absent
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>>;

    /// Create or update a secret with the given data
    async fn apply_secret(&self, name: &str, data: BTreeMap<String, Vec<u8>>) -> Result<()>;

    /// Fetch a config map by name, None when absent
    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>>;

    /// Create or update a config map with the given data
    async fn apply_config_map(&self, name: &str, data: BTreeMap<String, String>) -> Result<()>;
}

/// CertStore backed by one namespace of a real cluster, writing through the
/// hash-comparing apply engine
pub struct KubeCertStore {
    client: Client,
    namespace: String,
    owner: String,
}

impl KubeCertStore {
    /// Create a store for the given namespace, labeling writes with `owner`
    pub fn new(client: Client, namespace: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            owner: owner.into(),
        }
    }
}

#[async_trait]
impl CertStore for KubeCertStore {
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_secret(&self, name: &str, data: BTreeMap<String, Vec<u8>>) -> Result<()> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(ocm_common::apply::owner_labels(&self.owner)),
                ..Default::default()
            },
            data: Some(data.into_iter().map(|(k, v)| (k, ByteString(v))).collect()),
            ..Default::default()
        };
        ManagedResource::Secret(secret).apply(&self.client).await?;
        Ok(())
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_config_map(&self, name: &str, data: BTreeMap<String, String>) -> Result<()> {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(ocm_common::apply::owner_labels(&self.owner)),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        ManagedResource::ConfigMap(config_map)
            .apply(&self.client)
            .await?;
        Ok(())
    }
}

/// The rotation engine for one signer and its serving certificates
pub struct CertRotationController<S: CertStore> {
    store: S,
    config: CertRotationConfig,
    targets: Vec<TargetCert>,
}

impl<S: CertStore> CertRotationController<S> {
    /// Create an engine over the given store, config and targets
    pub fn new(store: S, config: CertRotationConfig, targets: Vec<TargetCert>) -> Self {
        Self {
            store,
            config,
            targets,
        }
    }

    /// Evaluate every rotation rule once at the given instant.
    ///
    /// Individual target failures do not stop the pass; the first error is
    /// returned so the caller retries at the resync cadence.
    pub async fn rotate_once(&self, now: DateTime<Utc>) -> Result<()> {
        let signer = self.ensure_signer(now).await?;
        let bundle = self.ensure_ca_bundle(now, &signer).await?;

        let mut first_error = None;
        for target in &self.targets {
            if let Err(e) = self.ensure_target(now, &signer, &bundle, target).await {
                error!(target = %target.secret_name, error = %e, "serving cert rotation failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run the engine until the process exits
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.resync_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.rotate_once(Utc::now()).await {
                warn!(error = %e, "cert rotation pass failed");
            }
        }
    }

    /// R1: keep a signing key pair with more than S/5 of its life left
    async fn ensure_signer(&self, now: DateTime<Utc>) -> Result<CertKeyPair> {
        if let Some(secret) = self.store.get_secret(SIGNER_SECRET).await? {
            if let Some(pair) = pair_from_secret(&secret) {
                if let Ok(metas) = parse_cert_chain_pem(pair.cert_pem.as_bytes()) {
                    let meta = &metas[0];
                    if meta.is_valid_at(now) && meta.remaining(now) > self.config.signing_validity / 5
                    {
                        return Ok(pair);
                    }
                }
            }
        }

        let signer_name = format!("{}@{}", self.config.signer_name_prefix, now.timestamp());
        info!(signer = %signer_name, "minting signing certificate");
        let pair = generate_signing_cert_key_pair(
            &signer_name,
            now,
            now + self.config.signing_validity,
        )?;
        self.store
            .apply_secret(
                SIGNER_SECRET,
                BTreeMap::from([
                    (TLS_CERT_KEY.to_string(), pair.cert_pem.clone().into_bytes()),
                    (TLS_KEY_KEY.to_string(), pair.key_pem.clone().into_bytes()),
                ]),
            )
            .await?;
        Ok(pair)
    }

    /// R2: publish the union of every unexpired signing cert.
    ///
    /// A missing or unreadable bundle is treated as empty and rebuilt.
    async fn ensure_ca_bundle(
        &self,
        now: DateTime<Utc>,
        signer: &CertKeyPair,
    ) -> Result<Vec<CertMeta>> {
        let existing = self
            .store
            .get_config_map(CA_BUNDLE_CONFIGMAP)
            .await?
            .and_then(|cm| cm.data)
            .and_then(|d| d.get(CA_BUNDLE_KEY).cloned())
            .unwrap_or_default();

        // Active signer first, then every still-valid legacy signer.
        let mut bundle_pems: Vec<String> = vec![signer.cert_pem.trim().to_string()];
        let mut metas = parse_cert_chain_pem(signer.cert_pem.as_bytes())?;

        for block in ::pem::parse_many(existing.as_bytes()).unwrap_or_default() {
            let block_pem = ::pem::encode_config(
                &block,
                ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF),
            );
            let Ok(parsed) = parse_cert_chain_pem(block_pem.as_bytes()) else {
                continue;
            };
            let meta = parsed.into_iter().next().expect("one block parses to one cert");
            if !meta.is_valid_at(now) {
                debug!(signer = %meta.subject_common_name, "dropping expired signer from bundle");
                continue;
            }
            if metas.iter().any(|m| m.fingerprint == meta.fingerprint) {
                continue;
            }
            bundle_pems.push(block_pem.trim().to_string());
            metas.push(meta);
        }

        let bundle = format!("{}\n", bundle_pems.join("\n"));
        if existing != bundle {
            info!(signers = metas.len(), "updating CA bundle");
            self.store
                .apply_config_map(
                    CA_BUNDLE_CONFIGMAP,
                    BTreeMap::from([(CA_BUNDLE_KEY.to_string(), bundle)]),
                )
                .await?;
        }
        Ok(metas)
    }

    /// R3: remint a serving cert that is missing, unreadable, in its tail
    /// window, or whose issuer has left the bundle
    async fn ensure_target(
        &self,
        now: DateTime<Utc>,
        signer: &CertKeyPair,
        bundle: &[CertMeta],
        target: &TargetCert,
    ) -> Result<()> {
        if let Some(secret) = self.store.get_secret(&target.secret_name).await? {
            if let Some(pair) = pair_from_secret(&secret) {
                if let Ok(metas) = parse_cert_chain_pem(pair.cert_pem.as_bytes()) {
                    let meta = &metas[0];
                    let issuer_present = bundle.iter().any(|b| {
                        b.subject_common_name == meta.issuer_common_name && b.is_valid_at(now)
                    });
                    if meta.is_valid_at(now)
                        && meta.remaining(now) > self.config.target_validity / 5
                        && issuer_present
                    {
                        return Ok(());
                    }
                }
            }
        }

        info!(target = %target.secret_name, "minting serving certificate");
        let pair = sign_serving_cert_key_pair(
            signer,
            &target.common_name,
            &target.hosts,
            now,
            now + self.config.target_validity,
        )?;
        self.store
            .apply_secret(
                &target.secret_name,
                BTreeMap::from([
                    (TLS_CERT_KEY.to_string(), pair.cert_pem.into_bytes()),
                    (TLS_KEY_KEY.to_string(), pair.key_pem.into_bytes()),
                ]),
            )
            .await
    }
}

fn pair_from_secret(secret: &Secret) -> Option<CertKeyPair> {
    let data = secret.data.as_ref()?;
    let cert = data.get(TLS_CERT_KEY)?;
    let key = data.get(TLS_KEY_KEY)?;
    Some(CertKeyPair {
        cert_pem: String::from_utf8(cert.0.clone()).ok()?,
        key_pem: String::from_utf8(key.0.clone()).ok()?,
    })
}
