//! Test fixtures shared across the workspace test suites
//!
//! Fabricated certificates, kubeconfigs, secrets and deployments with
//! controllable validity windows. Production code never calls into this
//! module.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

use crate::certs::{
    generate_signing_cert_key_pair, sign_client_csr, CertKeyPair, ClientCertRequest,
};
use crate::kubeconfig::{build_kubeconfig, serialize_kubeconfig};
use crate::{KUBECONFIG_KEY, TLS_CERT_KEY, TLS_KEY_KEY};

/// A fabricated client certificate and its private key, both PEM
#[derive(Clone, Debug)]
pub struct TestCert {
    /// PEM certificate bytes
    pub cert: Vec<u8>,
    /// PEM private key bytes
    pub key: Vec<u8>,
}

/// Mint a client certificate with the given subject common name, valid for
/// `ttl_secs` from now. A negative TTL produces an already-expired cert.
pub fn new_test_cert(common_name: &str, ttl_secs: i64) -> TestCert {
    let now = Utc::now();
    let (not_before, not_after) = if ttl_secs >= 0 {
        (now - Duration::seconds(60), now + Duration::seconds(ttl_secs))
    } else {
        (now + Duration::seconds(2 * ttl_secs), now + Duration::seconds(ttl_secs))
    };
    new_test_cert_in_window(common_name, not_before, not_after)
}

/// Mint a client certificate with an explicit validity window
pub fn new_test_cert_in_window(
    common_name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> TestCert {
    let signer = test_signer();
    let request = ClientCertRequest::new(common_name, &[]).expect("generate test key pair");
    let cert_pem = sign_client_csr(&signer, request.csr_pem(), not_before, not_after)
        .expect("sign test cert");
    TestCert {
        cert: cert_pem.into_bytes(),
        key: request.private_key_pem().as_bytes().to_vec(),
    }
}

/// A signing certificate test fixture valid for one hour
pub fn test_signer() -> CertKeyPair {
    let now = Utc::now();
    generate_signing_cert_key_pair("open-cluster-management.io", now - Duration::seconds(60), now + Duration::seconds(3600))
        .expect("generate test signer")
}

/// Serialized kubeconfig bytes pointing at `server`, optionally via a proxy
pub fn new_kubeconfig(server: &str, proxy_url: Option<&str>) -> Vec<u8> {
    let config = build_kubeconfig(server, None, proxy_url, TLS_CERT_KEY, TLS_KEY_KEY);
    serialize_kubeconfig(&config).expect("serialize test kubeconfig")
}

/// A secret with the given data map
pub fn new_secret(name: &str, namespace: &str, data: BTreeMap<String, Vec<u8>>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v)))
                .collect(),
        ),
        ..Default::default()
    }
}

/// A hub kubeconfig secret whose embedded cert expires `ttl_secs` from now.
///
/// The embedded kubeconfig points at `server`; `cert` defaults to a fresh
/// test certificate when not supplied.
pub fn new_hub_kubeconfig_secret(
    namespace: &str,
    server: &str,
    common_name: &str,
    ttl_secs: i64,
) -> Secret {
    let cert = new_test_cert(common_name, ttl_secs);
    new_secret(
        crate::HUB_KUBECONFIG_SECRET,
        namespace,
        BTreeMap::from([
            (KUBECONFIG_KEY.to_string(), new_kubeconfig(server, None)),
            (TLS_CERT_KEY.to_string(), cert.cert),
            (TLS_KEY_KEY.to_string(), cert.key),
        ]),
    )
}

/// A deployment reporting the given number of available replicas
pub fn new_deployment_with_available_replicas(
    name: &str,
    namespace: &str,
    available_replicas: i32,
) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        status: Some(DeploymentStatus {
            available_replicas: Some(available_replicas),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::parse_cert_chain_pem;

    #[test]
    fn test_cert_honors_ttl() {
        let fresh = new_test_cert("test", 60);
        let meta = &parse_cert_chain_pem(&fresh.cert).unwrap()[0];
        assert!(meta.is_valid_at(Utc::now()));
        assert_eq!(meta.subject_common_name, "test");

        let expired = new_test_cert("test", -60);
        let meta = &parse_cert_chain_pem(&expired.cert).unwrap()[0];
        assert!(!meta.is_valid_at(Utc::now()));
    }

    #[test]
    fn hub_kubeconfig_secret_has_identity_keys() {
        let secret = new_hub_kubeconfig_secret("test", "https://10.0.118.47:6443", "test", 60);
        let data = secret.data.unwrap();
        assert!(data.contains_key(KUBECONFIG_KEY));
        assert!(data.contains_key(TLS_CERT_KEY));
        assert!(data.contains_key(TLS_KEY_KEY));
    }
}
