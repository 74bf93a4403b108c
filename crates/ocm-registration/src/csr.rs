//! Signing-request exchange with the hub
//!
//! The signing authority is an external collaborator: the spoke creates a
//! `CertificateSigningRequest` carrying its PEM CSR, polls for the
//! `Approved` condition, and reads the issued certificate back from
//! `status.certificate`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use ocm_common::error::Error;
use ocm_common::Result;

/// Label carrying the spoke cluster name on its signing requests
pub const CLUSTER_NAME_LABEL: &str = "open-cluster-management.io/cluster-name";

/// A signing request as the spoke constructs it
#[derive(Clone, Debug)]
pub struct CsrSpec {
    /// Prefix for the server-generated request name
    pub name_prefix: String,
    /// Labels stamped on the request (cluster name, at minimum)
    pub labels: BTreeMap<String, String>,
    /// The PEM-encoded certificate signing request
    pub csr_pem: String,
    /// Signer the request is addressed to
    pub signer_name: String,
    /// Requested certificate lifetime in seconds
    pub expiration_seconds: Option<i32>,
}

/// Trait abstracting the signing-request operations against the hub
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CsrControl: Send + Sync {
    /// Create a signing request; returns the server-assigned name
    async fn create(&self, spec: &CsrSpec) -> Result<String>;

    /// Whether the named request carries an `Approved` condition
    async fn is_approved(&self, name: &str) -> Result<bool>;

    /// The issued certificate, once the authority attached one
    async fn issued_certificate(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// CsrControl over the certificates/v1 API
pub struct V1CsrControl {
    api: Api<CertificateSigningRequest>,
}

impl V1CsrControl {
    /// Create a control over the given hub client
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl CsrControl for V1CsrControl {
    async fn create(&self, spec: &CsrSpec) -> Result<String> {
        let csr = CertificateSigningRequest {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", spec.name_prefix)),
                labels: Some(spec.labels.clone()),
                ..Default::default()
            },
            spec: CertificateSigningRequestSpec {
                request: ByteString(spec.csr_pem.clone().into_bytes()),
                signer_name: spec.signer_name.clone(),
                usages: Some(vec![
                    "digital signature".to_string(),
                    "key encipherment".to_string(),
                    "client auth".to_string(),
                ]),
                expiration_seconds: spec.expiration_seconds,
                ..Default::default()
            },
            status: None,
        };
        let created = self.api.create(&PostParams::default(), &csr).await?;
        created
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::internal_with_context("csr", "created CSR has no name"))
    }

    async fn is_approved(&self, name: &str) -> Result<bool> {
        let csr = self.api.get(name).await?;
        Ok(csr_approved(&csr))
    }

    async fn issued_certificate(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let csr = self.api.get(name).await?;
        Ok(csr
            .status
            .and_then(|s| s.certificate)
            .map(|c| c.0)
            .filter(|c| !c.is_empty()))
    }
}

/// Whether a signing request carries a true `Approved` condition
pub fn csr_approved(csr: &CertificateSigningRequest) -> bool {
    csr.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Approved" && c.status == "True")
        })
        .unwrap_or(false)
}

/// A name for the spoke's signing requests, scoped by cluster
pub fn csr_name_prefix(cluster_name: &str) -> String {
    cluster_name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::certificates::v1::{
        CertificateSigningRequestCondition, CertificateSigningRequestStatus,
    };

    fn csr_with_conditions(
        conditions: Option<Vec<CertificateSigningRequestCondition>>,
    ) -> CertificateSigningRequest {
        CertificateSigningRequest {
            metadata: ObjectMeta {
                name: Some("cluster1-abc".to_string()),
                ..Default::default()
            },
            spec: CertificateSigningRequestSpec::default(),
            status: Some(CertificateSigningRequestStatus {
                conditions,
                ..Default::default()
            }),
        }
    }

    fn condition(type_: &str, status: &str) -> CertificateSigningRequestCondition {
        CertificateSigningRequestCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn pending_csr_is_not_approved() {
        let csr = csr_with_conditions(None);
        assert!(!csr_approved(&csr));
    }

    #[test]
    fn denied_csr_is_not_approved() {
        let csr = csr_with_conditions(Some(vec![condition("Denied", "True")]));
        assert!(!csr_approved(&csr));
    }

    #[test]
    fn approved_csr_is_approved() {
        let csr = csr_with_conditions(Some(vec![condition("Approved", "True")]));
        assert!(csr_approved(&csr));
    }

    #[test]
    fn approved_false_does_not_count() {
        let csr = csr_with_conditions(Some(vec![condition("Approved", "False")]));
        assert!(!csr_approved(&csr));
    }
}
