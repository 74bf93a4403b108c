//! Validity checks on the hub identity secret
//!
//! A hub kubeconfig is usable iff the kubeconfig parses, the private key is
//! present, the client certificate parses, is inside its validity window,
//! and was issued for the exact identity this agent runs as. Failing any
//! clause forces a return to bootstrap.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::config::Kubeconfig;
use tracing::debug;

use ocm_common::certs::parse_cert_chain_pem;
use ocm_common::error::Error;
use ocm_common::kubeconfig::{build_kubeconfig, parse_kubeconfig};
use ocm_common::{Result, KUBECONFIG_KEY, TLS_CERT_KEY, TLS_KEY_KEY};

/// Check that a client certificate parses, is currently valid, and (when an
/// expected identity is given) was issued for that common name.
pub fn is_certificate_valid(cert_pem: &[u8], expected_common_name: Option<&str>) -> bool {
    let metas = match parse_cert_chain_pem(cert_pem) {
        Ok(metas) => metas,
        Err(e) => {
            debug!(error = %e, "client certificate is unreadable");
            return false;
        }
    };

    let now = Utc::now();
    if metas.iter().any(|m| !m.is_valid_at(now)) {
        debug!("client certificate is outside its validity window");
        return false;
    }

    match expected_common_name {
        Some(expected) if metas[0].subject_common_name != expected => {
            debug!(
                subject = %metas[0].subject_common_name,
                expected = %expected,
                "client certificate issued for a different identity"
            );
            false
        }
        _ => true,
    }
}

/// Check whether a hub kubeconfig secret holds a usable identity.
///
/// Clauses, in order: the secret has data; the `kubeconfig` entry parses;
/// the `tls.key` entry exists; the `tls.crt` entry exists and passes
/// [`is_certificate_valid`] against the expected subject.
pub fn has_valid_hub_kubeconfig(secret: &Secret, expected_common_name: Option<&str>) -> bool {
    let Some(data) = secret.data.as_ref() else {
        return false;
    };

    let Some(raw_kubeconfig) = data.get(KUBECONFIG_KEY) else {
        return false;
    };
    if parse_kubeconfig(&raw_kubeconfig.0).is_err() {
        return false;
    }

    if !data.contains_key(TLS_KEY_KEY) {
        return false;
    }

    match data.get(TLS_CERT_KEY) {
        Some(cert) => is_certificate_valid(&cert.0, expected_common_name),
        None => false,
    }
}

/// The overall validity window of the client certificate chain in a secret.
///
/// For a chain the window is the intersection: the latest `NotBefore` and
/// the earliest `NotAfter` across all certificates.
pub fn cert_validity_period(secret: &Secret) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let cert = secret
        .data
        .as_ref()
        .and_then(|d| d.get(TLS_CERT_KEY))
        .filter(|c| !c.0.is_empty())
        .ok_or_else(|| {
            Error::certificate(format!(
                "no client certificate found in secret \"{}/{}\"",
                secret.metadata.namespace.as_deref().unwrap_or_default(),
                secret.metadata.name.as_deref().unwrap_or_default(),
            ))
        })?;

    let metas = parse_cert_chain_pem(&cert.0)?;
    let not_before = metas
        .iter()
        .map(|m| m.not_before)
        .max()
        .expect("chain is non-empty");
    let not_after = metas
        .iter()
        .map(|m| m.not_after)
        .min()
        .expect("chain is non-empty");
    Ok((not_before, not_after))
}

/// Build the kubeconfig the spoke persists next to its minted credential.
///
/// The client certificate and key are referenced by the sibling secret keys
/// so a renewal only has to swap `tls.crt`/`tls.key`.
pub fn build_hub_kubeconfig(
    server: &str,
    ca_data: Option<&[u8]>,
    proxy_url: Option<&str>,
) -> Kubeconfig {
    build_kubeconfig(server, ca_data, proxy_url, TLS_CERT_KEY, TLS_KEY_KEY)
}
