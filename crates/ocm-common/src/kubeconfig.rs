//! Kubeconfig construction and inspection
//!
//! The spoke persists its hub identity as a kubeconfig that references the
//! client certificate and key by the sibling secret keys `tls.crt` and
//! `tls.key`. The rebootstrap controller compares kubeconfigs by their
//! parsed server and proxy URLs, never by raw bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kube::config::{
    AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};

use crate::error::Error;
use crate::Result;

const CLUSTER_NAME: &str = "default-cluster";
const CONTEXT_NAME: &str = "default-context";
const AUTH_NAME: &str = "default-auth";

/// Build a kubeconfig pointing at the hub.
///
/// The client certificate and key are referenced as file paths so the
/// credential files can rotate underneath the config without rewriting it.
pub fn build_kubeconfig(
    server: &str,
    ca_data: Option<&[u8]>,
    proxy_url: Option<&str>,
    client_cert_file: &str,
    client_key_file: &str,
) -> Kubeconfig {
    Kubeconfig {
        clusters: vec![NamedCluster {
            name: CLUSTER_NAME.to_string(),
            cluster: Some(Cluster {
                server: Some(server.to_string()),
                certificate_authority_data: ca_data.map(|d| BASE64.encode(d)),
                insecure_skip_tls_verify: if ca_data.is_none() { Some(true) } else { None },
                proxy_url: proxy_url.map(|u| u.to_string()),
                ..Default::default()
            }),
        }],
        auth_infos: vec![NamedAuthInfo {
            name: AUTH_NAME.to_string(),
            auth_info: Some(AuthInfo {
                client_certificate: Some(client_cert_file.to_string()),
                client_key: Some(client_key_file.to_string()),
                ..Default::default()
            }),
        }],
        contexts: vec![NamedContext {
            name: CONTEXT_NAME.to_string(),
            context: Some(Context {
                cluster: CLUSTER_NAME.to_string(),
                user: Some(AUTH_NAME.to_string()),
                ..Default::default()
            }),
        }],
        current_context: Some(CONTEXT_NAME.to_string()),
        ..Default::default()
    }
}

/// Serialize a kubeconfig to YAML bytes
pub fn serialize_kubeconfig(config: &Kubeconfig) -> Result<Vec<u8>> {
    serde_yaml::to_string(config)
        .map(String::into_bytes)
        .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))
}

/// Parse YAML (or JSON) kubeconfig bytes
pub fn parse_kubeconfig(data: &[u8]) -> Result<Kubeconfig> {
    serde_yaml::from_slice(data)
        .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))
}

/// Extract the server URL and optional proxy URL a kubeconfig points at.
///
/// Prefers the current context's cluster; falls back to the first cluster
/// entry when no context resolves.
pub fn server_and_proxy(config: &Kubeconfig) -> Result<(String, Option<String>)> {
    let cluster_name = config
        .current_context
        .as_ref()
        .and_then(|ctx_name| {
            config
                .contexts
                .iter()
                .find(|c| &c.name == ctx_name)
                .and_then(|c| c.context.as_ref())
                .map(|c| c.cluster.clone())
        });

    let cluster = match cluster_name {
        Some(name) => config
            .clusters
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.cluster.as_ref()),
        None => config.clusters.first().and_then(|c| c.cluster.as_ref()),
    }
    .ok_or_else(|| Error::serialization_for_kind("Kubeconfig", "no cluster entry"))?;

    let server = cluster
        .server
        .clone()
        .ok_or_else(|| Error::serialization_for_kind("Kubeconfig", "cluster has no server"))?;

    Ok((server, cluster.proxy_url.clone()))
}

/// Decode the CA bundle embedded in a kubeconfig's cluster entry, if any
pub fn certificate_authority_data(config: &Kubeconfig) -> Result<Option<Vec<u8>>> {
    let Some(cluster) = config.clusters.first().and_then(|c| c.cluster.as_ref()) else {
        return Ok(None);
    };
    match &cluster.certificate_authority_data {
        Some(data) => BASE64
            .decode(data)
            .map(Some)
            .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string())),
        None => Ok(None),
    }
}
