//! Common types for the OCM control plane: CRDs, errors, and utilities
//!
//! The hub-and-spoke control plane federates workload clusters ("spokes")
//! under one coordinating cluster ("hub"). This crate carries everything the
//! operator and registration agent share:
//!
//! - [`api`] - the `ClusterManager` and `Klusterlet` custom resources
//! - [`apply`] - idempotent declarative writer with content-hash comparison
//! - [`generations`] - per-child generation tracking and the related-resource
//!   inventory
//! - [`certs`] - certificate minting and parsing built on rcgen/x509-parser
//! - [`kubeconfig`] - kubeconfig construction and inspection
//! - [`features`] - per-subsystem feature gates
//! - [`conditions`] - status condition merging
//! - [`error`] - error taxonomy shared by all controllers

#![deny(missing_docs)]

pub mod api;
pub mod apply;
pub mod certs;
pub mod conditions;
pub mod error;
pub mod features;
pub mod generations;
pub mod kubeconfig;
pub mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Secret data key holding a PEM certificate (or chain)
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret data key holding a PEM private key
pub const TLS_KEY_KEY: &str = "tls.key";

/// Secret data key holding a serialized kubeconfig
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// ConfigMap data key holding the concatenated CA bundle
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";

/// Namespace the hub components are deployed into
pub const HUB_NAMESPACE: &str = "open-cluster-management-hub";

/// Default namespace for spoke agent workloads
pub const AGENT_NAMESPACE: &str = "open-cluster-management-agent";

/// Name of the externally provided bootstrap credential secret
pub const BOOTSTRAP_HUB_KUBECONFIG: &str = "bootstrap-hub-kubeconfig";

/// Name of the durable hub identity secret minted after registration
pub const HUB_KUBECONFIG_SECRET: &str = "hub-kubeconfig-secret";

/// Name of the signing key-pair secret maintained by the rotation engine
pub const SIGNER_SECRET: &str = "signer-secret";

/// Name of the ConfigMap publishing the CA bundle
pub const CA_BUNDLE_CONFIGMAP: &str = "ca-bundle-configmap";

/// Signer name requested on spoke client certificate signing requests
pub const KUBE_APISERVER_CLIENT_SIGNER: &str = "kubernetes.io/kube-apiserver-client";

/// User-group prefix all spoke agent identities live under
pub const AGENT_USER_GROUP: &str = "system:open-cluster-management";

/// Build the mTLS subject common name for a spoke agent.
///
/// The exact string is load-bearing: the hub authorizes agents by this
/// identity, and the spoke validates its own credential against it.
pub fn agent_common_name(cluster_name: &str, agent_name: &str) -> String {
    format!("{}:{}:{}", AGENT_USER_GROUP, cluster_name, agent_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_common_name_format() {
        assert_eq!(
            agent_common_name("cluster1", "agent1"),
            "system:open-cluster-management:cluster1:agent1"
        );
    }
}
