//! Certificate minting and inspection for the rotation engine and the
//! registration agent
//!
//! The hub operator acts as a signer for its own webhook serving certs; the
//! spoke agent only ever generates key pairs and CSRs - its private key never
//! leaves the spoke. Validity windows are always passed in explicitly so the
//! rotation rules can be exercised against a fabricated clock.

use chrono::{DateTime, TimeZone, Utc};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, DnValue, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::Error;
use crate::Result;

/// A PEM certificate plus the PEM private key it belongs to
#[derive(Clone, Debug)]
pub struct CertKeyPair {
    /// PEM-encoded certificate
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
}

/// Owned summary of one parsed X.509 certificate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertMeta {
    /// Subject common name
    pub subject_common_name: String,
    /// Issuer common name
    pub issuer_common_name: String,
    /// Start of the validity window
    pub not_before: DateTime<Utc>,
    /// End of the validity window
    pub not_after: DateTime<Utc>,
    /// SHA-256 over the DER encoding, hex
    pub fingerprint: String,
}

impl CertMeta {
    /// Whether the certificate is inside its validity window at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now < self.not_after
    }

    /// Total lifetime of the certificate
    pub fn lifetime(&self) -> chrono::Duration {
        self.not_after - self.not_before
    }

    /// Time left until expiry at `now` (negative when already expired)
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.not_after - now
    }
}

/// Parse a PEM bundle into per-certificate summaries.
///
/// Every PEM block in the input must be a parseable certificate; an empty
/// input or a block that is not a certificate is an error.
pub fn parse_cert_chain_pem(pem_bundle: &[u8]) -> Result<Vec<CertMeta>> {
    let blocks = ::pem::parse_many(pem_bundle)
        .map_err(|e| Error::certificate(format!("failed to parse PEM: {}", e)))?;
    if blocks.is_empty() {
        return Err(Error::certificate("no certificates found in PEM data"));
    }

    let mut metas = Vec::with_capacity(blocks.len());
    for block in blocks {
        metas.push(cert_meta_from_der(block.contents())?);
    }
    Ok(metas)
}

fn cert_meta_from_der(der: &[u8]) -> Result<CertMeta> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::certificate(format!("failed to parse certificate: {}", e)))?;

    let subject_common_name = common_name(cert.subject());
    let issuer_common_name = common_name(cert.issuer());

    let not_before = Utc
        .timestamp_opt(cert.validity().not_before.timestamp(), 0)
        .single()
        .ok_or_else(|| Error::certificate("certificate notBefore out of range"))?;
    let not_after = Utc
        .timestamp_opt(cert.validity().not_after.timestamp(), 0)
        .single()
        .ok_or_else(|| Error::certificate("certificate notAfter out of range"))?;

    Ok(CertMeta {
        subject_common_name,
        issuer_common_name,
        not_before,
        not_after,
        fingerprint: format!("{:x}", Sha256::digest(der)),
    })
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("")
        .to_string()
}

fn to_rcgen_time(t: DateTime<Utc>) -> Result<::time::OffsetDateTime> {
    ::time::OffsetDateTime::from_unix_timestamp(t.timestamp())
        .map_err(|e| Error::certificate(format!("timestamp out of range: {}", e)))
}

/// Mint a self-signed signing (CA) certificate with the given window
pub fn generate_signing_cert_key_pair(
    signer_name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CertKeyPair> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(signer_name.to_string()));
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = to_rcgen_time(not_before)?;
    params.not_after = to_rcgen_time(not_after)?;

    let key_pair = KeyPair::generate()
        .map_err(|e| Error::certificate(format!("failed to generate signing key: {}", e)))?;
    let key_pem = key_pair.serialize_pem();

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::certificate(format!("failed to create signing cert: {}", e)))?;

    Ok(CertKeyPair {
        cert_pem: cert.pem(),
        key_pem,
    })
}

/// Mint a serving certificate for the given hosts, signed by `signer`
pub fn sign_serving_cert_key_pair(
    signer: &CertKeyPair,
    common_name: &str,
    hosts: &[String],
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CertKeyPair> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    params.distinguished_name = dn;

    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
    params.not_before = to_rcgen_time(not_before)?;
    params.not_after = to_rcgen_time(not_after)?;

    params.subject_alt_names = hosts
        .iter()
        .map(|host| {
            if let Ok(ip) = host.parse::<std::net::IpAddr>() {
                Ok(SanType::IpAddress(ip))
            } else {
                Ia5String::try_from(host.clone())
                    .map(SanType::DnsName)
                    .map_err(|e| Error::certificate(format!("invalid DNS name '{}': {}", host, e)))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let serving_key = KeyPair::generate()
        .map_err(|e| Error::certificate(format!("failed to generate serving key: {}", e)))?;
    let serving_key_pem = serving_key.serialize_pem();

    let ca_key = KeyPair::from_pem(&signer.key_pem)
        .map_err(|e| Error::certificate(format!("failed to load signing key: {}", e)))?;
    let issuer = Issuer::from_ca_cert_pem(&signer.cert_pem, &ca_key)
        .map_err(|e| Error::certificate(format!("failed to create issuer: {}", e)))?;

    let cert = params
        .signed_by(&serving_key, &issuer)
        .map_err(|e| Error::certificate(format!("failed to sign serving cert: {}", e)))?;

    Ok(CertKeyPair {
        cert_pem: cert.pem(),
        key_pem: serving_key_pem,
    })
}

/// A locally generated key pair and the CSR carrying its public half.
///
/// The private key never leaves the caller; only the CSR is sent to the
/// signing authority.
pub struct ClientCertRequest {
    key_pem: String,
    csr_pem: String,
}

impl ClientCertRequest {
    /// Generate a new key pair and CSR for the given subject
    pub fn new(common_name: &str, organizations: &[String]) -> Result<Self> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::certificate(format!("failed to generate client key: {}", e)))?;
        let key_pem = key_pair.serialize_pem();

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
        for org in organizations {
            dn.push(DnType::OrganizationName, DnValue::Utf8String(org.clone()));
        }
        params.distinguished_name = dn;

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| Error::certificate(format!("failed to create CSR: {}", e)))?;
        let csr_pem = csr
            .pem()
            .map_err(|e| Error::certificate(format!("failed to serialize CSR: {}", e)))?;

        Ok(Self { key_pem, csr_pem })
    }

    /// The CSR in PEM format (to send to the signing authority)
    pub fn csr_pem(&self) -> &str {
        &self.csr_pem
    }

    /// The private key in PEM format (to store locally)
    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }
}

/// Sign a client CSR, preserving the subject it was requested for.
///
/// This is the hub side of the handshake as the spoke sees it: the external
/// signing authority accepts the CSR and emits a client certificate. It also
/// backs the test fixtures that stand in for that authority.
pub fn sign_client_csr(
    signer: &CertKeyPair,
    csr_pem: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<String> {
    let mut csr_params = CertificateSigningRequestParams::from_pem(csr_pem)
        .map_err(|e| Error::certificate(format!("failed to parse CSR: {}", e)))?;

    csr_params.params.is_ca = IsCa::NoCa;
    csr_params.params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    csr_params.params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
    csr_params.params.not_before = to_rcgen_time(not_before)?;
    csr_params.params.not_after = to_rcgen_time(not_after)?;

    let ca_key = KeyPair::from_pem(&signer.key_pem)
        .map_err(|e| Error::certificate(format!("failed to load signing key: {}", e)))?;
    let issuer = Issuer::from_ca_cert_pem(&signer.cert_pem, &ca_key)
        .map_err(|e| Error::certificate(format!("failed to create issuer: {}", e)))?;

    let cert = csr_params
        .signed_by(&issuer)
        .map_err(|e| Error::certificate(format!("failed to sign client cert: {}", e)))?;

    Ok(cert.pem())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window(secs: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - Duration::seconds(1), now + Duration::seconds(secs))
    }

    #[test]
    fn signing_cert_round_trips() {
        let (not_before, not_after) = window(300);
        let signer = generate_signing_cert_key_pair("signer@1", not_before, not_after).unwrap();

        let metas = parse_cert_chain_pem(signer.cert_pem.as_bytes()).unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].subject_common_name, "signer@1");
        // Self-signed: subject and issuer agree.
        assert_eq!(metas[0].issuer_common_name, "signer@1");
        assert!(metas[0].is_valid_at(Utc::now()));
    }

    #[test]
    fn serving_cert_issuer_matches_signer() {
        let (not_before, not_after) = window(300);
        let signer = generate_signing_cert_key_pair("signer@2", not_before, not_after).unwrap();
        let serving = sign_serving_cert_key_pair(
            &signer,
            "registration-webhook",
            &["registration-webhook.open-cluster-management-hub.svc".to_string()],
            not_before,
            not_after,
        )
        .unwrap();

        let metas = parse_cert_chain_pem(serving.cert_pem.as_bytes()).unwrap();
        assert_eq!(metas[0].issuer_common_name, "signer@2");
        assert_eq!(metas[0].subject_common_name, "registration-webhook");
    }

    #[test]
    fn client_csr_round_trip_preserves_subject() {
        let request = ClientCertRequest::new(
            "system:open-cluster-management:cluster1:agent1",
            &[
                "system:open-cluster-management".to_string(),
                "system:open-cluster-management:cluster1".to_string(),
            ],
        )
        .unwrap();
        assert!(request.csr_pem().contains("BEGIN CERTIFICATE REQUEST"));
        assert!(!request.csr_pem().contains("PRIVATE KEY"));
        assert!(request.private_key_pem().contains("PRIVATE KEY"));

        let (not_before, not_after) = window(3600);
        let signer = generate_signing_cert_key_pair("signer@3", not_before, not_after).unwrap();
        let cert_pem = sign_client_csr(&signer, request.csr_pem(), not_before, not_after).unwrap();

        let metas = parse_cert_chain_pem(cert_pem.as_bytes()).unwrap();
        assert_eq!(
            metas[0].subject_common_name,
            "system:open-cluster-management:cluster1:agent1"
        );
    }

    #[test]
    fn expired_cert_is_not_valid() {
        let now = Utc::now();
        let signer = generate_signing_cert_key_pair(
            "signer@4",
            now - Duration::seconds(120),
            now - Duration::seconds(60),
        )
        .unwrap();
        let meta = &parse_cert_chain_pem(signer.cert_pem.as_bytes()).unwrap()[0];
        assert!(!meta.is_valid_at(now));
        assert!(meta.remaining(now) < Duration::zero());
    }

    #[test]
    fn garbage_pem_is_rejected() {
        assert!(parse_cert_chain_pem(b"not pem at all").is_err());
        assert!(parse_cert_chain_pem(b"").is_err());
    }

    #[test]
    fn fingerprints_distinguish_certs() {
        let (not_before, not_after) = window(300);
        let a = generate_signing_cert_key_pair("signer@5", not_before, not_after).unwrap();
        let b = generate_signing_cert_key_pair("signer@5", not_before, not_after).unwrap();
        let fa = &parse_cert_chain_pem(a.cert_pem.as_bytes()).unwrap()[0].fingerprint;
        let fb = &parse_cert_chain_pem(b.cert_pem.as_bytes()).unwrap()[0].fingerprint;
        assert_ne!(fa, fb, "different key pairs yield different fingerprints");
    }

    #[test]
    fn chain_parses_multiple_blocks() {
        let (not_before, not_after) = window(300);
        let a = generate_signing_cert_key_pair("signer@6", not_before, not_after).unwrap();
        let b = generate_signing_cert_key_pair("signer@7", not_before, not_after).unwrap();
        let bundle = format!("{}{}", a.cert_pem, b.cert_pem);
        let metas = parse_cert_chain_pem(bundle.as_bytes()).unwrap();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[1].subject_common_name, "signer@7");
    }
}
