//! Revocation Checker (§4.I).
//!
//! Classifies a certificate as [`RevocationStatus::Good`],
//! [`RevocationStatus::Revoked`], or [`RevocationStatus::Unknown`] by
//! consulting the CRL distribution points and OCSP responder URLs named in
//! its extensions. HTTP fetches go through the proxy-aware client
//! (component E) so CRL/OCSP traffic honors the same proxy environment as
//! everything else in this crate.

mod ocsp;

use crate::certs::Certificate;
use crate::proxy::http_client;
use std::time::Duration;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::revocation_list::CertificateRevocationList;

/// Fail-closed / timeout knobs for [`check`].
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    /// An [`RevocationStatus::Unknown`] caused by a network or parse
    /// failure is reported as [`RevocationStatus::Revoked`] instead.
    pub hard_fail: bool,
    /// Maximum wall-clock time for any single CRL/OCSP HTTP fetch.
    pub http_timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Policy { hard_fail: false, http_timeout: Duration::from_secs(10) }
    }
}

/// The outcome of a revocation check, with a human-readable reason attached
/// where one is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationStatus {
    Good,
    Revoked(String),
    Unknown(Option<String>),
}

/// Check `cert`'s revocation status. `issuer` is the certificate that
/// signed `cert` (pass `cert` itself for a self-signed root).
pub async fn check(cert: &Certificate, issuer: &Certificate, policy: &Policy) -> RevocationStatus {
    let parsed = match cert.parsed() {
        Ok(p) => p,
        Err(e) => return RevocationStatus::Unknown(Some(format!("certificate did not parse: {e}"))),
    };

    let crl_urls = crl_distribution_points(&parsed);
    let ocsp_urls = ocsp_responder_urls(&parsed);

    if crl_urls.is_empty() && ocsp_urls.is_empty() {
        if is_self_signed_ca(&parsed) {
            return RevocationStatus::Good;
        }
        return finalize(RevocationStatus::Unknown(None), policy);
    }

    let mut saw_good = false;

    for url in &crl_urls {
        match check_crl(cert, issuer, url, policy.http_timeout).await {
            RevocationStatus::Revoked(reason) => return RevocationStatus::Revoked(reason),
            RevocationStatus::Good => saw_good = true,
            RevocationStatus::Unknown(_) => {}
        }
    }

    for url in &ocsp_urls {
        match check_ocsp(cert, issuer, url, policy.http_timeout).await {
            RevocationStatus::Revoked(reason) => return RevocationStatus::Revoked(reason),
            RevocationStatus::Good => saw_good = true,
            RevocationStatus::Unknown(_) => {}
        }
    }

    if saw_good {
        RevocationStatus::Good
    } else {
        finalize(RevocationStatus::Unknown(None), policy)
    }
}

fn finalize(status: RevocationStatus, policy: &Policy) -> RevocationStatus {
    match status {
        RevocationStatus::Unknown(reason) if policy.hard_fail => {
            RevocationStatus::Revoked(reason.unwrap_or_else(|| "revocation status could not be determined".to_string()))
        }
        other => other,
    }
}

fn is_self_signed_ca(cert: &X509Certificate<'_>) -> bool {
    let is_ca = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid == oid_registry::OID_X509_EXT_BASIC_CONSTRAINTS)
        .map(|ext| matches!(ext.parsed_extension(), ParsedExtension::BasicConstraints(bc) if bc.ca))
        .unwrap_or(false);

    is_ca && cert.subject().as_raw() == cert.issuer().as_raw()
}

fn crl_distribution_points(cert: &X509Certificate<'_>) -> Vec<String> {
    let Some(ext) = cert.extensions().iter().find(|e| e.oid == oid_registry::OID_X509_EXT_CRL_DISTRIBUTION_POINTS)
    else {
        return Vec::new();
    };
    let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() else {
        return Vec::new();
    };

    points
        .points
        .iter()
        .filter_map(|point| point.distribution_point.as_ref())
        .flat_map(|name| match name {
            x509_parser::extensions::DistributionPointName::FullName(names) => names.iter().collect::<Vec<_>>(),
            x509_parser::extensions::DistributionPointName::NameRelativeToCRLIssuer(_) => Vec::new(),
        })
        .filter_map(general_name_uri)
        .collect()
}

// The `oid_registry` crate's RFC 5280 core extensions (§2.5.29.*) are
// re-exported with an `OID_X509_EXT_` prefix; Authority Information Access
// lives on the separate PKIX arc (1.3.6.1.5.5.7.1.1) and isn't part of that
// set, so it's matched by its raw dotted OID instead.
const OID_AUTHORITY_INFO_ACCESS: &str = "1.3.6.1.5.5.7.1.1";
const OID_AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";

fn ocsp_responder_urls(cert: &X509Certificate<'_>) -> Vec<String> {
    let Some(ext) = cert.extensions().iter().find(|e| e.oid.to_string() == OID_AUTHORITY_INFO_ACCESS) else {
        return Vec::new();
    };
    let ParsedExtension::AuthorityInfoAccess(aia) = ext.parsed_extension() else {
        return Vec::new();
    };

    aia.accessdescs
        .iter()
        .filter(|desc| desc.access_method.to_string() == OID_AD_OCSP)
        .filter_map(|desc| general_name_uri(&desc.access_location))
        .collect()
}

fn general_name_uri(name: &GeneralName<'_>) -> Option<String> {
    match name {
        GeneralName::URI(uri) => Some(uri.to_string()),
        _ => None,
    }
}

async fn check_crl(cert: &Certificate, issuer: &Certificate, url: &str, timeout: Duration) -> RevocationStatus {
    let body = match fetch(url, timeout).await {
        Ok(b) => b,
        Err(e) => return RevocationStatus::Unknown(Some(format!("CRL fetch from {url} failed: {e}"))),
    };

    let crl = match CertificateRevocationList::from_der(&body) {
        Ok((_, crl)) => crl,
        Err(e) => return RevocationStatus::Unknown(Some(format!("CRL from {url} did not parse: {e}"))),
    };

    let issuer_parsed = match issuer.parsed() {
        Ok(p) => p,
        Err(e) => return RevocationStatus::Unknown(Some(format!("issuer certificate did not parse: {e}"))),
    };

    let sig_alg_oid = crl.signature_algorithm.algorithm.to_string();
    if verify_signature(crl.tbs_cert_list.as_ref(), &sig_alg_oid, crl.signature_value.as_ref(), issuer_parsed.public_key().raw)
        .is_err()
    {
        return RevocationStatus::Unknown(Some(format!("CRL from {url} failed signature verification")));
    }

    if let Some(next_update) = crl.next_update() {
        if next_update.timestamp() < now_unix() {
            return RevocationStatus::Unknown(Some(format!("CRL from {url} has expired")));
        }
    }

    let cert_parsed = match cert.parsed() {
        Ok(p) => p,
        Err(e) => return RevocationStatus::Unknown(Some(format!("certificate did not parse: {e}"))),
    };
    let serial = cert_parsed.raw_serial();

    for revoked in crl.iter_revoked_certificates() {
        if revoked.raw_serial() == serial {
            return RevocationStatus::Revoked(format!("certificate serial found on CRL at {url}"));
        }
    }

    RevocationStatus::Good
}

async fn check_ocsp(cert: &Certificate, issuer: &Certificate, url: &str, timeout: Duration) -> RevocationStatus {
    let cert_parsed = match cert.parsed() {
        Ok(p) => p,
        Err(e) => return RevocationStatus::Unknown(Some(format!("certificate did not parse: {e}"))),
    };
    let issuer_parsed = match issuer.parsed() {
        Ok(p) => p,
        Err(e) => return RevocationStatus::Unknown(Some(format!("issuer certificate did not parse: {e}"))),
    };

    let key = ocsp::CertKey::new(issuer_parsed.subject().as_raw(), issuer_parsed.public_key().subject_public_key.data, cert_parsed.raw_serial());
    let request = ocsp::build_request(&key);

    let body = match fetch_post(url, "application/ocsp-request", request, timeout).await {
        Ok(b) => b,
        Err(e) => return RevocationStatus::Unknown(Some(format!("OCSP request to {url} failed: {e}"))),
    };

    let parsed = match ocsp::parse_response(&body, &key) {
        Ok(p) => p,
        Err(e) => return RevocationStatus::Unknown(Some(format!("OCSP response from {url} did not parse: {e}"))),
    };

    let responder_spki = parsed.responder_certs_der.first().and_then(|der| {
        x509_parser::parse_x509_certificate(der).ok().map(|(_, c)| c.public_key().raw.to_vec())
    });
    let spki = responder_spki.as_deref().unwrap_or(issuer_parsed.public_key().raw);

    if verify_signature(&parsed.tbs_response_data, &parsed.signature_algorithm_oid, &parsed.signature, spki).is_err() {
        return RevocationStatus::Unknown(Some(format!("OCSP response from {url} failed signature verification")));
    }

    match parsed.status {
        ocsp::CertStatus::Good => RevocationStatus::Good,
        ocsp::CertStatus::Revoked => RevocationStatus::Revoked(format!("OCSP responder {url} reports the certificate revoked")),
        ocsp::CertStatus::Unknown => RevocationStatus::Unknown(Some(format!("OCSP responder {url} has no record of this certificate"))),
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

async fn fetch(url: &str, timeout: Duration) -> crate::error::Result<Vec<u8>> {
    let client = http_client().with_timeout(timeout);
    let (status, body) = client.get(url).await?;
    check_http_status(status, body)
}

async fn fetch_post(url: &str, content_type: &str, body: Vec<u8>, timeout: Duration) -> crate::error::Result<Vec<u8>> {
    let client = http_client().with_timeout(timeout);
    let (status, resp_body) = client.post(url, content_type, body).await?;
    check_http_status(status, resp_body)
}

fn check_http_status(status: u16, body: bytes::Bytes) -> crate::error::Result<Vec<u8>> {
    if !(200..300).contains(&status) {
        return Err(crate::error::TetError::load_msg(
            crate::error::Source::Certificate,
            format!("unexpected HTTP status {status}"),
        ));
    }
    Ok(body.to_vec())
}

/// Verify that `child` was signed by `issuer` (the Key Matcher's
/// counterpart check for chain-building rather than key-pairing: "is this
/// the certificate that signed that one", used by the bundle packager's
/// intermediates-signed-by-root validation).
pub(crate) fn verify_cert_signed_by(child: &Certificate, issuer: &Certificate) -> crate::error::Result<()> {
    let child_parsed = child.parsed()?;
    let issuer_parsed = issuer.parsed()?;
    let sig_alg_oid = child_parsed.signature_algorithm.algorithm.to_string();
    verify_signature(
        child_parsed.tbs_certificate.as_ref(),
        &sig_alg_oid,
        child_parsed.signature_value.as_ref(),
        issuer_parsed.public_key().raw,
    )
}

/// Verify `signature` over `tbs` using the algorithm named by
/// `sig_alg_oid`, against the public key encoded in `spki_der` (a full
/// SubjectPublicKeyInfo DER blob, as returned by
/// `X509Certificate::public_key().raw`).
fn verify_signature(tbs: &[u8], sig_alg_oid: &str, signature: &[u8], spki_der: &[u8]) -> crate::error::Result<()> {
    use crate::error::{Source, TetError};

    const RSA_SHA1: &str = "1.2.840.113549.1.1.5";
    const RSA_SHA256: &str = "1.2.840.113549.1.1.11";
    const RSA_SHA384: &str = "1.2.840.113549.1.1.12";
    const RSA_SHA512: &str = "1.2.840.113549.1.1.13";
    const ECDSA_SHA256: &str = "1.2.840.10045.4.3.2";
    const ECDSA_SHA384: &str = "1.2.840.10045.4.3.3";

    match sig_alg_oid {
        RSA_SHA1 => verify_rsa_sha1(tbs, signature, spki_der),
        RSA_SHA256 => verify_rsa_sha256(tbs, signature, spki_der),
        RSA_SHA384 => verify_rsa_sha384(tbs, signature, spki_der),
        RSA_SHA512 => verify_rsa_sha512(tbs, signature, spki_der),
        ECDSA_SHA256 => verify_ecdsa_p256(tbs, signature, spki_der),
        ECDSA_SHA384 => verify_ecdsa_p384(tbs, signature, spki_der),
        other => Err(TetError::verify_msg(Source::Certificate, format!("unsupported signature algorithm {other}"))),
    }
}

fn rsa_public_key(spki_der: &[u8]) -> crate::error::Result<rsa::RsaPublicKey> {
    use crate::error::{Source, TetError};
    use rsa::pkcs1::DecodeRsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;

    rsa::RsaPublicKey::from_pkcs1_der(spki_der)
        .or_else(|_| rsa::RsaPublicKey::from_public_key_der(spki_der))
        .map_err(|e| TetError::verify_msg(Source::Certificate, format!("invalid RSA public key: {e}")))
}

macro_rules! verify_rsa_with {
    ($name:ident, $digest:ty) => {
        fn $name(tbs: &[u8], signature: &[u8], spki_der: &[u8]) -> crate::error::Result<()> {
            use crate::error::{Source, TetError};
            use rsa::pkcs1v15::VerifyingKey;
            use rsa::signature::Verifier;

            let key = rsa_public_key(spki_der)?;
            let verifying_key = VerifyingKey::<$digest>::new(key);
            let sig = rsa::pkcs1v15::Signature::try_from(signature)
                .map_err(|e| TetError::verify_msg(Source::Certificate, format!("invalid RSA signature: {e}")))?;
            verifying_key
                .verify(tbs, &sig)
                .map_err(|_| TetError::verify_msg(Source::Certificate, "RSA signature did not verify"))
        }
    };
}

verify_rsa_with!(verify_rsa_sha1, sha1::Sha1);
verify_rsa_with!(verify_rsa_sha256, sha2::Sha256);
verify_rsa_with!(verify_rsa_sha384, sha2::Sha384);
verify_rsa_with!(verify_rsa_sha512, sha2::Sha512);

fn verify_ecdsa_p256(tbs: &[u8], signature: &[u8], spki_der: &[u8]) -> crate::error::Result<()> {
    use crate::error::{Source, TetError};
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::{Signature, VerifyingKey};
    use p256::pkcs8::DecodePublicKey;

    let public_key = p256::PublicKey::from_public_key_der(spki_der)
        .map_err(|e| TetError::verify_msg(Source::Certificate, format!("invalid P-256 public key: {e}")))?;
    let verifying_key = VerifyingKey::from(public_key);
    let sig = Signature::from_der(signature)
        .map_err(|e| TetError::verify_msg(Source::Certificate, format!("invalid ECDSA signature: {e}")))?;
    verifying_key
        .verify(tbs, &sig)
        .map_err(|_| TetError::verify_msg(Source::Certificate, "ECDSA signature did not verify"))
}

fn verify_ecdsa_p384(tbs: &[u8], signature: &[u8], spki_der: &[u8]) -> crate::error::Result<()> {
    use crate::error::{Source, TetError};
    use p384::ecdsa::signature::Verifier;
    use p384::ecdsa::{Signature, VerifyingKey};
    use p384::pkcs8::DecodePublicKey;

    let public_key = p384::PublicKey::from_public_key_der(spki_der)
        .map_err(|e| TetError::verify_msg(Source::Certificate, format!("invalid P-384 public key: {e}")))?;
    let verifying_key = VerifyingKey::from(public_key);
    let sig = Signature::from_der(signature)
        .map_err(|e| TetError::verify_msg(Source::Certificate, format!("invalid ECDSA signature: {e}")))?;
    verifying_key
        .verify(tbs, &sig)
        .map_err(|_| TetError::verify_msg(Source::Certificate, "ECDSA signature did not verify"))
}

mod oid_registry {
    pub use x509_parser::oid_registry::{OID_X509_EXT_BASIC_CONSTRAINTS, OID_X509_EXT_CRL_DISTRIBUTION_POINTS};
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};

    /// Pinned to ECDSA P-256 explicitly (rather than the algorithm-less
    /// `KeyPair::generate()`) so `verify_cert_signed_by`'s OID dispatch
    /// below is exercised against an algorithm it actually recognizes.
    fn generate_self_signed_root() -> Certificate {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "test root");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        Certificate::from_der(cert.der().to_vec()).unwrap()
    }

    fn generate_chain() -> (Certificate, Certificate) {
        let root_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut root_params = CertificateParams::default();
        let mut root_dn = DistinguishedName::new();
        root_dn.push(DnType::CommonName, "test root");
        root_params.distinguished_name = root_dn;
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let root_cert = root_params.self_signed(&root_key).unwrap();

        let leaf_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut leaf_params = CertificateParams::default();
        let mut leaf_dn = DistinguishedName::new();
        leaf_dn.push(DnType::CommonName, "leaf.example.com");
        leaf_params.distinguished_name = leaf_dn;
        let leaf_cert = leaf_params.signed_by(&leaf_key, &root_cert, &root_key).unwrap();

        (
            Certificate::from_der(root_cert.der().to_vec()).unwrap(),
            Certificate::from_der(leaf_cert.der().to_vec()).unwrap(),
        )
    }

    #[tokio::test]
    async fn check_reports_good_for_a_self_signed_root_with_no_revocation_sources() {
        let root = generate_self_signed_root();
        let status = check(&root, &root, &Policy::default()).await;
        assert_eq!(status, RevocationStatus::Good);
    }

    #[tokio::test]
    async fn check_reports_unknown_for_a_leaf_with_no_revocation_sources() {
        let (root, leaf) = generate_chain();
        let status = check(&leaf, &root, &Policy::default()).await;
        assert_eq!(status, RevocationStatus::Unknown(None));
    }

    #[test]
    fn verify_cert_signed_by_accepts_a_genuinely_issued_leaf() {
        let (root, leaf) = generate_chain();
        assert!(verify_cert_signed_by(&leaf, &root).is_ok());
    }

    #[test]
    fn verify_cert_signed_by_rejects_an_unrelated_root() {
        let (_, leaf) = generate_chain();
        let (other_root, _) = generate_chain();
        assert!(verify_cert_signed_by(&leaf, &other_root).is_err());
    }

    #[test]
    fn policy_default_is_soft_fail_with_ten_second_timeout() {
        let policy = Policy::default();
        assert!(!policy.hard_fail);
        assert_eq!(policy.http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn finalize_converts_unknown_to_revoked_under_hard_fail() {
        let policy = Policy { hard_fail: true, http_timeout: Duration::from_secs(1) };
        let result = finalize(RevocationStatus::Unknown(Some("network down".to_string())), &policy);
        assert_eq!(result, RevocationStatus::Revoked("network down".to_string()));
    }

    #[test]
    fn finalize_leaves_unknown_alone_without_hard_fail() {
        let policy = Policy { hard_fail: false, http_timeout: Duration::from_secs(1) };
        let result = finalize(RevocationStatus::Unknown(None), &policy);
        assert_eq!(result, RevocationStatus::Unknown(None));
    }

    #[test]
    fn finalize_passes_good_and_revoked_through_unchanged() {
        let policy = Policy { hard_fail: true, http_timeout: Duration::from_secs(1) };
        assert_eq!(finalize(RevocationStatus::Good, &policy), RevocationStatus::Good);
        assert_eq!(
            finalize(RevocationStatus::Revoked("x".to_string()), &policy),
            RevocationStatus::Revoked("x".to_string())
        );
    }
}
