//! Certificate Parser & Encoder (§4.F).
//!
//! Ingests X.509 material from any common container — PEM (any recognized
//! block type), raw DER, PKCS#7 `SignedData`, PKCS#12 bags — and emits
//! canonical PEM or DER forms.

mod keys;
mod pemscan;
mod pkcs7;
mod pkcs12;

pub use keys::PrivateKey;

use crate::error::{Result, Source, TetError};

/// A parsed X.509 certificate. Holds the original DER bytes; structural
/// fields (subject, issuer, validity, SANs, key usage) are read lazily via
/// [`Certificate::parsed`] rather than duplicated into this struct, so a
/// `Certificate` is cheap to clone and carry around in bulk (the bundle
/// packager handles hundreds of these).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    /// Wrap already-validated DER bytes.
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let (remainder, _) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| TetError::parse(Source::Certificate, DisplayErr(e.to_string())))?;
        if !remainder.is_empty() {
            return Err(TetError::decode_msg(Source::Certificate, "trailing data"));
        }
        Ok(Certificate { der })
    }

    /// The certificate's DER bytes.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Parse the structural view on demand (subject, issuer, validity,
    /// extensions). Borrows `self`'s DER for the lifetime of the result.
    pub fn parsed(&self) -> Result<x509_parser::certificate::X509Certificate<'_>> {
        let (remainder, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| TetError::parse(Source::Certificate, DisplayErr(e.to_string())))?;
        if !remainder.is_empty() {
            return Err(TetError::decode_msg(Source::Certificate, "trailing data"));
        }
        Ok(cert)
    }

    /// PEM-encode this certificate alone (`CERTIFICATE` block).
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.der.clone()))
    }
}

#[derive(Debug)]
struct DisplayErr(String);
impl std::fmt::Display for DisplayErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
impl std::error::Error for DisplayErr {}

/// Everything a successful [`ingest`] call can produce: zero or more
/// certificates and, if the input carried one, a private key.
#[derive(Debug, Default)]
pub struct Ingested {
    /// Certificates found, in file order.
    pub certificates: Vec<Certificate>,
    /// A private key, if one was present (and decryptable).
    pub private_key: Option<PrivateKey>,
}

/// PEM block labels recognized as certificates vs. CSRs vs. keys. `EC
/// PARAMETERS` blocks are recognized but skipped — OpenSSL emits them
/// alongside EC keys and they carry no key material.
const CERT_LABELS: &[&str] = &["CERTIFICATE"];
const CSR_LABELS: &[&str] = &["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];
const KEY_LABELS: &[&str] = &["PRIVATE KEY", "RSA PRIVATE KEY", "EC PRIVATE KEY"];

/// Ingest `input`, auto-detecting PEM, DER, PKCS#7, or PKCS#12. `password`
/// is used only for encrypted PEM keys and PKCS#12 bags.
pub fn ingest(input: &[u8], password: Option<&str>) -> Result<Ingested> {
    if input.is_empty() {
        return Err(TetError::EmptyCertificate);
    }

    if looks_like_pem(input) {
        return ingest_pem(input, password);
    }

    if let Ok(pkcs12) = pkcs12::parse(input, password.unwrap_or("")) {
        return Ok(pkcs12);
    }

    if let Ok(certs) = pkcs7::parse_signed_data(input) {
        return Ok(Ingested { certificates: certs, private_key: None });
    }

    // Fall back to bare DER: either one certificate or one private key
    // (PKCS#8), whichever parses.
    if let Ok(cert) = Certificate::from_der(input.to_vec()) {
        return Ok(Ingested { certificates: vec![cert], private_key: None });
    }
    let key = keys::parse_private_key_der(input, password)?;
    Ok(Ingested { certificates: Vec::new(), private_key: Some(key) })
}

fn looks_like_pem(input: &[u8]) -> bool {
    input.starts_with(b"-----BEGIN")
}

fn ingest_pem(input: &[u8], password: Option<&str>) -> Result<Ingested> {
    let text = std::str::from_utf8(input).map_err(|e| TetError::decode(Source::Certificate, e))?;
    let mut certificates = Vec::new();
    let mut private_key = None;

    for block in pemscan::scan(text)? {
        let label = block.label.as_str();
        if CERT_LABELS.contains(&label) {
            certificates.push(Certificate::from_der(block.decode_body()?)?);
        } else if CSR_LABELS.contains(&label) {
            // CSRs are not certificates; ingest() only surfaces certs and
            // keys, so a bare CSR block is silently skipped here. Callers
            // that need CSR parsing use a dedicated entry point (out of
            // scope for the mandatory contract beyond recognizing the
            // block type so it doesn't trip "invalid PEM type").
            continue;
        } else if label == "EC PARAMETERS" {
            continue;
        } else if KEY_LABELS.contains(&label) {
            if private_key.is_some() {
                return Err(TetError::decode_msg(Source::PrivateKey, "trailing data: multiple private keys in input"));
            }
            private_key = Some(keys::parse_pem_key_block(&block, password)?);
        } else {
            return Err(TetError::InvalidPemType {
                have: label.to_string(),
                want: CERT_LABELS.iter().chain(KEY_LABELS).map(|s| s.to_string()).collect(),
            });
        }
    }

    if certificates.is_empty() && private_key.is_none() {
        return Err(TetError::EmptyCertificate);
    }

    Ok(Ingested { certificates, private_key })
}

/// Encode `certs` as a sequence of PEM `CERTIFICATE` blocks, in order.
pub fn encode_pem(certs: &[Certificate]) -> String {
    certs.iter().map(Certificate::to_pem).collect()
}

/// Encode `certs` as raw DER, concatenated in order (the "single-file DER
/// bundle" form described in §4.F).
pub fn encode_der_bundle(certs: &[Certificate]) -> Vec<u8> {
    certs.iter().flat_map(|c| c.der.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_empty_certificate_error() {
        let err = ingest(b"", None).unwrap_err();
        assert!(matches!(err, TetError::EmptyCertificate));
    }

    #[test]
    fn unrecognized_pem_label_is_invalid_pem_type() {
        let pem_text = "-----BEGIN BOGUS-----\nQUJD\n-----END BOGUS-----\n";
        let err = ingest(pem_text.as_bytes(), None).unwrap_err();
        assert!(matches!(err, TetError::InvalidPemType { .. }));
    }

    fn generate_der_cert() -> Vec<u8> {
        use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "test");
        params.distinguished_name = dn;
        params.self_signed(&key).unwrap().der().to_vec()
    }

    #[test]
    fn from_der_accepts_exact_der() {
        let der = generate_der_cert();
        Certificate::from_der(der).unwrap();
    }

    #[test]
    fn from_der_rejects_trailing_bytes() {
        let mut der = generate_der_cert();
        der.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let err = Certificate::from_der(der).unwrap_err();
        assert_eq!(err.source_kind().map(|(_, k)| k), Some(crate::error::Kind::Decode));
    }
}
