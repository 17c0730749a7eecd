//! Key Matcher (§4.G).
//!
//! Decides whether a private key matches a certificate's public key, with
//! a human-readable explanation on mismatch.

use crate::certs::{Certificate, PrivateKey};
use crate::error::{Result, Source, TetError};
use rsa::traits::PublicKeyParts;
use x509_parser::public_key::PublicKey as ParsedPublicKey;

/// The classification of an ECDSA curve used for symmetric matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Curve {
    P256,
    P384,
    P521,
    Invalid,
}

/// The certificate's or key's public-key shape, reduced to the fields the
/// matcher needs (§9 "Tagged variants over duck typing").
enum KeyShape {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ecdsa { curve: Curve, x: Vec<u8>, y: Vec<u8> },
    Other(String),
}

/// Compare `cert`'s public key against `key`. Returns `Ok(())` on match,
/// `Ok(Err(reason))`-shaped as `Ok(false_reason)`... — concretely: `Ok(true, "")`
/// is represented as `MatchResult::Match`; see [`MatchResult`].
pub fn match_keys(cert: &Certificate, key: &PrivateKey) -> Result<MatchResult> {
    let cert_shape = cert_public_key_shape(cert)?;
    let key_shape = private_key_public_shape(key);

    Ok(match (&cert_shape, &key_shape) {
        (KeyShape::Rsa { n: n1, e: e1 }, KeyShape::Rsa { n: n2, e: e2 }) => {
            if n1 == n2 && e1 == e2 {
                MatchResult::Match
            } else {
                MatchResult::Mismatch("public keys don't match".to_string())
            }
        }
        (KeyShape::Rsa { .. }, KeyShape::Ecdsa { .. }) => {
            MatchResult::Mismatch("RSA private key, EC public key".to_string())
        }
        (KeyShape::Ecdsa { .. }, KeyShape::Rsa { .. }) => {
            MatchResult::Mismatch("private key is EC, certificate is RSA".to_string())
        }
        (KeyShape::Ecdsa { curve: c1, x: x1, y: y1 }, KeyShape::Ecdsa { curve: c2, x: x2, y: y2 }) => {
            if *c1 == Curve::Invalid || *c2 == Curve::Invalid {
                MatchResult::Mismatch("invalid private key curve".to_string())
            } else if c1 != c2 {
                MatchResult::Mismatch("EC curves don't match".to_string())
            } else if x1 == x2 && y1 == y2 {
                MatchResult::Match
            } else {
                MatchResult::Mismatch("public keys don't match".to_string())
            }
        }
        (KeyShape::Other(desc), _) => {
            MatchResult::Mismatch(format!("unsupported certificate public key type: {desc}"))
        }
        (_, KeyShape::Other(desc)) => MatchResult::Mismatch(format!("unrecognised private key type: {desc}")),
    })
}

/// The outcome of [`match_keys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// The key matches the certificate's public key.
    Match,
    /// The key does not match; the string explains why.
    Mismatch(String),
}

impl MatchResult {
    /// True iff this is [`MatchResult::Match`].
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match)
    }
}

fn cert_public_key_shape(cert: &Certificate) -> Result<KeyShape> {
    let parsed = cert.parsed()?;
    let spki = parsed.public_key();
    match spki.parsed().map_err(|e| TetError::parse(Source::Certificate, DisplayErr(e.to_string())))? {
        ParsedPublicKey::RSA(rsa) => Ok(KeyShape::Rsa { n: rsa.modulus.to_vec(), e: rsa.exponent.to_vec() }),
        ParsedPublicKey::EC(ec) => {
            let curve = classify_oid(spki.algorithm.parameters.as_ref().and_then(|p| p.as_oid().ok()).as_ref());
            let point_bytes: &[u8] = &ec;
            let (x, y) = split_uncompressed_point(point_bytes);
            Ok(KeyShape::Ecdsa { curve, x, y })
        }
        other => Ok(KeyShape::Other(format!("{other:?}"))),
    }
}

fn classify_oid(oid: Option<&x509_parser::der_parser::oid::Oid<'_>>) -> Curve {
    const P256: &str = "1.2.840.10045.3.1.7";
    const P384: &str = "1.3.132.0.34";
    const P521: &str = "1.3.132.0.35";

    let Some(oid) = oid else { return Curve::Invalid };
    match oid.to_string().as_str() {
        P256 => Curve::P256,
        P384 => Curve::P384,
        P521 => Curve::P521,
        _ => Curve::Invalid,
    }
}

/// Split an uncompressed SEC1 point (`0x04 || X || Y`) into its halves.
fn split_uncompressed_point(bytes: &[u8]) -> (Vec<u8>, Vec<u8>) {
    if bytes.first() != Some(&0x04) || bytes.len() < 3 || (bytes.len() - 1) % 2 != 0 {
        return (Vec::new(), Vec::new());
    }
    let half = (bytes.len() - 1) / 2;
    (bytes[1..1 + half].to_vec(), bytes[1 + half..].to_vec())
}

fn private_key_public_shape(key: &PrivateKey) -> KeyShape {
    match key {
        PrivateKey::Rsa(rsa) => {
            KeyShape::Rsa { n: rsa.n().to_bytes_be(), e: rsa.e().to_bytes_be() }
        }
        PrivateKey::EcdsaP256(secret) => {
            let point = secret.public_key().to_encoded_point(false);
            KeyShape::Ecdsa {
                curve: Curve::P256,
                x: point.x().map(|b| b.to_vec()).unwrap_or_default(),
                y: point.y().map(|b| b.to_vec()).unwrap_or_default(),
            }
        }
        PrivateKey::EcdsaP384(secret) => {
            let point = secret.public_key().to_encoded_point(false);
            KeyShape::Ecdsa {
                curve: Curve::P384,
                x: point.x().map(|b| b.to_vec()).unwrap_or_default(),
                y: point.y().map(|b| b.to_vec()).unwrap_or_default(),
            }
        }
        PrivateKey::EcdsaP521(secret) => {
            let point = secret.public_key().to_encoded_point(false);
            KeyShape::Ecdsa {
                curve: Curve::P521,
                x: point.x().map(|b| b.to_vec()).unwrap_or_default(),
                y: point.y().map(|b| b.to_vec()).unwrap_or_default(),
            }
        }
        PrivateKey::Ed25519(_) => KeyShape::Other("Ed25519 (out of scope for this matcher)".to_string()),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_classification() {
        assert_eq!(classify_oid(None), Curve::Invalid);
    }

    #[test]
    fn split_point_rejects_short_input() {
        assert_eq!(split_uncompressed_point(&[0x04, 0x01]), (Vec::new(), Vec::new()));
    }

    #[test]
    fn split_point_even_halves() {
        let mut bytes = vec![0x04];
        bytes.extend_from_slice(&[1u8; 32]);
        bytes.extend_from_slice(&[2u8; 32]);
        let (x, y) = split_uncompressed_point(&bytes);
        assert_eq!(x, vec![1u8; 32]);
        assert_eq!(y, vec![2u8; 32]);
    }

    #[test]
    fn match_result_is_match_helper() {
        assert!(MatchResult::Match.is_match());
        assert!(!MatchResult::Mismatch("x".into()).is_match());
    }
}
