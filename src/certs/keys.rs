//! Private-key parsing: PKCS#8 → PKCS#1 → SEC1 EC → Ed25519, plus legacy
//! OpenSSL encrypted-PEM decryption (`Proc-Type: ENCRYPTED`).

use crate::error::{Result, Source, TetError};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use der::Decode;
use md5::{Digest, Md5};
use pkcs1::DecodeRsaPrivateKey;
use pkcs8::{DecodePrivateKey, PrivateKeyInfo};
use sec1::DecodeEcPrivateKey;
use zeroize::Zeroize;

/// A parsed private key, tagged by the algorithm that parsed it
/// successfully (the crate never guesses a curve from key length alone).
#[derive(Clone)]
pub enum PrivateKey {
    /// RSA, any modulus size.
    Rsa(Box<rsa::RsaPrivateKey>),
    /// NIST P-256.
    EcdsaP256(Box<p256::SecretKey>),
    /// NIST P-384.
    EcdsaP384(Box<p384::SecretKey>),
    /// NIST P-521.
    EcdsaP521(Box<p521::SecretKey>),
    /// Ed25519, OID `1.3.101.112`.
    Ed25519(Box<ed25519_dalek::SigningKey>),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            PrivateKey::Rsa(_) => "Rsa",
            PrivateKey::EcdsaP256(_) => "EcdsaP256",
            PrivateKey::EcdsaP384(_) => "EcdsaP384",
            PrivateKey::EcdsaP521(_) => "EcdsaP521",
            PrivateKey::Ed25519(_) => "Ed25519",
        };
        write!(f, "PrivateKey::{kind}(..)")
    }
}

/// Parse a PEM `PRIVATE KEY` / `RSA PRIVATE KEY` / `EC PRIVATE KEY` block,
/// decrypting it first if it carries legacy OpenSSL `Proc-Type` headers.
pub(crate) fn parse_pem_key_block(block: &super::pemscan::RawPemBlock, password: Option<&str>) -> Result<PrivateKey> {
    let is_encrypted = block.header("Proc-Type").map(|v| v.contains("ENCRYPTED")).unwrap_or(false);

    let der = if is_encrypted {
        let dek_info = block
            .header("DEK-Info")
            .ok_or_else(|| TetError::decode_msg(Source::PrivateKey, "ENCRYPTED key missing DEK-Info header"))?;
        let password = password.ok_or(TetError::EncryptedPrivateKey)?;
        decrypt_legacy_pem_bytes(&block.decode_body()?, dek_info, password)?
    } else {
        block.decode_body()?
    };

    parse_private_key_der(&der, password)
}

/// Try PKCS#8 → PKCS#1 → SEC1 EC → Ed25519, in that order; the last
/// parser's failure is surfaced wrapped as a parse-kind error.
pub(crate) fn parse_private_key_der(der: &[u8], password: Option<&str>) -> Result<PrivateKey> {
    if let Ok(info) = PrivateKeyInfo::from_der(der) {
        if let Some(key) = dispatch_pkcs8(&info) {
            return Ok(key);
        }
    }

    if let Ok(key) = pkcs8::EncryptedPrivateKeyInfo::from_der(der) {
        if let Some(password) = password {
            if let Ok(doc) = key.decrypt(password) {
                if let Ok(info) = PrivateKeyInfo::from_der(doc.as_bytes()) {
                    if let Some(key) = dispatch_pkcs8(&info) {
                        return Ok(key);
                    }
                }
            }
        } else {
            return Err(TetError::EncryptedPrivateKey);
        }
    }

    if let Ok(rsa) = rsa::RsaPrivateKey::from_pkcs1_der(der) {
        return Ok(PrivateKey::Rsa(Box::new(rsa)));
    }

    if let Ok(sec1) = p256::SecretKey::from_sec1_der(der) {
        return Ok(PrivateKey::EcdsaP256(Box::new(sec1)));
    }
    if let Ok(sec1) = p384::SecretKey::from_sec1_der(der) {
        return Ok(PrivateKey::EcdsaP384(Box::new(sec1)));
    }
    if let Ok(sec1) = p521::SecretKey::from_sec1_der(der) {
        return Ok(PrivateKey::EcdsaP521(Box::new(sec1)));
    }

    match ed25519_seed_from_curve_private_key(der) {
        Some(seed) => Ok(PrivateKey::Ed25519(Box::new(ed25519_dalek::SigningKey::from_bytes(&seed)))),
        None => Err(TetError::parse(Source::PrivateKey, UnrecognizedKeyFormat)),
    }
}

fn dispatch_pkcs8(info: &PrivateKeyInfo<'_>) -> Option<PrivateKey> {
    use const_oid::db::{rfc5912, rfc8410};

    match info.algorithm.oid {
        rfc5912::RSA_ENCRYPTION => rsa::RsaPrivateKey::from_pkcs8_der(&reencode(info)?)
            .ok()
            .map(|k| PrivateKey::Rsa(Box::new(k))),
        rfc5912::ID_EC_PUBLIC_KEY => {
            let params = info.algorithm.parameters_oid().ok()?;
            if params == rfc5912::SECP_256_R_1 {
                p256::SecretKey::from_pkcs8_der(&reencode(info)?).ok().map(|k| PrivateKey::EcdsaP256(Box::new(k)))
            } else if params == rfc5912::SECP_384_R_1 {
                p384::SecretKey::from_pkcs8_der(&reencode(info)?).ok().map(|k| PrivateKey::EcdsaP384(Box::new(k)))
            } else {
                p521::SecretKey::from_pkcs8_der(&reencode(info)?).ok().map(|k| PrivateKey::EcdsaP521(Box::new(k)))
            }
        }
        rfc8410::ID_ED_25519 => ed25519_dalek::SigningKey::from_pkcs8_der(&reencode(info)?)
            .ok()
            .map(|k| PrivateKey::Ed25519(Box::new(k))),
        _ => None,
    }
}

fn reencode(info: &PrivateKeyInfo<'_>) -> Option<Vec<u8>> {
    use der::Encode;
    info.to_der().ok()
}

/// The `CurvePrivateKey` octet-string-of-an-octet-string seed format used
/// by the explicit Ed25519 `OneAsymmetricKey` encoding (draft-ietf-curdle-
/// pkix-04, OID `1.3.101.112`): a bare PKCS#8 `PrivateKeyInfo` whose
/// `privateKey` field, once re-parsed as `OCTET STRING`, yields exactly 32
/// bytes. Used as the last-resort fallback when `dispatch_pkcs8` doesn't
/// recognize the outer structure (e.g. a raw `OneAsymmetricKey` with no
/// OID match path taken above, or a bare 32-byte seed).
fn ed25519_seed_from_curve_private_key(der: &[u8]) -> Option<[u8; 32]> {
    if let Ok(info) = PrivateKeyInfo::from_der(der) {
        if info.algorithm.oid == const_oid::db::rfc8410::ID_ED_25519 {
            let inner = der::asn1::OctetStringRef::from_der(info.private_key).ok()?;
            return inner.as_bytes().try_into().ok();
        }
    }
    der.try_into().ok()
}

#[derive(Debug, thiserror::Error)]
#[error("private key data did not match PKCS#8, PKCS#1, SEC1, or Ed25519")]
struct UnrecognizedKeyFormat;

/// Decrypt a legacy OpenSSL encrypted PEM body given its `DEK-Info` header
/// value and ciphertext (already base64-decoded by the caller).
pub(crate) fn decrypt_legacy_pem_bytes(ciphertext: &[u8], dek_info: &str, password: &str) -> Result<Vec<u8>> {
    let (algo, hex_iv) = dek_info
        .split_once(',')
        .ok_or_else(|| TetError::decode_msg(Source::PrivateKey, "malformed DEK-Info header"))?;
    let iv = hex::decode(hex_iv.trim()).map_err(|e| TetError::decode(Source::PrivateKey, e))?;
    let salt = &iv[..8.min(iv.len())];

    let (key_len, decrypt): (usize, fn(&[u8], &[u8], &mut Vec<u8>) -> Result<()>) = match algo.trim() {
        "DES-EDE3-CBC" => (24, decrypt_des_ede3_cbc),
        "AES-128-CBC" => (16, decrypt_aes128_cbc),
        "AES-256-CBC" => (32, decrypt_aes256_cbc),
        other => {
            return Err(TetError::decode_msg(Source::PrivateKey, format!("unsupported DEK-Info cipher: {other}")))
        }
    };

    let (mut key, _) = evp_bytes_to_key(password.as_bytes(), salt, key_len, iv.len());
    let mut buf = ciphertext.to_vec();
    let result = decrypt(&key, &iv, &mut buf);
    key.zeroize();
    result?;
    Ok(buf)
}

fn evp_bytes_to_key(password: &[u8], salt: &[u8], key_len: usize, iv_len: usize) -> (Vec<u8>, Vec<u8>) {
    let mut derived = Vec::new();
    let mut prev: Vec<u8> = Vec::new();
    while derived.len() < key_len + iv_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        hasher.update(salt);
        let digest = hasher.finalize();
        derived.extend_from_slice(&digest);
        prev = digest.to_vec();
    }
    let key = derived[..key_len].to_vec();
    let iv = derived[key_len..key_len + iv_len].to_vec();
    derived.zeroize();
    (key, iv)
}

fn decrypt_des_ede3_cbc(key: &[u8], iv: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    type Dec = cbc::Decryptor<des::TdesEde3>;
    let dec = Dec::new_from_slices(key, iv).map_err(|e| TetError::decode_msg(Source::PrivateKey, e.to_string()))?;
    let len = dec
        .decrypt_padded_mut::<Pkcs7>(buf)
        .map_err(|e| TetError::decode_msg(Source::PrivateKey, e.to_string()))?
        .len();
    buf.truncate(len);
    Ok(())
}

fn decrypt_aes128_cbc(key: &[u8], iv: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    type Dec = cbc::Decryptor<aes::Aes128>;
    let dec = Dec::new_from_slices(key, iv).map_err(|e| TetError::decode_msg(Source::PrivateKey, e.to_string()))?;
    let len = dec
        .decrypt_padded_mut::<Pkcs7>(buf)
        .map_err(|e| TetError::decode_msg(Source::PrivateKey, e.to_string()))?
        .len();
    buf.truncate(len);
    Ok(())
}

fn decrypt_aes256_cbc(key: &[u8], iv: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    type Dec = cbc::Decryptor<aes::Aes256>;
    let dec = Dec::new_from_slices(key, iv).map_err(|e| TetError::decode_msg(Source::PrivateKey, e.to_string()))?;
    let len = dec
        .decrypt_padded_mut::<Pkcs7>(buf)
        .map_err(|e| TetError::decode_msg(Source::PrivateKey, e.to_string()))?
        .len();
    buf.truncate(len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evp_bytes_to_key_is_deterministic() {
        let (k1, iv1) = evp_bytes_to_key(b"hunter2", b"saltsalt", 24, 8);
        let (k2, iv2) = evp_bytes_to_key(b"hunter2", b"saltsalt", 24, 8);
        assert_eq!(k1, k2);
        assert_eq!(iv1, iv2);
        assert_eq!(k1.len(), 24);
        assert_eq!(iv1.len(), 8);
    }

    #[test]
    fn unrecognized_key_is_parse_error() {
        let err = parse_private_key_der(b"not a key", None).unwrap_err();
        assert_eq!(err.source_kind().map(|(_, k)| k), Some(crate::error::Kind::Parse));
    }
}
