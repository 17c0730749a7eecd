//! PKCS#12 bag parsing.
//!
//! Supports the common shapes produced by OpenSSL: an unencrypted outer
//! `AuthenticatedSafe` (`ContentInfo` of type `data`) carrying a `CertBag`
//! per certificate and either a plain `KeyBag` or a `PKCS8ShroudedKeyBag`
//! for the private key. Shrouded keys encrypted with PBES2 (modern OpenSSL
//! 3.x default) decrypt via the `pkcs8` crate directly; keys encrypted
//! with the legacy `pbeWithSHAAnd3KeyTripleDES-CBC` scheme are decrypted
//! with a hand-rolled RFC 7292 Appendix B key-derivation function, since no
//! crate in the dependency set implements the PKCS#12 KDF (it differs from
//! PKCS#5's). `CertBag`s protected by the legacy RC2-40 `encryptedData`
//! content type are out of scope (no RC2 implementation in the dependency
//! set) and surface a decode-kind error naming the limitation.

use super::{keys::PrivateKey, Certificate, Ingested};
use crate::error::{Result, Source, TetError};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use der::asn1::{ObjectIdentifier, OctetStringRef};
use der::{Decode, Sequence};
use sha1::{Digest, Sha1};
use zeroize::Zeroize;

const OID_DATA: &str = "1.2.840.113549.1.7.1";
const OID_CERT_BAG: &str = "1.2.840.113549.1.12.10.1.3";
const OID_KEY_BAG: &str = "1.2.840.113549.1.12.10.1.1";
const OID_SHROUDED_KEY_BAG: &str = "1.2.840.113549.1.12.10.1.2";
const OID_PBE_SHA1_3DES: &str = "1.2.840.113549.1.12.1.3";
const OID_X509_CERTIFICATE: &str = "1.2.840.113549.1.9.22.1";

#[derive(Sequence)]
struct Pfx<'a> {
    version: i32,
    auth_safe: ContentInfoData<'a>,
    #[asn1(optional = "true")]
    mac_data: Option<der::Any>,
}

#[derive(Sequence)]
struct ContentInfoData<'a> {
    content_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    content: OctetStringRef<'a>,
}

#[derive(Sequence)]
struct SafeBag<'a> {
    bag_id: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    bag_value: der::AnyRef<'a>,
    #[asn1(optional = "true")]
    bag_attributes: Option<der::asn1::SetOfVec<der::Any>>,
}

#[derive(Sequence)]
struct CertBag<'a> {
    cert_id: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    cert_value: OctetStringRef<'a>,
}

#[derive(Sequence)]
struct EncryptedPbe1Params {
    salt: der::asn1::OctetString,
    iterations: u32,
}

/// Parse a PKCS#12 blob, returning every certificate and the private key
/// (if present and decryptable with `password`).
pub(crate) fn parse(input: &[u8], password: &str) -> Result<Ingested> {
    let pfx = Pfx::from_der(input).map_err(|e| TetError::parse(Source::Certificate, e))?;

    let data_oid: ObjectIdentifier = OID_DATA.parse().expect("valid OID literal");
    if pfx.auth_safe.content_type != data_oid {
        return Err(TetError::decode_msg(
            Source::Certificate,
            "PKCS#12 authSafe content type is not `data` (encrypted AuthenticatedSafe is unsupported)",
        ));
    }

    let content_infos = <Vec<ContentInfoData>>::from_der(pfx.auth_safe.content.as_bytes())
        .map_err(|e| TetError::decode(Source::Certificate, e))?;

    let mut certificates = Vec::new();
    let mut private_key = None;

    for ci in content_infos {
        if ci.content_type != data_oid {
            return Err(TetError::decode_msg(
                Source::Certificate,
                "PKCS#12 safe-contents entry is `encryptedData` (legacy RC2-protected cert bags are unsupported)",
            ));
        }

        let bags = <Vec<SafeBag>>::from_der(ci.content.as_bytes())
            .map_err(|e| TetError::decode(Source::Certificate, e))?;

        for bag in bags {
            // `bagValue` is `[0] EXPLICIT ANY`: the captured `AnyRef` holds
            // the inner value's own tag (SEQUENCE, for every bag type used
            // here), so re-encoding it with `to_der()` reconstructs the
            // full TLV the inner type's `from_der` expects — `.value()`
            // alone would strip that tag.
            let bag_value_der = der_encode(&bag.bag_value)?;
            let bag_oid_str = bag.bag_id.to_string();
            if bag_oid_str == OID_CERT_BAG {
                let cert_bag = CertBag::from_der(&bag_value_der)
                    .map_err(|e| TetError::decode(Source::Certificate, e))?;
                let x509_oid: ObjectIdentifier = OID_X509_CERTIFICATE.parse().expect("valid OID literal");
                if cert_bag.cert_id == x509_oid {
                    certificates.push(Certificate::from_der(cert_bag.cert_value.as_bytes().to_vec())?);
                }
            } else if bag_oid_str == OID_KEY_BAG {
                private_key = Some(super::keys::parse_private_key_der(&bag_value_der, Some(password))?);
            } else if bag_oid_str == OID_SHROUDED_KEY_BAG {
                let der_bytes = decrypt_shrouded_key_bag(&bag_value_der, password)?;
                private_key = Some(super::keys::parse_private_key_der(&der_bytes, Some(password))?);
            }
        }
    }

    if certificates.is_empty() && private_key.is_none() {
        return Err(TetError::decode_msg(Source::PrivateKey, "PKCS#12 bag contains no certificate or private key"));
    }

    Ok(Ingested { certificates, private_key })
}

fn der_encode(value: &der::AnyRef<'_>) -> Result<Vec<u8>> {
    use der::Encode;
    value.to_der().map_err(|e| TetError::decode(Source::Certificate, e))
}

fn decrypt_shrouded_key_bag(der_bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    if let Ok(enc) = pkcs8::EncryptedPrivateKeyInfo::from_der(der_bytes) {
        if let Ok(doc) = enc.decrypt(password) {
            return Ok(doc.as_bytes().to_vec());
        }

        let oid_str = enc.encryption_algorithm.oid.to_string();
        if oid_str == OID_PBE_SHA1_3DES {
            let params_any = enc
                .encryption_algorithm
                .parameters
                .ok_or_else(|| TetError::decode_msg(Source::PrivateKey, "missing PBE parameters"))?;
            let params = EncryptedPbe1Params::from_der(&der_encode(&params_any)?)
                .map_err(|e| TetError::decode(Source::PrivateKey, e))?;

            let mut key = pkcs12_kdf(password, params.salt.as_bytes(), params.iterations, 1, 24);
            let mut iv = pkcs12_kdf(password, params.salt.as_bytes(), params.iterations, 2, 8);

            let mut buf = enc.encrypted_data.to_vec();
            type Dec = cbc::Decryptor<des::TdesEde3>;
            let result = Dec::new_from_slices(&key, &iv)
                .map_err(|e| TetError::decode_msg(Source::PrivateKey, e.to_string()))
                .and_then(|dec| {
                    dec.decrypt_padded_mut::<Pkcs7>(&mut buf)
                        .map(|out| out.len())
                        .map_err(|e| TetError::decode_msg(Source::PrivateKey, e.to_string()))
                });
            key.zeroize();
            iv.zeroize();
            let len = result?;
            buf.truncate(len);
            return Ok(buf);
        }

        return Err(TetError::decode_msg(
            Source::PrivateKey,
            format!("unsupported PKCS#12 key-bag encryption algorithm: {oid_str}"),
        ));
    }

    Err(TetError::decode_msg(Source::PrivateKey, "malformed PKCS8ShroudedKeyBag"))
}

/// RFC 7292 Appendix B key-derivation function. `id` selects the
/// diversifier: 1 for an encryption key, 2 for an IV, 3 for a MAC key.
fn pkcs12_kdf(password: &str, salt: &[u8], iterations: u32, id: u8, output_len: usize) -> Vec<u8> {
    const U: usize = 20; // SHA-1 output size
    const V: usize = 64; // SHA-1 block size

    let mut password_utf16 = utf16be_with_null(password);

    let d = vec![id; V];
    let s = repeat_to_multiple(salt, V);
    let p = repeat_to_multiple(&password_utf16, V);
    password_utf16.zeroize();

    let mut i = [s, p].concat();
    let mut result = Vec::with_capacity(output_len + U);

    while result.len() < output_len {
        let mut a = Sha1::digest([d.as_slice(), i.as_slice()].concat()).to_vec();
        for _ in 1..iterations {
            a = Sha1::digest(&a).to_vec();
        }
        result.extend_from_slice(&a);

        let b = repeat_to_multiple(&a, V);
        for block in i.chunks_mut(V) {
            add_with_carry(block, &b);
        }
    }

    result.truncate(output_len);
    result
}

fn repeat_to_multiple(data: &[u8], block: usize) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let total = block * data.len().div_ceil(block);
    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        out.extend_from_slice(data);
    }
    out.truncate(total);
    out
}

fn add_with_carry(block: &mut [u8], addend: &[u8]) {
    let mut carry: u16 = 1;
    for k in (0..block.len()).rev() {
        let sum = block[k] as u16 + addend[k] as u16 + carry;
        block[k] = (sum & 0xff) as u8;
        carry = sum >> 8;
    }
}

fn utf16be_with_null(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2 + 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic_and_sized() {
        let a = pkcs12_kdf("hunter2", b"saltsalt", 2048, 1, 24);
        let b = pkcs12_kdf("hunter2", b"saltsalt", 2048, 1, 24);
        assert_eq!(a, b);
        assert_eq!(a.len(), 24);
    }

    #[test]
    fn kdf_differs_by_id() {
        let key = pkcs12_kdf("hunter2", b"saltsalt", 2048, 1, 24);
        let iv = pkcs12_kdf("hunter2", b"saltsalt", 2048, 2, 8);
        assert_ne!(&key[..8], &iv[..]);
    }

    #[test]
    fn utf16_encoding_is_null_terminated() {
        let encoded = utf16be_with_null("ab");
        assert_eq!(encoded, vec![0x00, 0x61, 0x00, 0x62, 0x00, 0x00]);
    }
}
