//! RFC 6960 OCSP request/response framing.
//!
//! The request side is small enough (one `CertID`, no extensions, no
//! signed request) that it is hand-encoded rather than built through a
//! `der`-derive `Sequence`: every field is either a fixed-shape OCTET
//! STRING/INTEGER/OID or a DEFAULT-elided optional, so there is nothing a
//! derive macro buys over writing the TLVs directly. The response side
//! does use `der`-derive structs, since unlike the request it has a
//! variable number of `SingleResponse`s and optional extensions to skip
//! over.
//!
//! `certStatus` and `responseStatus` are CHOICE/ENUMERATED values read by
//! inspecting the first byte of their re-encoded TLV rather than through a
//! typed `Enumerated` derive: the tag byte alone (`0x80`/`0xA1`/`0x82` for
//! good/revoked/unknown, `0x0A` for the top-level ENUMERATED) fully
//! determines the variant per DER's fixed encoding rules, and doing it
//! this way avoids depending on exact `der` crate enum-derive naming.

use crate::error::{Result, Source, TetError};
use der::{Decode, Sequence};
use sha1::{Digest, Sha1};

const OID_SHA1: &str = "1.3.14.3.2.26";
const OID_BASIC_RESPONSE: &str = "1.3.6.1.5.5.7.48.1.1";

/// Everything needed to build a `CertID` for the certificate being
/// checked: the issuer's name hash, key hash (both SHA-1, per RFC 6960's
/// default hash algorithm), and the certificate's own serial number.
pub(crate) struct CertKey {
    pub issuer_name_hash: [u8; 20],
    pub issuer_key_hash: [u8; 20],
    pub serial: Vec<u8>,
}

impl CertKey {
    pub(crate) fn new(issuer_raw_subject: &[u8], issuer_spki_bitstring: &[u8], serial: &[u8]) -> Self {
        CertKey {
            issuer_name_hash: Sha1::digest(issuer_raw_subject).into(),
            issuer_key_hash: Sha1::digest(issuer_spki_bitstring).into(),
            serial: serial.to_vec(),
        }
    }
}

/// Build a minimal OCSP request: `TBSRequest{requestList: [Request{reqCert:
/// CertID}]}`, version/requestorName/extensions all elided at their DER
/// defaults.
pub(crate) fn build_request(key: &CertKey) -> Vec<u8> {
    let cert_id = encode_sequence(&[
        &sha1_algorithm_identifier(),
        &encode_octet_string(&key.issuer_name_hash),
        &encode_octet_string(&key.issuer_key_hash),
        &encode_integer(&key.serial),
    ]);
    let request = encode_sequence(&[&cert_id]);
    let request_list = encode_sequence(&[&request]);
    let tbs_request = encode_sequence(&[&request_list]);
    encode_sequence(&[&tbs_request])
}

fn sha1_algorithm_identifier() -> Vec<u8> {
    encode_sequence(&[&encode_oid(OID_SHA1), &[0x05, 0x00]])
}

fn encode_oid(oid: &str) -> Vec<u8> {
    use der::Encode;
    let oid: der::asn1::ObjectIdentifier = oid.parse().expect("valid OID literal");
    oid.to_der().expect("OID always encodes")
}

fn encode_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else {
        let bytes = len.to_be_bytes();
        let trimmed: Vec<u8> = bytes.iter().copied().skip_while(|&b| b == 0).collect();
        let mut out = vec![0x80 | trimmed.len() as u8];
        out.extend(trimmed);
        out
    }
}

fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(encode_len(content.len()));
    out.extend_from_slice(content);
    out
}

fn encode_sequence(parts: &[&[u8]]) -> Vec<u8> {
    let content: Vec<u8> = parts.concat();
    encode_tlv(0x30, &content)
}

fn encode_octet_string(bytes: &[u8]) -> Vec<u8> {
    encode_tlv(0x04, bytes)
}

fn encode_integer(bytes: &[u8]) -> Vec<u8> {
    let mut b = bytes;
    while b.len() > 1 && b[0] == 0 && b[1] & 0x80 == 0 {
        b = &b[1..];
    }
    let mut content = Vec::new();
    if b.is_empty() {
        content.push(0);
    } else {
        if b[0] & 0x80 != 0 {
            content.push(0);
        }
        content.extend_from_slice(b);
    }
    encode_tlv(0x02, &content)
}

/// Decoded outcome of a `SingleResponse` that matched the `CertID` being
/// checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CertStatus {
    Good,
    Revoked,
    Unknown,
}

#[derive(Sequence)]
struct CertId<'a> {
    hash_algorithm: spki::AlgorithmIdentifierRef<'a>,
    issuer_name_hash: der::asn1::OctetStringRef<'a>,
    issuer_key_hash: der::asn1::OctetStringRef<'a>,
    serial_number: der::AnyRef<'a>,
}

#[derive(Sequence)]
struct SingleResponse<'a> {
    cert_id: CertId<'a>,
    cert_status: der::AnyRef<'a>,
    this_update: der::asn1::GeneralizedTime,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    next_update: Option<der::Any>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", constructed = "true", optional = "true")]
    single_extensions: Option<der::Any>,
}

#[derive(Sequence)]
struct ResponseData<'a> {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    version: Option<der::Any>,
    responder_id: der::AnyRef<'a>,
    produced_at: der::asn1::GeneralizedTime,
    responses: Vec<SingleResponse<'a>>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", constructed = "true", optional = "true")]
    response_extensions: Option<der::Any>,
}

#[derive(Sequence)]
struct BasicOcspResponse<'a> {
    tbs_response_data: der::AnyRef<'a>,
    signature_algorithm: spki::AlgorithmIdentifierRef<'a>,
    signature: der::asn1::BitStringRef<'a>,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", constructed = "true", optional = "true")]
    certs: Option<Vec<der::AnyRef<'a>>>,
}

#[derive(Sequence)]
struct ResponseBytes<'a> {
    response_type: der::asn1::ObjectIdentifier,
    response: der::asn1::OctetStringRef<'a>,
}

#[derive(Sequence)]
struct OcspResponse<'a> {
    response_status: der::AnyRef<'a>,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", constructed = "true", optional = "true")]
    response_bytes: Option<ResponseBytes<'a>>,
}

/// The result of decoding and signature-checking an OCSP response for one
/// `CertID`: the status the responder reported, plus the raw bytes that
/// were signed and the signature itself, so the caller can verify against
/// whichever public key it trusts (the issuer's, unless the response
/// embeds its own responder certificate).
pub(crate) struct ParsedResponse {
    pub status: CertStatus,
    pub tbs_response_data: Vec<u8>,
    pub signature_algorithm_oid: String,
    pub signature: Vec<u8>,
    pub responder_certs_der: Vec<Vec<u8>>,
}

/// Parse `response_der` and locate the `SingleResponse` matching `key`.
pub(crate) fn parse_response(response_der: &[u8], key: &CertKey) -> Result<ParsedResponse> {
    let response =
        OcspResponse::from_der(response_der).map_err(|e| TetError::decode(Source::Certificate, e))?;

    let status_der = der_encode(&response.response_status)?;
    let status_code = *status_der.last().unwrap_or(&0xff);
    if status_code != 0 {
        return Err(TetError::decode_msg(
            Source::Certificate,
            format!("OCSP responder returned non-successful status code {status_code}"),
        ));
    }

    let bytes = response
        .response_bytes
        .ok_or_else(|| TetError::decode_msg(Source::Certificate, "OCSP response carried no responseBytes"))?;

    let basic_oid: der::asn1::ObjectIdentifier = OID_BASIC_RESPONSE.parse().expect("valid OID literal");
    if bytes.response_type != basic_oid {
        return Err(TetError::decode_msg(
            Source::Certificate,
            format!("unsupported OCSP response type: {}", bytes.response_type),
        ));
    }

    let basic = BasicOcspResponse::from_der(bytes.response.as_bytes())
        .map_err(|e| TetError::decode(Source::Certificate, e))?;

    let tbs_response_data = der_encode(&basic.tbs_response_data)?;
    let response_data =
        ResponseData::from_der(&tbs_response_data).map_err(|e| TetError::decode(Source::Certificate, e))?;

    let matching = response_data
        .responses
        .iter()
        .find(|r| cert_id_matches(&r.cert_id, key))
        .ok_or_else(|| {
            TetError::decode_msg(Source::Certificate, "OCSP response did not include the requested certificate")
        })?;

    let status_der = der_encode(&matching.cert_status)?;
    let status = match status_der.first() {
        Some(0x80) => CertStatus::Good,
        Some(0xA1) => CertStatus::Revoked,
        Some(0x82) => CertStatus::Unknown,
        _ => {
            return Err(TetError::decode_msg(Source::Certificate, "unrecognized OCSP certStatus tag"));
        }
    };

    Ok(ParsedResponse {
        status,
        tbs_response_data,
        signature_algorithm_oid: basic.signature_algorithm.oid.to_string(),
        signature: basic.signature.as_bytes().unwrap_or_default().to_vec(),
        responder_certs_der: basic
            .certs
            .unwrap_or_default()
            .iter()
            .filter_map(|c| der_encode(c).ok())
            .collect(),
    })
}

fn cert_id_matches(id: &CertId<'_>, key: &CertKey) -> bool {
    id.issuer_name_hash.as_bytes() == key.issuer_name_hash
        && id.issuer_key_hash.as_bytes() == key.issuer_key_hash
        && trim_leading_zero(id.serial_number.value()) == trim_leading_zero(&key.serial)
}

fn trim_leading_zero(bytes: &[u8]) -> &[u8] {
    let mut b = bytes;
    while b.len() > 1 && b[0] == 0 {
        b = &b[1..];
    }
    b
}

fn der_encode<T: der::Encode>(value: &T) -> Result<Vec<u8>> {
    value.to_der().map_err(|e| TetError::decode(Source::Certificate, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_well_formed_der_sequence() {
        let key = CertKey { issuer_name_hash: [1u8; 20], issuer_key_hash: [2u8; 20], serial: vec![0x01, 0x02] };
        let req = build_request(&key);
        assert_eq!(req[0], 0x30);
        assert!(req.len() > 10);
    }

    #[test]
    fn integer_encoding_pads_high_bit() {
        assert_eq!(encode_integer(&[0x80]), vec![0x02, 0x02, 0x00, 0x80]);
    }

    #[test]
    fn integer_encoding_strips_redundant_leading_zero() {
        assert_eq!(encode_integer(&[0x00, 0x01]), vec![0x02, 0x01, 0x01]);
    }

    #[test]
    fn trim_leading_zero_keeps_single_zero_byte() {
        assert_eq!(trim_leading_zero(&[0x00]), &[0x00]);
    }
}
