//! Typed Error Taxonomy (TET).
//!
//! Every fallible operation in this crate that touches certificate, key,
//! CSR, SCT-list, or TLS-keypair material returns a [`TetError`]. The
//! taxonomy is deliberately small: a `source` tag, a `kind` tag, and a
//! wrapped cause. Callers match structurally (`source()`/`kind()`) or by
//! sentinel identity (`is_sentinel`), never by parsing the `Display` string.

use std::fmt;

/// What kind of material an error occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// An X.509 certificate.
    Certificate,
    /// A private key.
    PrivateKey,
    /// A certificate signing request.
    Csr,
    /// A Signed Certificate Timestamp list.
    SctList,
    /// A TLS certificate/key pair.
    TlsKeypair,
}

impl Source {
    fn as_word(self) -> &'static str {
        match self {
            Source::Certificate => "certificate",
            Source::PrivateKey => "private key",
            Source::Csr => "CSR",
            Source::SctList => "SCT list",
            Source::TlsKeypair => "TLS keypair",
        }
    }
}

/// What stage of processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Syntactically malformed input.
    Parse,
    /// Structurally valid but semantically unusable.
    Decode,
    /// Signature, chain, hostname, expiry, or revocation failure.
    Verify,
    /// I/O failure reading a source, or failure acquiring a cert pool.
    Load,
}

impl Kind {
    fn as_word(self) -> &'static str {
        match self {
            Kind::Parse => "parse",
            Kind::Decode => "decode",
            Kind::Verify => "verify",
            Kind::Load => "load",
        }
    }
}

/// The main error type threaded through the certificate pipeline.
///
/// `Wrapped` is the general `(source, kind, cause)` record from §4.A.
/// The remaining variants are the fixed-format sentinels: callers may
/// match them by pattern (`matches!(err, TetError::EmptyCertificate)`)
/// or by [`TetError::is_sentinel`].
#[derive(Debug, thiserror::Error)]
pub enum TetError {
    /// `"failed to <kind> <source>: <cause>"`
    #[error("failed to {} {}: {cause}", kind.as_word(), source.as_word())]
    Wrapped {
        /// What was being processed.
        source: Source,
        /// What operation failed.
        kind: Kind,
        /// The underlying cause.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// An input that should carry at least one certificate carried none.
    #[error("certificate input was empty")]
    EmptyCertificate,

    /// A PEM private key block was encrypted and no password was supplied.
    #[error("private key is encrypted and no password was supplied")]
    EncryptedPrivateKey,

    /// A PEM block's type label didn't match what the caller expected.
    #[error("invalid PEM type: have {have}, {}", format_want(want))]
    InvalidPemType {
        /// The label actually found (e.g. `"RSA PUBLIC KEY"`).
        have: String,
        /// The label(s) that were acceptable.
        want: Vec<String>,
    },
}

fn format_want(want: &[String]) -> String {
    match want {
        [] => "expected nothing".to_string(),
        [single] => format!("expected {single}"),
        many => format!("expected one of {}", many.join(", ")),
    }
}

impl TetError {
    /// Build a parse-kind error.
    pub fn parse(source: Source, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        TetError::Wrapped { source, kind: Kind::Parse, cause: Box::new(cause) }
    }

    /// Build a decode-kind error.
    pub fn decode(source: Source, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        TetError::Wrapped { source, kind: Kind::Decode, cause: Box::new(cause) }
    }

    /// Build a decode-kind error from a plain message (structurally
    /// malformed input that doesn't already have a typed cause, e.g.
    /// "trailing data").
    pub fn decode_msg(source: Source, msg: impl Into<String>) -> Self {
        TetError::Wrapped { source, kind: Kind::Decode, cause: Box::new(Message(msg.into())) }
    }

    /// Build a verify-kind error.
    pub fn verify(source: Source, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        TetError::Wrapped { source, kind: Kind::Verify, cause: Box::new(cause) }
    }

    /// Build a verify-kind error from a plain message.
    pub fn verify_msg(source: Source, msg: impl Into<String>) -> Self {
        TetError::Wrapped { source, kind: Kind::Verify, cause: Box::new(Message(msg.into())) }
    }

    /// Build a load-kind error.
    pub fn load(source: Source, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        TetError::Wrapped { source, kind: Kind::Load, cause: Box::new(cause) }
    }

    /// Build a load-kind error from a plain message.
    pub fn load_msg(source: Source, msg: impl Into<String>) -> Self {
        TetError::Wrapped { source, kind: Kind::Load, cause: Box::new(Message(msg.into())) }
    }

    /// Structural matching: `(source, kind)` of a wrapped error, if any.
    ///
    /// Sentinel variants (`EmptyCertificate`, `EncryptedPrivateKey`,
    /// `InvalidPemType`) have a fixed source/kind by construction and are
    /// reported accordingly so callers can structurally match them too.
    pub fn source_kind(&self) -> Option<(Source, Kind)> {
        match self {
            TetError::Wrapped { source, kind, .. } => Some((*source, *kind)),
            TetError::EmptyCertificate => Some((Source::Certificate, Kind::Decode)),
            TetError::EncryptedPrivateKey => Some((Source::PrivateKey, Kind::Load)),
            TetError::InvalidPemType { .. } => Some((Source::Certificate, Kind::Decode)),
        }
    }

    /// True iff `self` and `other` are the same sentinel condition.
    ///
    /// For `Wrapped` errors this is source+kind equality (the taxonomy has
    /// no notion of wrapped-cause identity beyond that); for the fixed
    /// sentinels it is discriminant equality, matching how callers use
    /// `errors.Is`-style sentinel checks in the source material.
    pub fn is_sentinel(&self, other: &TetError) -> bool {
        match (self, other) {
            (TetError::EmptyCertificate, TetError::EmptyCertificate) => true,
            (TetError::EncryptedPrivateKey, TetError::EncryptedPrivateKey) => true,
            (TetError::InvalidPemType { .. }, TetError::InvalidPemType { .. }) => true,
            (TetError::Wrapped { source: s1, kind: k1, .. }, TetError::Wrapped { source: s2, kind: k2, .. }) => {
                s1 == s2 && k1 == k2
            }
            _ => false,
        }
    }
}

/// A plain string wrapped as an `Error` so it can sit behind the `cause`
/// field without forcing every call site to invent a one-off error type.
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_message_format() {
        let err = TetError::parse(Source::Certificate, Message("bad ASN.1".into()));
        assert_eq!(err.to_string(), "failed to parse certificate: bad ASN.1");
    }

    #[test]
    fn invalid_pem_type_single() {
        let err = TetError::InvalidPemType {
            have: "RSA PUBLIC KEY".into(),
            want: vec!["CERTIFICATE".into()],
        };
        assert_eq!(err.to_string(), "invalid PEM type: have RSA PUBLIC KEY, expected CERTIFICATE");
    }

    #[test]
    fn invalid_pem_type_many() {
        let err = TetError::InvalidPemType {
            have: "EC PARAMETERS".into(),
            want: vec!["PRIVATE KEY".into(), "EC PRIVATE KEY".into()],
        };
        assert_eq!(
            err.to_string(),
            "invalid PEM type: have EC PARAMETERS, expected one of PRIVATE KEY, EC PRIVATE KEY"
        );
    }

    #[test]
    fn sentinel_matching_is_structural_for_wrapped() {
        let a = TetError::decode(Source::Certificate, Message("x".into()));
        let b = TetError::decode(Source::Certificate, Message("y".into()));
        assert!(a.is_sentinel(&b));
        let c = TetError::parse(Source::Certificate, Message("z".into()));
        assert!(!a.is_sentinel(&c));
    }

    #[test]
    fn sentinel_identity_ignores_wrapped() {
        assert!(TetError::EmptyCertificate.is_sentinel(&TetError::EmptyCertificate));
        assert!(!TetError::EmptyCertificate.is_sentinel(&TetError::EncryptedPrivateKey));
    }

    #[test]
    fn structural_matching_reveals_fields() {
        let err = TetError::decode(Source::Certificate, Message("wrong type".into()));
        assert_eq!(err.source_kind(), Some((Source::Certificate, Kind::Decode)));
    }
}
