//! # sysbelt - a systems toolbelt for TLS/PKI operators
//!
//! A small collection of building blocks used together by certificate
//! and TLS-deployment tooling: a bounded recency cache, a hash-algorithm
//! registry, a proxy-aware connection layer, a certificate/key parser,
//! a key matcher, a chain fetcher, a revocation checker, a chain
//! verifier, and a bundle packager.
//!
//! ## Modules
//!
//! - `cache`: bounded LRU/MRU recency cache
//! - `hashreg`: hash-algorithm registry (cryptographic and checksum families)
//! - `hexutil`: hex encoding and human-friendly duration parsing
//! - `error`: the typed error taxonomy (TET) threaded through every module
//! - `proxy`: proxy discovery, TCP/TLS dialing, and an HTTP client built on it
//! - `certs`: certificate/key/CSR ingestion and encoding
//! - `matcher`: private-key-to-certificate public-key matching
//! - `chainspec`: resolving a chain spec (file/stdin/host) to a certificate chain
//! - `revocation`: CRL/OCSP-based revocation checking
//! - `verify`: chain building and verification against a roots pool
//! - `bundle`: deterministic zip/tar.gz archive assembly from a manifest

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bundle;
pub mod cache;
pub mod certs;
pub mod chainspec;
pub mod error;
pub mod hashreg;
pub mod hexutil;
pub mod matcher;
pub mod proxy;
pub mod revocation;
pub mod verify;

pub use error::{Result, TetError};

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::bundle::{ArchiveManifest, ChainGroup, Encoding as BundleEncoding};
    pub use crate::cache::{Cache, Lru, Mru};
    pub use crate::certs::{Certificate, PrivateKey};
    pub use crate::chainspec::ChainSpec;
    pub use crate::error::{Result, Source, TetError};
    pub use crate::matcher::{match_keys, MatchResult};
    pub use crate::proxy::{http_client, Dialer};
    pub use crate::revocation::{check as check_revocation, Policy as RevocationPolicy, RevocationStatus};
    pub use crate::verify::{verify, KeyUsage, Options as VerifyOptions};
}
