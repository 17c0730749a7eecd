//! Chain Fetcher (§4.H).
//!
//! Resolves a `ChainSpec` string to a certificate chain. Local sources
//! (files, stdin) delegate to the certificate parser (component F); remote
//! sources delegate to the proxy-aware TLS dialer (component E) and capture
//! the peer certificates the server presented, in the order it presented
//! them.

use crate::certs::{self, Certificate};
use crate::error::{Result, Source, TetError};
use crate::proxy::Dialer;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A normalized certificate source, per §3's `ChainSpec` grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainSpec {
    /// `-`: read from standard input.
    Stdin,
    /// An existing file path.
    File(PathBuf),
    /// `host[:port]`, `https://host[:port]`, or `tls://host[:port]`.
    Net { host: String, port: u16 },
}

impl ChainSpec {
    /// Parse `spec`, disambiguating in the order `spec.md` §3 lists: `-`,
    /// an existing file path, a recognized URL scheme, then `host:port` /
    /// bare `host` (implicit port 443).
    pub fn parse(spec: &str) -> Result<Self> {
        if spec == "-" {
            return Ok(ChainSpec::Stdin);
        }

        if Path::new(spec).is_file() {
            return Ok(ChainSpec::File(PathBuf::from(spec)));
        }

        if let Some(rest) = spec.strip_prefix("https://") {
            let (host, port) = parse_host_port(rest, 443)?;
            return Ok(ChainSpec::Net { host, port });
        }
        if let Some(rest) = spec.strip_prefix("tls://") {
            let (host, port) = parse_host_port(rest, 443)?;
            return Ok(ChainSpec::Net { host, port });
        }
        if let Some((scheme, _)) = spec.split_once("://") {
            return Err(TetError::decode_msg(
                Source::Certificate,
                format!("unrecognized ChainSpec scheme: {scheme}"),
            ));
        }

        let (host, port) = parse_host_port(spec, 443)?;
        Ok(ChainSpec::Net { host, port })
    }
}

fn parse_host_port(s: &str, default_port: u16) -> Result<(String, u16)> {
    let authority = s.split('/').next().unwrap_or(s);
    match authority.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str
                .parse()
                .map_err(|e| TetError::decode_msg(Source::Certificate, format!("invalid port {port_str}: {e}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), default_port)),
    }
}

/// Resolve `spec` to the certificate chain it names. `tls_config` is used
/// only for [`ChainSpec::Net`]; it must allow the caller to disable
/// verification for diagnostic tools (§4.H).
pub async fn fetch(spec: &ChainSpec, tls_config: Arc<rustls::ClientConfig>) -> Result<Vec<Certificate>> {
    match spec {
        ChainSpec::Stdin => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).map_err(|e| TetError::load(Source::Certificate, e))?;
            ingest_bytes(&buf)
        }
        ChainSpec::File(path) => {
            let bytes = std::fs::read(path).map_err(|e| TetError::load(Source::Certificate, e))?;
            ingest_bytes(&bytes)
        }
        ChainSpec::Net { host, port } => fetch_net(host, *port, tls_config).await,
    }
}

async fn fetch_net(host: &str, port: u16, tls_config: Arc<rustls::ClientConfig>) -> Result<Vec<Certificate>> {
    let dialer = Dialer::new();
    let tls_stream = dialer.dial_tls(host, port, tls_config).await?;
    let (_, connection) = tls_stream.get_ref();

    let peer_certs = connection
        .peer_certificates()
        .ok_or_else(|| TetError::load_msg(Source::Certificate, "server presented no certificates"))?;

    peer_certs.iter().map(|c| Certificate::from_der(c.as_ref().to_vec())).collect()
}

fn ingest_bytes(bytes: &[u8]) -> Result<Vec<Certificate>> {
    let ingested = certs::ingest(bytes, None)?;
    if ingested.certificates.is_empty() {
        return Err(TetError::EmptyCertificate);
    }
    Ok(ingested.certificates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_spec() {
        assert_eq!(ChainSpec::parse("-").unwrap(), ChainSpec::Stdin);
    }

    #[test]
    fn bare_host_defaults_to_443() {
        let spec = ChainSpec::parse("example.com").unwrap();
        assert_eq!(spec, ChainSpec::Net { host: "example.com".to_string(), port: 443 });
    }

    #[test]
    fn host_port() {
        let spec = ChainSpec::parse("example.com:8443").unwrap();
        assert_eq!(spec, ChainSpec::Net { host: "example.com".to_string(), port: 8443 });
    }

    #[test]
    fn https_url_with_path() {
        let spec = ChainSpec::parse("https://example.com:9443/foo/bar").unwrap();
        assert_eq!(spec, ChainSpec::Net { host: "example.com".to_string(), port: 9443 });
    }

    #[test]
    fn tls_url_default_port() {
        let spec = ChainSpec::parse("tls://example.com").unwrap();
        assert_eq!(spec, ChainSpec::Net { host: "example.com".to_string(), port: 443 });
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = ChainSpec::parse("ftp://example.com").unwrap_err();
        assert_eq!(err.source_kind().map(|(_, k)| k), Some(crate::error::Kind::Decode));
    }

    #[test]
    fn existing_file_path_wins_over_net_parsing() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let spec = ChainSpec::parse(file.path().to_str().unwrap()).unwrap();
        assert_eq!(spec, ChainSpec::File(file.path().to_path_buf()));
    }
}
