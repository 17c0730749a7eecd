//! Proxy-aware HTTP client, used by the revocation checker (§4.I) to fetch
//! CRLs and post OCSP requests through the same dialer that TCP/TLS
//! connections use.

use super::Dialer;
use crate::error::{Result, Source, TetError};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Duration;

/// A minimal HTTP/1.1 client that dials every request through a
/// [`Dialer`]. No connection pooling: each call opens and tears down its
/// own connection, which matches the one-shot nature of CRL/OCSP fetches.
pub struct HttpClient {
    dialer: Dialer,
    timeout: Duration,
}

/// Build the default proxy-aware client.
pub fn http_client() -> HttpClient {
    HttpClient { dialer: Dialer::new(), timeout: Duration::from_secs(30) }
}

impl HttpClient {
    /// Override the fetch timeout (bounds the whole request/response, not
    /// just the dial — this is the revocation checker's `HTTPTimeout`).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `GET url`, returning the response body bytes. Non-2xx status codes
    /// are still returned to the caller (CRL fetchers decide policy).
    pub async fn get(&self, url: &str) -> Result<(u16, Bytes)> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(url)
            .body(Full::new(Bytes::new()))
            .map_err(|e| TetError::load(Source::Certificate, e))?;
        self.send(request).await
    }

    /// `POST url` with `body` and a `content_type` header (used for OCSP
    /// requests, which are posted as `application/ocsp-request`).
    pub async fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<(u16, Bytes)> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header("Content-Type", content_type)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| TetError::load(Source::Certificate, e))?;
        self.send(request).await
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<(u16, Bytes)> {
        tokio::time::timeout(self.timeout, self.send_inner(request))
            .await
            .map_err(|_| TetError::load_msg(Source::Certificate, "HTTP fetch timed out"))?
    }

    async fn send_inner(&self, request: Request<Full<Bytes>>) -> Result<(u16, Bytes)> {
        let uri = request.uri().clone();
        let host = uri.host().ok_or_else(|| TetError::load_msg(Source::Certificate, "URL has no host"))?.to_string();
        let is_tls = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if is_tls { 443 } else { 80 });

        let response: Response<Incoming> = if is_tls {
            let tls_config = Arc::new(default_tls_config());
            let stream = self.dialer.dial_tls(&host, port, tls_config).await?;
            self.roundtrip(TokioIo::new(stream), request).await?
        } else {
            let stream = self.dialer.dial_tcp(&host, port).await?;
            self.roundtrip(TokioIo::new(stream), request).await?
        };

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TetError::load_msg(Source::Certificate, e.to_string()))?
            .to_bytes();
        Ok((status, body))
    }

    async fn roundtrip<IO>(&self, io: IO, request: Request<Full<Bytes>>) -> Result<Response<Incoming>>
    where
        IO: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    {
        let (mut sender, connection) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TetError::load(Source::Certificate, e))?;

        tokio::spawn(async move {
            let _ = connection.await;
        });

        sender.send_request(request).await.map_err(|e| TetError::load(Source::Certificate, e))
    }
}

fn default_tls_config() -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth()
}
