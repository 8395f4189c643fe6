//! HTTP transport seam used by the invoker.
//!
//! [`Transport`] is the one capability an [`OperationInvoker`](crate::OperationInvoker)
//! needs: send a fully built request, get a response back. The default
//! implementation is [`ReqwestTransport`], configured from a [`TransportConfig`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::audit::AuditSink;
use crate::catalog::HttpMethod;
use crate::error::TransportError;

/// Default request timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// A request ready to go on the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends one HTTP request.
///
/// Implementations must be cancel-safe: dropping the returned future aborts
/// the request and releases its connection.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

/// Supplies the `Authorization` header value for each request.
pub trait CredentialSupplier: Send + Sync + fmt::Debug {
    /// Full header value (e.g. `Bearer abc`), or `None` to send no credentials.
    fn authorization(&self) -> Option<SecretString>;
}

/// A fixed bearer token.
#[derive(Debug, Clone)]
pub struct BearerToken(SecretString);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl CredentialSupplier for BearerToken {
    fn authorization(&self) -> Option<SecretString> {
        let token = self.0.expose_secret().trim();
        if token.is_empty() {
            return None;
        }
        Some(SecretString::from(format!("Bearer {token}")))
    }
}

/// Per-plugin transport configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct TransportConfig {
    /// Replaces the catalog's server URL for this plugin.
    pub base_url_override: Option<String>,
    /// Sent with every request; header parameters take precedence.
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
    /// Verify server certificates. Turning this off is logged.
    pub verify_tls: bool,
    pub credentials: Option<Arc<dyn CredentialSupplier>>,
    /// When set, outgoing requests are recorded to this sink.
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url_override: None,
            headers: HeaderMap::new(),
            timeout: Some(DEFAULT_TIMEOUT),
            verify_tls: true,
            credentials: None,
            audit: None,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url_override(mut self, url: impl Into<String>) -> Self {
        self.base_url_override = Some(url.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Accept any server certificate. Only for local development.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.verify_tls = false;
        self
    }

    pub fn credentials(mut self, supplier: Arc<dyn CredentialSupplier>) -> Self {
        self.credentials = Some(supplier);
        self
    }

    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.credentials(Arc::new(BearerToken::new(token)))
    }

    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }
}

/// [`Transport`] backed by a `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if !config.verify_tls {
            tracing::warn!("TLS certificate verification is disabled for this transport");
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self::new(builder.build()?))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut req = self
            .client
            .request(request.method.into(), request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            req = req.body(body);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;

    #[test]
    fn bearer_token_formats_header_value() {
        let token = BearerToken::new("  abc123 ");
        let value = token.authorization().unwrap();
        assert_eq!(value.expose_secret(), "Bearer abc123");
    }

    #[test]
    fn blank_bearer_token_sends_nothing() {
        assert!(BearerToken::new("   ").authorization().is_none());
    }

    #[test]
    fn debug_output_redacts_bearer_token() {
        let config = TransportConfig::new().bearer_token("super-secret-token");
        let debug_str = format!("{config:?}");
        assert!(
            !debug_str.contains("super-secret-token"),
            "Debug output should not contain the token, got: {debug_str}"
        );
    }

    #[test]
    fn default_config_verifies_tls() {
        let config = TransportConfig::default();
        assert!(config.verify_tls);
        assert_eq!(config.timeout, Some(DEFAULT_TIMEOUT));
        assert!(!config.danger_accept_invalid_certs().verify_tls);
    }

    #[tokio::test]
    async fn reqwest_transport_round_trips() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/echo")
            .match_header("x-test", "1")
            .match_body("payload")
            .with_status(202)
            .with_header("content-type", "text/plain")
            .with_body("accepted")
            .create_async()
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-test", HeaderValue::from_static("1"));
        let transport = ReqwestTransport::from_config(&TransportConfig::new()).unwrap();
        let resp = transport
            .send(HttpRequest {
                method: HttpMethod::Put,
                url: Url::parse(&format!("{}/echo", server.url())).unwrap(),
                headers,
                body: Some(Bytes::from_static(b"payload")),
            })
            .await
            .unwrap();

        assert_eq!(resp.status, 202);
        assert_eq!(resp.body, Bytes::from_static(b"accepted"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn connection_refused_is_a_connect_error() {
        // Bind then drop a listener to get a port nobody is serving on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = ReqwestTransport::default();
        let err = transport
            .send(HttpRequest {
                method: HttpMethod::Get,
                url: Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap(),
                headers: HeaderMap::new(),
                body: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, TransportErrorKind::Connect);
    }
}
