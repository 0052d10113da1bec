//! Client façade.

use bytes::Bytes;
use http::Method;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::ProxyAuthenticator;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::factory::{ConnectionFactory, DirectConnector, PooledConnector};
use crate::protocol::Protocol;
use crate::request::Request;
use crate::response::Response;
use crate::transport::proxy::answer_challenge;

/// HTTP client over a pluggable [`ConnectionFactory`].
///
/// Cheap to clone; clones share the factory (and its pool) and the
/// last-request-protocol record.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    factory: Arc<dyn ConnectionFactory>,
    authenticator: Option<Arc<dyn ProxyAuthenticator>>,
    /// `Protocol::to_u8` of the last completed request, 0 before any.
    last_protocol: AtomicU8,
}

/// Builder for HTTP requests.
#[derive(Debug)]
pub struct RequestBuilder<'a> {
    client: &'a Client,
    uri: String,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

/// Builder for creating HTTP clients.
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl Client {
    /// Create a client. Both protocol preferences off selects the legacy
    /// connector: no ALPN, HTTP/1.1 only, no pooling.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let authenticator = config.proxy_authenticator();
        let factory: Arc<dyn ConnectionFactory> = if config.negotiation_enabled() {
            Arc::new(PooledConnector::with_authenticator(&config, authenticator.clone()))
        } else {
            tracing::debug!("Protocol negotiation disabled, using direct HTTP/1.1 connections");
            Arc::new(DirectConnector::with_authenticator(&config, authenticator.clone()))
        };
        Ok(Self::from_parts(config, factory, authenticator))
    }

    /// Create a client over a custom connection factory.
    pub fn with_factory(config: ClientConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let authenticator = config.proxy_authenticator();
        Self::from_parts(config, factory, authenticator)
    }

    fn from_parts(
        config: ClientConfig,
        factory: Arc<dyn ConnectionFactory>,
        authenticator: Option<Arc<dyn ProxyAuthenticator>>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                factory,
                authenticator,
                last_protocol: AtomicU8::new(0),
            }),
        }
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.inner.factory
    }

    /// Protocol of the most recently completed request, `None` before any.
    ///
    /// Shared by all clones; under concurrency it reflects whichever request
    /// finished last. [`Response::protocol`] is the per-request value.
    pub fn last_request_protocol(&self) -> Option<Protocol> {
        Protocol::from_u8(self.inner.last_protocol.load(Ordering::Acquire))
    }

    /// Create a GET request builder.
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.method(Method::GET, url)
    }

    /// Create a POST request builder.
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.method(Method::POST, url)
    }

    /// Create a PUT request builder.
    pub fn put(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.method(Method::PUT, url)
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.method(Method::DELETE, url)
    }

    /// Create a HEAD request builder.
    pub fn head(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.method(Method::HEAD, url)
    }

    /// Create a custom method request builder.
    pub fn method(&self, method: Method, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            uri: url.into(),
            method,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Execute a request. Redirects are returned as-is.
    pub async fn request(&self, req: Request) -> Result<Response> {
        let endpoint = req.endpoint()?;
        let read_timeout = self.inner.config.read_timeout();
        let factory = &self.inner.factory;

        let mut conn = factory.connect(&endpoint).await?;
        let mut response = conn.send(&req, read_timeout).await?;

        if response.status == 407 && conn.is_via_proxy() {
            if conn.proxy_authorization().is_some() {
                return Err(self.proxy_rejected(&req));
            }
            let proxy = self.proxy_authority();
            let authorization = answer_challenge(
                self.inner.authenticator.as_deref(),
                &proxy,
                response.get_headers("Proxy-Authenticate"),
            )?;

            if !conn.is_reusable() {
                tracing::debug!("Proxy {} closed after challenge, reconnecting", proxy);
                conn = factory.connect(&endpoint).await?;
            }
            conn.set_proxy_authorization(authorization);
            response = conn.send(&req, read_timeout).await?;
            if response.status == 407 {
                return Err(self.proxy_rejected(&req));
            }
        }

        let protocol = conn.protocol();
        response.set_protocol(protocol);
        self.inner.last_protocol.store(protocol.to_u8(), Ordering::Release);
        tracing::debug!("{} {} -> {} over {}", req.method, req.url, response.status, protocol);

        if conn.is_reusable() {
            factory.recycle(conn).await;
        } else {
            tracing::debug!("Closing connection to {}", endpoint);
        }

        Ok(response.with_url(req.url.as_str()))
    }

    fn proxy_authority(&self) -> String {
        self.inner
            .config
            .proxy_config()
            .map(|p| p.authority())
            .unwrap_or_default()
    }

    fn proxy_rejected(&self, req: &Request) -> Error {
        Error::proxy_auth(format!(
            "proxy {} rejected credentials for {}",
            self.proxy_authority(),
            req.url
        ))
    }
}

impl<'a> RequestBuilder<'a> {
    /// Add a header to the request.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set all headers (replaces existing headers).
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body and `Content-Type: application/json`.
    pub fn json<T: serde::Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(value)?));
        if !self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            self.headers.push(("Content-Type".into(), "application/json".into()));
        }
        Ok(self)
    }

    /// Build the request without sending it.
    pub fn build(self) -> Result<Request> {
        let mut request = Request::new(self.method, &self.uri)?;
        request.headers = self.headers;
        request.body = self.body;
        Ok(request)
    }

    /// Send the request and return the response.
    pub async fn send(self) -> Result<Response> {
        let client = self.client;
        client.request(self.build()?).await
    }
}

impl ClientBuilder {
    /// Create a new client builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connect_timeout_ms(saturating_millis(timeout));
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.read_timeout_ms(saturating_millis(timeout));
        self
    }

    /// Route requests through a forward proxy.
    pub fn proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config = self.config.proxy(host, port);
        self
    }

    /// Credentials offered when the proxy challenges.
    pub fn proxy_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config = self.config.proxy_credentials(user, password);
        self
    }

    /// Offer HTTP/2 during negotiation.
    pub fn prefer_http2(mut self, prefer: bool) -> Self {
        self.config = self.config.prefer_http2(prefer);
        self
    }

    /// Offer SPDY/3.1 during negotiation.
    pub fn prefer_spdy(mut self, prefer: bool) -> Self {
        self.config = self.config.prefer_spdy(prefer);
        self
    }

    pub fn max_idle_connections(mut self, max: usize) -> Self {
        self.config = self.config.max_idle_connections(max);
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config = self.config.keep_alive(keep_alive);
        self
    }

    /// Trust an extra root certificate (DER or PEM).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.config = self.config.add_root_certificate(cert);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client> {
        Client::new(self.config)
    }
}

/// Milliseconds in `d`, clamped so a huge duration never turns negative.
fn saturating_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
