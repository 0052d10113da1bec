//! Client configuration.
//!
//! A [`ClientConfig`] is read-only once the client is built. Timeouts are
//! expressed in milliseconds; a zero or negative value means "no override",
//! so the transport keeps waiting until the peer answers or gives up.
//!
//! # Usage
//!
//! ```rust,ignore
//! use wirepool::ClientConfig;
//!
//! let config = ClientConfig::new()
//!     .connect_timeout_ms(5_000)
//!     .read_timeout_ms(30_000)
//!     .proxy("proxy.example.com", 8080)
//!     .proxy_credentials("u", "p");
//!
//! // Or from JSON
//! let config: ClientConfig = serde_json::from_str(r#"{"prefer_spdy": false}"#)?;
//! ```

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{mask, BasicProxyAuthenticator, ProxyAuthenticator};
use crate::protocol::{offered_protocols, Protocol};

/// Default maximum number of idle connections kept by a pool.
pub const MAX_IDLE_CONNECTIONS: usize = 5;

/// Default time an idle connection stays eligible for reuse.
pub const KEEP_ALIVE_DURATION: Duration = Duration::from_millis(300);

/// Forward proxy settings.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy host name or address. Empty means "no proxy".
    pub host: String,

    /// Proxy port.
    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// User for proxy authentication.
    #[serde(default)]
    pub user: Option<String>,

    /// Password for proxy authentication.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_proxy_port() -> u16 {
    8080
}

impl ProxyConfig {
    /// Create a proxy configuration without credentials.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: None,
            password: None,
        }
    }

    /// Attach credentials, answered only when the proxy challenges.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// `host:port` of the proxy.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether a non-empty proxy user is configured.
    pub fn has_credentials(&self) -> bool {
        self.user.as_deref().is_some_and(|u| !u.is_empty())
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_deref().map(mask))
            .finish()
    }
}

/// Configuration for a [`Client`](crate::Client).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connect timeout in milliseconds (TCP + proxy tunnel + TLS + protocol handshake).
    /// Non-positive: no override.
    pub connect_timeout_ms: i64,

    /// Read timeout in milliseconds, applied to every read of response bytes.
    /// Non-positive: no override.
    pub read_timeout_ms: i64,

    /// Forward proxy, if any.
    pub proxy: Option<ProxyConfig>,

    /// Offer HTTP/2 during negotiation.
    pub prefer_http2: bool,

    /// Offer SPDY/3.1 during negotiation.
    pub prefer_spdy: bool,

    /// Maximum idle connections kept for reuse.
    pub max_idle_connections: usize,

    /// Keep-alive for idle connections, in milliseconds.
    pub keep_alive_ms: u64,

    /// Extra trusted root certificates (DER or PEM).
    #[serde(skip)]
    pub root_certificates: Vec<Vec<u8>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 0,
            read_timeout_ms: 0,
            proxy: None,
            prefer_http2: true,
            prefer_spdy: true,
            max_idle_connections: MAX_IDLE_CONNECTIONS,
            keep_alive_ms: KEEP_ALIVE_DURATION.as_millis() as u64,
            root_certificates: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connect timeout in milliseconds.
    pub fn connect_timeout_ms(mut self, ms: i64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set read timeout in milliseconds.
    pub fn read_timeout_ms(mut self, ms: i64) -> Self {
        self.read_timeout_ms = ms;
        self
    }

    /// Route every connection through an HTTP forward proxy.
    pub fn proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        let credentials = self.proxy.take().and_then(|p| p.user.zip(p.password));
        let mut proxy = ProxyConfig::new(host, port);
        if let Some((user, password)) = credentials {
            proxy = proxy.with_credentials(user, password);
        }
        self.proxy = Some(proxy);
        self
    }

    /// Set proxy credentials. Has no effect until a proxy is configured.
    pub fn proxy_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        if let Some(proxy) = self.proxy.take() {
            self.proxy = Some(proxy.with_credentials(user, password));
        }
        self
    }

    /// Enable or disable HTTP/2 in the offer list.
    pub fn prefer_http2(mut self, prefer: bool) -> Self {
        self.prefer_http2 = prefer;
        self
    }

    /// Enable or disable SPDY/3.1 in the offer list.
    pub fn prefer_spdy(mut self, prefer: bool) -> Self {
        self.prefer_spdy = prefer;
        self
    }

    /// Set the idle connection limit.
    pub fn max_idle_connections(mut self, max: usize) -> Self {
        self.max_idle_connections = max;
        self
    }

    /// Set the keep-alive duration for idle connections.
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_ms = u64::try_from(keep_alive.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Trust an additional root certificate (DER or PEM).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.root_certificates.push(cert.into());
        self
    }

    /// Connect timeout, if positive.
    pub fn connect_timeout(&self) -> Option<Duration> {
        positive_millis(self.connect_timeout_ms)
    }

    /// Read timeout, if positive.
    pub fn read_timeout(&self) -> Option<Duration> {
        positive_millis(self.read_timeout_ms)
    }

    /// Keep-alive duration for idle connections.
    pub fn keep_alive_duration(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// The configured proxy, ignoring one with an empty host.
    pub fn proxy_config(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref().filter(|p| !p.host.is_empty())
    }

    /// Whether protocol negotiation (and pooling) is enabled at all.
    pub fn negotiation_enabled(&self) -> bool {
        self.prefer_http2 || self.prefer_spdy
    }

    /// Protocols offered during negotiation.
    pub fn offered_protocols(&self) -> Vec<Protocol> {
        offered_protocols(self.prefer_http2, self.prefer_spdy)
    }

    /// Basic authenticator for the configured proxy credentials.
    pub fn proxy_authenticator(&self) -> Option<Arc<dyn ProxyAuthenticator>> {
        let proxy = self.proxy_config().filter(|p| p.has_credentials())?;
        let user = proxy.user.clone().unwrap_or_default();
        let password = proxy.password.clone().unwrap_or_default();
        tracing::debug!("Proxy AuthUser: {}", user);
        tracing::debug!("Proxy AuthPassword: {}", mask(&password));
        Some(Arc::new(BasicProxyAuthenticator::new(user, password)))
    }
}

fn positive_millis(ms: i64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms as u64))
}
