//! Connection factories.
//!
//! A [`ConnectionFactory`] hands the client a connection for an endpoint and
//! takes it back once the exchange is over. [`PooledConnector`] negotiates a
//! protocol over ALPN and keeps idle connections for reuse;
//! [`DirectConnector`] is the legacy path with no ALPN and no pooling.

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::ProxyAuthenticator;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, Endpoint, PooledConnection};
use crate::protocol::Protocol;
use crate::transport::connector::TlsConnector;
use crate::transport::h1::H1Connection;
use crate::transport::h2::H2Connection;
use crate::transport::negotiate::Negotiator;
use crate::transport::proxy::Dialer;

/// Source of connections for a [`Client`](crate::Client).
#[async_trait]
pub trait ConnectionFactory: Send + Sync + Debug {
    /// Return a connection to `endpoint`, reused or freshly opened.
    async fn connect(&self, endpoint: &Endpoint) -> Result<PooledConnection>;

    /// Take back a connection after a successful exchange.
    async fn recycle(&self, conn: PooledConnection);

    /// Protocols offered via ALPN, in offer order. Empty means no ALPN.
    fn offered_protocols(&self) -> &[Protocol];
}

/// Opens fresh connections: route, negotiate, protocol handshake.
#[derive(Clone, Debug)]
struct Opener {
    dialer: Dialer,
    negotiator: Negotiator,
    connect_timeout: Option<Duration>,
}

impl Opener {
    fn new(config: &ClientConfig, authenticator: Option<Arc<dyn ProxyAuthenticator>>) -> Self {
        let dialer = match config.proxy_config() {
            Some(proxy) => Dialer::with_proxy(proxy.clone(), authenticator),
            None => Dialer::direct(),
        };
        let tls = TlsConnector::new().with_root_certificates(config.root_certificates.clone());
        Self {
            dialer,
            negotiator: Negotiator::new(tls),
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Bound `fut` by the connect timeout.
    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::ConnectTimeout(limit))?,
            None => fut.await,
        }
    }

    /// Open a connection offering `offered`.
    ///
    /// Returns `None` when the server picked SPDY/3.1, which has no framing
    /// engine here; the socket is closed.
    async fn open(&self, endpoint: &Endpoint, offered: &[Protocol], keep_alive: bool) -> Result<Option<PooledConnection>> {
        let route = self.dialer.dial(endpoint).await?;
        let (stream, protocol) = self.negotiator.negotiate(offered, endpoint, route.stream).await?;

        let conn = match protocol {
            Protocol::Http2 => PooledConnection::http2(endpoint.clone(), H2Connection::handshake(stream).await?),
            Protocol::Http1_1 => {
                let h1 = H1Connection::new(stream)
                    .with_absolute_form(route.via_proxy)
                    .with_keep_alive(keep_alive);
                PooledConnection::http1(endpoint.clone(), h1, route.via_proxy)
            }
            Protocol::Spdy3 => return Ok(None),
        };

        tracing::debug!("Opened {} connection to {}", conn.protocol(), endpoint);
        Ok(Some(conn))
    }
}

/// Pool-backed factory negotiating HTTP/1.1, HTTP/2 or SPDY/3.1 over ALPN.
#[derive(Debug)]
pub struct PooledConnector {
    pool: ConnectionPool,
    opener: Opener,
    offered: Vec<Protocol>,
}

impl PooledConnector {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_authenticator(config, config.proxy_authenticator())
    }

    /// Answer proxy challenges with `authenticator` instead of the configured credentials.
    pub fn with_authenticator(config: &ClientConfig, authenticator: Option<Arc<dyn ProxyAuthenticator>>) -> Self {
        Self {
            pool: ConnectionPool::new(config.max_idle_connections, config.keep_alive_duration()),
            opener: Opener::new(config, authenticator),
            offered: config.offered_protocols(),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<PooledConnection> {
        if let Some(conn) = self.opener.open(endpoint, &self.offered, true).await? {
            return Ok(conn);
        }

        tracing::debug!("{} selected spdy/3.1, re-dialing without it", endpoint);
        let fallback: Vec<Protocol> = self
            .offered
            .iter()
            .copied()
            .filter(|p| *p != Protocol::Spdy3)
            .collect();
        self.opener
            .open(endpoint, &fallback, true)
            .await?
            .ok_or_else(|| Error::http_protocol(format!("{} selected spdy/3.1 after it was withdrawn", endpoint)))
    }
}

#[async_trait]
impl ConnectionFactory for PooledConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<PooledConnection> {
        if let Some(conn) = self.pool.acquire(endpoint).await {
            return Ok(conn);
        }
        self.opener.bounded(self.open(endpoint)).await
    }

    async fn recycle(&self, conn: PooledConnection) {
        self.pool.release(conn).await;
    }

    fn offered_protocols(&self) -> &[Protocol] {
        &self.offered
    }
}

/// Legacy factory: HTTP/1.1 only, no ALPN, one connection per request.
#[derive(Debug)]
pub struct DirectConnector {
    opener: Opener,
}

impl DirectConnector {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_authenticator(config, config.proxy_authenticator())
    }

    pub fn with_authenticator(config: &ClientConfig, authenticator: Option<Arc<dyn ProxyAuthenticator>>) -> Self {
        Self {
            opener: Opener::new(config, authenticator),
        }
    }
}

#[async_trait]
impl ConnectionFactory for DirectConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<PooledConnection> {
        self.opener
            .bounded(async {
                self.opener
                    .open(endpoint, &[], false)
                    .await?
                    .ok_or_else(|| Error::http_protocol("server selected a protocol that was not offered"))
            })
            .await
    }

    async fn recycle(&self, conn: PooledConnection) {
        tracing::debug!("Closing connection to {}", conn.endpoint());
    }

    fn offered_protocols(&self) -> &[Protocol] {
        &[]
    }
}
