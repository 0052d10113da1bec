//! A live connection that can be parked in the pool.

use std::time::{Duration, Instant};

use crate::error::Result;
use crate::pool::Endpoint;
use crate::protocol::Protocol;
use crate::request::Request;
use crate::response::Response;
use crate::transport::h1::H1Connection;
use crate::transport::h2::H2Connection;

#[derive(Debug)]
enum Transport {
    Http1(H1Connection),
    Http2(H2Connection),
}

/// A negotiated connection to one endpoint.
///
/// Dropping it closes the underlying socket.
#[derive(Debug)]
pub struct PooledConnection {
    endpoint: Endpoint,
    protocol: Protocol,
    transport: Transport,
    created_at: Instant,
    last_used: Instant,
    via_proxy: bool,
}

impl PooledConnection {
    /// Wrap an HTTP/1.1 connection. `via_proxy` marks a forward-proxy route.
    pub fn http1(endpoint: Endpoint, conn: H1Connection, via_proxy: bool) -> Self {
        Self::new(endpoint, Protocol::Http1_1, Transport::Http1(conn), via_proxy)
    }

    /// Wrap an HTTP/2 connection.
    pub fn http2(endpoint: Endpoint, conn: H2Connection) -> Self {
        Self::new(endpoint, Protocol::Http2, Transport::Http2(conn), false)
    }

    fn new(endpoint: Endpoint, protocol: Protocol, transport: Transport, via_proxy: bool) -> Self {
        let now = Instant::now();
        Self {
            endpoint,
            protocol,
            transport,
            created_at: now,
            last_used: now,
            via_proxy,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Protocol negotiated when the connection was opened.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Whether requests go to a forward proxy in absolute-form.
    pub fn is_via_proxy(&self) -> bool {
        self.via_proxy
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Send one request and read the full response.
    pub async fn send(&mut self, req: &Request, read_timeout: Option<Duration>) -> Result<Response> {
        let response = match &mut self.transport {
            Transport::Http1(conn) => conn.send_request(req, read_timeout).await,
            Transport::Http2(conn) => conn.send_request(req, read_timeout).await,
        };
        self.last_used = Instant::now();
        response
    }

    /// Whether another request may be sent on this connection.
    pub fn is_reusable(&self) -> bool {
        match &self.transport {
            Transport::Http1(conn) => conn.is_reusable(),
            Transport::Http2(conn) => conn.is_open(),
        }
    }

    /// Whether the connection has been idle for `keep_alive` or longer.
    pub fn is_expired(&self, keep_alive: Duration) -> bool {
        self.last_used.elapsed() >= keep_alive
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Answer a proxy challenge on this connection. Only proxied HTTP/1.1
    /// connections carry `Proxy-Authorization`.
    pub fn set_proxy_authorization(&mut self, value: String) {
        if let Transport::Http1(conn) = &mut self.transport {
            if conn.is_absolute_form() {
                conn.set_proxy_authorization(value);
            }
        }
    }

    pub fn proxy_authorization(&self) -> Option<&str> {
        match &self.transport {
            Transport::Http1(conn) => conn.proxy_authorization(),
            Transport::Http2(_) => None,
        }
    }
}
