//! Direct and forward-proxy routes to an endpoint.
//!
//! `https` targets behind a proxy are reached through a `CONNECT` tunnel;
//! `http` targets are sent to the proxy in absolute-form by the HTTP/1.1
//! codec. Proxy credentials are only produced by the [`ProxyAuthenticator`]
//! in answer to a `407` challenge, never on a first attempt.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::auth::{parse_challenges, ProxyAuthenticator};
use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::pool::Endpoint;

/// Maximum size of a proxy response head.
const MAX_PROXY_HEAD_SIZE: usize = 16 * 1024;

/// Maximum number of headers in a proxy response.
const MAX_PROXY_HEADERS: usize = 64;

/// A TCP route to an endpoint.
#[derive(Debug)]
pub struct Route {
    pub stream: TcpStream,
    /// Set when `stream` leads to a forward proxy that expects absolute-form
    /// requests (cleartext targets only; tunnels are transparent).
    pub via_proxy: bool,
}

/// Opens TCP routes, directly or through a forward proxy.
#[derive(Clone, Debug, Default)]
pub struct Dialer {
    proxy: Option<ProxyConfig>,
    authenticator: Option<Arc<dyn ProxyAuthenticator>>,
}

impl Dialer {
    /// Dial endpoints directly.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Dial endpoints through `proxy`, answering challenges with `authenticator`.
    pub fn with_proxy(proxy: ProxyConfig, authenticator: Option<Arc<dyn ProxyAuthenticator>>) -> Self {
        Self {
            proxy: Some(proxy),
            authenticator,
        }
    }

    /// Open a route to `endpoint`.
    pub async fn dial(&self, endpoint: &Endpoint) -> Result<Route> {
        let Some(proxy) = &self.proxy else {
            let stream = connect_tcp(&endpoint.authority()).await?;
            return Ok(Route { stream, via_proxy: false });
        };

        tracing::debug!("Opening proxied connection({})", proxy.authority());

        if !endpoint.is_https() {
            let stream = connect_tcp(&proxy.authority()).await?;
            return Ok(Route { stream, via_proxy: true });
        }

        let stream = self.tunnel(proxy, endpoint).await?;
        Ok(Route { stream, via_proxy: false })
    }

    /// Establish a `CONNECT` tunnel to `endpoint` through `proxy`.
    async fn tunnel(&self, proxy: &ProxyConfig, endpoint: &Endpoint) -> Result<TcpStream> {
        let proxy_addr = proxy.authority();
        let mut stream = connect_tcp(&proxy_addr).await?;
        let mut authorization: Option<String> = None;

        loop {
            write_connect(&mut stream, endpoint, authorization.as_deref()).await?;
            let head = read_proxy_head(&mut stream).await?;

            match head.status {
                200..=299 => {
                    tracing::debug!("Proxy {} opened tunnel to {}", proxy_addr, endpoint);
                    return Ok(stream);
                }
                407 if authorization.is_some() => {
                    return Err(Error::proxy_auth(format!(
                        "proxy {} rejected credentials for CONNECT {}",
                        proxy_addr,
                        endpoint.authority()
                    )));
                }
                407 => {
                    let header = answer_challenge(
                        self.authenticator.as_deref(),
                        &proxy_addr,
                        head.challenges(),
                    )?;
                    authorization = Some(header);

                    if head.keeps_alive() {
                        discard_body(&mut stream, head.content_length).await?;
                    } else {
                        tracing::debug!("Proxy {} closed after challenge, reconnecting", proxy_addr);
                        stream = connect_tcp(&proxy_addr).await?;
                    }
                }
                status => {
                    return Err(Error::connection(format!(
                        "proxy {} refused CONNECT {}: HTTP {}",
                        proxy_addr,
                        endpoint.authority(),
                        status
                    )));
                }
            }
        }
    }
}

/// Ask `authenticator` for a `Proxy-Authorization` value answering `challenges`.
pub(crate) fn answer_challenge<'a>(
    authenticator: Option<&dyn ProxyAuthenticator>,
    proxy: &str,
    challenges: impl IntoIterator<Item = &'a str>,
) -> Result<String> {
    let authenticator = authenticator.ok_or_else(|| {
        Error::proxy_auth(format!("proxy {} requires authentication, no credentials configured", proxy))
    })?;
    let challenges = parse_challenges(challenges);
    authenticator
        .authenticate(proxy, &challenges)
        .ok_or_else(|| Error::proxy_auth(format!("no credentials for proxy {} challenge {:?}", proxy, challenges)))
}

async fn connect_tcp(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
    // Small request heads should not wait on Nagle.
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

async fn write_connect(stream: &mut TcpStream, endpoint: &Endpoint, authorization: Option<&str>) -> Result<()> {
    let authority = endpoint.authority();
    let mut head = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\nProxy-Connection: Keep-Alive\r\n", authority);
    if let Some(value) = authorization {
        head.push_str("Proxy-Authorization: ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    stream
        .write_all(head.as_bytes())
        .await
        .map_err(|e| Error::Connection(format!("Failed to write CONNECT: {}", e)))
}

/// Parsed head of a proxy response to `CONNECT`.
#[derive(Debug)]
struct ProxyHead {
    status: u16,
    http10: bool,
    headers: Vec<(String, String)>,
    content_length: usize,
}

impl ProxyHead {
    fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn challenges(&self) -> impl Iterator<Item = &str> {
        self.values("proxy-authenticate")
    }

    /// Whether the proxy keeps the connection open after this response.
    ///
    /// A body framed by `Transfer-Encoding` is not drained; the caller
    /// reconnects instead.
    fn keeps_alive(&self) -> bool {
        if self.values("transfer-encoding").next().is_some() {
            return false;
        }
        let mut keep_alive = !self.http10;
        for token in self
            .values("connection")
            .chain(self.values("proxy-connection"))
            .flat_map(|v| v.split(','))
            .map(str::trim)
        {
            if token.eq_ignore_ascii_case("close") {
                return false;
            }
            if token.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        }
        keep_alive
    }
}

async fn read_proxy_head(stream: &mut TcpStream) -> Result<ProxyHead> {
    // Byte at a time so nothing past the head is consumed from the tunnel.
    let mut buffer = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    while !buffer.ends_with(b"\r\n\r\n") {
        if buffer.len() >= MAX_PROXY_HEAD_SIZE {
            return Err(Error::http_protocol("Proxy response head too large"));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| Error::Connection(format!("Failed to read proxy response: {}", e)))?;
        if n == 0 {
            return Err(Error::connection("Proxy closed connection during CONNECT"));
        }
        buffer.push(byte[0]);
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_PROXY_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    response
        .parse(&buffer)
        .map_err(|e| Error::HttpProtocol(format!("Failed to parse proxy response: {}", e)))?;

    let status = response
        .code
        .ok_or_else(|| Error::http_protocol("Proxy response missing status code"))?;
    let headers: Vec<(String, String)> = response
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);

    Ok(ProxyHead {
        status,
        http10: response.version == Some(0),
        headers,
        content_length,
    })
}

async fn discard_body(stream: &mut TcpStream, mut remaining: usize) -> Result<()> {
    let mut scratch = [0u8; 1024];
    while remaining > 0 {
        let want = remaining.min(scratch.len());
        let n = stream
            .read(&mut scratch[..want])
            .await
            .map_err(|e| Error::Connection(format!("Failed to read proxy response body: {}", e)))?;
        if n == 0 {
            return Err(Error::connection("Proxy closed connection mid-response"));
        }
        remaining -= n;
    }
    Ok(())
}
