//! HTTP/2 client connection on hyper's `http2` handshake.
//!
//! The connection driver runs on a spawned task; the [`H2Connection`] handle
//! stays in the pool and multiplexes later requests over the same socket.

use bytes::{Bytes, BytesMut};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::request::Request;
use crate::response::Response;
use crate::transport::connector::MaybeHttpsStream;

/// Headers that are meaningless or forbidden in HTTP/2 (RFC 9113 §8.2.2).
const CONNECTION_SPECIFIC: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "host",
    "proxy-authorization",
];

/// Handle to an HTTP/2 connection.
#[derive(Debug)]
pub struct H2Connection {
    sender: http2::SendRequest<Full<Bytes>>,
}

impl H2Connection {
    /// Run the HTTP/2 connection preface over `stream` and spawn its driver.
    pub async fn handshake(stream: MaybeHttpsStream) -> Result<Self> {
        let (sender, conn) = http2::Builder::new(TokioExecutor::new())
            .handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::HttpProtocol(format!("HTTP/2 handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("HTTP/2 connection closed with error: {}", e);
            }
        });

        Ok(Self { sender })
    }

    /// Whether the connection can still open streams.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Send a request on a new stream and collect the full response.
    pub async fn send_request(&mut self, req: &Request, read_timeout: Option<Duration>) -> Result<Response> {
        let mut builder = http::Request::builder()
            .method(req.method.clone())
            .uri(req.absolute_target())
            .version(http::Version::HTTP_2);
        for (name, value) in &req.headers {
            if CONNECTION_SPECIFIC.iter().any(|h| name.eq_ignore_ascii_case(h))
                || (name.eq_ignore_ascii_case("te") && !value.eq_ignore_ascii_case("trailers"))
            {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder
            .body(Full::new(req.body.clone().unwrap_or_default()))
            .map_err(|e| Error::HttpProtocol(format!("Invalid request: {}", e)))?;

        self.sender
            .ready()
            .await
            .map_err(|e| Error::HttpProtocol(format!("HTTP/2 connection not ready: {}", e)))?;

        let response = within(read_timeout, self.sender.send_request(request))
            .await?
            .map_err(|e| Error::HttpProtocol(format!("HTTP/2 request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes())))
            .collect();

        let mut body = response.into_body();
        let mut collected = BytesMut::new();
        while let Some(frame) = within(read_timeout, body.frame()).await? {
            let frame = frame.map_err(|e| Error::HttpProtocol(format!("Failed to read HTTP/2 body: {}", e)))?;
            if let Ok(data) = frame.into_data() {
                collected.extend_from_slice(&data);
            }
        }

        Ok(Response::new(status, headers, collected.freeze(), Protocol::Http2))
    }
}

/// Await `fut`, failing with [`Error::ReadTimeout`] once `limit` elapses.
async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Result<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::ReadTimeout(limit)),
        None => Ok(fut.await),
    }
}
