//! HTTP response carrying the protocol that served it.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::protocol::Protocol;

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<String>,
    body: Bytes,
    protocol: Protocol,
    pub effective_url: Option<String>,
}

impl Response {
    pub fn new(status: u16, headers: Vec<String>, body: Bytes, protocol: Protocol) -> Self {
        Self {
            status,
            headers,
            body,
            protocol,
            effective_url: None,
        }
    }

    /// Set the URL that was actually requested.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.effective_url = Some(url.into());
        self
    }

    /// Protocol negotiated on the connection that served this response.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub(crate) fn set_protocol(&mut self, protocol: Protocol) {
        self.protocol = protocol;
    }

    /// Human-readable HTTP version of the exchange.
    pub fn http_version(&self) -> &'static str {
        match self.protocol {
            Protocol::Http1_1 => "HTTP/1.1",
            Protocol::Http2 => "HTTP/2",
            Protocol::Spdy3 => "SPDY/3.1",
        }
    }

    pub fn body(&self) -> &Bytes { &self.body }
    pub fn into_body(self) -> Bytes { self.body }
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }
    pub fn is_redirect(&self) -> bool { (300..400).contains(&self.status) }
    pub fn redirect_url(&self) -> Option<&str> { self.get_header("Location") }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|h| {
            let (key, value) = h.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    pub fn get_headers(&self, name: &str) -> Vec<&str> {
        self.headers.iter().filter_map(|h| {
            let (key, value) = h.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        }).collect()
    }

    pub fn content_type(&self) -> Option<&str> { self.get_header("Content-Type") }

    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| Error::HttpProtocol(format!("UTF-8 decode error: {}", e)))
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::from)
    }
}
