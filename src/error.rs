//! Error types for the wirepool crate.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening connections or exchanging requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Remote endpoint (or proxy) unreachable, or the connection broke.
    #[error("Connection error: {0}")]
    Connection(String),

    /// TLS handshake or configuration failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The proxy kept rejecting us, or no credentials were available for its challenge.
    #[error("Proxy authentication failed: {0}")]
    ProxyAuth(String),

    /// Malformed or unexpected HTTP data.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// URL is syntactically valid but unusable (unsupported scheme, missing host).
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Connect timeout (TCP + proxy tunnel + TLS + protocol handshake).
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// No response bytes arrived within the read timeout.
    #[error("Read timeout after {0:?}")]
    ReadTimeout(Duration),
}

impl Error {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a proxy authentication error.
    pub fn proxy_auth(message: impl Into<String>) -> Self {
        Self::ProxyAuth(message.into())
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create an invalid URL error.
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl(message.into())
    }

    /// Whether this error is one of the timeout variants.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout(_) | Self::ReadTimeout(_))
    }

    /// Whether this error happened while establishing the transport.
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Tls(_) | Self::ProxyAuth(_) | Self::ConnectTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::ReadTimeout(Duration::from_millis(5)).is_timeout());
        assert!(Error::ConnectTimeout(Duration::from_millis(5)).is_timeout());
        assert!(!Error::connection("refused").is_timeout());

        assert!(Error::proxy_auth("407").is_connect());
        assert!(Error::tls("bad cert").is_connect());
        assert!(!Error::http_protocol("garbage").is_connect());
    }

    #[test]
    fn test_error_display() {
        let err = Error::ConnectTimeout(Duration::from_millis(5000));
        assert_eq!(err.to_string(), "Connect timeout after 5s");
        assert_eq!(
            Error::invalid_url("ftp://x").to_string(),
            "Invalid URL: ftp://x"
        );
    }
}
