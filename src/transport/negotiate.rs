//! Protocol negotiation over TLS ALPN.

use tokio::net::TcpStream;

use crate::error::Result;
use crate::pool::Endpoint;
use crate::protocol::Protocol;
pub use crate::protocol::{encode_alpn, offered_protocols, select};
use crate::transport::connector::{MaybeHttpsStream, TlsConnector};

/// Negotiates the application protocol for fresh connections.
#[derive(Clone, Debug, Default)]
pub struct Negotiator {
    tls: TlsConnector,
}

impl Negotiator {
    pub fn new(tls: TlsConnector) -> Self {
        Self { tls }
    }

    /// Negotiate a protocol on `tcp` for `endpoint`.
    ///
    /// `https` endpoints run the TLS handshake offering `offered` via ALPN
    /// (no ALPN extension when `offered` is empty); the server's pick is kept
    /// only if it was offered, anything else resolves to HTTP/1.1. Plain
    /// `http` endpoints always speak HTTP/1.1.
    pub async fn negotiate(
        &self,
        offered: &[Protocol],
        endpoint: &Endpoint,
        tcp: TcpStream,
    ) -> Result<(MaybeHttpsStream, Protocol)> {
        if !endpoint.is_https() {
            tracing::debug!("Negotiate: {} is cleartext, using http/1.1", endpoint);
            return Ok((MaybeHttpsStream::Http(tcp), Protocol::Http1_1));
        }

        let alpn = encode_alpn(offered);
        let stream = self.tls.handshake(&endpoint.host, tcp, &alpn).await?;
        let stream = MaybeHttpsStream::Https(stream);

        let server_choice = stream.selected_alpn();
        let protocol = select(offered, server_choice);
        tracing::debug!(
            "Negotiate: {} offered {:?}, server chose {:?}, using {}",
            endpoint,
            offered.iter().map(Protocol::as_str).collect::<Vec<_>>(),
            server_choice.map(String::from_utf8_lossy),
            protocol
        );

        Ok((stream, protocol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Scheme;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_cleartext_is_always_http11() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tcp = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let endpoint = Endpoint::new(Scheme::Http, "127.0.0.1", 80);

        let offered = offered_protocols(true, true);
        let (stream, protocol) = Negotiator::default()
            .negotiate(&offered, &endpoint, tcp)
            .await
            .unwrap();
        assert_eq!(protocol, Protocol::Http1_1);
        assert!(!stream.is_tls());
        assert_eq!(stream.selected_alpn(), None);
    }
}
