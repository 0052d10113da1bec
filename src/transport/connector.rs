//! BoringSSL TLS connector with ALPN offers.

use boring::ssl::{SslConnector, SslMethod, SslSessionCacheMode, SslVersion};
use boring::x509::X509;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

use crate::error::{Error, Result};

/// Builds TLS client sessions that offer a given ALPN list.
#[derive(Clone, Debug, Default)]
pub struct TlsConnector {
    root_certs: Vec<Vec<u8>>,
}

impl TlsConnector {
    /// Create a connector trusting the platform roots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add custom root certificates (DER or PEM).
    pub fn with_root_certificates(mut self, certs: Vec<Vec<u8>>) -> Self {
        self.root_certs = certs;
        self
    }

    fn configure_ssl(&self, alpn: &[u8]) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::Tls(format!("Failed to create SSL connector: {}", e)))?;

        for cert_bytes in &self.root_certs {
            let cert = X509::from_der(cert_bytes).or_else(|_| X509::from_pem(cert_bytes));
            match cert {
                Ok(cert) => {
                    if let Err(e) = builder.cert_store_mut().add_cert(cert) {
                        tracing::warn!("Ignoring root certificate: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Ignoring unparseable root certificate: {}", e),
            }
        }

        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|e| Error::Tls(format!("Failed to set min TLS version: {}", e)))?;
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_3))
            .map_err(|e| Error::Tls(format!("Failed to set max TLS version: {}", e)))?;

        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);

        // An empty list sends no ALPN extension at all.
        if !alpn.is_empty() {
            builder
                .set_alpn_protos(alpn)
                .map_err(|e| Error::Tls(format!("Failed to set ALPN: {}", e)))?;
        }

        Ok(builder.build())
    }

    /// Run the TLS handshake for `host` over an established TCP stream.
    pub async fn handshake(
        &self,
        host: &str,
        tcp: TcpStream,
        alpn: &[u8],
    ) -> Result<SslStream<TcpStream>> {
        let ssl_config = self
            .configure_ssl(alpn)?
            .configure()
            .map_err(|e| Error::Tls(format!("Failed to configure SSL: {}", e)))?;

        tokio_boring::connect(ssl_config, host, tcp)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake with {} failed: {}", host, e)))
    }
}

/// Stream that can be either HTTP (plain TCP) or HTTPS (TLS).
#[derive(Debug)]
pub enum MaybeHttpsStream {
    /// Plain TCP stream for HTTP.
    Http(TcpStream),
    /// TLS-wrapped stream for HTTPS.
    Https(SslStream<TcpStream>),
}

impl MaybeHttpsStream {
    /// Raw ALPN identifier selected by the server, if any.
    ///
    /// Plain TCP has no handshake, so it never has one.
    pub fn selected_alpn(&self) -> Option<&[u8]> {
        match self {
            MaybeHttpsStream::Http(_) => None,
            MaybeHttpsStream::Https(stream) => stream.ssl().selected_alpn_protocol(),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, MaybeHttpsStream::Https(_))
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
