//! # wirepool
//!
//! Async HTTP client connection manager.
//!
//! A [`Client`] obtains connections from a [`ConnectionFactory`], which either
//! reuses an idle connection from a bounded keep-alive pool or opens a new one,
//! directly or through an authenticating forward proxy. The application
//! protocol (HTTP/1.1, HTTP/2, SPDY/3.1) is negotiated over TLS ALPN and
//! recorded on every [`Response`] and in [`Client::last_request_protocol`].
//!
//! ```rust,ignore
//! use wirepool::{Client, Protocol};
//!
//! let client = Client::builder()
//!     .proxy("proxy", 8080)
//!     .proxy_credentials("u", "p")
//!     .build()?;
//!
//! let resp = client.get("https://api.example.com/1/statuses").send().await?;
//! assert_eq!(client.last_request_protocol(), Some(resp.protocol()));
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod pool;
pub mod protocol;
pub mod request;
pub mod response;
pub mod transport;

// Re-exports
pub use auth::{BasicProxyAuthenticator, ProxyAuthenticator, ProxyChallenge};
pub use client::{Client, ClientBuilder, RequestBuilder};
pub use config::{ClientConfig, ProxyConfig, KEEP_ALIVE_DURATION, MAX_IDLE_CONNECTIONS};
pub use error::{Error, Result};
pub use factory::{ConnectionFactory, DirectConnector, PooledConnector};
pub use pool::{ConnectionPool, Endpoint, PoolStats, PooledConnection, Scheme};
pub use protocol::Protocol;
pub use request::Request;
pub use response::Response;
