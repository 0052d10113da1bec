//! HTTP transport implementations.
//!
//! - TLS with ALPN offers via tokio-boring
//! - Direct and forward-proxy routes (CONNECT tunnels, absolute-form)
//! - HTTP/1.1 on raw I/O + httparse, HTTP/2 via hyper

pub mod connector;
pub mod h1;
pub mod h2;
pub mod negotiate;
pub mod proxy;
