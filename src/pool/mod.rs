//! Connection pooling.
//!
//! Idle HTTP/1.1 and HTTP/2 connections are parked per [`Endpoint`] and
//! handed back out while they are within the keep-alive window.

mod connection;
mod endpoint;
mod idle;

pub use connection::PooledConnection;
pub use endpoint::{Endpoint, Scheme};
pub use idle::{ConnectionPool, PoolStats};
