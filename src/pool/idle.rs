//! Keep-alive pool of idle connections.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{KEEP_ALIVE_DURATION, MAX_IDLE_CONNECTIONS};
use crate::pool::{Endpoint, PooledConnection};
use crate::protocol::Protocol;

/// Idle connections keyed by endpoint, most recently released first.
///
/// The total number of idle connections never exceeds `max_idle`; releasing
/// past the limit closes the least recently used one anywhere in the pool.
/// A connection idle for `keep_alive` or longer is never handed out.
#[derive(Debug)]
pub struct ConnectionPool {
    idle: Mutex<HashMap<Endpoint, VecDeque<PooledConnection>>>,
    max_idle: usize,
    keep_alive: Duration,
}

impl ConnectionPool {
    pub fn new(max_idle: usize, keep_alive: Duration) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            max_idle,
            keep_alive,
        }
    }

    pub fn max_idle(&self) -> usize {
        self.max_idle
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Take the most recently released live connection for `endpoint`.
    ///
    /// Expired or closed entries met on the way are dropped. `None` means
    /// the caller should open a new connection.
    pub async fn acquire(&self, endpoint: &Endpoint) -> Option<PooledConnection> {
        let mut idle = self.idle.lock().await;
        let list = idle.get_mut(endpoint)?;

        let mut found = None;
        while let Some(conn) = list.pop_front() {
            if conn.is_expired(self.keep_alive) {
                tracing::debug!(
                    "Pool: Connection expired for {} (idle: {:?})",
                    endpoint,
                    conn.last_used().elapsed()
                );
                continue;
            }
            if !conn.is_reusable() {
                tracing::debug!("Pool: Dropping closed connection for {}", endpoint);
                continue;
            }
            found = Some(conn);
            break;
        }

        if list.is_empty() {
            idle.remove(endpoint);
        }

        if let Some(conn) = &found {
            tracing::debug!(
                "Pool: Reusing {} connection for {} (age: {:?})",
                conn.protocol(),
                endpoint,
                conn.created_at().elapsed()
            );
        }
        found
    }

    /// Park a connection for reuse. Non-reusable connections are closed.
    pub async fn release(&self, mut conn: PooledConnection) {
        if !conn.is_reusable() {
            tracing::debug!("Pool: Closing non-reusable connection for {}", conn.endpoint());
            return;
        }
        if self.max_idle == 0 {
            return;
        }

        conn.touch();
        let mut idle = self.idle.lock().await;
        let endpoint = conn.endpoint().clone();
        idle.entry(endpoint.clone()).or_default().push_front(conn);

        let mut total: usize = idle.values().map(VecDeque::len).sum();
        tracing::debug!("Pool: Returned connection for {} (idle: {})", endpoint, total);

        while total > self.max_idle {
            if evict_least_recently_used(&mut idle).is_none() {
                break;
            }
            total -= 1;
        }
    }

    /// Close every expired connection. Returns how many were closed.
    pub async fn evict_expired(&self) -> usize {
        let mut idle = self.idle.lock().await;
        let mut evicted = 0;
        for list in idle.values_mut() {
            let before = list.len();
            list.retain(|conn| !conn.is_expired(self.keep_alive) && conn.is_reusable());
            evicted += before - list.len();
        }
        idle.retain(|_, list| !list.is_empty());
        if evicted > 0 {
            tracing::debug!("Pool: Evicted {} expired connections", evicted);
        }
        evicted
    }

    /// Total idle connections.
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.values().map(VecDeque::len).sum()
    }

    /// Idle connections for one endpoint.
    pub async fn idle_count_for(&self, endpoint: &Endpoint) -> usize {
        self.idle.lock().await.get(endpoint).map_or(0, VecDeque::len)
    }

    /// Snapshot for debugging and monitoring.
    pub async fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().await;
        let all = || idle.values().flat_map(|list| list.iter());
        PoolStats {
            idle_connections: all().count(),
            endpoints: idle.len(),
            http1_idle_connections: all().filter(|c| c.protocol() == Protocol::Http1_1).count(),
            http2_idle_connections: all().filter(|c| c.protocol() == Protocol::Http2).count(),
        }
    }

    /// Close every idle connection.
    pub async fn clear(&self) {
        let mut idle = self.idle.lock().await;
        let closed: usize = idle.values().map(VecDeque::len).sum();
        idle.clear();
        tracing::debug!("Pool: Cleared {} idle connections", closed);
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(MAX_IDLE_CONNECTIONS, KEEP_ALIVE_DURATION)
    }
}

/// Drop the oldest idle connection across all endpoints.
fn evict_least_recently_used(idle: &mut HashMap<Endpoint, VecDeque<PooledConnection>>) -> Option<Endpoint> {
    let oldest = idle
        .iter()
        .filter_map(|(endpoint, list)| list.back().map(|conn| (endpoint, conn.last_used())))
        .min_by_key(|(_, last_used)| *last_used)
        .map(|(endpoint, _)| endpoint.clone())?;

    if let Some(list) = idle.get_mut(&oldest) {
        list.pop_back();
        if list.is_empty() {
            idle.remove(&oldest);
        }
    }
    tracing::debug!("Pool: Evicted least recently used connection for {}", oldest);
    Some(oldest)
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle_connections: usize,
    pub endpoints: usize,
    pub http1_idle_connections: usize,
    pub http2_idle_connections: usize,
}
