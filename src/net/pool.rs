//! Keyed connection pool
//!
//! Idle connections are kept per (host, port, secure) key, most recently
//! used first. Every connection, idle or checked out, holds a permit from
//! its key's semaphore, which caps how many connections a key may have;
//! callers beyond the cap wait until a connection is released or disposed.

use super::{Connected, Connector, Error, Result};
use crate::http::tls::{Protocol, TlsInfo};
use crate::http::BoxedSession;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

/// Identity of a reusable connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    host: String,
    port: u16,
    secure: bool,
}

impl PoolKey {
    /// `host` is a DNS name or a bare IP address (no IPv6 brackets)
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        PoolKey {
            host: host.into().to_ascii_lowercase(),
            port,
            secure,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Pool limits
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections per key, idle and in use together
    pub max_per_key: usize,
    /// Idle connections older than this are disposed
    pub idle_timeout: Duration,
    /// How long `acquire` waits for capacity
    pub wait_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_per_key: 8,
            idle_timeout: Duration::from_secs(90),
            wait_timeout: Duration::from_secs(30),
        }
    }
}

/// A key's share of the pool capacity, released on drop
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// A connection checked out of the pool
///
/// Dropping it closes the connection and frees its capacity; hand it back
/// with [`ConnectionPool::release`] to keep it for reuse.
#[derive(Debug)]
pub struct PooledConnection {
    key: PoolKey,
    session: BoxedSession,
    protocol: Protocol,
    tls: Option<TlsInfo>,
    last_used: Instant,
    reusable: bool,
    permit: ConnectionPermit,
}

impl PooledConnection {
    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Protocol negotiated when the connection was opened
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls.as_ref()
    }

    pub fn session_mut(&mut self) -> &mut BoxedSession {
        &mut self.session
    }

    /// Mark whether the last exchange left the connection reusable
    pub fn set_reusable(&mut self, reusable: bool) {
        self.reusable = reusable;
    }

    /// Whether the connection can go back to the pool
    pub fn is_reusable(&self) -> bool {
        self.reusable && self.session.is_alive()
    }

    /// Detach the stream from the pool, keeping its capacity permit
    pub fn into_parts(self) -> (BoxedSession, ConnectionPermit) {
        (self.session, self.permit)
    }

    fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() >= idle_timeout
    }
}

struct KeyState {
    idle: VecDeque<PooledConnection>,
    permits: Arc<Semaphore>,
    released: Arc<Notify>,
}

impl KeyState {
    fn new(max: usize) -> Self {
        KeyState {
            idle: VecDeque::new(),
            permits: Arc::new(Semaphore::new(max)),
            released: Arc::new(Notify::new()),
        }
    }

    /// Most recent live idle connection; stale ones are dropped on the way
    fn take_idle(&mut self, idle_timeout: Duration) -> Option<PooledConnection> {
        while let Some(conn) = self.idle.pop_front() {
            if !conn.is_expired(idle_timeout) && conn.session.is_alive() {
                return Some(conn);
            }
            trace!(key = %conn.key, "disposing stale idle connection");
        }
        None
    }

    /// Nothing idle, checked out or waiting refers to this key
    ///
    /// Every permit and every waiter holds a clone of the semaphore.
    fn is_unused(&self) -> bool {
        self.idle.is_empty()
            && Arc::strong_count(&self.permits) == 1
            && Arc::strong_count(&self.released) == 1
    }
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    keys: Mutex<HashMap<PoolKey, KeyState>>,
}

/// Keyed connection pool
///
/// Cheap to clone; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                connector,
                config,
                keys: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PoolKey, KeyState>> {
        self.inner.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out a connection for `key`
    ///
    /// Reuses the most recently released live connection, opens a new one
    /// while the key is under its cap, and otherwise waits for a release.
    pub async fn acquire(&self, key: &PoolKey) -> Result<PooledConnection> {
        let deadline = tokio::time::Instant::now() + self.inner.config.wait_timeout;

        loop {
            let (permits, released) = {
                let mut keys = self.lock();
                let max = self.inner.config.max_per_key;
                let state = keys.entry(key.clone()).or_insert_with(|| KeyState::new(max));
                if let Some(conn) = state.take_idle(self.inner.config.idle_timeout) {
                    trace!(%key, "reusing pooled connection");
                    return Ok(conn);
                }
                (state.permits.clone(), state.released.clone())
            };

            let permit = match permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    trace!(%key, "pool at capacity, waiting");
                    tokio::select! {
                        permit = permits.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return Err(Error::PoolTimeout(key.clone())),
                        },
                        _ = released.notified() => continue,
                        _ = tokio::time::sleep_until(deadline) => {
                            debug!(%key, "timed out waiting for pool capacity");
                            return Err(Error::PoolTimeout(key.clone()));
                        }
                    }
                }
            };

            return self.open(key, permit).await;
        }
    }

    async fn open(&self, key: &PoolKey, permit: OwnedSemaphorePermit) -> Result<PooledConnection> {
        let Connected {
            session,
            protocol,
            tls,
        } = self.inner.connector.connect(key).await?;
        debug!(%key, %protocol, "opened connection");

        Ok(PooledConnection {
            key: key.clone(),
            session,
            protocol,
            tls,
            last_used: Instant::now(),
            reusable: false,
            permit: ConnectionPermit { _permit: permit },
        })
    }

    /// Return a connection after an exchange
    ///
    /// Kept for reuse only if the exchange marked it reusable and the peer
    /// still has it open; disposed otherwise.
    pub fn release(&self, mut conn: PooledConnection) {
        if !conn.is_reusable() {
            trace!(key = %conn.key, "disposing connection");
            return;
        }
        conn.reusable = false;
        conn.last_used = Instant::now();

        let mut keys = self.lock();
        let max = self.inner.config.max_per_key;
        let state = keys
            .entry(conn.key.clone())
            .or_insert_with(|| KeyState::new(max));
        trace!(key = %conn.key, idle = state.idle.len() + 1, "connection returned to pool");
        state.idle.push_front(conn);
        state.released.notify_one();
    }

    /// Dispose every expired or dead idle connection
    ///
    /// Keys left with no connections at all are forgotten. Returns how many
    /// connections were disposed.
    pub fn purge_idle(&self) -> usize {
        let idle_timeout = self.inner.config.idle_timeout;
        let mut keys = self.lock();
        let mut purged = 0;

        for state in keys.values_mut() {
            let before = state.idle.len();
            state
                .idle
                .retain(|conn| !conn.is_expired(idle_timeout) && conn.session.is_alive());
            purged += before - state.idle.len();
        }
        keys.retain(|_, state| !state.is_unused());

        if purged > 0 {
            debug!(purged, "purged idle connections");
        }
        purged
    }

    /// Number of idle connections for `key`
    pub fn idle_count(&self, key: &PoolKey) -> usize {
        self.lock().get(key).map_or(0, |state| state.idle.len())
    }

    /// Drop every idle connection
    pub fn clear(&self) {
        let mut keys = self.lock();
        for state in keys.values_mut() {
            state.idle.clear();
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("keys", &self.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out in-memory pipes and counts how many it opened
    #[derive(Default)]
    struct PipeConnector {
        opened: AtomicUsize,
        peers: Mutex<Vec<tokio::io::DuplexStream>>,
    }

    impl Connector for PipeConnector {
        fn connect<'a>(&'a self, _key: &'a PoolKey) -> BoxFuture<'a, Result<Connected>> {
            Box::pin(async move {
                self.opened.fetch_add(1, Ordering::SeqCst);
                let (client, server) = tokio::io::duplex(1024);
                self.peers.lock().unwrap().push(server);
                Ok(Connected {
                    session: Box::new(client),
                    protocol: Protocol::Http1,
                    tls: None,
                })
            })
        }
    }

    fn pool(max_per_key: usize, idle: Duration, wait: Duration) -> (ConnectionPool, Arc<PipeConnector>) {
        let connector = Arc::new(PipeConnector::default());
        let pool = ConnectionPool::new(
            connector.clone(),
            PoolConfig {
                max_per_key,
                idle_timeout: idle,
                wait_timeout: wait,
            },
        );
        (pool, connector)
    }

    fn key() -> PoolKey {
        PoolKey::new("Example.com", 443, true)
    }

    #[test]
    fn test_pool_key() {
        let key = key();
        assert_eq!(key.host(), "example.com");
        assert_eq!(key, PoolKey::new("example.com", 443, true));
        assert_ne!(key, PoolKey::new("example.com", 443, false));
        assert_eq!(key.to_string(), "https://example.com:443");
        assert_eq!(
            PoolKey::new("::1", 8080, false).to_string(),
            "http://[::1]:8080"
        );
    }

    #[tokio::test]
    async fn test_reuse_after_release() {
        let (pool, connector) = pool(4, Duration::from_secs(60), Duration::from_secs(1));

        let mut conn = pool.acquire(&key()).await.unwrap();
        conn.set_reusable(true);
        pool.release(conn);
        assert_eq!(pool.idle_count(&key()), 1);

        let conn = pool.acquire(&key()).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(&key()), 0);
        drop(conn);
    }

    #[tokio::test]
    async fn test_not_reusable_is_disposed() {
        let (pool, connector) = pool(4, Duration::from_secs(60), Duration::from_secs(1));

        let conn = pool.acquire(&key()).await.unwrap();
        pool.release(conn);
        assert_eq!(pool.idle_count(&key()), 0);

        let _conn = pool.acquire(&key()).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keys_are_separate() {
        let (pool, connector) = pool(4, Duration::from_secs(60), Duration::from_secs(1));

        let mut conn = pool.acquire(&key()).await.unwrap();
        conn.set_reusable(true);
        pool.release(conn);

        let other = PoolKey::new("example.com", 443, false);
        let _conn = pool.acquire(&other).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count(&key()), 1);
    }

    #[tokio::test]
    async fn test_capacity_timeout() {
        let (pool, _) = pool(1, Duration::from_secs(60), Duration::from_millis(50));

        let _held = pool.acquire(&key()).await.unwrap();
        let result = pool.acquire(&key()).await;
        assert!(matches!(result, Err(Error::PoolTimeout(_))));
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let (pool, connector) = pool(1, Duration::from_secs(60), Duration::from_secs(5));

        let mut held = pool.acquire(&key()).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&key()).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        held.set_reusable(true);
        pool.release(held);

        waiter.await.unwrap().unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waiter_gets_capacity_on_dispose() {
        let (pool, connector) = pool(1, Duration::from_secs(60), Duration::from_secs(5));

        let held = pool.acquire(&key()).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&key()).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        waiter.await.unwrap().unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idle_expiry() {
        let (pool, connector) = pool(4, Duration::from_millis(20), Duration::from_secs(1));

        let mut conn = pool.acquire(&key()).await.unwrap();
        conn.set_reusable(true);
        pool.release(conn);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(pool.purge_idle(), 1);
        assert_eq!(pool.idle_count(&key()), 0);

        let mut conn = pool.acquire(&key()).await.unwrap();
        conn.set_reusable(true);
        pool.release(conn);
        tokio::time::sleep(Duration::from_millis(40)).await;

        // expired entries are skipped on acquire too
        let _conn = pool.acquire(&key()).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_purge_forgets_unused_keys() {
        let (pool, _) = pool(2, Duration::from_secs(60), Duration::from_secs(1));
        let other = PoolKey::new("other.example", 80, false);

        let held = pool.acquire(&key()).await.unwrap();
        let mut idle = pool.acquire(&other).await.unwrap();
        idle.set_reusable(true);
        pool.release(idle);

        let gone = pool.acquire(&PoolKey::new("gone.example", 80, false)).await.unwrap();
        pool.release(gone);
        assert_eq!(pool.lock().len(), 3);

        // a checked-out connection and an idle one both keep their key
        assert_eq!(pool.purge_idle(), 0);
        assert_eq!(pool.lock().len(), 2);
        assert_eq!(pool.idle_count(&other), 1);

        drop(held);
        pool.purge_idle();
        assert_eq!(pool.lock().len(), 1);
        assert!(pool.lock().contains_key(&other));

        // a forgotten key starts over with its full capacity
        let _a = pool.acquire(&key()).await.unwrap();
        let _b = pool.acquire(&key()).await.unwrap();
    }

    #[tokio::test]
    async fn test_detached_connection_keeps_permit() {
        let (pool, _) = pool(1, Duration::from_secs(60), Duration::from_millis(50));

        let conn = pool.acquire(&key()).await.unwrap();
        let (_session, permit) = conn.into_parts();
        assert!(matches!(
            pool.acquire(&key()).await,
            Err(Error::PoolTimeout(_))
        ));

        drop(permit);
        assert!(pool.acquire(&key()).await.is_ok());
    }
}
