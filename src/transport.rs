//! Transport router
//!
//! [`Transport::send`] is the single entry point: it resolves the request
//! target to a pool key, reuses a live HTTP/2 connection for that key when
//! one exists, and otherwise checks a connection out of the pool and speaks
//! whichever protocol ALPN selected on it.
//!
//! ```no_run
//! use httpwire::config::TransportConfig;
//! use httpwire::http::{HttpRequest, Method};
//! use httpwire::transport::{Cancellation, Transport};
//!
//! # async fn example() -> Result<(), httpwire::transport::Error> {
//! let transport = Transport::new(TransportConfig::default())?;
//! let (handle, cancel) = Cancellation::new();
//!
//! let request = HttpRequest::builder()
//!     .method(Method::Get)
//!     .uri("https://example.com/")
//!     .build();
//! let pending = transport.send(request, Some(cancel));
//! // handle.cancel() from anywhere abandons the request
//! # drop(handle);
//! let response = pending.await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

use crate::config::TransportConfig;
use crate::http::h2::{self, H2Connection};
use crate::http::tls::Protocol;
use crate::http::{self, BufferPool, Http1Connection, HttpRequest, HttpResponse};
use crate::net::{self, ConnectionPermit, ConnectionPool, Connector, PoolKey, TcpConnector};
use std::collections::HashMap;
use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};
use url::{Host, Url};

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`Transport::send`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error(transparent)]
    Connect(#[from] net::Error),

    #[error(transparent)]
    Http(#[from] http::Error),

    #[error(transparent)]
    H2(#[from] h2::Error),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport is shut down")]
    Shutdown,
}

impl Error {
    /// Whether the request provably never reached the server, so sending
    /// it again cannot duplicate its effects
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::H2(e) => e.is_retryable(),
            Error::Connect(e) => matches!(
                e,
                net::Error::Connect { .. }
                    | net::Error::ConnectTimeout { .. }
                    | net::Error::HandshakeTimeout { .. }
                    | net::Error::PoolTimeout(_)
            ),
            _ => false,
        }
    }

    /// Whether a deadline expired
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Connect(e) => matches!(
                e,
                net::Error::ConnectTimeout { .. }
                    | net::Error::HandshakeTimeout { .. }
                    | net::Error::PoolTimeout(_)
            ),
            Error::H2(h2::Error::SettingsTimeout) => true,
            _ => false,
        }
    }

    /// Whether the caller abandoned the request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::H2(h2::Error::Cancel(_)))
    }
}

/// Receiving side of a cancellation signal, passed along with a request
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

/// Triggering side of a cancellation signal
#[derive(Debug)]
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl Cancellation {
    /// Create a linked handle and token
    pub fn new() -> (CancellationHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (CancellationHandle { tx }, Cancellation { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; never resolves if the handle is dropped
    /// without cancelling
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            future::pending::<()>().await;
        }
    }
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another token linked to this handle
    pub fn token(&self) -> Cancellation {
        Cancellation {
            rx: self.tx.subscribe(),
        }
    }
}

/// Where a request goes
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    key: PoolKey,
    /// `host[:port]` as sent in Host / :authority
    authority: String,
}

impl Target {
    fn parse(uri: &str) -> Result<Target> {
        let url = Url::parse(uri).map_err(|e| Error::InvalidUrl(format!("{}: {}", uri, e)))?;

        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        };
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(Error::InvalidUrl(format!("{}: missing host", uri))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidUrl(format!("{}: missing port", uri)))?;

        let host_str = url.host_str().unwrap_or_default();
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host_str, port),
            None => host_str.to_string(),
        };

        Ok(Target {
            key: PoolKey::new(host, port, secure),
            authority,
        })
    }
}

/// A multiplexed connection and the pool capacity it occupies
struct SharedH2 {
    conn: H2Connection,
    _permit: ConnectionPermit,
}

struct Inner {
    config: TransportConfig,
    pool: ConnectionPool,
    h2: Mutex<HashMap<PoolKey, Arc<SharedH2>>>,
    buffers: Arc<BufferPool>,
    shut_down: AtomicBool,
}

/// HTTP client transport
///
/// Cheap to clone; clones share connections.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Create a transport connecting over TCP (and TLS for https)
    pub fn new(config: TransportConfig) -> Result<Transport> {
        let connector = TcpConnector::new(&config)?;
        Ok(Self::with_connector(config, Arc::new(connector)))
    }

    /// Create a transport over a custom connector
    pub fn with_connector(config: TransportConfig, connector: Arc<dyn Connector>) -> Transport {
        let pool = ConnectionPool::new(connector, config.pool_config());
        Transport {
            inner: Arc::new(Inner {
                config,
                pool,
                h2: Mutex::new(HashMap::new()),
                buffers: Arc::new(BufferPool::default()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Send a request and wait for its response
    ///
    /// `request.uri()` must be an absolute `http` or `https` URL. The request
    /// is abandoned when `cancel` fires or the configured request timeout
    /// expires: an HTTP/2 stream is reset without disturbing its connection,
    /// an HTTP/1.1 connection is closed.
    pub async fn send(&self, request: HttpRequest, cancel: Option<Cancellation>) -> Result<HttpResponse> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }
        let target = Target::parse(request.uri())?;
        let request_timeout = self.inner.config.request_timeout();

        let cancelled = async {
            match &cancel {
                Some(cancel) => cancel.cancelled().await,
                None => future::pending().await,
            }
        };
        let deadline = async {
            match request_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => {
                debug!(key = %target.key, "request cancelled");
                Err(Error::Cancelled)
            }
            _ = deadline => {
                let timeout = request_timeout.unwrap_or_default();
                debug!(key = %target.key, ?timeout, "request timed out");
                Err(Error::Timeout(timeout))
            }
            result = self.dispatch(&request, &target) => result,
        }
    }

    async fn dispatch(&self, request: &HttpRequest, target: &Target) -> Result<HttpResponse> {
        if let Some(shared) = self.h2_connection(&target.key) {
            trace!(key = %target.key, "reusing HTTP/2 connection");
            return Ok(shared
                .conn
                .send_request(request, &target.authority, future::pending())
                .await?);
        }

        let mut pooled = self.inner.pool.acquire(&target.key).await?;
        match pooled.protocol() {
            Protocol::Http2 => {
                // another request finished a handshake while we waited
                if let Some(shared) = self.h2_connection(&target.key) {
                    pooled.set_reusable(true);
                    self.inner.pool.release(pooled);
                    return Ok(shared
                        .conn
                        .send_request(request, &target.authority, future::pending())
                        .await?);
                }

                let (session, permit) = pooled.into_parts();
                let conn = H2Connection::handshake(session, self.inner.config.h2().clone()).await?;
                let shared = self.register_h2(
                    &target.key,
                    Arc::new(SharedH2 {
                        conn,
                        _permit: permit,
                    }),
                );
                Ok(shared
                    .conn
                    .send_request(request, &target.authority, future::pending())
                    .await?)
            }
            Protocol::Http1 => {
                let mut conn =
                    Http1Connection::with_buffers(pooled.session_mut(), self.inner.buffers.clone());
                // on error the pooled connection is dropped, closing it
                let exchange = conn.send_request(request, &target.authority).await?;
                pooled.set_reusable(exchange.reusable);
                self.inner.pool.release(pooled);
                Ok(exchange.response)
            }
        }
    }

    fn lock_h2(&self) -> MutexGuard<'_, HashMap<PoolKey, Arc<SharedH2>>> {
        self.inner.h2.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live multiplexed connection for `key`; dead ones are forgotten
    fn h2_connection(&self, key: &PoolKey) -> Option<Arc<SharedH2>> {
        let mut registry = self.lock_h2();
        match registry.get(key) {
            Some(shared) if shared.conn.is_usable() => Some(shared.clone()),
            Some(_) => {
                debug!(%key, "dropping unusable HTTP/2 connection");
                registry.remove(key);
                None
            }
            None => None,
        }
    }

    /// Publish a new connection unless a usable one won the race; the
    /// loser still serves the request that created it
    fn register_h2(&self, key: &PoolKey, shared: Arc<SharedH2>) -> Arc<SharedH2> {
        let mut registry = self.lock_h2();
        if registry.get(key).is_some_and(|existing| existing.conn.is_usable()) {
            return shared;
        }
        debug!(%key, "registered HTTP/2 connection");
        registry.insert(key.clone(), shared.clone());
        shared
    }

    /// Number of multiplexed connections currently registered
    pub fn h2_connections(&self) -> usize {
        self.lock_h2().len()
    }

    /// Dispose expired idle HTTP/1.1 connections and dead HTTP/2 ones
    pub fn purge_idle(&self) -> usize {
        let mut registry = self.lock_h2();
        let before = registry.len();
        registry.retain(|_, shared| shared.conn.is_usable());
        let dead = before - registry.len();
        drop(registry);
        dead + self.inner.pool.purge_idle()
    }

    /// Close every connection; later sends fail with [`Error::Shutdown`]
    ///
    /// Multiplexed connections get GOAWAY; requests already in flight on
    /// them still complete.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let registry: Vec<_> = self.lock_h2().drain().collect();
        for (key, shared) in registry {
            debug!(%key, "closing HTTP/2 connection");
            shared.conn.close();
        }
        self.inner.pool.clear();
    }
}
