//! Transport configuration
//!
//! [`TransportConfig`] collects every knob of the transport: timeouts, pool
//! limits, protocol selection, TLS and HTTP/2 settings. Values are checked
//! once in [`TransportConfigBuilder::build`].
//!
//! ```
//! use httpwire::config::TransportConfig;
//! use std::time::Duration;
//!
//! let config = TransportConfig::builder()
//!     .connect_timeout(Duration::from_secs(3))
//!     .max_connections_per_host(4)
//!     .http2(false)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_connections_per_host(), 4);
//! ```

use crate::http::h2::{self, H2Config};
use crate::http::tls::{Protocol, TlsConfig};
use crate::net::PoolConfig;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid HTTP/2 configuration: {0}")]
    H2(#[from] h2::Error),
}

/// Transport configuration (immutable after building)
#[derive(Debug, Clone)]
pub struct TransportConfig {
    connect_timeout: Duration,
    handshake_timeout: Duration,
    request_timeout: Option<Duration>,
    idle_timeout: Duration,
    max_connections_per_host: usize,
    pool_wait_timeout: Duration,
    http2: bool,
    tls: TlsConfig,
    h2: H2Config,
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: None,
            idle_timeout: Duration::from_secs(90),
            max_connections_per_host: 8,
            pool_wait_timeout: Duration::from_secs(30),
            http2: true,
            tls: TlsConfig::default(),
            h2: H2Config::default(),
            tcp_nodelay: true,
            tcp_keepalive: None,
        }
    }
}

impl TransportConfig {
    /// Create a configuration builder starting from the defaults
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::new()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Whole-request deadline; None waits indefinitely
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn max_connections_per_host(&self) -> usize {
        self.max_connections_per_host
    }

    pub fn pool_wait_timeout(&self) -> Duration {
        self.pool_wait_timeout
    }

    pub fn http2(&self) -> bool {
        self.http2
    }

    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    pub fn h2(&self) -> &H2Config {
        &self.h2
    }

    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    pub fn tcp_keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive
    }

    /// Protocols advertised over ALPN, in preference order
    pub fn alpn_protocols(&self) -> Vec<Protocol> {
        if self.http2 {
            vec![Protocol::Http2, Protocol::Http1]
        } else {
            vec![Protocol::Http1]
        }
    }

    /// Pool limits derived from this configuration
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_per_key: self.max_connections_per_host,
            idle_timeout: self.idle_timeout,
            wait_timeout: self.pool_wait_timeout,
        }
    }
}

/// Builder for [`TransportConfig`]
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// TCP connect deadline
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// TLS handshake deadline
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Deadline for a whole request, from submission to the full response
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// How long an idle pooled connection stays reusable
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Connections per (scheme, host, port), idle and in use together
    pub fn max_connections_per_host(mut self, max: usize) -> Self {
        self.config.max_connections_per_host = max;
        self
    }

    /// How long a request waits for pool capacity
    pub fn pool_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_wait_timeout = timeout;
        self
    }

    /// Offer HTTP/2 over ALPN
    pub fn http2(mut self, enabled: bool) -> Self {
        self.config.http2 = enabled;
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = tls;
        self
    }

    pub fn h2(mut self, h2: H2Config) -> Self {
        self.config.h2 = h2;
        self
    }

    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.config.tcp_nodelay = nodelay;
        self
    }

    /// Enable TCP keepalive probes after this much idle time
    pub fn tcp_keepalive(mut self, idle: Duration) -> Self {
        self.config.tcp_keepalive = Some(idle);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<TransportConfig, ConfigError> {
        let config = self.config;

        if config.max_connections_per_host == 0 {
            return Err(ConfigError::Invalid(
                "max_connections_per_host must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("connect_timeout", config.connect_timeout),
            ("handshake_timeout", config.handshake_timeout),
            ("pool_wait_timeout", config.pool_wait_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        if config.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Invalid(
                "request_timeout must be non-zero".to_string(),
            ));
        }
        config.h2.validate()?;

        Ok(config)
    }
}
