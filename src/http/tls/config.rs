//! TLS configuration
//!
//! Client-side settings consumed by [`TlsConnector`](super::TlsConnector).

use openssl::x509::X509;
use std::fmt;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The peer certificate was rejected; carries the X509 verify result
    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// TLS client configuration
///
/// Validated at build time, so a [`TlsConnector`](super::TlsConnector) can
/// always be created from it unless OpenSSL itself fails.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    verify_peer: bool,
    min_version: TlsVersion,
    max_version: Option<TlsVersion>,
    cipher_list: Option<String>,
    root_certificates: Vec<X509>,
}

impl TlsConfig {
    /// Create a configuration builder
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::new()
    }

    /// Whether the peer certificate chain and hostname are verified
    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }

    /// Lowest protocol version offered
    pub fn min_version(&self) -> TlsVersion {
        self.min_version
    }

    /// Highest protocol version offered, OpenSSL's maximum when unset
    pub fn max_version(&self) -> Option<TlsVersion> {
        self.max_version
    }

    /// Cipher list for TLS 1.2
    pub fn cipher_list(&self) -> Option<&str> {
        self.cipher_list.as_deref()
    }

    /// Extra trust anchors added on top of the system store
    pub fn root_certificates(&self) -> &[X509] {
        &self.root_certificates
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            verify_peer: true,
            min_version: TlsVersion::Tls12,
            max_version: None,
            cipher_list: None,
            root_certificates: Vec::new(),
        }
    }
}

/// Client configuration builder
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    config: TlsConfig,
    root_pems: Vec<Vec<u8>>,
}

impl TlsConfigBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Enable/disable peer certificate and hostname verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.config.verify_peer = verify;
        self
    }

    /// Set the minimum TLS version; anything below 1.2 is rejected by `build`
    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.config.min_version = version;
        self
    }

    /// Set the maximum TLS version
    pub fn max_version(mut self, version: TlsVersion) -> Self {
        self.config.max_version = Some(version);
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.config.cipher_list = Some(ciphers.into());
        self
    }

    /// Trust the certificates in a PEM bundle in addition to the system store
    pub fn add_root_certificate_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.root_pems.push(pem.into());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut config = self.config;

        if config.min_version < TlsVersion::Tls12 {
            return Err(TlsError::InvalidVersion(format!(
                "{} is below the TLSv1.2 floor",
                config.min_version
            )));
        }
        if let Some(max) = config.max_version {
            if max < config.min_version {
                return Err(TlsError::InvalidConfig(format!(
                    "max version {} is below min version {}",
                    max, config.min_version
                )));
            }
        }

        for pem in &self.root_pems {
            let certs = X509::stack_from_pem(pem)
                .map_err(|e| TlsError::Certificate(format!("Failed to load root certificate: {}", e)))?;
            if certs.is_empty() {
                return Err(TlsError::Certificate(
                    "No certificate found in root PEM".to_string(),
                ));
            }
            config.root_certificates.extend(certs);
        }

        Ok(config)
    }
}
