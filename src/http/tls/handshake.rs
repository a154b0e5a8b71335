//! TLS handshake with ALPN negotiation

use super::config::{TlsConfig, TlsError};
use super::session::{TlsInfo, TlsSession};
use super::{Protocol, Result};
use openssl::ssl::{SslConnector, SslMethod, SslRef, SslVerifyMode};
use openssl::x509::X509VerifyResult;
use std::io;
use std::pin::Pin;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use tracing::{debug, warn};

/// Encode protocols in ALPN wire format (length-prefixed)
pub fn encode_alpn(protocols: &[Protocol]) -> Vec<u8> {
    let mut alpn_bytes = Vec::new();
    for proto in protocols {
        let id = proto.alpn_id();
        alpn_bytes.push(id.len() as u8);
        alpn_bytes.extend_from_slice(id);
    }
    alpn_bytes
}

/// Client-side TLS negotiator
///
/// Holds one OpenSSL context; each [`negotiate`](Self::negotiate) call
/// creates a fresh session from it. Cheap to clone.
#[derive(Clone)]
pub struct TlsConnector {
    connector: SslConnector,
    verify_peer: bool,
}

impl TlsConnector {
    /// Build the OpenSSL context: system trust store, configured extra
    /// roots, version floor and verification mode
    pub fn new(config: &TlsConfig) -> Result<Self> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;

        builder.set_min_proto_version(Some(config.min_version().to_openssl_version()))?;
        if let Some(max) = config.max_version() {
            builder.set_max_proto_version(Some(max.to_openssl_version()))?;
        }
        if let Some(ciphers) = config.cipher_list() {
            builder.set_cipher_list(ciphers)?;
        }
        for cert in config.root_certificates() {
            builder.cert_store_mut().add_cert(cert.clone())?;
        }
        if config.verify_peer() {
            builder.set_verify(SslVerifyMode::PEER);
        } else {
            builder.set_verify(SslVerifyMode::NONE);
        }

        Ok(TlsConnector {
            connector: builder.build(),
            verify_peer: config.verify_peer(),
        })
    }

    /// Run the client handshake over `stream`
    ///
    /// Sends SNI for `hostname` and advertises `protocols` over ALPN.
    /// Returns the encrypted session and the protocol the server selected,
    /// or None when it selected nothing.
    pub async fn negotiate(
        &self,
        stream: TcpStream,
        hostname: &str,
        protocols: &[Protocol],
    ) -> Result<(TlsSession, Option<Protocol>)> {
        let mut config = self.connector.configure()?;
        if !protocols.is_empty() {
            config.set_alpn_protos(&encode_alpn(protocols))?;
        }
        if !self.verify_peer {
            config.set_verify_hostname(false);
        }

        let ssl = config.into_ssl(hostname)?;
        let mut session = SslStream::new(ssl, stream)?;

        if let Err(e) = Pin::new(&mut session).connect().await {
            let err = handshake_error(session.ssl(), e);
            warn!(host = %hostname, error = %err, "TLS handshake failed");
            return Err(err);
        }

        let info = TlsInfo::from_ssl(session.ssl());
        let protocol = session
            .ssl()
            .selected_alpn_protocol()
            .and_then(Protocol::from_alpn);
        debug!(
            host = %hostname,
            version = %info.version,
            cipher = %info.cipher,
            alpn = ?info.alpn,
            "TLS established"
        );

        Ok((session, protocol))
    }
}

/// Sort a failed handshake into a certificate, transport or protocol error
fn handshake_error(ssl: &SslRef, err: openssl::ssl::Error) -> TlsError {
    let verify = ssl.verify_result();
    if verify != X509VerifyResult::OK {
        return TlsError::Certificate(verify.error_string().to_string());
    }

    match err.into_io_error() {
        Ok(io_err)
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
            ) =>
        {
            TlsError::HandshakeFailed(format!("connection closed during handshake: {}", io_err))
        }
        Ok(io_err) => TlsError::Io(io_err),
        Err(err) => TlsError::HandshakeFailed(err.to_string()),
    }
}
