//! Established TLS sessions

use openssl::ssl::{NameType, SslRef};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

/// Encrypted client stream produced by the negotiator
pub type TlsSession = SslStream<TcpStream>;

/// Connection parameters captured after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername sent by the client
    pub servername: Option<String>,

    /// Negotiated ALPN protocol id
    pub alpn: Option<String>,

    /// Peer certificate subject, one-line form
    pub peer_subject: Option<String>,

    /// Whether session was resumed
    pub session_reused: bool,
}

impl TlsInfo {
    /// Capture the parameters of an established connection
    pub fn from_ssl(ssl: &SslRef) -> Self {
        let peer_subject = ssl.peer_certificate().map(|cert| {
            cert.subject_name()
                .entries()
                .filter_map(|entry| {
                    let key = entry.object().nid().short_name().ok()?;
                    let value = entry.data().as_utf8().ok()?;
                    Some(format!("{}={}", key, value))
                })
                .collect::<Vec<_>>()
                .join(", ")
        });

        TlsInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).to_string()),
            peer_subject,
            session_reused: ssl.session_reused(),
        }
    }

    /// Capture the parameters of a session
    pub fn from_session(session: &TlsSession) -> Self {
        Self::from_ssl(session.ssl())
    }
}
