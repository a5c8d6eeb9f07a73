//! Negotiated session details
//!
//! A `SessionInfo` is captured right after the handshake so callers can
//! inspect what OpenSSL agreed on without touching the session itself.

use super::cert::X509Certificate;
use openssl::ssl::{NameType, SslRef};

/// Snapshot of a negotiated TLS session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername
    pub servername: Option<String>,

    /// Negotiated ALPN protocol
    pub alpn: Option<String>,

    /// Whether the session was resumed
    pub session_reused: bool,

    /// Peer certificate chain (index 0 is the peer's own certificate)
    pub peer_chain: Vec<X509Certificate>,
}

impl SessionInfo {
    /// Capture session details from an SSL connection
    pub fn from_ssl(ssl: &SslRef) -> Self {
        let cipher = ssl
            .current_cipher()
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| "<undef>".to_string());

        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher,
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).to_string()),
            session_reused: ssl.session_reused(),
            peer_chain: peer_chain(ssl),
        }
    }

    /// Peer certificate by chain index (0 = peer cert, 1+ = intermediates)
    pub fn peer_cert(&self, index: usize) -> Option<&X509Certificate> {
        self.peer_chain.get(index)
    }
}

/// Collect the peer chain with the peer's certificate first
///
/// On the client side OpenSSL's chain already starts with the server
/// certificate; on the server side it omits the client's own.
fn peer_chain(ssl: &SslRef) -> Vec<X509Certificate> {
    let mut chain = Vec::new();

    let peer = ssl.peer_certificate();
    if let Some(ref cert) = peer {
        chain.push(X509Certificate::from_x509(cert.clone()));
    }

    if let Some(stack) = ssl.peer_cert_chain() {
        for cert in stack {
            let duplicate = match (&peer, chain.len()) {
                (Some(p), 1) => cert.to_der().ok() == p.to_der().ok(),
                _ => false,
            };
            if !duplicate {
                chain.push(X509Certificate::from_x509_ref(cert));
            }
        }
    }

    chain
}
