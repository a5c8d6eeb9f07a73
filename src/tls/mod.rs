//! TLS over TCP sockets
//!
//! This module wraps a `net::TcpSocket` in an OpenSSL session. OpenSSL does
//! all of the protocol work (handshake, record encryption, chain
//! validation); the types here only carry configuration into the engine and
//! report what it negotiated.
//!
//! # Architecture
//!
//! 1. `TlsSettings` holds credentials, trust store and verification policy
//! 2. `SslSocket` owns the TCP transport and, after the handshake, the
//!    OpenSSL session; it implements `net::StreamSocket` for encrypted I/O
//! 3. `SslListener` accepts TCP connections and runs the server handshake
//!
//! # Examples
//!
//! ## Client
//!
//! ```no_run
//! use sslsocket::net::StreamSocket;
//! use sslsocket::tls::{SslSocket, TlsSettings};
//!
//! let mut socket = SslSocket::connect("example.com", 443, TlsSettings::new()).unwrap();
//! socket.verify_peer_certificate().unwrap();
//! socket.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
//! socket.close().unwrap();
//! ```
//!
//! ## Server requesting client certificates
//!
//! ```no_run
//! use sslsocket::tls::{SslListener, TlsSettings, TlsSocket};
//!
//! let mut settings = TlsSettings::new();
//! settings.set_certificate_file("server.pem").unwrap();
//! settings.set_private_key_file("server.key").unwrap();
//! settings.set_request_client_certificates(true).unwrap();
//! settings.set_ca_file("clients-ca.pem");
//!
//! let listener = SslListener::bind("127.0.0.1:8443".parse().unwrap(), settings).unwrap();
//! let socket = listener.accept().unwrap();
//! if let Some(cert) = socket.peer_certificate() {
//!     println!("client: {}", cert.subject());
//! }
//! ```

pub mod cert;
pub mod channel_binding;
pub mod config;
pub mod handshake;
pub mod info;
pub mod listener;
pub mod socket;

pub use cert::X509Certificate;
pub use channel_binding::ChannelBindingType;
pub use config::{Role, TlsError, TlsSettings, TlsVersion};
pub use info::SessionInfo;
pub use listener::SslListener;
pub use socket::SslSocket;

use std::path::Path;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// Credential and verification properties of a TLS endpoint
///
/// Implementors expose their `TlsSettings`; the provided methods are the
/// property accessors. `settings_mut` fails once a session exists, so
/// everything here is fixed after the handshake.
pub trait TlsSocket {
    /// Current settings
    fn settings(&self) -> &TlsSettings;

    /// Settings for modification, or `AlreadyConnected` after the handshake
    fn settings_mut(&mut self) -> Result<&mut TlsSettings>;

    /// Set the PEM file holding our certificate (and chain)
    fn set_certificate_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.settings_mut()?.certificate_file = Some(path.as_ref().to_path_buf());
        Ok(())
    }

    /// PEM file holding our certificate
    fn certificate_file(&self) -> Option<&Path> {
        self.settings().certificate_file.as_deref()
    }

    /// Set the PEM file holding our private key
    ///
    /// When unset the key is read from the certificate file.
    fn set_private_key_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.settings_mut()?.private_key_file = Some(path.as_ref().to_path_buf());
        Ok(())
    }

    /// PEM file holding our private key
    fn private_key_file(&self) -> Option<&Path> {
        self.settings().private_key_file.as_deref()
    }

    /// Set the passphrase for an encrypted private key
    ///
    /// The passphrase is used once, when the key is loaded, and wiped after.
    fn set_private_key_passphrase(&mut self, passphrase: &str) -> Result<()> {
        self.settings_mut()?.private_key_passphrase =
            Some(zeroize::Zeroizing::new(passphrase.to_string()));
        Ok(())
    }

    /// Enable or disable peer certificate verification during the handshake
    fn set_certificate_verification(&mut self, enabled: bool) -> Result<()> {
        self.settings_mut()?.certificate_verification = enabled;
        Ok(())
    }

    /// Whether peer certificates are verified during the handshake
    fn certificate_verification(&self) -> bool {
        self.settings().certificate_verification
    }

    /// Ask clients for a certificate during the handshake (server role)
    fn set_request_client_certificates(&mut self, enabled: bool) -> Result<()> {
        self.settings_mut()?.request_client_certificates = enabled;
        Ok(())
    }

    /// Whether clients are asked for a certificate
    fn request_client_certificates(&self) -> bool {
        self.settings().request_client_certificates
    }
}
