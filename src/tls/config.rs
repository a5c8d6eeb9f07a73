//! TLS configuration
//!
//! `TlsSettings` collects everything a socket needs before its handshake:
//! credentials, trust store, verification policy and protocol limits.
//! It is turned into an OpenSSL `SslContext` for one role at handshake time.

use super::handshake::DEFAULT_HANDSHAKE_TIMEOUT_SECS;
use super::TlsSocket;
use openssl::error::ErrorStack;
use openssl::pkey::PKey;
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, trace};
use zeroize::Zeroizing;

/// Session id context for server-side session caching
const SESSION_ID_CONTEXT: &[u8] = b"sslsocket";

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
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(self) -> openssl::ssl::SslVersion {
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

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

/// Side of the handshake a socket plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake (connect)
    Client,
    /// Answers the handshake (accept)
    Server,
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("TLS record layer error: {0}")]
    Ssl(#[from] openssl::ssl::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Net(#[from] crate::net::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Private key error: {0}")]
    PrivateKey(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Invalid peer certificate: {reason}")]
    InvalidCertificate {
        /// Human readable verification failure
        reason: String,
        /// OpenSSL `X509_V_ERR_*` code, if the engine reported one
        code: Option<i32>,
    },

    #[error("No TLS session established")]
    NotConnected,

    #[error("TLS session already established")]
    AlreadyConnected,

    #[error("Unsupported channel binding type: {0}")]
    UnsupportedChannelBinding(String),

    #[error("Channel binding {kind} unavailable: {reason}")]
    ChannelBindingUnavailable { kind: &'static str, reason: String },

    #[error("TLS handshake timed out")]
    Timeout,
}

/// TLS settings for one socket or listener
///
/// Setters live on the `TlsSocket` trait (credentials and verification
/// policy) and on this type (trust store and protocol limits).
#[derive(Clone)]
pub struct TlsSettings {
    pub(crate) certificate_file: Option<PathBuf>,
    pub(crate) private_key_file: Option<PathBuf>,
    pub(crate) private_key_passphrase: Option<Zeroizing<String>>,
    pub(crate) certificate_verification: bool,
    pub(crate) request_client_certificates: bool,
    pub(crate) ca_file: Option<PathBuf>,
    pub(crate) min_version: Option<TlsVersion>,
    pub(crate) max_version: Option<TlsVersion>,
    pub(crate) cipher_list: Option<String>,
    pub(crate) ciphersuites: Option<String>,
    pub(crate) alpn: Vec<String>,
    pub(crate) handshake_timeout: Option<Duration>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        TlsSettings {
            certificate_file: None,
            private_key_file: None,
            private_key_passphrase: None,
            certificate_verification: true,
            request_client_certificates: false,
            ca_file: None,
            min_version: None,
            max_version: None,
            cipher_list: None,
            ciphersuites: None,
            alpn: Vec::new(),
            handshake_timeout: Some(Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS)),
        }
    }
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("certificate_file", &self.certificate_file)
            .field("private_key_file", &self.private_key_file)
            .field(
                "private_key_passphrase",
                &self.private_key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("certificate_verification", &self.certificate_verification)
            .field("request_client_certificates", &self.request_client_certificates)
            .field("ca_file", &self.ca_file)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("alpn", &self.alpn)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

impl TlsSettings {
    /// Create settings with verification enabled and the system trust store
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust only the CA certificates in this PEM file
    pub fn set_ca_file<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.ca_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// CA file used for the trust store, if any
    pub fn ca_file(&self) -> Option<&Path> {
        self.ca_file.as_deref()
    }

    /// Pin the TLS version (both min and max)
    pub fn set_version(&mut self, version: TlsVersion) -> &mut Self {
        self.set_version_range(version, version)
    }

    /// Set TLS version range
    pub fn set_version_range(&mut self, min: TlsVersion, max: TlsVersion) -> &mut Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn set_cipher_list(&mut self, ciphers: impl Into<String>) -> &mut Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn set_ciphersuites(&mut self, ciphers: impl Into<String>) -> &mut Self {
        self.ciphersuites = Some(ciphers.into());
        self
    }

    /// Set ALPN protocols, most preferred first
    pub fn set_alpn(&mut self, protocols: &[&str]) -> &mut Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Set the connect and handshake timeout
    ///
    /// `None` or a zero duration waits forever.
    pub fn set_handshake_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.handshake_timeout = timeout.filter(|d| !d.is_zero());
        self
    }

    /// Handshake timeout
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    /// Whether a private key passphrase is still pending use
    pub fn has_private_key_passphrase(&self) -> bool {
        self.private_key_passphrase.is_some()
    }

    /// Build an OpenSSL context for `role`
    ///
    /// The private key passphrase is consumed here: it is wiped from memory
    /// once the key has been decrypted, whether or not that succeeded.
    pub(crate) fn build_context(&mut self, role: Role) -> Result<SslContext, TlsError> {
        let method = match role {
            Role::Client => SslMethod::tls_client(),
            Role::Server => SslMethod::tls_server(),
        };
        let mut builder = SslContextBuilder::new(method)?;

        if let (Some(min), Some(max)) = (self.min_version, self.max_version) {
            if min > max {
                return Err(TlsError::InvalidConfig(format!(
                    "minimum version {} is above maximum {}",
                    min.as_str(),
                    max.as_str()
                )));
            }
        }
        builder.set_min_proto_version(self.min_version.map(TlsVersion::to_openssl_version))?;
        builder.set_max_proto_version(self.max_version.map(TlsVersion::to_openssl_version))?;

        if let Some(ref ciphers) = self.cipher_list {
            builder.set_cipher_list(ciphers)?;
        }
        if let Some(ref ciphers) = self.ciphersuites {
            builder.set_ciphersuites(ciphers)?;
        }

        match self.ca_file {
            Some(ref path) => builder.set_ca_file(path).map_err(|e| {
                TlsError::Certificate(format!("Failed to load CA file {}: {}", path.display(), e))
            })?,
            None => builder.set_default_verify_paths()?,
        }

        let has_cert = self.load_credentials(&mut builder)?;
        if role == Role::Server && !has_cert {
            return Err(TlsError::InvalidConfig(
                "server role requires a certificate file".to_string(),
            ));
        }

        self.configure_alpn(&mut builder, role)?;
        self.configure_verify(&mut builder, role);

        if role == Role::Server {
            builder.set_session_id_context(SESSION_ID_CONTEXT)?;
        }

        debug!(?role, verify = self.certificate_verification, "built TLS context");
        Ok(builder.build())
    }

    /// Load certificate chain and private key; returns whether a certificate was set
    fn load_credentials(&mut self, builder: &mut SslContextBuilder) -> Result<bool, TlsError> {
        // Taken up front so it is wiped on every path out of here
        let passphrase = self.private_key_passphrase.take();

        let cert_path = match self.certificate_file {
            Some(ref path) => path.clone(),
            None if self.private_key_file.is_some() => {
                return Err(TlsError::InvalidConfig(
                    "private key file set without a certificate file".to_string(),
                ));
            }
            None => return Ok(false),
        };

        let cert_pem = Zeroizing::new(fs::read(&cert_path).map_err(|e| {
            TlsError::Certificate(format!("Failed to read {}: {}", cert_path.display(), e))
        })?);

        let mut chain = X509::stack_from_pem(&cert_pem)
            .map_err(|e| {
                TlsError::Certificate(format!(
                    "Failed to load certificate {}: {}",
                    cert_path.display(),
                    e
                ))
            })?
            .into_iter();
        let leaf = chain.next().ok_or_else(|| {
            TlsError::Certificate(format!("No certificate in {}", cert_path.display()))
        })?;
        builder.set_certificate(&leaf)?;
        for extra in chain {
            builder.add_extra_chain_cert(extra)?;
        }

        // Without a separate key file the key sits next to the certificate
        let key_pem = match self.private_key_file {
            Some(ref path) => Zeroizing::new(fs::read(path).map_err(|e| {
                TlsError::PrivateKey(format!("Failed to read {}: {}", path.display(), e))
            })?),
            None => cert_pem,
        };

        if passphrase.is_some() {
            trace!("decrypting private key with configured passphrase");
        }

        // An explicit callback keeps OpenSSL from prompting on the terminal
        let key = PKey::private_key_from_pem_callback(&key_pem, |buf| {
            let pass = passphrase.as_ref().map(|p| p.as_bytes()).unwrap_or_default();
            if pass.len() > buf.len() {
                return Ok(0);
            }
            buf[..pass.len()].copy_from_slice(pass);
            Ok(pass.len())
        })
        .map_err(|e| TlsError::PrivateKey(format!("Failed to load private key: {}", e)))?;

        // OpenSSL 3 already compares key and certificate inside set_private_key
        let mismatch = |e: ErrorStack| {
            TlsError::PrivateKey(format!("Private key does not match certificate: {}", e))
        };
        builder.set_private_key(&key).map_err(mismatch)?;
        builder.check_private_key().map_err(mismatch)?;

        Ok(true)
    }

    fn configure_alpn(&self, builder: &mut SslContextBuilder, role: Role) -> Result<(), TlsError> {
        if self.alpn.is_empty() {
            return Ok(());
        }

        match role {
            Role::Client => {
                builder.set_alpn_protos(&encode_alpn(&self.alpn)?)?;
            }
            Role::Server => {
                let protocols: Vec<Vec<u8>> =
                    self.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

                builder.set_alpn_select_callback(move |_ssl, client_protos| {
                    select_alpn(&protocols, client_protos).ok_or(openssl::ssl::AlpnError::NOACK)
                });
            }
        }

        Ok(())
    }

    fn configure_verify(&self, builder: &mut SslContextBuilder, role: Role) {
        match role {
            Role::Client if self.certificate_verification => {
                builder.set_verify(SslVerifyMode::PEER);
            }
            // The verify result is still recorded for an explicit check later
            Role::Client => builder.set_verify(SslVerifyMode::NONE),
            Role::Server if !self.request_client_certificates => {
                builder.set_verify(SslVerifyMode::NONE);
            }
            Role::Server if self.certificate_verification => {
                builder.set_verify(SslVerifyMode::PEER | SslVerifyMode::CLIENT_ONCE);
            }
            Role::Server => {
                builder.set_verify_callback(
                    SslVerifyMode::PEER | SslVerifyMode::CLIENT_ONCE,
                    |_preverify_ok, _ctx| true,
                );
            }
        }
    }
}

impl TlsSocket for TlsSettings {
    fn settings(&self) -> &TlsSettings {
        self
    }

    fn settings_mut(&mut self) -> Result<&mut TlsSettings, TlsError> {
        Ok(self)
    }
}

/// Encode ALPN protocols (length-prefixed)
fn encode_alpn(protocols: &[String]) -> Result<Vec<u8>, TlsError> {
    let mut alpn_bytes = Vec::new();
    for proto in protocols {
        let len = u8::try_from(proto.len())
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| TlsError::InvalidConfig(format!("invalid ALPN protocol {:?}", proto)))?;
        alpn_bytes.push(len);
        alpn_bytes.extend_from_slice(proto.as_bytes());
    }
    Ok(alpn_bytes)
}

/// Pick the first client protocol we support
///
/// The returned slice borrows from `client_protos`, as OpenSSL requires.
fn select_alpn<'a>(ours: &[Vec<u8>], client_protos: &'a [u8]) -> Option<&'a [u8]> {
    let mut pos = 0;
    while pos < client_protos.len() {
        let len = client_protos[pos] as usize;
        pos += 1;
        let client_proto = client_protos.get(pos..pos + len)?;
        if ours.iter().any(|p| p.as_slice() == client_proto) {
            return Some(client_proto);
        }
        pos += len;
    }
    None
}
