//! TLS handshake driver
//!
//! The handshake itself is OpenSSL's (`Ssl::connect` / `Ssl::accept`).
//! This module prepares the per-connection `Ssl` (SNI, expected host),
//! bounds the handshake with socket timeouts and maps engine failures onto
//! `TlsError` so verification problems stay distinguishable.

use super::config::{Role, TlsError};
use openssl::ssl::{HandshakeError, Ssl, SslContext, SslStream};
use openssl::x509::verify::X509CheckFlags;
use openssl::x509::X509VerifyResult;
use std::io;
use std::net::{IpAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, warn};

/// Default handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Handshake result helper
pub type HandshakeResult = std::result::Result<SslStream<TcpStream>, TlsError>;

/// Options for one handshake
#[derive(Debug, Clone, Copy)]
pub(crate) struct HandshakeOptions<'a> {
    pub role: Role,
    /// Hostname or IP address the peer certificate must match (client)
    pub expected_host: Option<&'a str>,
    /// Whether the context verifies the peer
    pub verifying: bool,
    pub timeout: Option<Duration>,
}

/// Run the handshake for `opts.role` over `stream`
///
/// The stream is consumed; on failure it is dropped, which closes the
/// TCP connection.
pub(crate) fn run(
    ctx: &SslContext,
    stream: TcpStream,
    opts: HandshakeOptions<'_>,
) -> HandshakeResult {
    let mut ssl = Ssl::new(ctx)?;

    if let (Role::Client, Some(host)) = (opts.role, opts.expected_host) {
        // The expected host feeds the verify result even when verification
        // is off during the handshake
        let param = ssl.param_mut();
        param.set_hostflags(X509CheckFlags::NO_PARTIAL_WILDCARDS);
        match host.parse::<IpAddr>() {
            Ok(ip) => param.set_ip(ip)?,
            Err(_) => {
                param.set_host(host)?;
                ssl.set_hostname(host)?;
            }
        }
    }

    let timeout = opts.timeout.filter(|d| !d.is_zero());
    let saved = (stream.read_timeout()?, stream.write_timeout()?);
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    debug!(role = ?opts.role, host = opts.expected_host, ?timeout, "starting TLS handshake");

    let result = match opts.role {
        Role::Client => ssl.connect(stream),
        Role::Server => ssl.accept(stream),
    };

    let stream = result.map_err(|e| map_handshake_error(e, opts.verifying))?;

    stream.get_ref().set_read_timeout(saved.0)?;
    stream.get_ref().set_write_timeout(saved.1)?;

    debug!(
        role = ?opts.role,
        version = stream.ssl().version_str(),
        cipher = stream.ssl().current_cipher().map(|c| c.name()),
        resumed = stream.ssl().session_reused(),
        "TLS handshake complete"
    );

    Ok(stream)
}

/// Translate an OpenSSL handshake failure
fn map_handshake_error(err: HandshakeError<TcpStream>, verifying: bool) -> TlsError {
    match err {
        HandshakeError::SetupFailure(stack) => TlsError::OpenSsl(stack),
        HandshakeError::WouldBlock(_) => TlsError::Timeout,
        HandshakeError::Failure(mid) => {
            let verify = mid.ssl().verify_result();
            if verifying && verify != X509VerifyResult::OK {
                warn!(
                    code = verify.as_raw(),
                    reason = verify.error_string(),
                    "peer certificate rejected"
                );
                return TlsError::InvalidCertificate {
                    reason: verify.error_string().to_string(),
                    code: Some(verify.as_raw()),
                };
            }

            let error = mid.error();
            if let Some(io_err) = error.io_error() {
                if matches!(io_err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
                    return TlsError::Timeout;
                }
            }

            warn!(%error, "TLS handshake failed");
            TlsError::HandshakeFailed(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::TlsSettings;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_handshake_timeout_constant() {
        assert_eq!(super::DEFAULT_HANDSHAKE_TIMEOUT_SECS, 10);
    }

    #[test]
    fn test_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept but never answer the ClientHello
        let server = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(2));
        });

        let ctx = TlsSettings::new().build_context(Role::Client).unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let opts = HandshakeOptions {
            role: Role::Client,
            expected_host: Some("localhost"),
            verifying: true,
            timeout: Some(Duration::from_millis(200)),
        };

        let result = run(&ctx, stream, opts);
        assert!(matches!(result, Err(TlsError::Timeout)));

        server.join().unwrap();
    }

    #[test]
    fn test_peer_hangup_is_handshake_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept and close immediately
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let ctx = TlsSettings::new().build_context(Role::Client).unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let opts = HandshakeOptions {
            role: Role::Client,
            expected_host: None,
            verifying: true,
            timeout: Some(Duration::from_secs(2)),
        };

        let result = run(&ctx, stream, opts);
        assert!(matches!(result, Err(TlsError::HandshakeFailed(_))));

        server.join().unwrap();
    }
}
