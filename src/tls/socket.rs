//! TLS socket
//!
//! `SslSocket` takes over a plain `TcpSocket` and, once the handshake has
//! run, routes all I/O through an OpenSSL session. It implements the same
//! `StreamSocket` operations as the plain socket, so callers switch
//! transports without changing their I/O code.

use super::channel_binding::{self, ChannelBindingType};
use super::cert::X509Certificate;
use super::config::{Role, TlsError, TlsSettings};
use super::handshake::{self, HandshakeOptions};
use super::info::SessionInfo;
use super::{Result, TlsSocket};
use crate::net::{self, tcp::poll_stream, PollEvents, StreamSocket, TcpSocket};
use bytes::Bytes;
use openssl::ssl::{SslContext, SslRef, SslStream};
use openssl::x509::X509VerifyResult;
use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Transport state
#[derive(Debug)]
enum Transport {
    /// Not yet secured
    Plain(TcpSocket),
    /// TLS session established; the stream owns the session handle
    Secure(SslStream<TcpStream>),
    /// Closed, or lost to a failed handshake
    Closed,
}

/// TLS socket over TCP
///
/// Settings are fixed once a handshake has been attempted. The OpenSSL
/// session belongs to this socket alone and is released by `close` (or on
/// drop).
#[derive(Debug)]
pub struct SslSocket {
    transport: Transport,
    settings: TlsSettings,
    role: Option<Role>,
    info: Option<SessionInfo>,
    failed: bool,
}

impl SslSocket {
    /// Take over a plain socket with default settings
    pub fn new(socket: TcpSocket) -> Self {
        Self::with_settings(socket, TlsSettings::default())
    }

    /// Take over a plain socket with the given settings
    pub fn with_settings(socket: TcpSocket, settings: TlsSettings) -> Self {
        SslSocket {
            transport: Transport::Plain(socket),
            settings,
            role: None,
            info: None,
            failed: false,
        }
    }

    /// Connect to `host:port` and run the client handshake
    ///
    /// `host` is sent as SNI and must match the server certificate when
    /// verification is enabled.
    pub fn connect(host: &str, port: u16, settings: TlsSettings) -> Result<Self> {
        let tcp = TcpSocket::connect_timeout(host, port, settings.handshake_timeout())?;
        let mut socket = Self::with_settings(tcp, settings);
        socket.start_tls(Some(host))?;
        Ok(socket)
    }

    /// Run the client handshake over the owned transport
    pub fn start_tls(&mut self, expected_host: Option<&str>) -> Result<()> {
        self.ensure_plain()?;
        let ctx = self.settings.build_context(Role::Client)?;
        self.handshake(&ctx, Role::Client, expected_host)
    }

    /// Run the server handshake over the owned transport
    pub fn accept_tls(&mut self) -> Result<()> {
        self.ensure_plain()?;
        let ctx = self.settings.build_context(Role::Server)?;
        self.handshake(&ctx, Role::Server, None)
    }

    /// Server handshake with a context shared by a listener
    pub(crate) fn accept_with_context(
        socket: TcpSocket,
        ctx: &SslContext,
        settings: TlsSettings,
    ) -> Result<Self> {
        let mut socket = Self::with_settings(socket, settings);
        socket.handshake(ctx, Role::Server, None)?;
        Ok(socket)
    }

    fn ensure_plain(&self) -> Result<()> {
        match self.transport {
            Transport::Plain(_) => Ok(()),
            Transport::Secure(_) => Err(TlsError::AlreadyConnected),
            Transport::Closed => Err(TlsError::Net(net::Error::NotConnected)),
        }
    }

    fn handshake(
        &mut self,
        ctx: &SslContext,
        role: Role,
        expected_host: Option<&str>,
    ) -> Result<()> {
        let tcp = match mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Plain(tcp) => tcp,
            other => {
                self.transport = other;
                return self.ensure_plain();
            }
        };

        let verifying = match role {
            Role::Client => self.settings.certificate_verification,
            Role::Server => {
                self.settings.request_client_certificates && self.settings.certificate_verification
            }
        };

        self.role = Some(role);
        let opts = HandshakeOptions {
            role,
            expected_host,
            verifying,
            timeout: self.settings.handshake_timeout(),
        };

        match handshake::run(ctx, tcp.into_std()?, opts) {
            Ok(stream) => {
                self.info = Some(SessionInfo::from_ssl(stream.ssl()));
                self.transport = Transport::Secure(stream);
                Ok(())
            }
            Err(e) => {
                // The TCP connection went down with the failed handshake
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Whether a TLS session is established
    pub fn is_secure(&self) -> bool {
        matches!(self.transport, Transport::Secure(_))
    }

    /// Role played in the handshake, once one was attempted
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Check if the handshake or TLS I/O failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Details of the negotiated session
    pub fn session_info(&self) -> Option<&SessionInfo> {
        self.info.as_ref()
    }

    /// Get reference to the underlying TCP stream
    pub fn get_ref(&self) -> Option<&TcpStream> {
        match self.transport {
            Transport::Plain(ref tcp) => tcp.stream().ok(),
            Transport::Secure(ref stream) => Some(stream.get_ref()),
            Transport::Closed => None,
        }
    }

    /// Local address of the connection
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let stream = self.get_ref().ok_or(TlsError::Net(net::Error::NotConnected))?;
        Ok(stream.local_addr()?)
    }

    /// Remote address of the connection
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        let stream = self.get_ref().ok_or(TlsError::Net(net::Error::NotConnected))?;
        Ok(stream.peer_addr()?)
    }

    /// Set the read timeout for application data
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let stream = self.get_ref().ok_or(TlsError::Net(net::Error::NotConnected))?;
        Ok(stream.set_read_timeout(timeout)?)
    }

    /// Set the write timeout of the underlying TCP stream
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let stream = self.get_ref().ok_or(TlsError::Net(net::Error::NotConnected))?;
        Ok(stream.set_write_timeout(timeout)?)
    }

    fn ssl(&self) -> Result<&SslRef> {
        match self.transport {
            Transport::Secure(ref stream) => Ok(stream.ssl()),
            _ => Err(TlsError::NotConnected),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut SslStream<TcpStream>> {
        match self.transport {
            Transport::Secure(ref mut stream) => Ok(stream),
            _ => Err(TlsError::NotConnected),
        }
    }

    /// Channel binding data for a named binding type
    ///
    /// `kind` is one of `tls-unique`, `tls-server-end-point` or
    /// `tls-exporter`.
    pub fn channel_binding_data(&self, kind: &str) -> Result<Bytes> {
        self.channel_binding(kind.parse()?)
    }

    /// Channel binding data for a binding type
    pub fn channel_binding(&self, kind: ChannelBindingType) -> Result<Bytes> {
        let ssl = self.ssl()?;
        let role = self.role.ok_or(TlsError::NotConnected)?;
        let data = channel_binding::extract(ssl, role, kind)?;
        trace!(%kind, len = data.len(), "extracted channel binding");
        Ok(data)
    }

    /// Certificate the peer presented during the handshake
    ///
    /// `None` before the handshake, after close, or when the peer sent no
    /// certificate.
    pub fn peer_certificate(&self) -> Option<X509Certificate> {
        self.ssl()
            .ok()
            .and_then(|ssl| ssl.peer_certificate())
            .map(X509Certificate::from_x509)
    }

    /// Check the peer certificate against the configured trust policy
    ///
    /// Reports the verify result OpenSSL recorded during the handshake:
    /// chain, validity period and (for clients) the expected hostname.
    pub fn verify_peer_certificate(&self) -> Result<()> {
        let ssl = self.ssl()?;

        if ssl.peer_certificate().is_none() {
            return Err(TlsError::InvalidCertificate {
                reason: "No certificate".to_string(),
                code: None,
            });
        }

        let result = ssl.verify_result();
        if result != X509VerifyResult::OK {
            warn!(
                code = result.as_raw(),
                reason = result.error_string(),
                "peer certificate failed verification"
            );
            return Err(TlsError::InvalidCertificate {
                reason: result.error_string().to_string(),
                code: Some(result.as_raw()),
            });
        }

        Ok(())
    }

    /// Close the TLS session and then the TCP transport
    ///
    /// Sends close_notify unless the session already failed. Closing a
    /// closed socket does nothing.
    pub fn close(&mut self) -> Result<()> {
        self.info = None;

        match mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Secure(mut stream) => {
                if !self.failed {
                    if let Err(e) = stream.shutdown() {
                        debug!(error = %e, "close_notify not delivered");
                    }
                }

                let result = stream.get_ref().shutdown(Shutdown::Both);
                // Frees the session, then the descriptor
                drop(stream);
                trace!("TLS socket closed");
                ignore_not_connected(result)
            }
            Transport::Plain(mut tcp) => Ok(tcp.close()?),
            Transport::Closed => {
                trace!("close on closed TLS socket");
                Ok(())
            }
        }
    }

    /// Close only the TCP transport, skipping the TLS shutdown
    pub fn close_transport(&mut self) -> Result<()> {
        self.info = None;

        match mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Secure(stream) => {
                ignore_not_connected(stream.get_ref().shutdown(Shutdown::Both))
            }
            Transport::Plain(mut tcp) => Ok(tcp.close()?),
            Transport::Closed => Ok(()),
        }
    }

    fn io_failed(&mut self, e: io::Error) -> TlsError {
        self.failed = true;
        TlsError::Io(e)
    }
}

fn ignore_not_connected(result: io::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(TlsError::Io(e)),
        _ => Ok(()),
    }
}

impl TlsSocket for SslSocket {
    fn settings(&self) -> &TlsSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> Result<&mut TlsSettings> {
        if self.role.is_some() {
            return Err(TlsError::AlreadyConnected);
        }
        Ok(&mut self.settings)
    }
}

impl StreamSocket for SslSocket {
    type Error = TlsError;

    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        let ssl = self.ssl()?;

        // Decrypted bytes may already be buffered inside OpenSSL
        if events != PollEvents::Write && ssl.pending() > 0 {
            return Ok(true);
        }

        let stream = self.get_ref().ok_or(TlsError::NotConnected)?;
        Ok(poll_stream(stream, events, timeout)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream_mut()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.io_failed(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self.stream_mut()?.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.io_failed(e)),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self.stream_mut()?.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.io_failed(e)),
        }
    }

    fn close(&mut self) -> Result<()> {
        SslSocket::close(self)
    }
}

impl Drop for SslSocket {
    fn drop(&mut self) {
        if let Err(e) = SslSocket::close(self) {
            debug!(error = %e, "error closing TLS socket on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::listen;
    use std::thread;

    fn plain_pair() -> (TcpSocket, thread::JoinHandle<()>) {
        let listener = listen("127.0.0.1:0".parse().unwrap(), 1).unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let _ = listener.accept().unwrap();
        });

        (TcpSocket::connect("127.0.0.1", addr.port()).unwrap(), handle)
    }

    #[test]
    fn test_never_handshaken_socket() {
        let (tcp, handle) = plain_pair();
        let mut socket = SslSocket::new(tcp);

        assert!(!socket.is_secure());
        assert!(socket.role().is_none());
        assert!(socket.peer_certificate().is_none());
        assert!(socket.session_info().is_none());
        assert!(matches!(socket.verify_peer_certificate(), Err(TlsError::NotConnected)));
        assert!(matches!(socket.channel_binding_data("tls-unique"), Err(TlsError::NotConnected)));
        assert!(matches!(
            socket.channel_binding_data("tls-whatever"),
            Err(TlsError::UnsupportedChannelBinding(_))
        ));

        // No plaintext I/O through a TLS socket
        let mut buf = [0u8; 4];
        assert!(matches!(socket.read(&mut buf), Err(TlsError::NotConnected)));
        assert!(matches!(socket.write(b"data"), Err(TlsError::NotConnected)));

        handle.join().unwrap();
    }

    #[test]
    fn test_settings_mutable_before_handshake() {
        let (tcp, handle) = plain_pair();
        let mut socket = SslSocket::new(tcp);

        socket.set_certificate_file("client.pem").unwrap();
        socket.set_private_key_file("client.key").unwrap();
        socket.set_private_key_passphrase("secret").unwrap();
        socket.set_certificate_verification(false).unwrap();
        socket.set_request_client_certificates(true).unwrap();

        assert_eq!(socket.certificate_file(), Some(std::path::Path::new("client.pem")));
        assert_eq!(socket.private_key_file(), Some(std::path::Path::new("client.key")));
        assert!(!socket.certificate_verification());
        assert!(socket.request_client_certificates());

        handle.join().unwrap();
    }

    #[test]
    fn test_timeouts_apply_to_transport() {
        let (tcp, handle) = plain_pair();
        let socket = SslSocket::new(tcp);

        socket.set_read_timeout(Some(Duration::from_millis(250))).unwrap();
        socket.set_write_timeout(Some(Duration::from_millis(500))).unwrap();

        let stream = socket.get_ref().unwrap();
        assert_eq!(stream.read_timeout().unwrap(), Some(Duration::from_millis(250)));
        assert_eq!(stream.write_timeout().unwrap(), Some(Duration::from_millis(500)));

        handle.join().unwrap();
    }

    #[test]
    fn test_double_close_on_plain_socket() {
        let (tcp, handle) = plain_pair();
        let mut socket = SslSocket::new(tcp);

        socket.close().unwrap();
        socket.close().unwrap();
        socket.close_transport().unwrap();

        assert!(socket.get_ref().is_none());
        assert!(matches!(
            socket.start_tls(None),
            Err(TlsError::Net(net::Error::NotConnected))
        ));
        assert!(matches!(
            socket.set_write_timeout(Some(Duration::from_secs(1))),
            Err(TlsError::Net(net::Error::NotConnected))
        ));

        handle.join().unwrap();
    }
}
