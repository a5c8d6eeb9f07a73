//! TLS listener
//!
//! Accepts TCP connections and runs the server handshake on each. The
//! OpenSSL context is built once at bind time, so credentials are loaded
//! (and the key passphrase consumed) before the first client arrives.

use super::config::{Role, TlsSettings};
use super::socket::SslSocket;
use super::Result;
use crate::net::{self, tcp::DEFAULT_BACKLOG, TcpSocket};
use openssl::ssl::SslContext;
use std::net::{SocketAddr, TcpListener};
use tracing::debug;

/// Listening socket handing out server-role `SslSocket`s
pub struct SslListener {
    listener: TcpListener,
    ctx: SslContext,
    settings: TlsSettings,
}

impl SslListener {
    /// Bind to `addr` with server settings
    pub fn bind(addr: SocketAddr, mut settings: TlsSettings) -> Result<Self> {
        let ctx = settings.build_context(Role::Server)?;
        let listener = net::listen(addr, DEFAULT_BACKLOG)?;

        Ok(SslListener { listener, ctx, settings })
    }

    /// Accept one connection and complete its handshake
    pub fn accept(&self) -> Result<SslSocket> {
        let (stream, peer) = self.listener.accept()?;
        debug!(%peer, "accepted TCP connection");

        SslSocket::accept_with_context(
            TcpSocket::from_std(stream),
            &self.ctx,
            self.settings.clone(),
        )
    }

    /// Local address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Settings every accepted socket inherits
    pub fn settings(&self) -> &TlsSettings {
        &self.settings
    }
}

impl std::fmt::Debug for SslListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SslListener")
            .field("listener", &self.listener)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
