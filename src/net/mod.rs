//! Plain TCP transport
//!
//! This module provides the blocking TCP socket that the TLS layer wraps,
//! and the `StreamSocket` operations shared by plain and secure sockets.
//!
//! # Architecture
//!
//! Callers talk to a connection through the `StreamSocket` trait
//! (poll, read, write, flush, close). `TcpSocket` implements it directly
//! against the file descriptor; `tls::SslSocket` implements it by routing
//! every byte through the OpenSSL record layer. Code written against the
//! trait works unchanged over either transport.
//!
//! # Examples
//!
//! ```no_run
//! use sslsocket::net::{StreamSocket, TcpSocket};
//!
//! let mut socket = TcpSocket::connect("127.0.0.1", 8080).unwrap();
//! socket.write_all(b"ping").unwrap();
//! socket.close().unwrap();
//! ```

pub mod tcp;

pub use tcp::{listen, TcpSocket};

use std::io;
use std::time::Duration;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Could not resolve host: {0}")]
    Resolve(String),

    #[error("Timeout")]
    Timeout,

    #[error("Socket is not connected")]
    NotConnected,
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Connection-oriented socket operations
///
/// Implemented by every transport in this crate. The associated error type
/// lets each transport report its own failures while the provided helpers
/// stay generic.
pub trait StreamSocket {
    /// Error reported by this transport
    type Error: From<io::Error>;

    /// Poll the socket for events
    ///
    /// Returns true if the socket is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>)
        -> std::result::Result<bool, Self::Error>;

    /// Read data from the socket
    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, Self::Error>;

    /// Write data to the socket
    fn write(&mut self, buf: &[u8]) -> std::result::Result<usize, Self::Error>;

    /// Flush buffered output
    fn flush(&mut self) -> std::result::Result<(), Self::Error>;

    /// Close the socket
    fn close(&mut self) -> std::result::Result<(), Self::Error>;

    /// Write the whole buffer, looping over short writes
    fn write_all(&mut self, mut buf: &[u8]) -> std::result::Result<(), Self::Error> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Fill the whole buffer, looping over short reads
    fn read_exact(&mut self, mut buf: &mut [u8]) -> std::result::Result<(), Self::Error> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }
}

/// Convert a poll timeout to milliseconds (-1 = infinite)
pub(crate) fn poll_timeout_ms(timeout: Option<Duration>) -> i32 {
    timeout
        .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
        .unwrap_or(-1)
}
