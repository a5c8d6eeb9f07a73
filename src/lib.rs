//! sslsocket - OpenSSL-backed TLS sockets
//!
//! This crate layers TLS over a plain blocking TCP socket. The `net` module
//! provides the transport and the `StreamSocket` operations shared by plain
//! and secure sockets; the `tls` module wraps a transport in an OpenSSL
//! session and exposes credentials, peer certificates, verification and
//! channel-binding data.

pub mod net;
pub mod tls;
