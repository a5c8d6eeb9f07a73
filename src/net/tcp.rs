//! Blocking TCP socket
//!
//! `TcpSocket` owns a `std::net::TcpStream` created through `socket2`, so
//! connect timeouts, keepalive and address reuse can be configured before
//! the stream is handed to the TLS layer.

use super::{poll_timeout_ms, Error, PollEvents, Result, StreamSocket};
use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::{debug, trace};

/// Default listen backlog
pub const DEFAULT_BACKLOG: i32 = 128;

/// Plain TCP socket
///
/// The stream is released by `close`; every later operation reports
/// `Error::NotConnected`.
#[derive(Debug)]
pub struct TcpSocket {
    stream: Option<TcpStream>,
}

impl TcpSocket {
    /// Connect to `host:port`, trying each resolved address in turn
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_timeout(host, port, None)
    }

    /// Connect to `host:port` with an optional per-address timeout
    pub fn connect_timeout(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|_| Error::Resolve(host.to_string()))?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
            let target = SockAddr::from(addr);
            let res = match timeout {
                Some(t) => socket.connect_timeout(&target, t),
                None => socket.connect(&target),
            };

            match res {
                Ok(()) => {
                    let stream: TcpStream = socket.into();
                    stream.set_nodelay(true)?;
                    debug!(%addr, "connected");
                    return Ok(TcpSocket { stream: Some(stream) });
                }
                Err(e) => {
                    trace!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) if e.kind() == io::ErrorKind::TimedOut => Error::Timeout,
            Some(e) => Error::Io(e),
            None => Error::Resolve(host.to_string()),
        })
    }

    /// Wrap an already connected stream
    pub fn from_std(stream: TcpStream) -> Self {
        TcpSocket { stream: Some(stream) }
    }

    /// Whether the socket still owns a stream
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> Result<&TcpStream> {
        self.stream.as_ref().ok_or(Error::NotConnected)
    }

    /// Get a mutable reference to the underlying stream
    pub fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }

    /// Give up ownership of the underlying stream
    pub fn into_std(mut self) -> Result<TcpStream> {
        self.stream.take().ok_or(Error::NotConnected)
    }

    /// Local address of the connection
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream()?.local_addr()?)
    }

    /// Remote address of the connection
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream()?.peer_addr()?)
    }

    /// Set the read timeout (`None` blocks forever)
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.stream()?.set_read_timeout(timeout)?)
    }

    /// Set the write timeout (`None` blocks forever)
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.stream()?.set_write_timeout(timeout)?)
    }

    /// Enable or disable Nagle's algorithm
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        Ok(self.stream()?.set_nodelay(nodelay)?)
    }

    /// Enable or disable TCP keepalive probes
    pub fn set_keepalive(&self, keepalive: bool) -> Result<()> {
        Ok(SockRef::from(self.stream()?).set_keepalive(keepalive)?)
    }
}

/// Poll a raw stream for readiness
pub(crate) fn poll_stream(
    stream: &TcpStream,
    events: PollEvents,
    timeout: Option<Duration>,
) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd: stream.as_raw_fd(),
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        },
        revents: 0,
    };

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, poll_timeout_ms(timeout)) };

    if result < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(result > 0)
}

impl StreamSocket for TcpSocket {
    type Error = Error;

    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        Ok(poll_stream(self.stream()?, events, timeout)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream_mut()?.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream_mut()?.write(buf).map_err(Error::from)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream_mut()?.flush().map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.take() {
            Some(stream) => match stream.shutdown(Shutdown::Both) {
                // The peer may already have torn the connection down
                Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(Error::Io(e)),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }
}

/// Bind a listening socket with `SO_REUSEADDR` set
pub fn listen(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    let listener: TcpListener = socket.into();
    debug!(addr = %listener.local_addr()?, "listening");
    Ok(listener)
}
