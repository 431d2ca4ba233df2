//! Transport socket: owned, thread-safe wrapper around one OS socket handle.
//!
//! A [`TransportSocket`] is either valid (it owns exactly one handle) or
//! invalid (every operation fails with [`SocketError::SocketClosed`]). Once
//! [`TransportSocket::shutdown`] has been called the socket never becomes
//! valid again.
//!
//! ## Cancellation
//!
//! Blocking calls (`accept`, `receive`, `send`) run under a read guard on the
//! handle. `shutdown` first issues `shutdown(2)` under a read guard, which
//! wakes every thread blocked on the handle, and only then takes the write
//! guard to close it. The handle is therefore never closed underneath a thread
//! that is still inside a system call on it.

use std::{
    fmt,
    io::{self, Read},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::SocketError;

/// Size of the buffer used by a single [`TransportSocket::receive`] call.
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

/// Domain / kind / protocol triple a socket is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    pub domain: Domain,
    pub kind: Type,
    pub protocol: Option<Protocol>,
}

impl SocketConfig {
    pub fn new(domain: Domain, kind: Type, protocol: Option<Protocol>) -> Self {
        Self {
            domain,
            kind,
            protocol,
        }
    }

    /// IPv4 TCP stream socket.
    pub fn tcp_v4() -> Self {
        Self::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
    }

    /// IPv6 TCP stream socket.
    pub fn tcp_v6() -> Self {
        Self::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))
    }

    /// TCP stream socket whose family matches `ip`.
    pub fn tcp_for(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::tcp_v4(),
            IpAddr::V6(_) => Self::tcp_v6(),
        }
    }

    /// Only IPv4 / IPv6 domains and stream / datagram kinds are supported.
    pub fn validate(&self) -> Result<(), SocketError> {
        if self.domain != Domain::IPV4 && self.domain != Domain::IPV6 {
            return Err(SocketError::ConfigInvalid(format!(
                "unsupported address family {:?}",
                self.domain
            )));
        }
        if self.kind != Type::STREAM && self.kind != Type::DGRAM {
            return Err(SocketError::ConfigInvalid(format!(
                "unsupported socket kind {:?}",
                self.kind
            )));
        }
        Ok(())
    }

    pub fn is_stream(&self) -> bool {
        self.kind == Type::STREAM
    }

    fn family_name(&self) -> &'static str {
        if self.domain == Domain::IPV6 {
            "IPv6"
        } else {
            "IPv4"
        }
    }

    /// Parse `address` as an IP literal of this config's family.
    pub fn parse_address(&self, address: &str, port: u16) -> Result<SocketAddr, SocketError> {
        let invalid = || SocketError::InvalidAddress {
            family: self.family_name(),
            address: address.to_string(),
        };

        let ip = if self.domain == Domain::IPV6 {
            IpAddr::V6(address.parse::<Ipv6Addr>().map_err(|_| invalid())?)
        } else {
            IpAddr::V4(address.parse::<Ipv4Addr>().map_err(|_| invalid())?)
        };

        Ok(SocketAddr::new(ip, port))
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::tcp_v4()
    }
}

/// A connected or listening byte-stream endpoint owning one OS handle.
///
/// Not `Clone`: ownership of the handle moves with the value. Share it across
/// threads through an `Arc`.
pub struct TransportSocket {
    inner: RwLock<Option<Socket>>,
    closed: AtomicBool,
    config: SocketConfig,
}

impl TransportSocket {
    /// Create a new socket. Address reuse is enabled so a restarted server can
    /// rebind promptly.
    ///
    /// # Errors
    ///
    /// * [`SocketError::ConfigInvalid`] if the domain or kind is unsupported;
    ///   no handle is allocated in that case.
    /// * [`SocketError::SocketCreateFailed`] if the OS call fails.
    pub fn create(config: SocketConfig) -> Result<Self, SocketError> {
        config.validate()?;

        let socket = Socket::new(config.domain, config.kind, config.protocol)
            .map_err(SocketError::SocketCreateFailed)?;
        socket
            .set_reuse_address(true)
            .map_err(SocketError::SocketCreateFailed)?;

        Ok(Self::from_socket(socket, config))
    }

    /// Create a stream socket and connect it to `address:port`.
    ///
    /// The address family is taken from the literal.
    pub fn connect_to(address: &str, port: u16) -> Result<Self, SocketError> {
        let ip: IpAddr = address.parse().map_err(|_| SocketError::InvalidAddress {
            family: "IP",
            address: address.to_string(),
        })?;
        let socket = Self::create(SocketConfig::tcp_for(&ip))?;
        socket.connect(address, port)?;
        Ok(socket)
    }

    fn from_socket(socket: Socket, config: SocketConfig) -> Self {
        disable_sigpipe(&socket);

        Self {
            inner: RwLock::new(Some(socket)),
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> SocketConfig {
        self.config
    }

    /// `false` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.with_socket(|s| Ok(s.local_addr().ok().and_then(|a| a.as_socket())))
            .ok()
            .flatten()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.with_socket(|s| Ok(s.peer_addr().ok().and_then(|a| a.as_socket())))
            .ok()
            .flatten()
    }

    /// Bind to `address:port`.
    ///
    /// # Errors
    ///
    /// * [`SocketError::InvalidAddress`] if `address` is not a literal of the
    ///   configured family.
    /// * [`SocketError::BindFailed`] if the OS call fails.
    pub fn bind(&self, address: &str, port: u16) -> Result<(), SocketError> {
        self.with_socket(|s| {
            let addr = self.config.parse_address(address, port)?;
            s.bind(&SockAddr::from(addr)).map_err(SocketError::BindFailed)
        })
    }

    pub fn listen(&self, backlog: i32) -> Result<(), SocketError> {
        self.with_socket(|s| {
            if !self.config.is_stream() {
                return Err(SocketError::WrongSocketKind("listen"));
            }
            s.listen(backlog).map_err(SocketError::ListenFailed)
        })
    }

    /// Block until a peer connects.
    ///
    /// Returns [`SocketError::SocketClosed`] when another thread shut this
    /// socket down while the call was blocked.
    pub fn accept(&self) -> Result<TransportSocket, SocketError> {
        let (socket, _peer) = self.with_socket(|s| {
            if !self.config.is_stream() {
                return Err(SocketError::WrongSocketKind("accept"));
            }
            retry_interrupted(|| s.accept())
                .map_err(|e| self.closed_or(e, SocketError::AcceptFailed))
        })?;

        Ok(Self::from_socket(socket, self.config))
    }

    pub fn connect(&self, address: &str, port: u16) -> Result<(), SocketError> {
        self.with_socket(|s| {
            let addr = self.config.parse_address(address, port)?;
            retry_interrupted(|| s.connect(&SockAddr::from(addr)))
                .map_err(SocketError::ConnectFailed)
        })
    }

    /// Send `bytes`, returning how many were written.
    ///
    /// A peer that already closed its end yields [`SocketError::SendFailed`];
    /// the process never receives `SIGPIPE`.
    pub fn send(&self, bytes: &[u8]) -> Result<usize, SocketError> {
        self.with_socket(|s| {
            retry_interrupted(|| send_no_signal(s, bytes))
                .map_err(|e| self.closed_or(e, SocketError::SendFailed))
        })
    }

    /// Send every byte of `bytes`, looping over partial writes.
    pub fn send_all(&self, mut bytes: &[u8]) -> Result<(), SocketError> {
        while !bytes.is_empty() {
            match self.send(bytes)? {
                0 => {
                    return Err(SocketError::SendFailed(io::Error::from(
                        io::ErrorKind::WriteZero,
                    )));
                }
                n => bytes = &bytes[n..],
            }
        }
        Ok(())
    }

    /// Receive up to [`RECEIVE_BUFFER_SIZE`] bytes.
    ///
    /// An empty result means the peer closed its end (or this socket was shut
    /// down while the call was blocked).
    pub fn receive(&self) -> Result<Vec<u8>, SocketError> {
        self.with_socket(|s| {
            let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
            let mut reader: &Socket = s;
            let n = retry_interrupted(|| reader.read(&mut buf))
                .map_err(|e| self.closed_or(e, SocketError::ReceiveFailed))?;
            Ok(buf[..n].to_vec())
        })
    }

    /// Disable I/O in both directions and close the handle.
    ///
    /// Idempotent and callable from any thread. This is the only way to
    /// interrupt a thread blocked in [`accept`](Self::accept) or
    /// [`receive`](Self::receive).
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let guard = self.inner.read();
            if let Some(socket) = guard.as_ref()
                && let Err(e) = socket.shutdown(Shutdown::Both)
            {
                // Listening or already-reset sockets report ENOTCONN.
                tracing::trace!("shutdown(2) returned: {}", e);
            }
        }

        let socket = self.inner.write().take();
        drop(socket);
    }

    fn with_socket<T>(
        &self,
        f: impl FnOnce(&Socket) -> Result<T, SocketError>,
    ) -> Result<T, SocketError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SocketError::SocketClosed);
        }
        let guard = self.inner.read();
        match guard.as_ref() {
            Some(socket) => f(socket),
            None => Err(SocketError::SocketClosed),
        }
    }

    /// Map an I/O error to `SocketClosed` if a shutdown raced the call.
    fn closed_or(&self, e: io::Error, wrap: fn(io::Error) -> SocketError) -> SocketError {
        if self.closed.load(Ordering::Acquire) {
            SocketError::SocketClosed
        } else {
            wrap(e)
        }
    }
}

impl fmt::Debug for TransportSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSocket")
            .field("config", &self.config)
            .field("valid", &self.is_valid())
            .finish()
    }
}

fn retry_interrupted<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

#[cfg(target_vendor = "apple")]
fn disable_sigpipe(socket: &Socket) {
    if let Err(e) = socket.set_nosigpipe(true) {
        tracing::warn!("Failed to set SO_NOSIGPIPE: {}", e);
    }
}

// MSG_NOSIGNAL covers the remaining targets at send time.
#[cfg(not(target_vendor = "apple"))]
fn disable_sigpipe(_socket: &Socket) {}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn send_no_signal(socket: &Socket, bytes: &[u8]) -> io::Result<usize> {
    socket.send_with_flags(bytes, libc::MSG_NOSIGNAL)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn send_no_signal(socket: &Socket, bytes: &[u8]) -> io::Result<usize> {
    socket.send(bytes)
}
