use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::options::SocketOption;

/// Maximum Unix socket path length.
/// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and the BSDs.
#[cfg(target_os = "linux")]
const MAX_UNIX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_UNIX_PATH_LEN: usize = 104;

/// The transport variant behind an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    TcpStream,
    TcpListener,
    Udp,
    UnixStream,
    UnixListener,
}

impl EndpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TcpStream => "tcp-stream",
            Self::TcpListener => "tcp-listener",
            Self::Udp => "udp",
            Self::UnixStream => "unix-stream",
            Self::UnixListener => "unix-listener",
        }
    }

    /// True for variants that carry bytes (as opposed to accepting connections).
    pub fn is_stream(self) -> bool {
        matches!(self, Self::TcpStream | Self::UnixStream)
    }

    pub fn is_listener(self) -> bool {
        matches!(self, Self::TcpListener | Self::UnixListener)
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// `n` bytes were written to the front of the destination.
    Data(usize),
    /// The peer performed an orderly shutdown.
    Closed,
}

enum Socket {
    TcpStream(TcpStream),
    TcpListener(TcpListener),
    Udp(UdpSocket),
    UnixStream(UnixStream),
    UnixListener(UnixListener),
}

impl Socket {
    fn kind(&self) -> EndpointKind {
        match self {
            Socket::TcpStream(_) => EndpointKind::TcpStream,
            Socket::TcpListener(_) => EndpointKind::TcpListener,
            Socket::Udp(_) => EndpointKind::Udp,
            Socket::UnixStream(_) => EndpointKind::UnixStream,
            Socket::UnixListener(_) => EndpointKind::UnixListener,
        }
    }

    fn raw_fd(&self) -> RawFd {
        match self {
            Socket::TcpStream(s) => s.as_raw_fd(),
            Socket::TcpListener(s) => s.as_raw_fd(),
            Socket::Udp(s) => s.as_raw_fd(),
            Socket::UnixStream(s) => s.as_raw_fd(),
            Socket::UnixListener(s) => s.as_raw_fd(),
        }
    }
}

/// State shared by every clone of one endpoint. Dropping the last clone
/// closes the descriptor.
struct Shared {
    socket: Socket,
    label: String,
    /// Filesystem socket created by `listen_unix`, removed on last drop if its
    /// identity is unchanged.
    unix_path: Option<(PathBuf, u64, u64)>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some((path, dev, ino)) = &self.unix_path {
            if let Ok(metadata) = std::fs::symlink_metadata(path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == *dev
                    && metadata.ino() == *ino
                {
                    debug!(?path, "cleaning up socket file");
                    let _ = std::fs::remove_file(path);
                } else {
                    debug!(?path, "socket path identity changed; skipping cleanup");
                }
            }
        }
        debug!(label = %self.label, fd = self.socket.raw_fd(), "closing endpoint");
    }
}

/// A reference-counted handle to one transport socket.
///
/// Clones share the underlying descriptor; it is closed when the last clone
/// is dropped. Two handles compare equal iff they denote the same descriptor.
/// Per-handle settings (the UDP default peer) are copied on clone and are not
/// shared afterwards.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
    default_peer: Option<SocketAddr>,
}

impl Endpoint {
    fn from_socket(socket: Socket, label: String) -> Self {
        Self {
            shared: Arc::new(Shared {
                socket,
                label,
                unix_path: None,
            }),
            default_peer: None,
        }
    }

    /// Bind a TCP listener. Port 0 lets the OS choose.
    pub fn listen_tcp(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local = listener.local_addr()?;
        info!(%local, "listening on tcp");
        Ok(Self::from_socket(
            Socket::TcpListener(listener),
            local.to_string(),
        ))
    }

    /// Connect a TCP stream (blocking).
    pub fn connect_tcp(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        debug!(%addr, "connected over tcp");
        Ok(Self::from(stream))
    }

    /// Connect a TCP stream, giving up after `timeout`.
    pub fn connect_tcp_timeout(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|source| {
            TransportError::Connect {
                addr: addr.to_string(),
                source,
            }
        })?;
        debug!(%addr, "connected over tcp");
        Ok(Self::from(stream))
    }

    /// Bind a UDP socket. Port 0 lets the OS choose.
    pub fn bind_udp(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local = socket.local_addr()?;
        debug!(%local, "bound udp socket");
        Ok(Self::from_socket(Socket::Udp(socket), local.to_string()))
    }

    /// Bind a Unix stream listener at `path`, replacing a stale socket file.
    ///
    /// The socket file is removed when the last clone of the endpoint drops.
    pub fn listen_unix(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= MAX_UNIX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: MAX_UNIX_PATH_LEN,
            });
        }

        let bind_err = |source| TransportError::Bind {
            addr: path.display().to_string(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
        info!(?path, "listening on unix domain socket");

        Ok(Self {
            shared: Arc::new(Shared {
                socket: Socket::UnixListener(listener),
                label: format!("unix:{}", path.display()),
                unix_path: Some((path, metadata.dev(), metadata.ino())),
            }),
            default_peer: None,
        })
    }

    /// Connect to a listening Unix stream socket.
    pub fn connect_unix(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            addr: path.display().to_string(),
            source,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(Self::from_socket(
            Socket::UnixStream(stream),
            format!("unix:{}", path.display()),
        ))
    }

    /// A connected pair of anonymous Unix stream endpoints.
    pub fn unix_pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from(left), Self::from(right)))
    }

    /// Accept a pending connection on a listener endpoint (blocking unless
    /// the listener is non-blocking).
    pub fn accept(&self) -> Result<Endpoint> {
        match &self.shared.socket {
            Socket::TcpListener(listener) => {
                let (stream, peer) = listener.accept().map_err(TransportError::Accept)?;
                debug!(%peer, listener = %self.shared.label, "accepted tcp connection");
                Ok(Self::from_socket(Socket::TcpStream(stream), peer.to_string()))
            }
            Socket::UnixListener(listener) => {
                let (stream, _addr) = listener.accept().map_err(TransportError::Accept)?;
                let label = format!("{}#{}", self.shared.label, stream.as_raw_fd());
                debug!(%label, "accepted unix connection");
                Ok(Self::from_socket(Socket::UnixStream(stream), label))
            }
            other => Err(TransportError::Unsupported {
                operation: "accept",
                kind: other.kind().as_str(),
            }),
        }
    }

    /// Send up to `src.len()` bytes. May send fewer; callers loop.
    ///
    /// UDP endpoints send to the default peer if one is set, otherwise to the
    /// connected peer.
    pub fn send_chunk(&self, src: &[u8]) -> Result<usize> {
        match &self.shared.socket {
            Socket::TcpStream(stream) => (&*stream).write(src).map_err(TransportError::Send),
            Socket::UnixStream(stream) => (&*stream).write(src).map_err(TransportError::Send),
            Socket::Udp(socket) => match self.default_peer {
                Some(peer) => socket.send_to(src, peer).map_err(TransportError::Send),
                None => socket.send(src).map_err(TransportError::Send),
            },
            other => Err(TransportError::Unsupported {
                operation: "send",
                kind: other.kind().as_str(),
            }),
        }
    }

    /// Receive up to `dst.len()` bytes. May receive fewer.
    ///
    /// Stream endpoints report [`Received::Closed`] on orderly shutdown.
    /// Datagram endpoints never do; an empty datagram is `Data(0)`.
    pub fn receive_chunk(&self, dst: &mut [u8]) -> Result<Received> {
        let requested = dst.len();
        let stream_read = |n: usize| {
            if n == 0 && requested > 0 {
                Received::Closed
            } else {
                Received::Data(n)
            }
        };
        match &self.shared.socket {
            Socket::TcpStream(stream) => (&*stream)
                .read(dst)
                .map(stream_read)
                .map_err(TransportError::Receive),
            Socket::UnixStream(stream) => (&*stream)
                .read(dst)
                .map(stream_read)
                .map_err(TransportError::Receive),
            Socket::Udp(socket) => socket
                .recv_from(dst)
                .map(|(n, _from)| Received::Data(n))
                .map_err(TransportError::Receive),
            other => Err(TransportError::Unsupported {
                operation: "receive",
                kind: other.kind().as_str(),
            }),
        }
    }

    /// Send one datagram to an explicit address (UDP only).
    pub fn send_chunk_to(&self, src: &[u8], addr: SocketAddr) -> Result<usize> {
        match &self.shared.socket {
            Socket::Udp(socket) => socket.send_to(src, addr).map_err(TransportError::Send),
            other => Err(TransportError::Unsupported {
                operation: "send_to",
                kind: other.kind().as_str(),
            }),
        }
    }

    /// Receive one datagram and report its source (UDP only).
    pub fn receive_chunk_from(&self, dst: &mut [u8]) -> Result<(usize, SocketAddr)> {
        match &self.shared.socket {
            Socket::Udp(socket) => socket.recv_from(dst).map_err(TransportError::Receive),
            other => Err(TransportError::Unsupported {
                operation: "receive_from",
                kind: other.kind().as_str(),
            }),
        }
    }

    /// Connect a UDP socket so plain `send_chunk` reaches `addr`.
    pub fn connect_udp(&self, addr: SocketAddr) -> Result<()> {
        match &self.shared.socket {
            Socket::Udp(socket) => socket
                .connect(addr)
                .map_err(|source| TransportError::Connect {
                    addr: addr.to_string(),
                    source,
                }),
            other => Err(TransportError::Unsupported {
                operation: "connect_udp",
                kind: other.kind().as_str(),
            }),
        }
    }

    /// Set the address UDP sends go to. Affects this handle only.
    pub fn set_default_peer(&mut self, addr: Option<SocketAddr>) {
        self.default_peer = addr;
    }

    pub fn default_peer(&self) -> Option<SocketAddr> {
        self.default_peer
    }

    /// Set a boolean `SOL_SOCKET` option.
    pub fn set_option(&self, option: SocketOption, enabled: bool) -> Result<()> {
        crate::options::set_bool(self.descriptor(), option, enabled)
    }

    /// Read a boolean `SOL_SOCKET` option.
    pub fn option(&self, option: SocketOption) -> Result<bool> {
        crate::options::get_bool(self.descriptor(), option)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        let result = match &self.shared.socket {
            Socket::TcpStream(s) => s.set_nonblocking(nonblocking),
            Socket::TcpListener(s) => s.set_nonblocking(nonblocking),
            Socket::Udp(s) => s.set_nonblocking(nonblocking),
            Socket::UnixStream(s) => s.set_nonblocking(nonblocking),
            Socket::UnixListener(s) => s.set_nonblocking(nonblocking),
        };
        result.map_err(Into::into)
    }

    /// Set read timeout on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.shared.socket {
            Socket::TcpStream(s) => s.set_read_timeout(timeout).map_err(Into::into),
            Socket::Udp(s) => s.set_read_timeout(timeout).map_err(Into::into),
            Socket::UnixStream(s) => s.set_read_timeout(timeout).map_err(Into::into),
            other => Err(TransportError::Unsupported {
                operation: "set_read_timeout",
                kind: other.kind().as_str(),
            }),
        }
    }

    /// Set write timeout on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.shared.socket {
            Socket::TcpStream(s) => s.set_write_timeout(timeout).map_err(Into::into),
            Socket::Udp(s) => s.set_write_timeout(timeout).map_err(Into::into),
            Socket::UnixStream(s) => s.set_write_timeout(timeout).map_err(Into::into),
            other => Err(TransportError::Unsupported {
                operation: "set_write_timeout",
                kind: other.kind().as_str(),
            }),
        }
    }

    /// Local address of an IP endpoint.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.shared.socket {
            Socket::TcpStream(s) => s.local_addr().map_err(Into::into),
            Socket::TcpListener(s) => s.local_addr().map_err(Into::into),
            Socket::Udp(s) => s.local_addr().map_err(Into::into),
            other => Err(TransportError::Unsupported {
                operation: "local_addr",
                kind: other.kind().as_str(),
            }),
        }
    }

    /// The descriptor used for readiness registration.
    pub fn descriptor(&self) -> RawFd {
        self.shared.socket.raw_fd()
    }

    pub fn kind(&self) -> EndpointKind {
        self.shared.socket.kind()
    }

    /// Address-like identity for logs.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Number of live handles sharing this descriptor.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }
}

impl From<TcpStream> for Endpoint {
    fn from(stream: TcpStream) -> Self {
        let label = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| format!("tcp#{}", stream.as_raw_fd()));
        Self::from_socket(Socket::TcpStream(stream), label)
    }
}

impl From<TcpListener> for Endpoint {
    fn from(listener: TcpListener) -> Self {
        let label = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| format!("tcp-listener#{}", listener.as_raw_fd()));
        Self::from_socket(Socket::TcpListener(listener), label)
    }
}

impl From<UdpSocket> for Endpoint {
    fn from(socket: UdpSocket) -> Self {
        let label = socket
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| format!("udp#{}", socket.as_raw_fd()));
        Self::from_socket(Socket::Udp(socket), label)
    }
}

impl From<UnixStream> for Endpoint {
    fn from(stream: UnixStream) -> Self {
        let label = format!("unix#{}", stream.as_raw_fd());
        Self::from_socket(Socket::UnixStream(stream), label)
    }
}

impl From<UnixListener> for Endpoint {
    fn from(listener: UnixListener) -> Self {
        let label = format!("unix-listener#{}", listener.as_raw_fd());
        Self::from_socket(Socket::UnixListener(listener), label)
    }
}

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.descriptor()
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor() == other.descriptor()
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.descriptor().hash(state);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("kind", &self.kind())
            .field("fd", &self.descriptor())
            .field("label", &self.label())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn temp_sock(tag: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("pktwire-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.sock");
        (dir, path)
    }

    #[test]
    fn tcp_accept_and_exchange() {
        let listener = Endpoint::listen_tcp(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = Endpoint::connect_tcp(addr).unwrap();
        let server = listener.accept().unwrap();
        assert_eq!(server.kind(), EndpointKind::TcpStream);

        assert_eq!(client.send_chunk(b"hello").unwrap(), 5);
        let mut buf = [0u8; 16];
        let received = server.receive_chunk(&mut buf).unwrap();
        assert_eq!(received, Received::Data(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn stream_reports_orderly_close() {
        let (left, right) = Endpoint::unix_pair().unwrap();
        drop(left);

        let mut buf = [0u8; 8];
        assert_eq!(right.receive_chunk(&mut buf).unwrap(), Received::Closed);
    }

    #[test]
    fn clones_share_descriptor_and_compare_equal() {
        let (left, right) = Endpoint::unix_pair().unwrap();
        let copy = left.clone();

        assert_eq!(copy, left);
        assert_ne!(left, right);
        assert_eq!(left.ref_count(), 2);

        drop(copy);
        assert_eq!(left.ref_count(), 1);
    }

    #[test]
    fn descriptor_closes_with_last_clone() {
        let (left, right) = Endpoint::unix_pair().unwrap();
        let copy = left.clone();

        drop(left);
        // Still open: the copy keeps it alive.
        assert_eq!(copy.send_chunk(b"x").unwrap(), 1);
        drop(copy);

        let mut buf = [0u8; 4];
        assert_eq!(right.receive_chunk(&mut buf).unwrap(), Received::Data(1));
        assert_eq!(right.receive_chunk(&mut buf).unwrap(), Received::Closed);
    }

    #[test]
    fn default_peer_is_per_handle() {
        let mut sender = Endpoint::bind_udp(loopback()).unwrap();
        let receiver = Endpoint::bind_udp(loopback()).unwrap();
        let copy = sender.clone();

        sender.set_default_peer(Some(receiver.local_addr().unwrap()));
        assert!(copy.default_peer().is_none());

        assert_eq!(sender.send_chunk(b"dgram").unwrap(), 5);
        let mut buf = [0u8; 16];
        let (n, from) = receiver.receive_chunk_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"dgram");
        assert_eq!(from, sender.local_addr().unwrap());
    }

    #[test]
    fn listener_rejects_data_operations() {
        let listener = Endpoint::listen_tcp(loopback()).unwrap();
        let err = listener.send_chunk(b"nope").unwrap_err();
        assert!(matches!(err, TransportError::Unsupported { .. }));

        let (stream, _) = Endpoint::unix_pair().unwrap();
        assert!(matches!(
            stream.accept(),
            Err(TransportError::Unsupported { .. })
        ));
    }

    #[test]
    fn unix_listener_cleans_up_on_last_drop() {
        let (dir, path) = temp_sock("uds-cleanup");
        let listener = Endpoint::listen_unix(&path).unwrap();
        let copy = listener.clone();

        let client = Endpoint::connect_unix(&path).unwrap();
        let server = listener.accept().unwrap();
        client.send_chunk(b"ping").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(server.receive_chunk(&mut buf).unwrap(), Received::Data(4));

        drop(listener);
        assert!(path.exists(), "a clone is still alive");
        drop(copy);
        assert!(!path.exists(), "socket file should be removed on last drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unix_listener_rejects_non_socket_file() {
        let (dir, path) = temp_sock("uds-file");
        std::fs::write(&path, b"regular-file").unwrap();

        let result = Endpoint::listen_unix(&path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unix_path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = Endpoint::listen_unix(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn connect_refused_maps_to_connect_code() {
        let listener = Endpoint::listen_tcp(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Endpoint::connect_tcp(addr).unwrap_err();
        assert_eq!(err.code(), crate::DiagnosticCode::SocketConnect);
        assert!(err.os_error().is_some());
    }
}
