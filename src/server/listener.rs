//! Listener handles and the blocking accept/receive loops behind them.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info_span, warn};
use uuid::Uuid;

use super::handler::RequestHandler;
use super::registry::Supervisor;

/// Largest datagram the companion listener accepts.
const MAX_DATAGRAM: usize = 65_535;

/// Role of a listener within the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// TCP server the main thread blocks in.
    Primary,
    /// UDP server on the primary's address and port.
    Companion,
    /// Optional TCP server with a configuration-selected handler.
    Auxiliary,
}

impl ListenerKind {
    fn is_datagram(self) -> bool {
        matches!(self, ListenerKind::Companion)
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Primary => write!(f, "primary"),
            ListenerKind::Companion => write!(f, "companion"),
            ListenerKind::Auxiliary => write!(f, "auxiliary"),
        }
    }
}

/// State shared between a handle and the loop serving its socket.
#[derive(Debug)]
pub struct ListenerState {
    kind: ListenerKind,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

impl ListenerState {
    pub fn new(kind: ListenerKind, local_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            kind,
            local_addr,
            closed: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the listener closed and unblock its loop.
    ///
    /// Returns `false` when the listener was already closed, in which case
    /// nothing is done.
    pub fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!(kind = %self.kind, address = %self.local_addr, "listener shutting down");
        self.wake();
        true
    }

    /// Unblock the accept/receive call so the loop re-checks its stop condition.
    pub fn wake(&self) {
        let target = wake_addr(self.local_addr);
        let result = if self.kind.is_datagram() {
            let any: SocketAddr = match target {
                SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
                SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
            };
            UdpSocket::bind(any).and_then(|s| s.send_to(&[], target).map(|_| ()))
        } else {
            TcpStream::connect(target).map(|_| ())
        };
        if let Err(e) = result {
            // Expected once the socket itself is gone.
            debug!(kind = %self.kind, error = %e, "listener wakeup failed");
        }
    }
}

/// Loopback stands in for a wildcard bind address.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

/// A running listener as tracked by the [`Supervisor`].
///
/// Serving threads are detached; the handle only owns the stop switch.
#[derive(Debug)]
pub struct ListenerHandle {
    name: String,
    state: Arc<ListenerState>,
}

impl ListenerHandle {
    pub fn new(name: impl Into<String>, state: Arc<ListenerState>) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ListenerKind {
        self.state.kind()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.state.local_addr()
    }

    pub fn shutdown(&self) -> bool {
        self.state.shutdown()
    }

    pub fn wake(&self) {
        self.state.wake();
    }
}

/// Accept connections until the listener is closed or the supervisor cancelled.
///
/// Each connection is served on its own thread.
pub fn serve_stream(
    listener: &TcpListener,
    state: &ListenerState,
    handler: &Arc<dyn RequestHandler>,
    supervisor: &Supervisor,
) {
    let stopped = || state.is_closed() || supervisor.is_cancelled();

    for incoming in listener.incoming() {
        if stopped() {
            break;
        }
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                warn!(kind = %state.kind(), error = %e, "accept failed");
                continue;
            }
        };
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                warn!(kind = %state.kind(), error = %e, "dropping connection without peer address");
                continue;
            }
        };

        let conn_id = Uuid::new_v4();
        let handler = Arc::clone(handler);
        let kind = state.kind();
        let spawned = thread::Builder::new()
            .name(format!("conn-{}", conn_id.simple()))
            .spawn(move || {
                let span = info_span!("connection", id = %conn_id, %peer, listener = %kind);
                let _enter = span.enter();
                if let Err(e) = handler.handle_stream(stream, peer) {
                    warn!(handler = handler.name(), error = %e, "request handler failed");
                }
            });
        if let Err(e) = spawned {
            error!(%peer, error = %e, "failed to spawn connection thread");
        }
    }

    debug!(kind = %state.kind(), address = %state.local_addr(), "accept loop finished");
}

/// Receive datagrams until the listener is closed or the supervisor cancelled.
pub fn serve_datagrams(
    socket: &UdpSocket,
    state: &ListenerState,
    handler: &Arc<dyn RequestHandler>,
    supervisor: &Supervisor,
) {
    let stopped = || state.is_closed() || supervisor.is_cancelled();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                if stopped() {
                    break;
                }
                if let Err(e) = handler.handle_datagram(&buf[..len], peer, socket) {
                    warn!(handler = handler.name(), %peer, error = %e, "datagram handler failed");
                }
            }
            Err(e) => {
                if stopped() {
                    break;
                }
                warn!(kind = %state.kind(), error = %e, "receive failed");
            }
        }
    }

    debug!(kind = %state.kind(), address = %state.local_addr(), "receive loop finished");
}

/// Bind a TCP listener, trying every address `host` resolves to.
pub fn bind_stream(host: &str, port: u16) -> io::Result<TcpListener> {
    TcpListener::bind((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_addr_maps_wildcards_to_loopback() {
        let v4: SocketAddr = "0.0.0.0:4038".parse().unwrap();
        assert_eq!(wake_addr(v4), "127.0.0.1:4038".parse().unwrap());
        let v6: SocketAddr = "[::]:4038".parse().unwrap();
        assert_eq!(wake_addr(v6), "[::1]:4038".parse().unwrap());
        let fixed: SocketAddr = "10.0.0.1:1".parse().unwrap();
        assert_eq!(wake_addr(fixed), fixed);
    }

    #[test]
    fn test_shutdown_is_effective_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let state = ListenerState::new(ListenerKind::Auxiliary, listener.local_addr().unwrap());
        assert!(state.shutdown());
        assert!(!state.shutdown());
        assert!(state.is_closed());
    }

    #[test]
    fn test_shutdown_after_socket_closed_is_harmless() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let state = ListenerState::new(ListenerKind::Companion, socket.local_addr().unwrap());
        drop(socket);
        assert!(state.shutdown());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ListenerKind::Primary.to_string(), "primary");
        assert_eq!(ListenerKind::Companion.to_string(), "companion");
        assert_eq!(ListenerKind::Auxiliary.to_string(), "auxiliary");
    }
}
