//! Listening-socket plumbing: the connection handle, the socket driver
//! capability a balancer consumes, and the tokio-backed driver that feeds
//! listener events into the supervisor loop.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::balancer::{ListenKey, ListenSpec};

/// An accepted inbound connection on its way to a worker.
pub trait Connection: Send {
    /// Cheap liveness probe used when draining the backlog.
    fn is_open(&self) -> bool;

    /// Surrenders the underlying socket, when there is one.
    fn take_stream(&mut self) -> Option<TcpStream> {
        None
    }
}

/// Owned handle to a pending connection.
pub type ConnRef = Box<dyn Connection>;

/// What a listening socket reports back to its balancer.
///
/// A driver task always finishes with `Closed`, whether the listener was
/// torn down on request or died on an error.
pub(crate) enum SocketEvent {
    Listening(SocketAddr),
    Connection(ConnRef),
    Error(String),
    Closed,
}

pub(crate) type SocketSender = mpsc::UnboundedSender<(ListenKey, SocketEvent)>;

/// Listening-socket control consumed by a balancer.
///
/// `open` asks the OS to listen; `close` tears the listener down. Both are
/// requests only. Outcomes arrive as [`SocketEvent`]s on the supervisor
/// loop.
pub(crate) trait SocketDriver: Send {
    fn open(&mut self);
    fn close(&mut self);
}

/// Production driver: one spawned task per listen epoch.
pub(crate) struct TcpDriver {
    spec: ListenSpec,
    events: SocketSender,
    epoch: Option<CancellationToken>,
}

impl TcpDriver {
    pub(crate) fn new(spec: ListenSpec, events: SocketSender) -> Self {
        Self {
            spec,
            events,
            epoch: None,
        }
    }
}

impl SocketDriver for TcpDriver {
    fn open(&mut self) {
        let token = CancellationToken::new();
        self.epoch = Some(token.clone());
        tokio::spawn(serve(self.spec, self.events.clone(), token));
    }

    fn close(&mut self) {
        if let Some(token) = self.epoch.take() {
            token.cancel();
        }
    }
}

fn bind(spec: &ListenSpec) -> io::Result<TcpListener> {
    let addr = SocketAddr::new(spec.address, spec.port);
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(spec.backlog)
}

async fn serve(spec: ListenSpec, events: SocketSender, token: CancellationToken) {
    let key = spec.key();
    let listener = match bind(&spec) {
        Ok(listener) => listener,
        Err(e) => {
            let _ = events.send((key, SocketEvent::Error(e.to_string())));
            let _ = events.send((key, SocketEvent::Closed));
            return;
        }
    };
    match listener.local_addr() {
        Ok(addr) => {
            let _ = events.send((key, SocketEvent::Listening(addr)));
        }
        Err(e) => {
            let _ = events.send((key, SocketEvent::Error(e.to_string())));
            let _ = events.send((key, SocketEvent::Closed));
            return;
        }
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let conn = TcpConnection {
                        stream: Some(stream),
                        peer,
                    };
                    let _ = events.send((key, SocketEvent::Connection(Box::new(conn))));
                }
                Err(e) => {
                    let _ = events.send((key, SocketEvent::Error(e.to_string())));
                    break;
                }
            },
        }
    }

    drop(listener);
    let _ = events.send((key, SocketEvent::Closed));
}

/// Accepted TCP connection.
pub struct TcpConnection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
}

impl TcpConnection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Connection for TcpConnection {
    fn is_open(&self) -> bool {
        // Catches sockets the local stack already tore down; a remote EOF
        // surfaces on the worker side once the stream is read.
        match &self.stream {
            Some(stream) => stream.peer_addr().is_ok(),
            None => false,
        }
    }

    fn take_stream(&mut self) -> Option<TcpStream> {
        self.stream.take()
    }
}
