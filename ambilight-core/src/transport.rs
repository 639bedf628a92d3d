//! Frame transmission. One datagram per frame, no framing.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::mpsc::Sender;

use tracing::debug;

use crate::error::{AmbilightError, Result};

/// Destination for packed LED frames.
pub trait FrameSink: Send {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Hands frames to another thread; used for previews and in tests.
impl FrameSink for Sender<Vec<u8>> {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "frame receiver dropped"))
    }
}

/// Connected, non-blocking UDP socket.
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpSink {
    /// Resolves `host` once and connects. Resolution failure is fatal.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let peer = (host, port)
            .to_socket_addrs()
            .map_err(|e| AmbilightError::resolve(host, e))?
            .next()
            .ok_or_else(|| {
                AmbilightError::resolve(
                    host,
                    io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
                )
            })?;

        let bind: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        socket.connect(peer)?;
        debug!(local = ?socket.local_addr().ok(), %peer, "udp socket connected");

        Ok(Self { socket, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl FrameSink for UdpSink {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.socket.send(frame).map(|_| ())
    }
}
