//! Datagram channel abstraction and its UDP implementation.
//!
//! The protocol engine only needs an unreliable, unordered, possibly
//! duplicating datagram pipe with a non-blocking receive. [`DatagramChannel`]
//! is that contract; [`UdpChannel`] fulfils it with a non-blocking
//! `std::net::UdpSocket`, and [`crate::transport::sim`] with an in-memory
//! network for tests.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use tracing::trace;

use super::error::{TransportError, TransportResult};
use super::frame::{Packet, PacketError};
use crate::core::constants::MAX_DATAGRAM;

/// Receive buffer size. One byte more than the largest legal datagram so an
/// oversized datagram shows up as a length mismatch instead of being silently
/// truncated to a valid-looking packet.
pub const RECV_BUFFER_SIZE: usize = MAX_DATAGRAM + 1;

/// Connectionless datagram transport bound to a local address.
pub trait DatagramChannel {
    /// Restrict the channel to one peer: later sends go to `peer` and
    /// datagrams from anyone else are discarded.
    fn connect_to(&mut self, peer: SocketAddr) -> TransportResult<()>;

    /// Send one datagram to the connected peer.
    ///
    /// An `io::ErrorKind::WouldBlock` error means the datagram was not queued.
    fn send(&mut self, datagram: &[u8]) -> TransportResult<usize>;

    /// Receive one datagram without blocking.
    ///
    /// Returns `Ok(None)` when nothing is queued. The source address is
    /// reported when the implementation knows it.
    fn try_receive(&mut self, buf: &mut [u8]) -> TransportResult<Option<(usize, Option<SocketAddr>)>>;

    /// Release the channel. Calling it again has no effect; any later
    /// operation fails with [`TransportError::Closed`].
    fn close(&mut self);
}

/// A received datagram after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Well-formed packet and its source, when known.
    Packet(Packet, Option<SocketAddr>),
    /// Datagram that failed to decode. Callers drop it.
    Malformed(PacketError),
}

/// Packet-level helpers available on every [`DatagramChannel`].
pub trait PacketChannel: DatagramChannel {
    /// Encode and send `packet`.
    ///
    /// A send that would block counts as a lost datagram, not an error: the
    /// protocol recovers it like any other loss.
    fn send_packet(&mut self, packet: &Packet) -> TransportResult<()> {
        let bytes = packet.encode();
        match self.send(&bytes) {
            Ok(sent) if sent == bytes.len() => Ok(()),
            Ok(sent) => Err(TransportError::ShortSend {
                expected: bytes.len(),
                sent,
            }),
            Err(e) if e.is_would_block() => {
                trace!(len = bytes.len(), "send would block, datagram dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Receive and decode one datagram without blocking.
    fn recv_packet(&mut self, buf: &mut [u8]) -> TransportResult<Option<Incoming>> {
        let Some((len, from)) = self.try_receive(buf)? else {
            return Ok(None);
        };
        Ok(Some(match Packet::decode(&buf[..len]) {
            Ok(packet) => Incoming::Packet(packet, from),
            Err(e) => Incoming::Malformed(e),
        }))
    }
}

impl<C: DatagramChannel + ?Sized> PacketChannel for C {}

/// Non-blocking UDP socket channel.
#[derive(Debug)]
pub struct UdpChannel {
    /// `None` once closed.
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    peer: Option<SocketAddr>,
}

impl UdpChannel {
    /// Bind a non-blocking UDP socket to `addr`.
    ///
    /// Port 0 lets the OS choose an ephemeral port.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Self::from_socket(socket)
    }

    /// Wrap an existing socket, switching it to non-blocking mode.
    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket: Some(socket),
            local_addr,
            peer: None,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connected peer, if any.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Check if the channel was closed.
    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    fn socket(&self) -> TransportResult<&UdpSocket> {
        self.socket.as_ref().ok_or(TransportError::Closed)
    }
}

impl DatagramChannel for UdpChannel {
    fn connect_to(&mut self, peer: SocketAddr) -> TransportResult<()> {
        self.socket()?.connect(peer)?;
        self.peer = Some(peer);
        Ok(())
    }

    fn send(&mut self, datagram: &[u8]) -> TransportResult<usize> {
        Ok(self.socket()?.send(datagram)?)
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> TransportResult<Option<(usize, Option<SocketAddr>)>> {
        match self.socket()?.recv_from(buf) {
            Ok((len, from)) => Ok(Some((len, Some(from)))),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            trace!(local = %self.local_addr, "udp channel closed");
        }
    }
}
