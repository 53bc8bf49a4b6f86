//! Transport layer error types.
//!
//! A non-blocking receive with nothing queued returns `Ok(None)`, not an
//! error. A send that would block does surface here and is counted as a lost
//! datagram by the packet helpers.

use std::io;

use thiserror::Error;

/// Datagram channel failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error from a socket operation.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The channel was used after `close`.
    #[error("channel closed")]
    Closed,

    /// `send` accepted fewer bytes than the datagram holds.
    #[error("short send: {sent} of {expected} bytes")]
    ShortSend {
        /// Bytes in the datagram.
        expected: usize,
        /// Bytes the channel reported as sent.
        sent: usize,
    },
}

impl TransportError {
    /// Check if this error only means "nothing to do right now".
    pub fn is_would_block(&self) -> bool {
        matches!(self, TransportError::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }

    /// Check if this error is fatal to the connection.
    pub fn is_fatal(&self) -> bool {
        !self.is_would_block()
    }

    /// Check if the peer is unreachable (ICMP port unreachable surfaced on a
    /// connected socket).
    pub fn is_peer_gone(&self) -> bool {
        matches!(
            self,
            TransportError::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
            )
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
