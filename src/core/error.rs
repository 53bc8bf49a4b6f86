//! Error types for the transfer protocol.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that end a sender run.
#[derive(Debug, Error)]
pub enum SenderError {
    /// The datagram channel failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Reading the source failed (including a source shorter than announced).
    #[error("source read failed: {0}")]
    Source(#[source] io::Error),

    /// No SYN-ACK arrived after every SYN attempt.
    #[error("handshake timed out after {attempts} SYN attempts")]
    HandshakeTimeout {
        /// SYN packets sent.
        attempts: u32,
    },

    /// No FIN-ACK arrived after every FIN attempt.
    ///
    /// All data was acknowledged; only the teardown is unconfirmed.
    #[error("teardown unconfirmed after {attempts} FIN attempts")]
    TeardownTimeout {
        /// FIN packets sent.
        attempts: u32,
    },

    /// The machine was closed before it finished.
    #[error("sender closed before the transfer completed")]
    Aborted,
}

/// Errors that end a receiver run.
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// The datagram channel failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Writing the destination failed.
    #[error("sink write failed: {0}")]
    Sink(#[source] io::Error),

    /// The machine was closed before the sender finished.
    #[error("receiver closed before the transfer completed")]
    Aborted,
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Sender failure.
    #[error("sender error: {0}")]
    Sender(#[from] SenderError),

    /// Receiver failure.
    #[error("receiver error: {0}")]
    Receiver(#[from] ReceiverError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The receiver hostname did not resolve to any address.
    #[error("could not resolve {0}")]
    Resolve(String),

    /// The UDP socket could not be bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Requested local address.
        addr: SocketAddr,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The source or destination file could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    File {
        /// File path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// I/O error while acquiring the socket or file.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for top-level operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_error_messages() {
        let err = SenderError::HandshakeTimeout { attempts: 5 };
        assert_eq!(err.to_string(), "handshake timed out after 5 SYN attempts");

        let err = SenderError::TeardownTimeout { attempts: 3 };
        assert!(err.to_string().contains("3 FIN attempts"));
    }

    #[test]
    fn test_top_level_conversions() {
        let err: Error = SenderError::Aborted.into();
        assert!(matches!(err, Error::Sender(SenderError::Aborted)));

        let err: Error = io::Error::new(io::ErrorKind::AddrInUse, "taken").into();
        assert!(err.to_string().starts_with("i/o error"));

        let err: Error = ReceiverError::Transport(TransportError::Closed).into();
        assert_eq!(
            err.to_string(),
            "receiver error: transport error: channel closed"
        );
    }

    #[test]
    fn test_acquisition_errors_name_the_resource() {
        let err = Error::File {
            path: PathBuf::from("/no/such/dir/out.bin"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("cannot open /no/such/dir/out.bin"));

        let err = Error::Bind {
            addr: "127.0.0.1:9".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().starts_with("cannot bind 127.0.0.1:9"));
    }
}
