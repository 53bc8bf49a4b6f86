//! # udpxfer
//!
//! Reliable file transfer over plain UDP datagrams.
//!
//! The protocol gives TCP-like guarantees without TCP:
//!
//! - **Ordered delivery**: a receive window reassembles out-of-order DATA and
//!   acknowledges cumulatively
//! - **Loss recovery**: go-back-N retransmission driven by an adaptive
//!   retransmission timeout and triple duplicate ACKs
//! - **Congestion response**: additive increase, halving on duplicate ACKs,
//!   quartering on timeout
//! - **Clean teardown**: SYN/SYN-ACK handshake, FIN/FIN-ACK with a lingering
//!   receiver for a lost FIN-ACK
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio-based [`driver`] plus [`send_file`] and
//!   [`receive_file`]
//!
//! ## Modules
//!
//! - [`core`]: Constants, errors and the [`StateMachine`] trait
//! - [`transport`]: Wire format, sequence arithmetic, RTT estimation, channels
//! - [`receiver`]: Receive window and receiver state machine
//! - [`sender`]: Congestion window and sender state machine
//!
//! ## Example Usage
//!
//! Both machines are sans-IO: they take the current time and poll a
//! [`DatagramChannel`]. A deterministic in-memory network makes a full
//! transfer a plain loop.
//!
//! ```rust
//! use std::io::Cursor;
//! use std::time::{Duration, Instant};
//!
//! use udpxfer::prelude::*;
//!
//! let network = SimNetwork::new();
//! let (tx, rx) = ("10.0.0.1:4000".parse()?, "10.0.0.2:5000".parse()?);
//! let mut channel = network.channel(tx);
//! channel.connect_to(rx)?;
//!
//! let data = b"hello over udp".to_vec();
//! let mut sender = Sender::new(SenderConfig::default(), channel, Cursor::new(data.clone()), 14)?;
//! let mut receiver = Receiver::new(ReceiverConfig::default(), network.channel(rx), Vec::new());
//!
//! let mut now = Instant::now();
//! while !(sender.poll(now).is_done() & receiver.poll(now).is_done()) {
//!     now += Duration::from_millis(1);
//! }
//!
//! assert_eq!(sender.finish()?.bytes_acked, 14);
//! assert_eq!(receiver.finish()?.bytes_delivered, 14);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Wire format, sequence space, channels
pub mod transport;

// Connection roles
pub mod receiver;
pub mod sender;

// Async driver (feature-gated)
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod driver;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::receiver::{Receiver, ReceiverConfig, ReceiverConfigBuilder, ReceiverReport};
    pub use crate::sender::{Sender, SenderConfig, SenderConfigBuilder, SenderReport};
    pub use crate::transport::{
        DatagramChannel, FaultPlan, Packet, PacketChannel, SimChannel, SimNetwork, Traffic,
        TransportError, UdpChannel,
    };

    #[cfg(feature = "runtime")]
    pub use crate::{receive_file, send_file};
}

// Re-export commonly used items at crate root
pub use crate::core::{Error, Poll, ReceiverError, Result, SenderError, StateMachine};
pub use receiver::{Receiver, ReceiverConfig, ReceiverReport};
pub use sender::{Sender, SenderConfig, SenderReport};
pub use transport::{DatagramChannel, Packet, UdpChannel};

#[cfg(feature = "runtime")]
pub use receiver::receive_file;
#[cfg(feature = "runtime")]
pub use sender::send_file;
