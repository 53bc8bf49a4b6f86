//! Receiving side of a transfer.
//!
//! [`Receiver`] accepts one connection, reassembles DATA into the sink in
//! order and answers with cumulative ACKs. [`receive_file`] wires it to a UDP
//! socket and a file and drives it to completion.

mod machine;
mod window;

pub use machine::{Receiver, ReceiverState};
pub use window::{Insert, ReceiveWindow};

use std::net::SocketAddr;
use std::time::Duration;

use crate::core::constants::{FIN_LINGER, FLUSH_DELAY, POLL_INTERVAL};

/// Receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// How long DATA is collected before one cumulative ACK.
    pub flush_delay: Duration,

    /// How long retransmitted FINs are answered after the first FIN-ACK.
    pub fin_linger: Duration,

    /// Longest sleep between polls when the async driver is idle.
    pub poll_interval: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            flush_delay: FLUSH_DELAY,
            fin_linger: FIN_LINGER,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Builder for [`ReceiverConfig`].
#[derive(Debug)]
pub struct ReceiverConfigBuilder {
    config: ReceiverConfig,
}

impl ReceiverConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self {
            config: ReceiverConfig::default(),
        }
    }

    /// Set the flush delay.
    pub fn flush_delay(mut self, delay: Duration) -> Self {
        self.config.flush_delay = delay;
        self
    }

    /// Set the FIN linger period.
    pub fn fin_linger(mut self, linger: Duration) -> Self {
        self.config.fin_linger = linger;
        self
    }

    /// Set the driver's idle poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ReceiverConfig {
        self.config
    }
}

impl Default for ReceiverConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics from a receiver run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverReport {
    /// Sender address, once connected.
    pub peer: Option<SocketAddr>,
    /// Bytes written to the sink.
    pub bytes_delivered: u64,
    /// DATA packets carrying payload.
    pub data_packets: u64,
    /// DATA packets that added no new bytes.
    pub duplicates: u64,
    /// DATA packets dropped or cut at the window end.
    pub out_of_window: u64,
    /// Datagrams that failed to decode.
    pub malformed: u64,
    /// Cumulative ACKs sent.
    pub acks_sent: u64,
    /// Flushes that delivered bytes.
    pub flushes: u64,
    /// SYN-ACKs sent.
    pub syn_acks_sent: u64,
    /// FIN-ACKs sent.
    pub fin_acks_sent: u64,
}

#[cfg(feature = "runtime")]
pub use self::runtime::receive_file;

#[cfg(feature = "runtime")]
mod runtime {
    use std::fs::File;
    use std::io::BufWriter;
    use std::net::SocketAddr;
    use std::path::Path;

    use tracing::info;

    use super::{Receiver, ReceiverConfig, ReceiverReport};
    use crate::core::{Error, Result};
    use crate::driver;
    use crate::transport::UdpChannel;

    /// Listen on `bind`, accept one transfer and write it to `destination`.
    ///
    /// The socket is bound before the file is created, so a port conflict
    /// never leaves an empty file behind.
    pub async fn receive_file(
        config: ReceiverConfig,
        bind: SocketAddr,
        destination: impl AsRef<Path>,
    ) -> Result<ReceiverReport> {
        let destination = destination.as_ref();

        let channel =
            UdpChannel::bind(bind).map_err(|source| Error::Bind { addr: bind, source })?;
        let file = File::create(destination).map_err(|source| Error::File {
            path: destination.to_path_buf(),
            source,
        })?;

        info!(
            local = %channel.local_addr(),
            destination = %destination.display(),
            "waiting for sender"
        );

        let receiver = Receiver::new(config.clone(), channel, BufWriter::new(file));
        let report = driver::drive(receiver, config.poll_interval).await?;

        info!(bytes = report.bytes_delivered, "receive finished");
        Ok(report)
    }
}
