//! Sending side of a transfer.
//!
//! [`Sender`] opens the connection, pushes the source through a sliding
//! congestion window and tears the connection down. [`send_file`] resolves the
//! receiver, opens the file and drives a sender over UDP.

mod machine;
mod window;

pub use machine::{Sender, SenderState};
pub use window::CongestionWindow;

use std::time::Duration;

use crate::core::constants::{
    FIN_TIMEOUT, INITIAL_WINDOW_UNITS, MAX_FIN_ATTEMPTS, MAX_RTO, MAX_SYN_ATTEMPTS,
    MAX_WINDOW_UNITS, MIN_RTO, POLL_INTERVAL, RECEIVE_WINDOW_UNITS, SYN_TIMEOUT,
};
use crate::core::{Error, Result};
use crate::transport::SeqNum;

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Initial sequence number announced in the SYN.
    pub isn: SeqNum,

    /// Congestion window after the handshake, in payload units.
    pub initial_window: u32,

    /// Congestion window ceiling, in payload units.
    pub max_window: u32,

    /// Wait for a SYN-ACK before resending the SYN.
    pub syn_timeout: Duration,

    /// SYN transmissions before giving up.
    pub max_syn_attempts: u32,

    /// Wait for a FIN-ACK before resending the FIN.
    pub fin_timeout: Duration,

    /// FIN transmissions before giving up.
    pub max_fin_attempts: u32,

    /// Lower bound on the retransmission timeout.
    pub min_rto: Duration,

    /// Upper bound on the retransmission timeout.
    pub max_rto: Duration,

    /// Longest sleep between polls when the async driver is idle.
    pub poll_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            isn: 0,
            initial_window: INITIAL_WINDOW_UNITS,
            max_window: MAX_WINDOW_UNITS,
            syn_timeout: SYN_TIMEOUT,
            max_syn_attempts: MAX_SYN_ATTEMPTS,
            fin_timeout: FIN_TIMEOUT,
            max_fin_attempts: MAX_FIN_ATTEMPTS,
            min_rto: MIN_RTO,
            max_rto: MAX_RTO,
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl SenderConfig {
    /// Check the configuration for values the protocol cannot run with.
    ///
    /// The window ceiling may not exceed the receive window, which also keeps
    /// it under half the sequence space.
    pub fn validate(&self) -> Result<()> {
        if self.initial_window == 0 {
            return Err(Error::Config("initial window must be at least 1 unit".into()));
        }
        if self.max_window == 0 || self.max_window > RECEIVE_WINDOW_UNITS {
            return Err(Error::Config(format!(
                "max window must be between 1 and {RECEIVE_WINDOW_UNITS} units, got {}",
                self.max_window
            )));
        }
        if self.initial_window > self.max_window {
            return Err(Error::Config(format!(
                "initial window ({}) exceeds max window ({})",
                self.initial_window, self.max_window
            )));
        }
        if self.syn_timeout.is_zero() || self.fin_timeout.is_zero() {
            return Err(Error::Config("SYN and FIN timeouts must be non-zero".into()));
        }
        if self.max_syn_attempts == 0 || self.max_fin_attempts == 0 {
            return Err(Error::Config("retry counts must be at least 1".into()));
        }
        if self.min_rto.is_zero() || self.min_rto > self.max_rto {
            return Err(Error::Config(format!(
                "invalid retransmission timeout bounds [{:?}, {:?}]",
                self.min_rto, self.max_rto
            )));
        }
        Ok(())
    }
}

/// Builder for [`SenderConfig`].
#[derive(Debug)]
pub struct SenderConfigBuilder {
    config: SenderConfig,
}

impl SenderConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self {
            config: SenderConfig::default(),
        }
    }

    /// Set the initial sequence number.
    pub fn isn(mut self, isn: SeqNum) -> Self {
        self.config.isn = isn;
        self
    }

    /// Set the initial congestion window (units).
    pub fn initial_window(mut self, units: u32) -> Self {
        self.config.initial_window = units;
        self
    }

    /// Set the congestion window ceiling (units).
    pub fn max_window(mut self, units: u32) -> Self {
        self.config.max_window = units;
        self
    }

    /// Set the SYN timeout and attempt count.
    pub fn syn_retry(mut self, timeout: Duration, attempts: u32) -> Self {
        self.config.syn_timeout = timeout;
        self.config.max_syn_attempts = attempts;
        self
    }

    /// Set the FIN timeout and attempt count.
    pub fn fin_retry(mut self, timeout: Duration, attempts: u32) -> Self {
        self.config.fin_timeout = timeout;
        self.config.max_fin_attempts = attempts;
        self
    }

    /// Set the retransmission timeout bounds.
    pub fn rto_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.config.min_rto = min;
        self.config.max_rto = max;
        self
    }

    /// Set the driver's idle poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<SenderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SenderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics from a sender run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderReport {
    /// Bytes the receiver acknowledged.
    pub bytes_acked: u64,
    /// Windows sent.
    pub rounds: u64,
    /// DATA packets sent, retransmissions included.
    pub data_packets: u64,
    /// DATA packets covering bytes that had been sent before.
    pub retransmitted_packets: u64,
    /// Retransmission timeouts.
    pub timeouts: u64,
    /// Window halvings after three duplicate ACKs.
    pub fast_retransmits: u64,
    /// Duplicate ACKs seen.
    pub duplicate_acks: u64,
    /// SYNs sent.
    pub syn_attempts: u32,
    /// FINs sent.
    pub fin_attempts: u32,
    /// SYN to SYN-ACK latency.
    pub handshake_rtt: Option<Duration>,
    /// Congestion window at the end, in units.
    pub final_window: u32,
    /// Smoothed RTT at the end.
    pub smoothed_rtt: Duration,
}

#[cfg(feature = "runtime")]
pub use self::runtime::send_file;

#[cfg(feature = "runtime")]
mod runtime {
    use std::fs::File;
    use std::io::BufReader;
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
    use std::path::Path;

    use tracing::{debug, info};

    use super::{Sender, SenderConfig, SenderReport};
    use crate::core::{Error, Result, SenderError};
    use crate::driver;
    use crate::transport::{DatagramChannel, UdpChannel};

    /// Send the first `bytes_to_transfer` bytes of `source` to the receiver at
    /// `host:port`.
    pub async fn send_file(
        config: SenderConfig,
        host: &str,
        port: u16,
        source: impl AsRef<Path>,
        bytes_to_transfer: u64,
    ) -> Result<SenderReport> {
        config.validate()?;
        let source = source.as_ref();

        let file = File::open(source).map_err(|err| Error::File {
            path: source.to_path_buf(),
            source: err,
        })?;

        let peer = tokio::net::lookup_host((host, port))
            .await
            .map_err(|err| Error::Resolve(format!("{host}:{port}: {err}")))?
            .next()
            .ok_or_else(|| Error::Resolve(format!("{host}:{port}")))?;
        debug!(%peer, "resolved receiver");

        let local = match peer {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let mut channel =
            UdpChannel::bind(local).map_err(|err| Error::Bind { addr: local, source: err })?;
        channel
            .connect_to(peer)
            .map_err(|err| Error::Sender(SenderError::Transport(err)))?;

        info!(
            %peer,
            local = %channel.local_addr(),
            source = %source.display(),
            bytes = bytes_to_transfer,
            "sending"
        );

        let sender = Sender::new(config.clone(), channel, BufReader::new(file), bytes_to_transfer)?;
        let report = driver::drive(sender, config.poll_interval).await?;

        info!(
            bytes = report.bytes_acked,
            rounds = report.rounds,
            retransmitted = report.retransmitted_packets,
            "send finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SenderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SenderConfigBuilder::new()
            .isn(99)
            .initial_window(4)
            .max_window(32)
            .syn_retry(Duration::from_millis(100), 2)
            .build()
            .unwrap();

        assert_eq!(config.isn, 99);
        assert_eq!(config.initial_window, 4);
        assert_eq!(config.max_window, 32);
        assert_eq!(config.syn_timeout, Duration::from_millis(100));
        assert_eq!(config.max_syn_attempts, 2);
        assert_eq!(config.fin_timeout, FIN_TIMEOUT);
    }

    #[test]
    fn test_validate_rejects_bad_windows() {
        let err = SenderConfigBuilder::new().initial_window(0).build();
        assert!(matches!(err, Err(Error::Config(_))));

        let err = SenderConfigBuilder::new()
            .max_window(RECEIVE_WINDOW_UNITS + 1)
            .build();
        assert!(matches!(err, Err(Error::Config(_))));

        let err = SenderConfigBuilder::new()
            .initial_window(10)
            .max_window(5)
            .build();
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let err = SenderConfigBuilder::new()
            .fin_retry(Duration::ZERO, 3)
            .build();
        assert!(matches!(err, Err(Error::Config(_))));

        let err = SenderConfigBuilder::new()
            .syn_retry(Duration::from_secs(1), 0)
            .build();
        assert!(matches!(err, Err(Error::Config(_))));

        let err = SenderConfigBuilder::new()
            .rto_bounds(Duration::from_secs(2), Duration::from_secs(1))
            .build();
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
