//! RTT estimation and retransmission timeout.
//!
//! Exponentially-weighted moving averages of the round-trip time and its
//! deviation:
//! - `deviation = (1 - β) * deviation + β * |smoothed - sample|`
//! - `smoothed  = (1 - α) * smoothed  + α * sample`
//! - `timeout   = smoothed + 4 * deviation`
//!
//! The timeout doubles on every consecutive expiry until the next sample.

use std::time::Duration;

use crate::core::constants::{HANDSHAKE_RTT_SCALE, MAX_RTO, MIN_RTO, SYN_TIMEOUT};

/// RTT smoothing constants.
pub mod constants {
    /// Alpha for smoothed RTT (0.125 = 1/8).
    pub const SRTT_ALPHA: f64 = 0.125;

    /// Beta for RTT deviation (0.25 = 1/4).
    pub const RTTVAR_BETA: f64 = 0.25;

    /// Deviation multiplier in the timeout.
    pub const RTO_K: f64 = 4.0;
}

/// RTT estimator driving the sender's retransmission timeout.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT in milliseconds.
    srtt: f64,
    /// RTT deviation in milliseconds.
    rttvar: f64,
    /// Current timeout interval (including backoff).
    timeout: Duration,
    min_timeout: Duration,
    max_timeout: Duration,
    /// Consecutive backoffs since the last sample.
    backoffs: u32,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    /// Create an estimator that has not seen a sample yet.
    ///
    /// The timeout starts at the SYN timeout until [`seed`](Self::seed) runs.
    pub fn new() -> Self {
        Self::with_bounds(MIN_RTO, MAX_RTO)
    }

    /// Create an estimator whose timeout is clamped to `[min, max]`.
    ///
    /// A `max` below `min` is raised to `min`.
    pub fn with_bounds(min_timeout: Duration, max_timeout: Duration) -> Self {
        let max_timeout = max_timeout.max(min_timeout);
        Self {
            srtt: 0.0,
            rttvar: 0.0,
            timeout: SYN_TIMEOUT.clamp(min_timeout, max_timeout),
            min_timeout,
            max_timeout,
            backoffs: 0,
        }
    }

    /// Seed from the handshake latency.
    ///
    /// One sample is noisy, so the smoothed RTT starts at a multiple of it and
    /// the deviation at half of that.
    pub fn seed(&mut self, handshake: Duration) {
        let sample_ms = handshake.as_secs_f64() * 1000.0 * f64::from(HANDSHAKE_RTT_SCALE);
        self.srtt = sample_ms;
        self.rttvar = sample_ms / 2.0;
        self.backoffs = 0;
        self.recompute();
    }

    /// Fold in a new round-trip sample and clear any backoff.
    pub fn update(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;
        self.rttvar = (1.0 - constants::RTTVAR_BETA) * self.rttvar
            + constants::RTTVAR_BETA * (self.srtt - sample_ms).abs();
        self.srtt = (1.0 - constants::SRTT_ALPHA) * self.srtt + constants::SRTT_ALPHA * sample_ms;
        self.backoffs = 0;
        self.recompute();
    }

    /// Double the timeout after an expiry (capped).
    ///
    /// Returns the new timeout.
    pub fn backoff(&mut self) -> Duration {
        self.backoffs = self.backoffs.saturating_add(1);
        self.timeout = self.timeout.saturating_mul(2).min(self.max_timeout);
        self.timeout
    }

    /// Current smoothed RTT.
    pub fn srtt(&self) -> Duration {
        ms_to_duration(self.srtt)
    }

    /// Current RTT deviation.
    pub fn rttvar(&self) -> Duration {
        ms_to_duration(self.rttvar)
    }

    /// Current timeout interval.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Consecutive backoffs since the last sample.
    pub fn backoffs(&self) -> u32 {
        self.backoffs
    }

    fn recompute(&mut self) {
        let timeout_ms = self.srtt + constants::RTO_K * self.rttvar;
        self.timeout = ms_to_duration(timeout_ms).clamp(self.min_timeout, self.max_timeout);
    }
}

fn ms_to_duration(ms: f64) -> Duration {
    Duration::from_nanos((ms.max(0.0) * 1_000_000.0).round() as u64)
}
