//! Congestion window.
//!
//! Kept as a whole number of payload units so halving and quartering never
//! produce a ragged window:
//!
//! - valid new ACK: `+1` unit, capped at the maximum
//! - three duplicate ACKs: `/2`
//! - retransmission timeout: `/4`
//!
//! Neither reduction goes below one unit. The byte size actually used for a
//! round is additionally truncated to the bytes left to send.

use crate::core::constants::MAX_PAYLOAD;

/// Sender congestion window, in payload units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CongestionWindow {
    units: u32,
    initial_units: u32,
    max_units: u32,
}

impl CongestionWindow {
    /// Create a window of `initial_units`, never exceeding `max_units`.
    ///
    /// Both bounds are raised to at least one unit.
    pub fn new(initial_units: u32, max_units: u32) -> Self {
        let max_units = max_units.max(1);
        let initial_units = initial_units.clamp(1, max_units);
        Self {
            units: initial_units,
            initial_units,
            max_units,
        }
    }

    /// Current window in payload units.
    pub fn units(&self) -> u32 {
        self.units
    }

    /// Window ceiling in payload units.
    pub fn max_units(&self) -> u32 {
        self.max_units
    }

    /// Bytes the next round may put in flight.
    ///
    /// `units * MAX_PAYLOAD`, truncated to `bytes_left`.
    pub fn size(&self, bytes_left: u64) -> usize {
        let full = self.units as usize * MAX_PAYLOAD;
        usize::try_from(bytes_left).map_or(full, |left| full.min(left))
    }

    /// Back to the initial size (after the handshake).
    pub fn reset(&mut self) {
        self.units = self.initial_units;
    }

    /// Additive increase.
    pub fn grow(&mut self) {
        self.units = (self.units + 1).min(self.max_units);
    }

    /// Reduction after three duplicate ACKs.
    pub fn halve(&mut self) {
        self.units = (self.units / 2).max(1);
    }

    /// Reduction after a retransmission timeout.
    pub fn quarter(&mut self) {
        self.units = (self.units / 4).max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{MAX_WINDOW_SIZE, MAX_WINDOW_UNITS};

    #[test]
    fn test_new_clamps_bounds() {
        let window = CongestionWindow::new(0, MAX_WINDOW_UNITS);
        assert_eq!(window.units(), 1);

        let window = CongestionWindow::new(100, 8);
        assert_eq!(window.units(), 8);

        let window = CongestionWindow::new(1, 0);
        assert_eq!(window.max_units(), 1);
    }

    #[test]
    fn test_grow_caps_at_max() {
        let mut window = CongestionWindow::new(1, 3);
        window.grow();
        window.grow();
        window.grow();
        assert_eq!(window.units(), 3);
    }

    #[test]
    fn test_halve_and_quarter() {
        let mut window = CongestionWindow::new(16, 64);
        window.halve();
        assert_eq!(window.units(), 8);
        window.quarter();
        assert_eq!(window.units(), 2);
        window.quarter();
        assert_eq!(window.units(), 1);
        window.halve();
        assert_eq!(window.units(), 1);
    }

    #[test]
    fn test_size_truncated_to_bytes_left() {
        let window = CongestionWindow::new(4, 64);
        assert_eq!(window.size(1_000_000), 4 * MAX_PAYLOAD);
        assert_eq!(window.size(3000), 3000);
        assert_eq!(window.size(0), 0);
    }

    #[test]
    fn test_reset() {
        let mut window = CongestionWindow::new(3, 64);
        window.grow();
        window.quarter();
        window.reset();
        assert_eq!(window.units(), 3);
    }

    #[test]
    fn test_size_stays_within_bounds_under_any_sequence() {
        // Deterministic walk through every reduction/increase mix.
        let mut window = CongestionWindow::new(1, MAX_WINDOW_UNITS);
        let mut state: u32 = 0x2545_f491;
        for step in 0..10_000u32 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            match state % 5 {
                0 => window.halve(),
                1 => window.quarter(),
                _ => window.grow(),
            }

            let bytes_left = u64::from(step % 200_000) + 1;
            let size = window.size(bytes_left);
            assert!(size >= MAX_PAYLOAD.min(bytes_left as usize));
            assert!(size <= MAX_WINDOW_SIZE);
            assert!(size as u64 <= bytes_left);
            assert_eq!(window.size(u64::MAX) % MAX_PAYLOAD, 0);
        }
    }
}
