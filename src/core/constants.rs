//! Protocol constants.
//!
//! Wire sizes are fixed by the protocol and MUST NOT be changed; timer and
//! window values are defaults that the configuration types can override.

use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Size of the control byte.
pub const CONTROL_SIZE: usize = 1;

/// Size of the sequence / acknowledgment field (32-bit, big-endian).
pub const SEQ_FIELD_SIZE: usize = 4;

/// Size of the payload length field (16-bit, big-endian).
pub const LENGTH_FIELD_SIZE: usize = 2;

/// Packet header size (control + seq/ack + payload length).
pub const HEADER_SIZE: usize = CONTROL_SIZE + SEQ_FIELD_SIZE + LENGTH_FIELD_SIZE;

/// Maximum payload bytes carried by a single packet.
pub const MAX_PAYLOAD: usize = 1450;

/// Largest datagram either endpoint ever sends.
pub const MAX_DATAGRAM: usize = HEADER_SIZE + MAX_PAYLOAD;

// =============================================================================
// CONTROL BITS
// =============================================================================

/// Connection request.
pub const CONTROL_SYN: u8 = 0x80;

/// Connection request acknowledgment.
pub const CONTROL_SYN_ACK: u8 = 0x40;

/// Teardown request.
pub const CONTROL_FIN: u8 = 0x02;

/// Teardown acknowledgment.
pub const CONTROL_FIN_ACK: u8 = 0x01;

/// Bits 2-5 are reserved and must be zero.
pub const CONTROL_RESERVED_MASK: u8 = 0x3C;

// =============================================================================
// SEQUENCE SPACE
// =============================================================================

/// Half of the 32-bit sequence space. No window may exceed this.
pub const SEQ_HALF_SPACE: u32 = 1 << 31;

// =============================================================================
// WINDOWS
// =============================================================================

/// Receive window capacity in payload units.
pub const RECEIVE_WINDOW_UNITS: u32 = 128;

/// Receive window capacity in bytes.
pub const RECEIVE_WINDOW_BYTES: usize = RECEIVE_WINDOW_UNITS as usize * MAX_PAYLOAD;

/// Default congestion window at connection start, in payload units.
pub const INITIAL_WINDOW_UNITS: u32 = 1;

/// Default congestion window ceiling, in payload units.
pub const MAX_WINDOW_UNITS: u32 = 64;

/// Default congestion window ceiling, in bytes.
pub const MAX_WINDOW_SIZE: usize = MAX_WINDOW_UNITS as usize * MAX_PAYLOAD;

/// Duplicate ACKs that trigger a window halving.
pub const DUP_ACK_THRESHOLD: u32 = 3;

const _: () = assert!(RECEIVE_WINDOW_BYTES <= SEQ_HALF_SPACE as usize);
const _: () = assert!(MAX_WINDOW_SIZE <= RECEIVE_WINDOW_BYTES);

// =============================================================================
// TIMERS - SENDER
// =============================================================================

/// How long the sender waits for a SYN-ACK before resending the SYN.
pub const SYN_TIMEOUT: Duration = Duration::from_millis(2000);

/// SYN transmissions before the handshake is abandoned.
pub const MAX_SYN_ATTEMPTS: u32 = 5;

/// How long the sender waits for a FIN-ACK before resending the FIN.
pub const FIN_TIMEOUT: Duration = Duration::from_millis(2000);

/// FIN transmissions before teardown is abandoned.
pub const MAX_FIN_ATTEMPTS: u32 = 5;

/// Handshake latency multiplier used to seed the RTT estimator.
pub const HANDSHAKE_RTT_SCALE: u32 = 2;

/// Lower bound on the retransmission timeout.
pub const MIN_RTO: Duration = Duration::from_millis(50);

/// Upper bound on the retransmission timeout.
pub const MAX_RTO: Duration = Duration::from_secs(60);

// =============================================================================
// TIMERS - RECEIVER
// =============================================================================

/// Short timer collecting a pipeline of DATA packets before one cumulative ACK.
pub const FLUSH_DELAY: Duration = Duration::from_millis(5);

/// Long timer spent answering retransmitted FINs after the FIN-ACK.
pub const FIN_LINGER: Duration = Duration::from_secs(5);

// =============================================================================
// DRIVER
// =============================================================================

/// Upper bound on a single idle sleep of the async driver.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);
