//! Transport layer.
//!
//! Everything both roles share below the state machines:
//!
//! - **Wire format**: [`Packet`], [`ControlFlags`] and the checked [`Packet::decode`]
//! - **Sequence space**: wraparound-safe [`in_range`] and [`is_duplicate_or_old`]
//! - **RTT estimation**: [`RttEstimator`]
//! - **Datagram channels**: the [`DatagramChannel`] contract, [`UdpChannel`]
//!   over a non-blocking UDP socket, and the scripted [`SimNetwork`]
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │     Sender / Receiver machines       │
//! ├──────────────────────────────────────┤
//! │  frame · seq · timing   (this layer) │
//! ├──────────────────────────────────────┤
//! │  DatagramChannel: UDP or simulated   │
//! └──────────────────────────────────────┘
//! ```

mod error;
mod frame;
pub mod seq;
pub mod sim;
mod socket;
mod timing;

pub use error::*;
pub use frame::*;
pub use seq::{in_range, is_duplicate_or_old, SeqNum};
pub use sim::{FaultPlan, SimChannel, SimNetwork, Traffic};
pub use socket::*;
pub use timing::{constants as timing_constants, RttEstimator};
