//! Packet encoding and decoding.
//!
//! Every datagram exchanged by the two endpoints is one [`Packet`]:
//!
//! ```text
//! +---------+------------------+----------------+---------------------+
//! | Control | Seq / Ack        | Payload Length | Payload             |
//! | 1 byte  | 4 bytes (BE32)   | 2 bytes (BE16) | 0..=1450 bytes      |
//! +---------+------------------+----------------+---------------------+
//! ```
//!
//! Control bits: `0x80` SYN, `0x40` SYN-ACK, `0x02` FIN, `0x01` FIN-ACK.
//! Bits 2-5 are reserved. A packet with no control bit is DATA when it
//! travels sender to receiver and a cumulative ACK when it travels back.
//!
//! Only the used payload bytes go on the wire; the header is never padded.

use thiserror::Error;

use crate::core::constants::{
    CONTROL_FIN, CONTROL_FIN_ACK, CONTROL_RESERVED_MASK, CONTROL_SYN, CONTROL_SYN_ACK,
    HEADER_SIZE, MAX_PAYLOAD,
};

/// Control byte of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ControlFlags(u8);

impl ControlFlags {
    /// No flags set (DATA or ACK).
    pub const NONE: Self = Self(0);
    /// Connection request.
    pub const SYN: Self = Self(CONTROL_SYN);
    /// Connection request acknowledgment.
    pub const SYN_ACK: Self = Self(CONTROL_SYN_ACK);
    /// Teardown request.
    pub const FIN: Self = Self(CONTROL_FIN);
    /// Teardown acknowledgment.
    pub const FIN_ACK: Self = Self(CONTROL_FIN_ACK);

    /// Create flags from a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if SYN is set.
    pub fn is_syn(self) -> bool {
        self.0 & CONTROL_SYN != 0
    }

    /// Check if SYN-ACK is set.
    pub fn is_syn_ack(self) -> bool {
        self.0 & CONTROL_SYN_ACK != 0
    }

    /// Check if FIN is set.
    pub fn is_fin(self) -> bool {
        self.0 & CONTROL_FIN != 0
    }

    /// Check if FIN-ACK is set.
    pub fn is_fin_ack(self) -> bool {
        self.0 & CONTROL_FIN_ACK != 0
    }

    /// Check that reserved bits are zero and at most one control bit is set.
    ///
    /// SYN, SYN-ACK, FIN and FIN-ACK are mutually exclusive: a response is
    /// never combined with a request in the same packet.
    pub fn is_valid(self) -> bool {
        self.0 & CONTROL_RESERVED_MASK == 0 && self.0.count_ones() <= 1
    }
}

/// What a decoded packet means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Connection request.
    Syn,
    /// Connection request acknowledgment.
    SynAck,
    /// Teardown request.
    Fin,
    /// Teardown acknowledgment.
    FinAck,
    /// Data (sender to receiver) or cumulative ACK (receiver to sender).
    Data,
}

/// A protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Control byte.
    pub control: ControlFlags,
    /// Sequence number of the first payload byte, or the cumulative ACK.
    pub seq_or_ack: u32,
    /// Payload bytes (at most [`MAX_PAYLOAD`]).
    pub payload: Vec<u8>,
}

impl Packet {
    fn control(control: ControlFlags, seq_or_ack: u32) -> Self {
        Self {
            control,
            seq_or_ack,
            payload: Vec::new(),
        }
    }

    /// SYN announcing the sender's initial sequence number.
    pub fn syn(isn: u32) -> Self {
        Self::control(ControlFlags::SYN, isn)
    }

    /// SYN-ACK echoing the initial sequence number.
    pub fn syn_ack(isn: u32) -> Self {
        Self::control(ControlFlags::SYN_ACK, isn)
    }

    /// FIN carrying the sequence number after the last data byte.
    pub fn fin(seq: u32) -> Self {
        Self::control(ControlFlags::FIN, seq)
    }

    /// FIN-ACK echoing the FIN's sequence number.
    pub fn fin_ack(seq: u32) -> Self {
        Self::control(ControlFlags::FIN_ACK, seq)
    }

    /// Cumulative ACK carrying the next expected sequence number.
    pub fn ack(next_expected: u32) -> Self {
        Self::control(ControlFlags::NONE, next_expected)
    }

    /// DATA packet. `payload` must not exceed [`MAX_PAYLOAD`] bytes.
    pub fn data(seq: u32, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD, "payload exceeds MAX_PAYLOAD");
        Self {
            control: ControlFlags::NONE,
            seq_or_ack: seq,
            payload: payload.to_vec(),
        }
    }

    /// Classify the packet by its control byte.
    pub fn kind(&self) -> PacketKind {
        let c = self.control;
        if c.is_syn() {
            PacketKind::Syn
        } else if c.is_syn_ack() {
            PacketKind::SynAck
        } else if c.is_fin() {
            PacketKind::Fin
        } else if c.is_fin_ack() {
            PacketKind::FinAck
        } else {
            PacketKind::Data
        }
    }

    /// Payload length as carried in the header.
    pub fn payload_len(&self) -> u16 {
        self.payload.len() as u16
    }

    /// Encoded size: header plus used payload bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize into a newly allocated buffer of exactly
    /// [`encoded_len`](Self::encoded_len) bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.control.as_byte());
        buf.extend_from_slice(&self.seq_or_ack.to_be_bytes());
        buf.extend_from_slice(&self.payload_len().to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a packet from a received datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let control = ControlFlags::from_byte(bytes[0]);
        if !control.is_valid() {
            return Err(PacketError::InvalidControl(bytes[0]));
        }

        let seq_or_ack = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let payload_len = u16::from_be_bytes([bytes[5], bytes[6]]) as usize;

        if payload_len > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload_len));
        }

        let actual = bytes.len() - HEADER_SIZE;
        if payload_len != actual {
            return Err(PacketError::LengthMismatch {
                expected: payload_len,
                actual,
            });
        }

        if control != ControlFlags::NONE && payload_len > 0 {
            return Err(PacketError::ControlWithPayload(bytes[0]));
        }

        Ok(Self {
            control,
            seq_or_ack,
            payload: bytes[HEADER_SIZE..].to_vec(),
        })
    }
}

/// Errors that can occur during packet parsing.
///
/// Every variant means "malformed": the datagram is dropped without any
/// state change or response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Datagram shorter than the header.
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Header size.
        expected: usize,
        /// Datagram size.
        actual: usize,
    },

    /// Reserved bits set or several control bits combined.
    #[error("invalid control byte: 0x{0:02x}")]
    InvalidControl(u8),

    /// Header claims more than [`MAX_PAYLOAD`] bytes.
    #[error("payload length {0} exceeds maximum")]
    PayloadTooLarge(usize),

    /// Header payload length disagrees with the datagram size.
    #[error("payload length mismatch: header says {expected}, but {actual} bytes follow")]
    LengthMismatch {
        /// Length from the header.
        expected: usize,
        /// Bytes after the header.
        actual: usize,
    },

    /// A control packet carried payload bytes.
    #[error("control packet 0x{0:02x} carries payload")]
    ControlWithPayload(u8),
}
