//! Receiver state machine.
//!
//! ```text
//! AwaitingConnection ──SYN──► AwaitingPacket ◄──timer──┐
//!                               │   │ DATA             │
//!                               │   └────────► AwaitingPipelineFlush
//!                               │ FIN                  │ FIN
//!                               ▼                      │
//!                         SendingFinAck ◄──────────────┘
//!                               │  ▲ FIN
//!                               ▼  │
//!                         AwaitingFinRetry ──linger──► Done
//! ```

use std::io::Write;
use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::window::{Insert, ReceiveWindow};
use super::{ReceiverConfig, ReceiverReport};
use crate::core::constants::RECEIVE_WINDOW_BYTES;
use crate::core::{Poll, ReceiverError, StateMachine};
use crate::transport::{
    DatagramChannel, Incoming, Packet, PacketChannel, PacketError, PacketKind, SeqNum,
    TransportError, RECV_BUFFER_SIZE,
};

/// Receiver connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Waiting for a SYN from any peer.
    AwaitingConnection,
    /// Connected, no undelivered data pending a flush.
    AwaitingPacket,
    /// Collecting a pipeline of DATA until the flush timer fires.
    AwaitingPipelineFlush {
        /// When the cumulative ACK goes out.
        deadline: Instant,
    },
    /// FIN received; the FIN-ACK goes out next.
    SendingFinAck {
        /// Sequence number carried by the FIN.
        fin_seq: SeqNum,
    },
    /// FIN-ACK sent; answering retransmitted FINs until the linger ends.
    AwaitingFinRetry {
        /// End of the linger period.
        deadline: Instant,
        /// Sequence number carried by the FIN.
        fin_seq: SeqNum,
    },
    /// Terminal.
    Done,
}

/// Receiving end of a transfer.
///
/// Owns the channel and the sink. Both are released by [`close`](StateMachine::close),
/// which also runs on drop.
pub struct Receiver<C: DatagramChannel, W: Write> {
    config: ReceiverConfig,
    channel: Option<C>,
    sink: Option<W>,
    state: ReceiverState,
    window: ReceiveWindow,
    isn: Option<SeqNum>,
    report: ReceiverReport,
    error: Option<ReceiverError>,
    buf: Box<[u8]>,
}

impl<C: DatagramChannel, W: Write> Receiver<C, W> {
    /// Create a receiver waiting for a connection on `channel`.
    pub fn new(config: ReceiverConfig, channel: C, sink: W) -> Self {
        Self {
            config,
            channel: Some(channel),
            sink: Some(sink),
            state: ReceiverState::AwaitingConnection,
            window: ReceiveWindow::new(0, RECEIVE_WINDOW_BYTES),
            isn: None,
            report: ReceiverReport::default(),
            error: None,
            buf: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Statistics so far.
    pub fn report(&self) -> &ReceiverReport {
        &self.report
    }

    /// The reorder window.
    pub fn window(&self) -> &ReceiveWindow {
        &self.window
    }

    /// Next sequence number the receiver expects.
    pub fn next_expected(&self) -> SeqNum {
        self.window.next_expected()
    }

    fn channel(&mut self) -> Result<&mut C, TransportError> {
        self.channel.as_mut().ok_or(TransportError::Closed)
    }

    fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        let channel = self.channel.as_mut().ok_or(TransportError::Closed)?;
        channel.recv_packet(&mut self.buf)
    }

    /// Check that a datagram came from the connected sender.
    ///
    /// A socket can still hold datagrams from other hosts that were queued
    /// before it was connected.
    fn from_peer(&self, from: Option<SocketAddr>) -> bool {
        match (self.report.peer, from) {
            (Some(peer), Some(from)) if peer != from => {
                trace!(%from, %peer, "datagram from another host dropped");
                false
            }
            _ => true,
        }
    }

    fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        trace!(kind = ?packet.kind(), seq = packet.seq_or_ack, "send");
        self.channel()?.send_packet(packet)
    }

    fn send_ack(&mut self) -> Result<(), TransportError> {
        let ack = self.window.next_expected();
        self.send(&Packet::ack(ack))?;
        self.report.acks_sent += 1;
        Ok(())
    }

    fn send_syn_ack(&mut self, isn: SeqNum) -> Result<(), TransportError> {
        self.send(&Packet::syn_ack(isn))?;
        self.report.syn_acks_sent += 1;
        Ok(())
    }

    fn set_state(&mut self, state: ReceiverState) {
        trace!(from = ?self.state, to = ?state, "receiver transition");
        self.state = state;
    }

    /// Deliver the contiguous run (if any) and send one cumulative ACK.
    fn flush(&mut self) -> Result<(), ReceiverError> {
        if self.window.is_ready() {
            let sink = self.sink.as_mut().ok_or(TransportError::Closed)?;
            let delivered = self.window.flush_into(sink).map_err(ReceiverError::Sink)?;
            self.report.bytes_delivered += delivered as u64;
            self.report.flushes += 1;
            debug!(
                delivered,
                next_expected = self.window.next_expected(),
                pending = self.window.buffered(),
                "flushed"
            );
        } else {
            debug!(
                next_expected = self.window.next_expected(),
                pending = self.window.buffered(),
                "gap at window start, repeating ack"
            );
        }
        self.send_ack()?;
        Ok(())
    }

    fn step(&mut self, now: Instant) -> Result<Poll, ReceiverError> {
        match self.state {
            ReceiverState::AwaitingConnection => self.await_connection(),
            ReceiverState::AwaitingPacket => self.await_packet(now),
            ReceiverState::AwaitingPipelineFlush { deadline } => self.await_flush(now, deadline),
            ReceiverState::SendingFinAck { fin_seq } => self.send_fin_ack(now, fin_seq),
            ReceiverState::AwaitingFinRetry { deadline, fin_seq } => {
                self.await_fin_retry(now, deadline, fin_seq)
            }
            ReceiverState::Done => Ok(Poll::Done),
        }
    }

    fn await_connection(&mut self) -> Result<Poll, ReceiverError> {
        let Some(incoming) = self.recv()? else {
            return Ok(Poll::Idle { deadline: None });
        };

        match incoming {
            Incoming::Packet(packet, from) if packet.kind() == PacketKind::Syn => {
                if let Some(peer) = from {
                    self.channel()?.connect_to(peer)?;
                    self.report.peer = Some(peer);
                }
                let isn = packet.seq_or_ack;
                self.isn = Some(isn);
                self.window.reset(isn);
                self.send_syn_ack(isn)?;
                info!(peer = ?from, isn, "connection accepted");
                self.set_state(ReceiverState::AwaitingPacket);
            }
            Incoming::Packet(packet, from) => {
                trace!(kind = ?packet.kind(), ?from, "ignoring packet before handshake");
            }
            Incoming::Malformed(err) => self.malformed(err),
        }
        Ok(Poll::Progress)
    }

    fn await_packet(&mut self, now: Instant) -> Result<Poll, ReceiverError> {
        let Some(incoming) = self.recv()? else {
            return Ok(Poll::Idle { deadline: None });
        };

        let packet = match incoming {
            Incoming::Packet(packet, from) if self.from_peer(from) => packet,
            Incoming::Packet(..) => return Ok(Poll::Progress),
            Incoming::Malformed(err) => {
                self.malformed(err);
                return Ok(Poll::Progress);
            }
        };

        match packet.kind() {
            PacketKind::Syn => self.repeat_syn_ack(packet.seq_or_ack)?,
            PacketKind::Data if packet.payload.is_empty() => {
                trace!(seq = packet.seq_or_ack, "empty data, acking");
                self.send_ack()?;
            }
            PacketKind::Data => match self.accept_data(&packet) {
                Insert::Duplicate => self.send_ack()?,
                Insert::OutOfWindow => {}
                Insert::Buffered { .. } => {
                    let deadline = now + self.config.flush_delay;
                    self.set_state(ReceiverState::AwaitingPipelineFlush { deadline });
                }
            },
            PacketKind::Fin => self.fin_received(packet.seq_or_ack),
            PacketKind::SynAck | PacketKind::FinAck => {
                trace!(kind = ?packet.kind(), "ignoring response packet");
            }
        }
        Ok(Poll::Progress)
    }

    fn await_flush(&mut self, now: Instant, deadline: Instant) -> Result<Poll, ReceiverError> {
        if now >= deadline {
            self.flush()?;
            self.set_state(ReceiverState::AwaitingPacket);
            return Ok(Poll::Progress);
        }

        let Some(incoming) = self.recv()? else {
            return Ok(Poll::idle_until(deadline));
        };

        let packet = match incoming {
            Incoming::Packet(packet, from) if self.from_peer(from) => packet,
            Incoming::Packet(..) => return Ok(Poll::Progress),
            Incoming::Malformed(err) => {
                self.malformed(err);
                return Ok(Poll::Progress);
            }
        };

        match packet.kind() {
            PacketKind::Syn => self.repeat_syn_ack(packet.seq_or_ack)?,
            // The pending flush ACK answers probes and stale duplicates.
            PacketKind::Data if packet.payload.is_empty() => {}
            PacketKind::Data => {
                self.accept_data(&packet);
            }
            PacketKind::Fin => {
                self.flush()?;
                self.fin_received(packet.seq_or_ack);
            }
            PacketKind::SynAck | PacketKind::FinAck => {}
        }
        Ok(Poll::Progress)
    }

    fn send_fin_ack(&mut self, now: Instant, fin_seq: SeqNum) -> Result<Poll, ReceiverError> {
        self.send(&Packet::fin_ack(fin_seq))?;
        self.report.fin_acks_sent += 1;
        if self.report.fin_acks_sent == 1 {
            info!(
                bytes = self.report.bytes_delivered,
                packets = self.report.data_packets,
                "transfer complete, lingering for retransmitted FIN"
            );
        }
        let deadline = now + self.config.fin_linger;
        self.set_state(ReceiverState::AwaitingFinRetry { deadline, fin_seq });
        Ok(Poll::Progress)
    }

    fn await_fin_retry(
        &mut self,
        now: Instant,
        deadline: Instant,
        fin_seq: SeqNum,
    ) -> Result<Poll, ReceiverError> {
        if now >= deadline {
            debug!("linger elapsed, sender has departed");
            self.complete();
            return Ok(Poll::Done);
        }

        match self.recv()? {
            None => Ok(Poll::idle_until(deadline)),
            Some(Incoming::Packet(packet, from))
                if packet.kind() == PacketKind::Fin && self.from_peer(from) =>
            {
                debug!(seq = packet.seq_or_ack, "FIN retransmitted, resending FIN-ACK");
                self.set_state(ReceiverState::SendingFinAck { fin_seq });
                Ok(Poll::Progress)
            }
            Some(Incoming::Packet(..)) => Ok(Poll::Progress),
            Some(Incoming::Malformed(err)) => {
                self.malformed(err);
                Ok(Poll::Progress)
            }
        }
    }

    fn accept_data(&mut self, packet: &Packet) -> Insert {
        self.report.data_packets += 1;
        let outcome = self.window.insert(packet.seq_or_ack, &packet.payload);
        match outcome {
            Insert::Buffered {
                new_bytes,
                truncated,
            } => {
                if new_bytes == 0 {
                    self.report.duplicates += 1;
                }
                if truncated > 0 {
                    self.report.out_of_window += 1;
                }
                trace!(
                    seq = packet.seq_or_ack,
                    len = packet.payload.len(),
                    new_bytes,
                    low_water = self.window.low_water(),
                    high_water = self.window.high_water(),
                    "buffered"
                );
            }
            Insert::Duplicate => {
                self.report.duplicates += 1;
                trace!(seq = packet.seq_or_ack, "duplicate data");
            }
            Insert::OutOfWindow => {
                self.report.out_of_window += 1;
                trace!(
                    seq = packet.seq_or_ack,
                    next_expected = self.window.next_expected(),
                    "data beyond window dropped"
                );
            }
        }
        outcome
    }

    fn repeat_syn_ack(&mut self, seq: SeqNum) -> Result<(), TransportError> {
        debug!(seq, "repeated SYN, re-acknowledging");
        self.send_syn_ack(self.isn.unwrap_or(seq))
    }

    fn fin_received(&mut self, fin_seq: SeqNum) {
        if fin_seq != self.window.next_expected() {
            warn!(
                fin_seq,
                next_expected = self.window.next_expected(),
                "FIN does not match delivered stream"
            );
        }
        debug!(fin_seq, "FIN received");
        self.set_state(ReceiverState::SendingFinAck { fin_seq });
    }

    fn malformed(&mut self, err: PacketError) {
        self.report.malformed += 1;
        trace!(%err, "malformed datagram dropped");
    }

    fn complete(&mut self) {
        self.set_state(ReceiverState::Done);
        self.close();
    }

    fn fail(&mut self, err: ReceiverError) {
        warn!(%err, state = ?self.state, "receiver failed");
        self.error = Some(err);
        self.set_state(ReceiverState::Done);
        self.close();
    }
}

impl<C: DatagramChannel, W: Write> StateMachine for Receiver<C, W> {
    type Report = ReceiverReport;
    type Error = ReceiverError;

    fn poll(&mut self, now: Instant) -> Poll {
        let lingering = matches!(self.state, ReceiverState::AwaitingFinRetry { .. });
        match self.step(now) {
            Ok(poll) => poll,
            Err(err) if lingering => {
                debug!(%err, "transport error while lingering, finishing");
                self.complete();
                Poll::Done
            }
            Err(err) => {
                self.fail(err);
                Poll::Done
            }
        }
    }

    fn close(&mut self) {
        if self.state != ReceiverState::Done {
            self.state = ReceiverState::Done;
            if self.error.is_none() {
                self.error = Some(ReceiverError::Aborted);
            }
        }

        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.flush() {
                warn!(%err, "failed to flush destination");
                if self.error.is_none() {
                    self.error = Some(ReceiverError::Sink(err));
                }
            }
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    fn finish(mut self) -> Result<ReceiverReport, ReceiverError> {
        self.close();
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(std::mem::take(&mut self.report)),
        }
    }
}

impl<C: DatagramChannel, W: Write> Drop for Receiver<C, W> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: DatagramChannel, W: Write> std::fmt::Debug for Receiver<C, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("state", &self.state)
            .field("next_expected", &self.window.next_expected())
            .field("closed", &self.channel.is_none())
            .finish()
    }
}
