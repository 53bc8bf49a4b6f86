//! Sender state machine.
//!
//! ```text
//! StartConnection ──SYN──► AwaitSynAck ──SYN-ACK──► SendWindow ◄──────┐
//!        ▲                      │                      │              │
//!        └────── timeout ───────┘                      ▼              │
//!                                                   AwaitAck ── ACK / timeout / 3 dup
//!                                                      │ all acked
//!                                                      ▼
//!                            Done ◄──FIN-ACK── AwaitFinAck ◄──► SendFin
//! ```
//!
//! Every round resends the whole window from the acknowledged base
//! (go-back-N). Retry counts for SYN and FIN are bounded; exhausting either
//! ends the run with an error.

use std::io::{self, Read, Seek, SeekFrom};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::window::CongestionWindow;
use super::{SenderConfig, SenderReport};
use crate::core::constants::{DUP_ACK_THRESHOLD, MAX_PAYLOAD};
use crate::core::{Poll, SenderError, StateMachine};
use crate::transport::seq::{self, SeqNum};
use crate::transport::{
    DatagramChannel, Incoming, Packet, PacketChannel, PacketKind, RttEstimator, TransportError,
    RECV_BUFFER_SIZE,
};

/// Sender connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// The next SYN goes out.
    StartConnection,
    /// Waiting for the SYN-ACK.
    AwaitSynAck {
        /// When the last SYN was sent.
        sent_at: Instant,
        /// When the SYN is resent.
        deadline: Instant,
    },
    /// The window is (re)sent from the acknowledged base.
    SendWindow,
    /// Waiting for a cumulative ACK.
    AwaitAck {
        /// When the first packet of the round went out.
        round_start: Instant,
        /// Retransmission deadline.
        deadline: Instant,
    },
    /// The next FIN goes out.
    SendFin,
    /// Waiting for the FIN-ACK.
    AwaitFinAck {
        /// When the FIN is resent.
        deadline: Instant,
    },
    /// Terminal.
    Done,
}

/// Sending end of a transfer.
pub struct Sender<C: DatagramChannel, R: Read + Seek> {
    config: SenderConfig,
    channel: Option<C>,
    source: Option<R>,
    state: SenderState,
    window: CongestionWindow,
    rtt: RttEstimator,
    /// Oldest unacknowledged sequence number.
    base: SeqNum,
    /// Source offset of `base`.
    base_offset: u64,
    /// Bytes this run transfers.
    total: u64,
    /// Highest source offset ever sent.
    high_sent: u64,
    /// Source read position.
    cursor: u64,
    dup_acks: u32,
    report: SenderReport,
    error: Option<SenderError>,
    recv_buf: Box<[u8]>,
    chunk: Box<[u8]>,
}

impl<C: DatagramChannel, R: Read + Seek> Sender<C, R> {
    /// Create a sender for the first `bytes_to_transfer` bytes of `source`
    /// over an already-connected `channel`.
    ///
    /// `bytes_to_transfer` is clamped to the length of the source.
    pub fn new(
        config: SenderConfig,
        channel: C,
        mut source: R,
        bytes_to_transfer: u64,
    ) -> Result<Self, SenderError> {
        let len = source.seek(SeekFrom::End(0)).map_err(SenderError::Source)?;
        source.seek(SeekFrom::Start(0)).map_err(SenderError::Source)?;

        let total = bytes_to_transfer.min(len);
        if total < bytes_to_transfer {
            warn!(
                requested = bytes_to_transfer,
                available = len,
                "source shorter than requested, sending what is there"
            );
        }

        Ok(Self {
            window: CongestionWindow::new(config.initial_window, config.max_window),
            rtt: RttEstimator::with_bounds(config.min_rto, config.max_rto),
            base: config.isn,
            config,
            channel: Some(channel),
            source: Some(source),
            state: SenderState::StartConnection,
            base_offset: 0,
            total,
            high_sent: 0,
            cursor: 0,
            dup_acks: 0,
            report: SenderReport::default(),
            error: None,
            recv_buf: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
            chunk: vec![0u8; MAX_PAYLOAD].into_boxed_slice(),
        })
    }

    /// Current state.
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Statistics so far.
    pub fn report(&self) -> &SenderReport {
        &self.report
    }

    /// Congestion window.
    pub fn window(&self) -> &CongestionWindow {
        &self.window
    }

    /// RTT estimator.
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Oldest unacknowledged sequence number.
    pub fn base(&self) -> SeqNum {
        self.base
    }

    /// Bytes this run transfers (after clamping to the source length).
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes not yet acknowledged.
    pub fn bytes_left(&self) -> u64 {
        self.total - self.base_offset
    }

    fn channel(&mut self) -> Result<&mut C, TransportError> {
        self.channel.as_mut().ok_or(TransportError::Closed)
    }

    fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        let channel = self.channel.as_mut().ok_or(TransportError::Closed)?;
        channel.recv_packet(&mut self.recv_buf)
    }

    /// Receive while the receiver may be unreachable (not listening yet, or
    /// gone after its linger): ICMP refusals read as silence.
    fn recv_tolerant(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.recv() {
            Err(err) if err.is_peer_gone() => {
                debug!(%err, "receiver not reachable");
                Ok(None)
            }
            other => other,
        }
    }

    /// Send where an ICMP refusal counts as a lost datagram.
    fn send_tolerant(&mut self, packet: &Packet) -> Result<(), TransportError> {
        match self.send(packet) {
            Err(err) if err.is_peer_gone() => {
                debug!(%err, "receiver not reachable, packet lost");
                Ok(())
            }
            other => other,
        }
    }

    fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        trace!(
            kind = ?packet.kind(),
            seq = packet.seq_or_ack,
            len = packet.payload.len(),
            "send"
        );
        self.channel()?.send_packet(packet)
    }

    fn set_state(&mut self, state: SenderState) {
        trace!(from = ?self.state, to = ?state, "sender transition");
        self.state = state;
    }

    fn after_progress(&self) -> SenderState {
        if self.bytes_left() == 0 {
            SenderState::SendFin
        } else {
            SenderState::SendWindow
        }
    }

    fn step(&mut self, now: Instant) -> Result<Poll, SenderError> {
        match self.state {
            SenderState::StartConnection => self.start_connection(now),
            SenderState::AwaitSynAck { sent_at, deadline } => {
                self.await_syn_ack(now, sent_at, deadline)
            }
            SenderState::SendWindow => self.send_window(now),
            SenderState::AwaitAck {
                round_start,
                deadline,
            } => self.await_ack(now, round_start, deadline),
            SenderState::SendFin => self.send_fin(now),
            SenderState::AwaitFinAck { deadline } => self.await_fin_ack(now, deadline),
            SenderState::Done => Ok(Poll::Done),
        }
    }

    fn start_connection(&mut self, now: Instant) -> Result<Poll, SenderError> {
        if self.report.syn_attempts >= self.config.max_syn_attempts {
            warn!(attempts = self.report.syn_attempts, "no SYN-ACK, giving up");
            return Err(SenderError::HandshakeTimeout {
                attempts: self.report.syn_attempts,
            });
        }

        self.send_tolerant(&Packet::syn(self.config.isn))?;
        self.report.syn_attempts += 1;
        debug!(
            attempt = self.report.syn_attempts,
            isn = self.config.isn,
            "SYN sent"
        );
        self.set_state(SenderState::AwaitSynAck {
            sent_at: now,
            deadline: now + self.config.syn_timeout,
        });
        Ok(Poll::Progress)
    }

    fn await_syn_ack(
        &mut self,
        now: Instant,
        sent_at: Instant,
        deadline: Instant,
    ) -> Result<Poll, SenderError> {
        match self.recv_tolerant()? {
            Some(Incoming::Packet(packet, _))
                if packet.kind() == PacketKind::SynAck && packet.seq_or_ack == self.config.isn =>
            {
                let latency = now.saturating_duration_since(sent_at);
                self.rtt.seed(latency);
                self.window.reset();
                self.report.handshake_rtt = Some(latency);
                info!(
                    ?latency,
                    rto = ?self.rtt.timeout(),
                    bytes = self.total,
                    "connected"
                );
                let next = self.after_progress();
                self.set_state(next);
                Ok(Poll::Progress)
            }
            Some(_) => Ok(Poll::Progress),
            None if now >= deadline => {
                warn!(attempt = self.report.syn_attempts, "SYN-ACK timed out");
                self.set_state(SenderState::StartConnection);
                Ok(Poll::Progress)
            }
            None => Ok(Poll::idle_until(deadline)),
        }
    }

    fn send_window(&mut self, now: Instant) -> Result<Poll, SenderError> {
        let bytes_left = self.bytes_left();
        if bytes_left == 0 {
            self.set_state(SenderState::SendFin);
            return Ok(Poll::Progress);
        }

        let size = self.window.size(bytes_left);
        let base_offset = self.base_offset;
        if self.cursor != base_offset {
            self.source()?
                .seek(SeekFrom::Start(base_offset))
                .map_err(SenderError::Source)?;
            self.cursor = base_offset;
        }

        let mut offset = 0;
        while offset < size {
            let len = (size - offset).min(MAX_PAYLOAD);
            self.read_chunk(len)?;

            let seq = seq::advance(self.base, offset);
            let packet = Packet::data(seq, &self.chunk[..len]);
            self.send(&packet)?;

            self.report.data_packets += 1;
            if self.base_offset + (offset as u64) < self.high_sent {
                self.report.retransmitted_packets += 1;
            }
            offset += len;
        }

        self.high_sent = self.high_sent.max(self.base_offset + size as u64);
        self.report.rounds += 1;
        debug!(
            base = self.base,
            window = self.window.units(),
            bytes = size,
            rto = ?self.rtt.timeout(),
            "window sent"
        );
        self.set_state(SenderState::AwaitAck {
            round_start: now,
            deadline: now + self.rtt.timeout(),
        });
        Ok(Poll::Progress)
    }

    fn await_ack(
        &mut self,
        now: Instant,
        round_start: Instant,
        deadline: Instant,
    ) -> Result<Poll, SenderError> {
        let packet = match self.recv()? {
            Some(Incoming::Packet(packet, _)) => packet,
            Some(Incoming::Malformed(err)) => {
                trace!(%err, "malformed datagram dropped");
                return Ok(Poll::Progress);
            }
            None if now >= deadline => {
                self.on_timeout();
                return Ok(Poll::Progress);
            }
            None => return Ok(Poll::idle_until(deadline)),
        };

        if packet.kind() != PacketKind::Data || !packet.payload.is_empty() {
            trace!(kind = ?packet.kind(), "ignoring non-ACK packet");
            return Ok(Poll::Progress);
        }

        let ack = packet.seq_or_ack;
        // An ACK may cover bytes from an earlier, wider round.
        let outstanding = self.high_sent - self.base_offset;
        let window_end = seq::advance(self.base, outstanding as usize);
        if outstanding > 0 && seq::in_range(ack, self.base.wrapping_add(1), window_end) {
            self.on_new_ack(ack, now.saturating_duration_since(round_start));
        } else if ack == self.base {
            self.on_duplicate_ack();
        } else {
            trace!(ack, base = self.base, "ACK outside window ignored");
        }
        Ok(Poll::Progress)
    }

    fn on_new_ack(&mut self, ack: SeqNum, sample: Duration) {
        let acked = seq::distance(self.base, ack);
        self.base = ack;
        self.base_offset += u64::from(acked);
        self.window.grow();
        self.rtt.update(sample);
        self.dup_acks = 0;
        debug!(
            ack,
            acked,
            left = self.bytes_left(),
            window = self.window.units(),
            ?sample,
            "ACK"
        );
        let next = self.after_progress();
        self.set_state(next);
    }

    fn on_duplicate_ack(&mut self) {
        self.dup_acks += 1;
        self.report.duplicate_acks += 1;
        trace!(ack = self.base, count = self.dup_acks, "duplicate ACK");

        if self.dup_acks >= DUP_ACK_THRESHOLD {
            self.window.halve();
            self.dup_acks = 0;
            self.report.fast_retransmits += 1;
            debug!(
                base = self.base,
                window = self.window.units(),
                "triple duplicate ACK, halving window and retransmitting"
            );
            self.set_state(SenderState::SendWindow);
        }
    }

    fn on_timeout(&mut self) {
        self.window.quarter();
        let rto = self.rtt.backoff();
        self.dup_acks = 0;
        self.report.timeouts += 1;
        warn!(
            base = self.base,
            window = self.window.units(),
            ?rto,
            "retransmission timeout"
        );
        self.set_state(SenderState::SendWindow);
    }

    fn send_fin(&mut self, now: Instant) -> Result<Poll, SenderError> {
        if self.report.fin_attempts >= self.config.max_fin_attempts {
            warn!(attempts = self.report.fin_attempts, "no FIN-ACK, giving up");
            return Err(SenderError::TeardownTimeout {
                attempts: self.report.fin_attempts,
            });
        }

        self.send_tolerant(&Packet::fin(self.base))?;
        self.report.fin_attempts += 1;
        debug!(attempt = self.report.fin_attempts, seq = self.base, "FIN sent");
        self.set_state(SenderState::AwaitFinAck {
            deadline: now + self.config.fin_timeout,
        });
        Ok(Poll::Progress)
    }

    fn await_fin_ack(&mut self, now: Instant, deadline: Instant) -> Result<Poll, SenderError> {
        match self.recv_tolerant()? {
            Some(Incoming::Packet(packet, _))
                if packet.kind() == PacketKind::FinAck && packet.seq_or_ack == self.base =>
            {
                info!(
                    bytes = self.base_offset,
                    rounds = self.report.rounds,
                    packets = self.report.data_packets,
                    "transfer complete"
                );
                self.complete();
                Ok(Poll::Done)
            }
            Some(_) => Ok(Poll::Progress),
            None if now >= deadline => {
                warn!(attempt = self.report.fin_attempts, "FIN-ACK timed out");
                self.set_state(SenderState::SendFin);
                Ok(Poll::Progress)
            }
            None => Ok(Poll::idle_until(deadline)),
        }
    }

    fn source(&mut self) -> Result<&mut R, SenderError> {
        self.source
            .as_mut()
            .ok_or(SenderError::Transport(TransportError::Closed))
    }

    fn read_chunk(&mut self, len: usize) -> Result<(), SenderError> {
        let source = self
            .source
            .as_mut()
            .ok_or(SenderError::Transport(TransportError::Closed))?;
        source
            .read_exact(&mut self.chunk[..len])
            .map_err(|err| match err.kind() {
                io::ErrorKind::UnexpectedEof => SenderError::Source(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "source ended before the announced length",
                )),
                _ => SenderError::Source(err),
            })?;
        self.cursor += len as u64;
        Ok(())
    }

    fn finalize_report(&mut self) {
        self.report.bytes_acked = self.base_offset;
        self.report.final_window = self.window.units();
        self.report.smoothed_rtt = self.rtt.srtt();
    }

    fn complete(&mut self) {
        self.set_state(SenderState::Done);
        self.close();
    }

    fn fail(&mut self, err: SenderError) {
        warn!(%err, state = ?self.state, "sender failed");
        self.error = Some(err);
        self.set_state(SenderState::Done);
        self.close();
    }
}

impl<C: DatagramChannel, R: Read + Seek> StateMachine for Sender<C, R> {
    type Report = SenderReport;
    type Error = SenderError;

    fn poll(&mut self, now: Instant) -> Poll {
        match self.step(now) {
            Ok(poll) => poll,
            Err(err) => {
                self.fail(err);
                Poll::Done
            }
        }
    }

    fn close(&mut self) {
        if self.state != SenderState::Done {
            self.state = SenderState::Done;
            if self.error.is_none() {
                self.error = Some(SenderError::Aborted);
            }
        }

        if self.source.take().is_some() {
            self.finalize_report();
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    fn finish(mut self) -> Result<SenderReport, SenderError> {
        self.close();
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(std::mem::take(&mut self.report)),
        }
    }
}

impl<C: DatagramChannel, R: Read + Seek> Drop for Sender<C, R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: DatagramChannel, R: Read + Seek> std::fmt::Debug for Sender<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("state", &self.state)
            .field("base", &self.base)
            .field("bytes_left", &self.bytes_left())
            .field("window", &self.window.units())
            .finish()
    }
}
