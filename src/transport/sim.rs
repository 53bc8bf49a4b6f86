//! Deterministic in-memory datagram network.
//!
//! [`SimNetwork`] routes datagrams between [`SimChannel`]s synchronously and
//! applies a scripted [`FaultPlan`] on the way: drop, duplicate or delay the
//! n-th packet of a given kind. Nothing here touches a clock, so a test can
//! drive both state machines with a virtual `Instant` and get the same
//! interleaving on every run.
//!
//! The network is single-threaded (`Rc<RefCell<_>>`); channels are `!Send`.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use tracing::trace;

use super::error::{TransportError, TransportResult};
use super::frame::{Packet, PacketKind};
use super::socket::DatagramChannel;

/// Packet classes a fault rule can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Traffic {
    /// DATA carrying payload (sender to receiver).
    Data,
    /// Empty DATA-shaped cumulative acknowledgment.
    Ack,
    /// Connection request.
    Syn,
    /// Connection request acknowledgment.
    SynAck,
    /// Teardown request.
    Fin,
    /// Teardown acknowledgment.
    FinAck,
    /// Anything that does not decode.
    Malformed,
}

impl Traffic {
    /// Classify an encoded datagram.
    pub fn classify(bytes: &[u8]) -> Self {
        match Packet::decode(bytes) {
            Ok(packet) => match packet.kind() {
                PacketKind::Syn => Traffic::Syn,
                PacketKind::SynAck => Traffic::SynAck,
                PacketKind::Fin => Traffic::Fin,
                PacketKind::FinAck => Traffic::FinAck,
                PacketKind::Data if packet.payload_len() == 0 => Traffic::Ack,
                PacketKind::Data => Traffic::Data,
            },
            Err(_) => Traffic::Malformed,
        }
    }
}

/// What happens to a matched datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Lose it.
    Drop,
    /// Deliver it twice.
    Duplicate,
    /// Hold it back until this many later datagrams have been delivered.
    Delay(usize),
}

/// Which occurrences of a traffic class a rule matches (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selector {
    Nth(usize),
    Every(usize),
}

impl Selector {
    fn matches(self, count: usize) -> bool {
        match self {
            Selector::Nth(n) => count == n,
            Selector::Every(n) => n > 0 && count % n == 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FaultRule {
    traffic: Traffic,
    selector: Selector,
    action: FaultAction,
}

/// Scripted faults, applied in the order rules were added (first match wins).
///
/// Occurrences are counted per traffic class across the whole run, so
/// "the 3rd DATA packet" includes retransmissions.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    rules: Vec<FaultRule>,
}

impl FaultPlan {
    /// A plan that delivers everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the `nth` datagram of `traffic`.
    pub fn drop_nth(self, traffic: Traffic, nth: usize) -> Self {
        self.rule(traffic, Selector::Nth(nth), FaultAction::Drop)
    }

    /// Drop every `n`-th datagram of `traffic`.
    pub fn drop_every(self, traffic: Traffic, n: usize) -> Self {
        self.rule(traffic, Selector::Every(n), FaultAction::Drop)
    }

    /// Deliver the `nth` datagram of `traffic` twice.
    pub fn duplicate_nth(self, traffic: Traffic, nth: usize) -> Self {
        self.rule(traffic, Selector::Nth(nth), FaultAction::Duplicate)
    }

    /// Hold the `nth` datagram of `traffic` behind `later` subsequent datagrams.
    pub fn delay_nth(self, traffic: Traffic, nth: usize, later: usize) -> Self {
        self.rule(traffic, Selector::Nth(nth), FaultAction::Delay(later))
    }

    fn rule(mut self, traffic: Traffic, selector: Selector, action: FaultAction) -> Self {
        self.rules.push(FaultRule {
            traffic,
            selector,
            action,
        });
        self
    }

    fn action_for(&self, traffic: Traffic, count: usize) -> Option<FaultAction> {
        self.rules
            .iter()
            .find(|rule| rule.traffic == traffic && rule.selector.matches(count))
            .map(|rule| rule.action)
    }
}

/// Counters for inspecting a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Datagrams placed in a receive queue (duplicates count twice).
    pub delivered: usize,
    /// Datagrams lost by a fault rule or sent to an unknown address.
    pub dropped: usize,
    /// Extra copies injected.
    pub duplicated: usize,
    /// Datagrams held back by a delay rule.
    pub delayed: usize,
}

#[derive(Debug, Clone)]
struct Datagram {
    from: SocketAddr,
    to: SocketAddr,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct Held {
    remaining: usize,
    datagram: Datagram,
}

#[derive(Debug, Default)]
struct Shared {
    queues: HashMap<SocketAddr, VecDeque<Datagram>>,
    plan: FaultPlan,
    sent: HashMap<Traffic, usize>,
    held: Vec<Held>,
    stats: SimStats,
}

impl Shared {
    fn route(&mut self, datagram: Datagram) {
        let traffic = Traffic::classify(&datagram.bytes);
        let count = {
            let counter = self.sent.entry(traffic).or_insert(0);
            *counter += 1;
            *counter
        };

        match self.plan.action_for(traffic, count) {
            Some(FaultAction::Drop) => {
                trace!(?traffic, count, "sim: dropped");
                self.stats.dropped += 1;
            }
            Some(FaultAction::Duplicate) => {
                trace!(?traffic, count, "sim: duplicated");
                self.stats.duplicated += 1;
                self.deliver(datagram.clone());
                self.deliver(datagram);
            }
            Some(FaultAction::Delay(later)) => {
                trace!(?traffic, count, later, "sim: delayed");
                self.stats.delayed += 1;
                self.held.push(Held {
                    remaining: later,
                    datagram,
                });
                self.release_ready();
            }
            None => self.deliver(datagram),
        }
    }

    fn deliver(&mut self, datagram: Datagram) {
        match self.queues.get_mut(&datagram.to) {
            Some(queue) => {
                queue.push_back(datagram);
                self.stats.delivered += 1;
            }
            None => self.stats.dropped += 1,
        }

        for held in &mut self.held {
            held.remaining = held.remaining.saturating_sub(1);
        }
        self.release_ready();
    }

    fn release_ready(&mut self) {
        while let Some(index) = self.held.iter().position(|held| held.remaining == 0) {
            let held = self.held.remove(index);
            self.deliver(held.datagram);
        }
    }
}

/// In-memory network shared by any number of [`SimChannel`]s.
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    shared: Rc<RefCell<Shared>>,
}

impl SimNetwork {
    /// Create a lossless network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a network that applies `plan`.
    pub fn with_faults(plan: FaultPlan) -> Self {
        let network = Self::new();
        network.shared.borrow_mut().plan = plan;
        network
    }

    /// Attach a channel at `addr`.
    pub fn channel(&self, addr: SocketAddr) -> SimChannel {
        self.shared.borrow_mut().queues.entry(addr).or_default();
        SimChannel {
            network: Rc::clone(&self.shared),
            local: addr,
            peer: None,
            closed: false,
        }
    }

    /// Datagrams of `traffic` handed to the network so far (before faults).
    pub fn sent(&self, traffic: Traffic) -> usize {
        self.shared.borrow().sent.get(&traffic).copied().unwrap_or(0)
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> SimStats {
        self.shared.borrow().stats.clone()
    }

    /// Deliver everything still held by delay rules.
    pub fn release_all(&self) {
        let mut shared = self.shared.borrow_mut();
        for held in &mut shared.held {
            held.remaining = 0;
        }
        shared.release_ready();
    }

    /// Inject a raw datagram, bypassing any channel.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, bytes: &[u8]) {
        self.shared.borrow_mut().deliver(Datagram {
            from,
            to,
            bytes: bytes.to_vec(),
        });
    }
}

/// Endpoint on a [`SimNetwork`].
#[derive(Debug)]
pub struct SimChannel {
    network: Rc<RefCell<Shared>>,
    local: SocketAddr,
    peer: Option<SocketAddr>,
    closed: bool,
}

impl SimChannel {
    /// Address this channel receives on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Connected peer, if any.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Check if the channel was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl DatagramChannel for SimChannel {
    fn connect_to(&mut self, peer: SocketAddr) -> TransportResult<()> {
        self.ensure_open()?;
        self.peer = Some(peer);
        Ok(())
    }

    fn send(&mut self, datagram: &[u8]) -> TransportResult<usize> {
        self.ensure_open()?;
        let to = self
            .peer
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        self.network.borrow_mut().route(Datagram {
            from: self.local,
            to,
            bytes: datagram.to_vec(),
        });
        Ok(datagram.len())
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> TransportResult<Option<(usize, Option<SocketAddr>)>> {
        self.ensure_open()?;
        let mut shared = self.network.borrow_mut();
        let Some(queue) = shared.queues.get_mut(&self.local) else {
            return Ok(None);
        };

        while let Some(datagram) = queue.pop_front() {
            if self.peer.is_some_and(|peer| peer != datagram.from) {
                continue;
            }
            let len = datagram.bytes.len().min(buf.len());
            buf[..len].copy_from_slice(&datagram.bytes[..len]);
            return Ok(Some((len, Some(datagram.from))));
        }
        Ok(None)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.network.borrow_mut().queues.remove(&self.local);
        }
    }
}
