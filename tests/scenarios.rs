//! End-to-end transfers over the simulated network with a virtual clock.

use std::cell::RefCell;
use std::io::{self, Cursor, Write};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use udpxfer::core::constants::MAX_PAYLOAD;
use udpxfer::prelude::*;
use udpxfer::transport::sim::SimStats;

const SENDER: &str = "10.0.0.1:40000";
const RECEIVER: &str = "10.0.0.2:9000";

/// Sink the test can still read after the receiver is consumed.
#[derive(Clone, Default)]
struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

struct Outcome {
    sender: std::result::Result<SenderReport, SenderError>,
    receiver: std::result::Result<ReceiverReport, ReceiverError>,
    output: Vec<u8>,
    network: SimNetwork,
    elapsed: Duration,
}

impl Outcome {
    fn sender(&self) -> &SenderReport {
        self.sender.as_ref().expect("sender failed")
    }

    fn receiver(&self) -> &ReceiverReport {
        self.receiver.as_ref().expect("receiver failed")
    }

    fn stats(&self) -> SimStats {
        self.network.stats()
    }
}

fn deadline(poll: Poll) -> Option<Instant> {
    match poll {
        Poll::Idle { deadline } => deadline,
        _ => None,
    }
}

type FileSender = Sender<SimChannel, Cursor<Vec<u8>>>;

/// Run one transfer to completion, jumping the clock to the next armed timer
/// whenever both ends are idle.
fn transfer(
    plan: FaultPlan,
    config: SenderConfig,
    input: &[u8],
    bytes_to_transfer: u64,
) -> Outcome {
    transfer_with(plan, config, input, bytes_to_transfer, |_, _| {})
}

/// Like [`transfer`], calling `after_send` with the network and the sender
/// after every sender step.
fn transfer_with(
    plan: FaultPlan,
    config: SenderConfig,
    input: &[u8],
    bytes_to_transfer: u64,
    mut after_send: impl FnMut(&SimNetwork, &FileSender),
) -> Outcome {
    let network = SimNetwork::with_faults(plan);
    let sink = SharedSink::default();

    let mut channel = network.channel(addr(SENDER));
    channel.connect_to(addr(RECEIVER)).unwrap();
    let mut sender =
        Sender::new(config, channel, Cursor::new(input.to_vec()), bytes_to_transfer).unwrap();
    let mut receiver = Receiver::new(
        ReceiverConfig::default(),
        network.channel(addr(RECEIVER)),
        sink.clone(),
    );

    let start = Instant::now();
    let mut now = start;
    for _ in 0..5_000_000 {
        let s = sender.poll(now);
        after_send(&network, &sender);
        let r = receiver.poll(now);
        match (s, r) {
            (Poll::Done, Poll::Done) => {
                let output = sink.0.borrow().clone();
                return Outcome {
                    sender: sender.finish(),
                    receiver: receiver.finish(),
                    output,
                    network,
                    elapsed: now - start,
                };
            }
            (Poll::Progress, _) | (_, Poll::Progress) => {}
            _ => {
                now = [deadline(s), deadline(r)]
                    .into_iter()
                    .flatten()
                    .min()
                    .expect("both ends idle without a timer");
            }
        }
    }
    panic!("transfer did not finish");
}

fn window(units: u32) -> SenderConfig {
    SenderConfigBuilder::new()
        .initial_window(units)
        .build()
        .unwrap()
}

#[test]
fn test_lossless_single_round() {
    let input = payload(10_000);
    let out = transfer(FaultPlan::new(), window(7), &input, 10_000);

    assert_eq!(out.output, input);
    assert_eq!(out.sender().syn_attempts, 1);
    assert_eq!(out.sender().rounds, 1);
    assert_eq!(out.sender().fin_attempts, 1);
    assert_eq!(out.sender().data_packets, 7);
    assert_eq!(out.sender().timeouts, 0);
    assert_eq!(out.sender().bytes_acked, 10_000);

    assert_eq!(out.network.sent(Traffic::Syn), 1);
    assert_eq!(out.network.sent(Traffic::SynAck), 1);
    assert_eq!(out.network.sent(Traffic::Fin), 1);
    assert_eq!(out.network.sent(Traffic::FinAck), 1);
    assert_eq!(out.network.sent(Traffic::Data), 7);

    assert_eq!(out.receiver().bytes_delivered, 10_000);
    assert_eq!(out.receiver().flushes, 1);
    assert_eq!(out.receiver().duplicates, 0);
}

#[test]
fn test_slow_start_from_one_unit() {
    let input = payload(50_000);
    let out = transfer(FaultPlan::new(), SenderConfig::default(), &input, 50_000);

    assert_eq!(out.output, input);
    assert!(out.sender().rounds > 1);
    assert_eq!(out.sender().timeouts, 0);
    assert!(out.sender().final_window > 1);
}

#[test]
fn test_single_packet_loss() {
    let input = payload(20_000);
    let minimum = input.len().div_ceil(MAX_PAYLOAD) as u64;
    let out = transfer(
        FaultPlan::new().drop_nth(Traffic::Data, 3),
        SenderConfig::default(),
        &input,
        20_000,
    );

    assert_eq!(out.output, input);
    assert!(out.sender().data_packets > minimum);
    assert!(out.sender().retransmitted_packets >= 1);
    assert_eq!(out.stats().dropped, 1);
}

#[test]
fn test_first_packet_loss_recovers_by_timeout() {
    let input = payload(8_000);
    let out = transfer(
        FaultPlan::new().drop_nth(Traffic::Data, 1),
        SenderConfig::default(),
        &input,
        8_000,
    );

    assert_eq!(out.output, input);
    assert!(out.sender().timeouts >= 1);
    assert!(out.sender().retransmitted_packets >= 1);
}

#[test]
fn test_lost_first_packet_of_wide_window() {
    // the receiver buffers the rest of the round, then acks past the
    // shrunken retransmission window
    let input = payload(20_000);
    let out = transfer(
        FaultPlan::new().drop_nth(Traffic::Data, 1),
        window(8),
        &input,
        20_000,
    );

    assert_eq!(out.output, input);
    assert_eq!(out.sender().bytes_acked, 20_000);
    assert_eq!(out.sender().timeouts, 1);
}

#[test]
fn test_gap_filled_after_fast_retransmit() {
    let input = payload(20_000);
    let mut injected = false;
    let out = transfer_with(
        FaultPlan::new().drop_nth(Traffic::Data, 1),
        window(8),
        &input,
        20_000,
        |network, sender| {
            // two extra duplicates make the receiver's own gap ACK the third
            if !injected && sender.report().rounds == 1 {
                injected = true;
                for _ in 0..2 {
                    network.inject(addr(RECEIVER), addr(SENDER), &Packet::ack(0).encode());
                }
            }
        },
    );

    assert_eq!(out.output, input);
    assert_eq!(out.sender().fast_retransmits, 1);
    assert_eq!(out.sender().bytes_acked, 20_000);
}

#[test]
fn test_fault_matrix_delivers_exact_bytes() {
    let input = payload(25_000);
    for isn in [0, u32::MAX - 4_000] {
        for units in [1, 3, 8, 16] {
            let plans = [
                FaultPlan::new().drop_every(Traffic::Data, 3),
                FaultPlan::new()
                    .drop_every(Traffic::Data, 5)
                    .drop_every(Traffic::Ack, 2),
                FaultPlan::new()
                    .delay_nth(Traffic::Data, 2, 4)
                    .drop_nth(Traffic::Data, 6),
            ];
            for plan in plans {
                let config = SenderConfigBuilder::new()
                    .isn(isn)
                    .initial_window(units)
                    .build()
                    .unwrap();
                let out = transfer(plan, config, &input, 25_000);

                assert_eq!(out.output, input, "isn {isn}, window {units}");
                assert_eq!(out.sender().bytes_acked, 25_000);
            }
        }
    }
}

#[test]
fn test_reordered_delivery_flushes_once() {
    // packets arrive 2, 1, 3
    let input = payload(3 * MAX_PAYLOAD);
    let out = transfer(
        FaultPlan::new().delay_nth(Traffic::Data, 1, 1),
        window(3),
        &input,
        input.len() as u64,
    );

    assert_eq!(out.output, input);
    assert_eq!(out.sender().rounds, 1);
    assert_eq!(out.receiver().flushes, 1);
    assert_eq!(out.receiver().acks_sent, 1);
}

#[test]
fn test_duplicated_packets_are_harmless() {
    let input = payload(30_000);
    let out = transfer(
        FaultPlan::new()
            .duplicate_nth(Traffic::Data, 2)
            .duplicate_nth(Traffic::Data, 5)
            .duplicate_nth(Traffic::Ack, 1)
            .duplicate_nth(Traffic::SynAck, 1),
        window(2),
        &input,
        30_000,
    );

    assert_eq!(out.output, input);
    assert!(out.receiver().duplicates >= 2);
    assert_eq!(out.receiver().bytes_delivered, 30_000);
}

#[test]
fn test_sequence_numbers_wrap() {
    let input = payload(60_000);
    let config = SenderConfigBuilder::new()
        .isn(u32::MAX - 3_000)
        .initial_window(2)
        .build()
        .unwrap();
    let out = transfer(
        FaultPlan::new().drop_nth(Traffic::Data, 4),
        config,
        &input,
        60_000,
    );

    assert_eq!(out.output, input);
    assert_eq!(out.sender().bytes_acked, 60_000);
}

#[test]
fn test_heavy_loss_still_delivers() {
    let input = payload(100_000);
    let out = transfer(
        FaultPlan::new()
            .drop_every(Traffic::Data, 3)
            .drop_every(Traffic::Ack, 4),
        SenderConfig::default(),
        &input,
        100_000,
    );

    assert_eq!(out.output, input);
    assert!(out.sender().timeouts > 0);
}

#[test]
fn test_partial_file() {
    let input = payload(12_000);
    let out = transfer(FaultPlan::new(), window(4), &input, 5_000);

    assert_eq!(out.output, &input[..5_000]);
    assert_eq!(out.sender().bytes_acked, 5_000);
}

#[test]
fn test_request_larger_than_source() {
    let input = payload(3_000);
    let out = transfer(FaultPlan::new(), window(4), &input, 1_000_000);

    assert_eq!(out.output, input);
}

#[test]
fn test_zero_byte_transfer() {
    let out = transfer(FaultPlan::new(), SenderConfig::default(), &payload(100), 0);

    assert!(out.output.is_empty());
    assert_eq!(out.sender().rounds, 0);
    assert_eq!(out.sender().fin_attempts, 1);
    assert_eq!(out.network.sent(Traffic::Data), 0);
    assert_eq!(out.receiver().bytes_delivered, 0);
}

#[test]
fn test_lost_fin_ack_is_resent() {
    let input = payload(2_000);
    let out = transfer(
        FaultPlan::new().drop_nth(Traffic::FinAck, 1),
        window(2),
        &input,
        2_000,
    );

    assert_eq!(out.output, input);
    assert_eq!(out.sender().fin_attempts, 2);
    assert_eq!(out.receiver().fin_acks_sent, 2);
    // receiver lingered past the retransmitted FIN
    assert!(out.elapsed >= Duration::from_secs(7));
}

#[test]
fn test_lost_syn_is_retried() {
    let input = payload(1_000);
    let out = transfer(
        FaultPlan::new().drop_nth(Traffic::Syn, 1),
        SenderConfig::default(),
        &input,
        1_000,
    );

    assert_eq!(out.output, input);
    assert_eq!(out.sender().syn_attempts, 2);
}

#[test]
fn test_handshake_exhaustion_reports_error() {
    let network = SimNetwork::new();
    let mut channel = network.channel(addr(SENDER));
    channel.connect_to(addr(RECEIVER)).unwrap();
    let mut sender = Sender::new(
        SenderConfig::default(),
        channel,
        Cursor::new(payload(10)),
        10,
    )
    .unwrap();

    let mut now = Instant::now();
    loop {
        match sender.poll(now) {
            Poll::Done => break,
            Poll::Progress => {}
            Poll::Idle { deadline } => now = deadline.expect("SYN timer armed"),
        }
    }

    assert!(matches!(
        sender.finish(),
        Err(SenderError::HandshakeTimeout { attempts: 5 })
    ));
    assert_eq!(network.sent(Traffic::Syn), 5);
}
