use halflink_core::codec::FrameCodec;
use halflink_core::transmitter::{LossyTransport, RecordingTransport};
use halflink_core::{
    CrcEngine, CrcVariant, DataMeta, DropReason, LinkConfig, LinkNode, MemoryLink, ReceivePump,
    TransmitOutcome, TransmitReport, TxState, UdpTransport, PREAMBLE,
};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod timing {
    pub struct RttStats {
        pub mean_ms: f64,
        pub p50_ms: f64,
        pub max_ms: f64,
    }

    impl RttStats {
        pub fn compute(samples: &[f64]) -> Self {
            let mut sorted = samples.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

            Self {
                mean_ms: samples.iter().sum::<f64>() / samples.len() as f64,
                p50_ms: sorted[sorted.len() / 2],
                max_ms: sorted[sorted.len() - 1],
            }
        }

        pub fn report(&self) -> String {
            format!(
                "ACK ROUND TRIP:\n  Mean: {:.3}ms\n  P50: {:.3}ms\n  Max: {:.3}ms",
                self.mean_ms, self.p50_ms, self.max_ms
            )
        }
    }
}

type Delivered = Arc<Mutex<Vec<(Bytes, DataMeta)>>>;
type Reports = Arc<Mutex<Vec<TransmitReport>>>;

struct Link {
    a: Arc<LinkNode>,
    b: Arc<LinkNode>,
    delivered_a: Delivered,
    delivered_b: Delivered,
    reports_a: Reports,
    _pumps: (ReceivePump, ReceivePump),
}

fn config(address: u8, peer: u8) -> LinkConfig {
    LinkConfig::new(address, peer)
        .with_payload_len(8)
        .with_wait_time_s(0.3)
        .with_crc_variant(CrcVariant::Zlib)
}

fn observe(node: &LinkNode) -> (Delivered, Reports) {
    let delivered: Delivered = Arc::default();
    let reports: Reports = Arc::default();

    let sink = Arc::clone(&delivered);
    node.on_payload_received(move |payload, meta| sink.lock().push((payload, meta)));
    let sink = Arc::clone(&reports);
    node.on_transmit_report(move |report| sink.lock().push(*report));

    (delivered, reports)
}

fn memory_link(config_a: LinkConfig, config_b: LinkConfig, loss: f64) -> Link {
    let (end_a, end_b) = MemoryLink::duplex();

    let a = Arc::new(
        LinkNode::new(config_a, Arc::new(LossyTransport::new(end_a.sender, loss))).unwrap(),
    );
    let b = Arc::new(
        LinkNode::new(config_b, Arc::new(LossyTransport::new(end_b.sender, loss))).unwrap(),
    );
    let (delivered_a, reports_a) = observe(&a);
    let (delivered_b, _) = observe(&b);

    let pump_a = ReceivePump::spawn(Arc::clone(&a), end_a.receiver).unwrap();
    let pump_b = ReceivePump::spawn(Arc::clone(&b), end_b.receiver).unwrap();
    a.start().unwrap();
    b.start().unwrap();

    Link {
        a,
        b,
        delivered_a,
        delivered_b,
        reports_a,
        _pumps: (pump_a, pump_b),
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn recording_node(config: LinkConfig) -> (LinkNode, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    (LinkNode::new(config, transport.clone()).unwrap(), transport)
}

#[test]
fn test_end_to_end_delivery() {
    let link = memory_link(config(1, 2), config(2, 1), 0.0);
    let submitted = Instant::now();

    link.a.submit(b"ABCDEFGH").unwrap();

    assert!(wait_until(Duration::from_millis(300), || link.reports_a.lock().len() == 1));
    assert!(submitted.elapsed() <= Duration::from_millis(300));
    assert_eq!(
        link.reports_a.lock()[0],
        TransmitReport {
            seq: 0,
            attempts: 1,
            outcome: TransmitOutcome::Acked
        }
    );
    assert_eq!(link.a.engine().state(), TxState::Acked);

    assert_eq!(
        link.delivered_b.lock().as_slice(),
        &[(Bytes::from_static(b"ABCDEFGH"), DataMeta { crc_ok: true, seq: 0 })]
    );
    assert!(link.delivered_a.lock().is_empty());

    println!("✓ End-to-end: payload delivered with seq=0 and acked on first attempt");
}

#[test]
fn test_bidirectional_traffic() {
    let link = memory_link(config(1, 2), config(2, 1), 0.0);

    link.a.submit(b"from a").unwrap();
    link.b.submit(b"from b").unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        link.a.engine().stats().acked == 1 && link.b.engine().stats().acked == 1
    }));
    assert_eq!(&link.delivered_b.lock()[0].0[..], b"from a\0\0");
    assert_eq!(&link.delivered_a.lock()[0].0[..], b"from b\0\0");
}

#[test]
fn test_sequence_wraparound() {
    let link = memory_link(config(1, 2), config(2, 1), 0.0);
    const FRAMES: usize = 260;

    for i in 0..FRAMES {
        link.a.submit(&(i as u32).to_be_bytes()).unwrap();
    }

    assert!(wait_until(Duration::from_secs(30), || {
        link.a.engine().stats().acked == FRAMES as u64
    }));
    assert_eq!(link.a.engine().next_sequence(), (FRAMES % 256) as u8);

    let seqs: Vec<u8> = link.delivered_b.lock().iter().map(|(_, m)| m.seq).collect();
    let expected: Vec<u8> = (0..FRAMES).map(|i| (i % 256) as u8).collect();
    assert_eq!(seqs, expected);

    println!("✓ Sequence wraparound: {} frames, counter at {}", FRAMES, FRAMES % 256);
}

#[test]
fn test_stop_and_wait_exclusivity() {
    let (node, transport) = recording_node(
        config(1, 2)
            .with_max_retries(1)
            .with_wait_time(Duration::from_millis(30)),
    );
    node.start().unwrap();

    for payload in [b"first", b"secnd", b"third"] {
        node.submit(payload).unwrap();
    }

    assert!(wait_until(Duration::from_secs(3), || node.engine().stats().given_up == 3));

    // Every retry of a frame precedes the first attempt of the next.
    let seqs: Vec<u8> = transport.frames().iter().map(|f| f[PREAMBLE.len() + 2]).collect();
    assert_eq!(seqs, vec![0, 0, 1, 1, 2, 2]);
    node.stop();
}

#[test]
fn test_retry_bound() {
    let (node, transport) = recording_node(
        config(1, 2)
            .with_max_retries(4)
            .with_wait_time(Duration::from_millis(20)),
    );
    let (_, reports) = observe(&node);
    node.start().unwrap();
    node.submit(b"lost").unwrap();

    assert!(wait_until(Duration::from_secs(2), || reports.lock().len() == 1));
    assert_eq!(transport.count(), 5);
    assert_eq!(reports.lock()[0].outcome, TransmitOutcome::GivenUp);
    assert_eq!(reports.lock()[0].attempts, 5);
    assert_eq!(node.engine().next_sequence(), 1);
    assert_eq!(node.engine().state(), TxState::GivenUp);

    println!("✓ Retry bound: {} transmissions before giving up", transport.count());
}

#[test]
fn test_priority_guard_delays_data() {
    let guard = Duration::from_millis(100);
    let poll = Duration::from_millis(10);
    let (node, transport) = recording_node(
        config(1, 2)
            .with_guard_interval_ms(guard.as_millis() as u32)
            .with_guard_poll_interval(poll),
    );
    node.start().unwrap();

    let signalled = Instant::now();
    node.engine().on_local_ack_in_flight();
    node.submit(b"data").unwrap();

    assert!(wait_until(Duration::from_secs(1), || transport.count() >= 1));
    let delay = transport.sent_at()[0].duration_since(signalled);

    assert!(delay >= guard, "sent after {:?}, guard {:?}", delay, guard);
    // Scheduler slack on top of one polling step.
    assert!(delay < guard + poll + Duration::from_millis(90), "sent after {:?}", delay);
    node.stop();
}

#[test]
fn test_received_data_raises_guard() {
    let (node, transport) = recording_node(config(2, 1).with_guard_interval_ms(120));
    node.start().unwrap();

    let peer = FrameCodec::new(8, CrcEngine::new(CrcVariant::Zlib));
    let started = Instant::now();
    node.receive(peer.build_data_frame(2, 0, b"incoming").unwrap());
    node.submit(b"outgoing").unwrap();

    assert!(wait_until(Duration::from_secs(1), || transport.count() >= 2));
    let frames = transport.frames();
    let times = transport.sent_at();

    assert_eq!(frames[0][PREAMBLE.len() + 1], 0x02, "ACK goes first");
    assert_eq!(frames[1][PREAMBLE.len() + 1], 0x01);
    assert!(times[1].duration_since(started) >= Duration::from_millis(120));
    node.stop();
}

#[test]
fn test_address_filtering() {
    let (node, transport) = recording_node(config(2, 1));
    let (delivered, _) = observe(&node);
    let diagnostics = node.diagnostics();
    let peer = FrameCodec::new(8, CrcEngine::new(CrcVariant::Zlib));

    node.receive(peer.build_data_frame(5, 0, b"not-mine").unwrap());

    assert!(delivered.lock().is_empty());
    assert_eq!(transport.count(), 0);
    let reasons: Vec<DropReason> = diagnostics.try_iter().map(|d| d.reason).collect();
    assert!(!reasons.is_empty());
    assert!(reasons.iter().all(|r| *r == DropReason::AddrMismatch));

    node.set_address(5);
    node.receive(peer.build_data_frame(5, 0, b"now-mine").unwrap());
    assert_eq!(&delivered.lock()[0].0[..], b"now-mine");
    assert_eq!(transport.count(), 1);
}

#[test]
fn test_noisy_misaligned_stream() {
    let (node, transport) = recording_node(config(2, 1));
    let (delivered, _) = observe(&node);
    let peer = FrameCodec::new(8, CrcEngine::new(CrcVariant::Zlib));
    let mut rng = rand::thread_rng();

    for seq in 0..20u8 {
        let mut buf: Vec<u8> = (0..rng.gen_range(0..64)).map(|_| rng.gen()).collect();
        buf.extend_from_slice(&peer.build_data_frame(2, seq, b"payload!").unwrap());
        node.receive(buf);
    }

    let seqs: Vec<u8> = delivered.lock().iter().map(|(_, m)| m.seq).collect();
    assert_eq!(seqs, (0..20).collect::<Vec<u8>>());
    assert_eq!(transport.count(), 20);
}

#[test]
fn test_corrupted_frame_not_acked() {
    let (node, transport) = recording_node(config(2, 1));
    let (delivered, _) = observe(&node);
    let diagnostics = node.diagnostics();
    let peer = FrameCodec::new(8, CrcEngine::new(CrcVariant::Zlib));

    let mut frame = peer.build_data_frame(2, 3, b"ABCDEFGH").unwrap().to_vec();
    let idx = PREAMBLE.len() + 5;
    frame[idx] ^= 0x04;
    node.receive(frame);

    assert!(delivered.lock().is_empty());
    assert_eq!(transport.count(), 0);
    assert_eq!(diagnostics.try_recv().unwrap().reason, DropReason::CrcFail);
}

#[test]
fn test_duplicate_frames_acked_each_time() {
    let (node, transport) = recording_node(config(2, 1));
    let (delivered, _) = observe(&node);
    let frame = FrameCodec::new(8, CrcEngine::new(CrcVariant::Zlib))
        .build_data_frame(2, 9, b"ABCDEFGH")
        .unwrap();

    node.receive(frame.clone());
    node.receive(frame);

    assert_eq!(delivered.lock().len(), 2);
    let frames = transport.frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], frames[1]);
    assert_eq!(frames[0][PREAMBLE.len() + 2], 10);
}

#[test]
fn test_lossy_link_recovers() {
    let fast = |a, p| {
        config(a, p)
            .with_wait_time(Duration::from_millis(40))
            .with_max_retries(40)
            .with_guard_interval_ms(5)
    };
    let link = memory_link(fast(1, 2), fast(2, 1), 0.3);
    let mut rtts = Vec::new();

    for i in 0..10u8 {
        let started = Instant::now();
        link.a.submit(&[b'm', i]).unwrap();
        assert!(wait_until(Duration::from_secs(10), || {
            link.reports_a.lock().len() == i as usize + 1
        }));
        rtts.push(started.elapsed().as_secs_f64() * 1000.0);
    }

    assert!(link.reports_a.lock().iter().all(|r| r.outcome == TransmitOutcome::Acked));

    let mut payloads: Vec<Bytes> = link.delivered_b.lock().iter().map(|(p, _)| p.clone()).collect();
    payloads.dedup();
    assert_eq!(payloads.len(), 10);

    let stats = timing::RttStats::compute(&rtts);
    println!("\n{}", stats.report());
    println!("✓ Lossy link: 10/10 frames acknowledged at 30% loss");
}

#[test]
fn test_udp_loopback_link() {
    let mut udp_a = UdpTransport::bind("127.0.0.1:0", "127.0.0.1:9").unwrap();
    let udp_b = UdpTransport::bind("127.0.0.1:0", udp_a.local_addr().unwrap()).unwrap();
    udp_a.set_remote(udp_b.local_addr().unwrap());

    let a = Arc::new(LinkNode::new(config(1, 2), Arc::new(udp_a.clone())).unwrap());
    let b = Arc::new(LinkNode::new(config(2, 1), Arc::new(udp_b.clone())).unwrap());
    let (_, reports) = observe(&a);
    let (delivered, _) = observe(&b);

    let _pump_a = ReceivePump::spawn(Arc::clone(&a), udp_a).unwrap();
    let _pump_b = ReceivePump::spawn(Arc::clone(&b), udp_b).unwrap();
    a.start().unwrap();
    b.start().unwrap();

    a.submit(b"udp").unwrap();
    assert!(wait_until(Duration::from_secs(3), || reports.lock().len() == 1));
    assert_eq!(reports.lock()[0].outcome, TransmitOutcome::Acked);
    assert_eq!(&delivered.lock()[0].0[..], b"udp\0\0\0\0\0");
}

#[test]
fn test_prompt_shutdown() {
    let (node, transport) = recording_node(config(1, 2).with_wait_time_s(5.0));
    node.start().unwrap();
    node.submit(b"no peer").unwrap();
    node.submit(b"queued").unwrap();
    assert!(wait_until(Duration::from_secs(1), || transport.count() == 1));

    let started = Instant::now();
    node.stop();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(!node.engine().is_running());
    assert!(node.submit(b"late").is_err());
}

#[test]
fn test_payload_size_enforced() {
    let (node, _) = recording_node(config(1, 2));
    assert!(node.submit(b"ABCDEFGH").is_ok());
    assert!(node.submit(b"ABCDEFGHI").is_err());
}
