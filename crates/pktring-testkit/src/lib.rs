//! pktring-testkit: conformance scenarios for ring backends.
//!
//! Provides a `RingFactory` trait and shared scenarios that every region
//! backend (memfd, anonymous) must pass.
//!
//! # Usage
//!
//! Each backend implements `RingFactory` and runs the shared scenarios:
//!
//! ```ignore
//! use pktring_testkit::{RingFactory, TestError};
//!
//! struct MemfdFactory;
//!
//! impl RingFactory for MemfdFactory {
//!     fn create(config: RingConfig) -> Result<(ShmRing, RingProducer), TestError> {
//!         ShmRing::create(config).map_err(|e| TestError::Setup(e.to_string()))
//!     }
//! }
//!
//! #[test]
//! fn memfd_single_packet_round_trip() {
//!     pktring_testkit::run_single_packet_round_trip::<MemfdFactory>();
//! }
//! ```
//!
//! All scenarios use a 4096-byte data region (`ring_order = 12`, the
//! smallest page-legal ring) so exact cursor positions stay easy to read.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pktring::{
    Doorbell, Notifier, PushOutcome, Record, RingConfig, RingProducer, ShmRing,
};

/// Error type for scenario setup.
#[derive(Debug)]
pub enum TestError {
    /// Ring creation failed.
    Setup(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Setup(msg) => write!(f, "setup error: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}

/// Factory trait for creating rings under test.
pub trait RingFactory {
    /// Create a fresh ring with the given configuration.
    fn create(config: RingConfig) -> Result<(ShmRing, RingProducer), TestError>;
}

/// A notifier that counts signals instead of waking anyone.
#[derive(Default)]
pub struct CountingNotifier(AtomicUsize);

impl CountingNotifier {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Notifier for CountingNotifier {
    fn signal(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn small_config() -> RingConfig {
    RingConfig {
        ring_order: 12,
        hi_pct: 50,
        lo_pct: 25,
    }
}

fn create<F: RingFactory>(config: RingConfig) -> (ShmRing, RingProducer) {
    match F::create(config) {
        Ok(pair) => pair,
        Err(e) => panic!("ring setup failed: {}", e),
    }
}

/// One packet in, the same packet out, cursors meet, no signal below hi.
pub fn run_single_packet_round_trip<F: RingFactory>() {
    let (ring, mut producer) = create::<F>(small_config());
    let notifier = Arc::new(CountingNotifier::default());
    ring.bind_notifier(Some(notifier.clone())).unwrap();

    assert_eq!(
        producer.push_at(&[0xAA, 0xBB], 1000).unwrap(),
        PushOutcome::Written
    );
    assert_eq!(ring.stats().head, 18);

    let mut consumer = ring.attach_consumer(None).unwrap();
    match consumer.try_next().unwrap().unwrap() {
        Record::Packet { ts_ns, payload } => {
            assert_eq!(ts_ns, 1000);
            assert_eq!(payload, vec![0xAA, 0xBB]);
        }
        other => panic!("expected packet, got {:?}", other),
    }

    let stats = ring.stats();
    assert_eq!(stats.head, 18);
    assert_eq!(stats.tail, 18);
    assert_eq!(stats.records, 1);
    assert_eq!(stats.bytes, 18);
    assert_eq!(notifier.count(), 0, "18 bytes is far below the hi watermark");
}

/// A record whose header straddles the end of the data region decodes
/// correctly.
pub fn run_wrapped_header_decode<F: RingFactory>() {
    let (ring, mut producer) = create::<F>(small_config());
    let mut consumer = ring.attach_consumer(None).unwrap();

    // Two records of 2044 bytes park the cursors at 4088, eight bytes shy
    // of the boundary, so the next 16-byte header wraps.
    for seed in [0x11u8, 0x22] {
        producer.push_at(&vec![seed; 2028], seed as u64).unwrap();
        assert!(matches!(
            consumer.try_next().unwrap().unwrap(),
            Record::Packet { .. }
        ));
    }
    assert_eq!(ring.stats().tail, 4088);

    let payload: Vec<u8> = (0..100u8).collect();
    assert_eq!(
        producer.push_at(&payload, 4242).unwrap(),
        PushOutcome::Written
    );

    match consumer.try_next().unwrap().unwrap() {
        Record::Packet { ts_ns, payload: got } => {
            assert_eq!(ts_ns, 4242);
            assert_eq!(got, payload);
        }
        other => panic!("expected packet, got {:?}", other),
    }
    assert_eq!(ring.stats().tail, 4088 + 116);
}

/// Four failed reservations coalesce into one DROP record with `lost = 4`,
/// immediately preceding the packet that ends the burst.
pub fn run_drop_burst<F: RingFactory>() {
    let (ring, mut producer) = create::<F>(small_config());

    // Fill to 4056 used; 40 bytes free.
    producer.push_at(&vec![0u8; 4040], 1).unwrap();

    for i in 0..4u64 {
        assert_eq!(
            producer.push_at(&[0u8; 40], 10 + i).unwrap(),
            PushOutcome::Dropped
        );
    }
    assert_eq!(ring.stats().drops, 4);

    // Drain, then push again: the combined drop+packet reservation
    // succeeds and the consumer sees the summary first.
    let mut consumer = ring.attach_consumer(None).unwrap();
    assert!(matches!(
        consumer.try_next().unwrap().unwrap(),
        Record::Packet { .. }
    ));
    assert_eq!(producer.push_at(&[9u8; 40], 99).unwrap(), PushOutcome::Written);

    match consumer.try_next().unwrap().unwrap() {
        Record::DropSummary {
            lost,
            start_ns,
            end_ns,
            ..
        } => {
            assert_eq!(lost, 4);
            assert_eq!(start_ns, 10, "burst opened at the first failure");
            assert_eq!(end_ns, 99, "burst closed by the successful push");
        }
        other => panic!("expected drop summary, got {:?}", other),
    }
    match consumer.try_next().unwrap().unwrap() {
        Record::Packet { payload, .. } => assert_eq!(payload, vec![9u8; 40]),
        other => panic!("expected packet, got {:?}", other),
    }
    assert!(consumer.try_next().unwrap().is_none());
}

/// Hysteresis: one signal per rising hi crossing, silent re-arm at lo.
pub fn run_watermark_hysteresis<F: RingFactory>() {
    let (ring, mut producer) = create::<F>(small_config());
    let notifier = Arc::new(CountingNotifier::default());
    ring.bind_notifier(Some(notifier.clone())).unwrap();
    let mut consumer = ring.attach_consumer(None).unwrap();

    // hi = 50% of 4096 = 2048 bytes, lo = 25% = 1024 bytes.

    // used 2016 (49%): below hi, no signal.
    producer.push_at(&vec![0u8; 2000], 1).unwrap();
    assert_eq!(notifier.count(), 0);

    // used 2144 (52%): rising edge, one signal.
    producer.push_at(&vec![0u8; 112], 2).unwrap();
    assert_eq!(notifier.count(), 1);

    // used 3144 (76%): still above hi, edge-triggered means silence.
    producer.push_at(&vec![0u8; 984], 3).unwrap();
    assert_eq!(notifier.count(), 1);

    // Drain the 2016-byte record: used 1128 (27%), above lo, still armed
    // against re-signal and no falling transition yet.
    assert!(matches!(
        consumer.try_next().unwrap().unwrap(),
        Record::Packet { .. }
    ));
    assert_eq!(notifier.count(), 1);

    // Drain the 128-byte record: used 1000 (24%), falling edge re-arms
    // silently.
    assert!(matches!(
        consumer.try_next().unwrap().unwrap(),
        Record::Packet { .. }
    ));
    assert_eq!(notifier.count(), 1);

    // used 2096 (51%): a fresh rising edge, second signal.
    producer.push_at(&vec![0u8; 1080], 4).unwrap();
    assert_eq!(notifier.count(), 2);

    // Level-triggered poll agrees with the raw occupancy, not the edge
    // state.
    assert!(ring.poll_readable());
}

/// Records summing to exactly `S` leave the ring full, not empty.
pub fn run_exact_fill<F: RingFactory>() {
    let (ring, mut producer) = create::<F>(small_config());

    // 128 records of 32 bytes: exactly 4096.
    for i in 0..128u64 {
        assert_eq!(
            producer.push_at(&[i as u8; 16], i).unwrap(),
            PushOutcome::Written
        );
    }

    let stats = ring.stats();
    assert_eq!(stats.head - stats.tail, 4096, "exact fill is full, not empty");
    assert_eq!(producer.try_reserve(1), None);
    assert_eq!(producer.push_at(&[0u8; 16], 999).unwrap(), PushOutcome::Dropped);

    // Drain everything; the pending burst flushes ahead of the next packet.
    let mut consumer = ring.attach_consumer(None).unwrap();
    for i in 0..128u64 {
        match consumer.try_next().unwrap().unwrap() {
            Record::Packet { ts_ns, payload } => {
                assert_eq!(ts_ns, i);
                assert_eq!(payload, vec![i as u8; 16]);
            }
            other => panic!("expected packet, got {:?}", other),
        }
    }
    assert!(consumer.try_next().unwrap().is_none());

    producer.push_at(&[7u8; 16], 1000).unwrap();
    match consumer.try_next().unwrap().unwrap() {
        Record::DropSummary { lost, .. } => assert_eq!(lost, 1),
        other => panic!("expected drop summary, got {:?}", other),
    }
}

/// Reset while idle zeroes cursors, stats and coalescer state.
pub fn run_reset_idle<F: RingFactory>() {
    let (ring, mut producer) = create::<F>(small_config());

    for i in 0..10u64 {
        producer.push_at(&[i as u8; 16], i).unwrap();
    }
    {
        let mut consumer = ring.attach_consumer(None).unwrap();
        for _ in 0..5 {
            assert!(consumer.try_next().unwrap().is_some());
        }
        // Consumer detaches here; reset requires an idle ring.
    }

    ring.reset().unwrap();

    let stats = ring.stats();
    assert_eq!(stats.head, 0);
    assert_eq!(stats.tail, 0);
    assert_eq!(stats.records, 0);
    assert_eq!(stats.bytes, 0);
    assert_eq!(stats.drops, 0);
    assert!(!ring.region().ctrl().dropping());

    // The ring keeps working from zero.
    let mut consumer = ring.attach_consumer(None).unwrap();
    assert!(consumer.try_next().unwrap().is_none());
    producer.push_at(b"fresh", 1).unwrap();
    assert!(matches!(
        consumer.try_next().unwrap().unwrap(),
        Record::Packet { .. }
    ));
}

/// Doorbell wakeup: a waiting consumer task is woken by the rising edge and
/// recovers the exact payload sequence.
pub async fn run_doorbell_wakeup<F: RingFactory>() {
    // hi = lo = 0: every commit into an empty ring is a rising edge, so
    // each batch wakes the consumer.
    let (ring, mut producer) = create::<F>(RingConfig {
        ring_order: 12,
        hi_pct: 0,
        lo_pct: 0,
    });
    let doorbell = Arc::new(Doorbell::create().unwrap());
    ring.bind_notifier(Some(doorbell.clone())).unwrap();
    let mut consumer = ring.attach_consumer(Some(doorbell)).unwrap();

    let expected: Vec<Vec<u8>> = (0..50u8).map(|i| vec![i; 1 + i as usize]).collect();

    let consumer_task = tokio::spawn(async move {
        let mut received = Vec::new();
        while received.len() < 50 {
            match consumer.next().await.unwrap() {
                Record::Packet { payload, .. } => received.push(payload),
                Record::DropSummary { .. } => panic!("nothing should drop here"),
                Record::Unknown { .. } => panic!("unexpected record type"),
            }
        }
        received
    });

    for (i, payload) in expected.iter().enumerate() {
        assert_eq!(
            producer.push_at(payload, i as u64).unwrap(),
            PushOutcome::Written
        );
        if i % 7 == 0 {
            // Let the consumer fall behind and catch up on a wakeup.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    let received = tokio::time::timeout(Duration::from_secs(5), consumer_task)
        .await
        .expect("consumer timed out")
        .expect("consumer panicked");
    assert_eq!(received, expected);
}
