//! Synthetic feed demo: rate-limited producer, doorbell-woken consumer.
//!
//! The producer pushes sequence-patterned packets at a fixed rate; the
//! consumer waits on the doorbell, drains records and logs packets and drop
//! summaries. Shrink the ring or raise the rate to watch bursts coalesce:
//!
//! Run with: `cargo run --example feedgen -p pktring -- --rate-hz 2000`

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pktring::{Doorbell, PushOutcome, Record, RingConfig, ShmRing};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "feedgen")]
#[command(about = "Synthetic packet feed over a pktring")]
struct Args {
    /// log2 of the data-region size in bytes.
    #[arg(long, default_value_t = 22)]
    ring_order: u32,

    /// Packets per second; 0 means as fast as possible.
    #[arg(long, default_value_t = 2000)]
    rate_hz: u32,

    /// Payload bytes per packet.
    #[arg(long, default_value_t = 256)]
    payload_len: usize,

    /// Packets to produce before shutting down.
    #[arg(long, default_value_t = 10_000)]
    count: u64,

    /// Rising notification threshold, percent of the ring.
    #[arg(long, default_value_t = 50)]
    hi_pct: u32,

    /// Re-arm threshold, percent of the ring.
    #[arg(long, default_value_t = 30)]
    lo_pct: u32,
}

/// Timestamp, sequence number, then a sequence-derived byte pattern.
fn build_payload(seq: u64, len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    if len >= 8 {
        payload[0..8].copy_from_slice(&ts.to_le_bytes());
    }
    if len >= 16 {
        payload[8..16].copy_from_slice(&seq.to_le_bytes());
    }
    for (i, byte) in payload.iter_mut().enumerate().skip(16) {
        *byte = (seq as u8).wrapping_add(i as u8);
    }
    payload
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = RingConfig {
        ring_order: args.ring_order,
        hi_pct: args.hi_pct,
        lo_pct: args.lo_pct,
    };

    let (ring, mut producer) = ShmRing::create(config)?;
    let doorbell = Arc::new(Doorbell::create()?);
    ring.bind_notifier(Some(doorbell.clone()))?;
    let mut consumer = ring.attach_consumer(Some(doorbell))?;

    info!(
        ring_bytes = ring.config().size,
        rate_hz = args.rate_hz,
        "feed starting"
    );

    let (done_tx, mut done_rx) = tokio::sync::oneshot::channel::<()>();

    let consumer_task = tokio::spawn(async move {
        let mut packets: u64 = 0;
        let mut lost: u64 = 0;
        loop {
            tokio::select! {
                record = consumer.next() => match record {
                    Ok(Record::Packet { ts_ns, payload }) => {
                        packets += 1;
                        tracing::debug!(ts_ns, len = payload.len(), "pkt");
                    }
                    Ok(Record::DropSummary { lost: burst, start_ns, end_ns, .. }) => {
                        lost += burst as u64;
                        warn!(burst, start_ns, end_ns, total_lost = lost, "drop burst");
                    }
                    Ok(Record::Unknown { rec_type, len, .. }) => {
                        warn!(rec_type, len, "unknown record type, skipped");
                    }
                    Err(e) => {
                        warn!("consumer stopped: {}", e);
                        break;
                    }
                },
                _ = &mut done_rx => {
                    // Producer finished; drain what is left and stop.
                    loop {
                        match consumer.try_next() {
                            Ok(Some(Record::Packet { .. })) => packets += 1,
                            Ok(Some(Record::DropSummary { lost: burst, .. })) => {
                                lost += burst as u64;
                            }
                            Ok(Some(Record::Unknown { .. })) => {}
                            Ok(None) => break,
                            Err(e) => {
                                warn!("consumer stopped: {}", e);
                                break;
                            }
                        }
                    }
                    break;
                }
            }
        }
        (packets, lost)
    });

    // Rescheduling cadence from the configured rate; rate 0 floods.
    let interval = if args.rate_hz == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(u64::from((1000 / args.rate_hz).max(1)))
    };

    let mut written: u64 = 0;
    for seq in 0..args.count {
        let payload = build_payload(seq, args.payload_len);
        match producer.push(&payload)? {
            PushOutcome::Written => written += 1,
            PushOutcome::Dropped => {}
        }
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    let _ = done_tx.send(());

    let (packets, lost) = consumer_task.await?;
    let stats = ring.stats();
    info!(
        produced = written,
        consumed = packets,
        lost,
        drops = stats.drops,
        bytes = stats.bytes,
        "feed finished"
    );
    Ok(())
}
