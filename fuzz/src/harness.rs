//! Differential harness: real ring vs. reference queue.
//!
//! Every `Push` is mirrored into a reference model that knows only the push
//! outcomes: written payloads queue up, dropped pushes accumulate into a
//! pending burst that must surface as exactly one drop summary before the
//! next written packet. Every `Drain` compares what the consumer decodes
//! against the front of the reference queue, so the consumer byte stream is
//! forced to be a prefix of the produced byte stream.

use std::collections::VecDeque;

use pktring::{PushOutcome, Record, RingConfig, RingConsumer, ShmRing};

/// Ring order used by the harness; small enough that random payloads
/// regularly overflow and open bursts.
pub const RING_ORDER: u32 = 12;

const DATA_SIZE: u64 = 1 << RING_ORDER;

/// Payload length cap: a couple of records fill the ring, so drop bursts
/// and wrap-around both happen constantly under random ops.
pub const MAX_PAYLOAD: usize = 1500;

/// Operations the fuzzer drives.
#[derive(Clone, Copy, Debug)]
pub enum RingOp {
    /// Push one packet with a payload of `len % MAX_PAYLOAD` bytes.
    Push(u16),
    /// Drain up to `n % 8` records.
    Drain(u8),
}

/// What the consumer must observe next.
enum Expected {
    Packet(Vec<u8>),
    Drop(u64),
}

/// Execute `ops` against a fresh ring and verify all invariants.
pub fn execute_and_verify(ops: &[RingOp]) -> Result<(), String> {
    let (ring, mut producer) = ShmRing::create_anonymous(RingConfig {
        ring_order: RING_ORDER,
        hi_pct: 50,
        lo_pct: 25,
    })
    .map_err(|e| format!("ring setup failed: {}", e))?;
    let mut consumer = ring
        .attach_consumer(None)
        .map_err(|e| format!("consumer attach failed: {}", e))?;

    let mut expected: VecDeque<Expected> = VecDeque::new();
    let mut pending_lost: u64 = 0;
    let mut total_dropped: u64 = 0;
    let mut seq: u64 = 0;

    for (i, op) in ops.iter().enumerate() {
        match *op {
            RingOp::Push(len_seed) => {
                let len = len_seed as usize % MAX_PAYLOAD;
                let payload: Vec<u8> = (0..len).map(|j| (seq as u8).wrapping_add(j as u8)).collect();
                seq += 1;

                let outcome = producer
                    .push_at(&payload, seq)
                    .map_err(|e| format!("op {}: push failed: {}", i, e))?;
                match outcome {
                    PushOutcome::Written => {
                        if pending_lost > 0 {
                            expected.push_back(Expected::Drop(pending_lost));
                            pending_lost = 0;
                        }
                        expected.push_back(Expected::Packet(payload));
                    }
                    PushOutcome::Dropped => {
                        pending_lost += 1;
                        total_dropped += 1;
                    }
                }
            }
            RingOp::Drain(n) => {
                for _ in 0..(n % 8) {
                    match drain_one(&mut consumer, &mut expected, i)? {
                        true => {}
                        false => break,
                    }
                }
            }
        }
        verify_invariants(&ring, &expected, total_dropped, i)?;
    }

    // Drain whatever is left; a still-open burst legitimately stays
    // unreported until the next successful push, so only committed records
    // are owed.
    let mut i = ops.len();
    while drain_one(&mut consumer, &mut expected, i)? {
        i += 1;
    }
    if !expected.is_empty() {
        return Err(format!(
            "ring drained but {} expected records never appeared",
            expected.len()
        ));
    }
    Ok(())
}

/// Drain one record and match it against the reference. Returns false on
/// empty.
fn drain_one(
    consumer: &mut RingConsumer,
    expected: &mut VecDeque<Expected>,
    op_idx: usize,
) -> Result<bool, String> {
    let record = consumer
        .try_next()
        .map_err(|e| format!("op {}: consumer error: {}", op_idx, e))?;
    let Some(record) = record else {
        if !expected.is_empty() {
            return Err(format!(
                "op {}: ring empty but {} committed records still expected",
                op_idx,
                expected.len()
            ));
        }
        return Ok(false);
    };

    match (record, expected.pop_front()) {
        (Record::Packet { payload, .. }, Some(Expected::Packet(want))) => {
            if payload != want {
                return Err(format!(
                    "op {}: payload mismatch ({} bytes vs {} expected)",
                    op_idx,
                    payload.len(),
                    want.len()
                ));
            }
        }
        (Record::DropSummary { lost, .. }, Some(Expected::Drop(want))) => {
            if lost as u64 != want {
                return Err(format!(
                    "op {}: drop summary lost={} but burst had {} failures",
                    op_idx, lost, want
                ));
            }
        }
        (record, Some(_)) => {
            return Err(format!("op {}: out-of-order record {:?}", op_idx, record));
        }
        (record, None) => {
            return Err(format!("op {}: unexpected record {:?}", op_idx, record));
        }
    }
    Ok(true)
}

fn verify_invariants(
    ring: &ShmRing,
    expected: &VecDeque<Expected>,
    total_dropped: u64,
    op_idx: usize,
) -> Result<(), String> {
    let stats = ring.stats();

    // tail <= head <= tail + S at every observable point.
    if stats.tail > stats.head {
        return Err(format!(
            "op {}: tail {} ahead of head {}",
            op_idx, stats.tail, stats.head
        ));
    }
    if stats.head - stats.tail > DATA_SIZE {
        return Err(format!(
            "op {}: {} bytes in flight exceeds ring size",
            op_idx,
            stats.head - stats.tail
        ));
    }

    // The drops counter equals the failures the harness observed.
    if stats.drops != total_dropped {
        return Err(format!(
            "op {}: drops stat {} != observed {}",
            op_idx, stats.drops, total_dropped
        ));
    }

    // At most one pending drop summary between any two packets.
    let mut consecutive_drops = 0usize;
    for e in expected {
        match e {
            Expected::Drop(_) => {
                consecutive_drops += 1;
                if consecutive_drops > 1 {
                    return Err(format!("op {}: adjacent drop summaries queued", op_idx));
                }
            }
            Expected::Packet(_) => consecutive_drops = 0,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_drain_cycles() {
        let mut ops = Vec::new();
        for round in 0..20u16 {
            for _ in 0..8 {
                ops.push(RingOp::Push(200 + round * 37));
            }
            ops.push(RingOp::Drain(7));
            ops.push(RingOp::Drain(7));
        }
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn overflow_heavy() {
        // Large payloads with rare drains: bursts open and close often.
        let mut ops = Vec::new();
        for i in 0..100u16 {
            ops.push(RingOp::Push(1400));
            if i % 5 == 0 {
                ops.push(RingOp::Drain(2));
            }
        }
        ops.push(RingOp::Drain(7));
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn tiny_and_empty_payloads() {
        let ops = vec![
            RingOp::Push(0), // zero-length payload, header-only record
            RingOp::Push(1),
            RingOp::Drain(7),
            RingOp::Push(MAX_PAYLOAD as u16 - 1),
            RingOp::Drain(7),
        ];
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn drain_on_empty_is_harmless() {
        let ops = vec![
            RingOp::Drain(7),
            RingOp::Push(100),
            RingOp::Drain(7),
            RingOp::Drain(7),
        ];
        execute_and_verify(&ops).unwrap();
    }
}
