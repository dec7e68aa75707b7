//! Bolero fuzzer for ring push/drain operation sequences.
//!
//! Properties tested:
//! - tail <= head <= tail + S after every operation
//! - the consumer byte stream is a prefix of the produced byte stream
//! - every contiguous overflow burst yields exactly one drop summary with
//!   the exact failure count, immediately before the next packet
//! - the drops counter matches the observed reservation failures

use bolero::check;
use pktring_fuzz::harness::{execute_and_verify, RingOp};

fn main() {
    check!()
        .with_type::<Vec<(bool, u16)>>()
        .for_each(|ops_data| {
            let ops: Vec<RingOp> = ops_data
                .iter()
                .map(|(is_push, seed)| {
                    if *is_push {
                        RingOp::Push(*seed)
                    } else {
                        RingOp::Drain((*seed % 8) as u8)
                    }
                })
                .collect();

            // Run and verify - panics are caught by bolero
            if let Err(e) = execute_and_verify(&ops) {
                panic!("Invariant violated: {}", e);
            }
        });
}
