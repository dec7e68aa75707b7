//! pktring: single-producer / single-consumer shared-memory packet ring.
//!
//! A privileged producer appends variable-length framed records to a
//! power-of-two byte ring shared with an unprivileged consumer in another
//! address space. Head and tail cursors live in a shared control page with
//! acquire/release pairing; a watermark-driven eventfd doorbell wakes the
//! consumer only when the ring is sufficiently full; and overflow bursts
//! coalesce into a single drop record so the consumer can account for loss
//! without the producer ever blocking.
//!
//! # Characteristics
//!
//! - Wait-free producer: a reservation succeeds immediately or the packet
//!   is counted into the current drop burst.
//! - Lock-free data path: correctness rests entirely on release stores of
//!   `head`/`tail` paired with acquire loads on the other side.
//! - Edge-triggered wakeups with hysteresis: one signal per rising crossing
//!   of the hi watermark, re-armed when occupancy falls to the lo
//!   watermark.
//! - Exactly one drop record per contiguous overflow burst, emitted
//!   immediately before the packet that ends it.
//!
//! # Memory layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Control page (4096 bytes)                                │
//! │    head / tail cursors, size, watermarks, coalescer state │
//! ├──────────────────────────────────────────────────────────┤
//! │  Data region (S bytes, power of two)                      │
//! │    records laid end-to-end modulo S:                      │
//! │    [u16 type|u16 flags|u32 len|u64 ts_ns] [payload..]     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The byte layout is the ABI; see [`layout`] for the offsets a foreign
//! consumer needs.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use pktring::{Doorbell, PushOutcome, Record, RingConfig, ShmRing};
//!
//! let (ring, mut producer) = ShmRing::create(RingConfig::default())?;
//! let doorbell = Arc::new(Doorbell::create()?);
//! ring.bind_notifier(Some(doorbell.clone()))?;
//! let mut consumer = ring.attach_consumer(Some(doorbell))?;
//!
//! producer.push(b"payload")?;
//!
//! match consumer.next().await? {
//!     Record::Packet { payload, .. } => { /* ... */ }
//!     Record::DropSummary { lost, .. } => { /* ... */ }
//!     Record::Unknown { .. } => { /* skipped, forward compatible */ }
//! }
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]

mod consumer;
mod control;
mod doorbell;
mod error;
mod producer;
mod region;

pub mod frame;
pub mod layout;

pub use consumer::{Record, RingConsumer};
pub use control::{RingConfigSnapshot, RingStats, ShmRing};
pub use doorbell::{Doorbell, Notifier};
pub use error::{ConsumerError, ControlError, PushError};
pub use layout::RingConfig;
pub use producer::{PushOutcome, RingProducer};
pub use region::RingRegion;
