//! Ring handle and control surface.
//!
//! [`ShmRing`] is the producer-side owner of all ring state: the shared
//! mapping, the notifier hysteresis bit, and the stats counters. The six
//! control operations are methods on it, serialized by one mutex that is
//! never held across a data-region write; the producer push path stays
//! wait-free.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::consumer::RingConsumer;
use crate::doorbell::{Doorbell, Notifier};
use crate::error::ControlError;
use crate::layout::RingConfig;
use crate::producer::RingProducer;
use crate::region::RingRegion;

/// Notifier hysteresis state plus the bound channel.
pub(crate) struct NotifyState {
    /// Set on the rising hi crossing, cleared at or below lo. While set, no
    /// further signals are emitted (edge-triggered).
    pub(crate) above_hi: bool,
    pub(crate) notifier: Option<Arc<dyn Notifier>>,
}

/// Producer-process counters. Not part of the shared ABI; consumers read
/// them through `GetStats` rather than from the mapped control page.
#[derive(Default)]
pub(crate) struct SharedStats {
    pub(crate) records: AtomicU64,
    pub(crate) bytes: AtomicU64,
    pub(crate) drops: AtomicU64,
}

impl SharedStats {
    pub(crate) fn record(&self, bytes: u64) {
        self.records.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.records.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        self.drops.store(0, Ordering::Relaxed);
    }
}

/// State shared between the ring handle, the producer and the consumer.
pub(crate) struct RingShared {
    pub(crate) region: RingRegion,
    pub(crate) notify: Mutex<NotifyState>,
    pub(crate) stats: SharedStats,
    pub(crate) consumer_attached: AtomicBool,
}

impl RingShared {
    /// Publish a new head and evaluate the watermark edge.
    pub(crate) fn commit_head(&self, new_head: u64) {
        self.region.ctrl().commit_head(new_head);
        self.maybe_notify();
    }

    /// Publish a new tail and evaluate the watermark edge.
    pub(crate) fn release_tail(&self, new_tail: u64) {
        self.region.ctrl().commit_tail(new_tail);
        self.maybe_notify();
    }

    /// Hysteresis evaluation, run after every cursor release.
    ///
    /// Rising edge (`pct >= hi` while disarmed) emits exactly one signal;
    /// the falling edge (`pct <= lo` while armed) re-arms silently.
    fn maybe_notify(&self) {
        let ctrl = self.region.ctrl();
        let mut state = self.notify.lock();
        let pct = ctrl.fill_pct();
        if !state.above_hi && pct >= ctrl.hi_pct() {
            state.above_hi = true;
            if let Some(notifier) = &state.notifier {
                notifier.signal();
            }
        } else if state.above_hi && pct <= ctrl.lo_pct() {
            state.above_hi = false;
        }
    }
}

/// Cursor and counter snapshot returned by [`ShmRing::stats`].
///
/// Fields are individually consistent but not mutually atomic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingStats {
    pub head: u64,
    pub tail: u64,
    pub records: u64,
    pub bytes: u64,
    pub drops: u64,
}

/// Configuration snapshot returned by [`ShmRing::config`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingConfigSnapshot {
    pub size: u64,
    pub hi_pct: u32,
    pub lo_pct: u32,
}

/// Producer-side ring handle and control surface.
///
/// Cheap to clone; every clone shares the same ring. The producer data path
/// lives on the unique [`RingProducer`] returned by the constructors, the
/// consumer data path on the [`RingConsumer`] from
/// [`attach_consumer`](Self::attach_consumer).
#[derive(Clone)]
pub struct ShmRing {
    shared: Arc<RingShared>,
}

impl ShmRing {
    /// Create a memfd-backed ring. The backing fd (via
    /// [`region`](Self::region)) can be passed to a consumer process.
    pub fn create(config: RingConfig) -> io::Result<(ShmRing, RingProducer)> {
        config.validate()?;
        let region = RingRegion::create_memfd(config.ring_order)?;
        Ok(Self::with_region(region, config))
    }

    /// Create an anonymous in-process ring (tests, benchmarks).
    pub fn create_anonymous(config: RingConfig) -> io::Result<(ShmRing, RingProducer)> {
        config.validate()?;
        let region = RingRegion::create_anonymous(config.ring_order)?;
        Ok(Self::with_region(region, config))
    }

    fn with_region(region: RingRegion, config: RingConfig) -> (ShmRing, RingProducer) {
        region
            .ctrl()
            .init(region.data_size(), config.hi_pct, config.lo_pct);
        let shared = Arc::new(RingShared {
            region,
            notify: Mutex::new(NotifyState {
                above_hi: false,
                notifier: None,
            }),
            stats: SharedStats::default(),
            consumer_attached: AtomicBool::new(false),
        });
        let ring = ShmRing {
            shared: shared.clone(),
        };
        (ring, RingProducer::new(shared))
    }

    /// Attach the (single) consumer. It observes the current cursors and
    /// resumes from `tail`; dropping it detaches, after which a new consumer
    /// may attach.
    pub fn attach_consumer(
        &self,
        doorbell: Option<Arc<Doorbell>>,
    ) -> Result<RingConsumer, ControlError> {
        if self.shared.consumer_attached.swap(true, Ordering::AcqRel) {
            return Err(ControlError::ResourceUnavailable(
                "a consumer is already attached",
            ));
        }
        Ok(RingConsumer::new(self.shared.clone(), doorbell))
    }

    /// `SetWatermarks`: update the hi/lo thresholds.
    pub fn set_watermarks(&self, hi_pct: u32, lo_pct: u32) -> Result<(), ControlError> {
        if hi_pct > 100 || lo_pct > hi_pct {
            return Err(ControlError::InvalidArgument(
                "watermarks must satisfy lo <= hi <= 100",
            ));
        }
        let _guard = self.shared.notify.lock();
        self.shared.region.ctrl().set_watermarks(hi_pct, lo_pct);
        Ok(())
    }

    /// `BindNotifier`: replace the notification channel; `None` unbinds.
    pub fn bind_notifier(&self, notifier: Option<Arc<dyn Notifier>>) -> Result<(), ControlError> {
        let mut state = self.shared.notify.lock();
        state.notifier = notifier;
        Ok(())
    }

    /// `GetStats`: cursor and counter snapshot.
    pub fn stats(&self) -> RingStats {
        let ctrl = self.shared.region.ctrl();
        RingStats {
            head: ctrl.head(),
            tail: ctrl.tail(),
            records: self.shared.stats.records.load(Ordering::Relaxed),
            bytes: self.shared.stats.bytes.load(Ordering::Relaxed),
            drops: self.shared.stats.drops.load(Ordering::Relaxed),
        }
    }

    /// `AdvanceTail`: consumer-initiated tail release through the control
    /// surface. Re-evaluates the falling watermark edge.
    pub fn advance_tail(&self, new_tail: u64) -> Result<(), ControlError> {
        let ctrl = self.shared.region.ctrl();
        let head = ctrl.head();
        let tail = ctrl.tail();
        if new_tail > head || new_tail < tail {
            return Err(ControlError::InvalidArgument("tail advance out of range"));
        }
        self.shared.release_tail(new_tail);
        Ok(())
    }

    /// `Reset`: zero cursors, coalescer state and stats.
    ///
    /// Only valid with the producer quiesced and no consumer draining;
    /// stop, reset, resume.
    pub fn reset(&self) -> Result<(), ControlError> {
        let mut state = self.shared.notify.lock();
        self.shared.region.ctrl().reset();
        self.shared.stats.reset();
        state.above_hi = false;
        Ok(())
    }

    /// `GetConfig`: size and watermark snapshot.
    pub fn config(&self) -> RingConfigSnapshot {
        let ctrl = self.shared.region.ctrl();
        RingConfigSnapshot {
            size: ctrl.size(),
            hi_pct: ctrl.hi_pct(),
            lo_pct: ctrl.lo_pct(),
        }
    }

    /// Level-triggered poll: true iff occupancy is at or above the hi
    /// watermark. Distinct from the edge-triggered doorbell; this is what a
    /// device shim would report as `EPOLLIN`.
    pub fn poll_readable(&self) -> bool {
        let ctrl = self.shared.region.ctrl();
        ctrl.fill_pct() >= ctrl.hi_pct()
    }

    /// The shared mapping, e.g. for handing its backing fd to a consumer
    /// process.
    pub fn region(&self) -> &RingRegion {
        &self.shared.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_ring() -> (ShmRing, RingProducer) {
        ShmRing::create_anonymous(RingConfig {
            ring_order: 12,
            ..RingConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn watermark_validation() {
        let (ring, _producer) = small_ring();
        assert!(ring.set_watermarks(50, 25).is_ok());
        assert!(ring.set_watermarks(101, 0).is_err());
        assert!(ring.set_watermarks(40, 50).is_err());

        let config = ring.config();
        assert_eq!(config.hi_pct, 50);
        assert_eq!(config.lo_pct, 25);
        assert_eq!(config.size, 4096);
    }

    #[test]
    fn advance_tail_bounds() {
        let (ring, mut producer) = small_ring();
        producer.push_at(&[0u8; 16], 1).unwrap();
        let head = ring.stats().head;
        assert_eq!(head, 32);

        assert!(ring.advance_tail(head + 1).is_err());
        assert!(ring.advance_tail(head).is_ok());
        assert!(ring.advance_tail(head - 1).is_err()); // tail never regresses
    }

    #[test]
    fn single_consumer_slot() {
        let (ring, _producer) = small_ring();
        let consumer = ring.attach_consumer(None).unwrap();
        assert!(ring.attach_consumer(None).is_err());

        drop(consumer);
        assert!(ring.attach_consumer(None).is_ok());
    }

    #[test]
    fn reset_zeroes_everything() {
        let (ring, mut producer) = small_ring();
        for _ in 0..4 {
            producer.push_at(b"abc", 7).unwrap();
        }
        assert_ne!(ring.stats().head, 0);

        ring.reset().unwrap();
        let stats = ring.stats();
        assert_eq!(stats, RingStats::default());
        assert!(!ring.region().ctrl().dropping());
    }
}
