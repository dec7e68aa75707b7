//! Producer push path: reservation, framing, drop coalescing.
//!
//! The push path is wait-free: a reservation either succeeds immediately or
//! the packet is counted into the current overflow burst. One contiguous
//! burst of failures is reported as a single drop record, emitted
//! immediately before the packet that ends the burst. While a burst is
//! open, the packet reservation is widened to cover the drop record too, so
//! the report itself can never fail; if the widened reservation fails, the
//! packet joins the burst and the report stays pending.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::control::RingShared;
use crate::error::PushError;
use crate::frame::{
    DropPayload, RecordHeader, DROP_PAYLOAD_LEN, DROP_RECORD_LEN, HEADER_LEN, REC_TYPE_DROP,
    REC_TYPE_PKT,
};

/// Result of a push: either the record was committed or it joined the
/// current overflow burst. Overflow is not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Written,
    Dropped,
}

/// The unique producer handle.
///
/// Not `Clone`: the `&mut self` push path is what enforces the
/// single-producer half of the SPSC discipline at compile time.
pub struct RingProducer {
    shared: Arc<RingShared>,
}

impl RingProducer {
    pub(crate) fn new(shared: Arc<RingShared>) -> Self {
        Self { shared }
    }

    /// Push a packet record stamped with the monotonic clock.
    pub fn push(&mut self, payload: &[u8]) -> Result<PushOutcome, PushError> {
        self.push_at(payload, monotonic_ns())
    }

    /// Push a packet record with a caller-supplied timestamp (packet
    /// capture style).
    pub fn push_at(&mut self, payload: &[u8], ts_ns: u64) -> Result<PushOutcome, PushError> {
        let ctrl = self.shared.region.ctrl();
        let size = self.shared.region.data_size();
        let need = HEADER_LEN as u64 + payload.len() as u64;

        // A record must always leave headroom for a drop record, or a burst
        // could never be reported.
        if need > size - DROP_RECORD_LEN {
            return Err(PushError::PayloadTooLarge {
                len: payload.len(),
                max: (size - DROP_RECORD_LEN) as usize - HEADER_LEN,
            });
        }

        let total = if ctrl.dropping() {
            DROP_RECORD_LEN + need
        } else {
            need
        };

        let Some(mut pos) = self.try_reserve(total) else {
            self.on_full(ts_ns);
            return Ok(PushOutcome::Dropped);
        };

        let ctrl = self.shared.region.ctrl();
        if ctrl.dropping() {
            pos = self.flush_drop_record(pos, ts_ns);
        }

        let header = RecordHeader {
            rec_type: REC_TYPE_PKT,
            flags: 0,
            len: payload.len() as u32,
            ts_ns,
        };
        let region = &self.shared.region;
        region.write_at(pos, &header.encode());
        region.write_at(pos + HEADER_LEN as u64, payload);
        self.shared.commit_head(pos + need);
        self.shared.stats.record(need);

        Ok(PushOutcome::Written)
    }

    /// Reserve `need` bytes of the free window, or fail without blocking.
    ///
    /// On success the caller owns `[head, head + need)` and must commit the
    /// new head after writing. `need > S` is always rejected; exact fill is
    /// full, not empty. `need == 0` is a caller bug.
    pub fn try_reserve(&mut self, need: u64) -> Option<u64> {
        debug_assert!(need > 0, "zero-byte reservation");
        let ctrl = self.shared.region.ctrl();
        let size = self.shared.region.data_size();
        if need > size {
            return None;
        }
        let head = ctrl.head_relaxed();
        let tail = ctrl.tail();
        if size - (head - tail) < need {
            return None;
        }
        Some(head)
    }

    /// Publish a new head after writing a reserved span.
    ///
    /// Pairs with [`try_reserve`](Self::try_reserve) for callers that frame
    /// their own records through
    /// [`RingRegion::write_at`](crate::RingRegion::write_at); `push` does
    /// this internally. `new_head` must not exceed the reserved window.
    pub fn commit(&mut self, new_head: u64) {
        debug_assert!(new_head >= self.shared.region.ctrl().head_relaxed());
        self.shared.commit_head(new_head);
    }

    /// Account one more lost packet; opens a burst if none is in progress.
    fn on_full(&mut self, now_ns: u64) {
        let ctrl = self.shared.region.ctrl();
        if !ctrl.dropping() {
            tracing::debug!(start_ns = now_ns, "ring full, opening drop burst");
            ctrl.set_dropping(true);
            ctrl.set_drop_start_ns(now_ns);
            ctrl.set_lost_in_drop(0);
        }
        ctrl.set_lost_in_drop(ctrl.lost_in_drop() + 1);
        self.shared.stats.drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Write and commit the pending drop record at `pos`; returns the
    /// cursor just past it. Space was covered by the widened reservation.
    fn flush_drop_record(&mut self, pos: u64, now_ns: u64) -> u64 {
        let ctrl = self.shared.region.ctrl();
        let lost = ctrl.lost_in_drop();
        tracing::debug!(lost, "closing drop burst");

        let header = RecordHeader {
            rec_type: REC_TYPE_DROP,
            flags: 0,
            len: DROP_PAYLOAD_LEN as u32,
            ts_ns: now_ns,
        };
        let payload = DropPayload {
            lost: lost as u32,
            start_ns: ctrl.drop_start_ns(),
            end_ns: now_ns,
        };

        let region = &self.shared.region;
        region.write_at(pos, &header.encode());
        region.write_at(pos + HEADER_LEN as u64, &payload.encode());
        self.shared.commit_head(pos + DROP_RECORD_LEN);

        ctrl.set_dropping(false);
        ctrl.set_drop_start_ns(0);
        ctrl.set_lost_in_drop(0);
        self.shared.stats.record(DROP_RECORD_LEN);

        pos + DROP_RECORD_LEN
    }
}

/// CLOCK_MONOTONIC in nanoseconds.
pub(crate) fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out-pointer for clock_gettime.
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    debug_assert_eq!(ret, 0);
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}
