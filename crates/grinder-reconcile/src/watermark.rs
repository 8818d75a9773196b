//! REST snapshot monotonicity watermark.
//!
//! A REST snapshot fetched before the last accepted one is older evidence
//! than what the store already holds; merging it could resurrect fields the
//! stream has since moved past. The watermark rejects such snapshots whole.
//!
//! # Invariants
//!
//! - A snapshot is accepted only if `fetched_at_ms >= last accepted`.
//! - `fetched_at_ms <= 0` is rejected (an untimed snapshot cannot be
//!   proven fresh).
//! - The watermark moves only on acceptance.

// ---------------------------------------------------------------------------
// Freshness decision
// ---------------------------------------------------------------------------

/// Outcome of checking one REST snapshot's fetch time against the watermark.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotFreshness {
    /// Fetched at or after the watermark. On `accept` the watermark has moved
    /// to this snapshot's `fetched_at_ms`.
    Fresh,

    /// Fetched strictly before the last accepted snapshot. The store is left
    /// untouched; both times are kept for the log line.
    Stale {
        /// `fetched_at_ms` of the last accepted snapshot.
        watermark_ms: i64,
        /// `fetched_at_ms` of the snapshot that was turned away.
        got_ms: i64,
    },

    /// `fetched_at_ms <= 0`. Rejected: without a fetch time the snapshot
    /// cannot be ordered against what the store already holds.
    NoTimestamp,
}

impl SnapshotFreshness {
    /// `true` when the snapshot may be merged.
    pub fn is_fresh(&self) -> bool {
        matches!(self, SnapshotFreshness::Fresh)
    }

    /// `true` for `Stale` and `NoTimestamp`.
    pub fn is_rejected(&self) -> bool {
        !self.is_fresh()
    }
}

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// Last accepted REST fetch time.
///
/// [`ObservedStateStore`](crate::ObservedStateStore) calls
/// [`accept`](SnapshotWatermark::accept) before merging each snapshot and
/// drops the snapshot unless the result is [`SnapshotFreshness::Fresh`].
/// [`check`](SnapshotWatermark::check) answers the same question without
/// moving the watermark.
#[derive(Clone, Debug)]
pub struct SnapshotWatermark {
    /// Starts at `i64::MIN`, so the first timed snapshot is always fresh.
    last_accepted_ms: i64,
}

impl Default for SnapshotWatermark {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotWatermark {
    pub fn new() -> Self {
        Self {
            last_accepted_ms: i64::MIN,
        }
    }

    /// Freshness of `fetched_at_ms` without advancing the watermark.
    pub fn check(&self, fetched_at_ms: i64) -> SnapshotFreshness {
        if fetched_at_ms <= 0 {
            return SnapshotFreshness::NoTimestamp;
        }
        if fetched_at_ms < self.last_accepted_ms {
            return SnapshotFreshness::Stale {
                watermark_ms: self.last_accepted_ms,
                got_ms: fetched_at_ms,
            };
        }
        SnapshotFreshness::Fresh
    }

    /// Like [`check`](Self::check), then advance the watermark when fresh.
    pub fn accept(&mut self, fetched_at_ms: i64) -> SnapshotFreshness {
        let result = self.check(fetched_at_ms);
        if result.is_fresh() {
            self.last_accepted_ms = fetched_at_ms;
        }
        result
    }

    /// `None` until the first snapshot is accepted.
    pub fn last_accepted_ms(&self) -> Option<i64> {
        (self.last_accepted_ms != i64::MIN).then_some(self.last_accepted_ms)
    }
}
