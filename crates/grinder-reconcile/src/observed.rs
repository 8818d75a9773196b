//! Observed state: the venue's orders and positions, merged from the
//! user-data stream and periodic REST snapshots.
//!
//! # Merge rules
//!
//! - **Stream is authoritative for terminal status.** A terminal order is
//!   never reopened, by REST or by a late non-terminal stream event.
//! - **REST never deletes.** Open-order snapshots list only open orders;
//!   absence from a snapshot is not evidence of cancellation.
//! - **REST never regresses.** A REST record older than the stored record is
//!   ignored; on equal timestamps a stored stream record wins.
//! - **Whole-snapshot monotonicity.** A REST snapshot fetched before the last
//!   accepted snapshot is rejected without touching the store.
//! - **First sighting is kept.** The earliest `ts_ms` seen for an order
//!   survives later merges, so age checks do not restart when a newer
//!   record replaces an older one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::watermark::{SnapshotFreshness, SnapshotWatermark};
use crate::{ObservationSource, ObservedOrder, ObservedPosition};

/// One REST poll: open orders plus position risk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestSnapshot {
    pub fetched_at_ms: i64,
    #[serde(default)]
    pub open_orders: Vec<ObservedOrder>,
    #[serde(default)]
    pub positions: Vec<ObservedPosition>,
}

/// Per-record merge decision, returned for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// Stored record is terminal; incoming record ignored.
    IgnoredTerminal,
    /// Incoming record is older than (or ties with a stream) stored record.
    IgnoredOlder,
}

impl MergeOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, MergeOutcome::Inserted | MergeOutcome::Updated)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ObservedStateStore {
    /// client_order_id -> order
    orders: BTreeMap<String, ObservedOrder>,
    /// symbol -> position
    positions: BTreeMap<String, ObservedPosition>,
    /// client_order_id -> earliest ts_ms observed, from either source
    first_seen_ms: BTreeMap<String, i64>,
    watermark: SnapshotWatermark,
    last_update_ms: Option<i64>,
}

impl ObservedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, ts_ms: i64) {
        self.last_update_ms = Some(self.last_update_ms.map_or(ts_ms, |t| t.max(ts_ms)));
    }

    fn note_sighting(&mut self, order: &ObservedOrder) {
        self.first_seen_ms
            .entry(order.client_order_id.clone())
            .and_modify(|t| *t = (*t).min(order.ts_ms))
            .or_insert(order.ts_ms);
    }

    // -----------------------------------------------------------------------
    // Stream
    // -----------------------------------------------------------------------

    /// Apply one order update from the user-data stream.
    pub fn apply_stream_order(&mut self, mut order: ObservedOrder) -> MergeOutcome {
        order.source = ObservationSource::Stream;
        self.touch(order.ts_ms);
        self.note_sighting(&order);

        match self.orders.get(&order.client_order_id) {
            None => {
                self.orders.insert(order.client_order_id.clone(), order);
                MergeOutcome::Inserted
            }
            Some(existing) => {
                if existing.status.is_terminal() && !order.status.is_terminal() {
                    return MergeOutcome::IgnoredTerminal;
                }
                if existing.source == ObservationSource::Stream && order.ts_ms < existing.ts_ms {
                    return MergeOutcome::IgnoredOlder;
                }
                self.orders.insert(order.client_order_id.clone(), order);
                MergeOutcome::Updated
            }
        }
    }

    /// Apply one position update from the user-data stream.
    pub fn apply_stream_position(&mut self, mut position: ObservedPosition) -> MergeOutcome {
        position.source = ObservationSource::Stream;
        self.touch(position.ts_ms);

        match self.positions.get(&position.symbol) {
            Some(existing)
                if existing.source == ObservationSource::Stream
                    && position.ts_ms < existing.ts_ms =>
            {
                MergeOutcome::IgnoredOlder
            }
            Some(_) => {
                self.positions.insert(position.symbol.clone(), position);
                MergeOutcome::Updated
            }
            None => {
                self.positions.insert(position.symbol.clone(), position);
                MergeOutcome::Inserted
            }
        }
    }

    // -----------------------------------------------------------------------
    // REST
    // -----------------------------------------------------------------------

    /// Merge a REST snapshot. Returns the watermark decision; on rejection
    /// nothing in the store changes.
    pub fn merge_rest_snapshot(&mut self, snapshot: RestSnapshot) -> SnapshotFreshness {
        let freshness = self.watermark.accept(snapshot.fetched_at_ms);
        if freshness.is_rejected() {
            return freshness;
        }
        self.touch(snapshot.fetched_at_ms);

        for order in snapshot.open_orders {
            self.merge_rest_order(order);
        }
        for position in snapshot.positions {
            self.merge_rest_position(position);
        }
        freshness
    }

    fn merge_rest_order(&mut self, mut order: ObservedOrder) -> MergeOutcome {
        order.source = ObservationSource::Rest;
        self.note_sighting(&order);
        match self.orders.get(&order.client_order_id) {
            None => {
                self.orders.insert(order.client_order_id.clone(), order);
                MergeOutcome::Inserted
            }
            Some(existing) => {
                if existing.status.is_terminal() {
                    return MergeOutcome::IgnoredTerminal;
                }
                let older = order.ts_ms < existing.ts_ms;
                let ties_stream =
                    order.ts_ms == existing.ts_ms && existing.source == ObservationSource::Stream;
                if older || ties_stream {
                    return MergeOutcome::IgnoredOlder;
                }
                self.orders.insert(order.client_order_id.clone(), order);
                MergeOutcome::Updated
            }
        }
    }

    fn merge_rest_position(&mut self, mut position: ObservedPosition) -> MergeOutcome {
        position.source = ObservationSource::Rest;
        match self.positions.get(&position.symbol) {
            None => {
                self.positions.insert(position.symbol.clone(), position);
                MergeOutcome::Inserted
            }
            Some(existing) => {
                let older = position.ts_ms < existing.ts_ms;
                let ties_stream = position.ts_ms == existing.ts_ms
                    && existing.source == ObservationSource::Stream;
                if older || ties_stream {
                    return MergeOutcome::IgnoredOlder;
                }
                self.positions.insert(position.symbol.clone(), position);
                MergeOutcome::Updated
            }
        }
    }

    // -----------------------------------------------------------------------
    // Housekeeping / queries
    // -----------------------------------------------------------------------

    /// Forget terminal orders last updated before `cutoff_ms`. Open orders
    /// are never removed here.
    pub fn prune_terminal(&mut self, cutoff_ms: i64) -> usize {
        let before = self.orders.len();
        self.orders
            .retain(|_, o| !(o.status.is_terminal() && o.ts_ms < cutoff_ms));
        let orders = &self.orders;
        self.first_seen_ms.retain(|id, _| orders.contains_key(id));
        before - self.orders.len()
    }

    pub fn get_order(&self, client_order_id: &str) -> Option<&ObservedOrder> {
        self.orders.get(client_order_id)
    }

    /// Earliest `ts_ms` recorded for this order across stream and REST.
    pub fn first_seen_ms(&self, client_order_id: &str) -> Option<i64> {
        self.first_seen_ms.get(client_order_id).copied()
    }

    pub fn get_position(&self, symbol: &str) -> Option<&ObservedPosition> {
        self.positions.get(symbol)
    }

    /// Orders sorted by client order id.
    pub fn orders(&self) -> impl Iterator<Item = &ObservedOrder> {
        self.orders.values()
    }

    /// Positions sorted by symbol.
    pub fn positions(&self) -> impl Iterator<Item = &ObservedPosition> {
        self.positions.values()
    }

    pub fn last_update_ms(&self) -> Option<i64> {
        self.last_update_ms
    }

    /// `true` when nothing was observed within `max_age_ms` of `now_ms`
    /// (or nothing was ever observed).
    pub fn is_stale(&self, now_ms: i64, max_age_ms: i64) -> bool {
        match self.last_update_ms {
            None => true,
            Some(t) => now_ms.saturating_sub(t) > max_age_ms,
        }
    }
}
