//! Expected state: orders this bot placed and still believes are live.
//!
//! # Invariants
//!
//! - **Bounded**: at most `max_orders` entries; the oldest insertion is
//!   evicted first (ring buffer).
//! - **TTL**: entries older than `ttl_ms` are dropped by [`ExpectedStateStore::prune_expired`].
//! - **One entry per client order id**: re-recording an id replaces it in
//!   place and keeps its ring position.
//!
//! Not `Sync`-guarded: the runner owns the store. Callers that feed it from
//! another thread wrap it in a `Mutex`.

use std::collections::{BTreeMap, VecDeque};

use rust_decimal::Decimal;

use crate::ExpectedOrder;

/// Default ring capacity.
pub const DEFAULT_EXPECTED_MAX_ORDERS: usize = 200;

/// Default TTL: 24h.
pub const DEFAULT_EXPECTED_TTL_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Clone, Debug)]
pub struct ExpectedStateStore {
    orders: VecDeque<ExpectedOrder>,
    /// symbol -> signed amount we expect to hold. Absent = flat.
    positions: BTreeMap<String, Decimal>,
    max_orders: usize,
    ttl_ms: i64,
}

impl Default for ExpectedStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_EXPECTED_MAX_ORDERS, DEFAULT_EXPECTED_TTL_MS)
    }
}

impl ExpectedStateStore {
    /// `max_orders` of zero is clamped to one.
    pub fn new(max_orders: usize, ttl_ms: i64) -> Self {
        Self {
            orders: VecDeque::new(),
            positions: BTreeMap::new(),
            max_orders: max_orders.max(1),
            ttl_ms,
        }
    }

    /// Record a placement. Returns the evicted order if capacity was exceeded.
    pub fn record(&mut self, order: ExpectedOrder) -> Option<ExpectedOrder> {
        if let Some(slot) = self
            .orders
            .iter_mut()
            .find(|o| o.client_order_id == order.client_order_id)
        {
            *slot = order;
            return None;
        }

        self.orders.push_back(order);
        if self.orders.len() > self.max_orders {
            self.orders.pop_front()
        } else {
            None
        }
    }

    /// Remove an order that reached a terminal state.
    pub fn mark_terminal(&mut self, client_order_id: &str) -> Option<ExpectedOrder> {
        let idx = self
            .orders
            .iter()
            .position(|o| o.client_order_id == client_order_id)?;
        self.orders.remove(idx)
    }

    /// Drop every entry whose age is at least the TTL. Returns how many.
    pub fn prune_expired(&mut self, now_ms: i64) -> usize {
        let before = self.orders.len();
        let ttl = self.ttl_ms;
        self.orders
            .retain(|o| now_ms.saturating_sub(o.ts_created_ms) < ttl);
        before - self.orders.len()
    }

    pub fn get(&self, client_order_id: &str) -> Option<&ExpectedOrder> {
        self.orders
            .iter()
            .find(|o| o.client_order_id == client_order_id)
    }

    pub fn contains(&self, client_order_id: &str) -> bool {
        self.get(client_order_id).is_some()
    }

    /// Orders in insertion order (oldest first).
    pub fn orders(&self) -> impl Iterator<Item = &ExpectedOrder> {
        self.orders.iter()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_orders
    }

    /// Set the inventory we expect for `symbol`. Zero clears the entry.
    pub fn set_expected_position(&mut self, symbol: impl Into<String>, position_amt: Decimal) {
        let symbol = symbol.into();
        if position_amt.is_zero() {
            self.positions.remove(&symbol);
        } else {
            self.positions.insert(symbol, position_amt);
        }
    }

    pub fn expected_position(&self, symbol: &str) -> Decimal {
        self.positions.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }
}
