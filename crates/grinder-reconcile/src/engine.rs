use grinder_identity::{has_our_prefix, IdentityConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    ExpectedOrder, ExpectedSnapshot, ExpectedStateStore, Mismatch, MismatchKind, ObservedOrder,
    ObservedPosition, ObservedSnapshot, ObservedStateStore,
};

/// Default placement-to-observation tolerance.
pub const DEFAULT_ORDER_GRACE_MS: i64 = 5_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Orders younger than this are not reported as unexpected or missing.
    /// Observed orders age from their first sighting, not their latest record.
    pub order_grace_ms: i64,
    /// Detection only considers observed orders carrying this identity's prefix.
    pub identity: IdentityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order_grace_ms: DEFAULT_ORDER_GRACE_MS,
            identity: IdentityConfig::default(),
        }
    }
}

/// Expected-vs-observed diff.
///
/// Output order is canonical (symbol, kind priority, order id) so that
/// per-run action caps downstream always pick the same mismatches.
#[derive(Clone, Debug, Default)]
pub struct ReconcileEngine {
    config: EngineConfig,
}

impl ReconcileEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Pure: identical stores and `now_ms` always produce an identical list.
    pub fn reconcile(
        &self,
        expected: &ExpectedStateStore,
        observed: &ObservedStateStore,
        now_ms: i64,
    ) -> Vec<Mismatch> {
        let mut out = Vec::new();
        self.check_observed_orders(expected, observed, now_ms, &mut out);
        self.check_expected_orders(expected, observed, now_ms, &mut out);
        check_positions(expected, observed, now_ms, &mut out);

        out.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        out
    }

    fn past_grace(&self, since_ms: i64, now_ms: i64) -> bool {
        now_ms.saturating_sub(since_ms) >= self.config.order_grace_ms
    }

    fn check_observed_orders(
        &self,
        expected: &ExpectedStateStore,
        observed: &ObservedStateStore,
        now_ms: i64,
        out: &mut Vec<Mismatch>,
    ) {
        for obs in observed.orders() {
            if obs.status.is_terminal() {
                continue;
            }
            if !has_our_prefix(&obs.client_order_id, &self.config.identity) {
                continue;
            }

            match expected.get(&obs.client_order_id) {
                Some(exp) => {
                    if exp.orig_qty != obs.orig_qty {
                        out.push(amount_mismatch(exp, obs, now_ms));
                    }
                }
                None => {
                    let first_seen = observed
                        .first_seen_ms(&obs.client_order_id)
                        .unwrap_or(obs.ts_ms);
                    if self.past_grace(first_seen, now_ms) {
                        out.push(unexpected_order(obs, now_ms));
                    }
                }
            }
        }
    }

    fn check_expected_orders(
        &self,
        expected: &ExpectedStateStore,
        observed: &ObservedStateStore,
        now_ms: i64,
        out: &mut Vec<Mismatch>,
    ) {
        for exp in expected.orders() {
            // Present in any state (including terminal) means not missing.
            if observed.get_order(&exp.client_order_id).is_some() {
                continue;
            }
            if self.past_grace(exp.ts_created_ms, now_ms) {
                out.push(missing_order(exp, now_ms));
            }
        }
    }
}

fn check_positions(
    expected: &ExpectedStateStore,
    observed: &ObservedStateStore,
    now_ms: i64,
    out: &mut Vec<Mismatch>,
) {
    for pos in observed.positions() {
        if pos.is_flat() {
            continue;
        }
        let expected_amt = expected.expected_position(&pos.symbol);
        if pos.position_amt != expected_amt {
            out.push(unexpected_position(pos, expected_amt, now_ms));
        }
    }
}

fn unexpected_order(obs: &ObservedOrder, now_ms: i64) -> Mismatch {
    Mismatch {
        kind: MismatchKind::OrderExistsUnexpected,
        symbol: obs.symbol.clone(),
        client_order_id: Some(obs.client_order_id.clone()),
        expected: None,
        observed: Some(ObservedSnapshot::Order(obs.clone())),
        ts_detected_ms: now_ms,
        action_plan: format!(
            "cancel unexpected {} order {} on {}",
            obs.side.as_str(),
            obs.client_order_id,
            obs.symbol
        ),
    }
}

fn amount_mismatch(exp: &ExpectedOrder, obs: &ObservedOrder, now_ms: i64) -> Mismatch {
    Mismatch {
        kind: MismatchKind::OrderAmountMismatch,
        symbol: obs.symbol.clone(),
        client_order_id: Some(obs.client_order_id.clone()),
        expected: Some(ExpectedSnapshot::Order(exp.clone())),
        observed: Some(ObservedSnapshot::Order(obs.clone())),
        ts_detected_ms: now_ms,
        action_plan: format!(
            "cancel order {} on {}: expected qty {}, observed qty {}",
            obs.client_order_id, obs.symbol, exp.orig_qty, obs.orig_qty
        ),
    }
}

fn missing_order(exp: &ExpectedOrder, now_ms: i64) -> Mismatch {
    Mismatch {
        kind: MismatchKind::OrderMissingOnExchange,
        symbol: exp.symbol.clone(),
        client_order_id: Some(exp.client_order_id.clone()),
        expected: Some(ExpectedSnapshot::Order(exp.clone())),
        observed: None,
        ts_detected_ms: now_ms,
        action_plan: format!(
            "no action: expected order {} never observed on {}; check placement path",
            exp.client_order_id, exp.symbol
        ),
    }
}

fn unexpected_position(pos: &ObservedPosition, expected_amt: Decimal, now_ms: i64) -> Mismatch {
    Mismatch {
        kind: MismatchKind::PositionNonzeroUnexpected,
        symbol: pos.symbol.clone(),
        client_order_id: None,
        expected: Some(ExpectedSnapshot::Position {
            symbol: pos.symbol.clone(),
            position_amt: expected_amt,
        }),
        observed: Some(ObservedSnapshot::Position(pos.clone())),
        ts_detected_ms: now_ms,
        action_plan: format!(
            "flatten {} position {} (expected {}) with reduce-only market order",
            pos.symbol, pos.position_amt, expected_amt
        ),
    }
}
