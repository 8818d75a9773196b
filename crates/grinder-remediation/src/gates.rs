//! The remediation gate pipeline.
//!
//! Each gate is a pure function of a [`GateContext`] returning pass or a
//! [`BlockReason`]. [`GATES`] fixes their order; [`evaluate`] stops at the
//! first refusal. Gate 12 (execute) is not here: it lives in the executor,
//! the only place that can mint a port token.
//!
//! ```text
//!  1 enabled      reconcile on, action configured for this routed action
//!  2 mode         staged rollout: only EXECUTE_* continue
//!  3 ownership    client order id parses under our identity scheme
//!  4 leadership   HA role is ACTIVE (kill switch does not matter here)
//!  5 allowlists   global whitelist, remediation symbol/strategy allowlists
//!  6 budget       day/run call and notional caps (check only)
//!  7 cooldown     global spacing between real actions
//!  8 circuit      per-run order and distinct-symbol caps
//!  9 notional     flatten: price known, notional within per-call cap
//! 10 dry_run      stop with PLANNED
//! 11 armed        master switch, mainnet permission
//! ```

use std::collections::BTreeSet;

use chrono::NaiveDate;
use grinder_identity::parse_client_order_id;
use grinder_reconcile::{MismatchKind, ObservedOrder, ObservedPosition, RoutedAction, Side};
use rust_decimal::Decimal;

use crate::budget::BudgetTracker;
use crate::types::{BlockReason, ExchangeEnv, HaRole, RemediationConfig, RemediationMode};

pub type GateVerdict = Result<(), BlockReason>;

pub type Gate = fn(&GateContext<'_>) -> GateVerdict;

/// Gates 1..=11 in evaluation order.
pub const GATES: [(&str, Gate); 11] = [
    ("enabled", gate_enabled),
    ("mode", gate_mode),
    ("ownership", gate_ownership),
    ("leadership", gate_leadership),
    ("allowlists", gate_allowlists),
    ("budget", gate_budget),
    ("cooldown", gate_cooldown),
    ("circuit", gate_circuit),
    ("notional", gate_notional),
    ("dry_run", gate_dry_run),
    ("armed", gate_armed),
];

/// Run every gate in order. `Err` carries the refusing gate's name.
pub fn evaluate(ctx: &GateContext<'_>) -> Result<(), (&'static str, BlockReason)> {
    for (name, gate) in GATES {
        gate(ctx).map_err(|reason| (name, reason))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One remediation candidate, resolved from a mismatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub kind: MismatchKind,
    pub action: RoutedAction,
    pub symbol: String,
    pub client_order_id: Option<String>,
    /// Flatten: side that reduces the position.
    pub side: Option<Side>,
    /// Flatten: absolute position size.
    pub quantity: Decimal,
    /// Flatten: mark price, if available.
    pub price: Option<Decimal>,
}

impl Candidate {
    pub fn cancel(kind: MismatchKind, order: &ObservedOrder) -> Self {
        Self {
            kind,
            action: RoutedAction::Cancel,
            symbol: order.symbol.clone(),
            client_order_id: Some(order.client_order_id.clone()),
            side: None,
            quantity: Decimal::ZERO,
            price: None,
        }
    }

    pub fn flatten(kind: MismatchKind, position: &ObservedPosition, price: Option<Decimal>) -> Self {
        let side = if position.position_amt.is_sign_negative() {
            Side::Buy
        } else {
            Side::Sell
        };
        Self {
            kind,
            action: RoutedAction::Flatten,
            symbol: position.symbol.clone(),
            client_order_id: None,
            side: Some(side),
            quantity: position.position_amt.abs(),
            price,
        }
    }

    /// Budget notional: zero for cancels, price x qty for flattens, `None`
    /// when a flatten has no price.
    pub fn notional(&self) -> Option<Decimal> {
        match self.action {
            RoutedAction::Flatten => self.price.map(|p| p * self.quantity),
            _ => Some(Decimal::ZERO),
        }
    }

    fn strategy_id(&self, ctx: &GateContext<'_>) -> Option<String> {
        let id = self.client_order_id.as_deref()?;
        parse_client_order_id(id, &ctx.config.identity.prefix)
            .ok()
            .map(|p| p.strategy_id)
    }
}

/// Time of the last real (EXECUTED/FAILED) action, across every target.
///
/// One timestamp for the whole executor: after any venue call, no other
/// remediation of any kind runs until `cooldown_ms` has passed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cooldown {
    last_real_action_ms: Option<i64>,
}

impl Cooldown {
    pub fn record(&mut self, now_ms: i64) {
        self.last_real_action_ms = Some(now_ms);
    }

    /// `true` while fewer than `cooldown_ms` have elapsed since the last
    /// real action.
    pub fn is_cooling(&self, now_ms: i64, cooldown_ms: i64) -> bool {
        self.last_real_action_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < cooldown_ms)
    }

    pub fn last_real_action_ms(&self) -> Option<i64> {
        self.last_real_action_ms
    }
}

/// Non-blocked outcomes in the current run.
#[derive(Clone, Debug, Default)]
pub struct RunCounters {
    orders: u32,
    symbols: BTreeSet<String>,
}

impl RunCounters {
    pub fn record(&mut self, symbol: &str) {
        self.orders += 1;
        self.symbols.insert(symbol.to_string());
    }

    pub fn reset(&mut self) {
        self.orders = 0;
        self.symbols.clear();
    }

    pub fn orders(&self) -> u32 {
        self.orders
    }

    pub fn symbols(&self) -> usize {
        self.symbols.len()
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }
}

/// Everything a gate may look at. Borrowed, never mutated.
pub struct GateContext<'a> {
    pub config: &'a RemediationConfig,
    pub role: HaRole,
    pub candidate: &'a Candidate,
    pub budget: &'a BudgetTracker,
    pub cooldown: &'a Cooldown,
    pub run: &'a RunCounters,
    pub today: NaiveDate,
    pub now_ms: i64,
}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

pub fn gate_enabled(ctx: &GateContext<'_>) -> GateVerdict {
    if !ctx.config.enabled {
        return Err(BlockReason::ReconcileDisabled);
    }
    if !ctx.config.action.permits(ctx.candidate.action) {
        return Err(BlockReason::ActionNotConfigured);
    }
    Ok(())
}

pub fn gate_mode(ctx: &GateContext<'_>) -> GateVerdict {
    match ctx.config.mode {
        RemediationMode::DetectOnly => Err(BlockReason::ModeDetectOnly),
        RemediationMode::PlanOnly => Err(BlockReason::ModePlanOnly),
        RemediationMode::Blocked => Err(BlockReason::ModeBlocked),
        RemediationMode::ExecuteCancelAll => match ctx.candidate.action {
            RoutedAction::Cancel => Ok(()),
            _ => Err(BlockReason::ModeDisallowsAction),
        },
        RemediationMode::ExecuteFlatten => match ctx.candidate.action {
            RoutedAction::Cancel | RoutedAction::Flatten => Ok(()),
            RoutedAction::NoAction => Err(BlockReason::ModeDisallowsAction),
        },
    }
}

/// Orders must carry an id that parses under our scheme with an accepted
/// strategy. Positions have no id; they are scoped by gate 5.
pub fn gate_ownership(ctx: &GateContext<'_>) -> GateVerdict {
    if ctx.candidate.action != RoutedAction::Cancel {
        return Ok(());
    }
    let identity = &ctx.config.identity;
    let Some(id) = ctx.candidate.client_order_id.as_deref() else {
        return Err(BlockReason::NotOurs);
    };
    match parse_client_order_id(id, &identity.prefix) {
        Ok(parsed) if identity.strategy_allowed(&parsed.strategy_id) => Ok(()),
        _ => Err(BlockReason::NotOurs),
    }
}

pub fn gate_leadership(ctx: &GateContext<'_>) -> GateVerdict {
    match ctx.role {
        HaRole::Active => Ok(()),
        HaRole::Standby | HaRole::Unknown => Err(BlockReason::NotLeader),
    }
}

pub fn gate_allowlists(ctx: &GateContext<'_>) -> GateVerdict {
    let cfg = ctx.config;
    // Config lists are upper-cased at load; match venue symbols the same way.
    let symbol = ctx.candidate.symbol.to_ascii_uppercase();
    if !cfg.symbol_whitelist.is_empty() && !cfg.symbol_whitelist.contains(&symbol) {
        return Err(BlockReason::SymbolNotWhitelisted);
    }
    if !cfg.symbol_allowlist.is_empty() && !cfg.symbol_allowlist.contains(&symbol) {
        return Err(BlockReason::SymbolNotAllowlisted);
    }
    if !cfg.strategy_allowlist.is_empty() {
        if let Some(strategy) = ctx.candidate.strategy_id(ctx) {
            if !cfg.strategy_allowlist.contains(&strategy) {
                return Err(BlockReason::StrategyNotAllowlisted);
            }
        }
    }
    Ok(())
}

pub fn gate_budget(ctx: &GateContext<'_>) -> GateVerdict {
    let notional = ctx.candidate.notional().unwrap_or(Decimal::ZERO);
    ctx.budget
        .check(ctx.today, 1, notional)
        .map_err(|_| BlockReason::BudgetExceeded)
}

pub fn gate_cooldown(ctx: &GateContext<'_>) -> GateVerdict {
    if ctx.cooldown.is_cooling(ctx.now_ms, ctx.config.cooldown_ms) {
        return Err(BlockReason::CooldownActive);
    }
    Ok(())
}

pub fn gate_circuit(ctx: &GateContext<'_>) -> GateVerdict {
    if ctx.run.orders() >= ctx.config.max_orders_per_run {
        return Err(BlockReason::MaxOrdersPerRun);
    }
    let new_symbol = !ctx.run.has_symbol(&ctx.candidate.symbol);
    if new_symbol && ctx.run.symbols() >= ctx.config.max_symbols_per_run as usize {
        return Err(BlockReason::MaxSymbolsPerRun);
    }
    Ok(())
}

/// Flatten only. Over the per-call cap is a hard block: no partial flatten.
pub fn gate_notional(ctx: &GateContext<'_>) -> GateVerdict {
    if ctx.candidate.action != RoutedAction::Flatten {
        return Ok(());
    }
    let Some(notional) = ctx.candidate.notional() else {
        return Err(BlockReason::PriceUnavailable);
    };
    if notional > ctx.config.flatten_max_notional_per_call {
        return Err(BlockReason::NotionalCapExceeded);
    }
    Ok(())
}

pub fn gate_dry_run(ctx: &GateContext<'_>) -> GateVerdict {
    if ctx.config.dry_run {
        return Err(BlockReason::DryRun);
    }
    Ok(())
}

pub fn gate_armed(ctx: &GateContext<'_>) -> GateVerdict {
    if !ctx.config.armed {
        return Err(BlockReason::NotArmed);
    }
    if ctx.config.exchange_env == ExchangeEnv::Mainnet && !ctx.config.allow_mainnet_trade {
        return Err(BlockReason::MainnetNotAllowed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetLimits;
    use crate::types::ConfiguredAction;
    use grinder_reconcile::{ObservationSource, OrderStatus};
    use rust_decimal_macros::dec;

    const OURS: &str = "grinder_default_BTCUSDT_0_1700000000_1";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn live_config() -> RemediationConfig {
        RemediationConfig {
            enabled: true,
            action: ConfiguredAction::CancelAndFlatten,
            mode: RemediationMode::ExecuteFlatten,
            dry_run: false,
            armed: true,
            ..RemediationConfig::default()
        }
    }

    fn order(id: &str) -> ObservedOrder {
        ObservedOrder {
            client_order_id: id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            status: OrderStatus::New,
            price: dec!(100),
            orig_qty: dec!(1),
            executed_qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            ts_ms: 0,
            source: ObservationSource::Rest,
        }
    }

    fn position(amt: Decimal) -> ObservedPosition {
        ObservedPosition {
            symbol: "BTCUSDT".to_string(),
            position_amt: amt,
            entry_price: dec!(100),
            unrealized_pnl: Decimal::ZERO,
            ts_ms: 0,
            source: ObservationSource::Rest,
        }
    }

    struct Fixture {
        config: RemediationConfig,
        role: HaRole,
        budget: BudgetTracker,
        cooldown: Cooldown,
        run: RunCounters,
    }

    impl Fixture {
        fn new(config: RemediationConfig) -> Self {
            Self {
                config,
                role: HaRole::Active,
                budget: BudgetTracker::in_memory(BudgetLimits::default(), today()),
                cooldown: Cooldown::default(),
                run: RunCounters::default(),
            }
        }

        fn eval(&self, candidate: &Candidate) -> Result<(), (&'static str, BlockReason)> {
            evaluate(&GateContext {
                config: &self.config,
                role: self.role,
                candidate,
                budget: &self.budget,
                cooldown: &self.cooldown,
                run: &self.run,
                today: today(),
                now_ms: 100_000,
            })
        }
    }

    fn cancel(id: &str) -> Candidate {
        Candidate::cancel(MismatchKind::OrderExistsUnexpected, &order(id))
    }

    #[test]
    fn all_gates_pass_for_live_cancel() {
        assert_eq!(Fixture::new(live_config()).eval(&cancel(OURS)), Ok(()));
    }

    #[test]
    fn disabled_stops_at_first_gate() {
        let f = Fixture::new(RemediationConfig::default());
        assert_eq!(f.eval(&cancel(OURS)), Err(("enabled", BlockReason::ReconcileDisabled)));
    }

    #[test]
    fn action_must_be_configured() {
        let f = Fixture::new(RemediationConfig {
            action: ConfiguredAction::Flatten,
            ..live_config()
        });
        assert_eq!(f.eval(&cancel(OURS)).unwrap_err().1, BlockReason::ActionNotConfigured);
    }

    #[test]
    fn staged_modes_block_before_execution() {
        for (mode, reason) in [
            (RemediationMode::DetectOnly, BlockReason::ModeDetectOnly),
            (RemediationMode::PlanOnly, BlockReason::ModePlanOnly),
            (RemediationMode::Blocked, BlockReason::ModeBlocked),
        ] {
            let f = Fixture::new(RemediationConfig { mode, ..live_config() });
            assert_eq!(f.eval(&cancel(OURS)), Err(("mode", reason)));
        }
    }

    #[test]
    fn cancel_all_mode_refuses_flatten() {
        let f = Fixture::new(RemediationConfig {
            mode: RemediationMode::ExecuteCancelAll,
            ..live_config()
        });
        let c = Candidate::flatten(MismatchKind::PositionNonzeroUnexpected, &position(dec!(1)), Some(dec!(10)));
        assert_eq!(f.eval(&c).unwrap_err().1, BlockReason::ModeDisallowsAction);
    }

    #[test]
    fn foreign_and_malformed_ids_are_not_ours() {
        let f = Fixture::new(live_config());
        for id in ["manual_order_999", "grinder_default_BTCUSDT_x_1_1", "grinder_"] {
            assert_eq!(f.eval(&cancel(id)), Err(("ownership", BlockReason::NotOurs)), "{id}");
        }
    }

    #[test]
    fn ownership_respects_identity_strategy_allowlist() {
        let mut config = live_config();
        config.identity = config.identity.with_allowed_strategies(["grid2"]);
        let f = Fixture::new(config);
        assert_eq!(f.eval(&cancel(OURS)).unwrap_err().1, BlockReason::NotOurs);
    }

    #[test]
    fn non_active_roles_are_not_leader() {
        for role in [HaRole::Standby, HaRole::Unknown] {
            let mut f = Fixture::new(live_config());
            f.role = role;
            assert_eq!(f.eval(&cancel(OURS)), Err(("leadership", BlockReason::NotLeader)));
        }
    }

    #[test]
    fn whitelist_checked_before_allowlists() {
        let f = Fixture::new(RemediationConfig {
            symbol_whitelist: ["ETHUSDT".to_string()].into(),
            symbol_allowlist: ["ETHUSDT".to_string()].into(),
            ..live_config()
        });
        assert_eq!(f.eval(&cancel(OURS)).unwrap_err().1, BlockReason::SymbolNotWhitelisted);

        let f = Fixture::new(RemediationConfig {
            symbol_allowlist: ["ETHUSDT".to_string()].into(),
            ..live_config()
        });
        assert_eq!(f.eval(&cancel(OURS)).unwrap_err().1, BlockReason::SymbolNotAllowlisted);

        let f = Fixture::new(RemediationConfig {
            strategy_allowlist: ["grid2".to_string()].into(),
            ..live_config()
        });
        assert_eq!(f.eval(&cancel(OURS)).unwrap_err().1, BlockReason::StrategyNotAllowlisted);
    }

    #[test]
    fn symbol_lists_match_regardless_of_venue_case() {
        let f = Fixture::new(RemediationConfig {
            symbol_whitelist: ["BTCUSDT".to_string()].into(),
            symbol_allowlist: ["BTCUSDT".to_string()].into(),
            ..live_config()
        });
        let mut lower = order(OURS);
        lower.symbol = "btcusdt".to_string();
        let c = Candidate::cancel(MismatchKind::OrderExistsUnexpected, &lower);
        assert_eq!(f.eval(&c), Ok(()));

        lower.symbol = "ethusdt".to_string();
        let c = Candidate::cancel(MismatchKind::OrderExistsUnexpected, &lower);
        assert_eq!(f.eval(&c), Err(("allowlists", BlockReason::SymbolNotWhitelisted)));
    }

    #[test]
    fn exhausted_budget_blocks() {
        let mut f = Fixture::new(live_config());
        f.budget = BudgetTracker::in_memory(
            BudgetLimits {
                max_calls_per_day: 0,
                ..BudgetLimits::default()
            },
            today(),
        );
        assert_eq!(f.eval(&cancel(OURS)), Err(("budget", BlockReason::BudgetExceeded)));
    }

    #[test]
    fn cooldown_is_global_across_targets() {
        let mut f = Fixture::new(live_config());
        f.cooldown.record(90_000);
        assert_eq!(f.eval(&cancel(OURS)), Err(("cooldown", BlockReason::CooldownActive)));
        let other_order = cancel("grinder_default_BTCUSDT_0_1700000000_2");
        assert_eq!(f.eval(&other_order).unwrap_err().1, BlockReason::CooldownActive);
        let other_symbol = Candidate::flatten(MismatchKind::PositionNonzeroUnexpected, &position(dec!(1)), Some(dec!(10)));
        assert_eq!(f.eval(&other_symbol).unwrap_err().1, BlockReason::CooldownActive);

        f.cooldown.record(40_000);
        assert_eq!(f.eval(&other_order), Ok(()));
    }

    #[test]
    fn circuit_caps_orders_and_symbols() {
        let mut f = Fixture::new(RemediationConfig {
            max_orders_per_run: 2,
            max_symbols_per_run: 1,
            ..live_config()
        });
        f.run.record("ETHUSDT");
        assert_eq!(f.eval(&cancel(OURS)).unwrap_err().1, BlockReason::MaxSymbolsPerRun);
        f.run.record("BTCUSDT");
        assert_eq!(f.eval(&cancel(OURS)).unwrap_err().1, BlockReason::MaxOrdersPerRun);
    }

    #[test]
    fn flatten_needs_price_and_fits_per_call_cap() {
        let f = Fixture::new(live_config());
        let pos = position(dec!(-2));

        let no_price = Candidate::flatten(MismatchKind::PositionNonzeroUnexpected, &pos, None);
        assert_eq!(f.eval(&no_price), Err(("notional", BlockReason::PriceUnavailable)));

        let too_big = Candidate::flatten(MismatchKind::PositionNonzeroUnexpected, &pos, Some(dec!(250.01)));
        assert_eq!(f.eval(&too_big).unwrap_err().1, BlockReason::NotionalCapExceeded);

        let at_cap = Candidate::flatten(MismatchKind::PositionNonzeroUnexpected, &pos, Some(dec!(250)));
        assert_eq!(at_cap.side, Some(Side::Buy));
        assert_eq!(at_cap.notional(), Some(dec!(500)));
        assert_eq!(f.eval(&at_cap), Ok(()));
    }

    #[test]
    fn dry_run_precedes_armed() {
        let f = Fixture::new(RemediationConfig {
            dry_run: true,
            armed: false,
            ..live_config()
        });
        assert_eq!(f.eval(&cancel(OURS)), Err(("dry_run", BlockReason::DryRun)));
    }

    #[test]
    fn mainnet_requires_permission() {
        let f = Fixture::new(RemediationConfig {
            exchange_env: ExchangeEnv::Mainnet,
            ..live_config()
        });
        assert_eq!(f.eval(&cancel(OURS)), Err(("armed", BlockReason::MainnetNotAllowed)));

        let f = Fixture::new(RemediationConfig {
            armed: false,
            ..live_config()
        });
        assert_eq!(f.eval(&cancel(OURS)), Err(("armed", BlockReason::NotArmed)));
    }
}
