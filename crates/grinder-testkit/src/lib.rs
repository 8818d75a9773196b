//! Test doubles and builders shared by the scenario tests under `tests/`.
//!
//! Nothing here talks to a venue. [`FakeExchangePort`] records every call it
//! receives so scenarios can assert on exact call counts.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use grinder_audit::AuditWriter;
use grinder_identity::{generate_client_order_id, IdentityConfig};
use grinder_reconcile::{
    EngineConfig, ExpectedOrder, ExpectedStateStore, ObservationSource, ObservedOrder,
    ObservedPosition, OrderStatus, ReconcileEngine, Side,
};
use grinder_remediation::{
    BudgetLimits, BudgetTracker, ConfiguredAction, CycleContext, ExchangePort, HaRole,
    PortCallToken, PortError, PriceSource, RemediationConfig, RemediationExecutor,
    RemediationMode,
};
use grinder_runtime::{ReconcileRunner, RunnerSettings};
use rust_decimal::Decimal;

/// Fixed cycle clock used across scenarios: 2023-11-14T22:15:00Z.
pub const NOW_MS: i64 = 1_700_000_100_000;

pub fn now() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(NOW_MS)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn at(offset_ms: i64) -> DateTime<Utc> {
    now() + chrono::Duration::milliseconds(offset_ms)
}

pub fn cycle(role: HaRole) -> CycleContext {
    CycleContext::new(role, now())
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortCall {
    Cancel {
        symbol: String,
        client_order_id: String,
    },
    Market {
        symbol: String,
        side: Side,
        quantity: Decimal,
        reduce_only: bool,
    },
}

/// Records every call; optionally fails them all.
#[derive(Debug, Default)]
pub struct FakeExchangePort {
    calls: Vec<PortCall>,
    fail_with: Option<PortError>,
    next_order_id: u64,
}

impl FakeExchangePort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(err: PortError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> &[PortCall] {
        &self.calls
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn cancel_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, PortCall::Cancel { .. }))
            .count()
    }

    pub fn market_count(&self) -> usize {
        self.calls.len() - self.cancel_count()
    }
}

impl ExchangePort for FakeExchangePort {
    fn cancel_order(
        &mut self,
        symbol: &str,
        client_order_id: &str,
        _token: &PortCallToken,
    ) -> Result<bool, PortError> {
        self.calls.push(PortCall::Cancel {
            symbol: symbol.to_string(),
            client_order_id: client_order_id.to_string(),
        });
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(true),
        }
    }

    fn place_market_order(
        &mut self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        reduce_only: bool,
        _token: &PortCallToken,
    ) -> Result<String, PortError> {
        self.calls.push(PortCall::Market {
            symbol: symbol.to_string(),
            side,
            quantity,
            reduce_only,
        });
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        self.next_order_id += 1;
        Ok(format!("fake-{}", self.next_order_id))
    }
}

#[derive(Clone, Debug, Default)]
pub struct FixedPriceSource {
    prices: BTreeMap<String, Decimal>,
}

impl FixedPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, symbol: &str, price: Decimal) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }
}

impl PriceSource for FixedPriceSource {
    fn get_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Every switch on: enabled, cancel+flatten, EXECUTE_FLATTEN, live, armed.
pub fn live_config() -> RemediationConfig {
    RemediationConfig {
        enabled: true,
        action: ConfiguredAction::CancelAndFlatten,
        mode: RemediationMode::ExecuteFlatten,
        dry_run: false,
        armed: true,
        ..RemediationConfig::default()
    }
}

/// Budget with room for any scenario that does not test budgets.
pub fn roomy_limits() -> BudgetLimits {
    BudgetLimits {
        max_calls_per_day: 1_000,
        max_notional_per_day: Decimal::from(1_000_000),
        max_calls_per_run: 1_000,
        max_notional_per_run: Decimal::from(1_000_000),
    }
}

pub fn executor(
    config: RemediationConfig,
    prices: FixedPriceSource,
) -> RemediationExecutor<FakeExchangePort, FixedPriceSource> {
    executor_with_budget(
        config,
        prices,
        BudgetTracker::in_memory(roomy_limits(), now().date_naive()),
    )
}

pub fn executor_with_budget(
    config: RemediationConfig,
    prices: FixedPriceSource,
    budget: BudgetTracker,
) -> RemediationExecutor<FakeExchangePort, FixedPriceSource> {
    RemediationExecutor::new(config, FakeExchangePort::new(), prices, budget)
}

pub fn runner(
    config: RemediationConfig,
    prices: FixedPriceSource,
    audit: AuditWriter,
) -> ReconcileRunner<FakeExchangePort, FixedPriceSource> {
    runner_with(executor(config, prices), audit)
}

/// Runner around a caller-built executor (failing port, file-backed budget).
pub fn runner_with(
    executor: RemediationExecutor<FakeExchangePort, FixedPriceSource>,
    audit: AuditWriter,
) -> ReconcileRunner<FakeExchangePort, FixedPriceSource> {
    let engine = ReconcileEngine::new(EngineConfig {
        identity: executor.config().identity.clone(),
        ..EngineConfig::default()
    });
    ReconcileRunner::new(
        engine,
        executor,
        ExpectedStateStore::default(),
        audit,
        RunnerSettings::default(),
    )
}

/// Our client order id for `symbol` under the default identity.
pub fn our_id(symbol: &str, level: u32, seq: u64) -> String {
    generate_client_order_id(&IdentityConfig::default(), symbol, level, 1_700_000_000, seq)
        .unwrap_or_else(|e| panic!("test id generation failed: {e}"))
}

pub fn observed_order(id: &str, symbol: &str, ts_ms: i64) -> ObservedOrder {
    ObservedOrder {
        client_order_id: id.to_string(),
        symbol: symbol.to_string(),
        side: Side::Buy,
        status: OrderStatus::New,
        price: Decimal::from(100),
        orig_qty: Decimal::ONE,
        executed_qty: Decimal::ZERO,
        avg_price: Decimal::ZERO,
        ts_ms,
        source: ObservationSource::Stream,
    }
}

pub fn observed_position(symbol: &str, amt: Decimal, ts_ms: i64) -> ObservedPosition {
    ObservedPosition {
        symbol: symbol.to_string(),
        position_amt: amt,
        entry_price: Decimal::from(100),
        unrealized_pnl: Decimal::ZERO,
        ts_ms,
        source: ObservationSource::Stream,
    }
}

pub fn expected_order(id: &str, symbol: &str, ts_created_ms: i64) -> ExpectedOrder {
    ExpectedOrder {
        client_order_id: id.to_string(),
        symbol: symbol.to_string(),
        side: Side::Buy,
        price: Decimal::from(100),
        orig_qty: Decimal::ONE,
        ts_created_ms,
    }
}
