use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use grinder_audit::AuditWriter;
use grinder_config::GrinderConfig;
use grinder_reconcile::{
    ExpectedOrder, ExpectedStateStore, ObservedOrder, ObservedPosition, ReconcileEngine,
    RestSnapshot, Side,
};
use grinder_remediation::{
    BudgetTracker, CycleContext, ExchangePort, HaRole, PortCallToken, PortError, PriceSource,
    RemediationExecutor,
};
use grinder_runtime::{ReconcileRunner, RunnerSettings};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

/// Offline cycle input.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReplayState {
    /// Cycle clock (epoch ms). Required.
    pub now_ms: i64,
    pub expected_orders: Vec<ExpectedOrder>,
    pub expected_positions: BTreeMap<String, Decimal>,
    /// Applied in order, before REST snapshots.
    pub stream_orders: Vec<ObservedOrder>,
    pub stream_positions: Vec<ObservedPosition>,
    pub rest_snapshots: Vec<RestSnapshot>,
    pub prices: BTreeMap<String, Decimal>,
}

/// Every call fails: replay must never reach a venue.
struct RefusingPort;

impl ExchangePort for RefusingPort {
    fn cancel_order(&mut self, symbol: &str, id: &str, _token: &PortCallToken) -> Result<bool, PortError> {
        warn!(symbol, client_order_id = id, "replay refused cancel");
        Err(refused())
    }

    fn place_market_order(
        &mut self,
        symbol: &str,
        _side: Side,
        _quantity: Decimal,
        _reduce_only: bool,
        _token: &PortCallToken,
    ) -> Result<String, PortError> {
        warn!(symbol, "replay refused market order");
        Err(refused())
    }
}

fn refused() -> PortError {
    PortError::Rejected {
        code: -1,
        message: "replay: venue calls are disabled".to_string(),
    }
}

struct MapPrices(BTreeMap<String, Decimal>);

impl PriceSource for MapPrices {
    fn get_price(&self, symbol: &str) -> Option<Decimal> {
        self.0.get(symbol).copied()
    }
}

pub fn run(state_path: &Path, role: &str, kill_switch: bool, print_metrics: bool) -> Result<()> {
    let role: HaRole = role.parse().map_err(|e| anyhow!("invalid --role: {e}"))?;
    let cfg = GrinderConfig::from_env()?;

    let raw = fs::read_to_string(state_path)
        .with_context(|| format!("read replay state failed: {}", state_path.display()))?;
    let state: ReplayState = serde_json::from_str(&raw)
        .with_context(|| format!("parse replay state failed: {}", state_path.display()))?;
    if state.now_ms <= 0 {
        bail!("replay state must carry a positive now_ms");
    }
    let now: DateTime<Utc> = Utc
        .timestamp_millis_opt(state.now_ms)
        .single()
        .ok_or_else(|| anyhow!("now_ms out of range: {}", state.now_ms))?;
    let today = now.date_naive();

    // Seeded from the persisted file, but never written back.
    let persisted = BudgetTracker::load(&cfg.budget_state_path, cfg.budget.clone(), today)?;
    let budget = BudgetTracker::with_state(cfg.budget.clone(), persisted.state().clone(), today);

    let mut runner = ReconcileRunner::new(
        ReconcileEngine::new(cfg.engine.clone()),
        RemediationExecutor::new(cfg.remediation.clone(), RefusingPort, MapPrices(state.prices), budget),
        ExpectedStateStore::new(cfg.expected_max_orders, cfg.expected_ttl_ms),
        AuditWriter::disabled(),
        RunnerSettings {
            observed_max_age_ms: cfg.observed_max_age_ms,
            terminal_retention_ms: cfg.expected_ttl_ms,
        },
    );

    for order in state.expected_orders {
        runner.expected_mut().record(order);
    }
    for (symbol, amt) in state.expected_positions {
        runner.expected_mut().set_expected_position(symbol, amt);
    }
    for order in state.stream_orders {
        runner.observed_mut().apply_stream_order(order);
    }
    for position in state.stream_positions {
        runner.observed_mut().apply_stream_position(position);
    }
    for snapshot in state.rest_snapshots {
        let fetched_at_ms = snapshot.fetched_at_ms;
        let freshness = runner.observed_mut().merge_rest_snapshot(snapshot);
        if freshness.is_rejected() {
            warn!(fetched_at_ms, ?freshness, "replay REST snapshot rejected");
        }
    }

    let ctx = CycleContext {
        role,
        now,
        kill_switch_active: kill_switch,
    };
    let report = runner.run_once(&ctx);
    info!(run_id = %report.run_id, "replay complete");

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("render run report failed")?
    );
    if print_metrics {
        print!("{}", runner.metrics().render_prometheus());
    }
    Ok(())
}
