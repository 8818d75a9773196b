use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use grinder_audit::{AuditEventType, AuditWriter};
use grinder_config::GrinderConfig;
use grinder_reconcile::{
    ExpectedStateStore, Mismatch, ObservedStateStore, ReconcileEngine, RoutedAction, RoutingPolicy,
};
use grinder_remediation::{
    BudgetTracker, CycleContext, ExchangePort, PriceSource, RemediationExecutor, RemediationResult,
    RemediationStatus,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::ReconcileMetrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Observed state older than this is detected against, never acted on.
    pub observed_max_age_ms: i64,
    /// Terminal observed orders older than this are forgotten.
    pub terminal_retention_ms: i64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            observed_max_age_ms: 30_000,
            terminal_retention_ms: 86_400_000,
        }
    }
}

/// Outcome of one cycle.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mismatches: Vec<Mismatch>,
    pub results: Vec<RemediationResult>,
    pub skipped_no_action: usize,
    pub skipped_terminal: usize,
    /// Observed state was too old to act on; nothing reached the executor.
    pub observed_stale: bool,
    pub planned: usize,
    pub executed: usize,
    pub blocked: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

impl RunReport {
    fn tally(&mut self) {
        let count = |results: &[RemediationResult], s: RemediationStatus| {
            results.iter().filter(|r| r.status == s).count()
        };
        self.planned = count(&self.results, RemediationStatus::Planned);
        self.executed = count(&self.results, RemediationStatus::Executed);
        self.blocked = count(&self.results, RemediationStatus::Blocked);
        self.failed = count(&self.results, RemediationStatus::Failed);
    }
}

pub struct ReconcileRunner<P, S> {
    engine: ReconcileEngine,
    routing: RoutingPolicy,
    executor: RemediationExecutor<P, S>,
    expected: ExpectedStateStore,
    observed: ObservedStateStore,
    metrics: ReconcileMetrics,
    audit: AuditWriter,
    settings: RunnerSettings,
}

impl<P: ExchangePort, S: PriceSource> ReconcileRunner<P, S> {
    pub fn new(
        engine: ReconcileEngine,
        executor: RemediationExecutor<P, S>,
        expected: ExpectedStateStore,
        audit: AuditWriter,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            engine,
            routing: RoutingPolicy,
            executor,
            expected,
            observed: ObservedStateStore::new(),
            metrics: ReconcileMetrics::new(),
            audit,
            settings,
        }
    }

    /// Wire everything from the loaded configuration. Loads the persisted
    /// budget and opens the audit log; either failing is fatal at startup.
    pub fn from_config(cfg: &GrinderConfig, port: P, prices: S, today: chrono::NaiveDate) -> Result<Self> {
        let budget = BudgetTracker::load(&cfg.budget_state_path, cfg.budget.clone(), today)?;
        let audit = AuditWriter::new(cfg.audit.clone())?;
        Ok(Self::new(
            ReconcileEngine::new(cfg.engine.clone()),
            RemediationExecutor::new(cfg.remediation.clone(), port, prices, budget),
            ExpectedStateStore::new(cfg.expected_max_orders, cfg.expected_ttl_ms),
            audit,
            RunnerSettings {
                observed_max_age_ms: cfg.observed_max_age_ms,
                terminal_retention_ms: cfg.expected_ttl_ms,
            },
        ))
    }

    /// One full cycle. Never fails: gate refusals are results, port errors
    /// are `FAILED` results, audit errors are logged.
    pub fn run_once(&mut self, ctx: &CycleContext) -> RunReport {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let now_ms = ctx.now_ms();

        self.housekeeping(now_ms);
        self.executor.begin_run();

        let observed_stale = self
            .observed
            .is_stale(now_ms, self.settings.observed_max_age_ms);

        self.audit_event(
            run_id,
            AuditEventType::RunStart,
            json!({
                "role": ctx.role.as_str(),
                "kill_switch_active": ctx.kill_switch_active,
                "observed_last_update_ms": self.observed.last_update_ms(),
                "observed_stale": observed_stale,
                "expected_orders": self.expected.len(),
            }),
        );

        let mismatches = self.engine.reconcile(&self.expected, &self.observed, now_ms);
        for m in &mismatches {
            self.metrics.record_mismatch(m.kind);
            self.audit_event(run_id, AuditEventType::MismatchDetected, to_payload(m));
        }

        let mut report = RunReport {
            run_id,
            started_at: ctx.now,
            mismatches: Vec::new(),
            results: Vec::new(),
            skipped_no_action: 0,
            skipped_terminal: 0,
            observed_stale,
            planned: 0,
            executed: 0,
            blocked: 0,
            failed: 0,
            elapsed_ms: 0,
        };

        if observed_stale {
            warn!(
                run_id = %run_id,
                mismatches = mismatches.len(),
                max_age_ms = self.settings.observed_max_age_ms,
                "observed state stale; detection only this cycle"
            );
        } else {
            for (m, action) in self.routing.plan(&mismatches) {
                let result = match action {
                    RoutedAction::NoAction => {
                        report.skipped_no_action += 1;
                        continue;
                    }
                    RoutedAction::Cancel => {
                        let Some(order) = m.observed_order().filter(|o| o.status.is_open()) else {
                            report.skipped_terminal += 1;
                            continue;
                        };
                        self.audit_event(run_id, AuditEventType::RemediateAttempt, attempt_payload(m, action));
                        self.executor.remediate_cancel(ctx, m.kind, order)
                    }
                    RoutedAction::Flatten => {
                        let Some(position) = m.observed_position() else {
                            report.skipped_no_action += 1;
                            continue;
                        };
                        self.audit_event(run_id, AuditEventType::RemediateAttempt, attempt_payload(m, action));
                        self.executor.remediate_flatten(ctx, m.kind, position)
                    }
                };
                self.metrics.record_result(&result);
                self.audit_event(run_id, AuditEventType::RemediateResult, to_payload(&result));
                report.results.push(result);
            }
        }

        report.mismatches = mismatches;
        report.tally();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics
            .record_run(report.elapsed_ms, report.mismatches.len(), observed_stale);

        self.audit_event(
            run_id,
            AuditEventType::RunEnd,
            json!({
                "mismatches": report.mismatches.len(),
                "planned": report.planned,
                "executed": report.executed,
                "blocked": report.blocked,
                "failed": report.failed,
                "skipped_no_action": report.skipped_no_action,
                "skipped_terminal": report.skipped_terminal,
                "observed_stale": observed_stale,
                "elapsed_ms": report.elapsed_ms,
            }),
        );
        info!(
            run_id = %run_id,
            mismatches = report.mismatches.len(),
            planned = report.planned,
            executed = report.executed,
            blocked = report.blocked,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            "reconcile cycle complete"
        );
        report
    }

    /// TTL prune of expected orders; terminal observed orders drop out of
    /// expected state and are forgotten after the retention window.
    fn housekeeping(&mut self, now_ms: i64) {
        let terminal: Vec<String> = self
            .observed
            .orders()
            .filter(|o| o.status.is_terminal())
            .map(|o| o.client_order_id.clone())
            .collect();
        for id in &terminal {
            self.expected.mark_terminal(id);
        }
        self.expected.prune_expired(now_ms);
        self.observed
            .prune_terminal(now_ms.saturating_sub(self.settings.terminal_retention_ms));
    }

    fn audit_event(&mut self, run_id: Uuid, event: AuditEventType, payload: Value) {
        if let Err(err) = self.audit.write(run_id, event, payload) {
            warn!(event = event.as_str(), error = %format!("{err:#}"), "audit write failed");
        }
    }

    pub fn expected(&self) -> &ExpectedStateStore {
        &self.expected
    }

    pub fn expected_mut(&mut self) -> &mut ExpectedStateStore {
        &mut self.expected
    }

    pub fn observed(&self) -> &ObservedStateStore {
        &self.observed
    }

    pub fn observed_mut(&mut self) -> &mut ObservedStateStore {
        &mut self.observed
    }

    pub fn executor(&self) -> &RemediationExecutor<P, S> {
        &self.executor
    }

    pub fn metrics(&self) -> &ReconcileMetrics {
        &self.metrics
    }

    pub fn audit(&self) -> &AuditWriter {
        &self.audit
    }

    pub fn settings(&self) -> RunnerSettings {
        self.settings
    }
}

fn attempt_payload(m: &Mismatch, action: RoutedAction) -> Value {
    json!({
        "kind": m.kind.as_str(),
        "action": action.as_str(),
        "symbol": m.symbol,
        "client_order_id": m.client_order_id,
        "action_plan": m.action_plan,
    })
}

fn to_payload<T: Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or_else(|e| json!({ "serialize_error": e.to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use grinder_audit::{read_records, AuditConfig};
    use grinder_reconcile::{
        EngineConfig, ExpectedOrder, ObservationSource, ObservedOrder, OrderStatus, Side,
    };
    use grinder_remediation::{
        BudgetLimits, ConfiguredAction, HaRole, PortCallToken, PortError, RemediationConfig,
        RemediationMode,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct NullPort {
        calls: u32,
    }

    impl ExchangePort for NullPort {
        fn cancel_order(&mut self, _: &str, _: &str, _: &PortCallToken) -> Result<bool, PortError> {
            self.calls += 1;
            Ok(true)
        }

        fn place_market_order(
            &mut self,
            _: &str,
            _: Side,
            _: Decimal,
            _: bool,
            _: &PortCallToken,
        ) -> Result<String, PortError> {
            self.calls += 1;
            Ok("x".to_string())
        }
    }

    struct NoPrice;

    impl PriceSource for NoPrice {
        fn get_price(&self, _: &str) -> Option<Decimal> {
            None
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn runner(audit: AuditWriter) -> ReconcileRunner<NullPort, NoPrice> {
        let cfg = RemediationConfig {
            enabled: true,
            action: ConfiguredAction::Cancel,
            mode: RemediationMode::ExecuteCancelAll,
            dry_run: false,
            armed: true,
            ..RemediationConfig::default()
        };
        let budget = BudgetTracker::in_memory(BudgetLimits::default(), now().date_naive());
        ReconcileRunner::new(
            ReconcileEngine::new(EngineConfig::default()),
            RemediationExecutor::new(cfg, NullPort { calls: 0 }, NoPrice, budget),
            ExpectedStateStore::default(),
            audit,
            RunnerSettings::default(),
        )
    }

    fn order(id: &str, status: OrderStatus, ts: i64) -> ObservedOrder {
        ObservedOrder {
            client_order_id: id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            status,
            price: dec!(100),
            orig_qty: dec!(1),
            executed_qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            ts_ms: ts,
            source: ObservationSource::Stream,
        }
    }

    #[test]
    fn unexpected_order_is_cancelled_and_audited() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditWriter::new(AuditConfig {
            path: dir.path().join("audit.jsonl"),
            ..AuditConfig::default()
        })
        .unwrap();
        let mut r = runner(audit);
        let now_ms = now().timestamp_millis();
        r.observed_mut().apply_stream_order(order(
            "grinder_default_BTCUSDT_0_1700000000_1",
            OrderStatus::New,
            now_ms - 10_000,
        ));

        let report = r.run_once(&CycleContext::new(HaRole::Active, now()));
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.executed, 1);
        assert_eq!(r.executor().port().calls, 1);
        assert_eq!(r.metrics().runs_total(), 1);

        let events: Vec<_> = read_records(dir.path().join("audit.jsonl"))
            .unwrap()
            .into_iter()
            .map(|rec| rec.event)
            .collect();
        assert_eq!(
            events,
            vec![
                AuditEventType::RunStart,
                AuditEventType::MismatchDetected,
                AuditEventType::RemediateAttempt,
                AuditEventType::RemediateResult,
                AuditEventType::RunEnd,
            ]
        );
    }

    #[test]
    fn stale_observed_state_detects_but_never_acts() {
        let mut r = runner(AuditWriter::disabled());
        let now_ms = now().timestamp_millis();
        r.observed_mut().apply_stream_order(order(
            "grinder_default_BTCUSDT_0_1700000000_1",
            OrderStatus::New,
            now_ms - 60_000,
        ));

        let report = r.run_once(&CycleContext::new(HaRole::Active, now()));
        assert!(report.observed_stale);
        assert_eq!(report.mismatches.len(), 1);
        assert!(report.results.is_empty());
        assert_eq!(r.executor().port().calls, 0);
        assert_eq!(r.metrics().runs_stale_total(), 1);
    }

    #[test]
    fn missing_orders_never_reach_executor() {
        let mut r = runner(AuditWriter::disabled());
        let now_ms = now().timestamp_millis();
        r.expected_mut().record(ExpectedOrder {
            client_order_id: "grinder_default_BTCUSDT_0_1700000000_9".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Sell,
            price: dec!(101),
            orig_qty: dec!(1),
            ts_created_ms: now_ms - 10_000,
        });
        r.observed_mut().apply_stream_order(order("other_venue_order", OrderStatus::New, now_ms));

        let report = r.run_once(&CycleContext::new(HaRole::Active, now()));
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.skipped_no_action, 1);
        assert!(report.results.is_empty());
    }

    #[test]
    fn terminal_observed_orders_leave_expected_state() {
        let mut r = runner(AuditWriter::disabled());
        let now_ms = now().timestamp_millis();
        let id = "grinder_default_BTCUSDT_0_1700000000_3";
        r.expected_mut().record(ExpectedOrder {
            client_order_id: id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            price: dec!(100),
            orig_qty: dec!(1),
            ts_created_ms: now_ms - 1_000,
        });
        r.observed_mut()
            .apply_stream_order(order(id, OrderStatus::Filled, now_ms - 500));

        let report = r.run_once(&CycleContext::new(HaRole::Active, now()));
        assert!(report.mismatches.is_empty());
        assert!(!r.expected().contains(id));
    }
}
