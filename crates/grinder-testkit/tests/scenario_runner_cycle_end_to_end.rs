//! Scenario: full reconcile cycles through the runner against a fake venue.
//!
//! # Invariants under test
//!
//! 1. Within a symbol, cancels run before the flatten; flattens are
//!    reduce-only market orders on the closing side.
//! 2. The kill switch is logged, never a block: remediation reduces risk.
//! 3. Budget, cooldown, and per-run counters changed by one candidate are
//!    visible to the next candidate in the same cycle.
//! 4. The cooldown is global: one EXECUTED/FAILED action holds back every
//!    other candidate, of any symbol or kind, until it expires. It carries
//!    across cycles.
//! 5. A flatten with no price is `BLOCKED`, reason `price_unavailable`.
//! 6. Stale observed state => detection only: mismatches reported, nothing
//!    reaches the executor.
//! 7. A port error is a `FAILED` result: budget already consumed, cooldown
//!    started, cycle continues with the rest blocked by the cooldown.
//! 8. Every cycle leaves a sequenced audit trail bracketed by RUN_START and
//!    RUN_END, all under one run id.

use grinder_audit::{read_records, AuditConfig, AuditEventType, AuditWriter};
use grinder_reconcile::{MismatchKind, RoutedAction, Side};
use grinder_remediation::{
    BlockReason, BudgetTracker, CycleContext, HaRole, PortError, RemediationConfig,
    RemediationExecutor, RemediationStatus,
};
use grinder_testkit::*;
use rust_decimal_macros::dec;

/// Live config without spacing between real actions, for scenarios that
/// need several venue calls in one cycle.
fn uncooled_config() -> RemediationConfig {
    RemediationConfig {
        cooldown_ms: 0,
        ..live_config()
    }
}

fn btc_prices() -> FixedPriceSource {
    FixedPriceSource::new()
        .with("BTCUSDT", dec!(100))
        .with("ETHUSDT", dec!(50))
}

// ---------------------------------------------------------------------------
// Ordering and kill switch
// ---------------------------------------------------------------------------

#[test]
fn cancel_runs_before_flatten_within_symbol() {
    let mut runner = runner(uncooled_config(), btc_prices(), AuditWriter::disabled());
    runner
        .observed_mut()
        .apply_stream_position(observed_position("BTCUSDT", dec!(1.5), NOW_MS - 1_000));
    runner
        .observed_mut()
        .apply_stream_order(observed_order(&our_id("BTCUSDT", 0, 1), "BTCUSDT", NOW_MS - 10_000));

    let report = runner.run_once(&cycle(HaRole::Active));

    assert_eq!(report.executed, 2);
    assert_eq!(
        runner.executor().port().calls(),
        &[
            PortCall::Cancel {
                symbol: "BTCUSDT".to_string(),
                client_order_id: our_id("BTCUSDT", 0, 1),
            },
            PortCall::Market {
                symbol: "BTCUSDT".to_string(),
                side: Side::Sell,
                quantity: dec!(1.5),
                reduce_only: true,
            },
        ]
    );
    assert_eq!(report.results[1].exchange_order_id.as_deref(), Some("fake-1"));
}

#[test]
fn kill_switch_is_logged_not_blocking() {
    let mut runner = runner(live_config(), btc_prices(), AuditWriter::disabled());
    runner
        .observed_mut()
        .apply_stream_position(observed_position("BTCUSDT", dec!(-2), NOW_MS - 1_000));

    let ctx = CycleContext {
        kill_switch_active: true,
        ..cycle(HaRole::Active)
    };
    let report = runner.run_once(&ctx);

    assert_eq!(report.executed, 1);
    assert_eq!(
        runner.executor().port().calls(),
        &[PortCall::Market {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            quantity: dec!(2),
            reduce_only: true,
        }]
    );
}

// ---------------------------------------------------------------------------
// Same-cycle and cross-cycle state
// ---------------------------------------------------------------------------

#[test]
fn symbol_cap_sees_earlier_results_in_same_cycle() {
    let config = RemediationConfig {
        max_symbols_per_run: 1,
        ..uncooled_config()
    };
    let mut runner = runner(config, btc_prices(), AuditWriter::disabled());
    for (symbol, seq) in [("BTCUSDT", 1), ("BTCUSDT", 2), ("ETHUSDT", 3)] {
        runner
            .observed_mut()
            .apply_stream_order(observed_order(&our_id(symbol, 0, seq), symbol, NOW_MS - 10_000));
    }

    let report = runner.run_once(&cycle(HaRole::Active));

    let statuses: Vec<_> = report
        .results
        .iter()
        .map(|r| (r.symbol.as_str(), r.status, r.block_reason))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("BTCUSDT", RemediationStatus::Executed, None),
            ("BTCUSDT", RemediationStatus::Executed, None),
            ("ETHUSDT", RemediationStatus::Blocked, Some(BlockReason::MaxSymbolsPerRun)),
        ]
    );
    assert_eq!(runner.executor().budget().state().calls_today, 2);
    assert_eq!(runner.executor().run_counters().symbols(), 1);
}

#[test]
fn one_execution_cools_down_the_rest_of_the_cycle() {
    let mut runner = runner(live_config(), btc_prices(), AuditWriter::disabled());
    for seq in 1..=3 {
        runner
            .observed_mut()
            .apply_stream_order(observed_order(&our_id("BTCUSDT", 0, seq), "BTCUSDT", NOW_MS - 10_000));
    }
    runner
        .observed_mut()
        .apply_stream_position(observed_position("ETHUSDT", dec!(1), NOW_MS - 1_000));

    let report = runner.run_once(&cycle(HaRole::Active));

    assert_eq!(report.executed, 1);
    assert_eq!(report.blocked, 3);
    let reasons: Vec<_> = report.results.iter().map(|r| r.block_reason).collect();
    assert_eq!(
        reasons,
        vec![
            None,
            Some(BlockReason::CooldownActive),
            Some(BlockReason::CooldownActive),
            Some(BlockReason::CooldownActive),
        ]
    );
    assert_eq!(runner.executor().port().call_count(), 1);
    assert_eq!(runner.executor().budget().state().calls_today, 1);
    assert_eq!(runner.executor().cooldown().last_real_action_ms(), Some(NOW_MS));
    assert_eq!(runner.metrics().blocks(BlockReason::CooldownActive), 3);
}

#[test]
fn cooldown_carries_across_cycles_until_it_expires() {
    let mut runner = runner(live_config(), btc_prices(), AuditWriter::disabled());
    let id = our_id("BTCUSDT", 0, 1);
    runner
        .observed_mut()
        .apply_stream_order(observed_order(&id, "BTCUSDT", NOW_MS - 10_000));

    let first = runner.run_once(&cycle(HaRole::Active));
    assert_eq!(first.executed, 1);

    // The fake venue never reports the cancel, so the order is still seen.
    let second = runner.run_once(&CycleContext::new(HaRole::Active, at(10_000)));
    assert_eq!(second.results[0].block_reason, Some(BlockReason::CooldownActive));

    runner
        .observed_mut()
        .apply_stream_order(observed_order(&id, "BTCUSDT", NOW_MS + 55_000));
    let third = runner.run_once(&CycleContext::new(HaRole::Active, at(61_000)));
    assert_eq!(third.executed, 1);
    assert_eq!(runner.executor().port().cancel_count(), 2);
}

// ---------------------------------------------------------------------------
// Refusals and failures
// ---------------------------------------------------------------------------

#[test]
fn flatten_without_price_is_blocked() {
    let mut runner = runner(live_config(), FixedPriceSource::new(), AuditWriter::disabled());
    runner
        .observed_mut()
        .apply_stream_position(observed_position("SOLUSDT", dec!(3), NOW_MS - 1_000));

    let report = runner.run_once(&cycle(HaRole::Active));

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].block_reason, Some(BlockReason::PriceUnavailable));
    assert_eq!(report.results[0].notional, None);
    assert_eq!(runner.executor().port().call_count(), 0);
    assert_eq!(runner.metrics().blocks(BlockReason::PriceUnavailable), 1);
}

#[test]
fn stale_observed_state_is_detect_only() {
    let mut runner = runner(live_config(), btc_prices(), AuditWriter::disabled());
    runner
        .observed_mut()
        .apply_stream_order(observed_order(&our_id("BTCUSDT", 0, 1), "BTCUSDT", NOW_MS - 40_000));

    let report = runner.run_once(&cycle(HaRole::Active));

    assert!(report.observed_stale);
    assert_eq!(report.mismatches.len(), 1);
    assert!(report.results.is_empty());
    assert_eq!(runner.executor().port().call_count(), 0);
    assert_eq!(runner.metrics().runs_stale_total(), 1);
    assert_eq!(runner.metrics().mismatches(MismatchKind::OrderExistsUnexpected), 1);
}

#[test]
fn port_error_is_failed_and_still_cools_down() {
    let executor = RemediationExecutor::new(
        live_config(),
        FakeExchangePort::failing(PortError::Timeout),
        btc_prices(),
        BudgetTracker::in_memory(roomy_limits(), now().date_naive()),
    );
    let mut runner = runner_with(executor, AuditWriter::disabled());
    runner
        .observed_mut()
        .apply_stream_order(observed_order(&our_id("BTCUSDT", 0, 1), "BTCUSDT", NOW_MS - 10_000));
    runner
        .observed_mut()
        .apply_stream_order(observed_order(&our_id("BTCUSDT", 0, 2), "BTCUSDT", NOW_MS - 10_000));

    let report = runner.run_once(&cycle(HaRole::Active));

    assert_eq!(report.failed, 1);
    assert_eq!(report.results[0].error.as_deref(), Some("request timed out"));
    assert_eq!(report.results[1].block_reason, Some(BlockReason::CooldownActive));
    assert_eq!(runner.executor().budget().state().calls_today, 1);
    assert_eq!(runner.executor().cooldown().last_real_action_ms(), Some(NOW_MS));
    assert_eq!(
        runner
            .metrics()
            .remediations(RoutedAction::Cancel, RemediationStatus::Failed),
        1
    );

    let again = runner.run_once(&CycleContext::new(HaRole::Active, at(5_000)));
    assert_eq!(again.blocked, 2);
    assert_eq!(runner.executor().port().call_count(), 1);
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

#[test]
fn cycle_writes_bracketed_audit_trail() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("audit").join("reconcile_audit.jsonl");
    let audit = AuditWriter::new(AuditConfig {
        enabled: true,
        path: path.clone(),
        ..AuditConfig::default()
    })?;
    let mut runner = runner(live_config(), btc_prices(), audit);
    runner
        .observed_mut()
        .apply_stream_order(observed_order(&our_id("BTCUSDT", 0, 1), "BTCUSDT", NOW_MS - 10_000));

    let report = runner.run_once(&cycle(HaRole::Active));
    let records = read_records(&path)?;

    let events: Vec<AuditEventType> = records.iter().map(|r| r.event).collect();
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
    assert!(records.iter().all(|r| r.run_id == report.run_id));
    let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    assert_eq!(records[3].payload["status"], "EXECUTED");
    assert_eq!(records[4].payload["executed"], 1);
    Ok(())
}
