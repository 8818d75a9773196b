use chrono::{DateTime, Utc};
use grinder_reconcile::{MismatchKind, ObservedOrder, ObservedPosition, RoutedAction};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::budget::BudgetTracker;
use crate::gates::{self, Candidate, Cooldown, GateContext, RunCounters};
use crate::port::{ExchangePort, PortCallToken, PriceSource};
use crate::types::{BlockReason, HaRole, RemediationConfig, RemediationResult, RemediationStatus};

/// Per-cycle inputs. Re-read by the caller every cycle, never cached here.
#[derive(Clone, Copy, Debug)]
pub struct CycleContext {
    pub role: HaRole,
    pub now: DateTime<Utc>,
    /// Logged only. Remediation reduces risk, so the kill switch never
    /// blocks it.
    pub kill_switch_active: bool,
}

impl CycleContext {
    pub fn new(role: HaRole, now: DateTime<Utc>) -> Self {
        Self {
            role,
            now,
            kill_switch_active: false,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.now.timestamp_millis()
    }
}

/// Runs candidates through the gate pipeline and, when every gate passes,
/// performs the single venue call.
///
/// Owns all mutable remediation state (budget, cooldown, run counters) so
/// that a later candidate in the same cycle sees what an earlier one changed.
pub struct RemediationExecutor<P, S> {
    config: RemediationConfig,
    port: P,
    prices: S,
    budget: BudgetTracker,
    cooldown: Cooldown,
    run: RunCounters,
}

impl<P: ExchangePort, S: PriceSource> RemediationExecutor<P, S> {
    pub fn new(config: RemediationConfig, port: P, prices: S, budget: BudgetTracker) -> Self {
        Self {
            config,
            port,
            prices,
            budget,
            cooldown: Cooldown::default(),
            run: RunCounters::default(),
        }
    }

    /// Reset per-run counters. Cooldowns and daily budget carry over.
    pub fn begin_run(&mut self) {
        self.run.reset();
        self.budget.begin_run();
    }

    pub fn remediate_cancel(
        &mut self,
        ctx: &CycleContext,
        kind: MismatchKind,
        order: &ObservedOrder,
    ) -> RemediationResult {
        self.run_pipeline(ctx, Candidate::cancel(kind, order))
    }

    pub fn remediate_flatten(
        &mut self,
        ctx: &CycleContext,
        kind: MismatchKind,
        position: &ObservedPosition,
    ) -> RemediationResult {
        let price = self.prices.get_price(&position.symbol);
        self.run_pipeline(ctx, Candidate::flatten(kind, position, price))
    }

    fn run_pipeline(&mut self, ctx: &CycleContext, candidate: Candidate) -> RemediationResult {
        if ctx.kill_switch_active {
            info!(
                symbol = %candidate.symbol,
                action = candidate.action.as_str(),
                "kill switch active; remediation still permitted"
            );
        }

        let verdict = gates::evaluate(&GateContext {
            config: &self.config,
            role: ctx.role,
            candidate: &candidate,
            budget: &self.budget,
            cooldown: &self.cooldown,
            run: &self.run,
            today: ctx.now.date_naive(),
            now_ms: ctx.now_ms(),
        });

        let result = match verdict {
            Err((gate, BlockReason::DryRun)) => {
                info!(
                    gate,
                    symbol = %candidate.symbol,
                    client_order_id = candidate.client_order_id.as_deref().unwrap_or("-"),
                    action = candidate.action.as_str(),
                    "remediation planned (dry run)"
                );
                outcome(&candidate, RemediationStatus::Planned, Some(BlockReason::DryRun))
                    .described(format!("would {}", describe(&candidate)))
            }
            Err((gate, reason)) => {
                debug!(
                    gate,
                    reason = reason.as_str(),
                    symbol = %candidate.symbol,
                    client_order_id = candidate.client_order_id.as_deref().unwrap_or("-"),
                    "remediation blocked"
                );
                blocked(&candidate, gate, reason)
            }
            Ok(()) => self.execute(ctx, &candidate),
        };

        if result.status.counts_toward_run() {
            self.run.record(&candidate.symbol);
        }
        if result.status.is_real() {
            self.cooldown.record(ctx.now_ms());
        }
        result
    }

    /// Gate 12: consume budget, then make the one venue call.
    fn execute(&mut self, ctx: &CycleContext, candidate: &Candidate) -> RemediationResult {
        let notional = candidate.notional().unwrap_or(Decimal::ZERO);
        match self.budget.check_and_consume(ctx.now.date_naive(), 1, notional) {
            Ok(true) => {}
            Ok(false) => return blocked(candidate, "execute", BlockReason::BudgetExceeded),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "budget persistence failed; refusing to act");
                return blocked(candidate, "execute", BlockReason::BudgetUnavailable);
            }
        }

        let token = PortCallToken::new();
        match (candidate.action, candidate.client_order_id.as_deref(), candidate.side) {
            (RoutedAction::Cancel, Some(id), _) => {
                match self.port.cancel_order(&candidate.symbol, id, &token) {
                    Ok(cancelled) => {
                        info!(symbol = %candidate.symbol, client_order_id = id, cancelled, "remediation cancel executed");
                        let note = if cancelled { "" } else { " (already gone)" };
                        outcome(candidate, RemediationStatus::Executed, None)
                            .described(format!("{}{note}", describe(candidate)))
                    }
                    Err(err) => {
                        warn!(symbol = %candidate.symbol, client_order_id = id, error = %err, "remediation cancel failed");
                        failed(candidate, err.to_string())
                    }
                }
            }
            (RoutedAction::Flatten, _, Some(side)) => {
                match self
                    .port
                    .place_market_order(&candidate.symbol, side, candidate.quantity, true, &token)
                {
                    Ok(order_id) => {
                        info!(
                            symbol = %candidate.symbol,
                            side = side.as_str(),
                            qty = %candidate.quantity,
                            notional = %notional,
                            exchange_order_id = %order_id,
                            "remediation flatten executed"
                        );
                        let mut r = outcome(candidate, RemediationStatus::Executed, None)
                            .described(describe(candidate));
                        r.exchange_order_id = Some(order_id);
                        r
                    }
                    Err(err) => {
                        warn!(symbol = %candidate.symbol, error = %err, "remediation flatten failed");
                        failed(candidate, err.to_string())
                    }
                }
            }
            _ => failed(candidate, "candidate has no executable action".to_string()),
        }
    }

    pub fn config(&self) -> &RemediationConfig {
        &self.config
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn run_counters(&self) -> &RunCounters {
        &self.run
    }

    pub fn cooldown(&self) -> &Cooldown {
        &self.cooldown
    }
}

fn describe(c: &Candidate) -> String {
    match (c.action, c.client_order_id.as_deref(), c.side) {
        (RoutedAction::Cancel, Some(id), _) => format!("cancel {id} on {}", c.symbol),
        (RoutedAction::Flatten, _, Some(side)) => format!(
            "flatten {} via reduce-only {} {}",
            c.symbol,
            side.as_str(),
            c.quantity
        ),
        _ => format!("no action on {}", c.symbol),
    }
}

fn outcome(c: &Candidate, status: RemediationStatus, reason: Option<BlockReason>) -> RemediationResult {
    RemediationResult {
        kind: c.kind,
        action: c.action,
        symbol: c.symbol.clone(),
        client_order_id: c.client_order_id.clone(),
        status,
        block_reason: reason,
        action_taken: String::new(),
        notional: c.notional(),
        exchange_order_id: None,
        error: None,
    }
}

fn blocked(c: &Candidate, gate: &str, reason: BlockReason) -> RemediationResult {
    outcome(c, RemediationStatus::Blocked, Some(reason))
        .described(format!("blocked at {gate}: {reason}"))
}

fn failed(c: &Candidate, error: String) -> RemediationResult {
    let mut r = outcome(c, RemediationStatus::Failed, None)
        .described(format!("{} failed", describe(c)));
    r.error = Some(error);
    r
}

trait Described {
    fn described(self, text: String) -> Self;
}

impl Described for RemediationResult {
    fn described(mut self, text: String) -> Self {
        self.action_taken = text;
        self
    }
}
