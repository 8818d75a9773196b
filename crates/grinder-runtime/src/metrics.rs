use std::collections::BTreeMap;
use std::fmt::Write;

use grinder_reconcile::{MismatchKind, RoutedAction};
use grinder_remediation::{BlockReason, RemediationResult, RemediationStatus};

/// Reconcile counters, owned by the runner and rendered on demand.
///
/// Exported names:
///
/// ```text
/// grinder_reconcile_runs_total
/// grinder_reconcile_runs_stale_total
/// grinder_reconcile_mismatches_total{kind}
/// grinder_reconcile_remediations_total{action,status}
/// grinder_reconcile_blocks_total{reason}
/// grinder_reconcile_last_run_duration_ms
/// grinder_reconcile_last_run_mismatches
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReconcileMetrics {
    runs_total: u64,
    runs_stale_total: u64,
    mismatches_total: BTreeMap<MismatchKind, u64>,
    remediations_total: BTreeMap<(RoutedAction, RemediationStatus), u64>,
    blocks_total: BTreeMap<BlockReason, u64>,
    last_run_duration_ms: u64,
    last_run_mismatches: u64,
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_mismatch(&mut self, kind: MismatchKind) {
        *self.mismatches_total.entry(kind).or_default() += 1;
    }

    pub fn record_result(&mut self, result: &RemediationResult) {
        *self
            .remediations_total
            .entry((result.action, result.status))
            .or_default() += 1;
        if result.status == RemediationStatus::Blocked {
            if let Some(reason) = result.block_reason {
                *self.blocks_total.entry(reason).or_default() += 1;
            }
        }
    }

    pub fn record_run(&mut self, duration_ms: u64, mismatches: usize, observed_stale: bool) {
        self.runs_total += 1;
        if observed_stale {
            self.runs_stale_total += 1;
        }
        self.last_run_duration_ms = duration_ms;
        self.last_run_mismatches = mismatches as u64;
    }

    pub fn runs_total(&self) -> u64 {
        self.runs_total
    }

    pub fn runs_stale_total(&self) -> u64 {
        self.runs_stale_total
    }

    pub fn mismatches(&self, kind: MismatchKind) -> u64 {
        self.mismatches_total.get(&kind).copied().unwrap_or(0)
    }

    pub fn remediations(&self, action: RoutedAction, status: RemediationStatus) -> u64 {
        self.remediations_total
            .get(&(action, status))
            .copied()
            .unwrap_or(0)
    }

    pub fn blocks(&self, reason: BlockReason) -> u64 {
        self.blocks_total.get(&reason).copied().unwrap_or(0)
    }

    pub fn last_run_duration_ms(&self) -> u64 {
        self.last_run_duration_ms
    }

    /// Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        header(&mut out, "grinder_reconcile_runs_total", "counter", "Reconcile cycles run.");
        let _ = writeln!(out, "grinder_reconcile_runs_total {}", self.runs_total);

        header(
            &mut out,
            "grinder_reconcile_runs_stale_total",
            "counter",
            "Cycles that skipped remediation because observed state was stale.",
        );
        let _ = writeln!(out, "grinder_reconcile_runs_stale_total {}", self.runs_stale_total);

        header(&mut out, "grinder_reconcile_mismatches_total", "counter", "Mismatches detected by kind.");
        // Every kind is emitted so dashboards see explicit zeros.
        for kind in MismatchKind::ALL {
            let _ = writeln!(
                out,
                "grinder_reconcile_mismatches_total{{kind=\"{}\"}} {}",
                kind.as_str(),
                self.mismatches(kind)
            );
        }

        header(
            &mut out,
            "grinder_reconcile_remediations_total",
            "counter",
            "Remediation outcomes by action and status.",
        );
        for ((action, status), n) in &self.remediations_total {
            let _ = writeln!(
                out,
                "grinder_reconcile_remediations_total{{action=\"{}\",status=\"{}\"}} {}",
                action.as_str(),
                status.as_str(),
                n
            );
        }

        header(&mut out, "grinder_reconcile_blocks_total", "counter", "Blocked remediations by reason.");
        for (reason, n) in &self.blocks_total {
            let _ = writeln!(
                out,
                "grinder_reconcile_blocks_total{{reason=\"{}\"}} {}",
                reason.as_str(),
                n
            );
        }

        header(&mut out, "grinder_reconcile_last_run_duration_ms", "gauge", "Duration of the last cycle.");
        let _ = writeln!(out, "grinder_reconcile_last_run_duration_ms {}", self.last_run_duration_ms);

        header(&mut out, "grinder_reconcile_last_run_mismatches", "gauge", "Mismatches in the last cycle.");
        let _ = writeln!(out, "grinder_reconcile_last_run_mismatches {}", self.last_run_mismatches);

        out
    }
}

fn header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}
