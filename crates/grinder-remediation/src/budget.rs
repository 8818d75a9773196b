//! Remediation call/notional budget.
//!
//! # Invariants
//!
//! - **Day rollover**: state dated before today (UTC) counts as zero. The
//!   reset happens on load and again whenever a check crosses midnight.
//! - **Atomic check-and-consume**: a blocked check consumes nothing.
//! - **Persist before commit**: the new state is written (temp file, then
//!   rename) before the in-memory counters move. If the write fails the
//!   consumption did not happen.
//! - **Single writer**: only the active instance remediates, so the file has
//!   one writer. Writes are still atomic to survive a crash mid-write.
//!
//! Per-run counters live in memory only and are reset by
//! [`BudgetTracker::begin_run`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Configured caps. Zero means nothing is allowed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub max_calls_per_day: u32,
    pub max_notional_per_day: Decimal,
    pub max_calls_per_run: u32,
    pub max_notional_per_run: Decimal,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_calls_per_day: 100,
            max_notional_per_day: Decimal::from(5_000),
            max_calls_per_run: 10,
            max_notional_per_run: Decimal::from(1_000),
        }
    }
}

/// Persisted daily counters.
///
/// On disk: `{"date": "YYYY-MM-DD", "calls_today": 3, "notional_today": "125.50"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    pub date: NaiveDate,
    pub calls_today: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub notional_today: Decimal,
}

impl BudgetState {
    pub fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            calls_today: 0,
            notional_today: Decimal::ZERO,
        }
    }
}

/// Which cap a check would exceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetLimitHit {
    CallsPerDay,
    NotionalPerDay,
    CallsPerRun,
    NotionalPerRun,
}

impl BudgetLimitHit {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetLimitHit::CallsPerDay => "calls_per_day",
            BudgetLimitHit::NotionalPerDay => "notional_per_day",
            BudgetLimitHit::CallsPerRun => "calls_per_run",
            BudgetLimitHit::NotionalPerRun => "notional_per_run",
        }
    }
}

#[derive(Clone, Debug)]
pub struct BudgetTracker {
    limits: BudgetLimits,
    state: BudgetState,
    run_calls: u32,
    run_notional: Decimal,
    /// `None` = in-memory only (replay, tests).
    path: Option<PathBuf>,
}

impl BudgetTracker {
    /// Load persisted state from `path`. A missing file starts a fresh day;
    /// an unreadable or malformed file is an error (never silently reset).
    pub fn load(path: impl Into<PathBuf>, limits: BudgetLimits, today: NaiveDate) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("read budget state failed: {}", path.display()))?;
            serde_json::from_str::<BudgetState>(&raw)
                .with_context(|| format!("parse budget state failed: {}", path.display()))?
        } else {
            debug!(path = %path.display(), "no budget state file; starting fresh");
            BudgetState::fresh(today)
        };

        let mut tracker = Self {
            limits,
            state,
            run_calls: 0,
            run_notional: Decimal::ZERO,
            path: Some(path),
        };
        tracker.roll_day(today);
        Ok(tracker)
    }

    pub fn in_memory(limits: BudgetLimits, today: NaiveDate) -> Self {
        Self::with_state(limits, BudgetState::fresh(today), today)
    }

    /// In-memory tracker seeded with `state` (rolled to `today`).
    pub fn with_state(limits: BudgetLimits, state: BudgetState, today: NaiveDate) -> Self {
        let mut tracker = Self {
            limits,
            state,
            run_calls: 0,
            run_notional: Decimal::ZERO,
            path: None,
        };
        tracker.roll_day(today);
        tracker
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.state.date != today {
            info!(
                previous = %self.state.date,
                today = %today,
                calls = self.state.calls_today,
                notional = %self.state.notional_today,
                "budget day rollover; daily counters reset"
            );
            self.state = BudgetState::fresh(today);
        }
    }

    /// Reset the per-run counters. Called once at the start of every cycle.
    pub fn begin_run(&mut self) {
        self.run_calls = 0;
        self.run_notional = Decimal::ZERO;
    }

    /// Read-only check of `calls`/`notional` against every cap as of `today`.
    pub fn check(&self, today: NaiveDate, calls: u32, notional: Decimal) -> Result<(), BudgetLimitHit> {
        let (day_calls, day_notional) = if self.state.date == today {
            (self.state.calls_today, self.state.notional_today)
        } else {
            (0, Decimal::ZERO)
        };

        if day_calls.saturating_add(calls) > self.limits.max_calls_per_day {
            return Err(BudgetLimitHit::CallsPerDay);
        }
        if day_notional + notional > self.limits.max_notional_per_day {
            return Err(BudgetLimitHit::NotionalPerDay);
        }
        if self.run_calls.saturating_add(calls) > self.limits.max_calls_per_run {
            return Err(BudgetLimitHit::CallsPerRun);
        }
        if self.run_notional + notional > self.limits.max_notional_per_run {
            return Err(BudgetLimitHit::NotionalPerRun);
        }
        Ok(())
    }

    /// Check and, if allowed, consume. `Ok(false)` = a cap would be exceeded
    /// and nothing changed. `Err` = persistence failed and nothing changed.
    pub fn check_and_consume(&mut self, today: NaiveDate, calls: u32, notional: Decimal) -> Result<bool> {
        self.roll_day(today);

        if let Err(hit) = self.check(today, calls, notional) {
            debug!(limit = hit.as_str(), calls, notional = %notional, "budget check refused");
            return Ok(false);
        }

        let next = BudgetState {
            date: today,
            calls_today: self.state.calls_today + calls,
            notional_today: self.state.notional_today + notional,
        };
        if let Some(path) = &self.path {
            persist_atomic(path, &next)?;
        }

        self.state = next;
        self.run_calls += calls;
        self.run_notional += notional;
        debug!(
            calls_today = self.state.calls_today,
            notional_today = %self.state.notional_today,
            "budget consumed"
        );
        Ok(true)
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn state(&self) -> &BudgetState {
        &self.state
    }

    pub fn run_calls(&self) -> u32 {
        self.run_calls
    }

    pub fn run_notional(&self) -> Decimal {
        self.run_notional
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Write `state` to a sibling temp file, then rename over `path`.
fn persist_atomic(path: &Path, state: &BudgetState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create budget dir failed: {}", parent.display()))?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let body = serde_json::to_vec_pretty(state).context("serialize budget state failed")?;
    fs::write(&tmp, body)
        .with_context(|| format!("write budget temp file failed: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename budget temp file failed: {}", path.display()))?;
    Ok(())
}
