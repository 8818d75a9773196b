use anyhow::{Context, Result};
use chrono::Utc;
use grinder_config::GrinderConfig;
use grinder_remediation::BudgetTracker;
use serde_json::json;

/// Read-only: loading rolls the day in memory but never writes the file.
pub fn status() -> Result<()> {
    let cfg = GrinderConfig::from_env()?;
    let today = Utc::now().date_naive();
    let tracker = BudgetTracker::load(&cfg.budget_state_path, cfg.budget.clone(), today)?;

    let state = tracker.state();
    let limits = tracker.limits();
    let out = json!({
        "path": cfg.budget_state_path.display().to_string(),
        "date": state.date.to_string(),
        "calls_today": state.calls_today,
        "notional_today": state.notional_today.to_string(),
        "max_calls_per_day": limits.max_calls_per_day,
        "max_notional_per_day": limits.max_notional_per_day.to_string(),
        "remaining_calls_today": limits.max_calls_per_day.saturating_sub(state.calls_today),
        "remaining_notional_today": (limits.max_notional_per_day - state.notional_today)
            .max(rust_decimal::Decimal::ZERO)
            .to_string(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&out).context("render budget status failed")?
    );
    Ok(())
}
