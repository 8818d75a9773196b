//! One-shot environment configuration.
//!
//! The environment is read exactly once, at startup, into an immutable
//! [`GrinderConfig`]. Nothing downstream calls `std::env::var`.
//!
//! Any malformed value is fatal (`CONFIG_INVALID <VAR>: …`): the process
//! never starts with an ambiguous safety configuration. Values that look
//! like credentials are rejected outright (`CONFIG_SECRET_DETECTED`) and
//! are never echoed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use grinder_audit::AuditConfig;
use grinder_identity::IdentityConfig;
use grinder_reconcile::EngineConfig;
use grinder_remediation::{
    BudgetLimits, ConfiguredAction, ExchangeEnv, RemediationConfig, RemediationMode,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Known secret-like prefixes. A config value starting with one of these is
/// a credential pasted into the wrong variable.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // OpenAI style
    "sk_live",    // Stripe live
    "sk_test",    // Stripe test
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "ghp_",       // GitHub PAT
    "gho_",       // GitHub OAuth
    "glpat-",     // GitLab PAT
    "xoxb-",      // Slack bot token
    "xoxp-",      // Slack user token
];

/// Every variable this crate reads.
pub const ENV_KEYS: &[&str] = &[
    "RECONCILE_ENABLED",
    "RECONCILE_ACTION",
    "RECONCILE_ORDER_GRACE_MS",
    "RECONCILE_OBSERVED_MAX_AGE_MS",
    "REMEDIATION_MODE",
    "REMEDIATION_DRY_RUN",
    "ARMED",
    "ALLOW_MAINNET_TRADE",
    "EXCHANGE_ENV",
    "REMEDIATION_STRATEGY_ALLOWLIST",
    "REMEDIATION_SYMBOL_ALLOWLIST",
    "SYMBOL_WHITELIST",
    "REMEDIATION_COOLDOWN_SECONDS",
    "MAX_ORDERS_PER_RUN",
    "MAX_SYMBOLS_PER_RUN",
    "MAX_CALLS_PER_DAY",
    "MAX_NOTIONAL_PER_DAY",
    "MAX_CALLS_PER_RUN",
    "MAX_NOTIONAL_PER_RUN",
    "FLATTEN_MAX_NOTIONAL_PER_CALL",
    "BUDGET_STATE_PATH",
    "IDENTITY_PREFIX",
    "IDENTITY_STRATEGY_ID",
    "IDENTITY_ALLOWED_STRATEGIES",
    "EXPECTED_TTL_MS",
    "EXPECTED_MAX_ORDERS",
    "AUDIT_ENABLED",
    "AUDIT_PATH",
    "AUDIT_MAX_BYTES",
    "AUDIT_MAX_FILES",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrinderConfig {
    pub remediation: RemediationConfig,
    pub engine: EngineConfig,
    /// Older observed state is detected against but never remediated.
    pub observed_max_age_ms: i64,
    pub budget: BudgetLimits,
    pub budget_state_path: PathBuf,
    pub expected_ttl_ms: i64,
    pub expected_max_orders: usize,
    pub audit: AuditConfig,
}

impl GrinderConfig {
    /// Snapshot the process environment once and load from it.
    pub fn from_env() -> Result<Self> {
        let env: BTreeMap<String, String> = ENV_KEYS
            .iter()
            .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v)))
            .collect();
        Self::from_map(&env)
    }

    pub fn from_map(env: &BTreeMap<String, String>) -> Result<Self> {
        Self::from_lookup(|k| env.get(k).cloned())
    }

    /// Load from any key lookup. Unset and empty-string values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let identity = IdentityConfig::new(
            env.string("IDENTITY_PREFIX", "grinder_")?,
            env.string("IDENTITY_STRATEGY_ID", "default")?,
        )
        .with_allowed_strategies(env.csv("IDENTITY_ALLOWED_STRATEGIES", false)?);
        identity
            .validate()
            .map_err(|e| anyhow::anyhow!("CONFIG_INVALID IDENTITY_*: {e}"))?;

        let cooldown_s = env.u64("REMEDIATION_COOLDOWN_SECONDS", 60)?;
        let cooldown_ms = cooldown_s
            .checked_mul(1_000)
            .and_then(|ms| i64::try_from(ms).ok())
            .context("CONFIG_INVALID REMEDIATION_COOLDOWN_SECONDS: out of range")?;

        let strategy_allowlist = env.csv("REMEDIATION_STRATEGY_ALLOWLIST", false)?;
        if let Some(bad) = strategy_allowlist.iter().find(|s| s.contains('_')) {
            bail!("CONFIG_INVALID REMEDIATION_STRATEGY_ALLOWLIST: strategy id {bad:?} contains '_'");
        }

        let remediation = RemediationConfig {
            enabled: env.bool("RECONCILE_ENABLED", false)?,
            action: env.parsed("RECONCILE_ACTION", ConfiguredAction::None)?,
            mode: env.parsed("REMEDIATION_MODE", RemediationMode::DetectOnly)?,
            dry_run: env.bool("REMEDIATION_DRY_RUN", true)?,
            armed: env.bool("ARMED", false)?,
            allow_mainnet_trade: env.bool("ALLOW_MAINNET_TRADE", false)?,
            exchange_env: env.parsed("EXCHANGE_ENV", ExchangeEnv::Testnet)?,
            symbol_whitelist: env.csv("SYMBOL_WHITELIST", true)?,
            symbol_allowlist: env.csv("REMEDIATION_SYMBOL_ALLOWLIST", true)?,
            strategy_allowlist,
            cooldown_ms,
            max_orders_per_run: env.u32("MAX_ORDERS_PER_RUN", 10)?,
            max_symbols_per_run: env.u32("MAX_SYMBOLS_PER_RUN", 3)?,
            flatten_max_notional_per_call: env
                .decimal("FLATTEN_MAX_NOTIONAL_PER_CALL", Decimal::from(500))?,
            identity: identity.clone(),
        };

        let budget = BudgetLimits {
            max_calls_per_day: env.u32("MAX_CALLS_PER_DAY", 100)?,
            max_notional_per_day: env.decimal("MAX_NOTIONAL_PER_DAY", Decimal::from(5_000))?,
            max_calls_per_run: env.u32("MAX_CALLS_PER_RUN", 10)?,
            max_notional_per_run: env.decimal("MAX_NOTIONAL_PER_RUN", Decimal::from(1_000))?,
        };

        let audit = AuditConfig {
            enabled: env.bool("AUDIT_ENABLED", true)?,
            path: PathBuf::from(env.string("AUDIT_PATH", "logs/reconcile_audit.jsonl")?),
            max_bytes: env.u64("AUDIT_MAX_BYTES", 10 * 1024 * 1024)?,
            max_files: env.u32("AUDIT_MAX_FILES", 5)?,
        };
        if audit.enabled && audit.max_bytes == 0 {
            bail!("CONFIG_INVALID AUDIT_MAX_BYTES: must be > 0 when audit is enabled");
        }

        let expected_max_orders = env.u64("EXPECTED_MAX_ORDERS", 200)?;
        if expected_max_orders == 0 {
            bail!("CONFIG_INVALID EXPECTED_MAX_ORDERS: must be > 0");
        }

        Ok(Self {
            remediation,
            engine: EngineConfig {
                order_grace_ms: env.millis("RECONCILE_ORDER_GRACE_MS", 5_000)?,
                identity,
            },
            observed_max_age_ms: env.millis("RECONCILE_OBSERVED_MAX_AGE_MS", 30_000)?,
            budget,
            budget_state_path: PathBuf::from(
                env.string("BUDGET_STATE_PATH", "state/remediation_budget.json")?,
            ),
            expected_ttl_ms: env.millis("EXPECTED_TTL_MS", 86_400_000)?,
            expected_max_orders: usize::try_from(expected_max_orders)
                .context("CONFIG_INVALID EXPECTED_MAX_ORDERS: out of range")?,
            audit,
        })
    }

    pub fn identity(&self) -> &IdentityConfig {
        &self.engine.identity
    }

    /// Sorted-key compact JSON of the whole config.
    pub fn canonical_json(&self) -> Result<String> {
        let v = serde_json::to_value(self).context("serialize config failed")?;
        serde_json::to_string(&v).context("canonical json serialize failed")
    }

    /// sha256 hex of [`Self::canonical_json`]. Logged at startup so two
    /// instances can be compared.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(sha256_hex(self.canonical_json()?.as_bytes()))
    }

    /// `true` when this configuration can reach the venue at all.
    pub fn can_execute(&self) -> bool {
        let r = &self.remediation;
        r.enabled
            && r.action != ConfiguredAction::None
            && matches!(
                r.mode,
                RemediationMode::ExecuteCancelAll | RemediationMode::ExecuteFlatten
            )
            && !r.dry_run
            && r.armed
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

// ---------------------------------------------------------------------------
// Typed lookups
// ---------------------------------------------------------------------------

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed raw value; `None` when unset or blank.
    fn raw(&self, key: &str) -> Result<Option<String>> {
        let Some(v) = (self.lookup)(key) else {
            return Ok(None);
        };
        if looks_like_secret(&v) {
            bail!("CONFIG_SECRET_DETECTED {key} value=REDACTED");
        }
        let v = v.trim();
        Ok((!v.is_empty()).then(|| v.to_string()))
    }

    fn string(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.raw(key)?.unwrap_or_else(|| default.to_string()))
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.raw(key)? {
            None => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => bail!("CONFIG_INVALID {key}: {v:?} is not a boolean"),
            },
        }
    }

    fn u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.raw(key)? {
            None => Ok(default),
            Some(v) => v
                .parse::<u64>()
                .with_context(|| format!("CONFIG_INVALID {key}: {v:?} is not a non-negative integer")),
        }
    }

    fn u32(&self, key: &str, default: u32) -> Result<u32> {
        let v = self.u64(key, u64::from(default))?;
        u32::try_from(v).with_context(|| format!("CONFIG_INVALID {key}: {v} out of range"))
    }

    fn millis(&self, key: &str, default: u64) -> Result<i64> {
        let v = self.u64(key, default)?;
        i64::try_from(v).with_context(|| format!("CONFIG_INVALID {key}: {v} out of range"))
    }

    fn decimal(&self, key: &str, default: Decimal) -> Result<Decimal> {
        match self.raw(key)? {
            None => Ok(default),
            Some(v) => {
                let d = Decimal::from_str(&v)
                    .with_context(|| format!("CONFIG_INVALID {key}: {v:?} is not a decimal"))?;
                if d.is_sign_negative() && !d.is_zero() {
                    bail!("CONFIG_INVALID {key}: must be non-negative");
                }
                Ok(d)
            }
        }
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(key)? {
            None => Ok(default),
            Some(v) => v
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("CONFIG_INVALID {key}: {e}")),
        }
    }

    /// Comma-separated set, trimmed and de-duplicated. Empty = no filter.
    fn csv(&self, key: &str, uppercase: bool) -> Result<BTreeSet<String>> {
        let Some(v) = self.raw(key)? else {
            return Ok(BTreeSet::new());
        };
        Ok(v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                if uppercase {
                    s.to_ascii_uppercase()
                } else {
                    s.to_string()
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn load(pairs: &[(&str, &str)]) -> Result<GrinderConfig> {
        let env: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GrinderConfig::from_map(&env)
    }

    #[test]
    fn defaults_are_fail_closed() {
        let cfg = load(&[]).unwrap();
        assert!(!cfg.remediation.enabled);
        assert_eq!(cfg.remediation.action, ConfiguredAction::None);
        assert_eq!(cfg.remediation.mode, RemediationMode::DetectOnly);
        assert!(cfg.remediation.dry_run);
        assert!(!cfg.remediation.armed);
        assert!(!cfg.can_execute());
        assert_eq!(cfg.engine.order_grace_ms, 5_000);
        assert_eq!(cfg.budget.max_calls_per_day, 100);
        assert_eq!(cfg.budget.max_notional_per_run, dec!(1000));
        assert_eq!(cfg.remediation.cooldown_ms, 60_000);
        assert_eq!(cfg.identity().prefix, "grinder_");
    }

    #[test]
    fn fully_armed_config_can_execute() {
        let cfg = load(&[
            ("RECONCILE_ENABLED", "yes"),
            ("RECONCILE_ACTION", "cancel_and_flatten"),
            ("REMEDIATION_MODE", "EXECUTE_FLATTEN"),
            ("REMEDIATION_DRY_RUN", "0"),
            ("ARMED", "ON"),
        ])
        .unwrap();
        assert!(cfg.can_execute());
    }

    #[test]
    fn ambiguous_boolean_is_fatal() {
        let err = load(&[("ARMED", "maybe")]).unwrap_err().to_string();
        assert!(err.starts_with("CONFIG_INVALID ARMED"), "{err}");
    }

    #[test]
    fn unknown_mode_is_fatal() {
        assert!(load(&[("REMEDIATION_MODE", "EXECUTE")]).is_err());
    }

    #[test]
    fn negative_or_malformed_decimal_is_fatal() {
        assert!(load(&[("MAX_NOTIONAL_PER_DAY", "-1")]).is_err());
        assert!(load(&[("FLATTEN_MAX_NOTIONAL_PER_CALL", "1e3x")]).is_err());
        let cfg = load(&[("MAX_NOTIONAL_PER_RUN", "0")]).unwrap();
        assert_eq!(cfg.budget.max_notional_per_run, Decimal::ZERO);
    }

    #[test]
    fn lists_are_trimmed_deduped_and_symbols_uppercased() {
        let cfg = load(&[
            ("SYMBOL_WHITELIST", " btcusdt, ETHUSDT ,BTCUSDT,,"),
            ("REMEDIATION_STRATEGY_ALLOWLIST", "grid, grid"),
        ])
        .unwrap();
        let wl: Vec<_> = cfg.remediation.symbol_whitelist.iter().cloned().collect();
        assert_eq!(wl, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(cfg.remediation.strategy_allowlist.len(), 1);
    }

    #[test]
    fn identity_shape_is_validated() {
        assert!(load(&[("IDENTITY_STRATEGY_ID", "my_strat")]).is_err());
        assert!(load(&[("REMEDIATION_STRATEGY_ALLOWLIST", "a_b")]).is_err());
        // Blank means unset, so the default prefix applies.
        assert_eq!(load(&[("IDENTITY_PREFIX", "  ")]).unwrap().identity().prefix, "grinder_");
    }

    #[test]
    fn secret_literal_is_rejected_without_echo() {
        let err = load(&[("AUDIT_PATH", "sk_live_abcdef123456")])
            .unwrap_err()
            .to_string();
        assert!(err.contains("CONFIG_SECRET_DETECTED"));
        assert!(!err.contains("abcdef"));
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = load(&[]).unwrap().fingerprint().unwrap();
        let b = load(&[]).unwrap().fingerprint().unwrap();
        let c = load(&[("ARMED", "true")]).unwrap().fingerprint().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
