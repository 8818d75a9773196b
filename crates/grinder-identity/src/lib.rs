//! grinder-identity
//!
//! Client order id generation, parsing and ownership.
//!
//! # Format
//!
//! ```text
//! {prefix}{strategy_id}_{symbol}_{level}_{ts}_{seq}
//! grinder_default_BTCUSDT_0_1700000000_1
//! ```
//!
//! # Invariants
//!
//! - **Deterministic**: the same inputs always produce the same id, so an
//!   idempotent retry reuses the id the venue already knows.
//! - **Parse is strict**: anything that does not carry the configured prefix
//!   followed by exactly five fields (numeric level/ts/seq) is not ours.
//! - **Ownership is provable only**: `is_ours` never guesses. A foreign or
//!   malformed id is rejected.
//!
//! Pure deterministic logic. No IO, no clock.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Upper bound on generated client order id length.
pub const MAX_CLIENT_ORDER_ID_LEN: usize = 64;

/// Separator between id fields. Strategy ids and symbols must not contain it.
pub const FIELD_SEPARATOR: char = '_';

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Identity scheme for this bot instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Leading marker of every id we generate, e.g. `grinder_`.
    pub prefix: String,
    /// Strategy embedded in ids generated by this instance.
    pub strategy_id: String,
    /// Strategies this instance accepts as its own. Empty = allow all.
    pub allowed_strategies: BTreeSet<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            prefix: "grinder_".to_string(),
            strategy_id: "default".to_string(),
            allowed_strategies: BTreeSet::new(),
        }
    }
}

impl IdentityConfig {
    pub fn new(prefix: impl Into<String>, strategy_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            strategy_id: strategy_id.into(),
            allowed_strategies: BTreeSet::new(),
        }
    }

    pub fn with_allowed_strategies<I, S>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_strategies = strategies.into_iter().map(Into::into).collect();
        self
    }

    /// `true` when `strategy_id` is accepted by the allowlist (empty = all).
    pub fn strategy_allowed(&self, strategy_id: &str) -> bool {
        self.allowed_strategies.is_empty() || self.allowed_strategies.contains(strategy_id)
    }

    /// Structural validation, run once at config load.
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.prefix.is_empty() {
            return Err(IdentityError::InvalidConfig("prefix must not be empty"));
        }
        validate_field(&self.strategy_id)
            .map_err(|_| IdentityError::InvalidConfig("strategy_id must be non-empty without '_'"))?;
        for s in &self.allowed_strategies {
            validate_field(s).map_err(|_| {
                IdentityError::InvalidConfig("allowed strategy ids must be non-empty without '_'")
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityError {
    /// Identity config failed validation.
    InvalidConfig(&'static str),
    /// A generation input contained the separator or was empty.
    InvalidField { field: &'static str, value: String },
    /// Generated id would exceed [`MAX_CLIENT_ORDER_ID_LEN`].
    TooLong { len: usize },
    /// Id does not start with the configured prefix.
    PrefixMismatch,
    /// Id has the prefix but not the expected field layout.
    Malformed { reason: &'static str },
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::InvalidConfig(msg) => write!(f, "identity config invalid: {msg}"),
            IdentityError::InvalidField { field, value } => {
                write!(f, "identity field {field}={value:?} is empty or contains '_'")
            }
            IdentityError::TooLong { len } => write!(
                f,
                "client order id length {len} exceeds limit {MAX_CLIENT_ORDER_ID_LEN}"
            ),
            IdentityError::PrefixMismatch => write!(f, "client order id has a foreign prefix"),
            IdentityError::Malformed { reason } => write!(f, "client order id malformed: {reason}"),
        }
    }
}

impl std::error::Error for IdentityError {}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Parsed representation of one of our client order ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedClientOrderId {
    pub prefix: String,
    pub strategy_id: String,
    pub symbol: String,
    pub level: u32,
    pub ts: i64,
    pub seq: u64,
}

fn validate_field(value: &str) -> Result<(), ()> {
    if value.is_empty() || value.contains(FIELD_SEPARATOR) {
        Err(())
    } else {
        Ok(())
    }
}

/// Build the client order id for one grid level placement.
///
/// Deterministic: `(config, symbol, level, ts, seq)` fully determines the
/// output. Retries must call this with the same inputs.
pub fn generate_client_order_id(
    config: &IdentityConfig,
    symbol: &str,
    level: u32,
    ts: i64,
    seq: u64,
) -> Result<String, IdentityError> {
    validate_field(&config.strategy_id).map_err(|_| IdentityError::InvalidField {
        field: "strategy_id",
        value: config.strategy_id.clone(),
    })?;
    validate_field(symbol).map_err(|_| IdentityError::InvalidField {
        field: "symbol",
        value: symbol.to_string(),
    })?;
    if ts < 0 {
        return Err(IdentityError::InvalidField {
            field: "ts",
            value: ts.to_string(),
        });
    }

    let id = format!(
        "{}{}_{}_{}_{}_{}",
        config.prefix, config.strategy_id, symbol, level, ts, seq
    );
    if id.len() > MAX_CLIENT_ORDER_ID_LEN {
        return Err(IdentityError::TooLong { len: id.len() });
    }
    Ok(id)
}

// ---------------------------------------------------------------------------
// Parsing / ownership
// ---------------------------------------------------------------------------

/// Parse `id` under the identity scheme whose prefix is `prefix`.
pub fn parse_client_order_id(id: &str, prefix: &str) -> Result<ParsedClientOrderId, IdentityError> {
    if prefix.is_empty() {
        return Err(IdentityError::InvalidConfig("prefix must not be empty"));
    }
    let rest = id.strip_prefix(prefix).ok_or(IdentityError::PrefixMismatch)?;

    let fields: Vec<&str> = rest.split(FIELD_SEPARATOR).collect();
    if fields.len() != 5 {
        return Err(IdentityError::Malformed {
            reason: "expected strategy_symbol_level_ts_seq",
        });
    }
    if fields.iter().any(|f| f.is_empty()) {
        return Err(IdentityError::Malformed {
            reason: "empty field",
        });
    }

    let level = fields[2].parse::<u32>().map_err(|_| IdentityError::Malformed {
        reason: "level is not numeric",
    })?;
    let ts = fields[3].parse::<i64>().map_err(|_| IdentityError::Malformed {
        reason: "ts is not numeric",
    })?;
    if ts < 0 {
        return Err(IdentityError::Malformed {
            reason: "ts is negative",
        });
    }
    let seq = fields[4].parse::<u64>().map_err(|_| IdentityError::Malformed {
        reason: "seq is not numeric",
    })?;

    Ok(ParsedClientOrderId {
        prefix: prefix.to_string(),
        strategy_id: fields[0].to_string(),
        symbol: fields[1].to_string(),
        level,
        ts,
        seq,
    })
}

/// Cheap pre-filter: could this id plausibly be ours? Prefix only.
///
/// Used by detection to skip clearly foreign orders. Never sufficient for
/// remediation; use [`is_ours`].
pub fn has_our_prefix(id: &str, config: &IdentityConfig) -> bool {
    !config.prefix.is_empty() && id.starts_with(&config.prefix)
}

/// `true` only if `id` parses under this scheme and its strategy is accepted.
pub fn is_ours(id: &str, config: &IdentityConfig) -> bool {
    match parse_client_order_id(id, &config.prefix) {
        Ok(parsed) => config.strategy_allowed(&parsed.strategy_id),
        Err(_) => false,
    }
}
