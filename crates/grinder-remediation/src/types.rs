use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use grinder_identity::IdentityConfig;
use grinder_reconcile::{MismatchKind, RoutedAction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Parse helper for env-facing enums
// ---------------------------------------------------------------------------

/// A configuration string did not name any variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! str_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($s => Ok($ty::$variant),)+
                    _ => Err(UnknownVariant { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Mode / action / role / environment
// ---------------------------------------------------------------------------

/// Staged-rollout switch. Only the `Execute*` stages may reach the venue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationMode {
    #[default]
    DetectOnly,
    PlanOnly,
    Blocked,
    ExecuteCancelAll,
    ExecuteFlatten,
}

str_enum!(RemediationMode, "REMEDIATION_MODE", {
    DetectOnly => "DETECT_ONLY",
    PlanOnly => "PLAN_ONLY",
    Blocked => "BLOCKED",
    ExecuteCancelAll => "EXECUTE_CANCEL_ALL",
    ExecuteFlatten => "EXECUTE_FLATTEN",
});

/// Which routed actions the operator has enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfiguredAction {
    #[default]
    None,
    Cancel,
    Flatten,
    CancelAndFlatten,
}

str_enum!(ConfiguredAction, "RECONCILE_ACTION", {
    None => "NONE",
    Cancel => "CANCEL",
    Flatten => "FLATTEN",
    CancelAndFlatten => "CANCEL_AND_FLATTEN",
});

impl ConfiguredAction {
    pub fn permits(&self, action: RoutedAction) -> bool {
        matches!(
            (self, action),
            (ConfiguredAction::Cancel, RoutedAction::Cancel)
                | (ConfiguredAction::Flatten, RoutedAction::Flatten)
                | (ConfiguredAction::CancelAndFlatten, RoutedAction::Cancel)
                | (ConfiguredAction::CancelAndFlatten, RoutedAction::Flatten)
        )
    }
}

/// This instance's leadership status, supplied by an external lease holder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HaRole {
    Active,
    Standby,
    #[default]
    Unknown,
}

str_enum!(HaRole, "HA role", {
    Active => "ACTIVE",
    Standby => "STANDBY",
    Unknown => "UNKNOWN",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeEnv {
    #[default]
    Testnet,
    Mainnet,
}

str_enum!(ExchangeEnv, "EXCHANGE_ENV", {
    Testnet => "TESTNET",
    Mainnet => "MAINNET",
});

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationStatus {
    /// Every gate up to dry-run passed; nothing was sent.
    Planned,
    Executed,
    Blocked,
    /// The port call was made and returned an error.
    Failed,
}

impl RemediationStatus {
    pub const ALL: [RemediationStatus; 4] = [
        RemediationStatus::Planned,
        RemediationStatus::Executed,
        RemediationStatus::Blocked,
        RemediationStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationStatus::Planned => "PLANNED",
            RemediationStatus::Executed => "EXECUTED",
            RemediationStatus::Blocked => "BLOCKED",
            RemediationStatus::Failed => "FAILED",
        }
    }

    /// Outcomes that occupy a per-run circuit slot.
    pub fn counts_toward_run(&self) -> bool {
        !matches!(self, RemediationStatus::Blocked)
    }

    /// Outcomes that touched the venue and therefore start a cooldown.
    pub fn is_real(&self) -> bool {
        matches!(self, RemediationStatus::Executed | RemediationStatus::Failed)
    }
}

impl fmt::Display for RemediationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a gate stopped a candidate. Blocks are outcomes, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    ReconcileDisabled,
    ActionNotConfigured,
    ModeDetectOnly,
    ModePlanOnly,
    ModeBlocked,
    ModeDisallowsAction,
    NotOurs,
    NotLeader,
    SymbolNotWhitelisted,
    SymbolNotAllowlisted,
    StrategyNotAllowlisted,
    BudgetExceeded,
    BudgetUnavailable,
    CooldownActive,
    MaxOrdersPerRun,
    MaxSymbolsPerRun,
    PriceUnavailable,
    NotionalCapExceeded,
    /// Not a block: the dry-run stop. Results carry status `PLANNED`.
    DryRun,
    NotArmed,
    MainnetNotAllowed,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::ReconcileDisabled => "reconcile_disabled",
            BlockReason::ActionNotConfigured => "action_not_configured",
            BlockReason::ModeDetectOnly => "mode_detect_only",
            BlockReason::ModePlanOnly => "mode_plan_only",
            BlockReason::ModeBlocked => "mode_blocked",
            BlockReason::ModeDisallowsAction => "mode_disallows_action",
            BlockReason::NotOurs => "not_ours",
            BlockReason::NotLeader => "not_leader",
            BlockReason::SymbolNotWhitelisted => "symbol_not_whitelisted",
            BlockReason::SymbolNotAllowlisted => "symbol_not_allowlisted",
            BlockReason::StrategyNotAllowlisted => "strategy_not_allowlisted",
            BlockReason::BudgetExceeded => "budget_exceeded",
            BlockReason::BudgetUnavailable => "budget_unavailable",
            BlockReason::CooldownActive => "cooldown_active",
            BlockReason::MaxOrdersPerRun => "max_orders_per_run",
            BlockReason::MaxSymbolsPerRun => "max_symbols_per_run",
            BlockReason::PriceUnavailable => "price_unavailable",
            BlockReason::NotionalCapExceeded => "notional_cap_exceeded",
            BlockReason::DryRun => "dry_run",
            BlockReason::NotArmed => "not_armed",
            BlockReason::MainnetNotAllowed => "mainnet_not_allowed",
        }
    }

    /// Status of a result stopped by this reason.
    pub fn status(&self) -> RemediationStatus {
        match self {
            BlockReason::DryRun => RemediationStatus::Planned,
            _ => RemediationStatus::Blocked,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remediation decision, produced for every candidate that reaches the
/// executor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationResult {
    pub kind: MismatchKind,
    pub action: RoutedAction,
    pub symbol: String,
    pub client_order_id: Option<String>,
    pub status: RemediationStatus,
    pub block_reason: Option<BlockReason>,
    /// Human-readable summary of what happened (or would have).
    pub action_taken: String,
    /// Flatten notional at decision time; zero for cancels; `None` when the
    /// price was unavailable.
    pub notional: Option<Decimal>,
    pub exchange_order_id: Option<String>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Immutable executor configuration, built once from the loaded config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationConfig {
    pub enabled: bool,
    pub action: ConfiguredAction,
    pub mode: RemediationMode,
    pub dry_run: bool,
    pub armed: bool,
    pub allow_mainnet_trade: bool,
    pub exchange_env: ExchangeEnv,
    /// Global trading whitelist. Empty = all symbols.
    pub symbol_whitelist: BTreeSet<String>,
    /// Remediation-specific symbol allowlist. Empty = all symbols.
    pub symbol_allowlist: BTreeSet<String>,
    /// Remediation-specific strategy allowlist. Empty = all strategies.
    pub strategy_allowlist: BTreeSet<String>,
    pub cooldown_ms: i64,
    pub max_orders_per_run: u32,
    pub max_symbols_per_run: u32,
    pub flatten_max_notional_per_call: Decimal,
    pub identity: IdentityConfig,
}

impl Default for RemediationConfig {
    /// Fail-closed defaults: detect only, dry run, not armed.
    fn default() -> Self {
        Self {
            enabled: false,
            action: ConfiguredAction::None,
            mode: RemediationMode::DetectOnly,
            dry_run: true,
            armed: false,
            allow_mainnet_trade: false,
            exchange_env: ExchangeEnv::Testnet,
            symbol_whitelist: BTreeSet::new(),
            symbol_allowlist: BTreeSet::new(),
            strategy_allowlist: BTreeSet::new(),
            cooldown_ms: 60_000,
            max_orders_per_run: 10,
            max_symbols_per_run: 3,
            flatten_max_notional_per_call: Decimal::from(500),
            identity: IdentityConfig::default(),
        }
    }
}
