//! grinder-reconcile
//!
//! Expected-vs-observed state reconciliation.
//!
//! - `ExpectedStateStore`: orders this bot believes it placed (bounded, TTL).
//! - `ObservedStateStore`: venue orders/positions merged from stream + REST.
//! - `ReconcileEngine`: diffs the two into a deterministically ordered
//!   list of [`Mismatch`].
//! - `routing`: pure mapping of mismatch kind to a candidate action.
//!
//! Deterministic, pure logic. No IO, no clock: callers pass `now_ms`.

mod engine;
mod expected;
mod observed;
pub mod routing;
mod types;
mod watermark;

pub use engine::{EngineConfig, ReconcileEngine, DEFAULT_ORDER_GRACE_MS};
pub use expected::{ExpectedStateStore, DEFAULT_EXPECTED_MAX_ORDERS, DEFAULT_EXPECTED_TTL_MS};
pub use observed::{MergeOutcome, ObservedStateStore, RestSnapshot};
pub use routing::{route, RoutedAction, RoutingPolicy};
pub use types::*;
pub use watermark::{SnapshotFreshness, SnapshotWatermark};
