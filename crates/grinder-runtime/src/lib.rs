//! grinder-runtime
//!
//! Drives one reconcile cycle end to end: detect, route, remediate, record.
//! The runner is the single owner of both state stores, the executor, the
//! metrics and the audit writer; nothing here is global.

mod metrics;
mod runner;

pub use metrics::ReconcileMetrics;
pub use runner::{ReconcileRunner, RunReport, RunnerSettings};
