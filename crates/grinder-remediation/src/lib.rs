//! grinder-remediation
//!
//! The only subsystem allowed to mutate live venue state outside the grid
//! policy: cancel an unrecognised order, flatten an unrecognised position.
//!
//! # Safety model
//!
//! Every candidate runs through the ordered gate list in [`gates`]. The
//! first gate that fails short-circuits with `BLOCKED` and its reason. The
//! exchange port is reachable only from the final execute step: its methods
//! require a [`PortCallToken`], which only [`RemediationExecutor`] can mint.
//!
//! Budget state is persisted (`budget`), everything else is per-process.

pub mod budget;
pub mod gates;

mod executor;
mod port;
mod types;

pub use budget::{BudgetLimitHit, BudgetLimits, BudgetState, BudgetTracker};
pub use executor::{CycleContext, RemediationExecutor};
pub use gates::{Candidate, Cooldown, GateContext, GateVerdict, RunCounters, GATES};
pub use port::{ExchangePort, PortCallToken, PortError, PriceSource};
pub use types::*;
