//! Venue-facing ports consumed by the executor.
//!
//! [`ExchangePort`] methods require a [`PortCallToken`]. The token's field is
//! private and its constructor is crate-private, so only the executor's
//! execute step can mint one. Callers outside this crate can implement the
//! trait but cannot invoke it.

use std::fmt;

use grinder_reconcile::Side;
use rust_decimal::Decimal;

/// Capability proving the call comes from the execute step, after every
/// gate passed.
#[derive(Debug)]
pub struct PortCallToken {
    _priv: (),
}

impl PortCallToken {
    pub(crate) fn new() -> Self {
        Self { _priv: () }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortError {
    /// Connection-level failure.
    Transport(String),
    /// The venue answered with an error.
    Rejected { code: i64, message: String },
    Timeout,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::Transport(msg) => write!(f, "transport error: {msg}"),
            PortError::Rejected { code, message } => {
                write!(f, "venue rejected request (code {code}): {message}")
            }
            PortError::Timeout => write!(f, "request timed out"),
        }
    }
}

impl std::error::Error for PortError {}

/// The subset of the venue API remediation needs. Implementations must be
/// safe to call again with the same arguments; retries happen on the next
/// cycle, never inside one.
pub trait ExchangePort {
    /// `Ok(true)` = cancelled; `Ok(false)` = the venue reports the order as
    /// already gone.
    fn cancel_order(
        &mut self,
        symbol: &str,
        client_order_id: &str,
        token: &PortCallToken,
    ) -> Result<bool, PortError>;

    /// Market order; returns the venue order id.
    fn place_market_order(
        &mut self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        reduce_only: bool,
        token: &PortCallToken,
    ) -> Result<String, PortError>;
}

/// Mark price lookup. `None` = unavailable; callers must not estimate.
pub trait PriceSource {
    fn get_price(&self, symbol: &str) -> Option<Decimal>;
}

impl<T: PriceSource + ?Sized> PriceSource for &T {
    fn get_price(&self, symbol: &str) -> Option<Decimal> {
        (**self).get_price(symbol)
    }
}
