use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order / position side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Venue order status (futures user-data stream vocabulary).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Terminal orders can never become open again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

/// Where an observed record came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationSource {
    Stream,
    #[default]
    Rest,
}

/// An order this bot placed and still believes to be live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOrder {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub ts_created_ms: i64,
}

/// Venue view of an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedOrder {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub avg_price: Decimal,
    pub ts_ms: i64,
    /// Overwritten by the store on merge.
    #[serde(default)]
    pub source: ObservationSource,
}

/// Venue view of a position. `position_amt` is signed: +long, -short.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedPosition {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub ts_ms: i64,
    /// Overwritten by the store on merge.
    #[serde(default)]
    pub source: ObservationSource,
}

impl ObservedPosition {
    pub fn is_flat(&self) -> bool {
        self.position_amt.is_zero()
    }
}

/// Kind of divergence. Declaration order is the tie-break priority used
/// when sorting mismatches inside one symbol: order kinds (cancel
/// candidates) before position kinds (flatten candidates).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MismatchKind {
    OrderExistsUnexpected,
    OrderAmountMismatch,
    OrderMissingOnExchange,
    PositionNonzeroUnexpected,
}

impl MismatchKind {
    pub const ALL: [MismatchKind; 4] = [
        MismatchKind::OrderExistsUnexpected,
        MismatchKind::OrderAmountMismatch,
        MismatchKind::OrderMissingOnExchange,
        MismatchKind::PositionNonzeroUnexpected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchKind::OrderExistsUnexpected => "ORDER_EXISTS_UNEXPECTED",
            MismatchKind::OrderAmountMismatch => "ORDER_AMOUNT_MISMATCH",
            MismatchKind::OrderMissingOnExchange => "ORDER_MISSING_ON_EXCHANGE",
            MismatchKind::PositionNonzeroUnexpected => "POSITION_NONZERO_UNEXPECTED",
        }
    }
}

impl std::fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What we believed at detection time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpectedSnapshot {
    Order(ExpectedOrder),
    Position { symbol: String, position_amt: Decimal },
}

/// What the venue reported at detection time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObservedSnapshot {
    Order(ObservedOrder),
    Position(ObservedPosition),
}

/// One detected divergence. Recomputed every cycle, never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub kind: MismatchKind,
    pub symbol: String,
    pub client_order_id: Option<String>,
    pub expected: Option<ExpectedSnapshot>,
    pub observed: Option<ObservedSnapshot>,
    pub ts_detected_ms: i64,
    pub action_plan: String,
}

impl Mismatch {
    /// Canonical sort key: symbol, then kind priority, then order id.
    pub fn sort_key(&self) -> (&str, MismatchKind, Option<&str>) {
        (self.symbol.as_str(), self.kind, self.client_order_id.as_deref())
    }

    pub fn observed_order(&self) -> Option<&ObservedOrder> {
        match &self.observed {
            Some(ObservedSnapshot::Order(o)) => Some(o),
            _ => None,
        }
    }

    pub fn observed_position(&self) -> Option<&ObservedPosition> {
        match &self.observed {
            Some(ObservedSnapshot::Position(p)) => Some(p),
            _ => None,
        }
    }
}
