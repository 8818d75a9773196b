//! Routing policy: mismatch kind -> candidate remediation action.
//!
//! Pure. The executor decides whether a candidate may actually run.

use serde::{Deserialize, Serialize};

use crate::{Mismatch, MismatchKind};

/// Candidate corrective action for one mismatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutedAction {
    Cancel,
    Flatten,
    NoAction,
}

impl RoutedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutedAction::Cancel => "CANCEL",
            RoutedAction::Flatten => "FLATTEN",
            RoutedAction::NoAction => "NO_ACTION",
        }
    }

    /// Processing rank inside one symbol: cancels clear resting orders
    /// before a position's size can be trusted.
    fn rank(&self) -> u8 {
        match self {
            RoutedAction::Cancel => 0,
            RoutedAction::Flatten => 1,
            RoutedAction::NoAction => 2,
        }
    }
}

/// Map a mismatch kind to its candidate action.
pub fn route(kind: MismatchKind) -> RoutedAction {
    match kind {
        MismatchKind::OrderExistsUnexpected | MismatchKind::OrderAmountMismatch => {
            RoutedAction::Cancel
        }
        MismatchKind::PositionNonzeroUnexpected => RoutedAction::Flatten,
        // Detect-only: nothing on the venue to act on; signals an upstream bug.
        MismatchKind::OrderMissingOnExchange => RoutedAction::NoAction,
    }
}

/// Stateless wrapper so the runner can hold the policy as a value.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoutingPolicy;

impl RoutingPolicy {
    pub fn route(&self, kind: MismatchKind) -> RoutedAction {
        route(kind)
    }

    /// Pair every mismatch with its action, in processing order.
    ///
    /// Input order (the engine's canonical order) is preserved except that,
    /// within one symbol, cancel candidates always precede flatten
    /// candidates. The sort is stable.
    pub fn plan<'a>(&self, mismatches: &'a [Mismatch]) -> Vec<(&'a Mismatch, RoutedAction)> {
        let mut planned: Vec<(&Mismatch, RoutedAction)> =
            mismatches.iter().map(|m| (m, route(m.kind))).collect();
        planned.sort_by(|(a, aa), (b, ba)| {
            a.symbol
                .cmp(&b.symbol)
                .then_with(|| aa.rank().cmp(&ba.rank()))
        });
        planned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mismatch(symbol: &str, kind: MismatchKind, id: Option<&str>) -> Mismatch {
        Mismatch {
            kind,
            symbol: symbol.to_string(),
            client_order_id: id.map(str::to_string),
            expected: None,
            observed: None,
            ts_detected_ms: 0,
            action_plan: String::new(),
        }
    }

    #[test]
    fn kinds_route_as_documented() {
        assert_eq!(route(MismatchKind::OrderExistsUnexpected), RoutedAction::Cancel);
        assert_eq!(route(MismatchKind::OrderAmountMismatch), RoutedAction::Cancel);
        assert_eq!(route(MismatchKind::PositionNonzeroUnexpected), RoutedAction::Flatten);
        assert_eq!(route(MismatchKind::OrderMissingOnExchange), RoutedAction::NoAction);
    }

    #[test]
    fn cancel_precedes_flatten_within_symbol() {
        // Deliberately out of canonical order.
        let ms = vec![
            mismatch("BTCUSDT", MismatchKind::PositionNonzeroUnexpected, None),
            mismatch("BTCUSDT", MismatchKind::OrderExistsUnexpected, Some("grinder_x")),
            mismatch("ADAUSDT", MismatchKind::PositionNonzeroUnexpected, None),
        ];
        let plan = RoutingPolicy.plan(&ms);
        let got: Vec<_> = plan.iter().map(|(m, a)| (m.symbol.as_str(), *a)).collect();
        assert_eq!(
            got,
            vec![
                ("ADAUSDT", RoutedAction::Flatten),
                ("BTCUSDT", RoutedAction::Cancel),
                ("BTCUSDT", RoutedAction::Flatten),
            ]
        );
    }
}
