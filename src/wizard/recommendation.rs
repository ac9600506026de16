//! Correlation and sanitizing of AI recommendations.
//!
//! Each request gets a token naming its target at issue time. A response is
//! only written back if its token is still pending and the target symbols
//! still exist; responses for the same target overwrite each other in arrival
//! order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::allocation::{canonical_type, checked_weight_sum, normalize, uniform, ExchangeId};
use crate::api::{Recommendation, RecommendationQuery};

/// Identifies one in-flight recommendation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(Uuid);

impl RequestToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a pending request will write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTarget {
    pub exchange: ExchangeId,
    pub symbols: Vec<String>,
    pub issued_at: DateTime<Utc>,
}

/// An issued request, ready to hand to the advisor.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRequest {
    pub token: RequestToken,
    pub query: RecommendationQuery,
}

/// In-flight requests by token.
#[derive(Debug, Default)]
pub struct PendingRecommendations {
    inflight: HashMap<RequestToken, PendingTarget>,
}

impl PendingRecommendations {
    pub fn issue(&mut self, exchange: &str, symbols: Vec<String>) -> RequestToken {
        let token = RequestToken::new();
        self.inflight.insert(
            token,
            PendingTarget {
                exchange: exchange.to_string(),
                symbols,
                issued_at: Utc::now(),
            },
        );
        token
    }

    /// Take the target for a completed request. `None` for unknown tokens.
    pub fn resolve(&mut self, token: RequestToken) -> Option<PendingTarget> {
        self.inflight.remove(&token)
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn clear(&mut self) {
        self.inflight.clear();
    }
}

/// Where applied symbol weights came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightSource {
    Advisor,
    Uniform,
}

/// Why a completed request was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Token was never issued, already resolved, or the session was reset
    UnknownToken,
    /// None of the requested symbols are in the tree any more
    TargetRemoved,
}

/// Result of completing a recommendation request.
#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationOutcome {
    Applied {
        exchange: ExchangeId,
        weights: BTreeMap<String, Decimal>,
        source: WeightSource,
        /// Pairs whose strategy split was replaced from hints
        strategy_updates: usize,
    },
    Discarded(DiscardReason),
}

impl RecommendationOutcome {
    #[cfg(test)]
    pub fn weights(&self) -> Option<&BTreeMap<String, Decimal>> {
        match self {
            Self::Applied { weights, .. } => Some(weights),
            Self::Discarded(_) => None,
        }
    }
}

/// Normalized symbol weights over `selection`.
///
/// Advisor weights are percentage-like and only count for selected symbols.
/// Missing, empty, all-zero or overflowing advice gives a uniform split.
pub fn resolve_symbol_weights(
    selection: &[String],
    recommendation: Option<&Recommendation>,
) -> (BTreeMap<String, Decimal>, WeightSource) {
    let advised = recommendation
        .and_then(|r| r.symbol_weights.as_ref())
        .filter(|w| !w.is_empty());

    let Some(advised) = advised else {
        return (uniform(selection.iter().cloned()), WeightSource::Uniform);
    };

    let candidates: BTreeMap<String, Decimal> = selection
        .iter()
        .map(|s| (s.clone(), advised.get(s).copied().unwrap_or(Decimal::ZERO).max(Decimal::ZERO)))
        .collect();

    match checked_weight_sum(&candidates) {
        Some(total) if total > Decimal::ZERO => (normalize(&candidates), WeightSource::Advisor),
        _ => (uniform(selection.iter().cloned()), WeightSource::Uniform),
    }
}

/// Normalized strategy split hinted for one symbol.
///
/// Hints naming strategy types the backend does not offer are dropped; the
/// offered spelling is kept. `None` when nothing usable remains or the hinted
/// weights overflow.
pub fn resolve_strategy_hints(
    symbol: &str,
    recommendation: &Recommendation,
    available_types: &[String],
) -> Option<BTreeMap<String, Decimal>> {
    let hints = recommendation.strategy_hints.as_ref()?.get(symbol)?;

    let mut usable: BTreeMap<String, Decimal> = BTreeMap::new();
    for (hinted, weight) in hints {
        let key = canonical_type(hinted);
        let offered = available_types.iter().find(|t| canonical_type(t) == key);
        if let Some(name) = offered {
            let entry = usable.entry(name.clone()).or_insert(Decimal::ZERO);
            *entry = entry.checked_add((*weight).max(Decimal::ZERO))?;
        }
    }

    match checked_weight_sum(&usable) {
        Some(total) if total > Decimal::ZERO => Some(normalize(&usable)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn selection(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    fn advice(pairs: &[(&str, Decimal)]) -> Recommendation {
        Recommendation {
            symbol_weights: Some(pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_percentages_are_normalized() {
        let rec = advice(&[("BTCUSDT", dec!(70)), ("ETHUSDT", dec!(30))]);
        let (weights, source) = resolve_symbol_weights(&selection(&["BTCUSDT", "ETHUSDT"]), Some(&rec));
        assert_eq!(source, WeightSource::Advisor);
        assert_eq!(weights["BTCUSDT"], dec!(0.7));
        assert_eq!(weights["ETHUSDT"], dec!(0.3));
    }

    #[test]
    fn test_missing_advice_is_uniform() {
        let symbols = selection(&["a", "b", "c"]);
        let third = Decimal::ONE / dec!(3);

        let (weights, source) = resolve_symbol_weights(&symbols, None);
        assert_eq!(source, WeightSource::Uniform);
        assert!(weights.values().all(|w| *w == third));

        let empty = Recommendation {
            symbol_weights: Some(BTreeMap::new()),
            ..Default::default()
        };
        let (weights, source) = resolve_symbol_weights(&symbols, Some(&empty));
        assert_eq!(source, WeightSource::Uniform);
        assert_eq!(weights.len(), 3);
    }

    #[test]
    fn test_unselected_symbols_are_ignored() {
        let rec = advice(&[("BTCUSDT", dec!(50)), ("DOGEUSDT", dec!(50))]);
        let (weights, _) = resolve_symbol_weights(&selection(&["BTCUSDT", "ETHUSDT"]), Some(&rec));
        assert_eq!(weights["BTCUSDT"], Decimal::ONE);
        assert_eq!(weights["ETHUSDT"], Decimal::ZERO);
        assert!(!weights.contains_key("DOGEUSDT"));

        let rec = advice(&[("DOGEUSDT", dec!(100))]);
        let (weights, source) = resolve_symbol_weights(&selection(&["BTCUSDT", "ETHUSDT"]), Some(&rec));
        assert_eq!(source, WeightSource::Uniform);
        assert_eq!(weights["BTCUSDT"], dec!(0.5));
    }

    #[test]
    fn test_overflowing_advice_is_uniform() {
        let rec = advice(&[("BTCUSDT", Decimal::MAX), ("ETHUSDT", Decimal::MAX)]);
        let (weights, source) = resolve_symbol_weights(&selection(&["BTCUSDT", "ETHUSDT"]), Some(&rec));
        assert_eq!(source, WeightSource::Uniform);
        assert_eq!(weights["BTCUSDT"], dec!(0.5));
        assert_eq!(weights["ETHUSDT"], dec!(0.5));

        let mut hints = BTreeMap::new();
        hints.insert(
            "BTCUSDT".to_string(),
            [("grid".to_string(), Decimal::MAX), ("Grid".to_string(), Decimal::MAX)]
                .into_iter()
                .collect(),
        );
        let rec = Recommendation {
            strategy_hints: Some(hints),
            ..Default::default()
        };
        assert!(resolve_strategy_hints("BTCUSDT", &rec, &selection(&["grid"])).is_none());
    }

    #[test]
    fn test_strategy_hints_filtered_to_offered_types() {
        let mut hints = BTreeMap::new();
        hints.insert(
            "BTCUSDT".to_string(),
            [
                ("Grid".to_string(), dec!(60)),
                ("dca".to_string(), dec!(20)),
                ("arbitrage".to_string(), dec!(20)),
            ]
            .into_iter()
            .collect(),
        );
        let rec = Recommendation {
            strategy_hints: Some(hints),
            ..Default::default()
        };
        let offered = selection(&["grid", "dca"]);

        let split = resolve_strategy_hints("BTCUSDT", &rec, &offered).unwrap();
        assert_eq!(split["grid"], dec!(0.75));
        assert_eq!(split["dca"], dec!(0.25));
        assert!(resolve_strategy_hints("ETHUSDT", &rec, &offered).is_none());
        assert!(resolve_strategy_hints("BTCUSDT", &rec, &selection(&["trend"])).is_none());
    }

    #[test]
    fn test_pending_tokens_resolve_once() {
        let mut pending = PendingRecommendations::default();
        let token = pending.issue("binance", selection(&["BTCUSDT"]));
        assert_eq!(pending.len(), 1);

        let target = pending.resolve(token).unwrap();
        assert_eq!(target.exchange, "binance");
        assert!(pending.resolve(token).is_none());
        assert_eq!(pending.len(), 0);
    }
}
