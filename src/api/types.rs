//! Request and response types exchanged with the configuration backend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::allocation::{ExchangeId, RiskProfile};

/// Balance response from `/api/exchanges/{id}/balance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    #[serde(default = "default_asset")]
    pub asset: String,
    pub available: Decimal,
}

fn default_asset() -> String {
    "USDT".to_string()
}

/// Strategy type entry; the backend sends either bare names or objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StrategyTypeEntry {
    Name(String),
    Detailed {
        #[serde(alias = "type", alias = "id")]
        name: String,
        #[serde(default = "default_enabled")]
        enabled: bool,
    },
}

fn default_enabled() -> bool {
    true
}

impl StrategyTypeEntry {
    /// Name of an enabled entry.
    pub fn into_enabled_name(self) -> Option<String> {
        match self {
            Self::Name(name) => Some(name),
            Self::Detailed { name, enabled: true } => Some(name),
            Self::Detailed { .. } => None,
        }
    }
}

/// What the AI service is asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationQuery {
    pub exchange: ExchangeId,
    pub symbols: Vec<String>,
    pub risk_profile: RiskProfile,
    /// Total capital configured for the exchange
    pub capital: Decimal,
}

/// AI service answer. Untrusted: either part may be missing, weights are
/// percentage-like and are normalized before use.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    #[serde(default)]
    pub symbol_weights: Option<BTreeMap<String, Decimal>>,

    /// symbol -> strategy type -> weight
    #[serde(default)]
    pub strategy_hints: Option<BTreeMap<String, BTreeMap<String, Decimal>>>,

    #[serde(default)]
    pub rationale: Option<String>,
}

/// Result of a successful generate call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPlan {
    pub plan_id: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Result of a successful apply call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReceipt {
    pub plan_id: String,
    pub applied_at: DateTime<Utc>,
    /// Backend task tracking the rollout, when there is one
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: String,
}

/// Body of `/api/config/apply`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest<'a> {
    pub plan_id: &'a str,
}

/// Error body the backend returns on failures.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    #[serde(default, alias = "error")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_recommendation_with_missing_parts() {
        let rec: Recommendation = serde_json::from_str("{}").unwrap();
        assert!(rec.symbol_weights.is_none());
        assert!(rec.strategy_hints.is_none());

        let rec: Recommendation = serde_json::from_str(
            r#"{"symbolWeights": {"BTCUSDT": 70, "ETHUSDT": "30"}, "strategyHints": {"BTCUSDT": {"grid": 60, "dca": 40}}}"#,
        )
        .unwrap();
        let weights = rec.symbol_weights.unwrap();
        assert_eq!(weights["BTCUSDT"], dec!(70));
        assert_eq!(weights["ETHUSDT"], dec!(30));
        assert_eq!(rec.strategy_hints.unwrap()["BTCUSDT"]["grid"], dec!(60));
    }

    #[test]
    fn test_strategy_type_entries() {
        let entries: Vec<StrategyTypeEntry> = serde_json::from_str(
            r#"["grid", {"name": "dca"}, {"type": "martingale", "enabled": false}]"#,
        )
        .unwrap();
        let names: Vec<String> = entries.into_iter().filter_map(StrategyTypeEntry::into_enabled_name).collect();
        assert_eq!(names, vec!["grid".to_string(), "dca".to_string()]);
    }
}
