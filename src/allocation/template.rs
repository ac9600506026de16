//! Risk-profile weight templates for strategy splits.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};

use super::normalizer::normalize;

/// Strategy types the templates know about.
pub const KNOWN_STRATEGY_TYPES: [&str; 8] = [
    "grid",
    "dca",
    "martingale",
    "trend",
    "mean_reversion",
    "breakout",
    "momentum",
    "combo",
];

/// Operator risk appetite, selects a template row.
///
/// Deserializes through [`RiskProfile::from_str`], so unknown names become
/// `Balanced` instead of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl RiskProfile {
    pub const ALL: [RiskProfile; 3] = [Self::Conservative, Self::Balanced, Self::Aggressive];

    /// Parse a profile name, falling back to `Balanced` for anything unknown.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "conservative" | "low" => Self::Conservative,
            "aggressive" | "high" => Self::Aggressive,
            _ => Self::Balanced,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
        }
    }
}

impl<'de> Deserialize<'de> for RiskProfile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_str(&name))
    }
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static profile × strategy-type weight table.
pub struct WeightTemplate;

impl WeightTemplate {
    /// Full template row for a profile. Each row sums to 1.
    fn row(profile: RiskProfile) -> [(&'static str, Decimal); 8] {
        match profile {
            RiskProfile::Conservative => [
                ("grid", dec!(0.30)),
                ("dca", dec!(0.35)),
                ("martingale", dec!(0.00)),
                ("trend", dec!(0.10)),
                ("mean_reversion", dec!(0.15)),
                ("breakout", dec!(0.00)),
                ("momentum", dec!(0.05)),
                ("combo", dec!(0.05)),
            ],
            RiskProfile::Balanced => [
                ("grid", dec!(0.25)),
                ("dca", dec!(0.20)),
                ("martingale", dec!(0.05)),
                ("trend", dec!(0.15)),
                ("mean_reversion", dec!(0.10)),
                ("breakout", dec!(0.10)),
                ("momentum", dec!(0.10)),
                ("combo", dec!(0.05)),
            ],
            RiskProfile::Aggressive => [
                ("grid", dec!(0.15)),
                ("dca", dec!(0.10)),
                ("martingale", dec!(0.15)),
                ("trend", dec!(0.15)),
                ("mean_reversion", dec!(0.05)),
                ("breakout", dec!(0.15)),
                ("momentum", dec!(0.20)),
                ("combo", dec!(0.05)),
            ],
        }
    }

    /// Template weight for one strategy type; zero when the table has no entry.
    pub fn weight_for(profile: RiskProfile, strategy_type: &str) -> Decimal {
        let key = canonical_type(strategy_type);
        Self::row(profile)
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, w)| *w)
            .unwrap_or(Decimal::ZERO)
    }

    /// Base weights for the strategy types actually offered.
    ///
    /// Not renormalized: callers can inspect the profile bias before rescaling.
    pub fn base_weights(profile: RiskProfile, available_types: &[String]) -> BTreeMap<String, Decimal> {
        available_types
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| (t.clone(), Self::weight_for(profile, t)))
            .collect()
    }

    /// Base weights rescaled to sum to one.
    pub fn recommended_split(profile: RiskProfile, available_types: &[String]) -> BTreeMap<String, Decimal> {
        normalize(&Self::base_weights(profile, available_types))
    }
}

/// Lowercase, with `-` and spaces folded to `_`.
pub fn canonical_type(strategy_type: &str) -> String {
    strategy_type
        .trim()
        .to_lowercase()
        .replace(['-', ' '], "_")
}
