//! Wizard configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::allocation::RiskProfile;

/// Defaults and fallbacks for a wizard session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardConfig {
    /// Profile selected when the session opens
    pub default_risk_profile: RiskProfile,

    /// Strategy types used when the backend list cannot be fetched
    pub fallback_strategy_types: Vec<String>,

    /// Pre-fill each exchange's total capital with its available balance
    pub seed_total_from_balance: bool,

    /// Upper bound on one AI recommendation call (seconds)
    pub ai_timeout_secs: u64,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            default_risk_profile: RiskProfile::Balanced,
            fallback_strategy_types: vec!["grid".to_string(), "dca".to_string()],
            seed_total_from_balance: true,
            ai_timeout_secs: 60,
        }
    }
}

impl WizardConfig {
    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs.max(1))
    }
}
