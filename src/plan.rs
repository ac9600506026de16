//! Draft plan files: a JSON description of what the operator would enter in
//! each wizard step.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::allocation::{
    capital_share, normalize, strategy_split_failures, validate_asset_allocation, AllocationTree, PairKey,
    RiskProfile, ValidationFailure, WeightTemplate, WithdrawalError, WithdrawalPolicy,
};
use crate::api::StaticCatalog;
use crate::wizard::{RecommendationOutcome, WizardConfig, WizardSession};

/// One exchange as described in a draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DraftExchange {
    /// Balance reported by the offline catalog
    pub balance: Option<Decimal>,

    /// Symbols the offline catalog lists; defaults to the allocated ones
    pub available_symbols: Vec<String>,

    /// Overrides the balance-seeded total
    pub total_capital: Option<Decimal>,

    /// symbol -> capital
    pub symbols: BTreeMap<String, Decimal>,

    /// Symbols to ask the AI advisor about
    pub recommend: Vec<String>,

    /// Symbols dropped again after recommendations
    pub remove: Vec<String>,

    /// Spread the total evenly over the symbols
    pub split_evenly: bool,

    /// symbol -> strategy type -> weight
    pub strategies: BTreeMap<String, BTreeMap<String, Decimal>>,
}

impl DraftExchange {
    fn listed_symbols(&self) -> Vec<String> {
        if !self.available_symbols.is_empty() {
            return self.available_symbols.clone();
        }
        self.symbols
            .keys()
            .chain(self.recommend.iter())
            .cloned()
            .collect()
    }

    fn seeded_total(&self) -> Decimal {
        self.total_capital
            .or(self.balance)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Everything needed to run a wizard session non-interactively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DraftPlan {
    pub ai_key: Option<String>,
    pub risk_profile: RiskProfile,
    pub strategy_types: Vec<String>,
    pub exchanges: BTreeMap<String, DraftExchange>,

    /// Fill pairs without explicit strategies from the profile template
    pub apply_risk_profile: bool,

    /// Rescale explicit strategy splits to 100%
    pub normalize_strategies: bool,

    /// strategy type -> parameter object
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub withdrawal: WithdrawalPolicy,
}

impl Default for DraftPlan {
    fn default() -> Self {
        Self {
            ai_key: None,
            risk_profile: RiskProfile::Balanced,
            strategy_types: Vec::new(),
            exchanges: BTreeMap::new(),
            apply_risk_profile: true,
            normalize_strategies: false,
            parameters: BTreeMap::new(),
            withdrawal: WithdrawalPolicy::default(),
        }
    }
}

impl DraftPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read draft plan {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid draft plan {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse draft plan JSON")
    }

    /// Read-side collaborators answering from the draft itself.
    pub fn catalog(&self) -> StaticCatalog {
        let mut catalog = StaticCatalog::new();
        for (id, exchange) in &self.exchanges {
            catalog.insert_exchange(id.clone(), exchange.listed_symbols());
            if let Some(balance) = exchange.balance {
                catalog.insert_balance(id.clone(), balance);
            }
        }
        catalog.set_strategy_types(self.strategy_types.clone());
        catalog
    }

    fn offered_types(&self) -> Vec<String> {
        if self.strategy_types.is_empty() {
            WizardConfig::default().fallback_strategy_types
        } else {
            self.strategy_types.clone()
        }
    }

    /// The tree the draft describes, without running a session.
    ///
    /// Recommendations are not requested; `remove` and `splitEvenly` are honoured.
    pub fn tree(&self) -> AllocationTree {
        let mut tree = AllocationTree::new(self.exchanges.keys().cloned());
        let template = WeightTemplate::recommended_split(self.risk_profile, &self.offered_types());

        for (id, exchange) in &self.exchanges {
            let total = exchange.seeded_total();
            tree.set_total_capital(id, total);
            if let Some(balance) = exchange.balance {
                tree.set_available_balance(id, balance);
            }
            for (symbol, capital) in &exchange.symbols {
                tree.add_exchange_symbol(id, symbol, *capital);
            }
            for symbol in &exchange.remove {
                tree.remove_symbol(id, symbol);
            }

            let kept: Vec<String> = tree
                .exchange(id)
                .map(|node| node.symbols().map(|s| s.symbol.clone()).collect())
                .unwrap_or_default();
            if exchange.split_evenly && !kept.is_empty() {
                let share = capital_share(total, Decimal::ONE / Decimal::from(kept.len()));
                for symbol in &kept {
                    tree.set_symbol_capital(id, symbol, share);
                }
            }

            let allocated: Vec<String> = tree
                .configured_symbols_for_exchange(id)
                .into_iter()
                .map(|a| a.symbol.clone())
                .collect();
            for symbol in &allocated {
                match exchange.strategies.get(symbol) {
                    Some(split) => {
                        let split = self.explicit_split(split);
                        for (strategy_type, weight) in &split {
                            tree.set_strategy_weight(id, symbol, strategy_type, *weight);
                        }
                    }
                    None if self.apply_risk_profile => tree.replace_strategy_split(id, symbol, &template),
                    None => {}
                }
            }
        }

        tree
    }

    fn explicit_split(&self, split: &BTreeMap<String, Decimal>) -> BTreeMap<String, Decimal> {
        if self.normalize_strategies {
            normalize(split)
        } else {
            split.clone()
        }
    }

    /// Run every gate against the draft.
    pub fn check(&self) -> DraftReport {
        let tree = self.tree();
        DraftReport {
            asset_allocation: validate_asset_allocation(&tree),
            strategy_split: strategy_split_failures(&tree),
            withdrawal: self.withdrawal.validate(),
        }
    }

    /// Walk a session from AI setup up to the withdrawal step.
    pub async fn drive(&self, session: &mut WizardSession) -> Result<()> {
        // AI setup
        match &self.ai_key {
            Some(key) if !key.trim().is_empty() => {
                session.set_ai_credential(key.clone());
                session.advance().context("AI setup")?;
            }
            _ => {
                session.skip_ai_setup().context("AI setup")?;
            }
        }
        session.set_risk_profile(self.risk_profile);

        // Asset allocation
        for (id, exchange) in &self.exchanges {
            if let Some(total) = exchange.total_capital {
                session.set_total_capital(id, total);
            }
            for (symbol, capital) in &exchange.symbols {
                session.add_symbol(id, symbol, *capital);
            }
            if !exchange.recommend.is_empty() {
                match session.recommend(id, &exchange.recommend).await {
                    RecommendationOutcome::Applied {
                        exchange,
                        weights,
                        source,
                        strategy_updates,
                    } => info!(
                        exchange = %exchange,
                        symbols = weights.len(),
                        source = ?source,
                        strategy_updates,
                        "Symbol weights from recommendation"
                    ),
                    RecommendationOutcome::Discarded(reason) => {
                        warn!(exchange = %id, reason = ?reason, "Recommendation discarded")
                    }
                }
            }
            for symbol in &exchange.remove {
                session.remove_symbol(id, symbol);
            }
            if exchange.split_evenly {
                session.split_evenly(id);
            }
        }
        session.advance().context("Asset allocation")?;

        // Strategy split
        if self.apply_risk_profile {
            session.apply_risk_profile(self.risk_profile);
        }
        for (id, exchange) in &self.exchanges {
            for (symbol, split) in &exchange.strategies {
                let pair = PairKey::new(id.clone(), symbol.clone());
                session.set_strategy_split(&pair, split);
                if self.normalize_strategies {
                    session.normalize_strategy_split(&pair);
                }
            }
        }
        session.advance().context("Strategy split")?;

        // Parameter tuning
        for (strategy_type, parameters) in &self.parameters {
            session
                .set_strategy_parameters(strategy_type, parameters.clone())
                .context("Parameter tuning")?;
        }
        session.advance().context("Parameter tuning")?;

        session.set_withdrawal_policy(self.withdrawal.clone());
        Ok(())
    }
}

/// Gate results for a draft.
#[derive(Debug, Clone)]
pub struct DraftReport {
    pub asset_allocation: Result<(), ValidationFailure>,
    /// Every pair failing the 100% rule
    pub strategy_split: Vec<ValidationFailure>,
    pub withdrawal: Result<(), WithdrawalError>,
}

impl DraftReport {
    pub fn is_valid(&self) -> bool {
        self.asset_allocation.is_ok() && self.strategy_split.is_empty() && self.withdrawal.is_ok()
    }
}

impl fmt::Display for DraftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^60}", " DRAFT CHECK ")?;
        match &self.asset_allocation {
            Ok(()) => writeln!(f, "Asset allocation:  OK")?,
            Err(e) => writeln!(f, "Asset allocation:  FAIL  {}", e)?,
        }
        if self.strategy_split.is_empty() {
            writeln!(f, "Strategy split:    OK")?;
        } else {
            writeln!(f, "Strategy split:    FAIL")?;
            for failure in &self.strategy_split {
                writeln!(f, "  - {}", failure)?;
            }
        }
        match &self.withdrawal {
            Ok(()) => writeln!(f, "Withdrawal:        OK")?,
            Err(e) => writeln!(f, "Withdrawal:        FAIL  {}", e)?,
        }
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}
