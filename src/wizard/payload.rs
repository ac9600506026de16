//! Submission payload and its human-readable preview.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::allocation::{
    capital_share, AllocationTree, ExchangeId, PairKey, PortfolioAggregate, RiskProfile,
    StrategySplit, WithdrawalPolicy,
};

/// One exchange's part of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePayload {
    pub total_capital: Decimal,
    /// symbol -> capital
    pub symbols: BTreeMap<String, Decimal>,
}

/// Everything handed to the submission sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub risk_profile: RiskProfile,
    pub exchanges: BTreeMap<ExchangeId, ExchangePayload>,
    /// `exchange:symbol` -> split
    pub strategies: BTreeMap<String, Vec<StrategySplit>>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub withdrawal: WithdrawalPolicy,
}

impl SubmissionPayload {
    /// Serialize a session's state.
    pub fn build(
        session_id: Uuid,
        tree: &AllocationTree,
        risk_profile: RiskProfile,
        parameters: &BTreeMap<String, serde_json::Value>,
        withdrawal: &WithdrawalPolicy,
    ) -> Self {
        let mut exchanges = BTreeMap::new();
        let mut strategies = BTreeMap::new();

        for (id, node) in tree.exchanges() {
            let symbols = node
                .symbols()
                .map(|s| (s.symbol.clone(), s.capital))
                .collect();
            exchanges.insert(
                id.to_string(),
                ExchangePayload {
                    total_capital: node.total_capital(),
                    symbols,
                },
            );

            for alloc in node.symbols() {
                let split = node.strategy_split(&alloc.symbol);
                if !split.is_empty() {
                    strategies.insert(PairKey::new(id, alloc.symbol.clone()).to_string(), split.to_vec());
                }
            }
        }

        Self {
            session_id,
            created_at: Utc::now(),
            risk_profile,
            exchanges,
            strategies,
            parameters: parameters.clone(),
            withdrawal: withdrawal.clone(),
        }
    }

    /// Total capital across all exchanges.
    pub fn total_capital(&self) -> Decimal {
        self.exchanges
            .values()
            .fold(Decimal::ZERO, |acc, e| acc.saturating_add(e.total_capital))
    }
}

/// One strategy line of a pair in the preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewStrategy {
    pub strategy_type: String,
    pub weight: Decimal,
    pub capital: Decimal,
}

/// One allocated pair in the preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewPair {
    pub symbol: String,
    pub capital: Decimal,
    pub strategies: Vec<PreviewStrategy>,
}

/// One exchange in the preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewExchange {
    pub exchange: ExchangeId,
    pub total_capital: Decimal,
    pub available_balance: Option<Decimal>,
    pub allocated: Decimal,
    pub remaining: Decimal,
    pub pairs: Vec<PreviewPair>,
}

/// What the operator reviews before applying.
#[derive(Debug, Clone)]
pub struct Preview {
    pub plan_id: Option<String>,
    pub risk_profile: RiskProfile,
    pub exchanges: Vec<PreviewExchange>,
    pub portfolio: PortfolioAggregate,
    pub withdrawal: WithdrawalPolicy,
}

impl Preview {
    pub fn build(
        tree: &AllocationTree,
        risk_profile: RiskProfile,
        withdrawal: &WithdrawalPolicy,
        plan_id: Option<String>,
    ) -> Self {
        let exchanges = tree
            .exchanges()
            .map(|(id, node)| {
                let pairs = node
                    .configured_symbols()
                    .map(|alloc| PreviewPair {
                        symbol: alloc.symbol.clone(),
                        capital: alloc.capital,
                        strategies: node
                            .strategy_split(&alloc.symbol)
                            .iter()
                            .map(|s| PreviewStrategy {
                                strategy_type: s.strategy_type.clone(),
                                weight: s.weight,
                                capital: capital_share(alloc.capital, s.weight),
                            })
                            .collect(),
                    })
                    .collect();

                PreviewExchange {
                    exchange: id.to_string(),
                    total_capital: node.total_capital(),
                    available_balance: node.available_balance(),
                    allocated: tree.total_allocated_for_exchange(id),
                    remaining: tree.remaining_for_exchange(id),
                    pairs,
                }
            })
            .collect();

        Self {
            plan_id,
            risk_profile,
            exchanges,
            portfolio: tree.aggregate_across_all_exchanges(),
            withdrawal: withdrawal.clone(),
        }
    }
}

impl std::fmt::Display for Preview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " CONFIGURATION PREVIEW ")?;
        if let Some(plan_id) = &self.plan_id {
            writeln!(f, "Plan:         {}", plan_id)?;
        }
        writeln!(f, "Risk profile: {}", self.risk_profile)?;

        for exchange in &self.exchanges {
            writeln!(f)?;
            writeln!(f, "--- {} ---", exchange.exchange)?;
            writeln!(f, "Total:       ${:.2}", exchange.total_capital)?;
            if let Some(balance) = exchange.available_balance {
                writeln!(f, "Available:   ${:.2}", balance)?;
            }
            writeln!(f, "Allocated:   ${:.2}", exchange.allocated)?;
            writeln!(f, "Remaining:   ${:.2}", exchange.remaining)?;
            for pair in &exchange.pairs {
                writeln!(f, "  {:<12} ${:>12.2}", pair.symbol, pair.capital)?;
                for s in &pair.strategies {
                    writeln!(
                        f,
                        "    {:<16} {:>6.1}%  ${:>12.2}",
                        s.strategy_type,
                        s.weight * dec!(100),
                        s.capital
                    )?;
                }
            }
        }

        writeln!(f)?;
        writeln!(f, "--- Portfolio ---")?;
        writeln!(f, "Grand total: ${:.2}", self.portfolio.grand_total)?;
        writeln!(f, "Allocated:   ${:.2}", self.portfolio.allocated)?;
        for symbol in self.portfolio.symbols.values() {
            writeln!(
                f,
                "  {:<12} ${:>12.2}  {:>6.1}%  ({})",
                symbol.symbol,
                symbol.capital,
                symbol.weight * dec!(100),
                symbol.exchanges.join(", ")
            )?;
        }

        writeln!(f)?;
        writeln!(f, "--- Withdrawal ---")?;
        if self.withdrawal.enabled {
            let modes: Vec<String> = self.withdrawal.modes.iter().map(|m| m.to_string()).collect();
            writeln!(f, "Modes:       {}", modes.join(", "))?;
            writeln!(f, "Withdraw:    {:.1}% of profit", self.withdrawal.profit_ratio * dec!(100))?;
            writeln!(f, "Reserve:     {:.1}%", self.withdrawal.keep_reserve_ratio * dec!(100))?;
        } else {
            writeln!(f, "Disabled")?;
        }
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> AllocationTree {
        let mut tree = AllocationTree::new(["binance", "okx"]);
        tree.set_total_capital("binance", dec!(1000));
        tree.set_available_balance("binance", dec!(1200));
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(600));
        tree.add_exchange_symbol("binance", "ETHUSDT", dec!(400));
        tree.set_strategy_weight("binance", "BTCUSDT", "grid", dec!(0.6));
        tree.set_strategy_weight("binance", "BTCUSDT", "dca", dec!(0.4));
        tree.set_strategy_weight("binance", "ETHUSDT", "grid", dec!(1));
        tree
    }

    #[test]
    fn test_payload_uses_composite_strategy_keys() {
        let payload = SubmissionPayload::build(
            Uuid::new_v4(),
            &tree(),
            RiskProfile::Balanced,
            &BTreeMap::new(),
            &WithdrawalPolicy::default(),
        );

        assert_eq!(payload.exchanges.len(), 2);
        assert_eq!(payload.exchanges["binance"].symbols["BTCUSDT"], dec!(600));
        assert!(payload.exchanges["okx"].symbols.is_empty());
        assert_eq!(payload.strategies["binance:BTCUSDT"].len(), 2);
        assert_eq!(payload.strategies["binance:ETHUSDT"][0].weight, dec!(1));
        assert_eq!(payload.total_capital(), dec!(1000));
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = SubmissionPayload::build(
            Uuid::new_v4(),
            &tree(),
            RiskProfile::Aggressive,
            &BTreeMap::new(),
            &WithdrawalPolicy::default(),
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["riskProfile"], "aggressive");
        assert_eq!(json["exchanges"]["binance"]["totalCapital"], "1000");
        assert_eq!(json["strategies"]["binance:BTCUSDT"][0]["strategyType"], "grid");

        let back: SubmissionPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.exchanges, payload.exchanges);
    }

    #[test]
    fn test_preview_strategy_amounts() {
        let preview = Preview::build(&tree(), RiskProfile::Balanced, &WithdrawalPolicy::default(), None);
        let binance = &preview.exchanges[0];
        assert_eq!(binance.allocated, dec!(1000));
        assert_eq!(binance.remaining, Decimal::ZERO);
        assert_eq!(binance.available_balance, Some(dec!(1200)));
        assert_eq!(preview.exchanges[1].available_balance, None);

        let btc = &binance.pairs[0];
        assert_eq!(btc.symbol, "BTCUSDT");
        assert_eq!(btc.strategies[0].capital, dec!(360));
        assert_eq!(btc.strategies[1].capital, dec!(240));

        let text = preview.to_string();
        assert!(text.contains("CONFIGURATION PREVIEW"));
        assert!(text.contains("BTCUSDT"));
        assert!(text.contains("Disabled"));
        assert!(text.contains("Available:   $1200.00"));
    }
}
