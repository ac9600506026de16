//! Allocation tree: exchange → symbol → capital and strategy split.
//!
//! The tree only offers structural accessors. Mutations never fail: calls that
//! name an exchange outside the session's fixed set, or a symbol that is not
//! present, are no-ops. Invariants are checked by the validator.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Opaque exchange identifier, e.g. "binance".
pub type ExchangeId = String;

/// Decimal places kept on capital amounts derived from weights.
pub const CAPITAL_DP: u32 = 8;

/// Largest capital accepted for one exchange or symbol. Larger inputs are
/// capped so sums over the tree stay far from `Decimal::MAX`.
pub const MAX_CAPITAL: Decimal = dec!(1000000000000000);

fn clamp_capital(amount: Decimal) -> Decimal {
    amount.clamp(Decimal::ZERO, MAX_CAPITAL)
}

/// Sum that saturates at `Decimal::MAX` instead of panicking.
fn saturating_sum(values: impl Iterator<Item = Decimal>) -> Decimal {
    values.fold(Decimal::ZERO, |acc, v| acc.saturating_add(v))
}

/// `total * weight`, truncated so shares of one total never add up past it.
pub fn capital_share(total: Decimal, weight: Decimal) -> Decimal {
    (total * weight).round_dp_with_strategy(CAPITAL_DP, RoundingStrategy::ToZero)
}

/// Composite `exchange:symbol` key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub exchange: ExchangeId,
    pub symbol: String,
}

impl PairKey {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
        }
    }

}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// Capital assigned to one symbol on one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolAllocation {
    pub symbol: String,
    /// Quote-currency amount, never negative
    pub capital: Decimal,
}

/// Share of a pair's capital given to one strategy type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySplit {
    pub strategy_type: String,
    /// Fraction in [0, 1]
    pub weight: Decimal,
}

/// Per-exchange node of the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeAllocation {
    total_capital: Decimal,
    available_balance: Option<Decimal>,
    symbols: BTreeMap<String, SymbolAllocation>,
    splits: BTreeMap<String, Vec<StrategySplit>>,
}

impl ExchangeAllocation {
    /// Capital the operator is willing to deploy on this exchange.
    pub fn total_capital(&self) -> Decimal {
        self.total_capital
    }

    /// Last balance reported by the exchange, if it was fetched.
    pub fn available_balance(&self) -> Option<Decimal> {
        self.available_balance
    }

    pub fn symbols(&self) -> impl Iterator<Item = &SymbolAllocation> {
        self.symbols.values()
    }

    #[cfg(test)]
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolAllocation> {
        self.symbols.get(symbol)
    }

    pub fn has_symbols(&self) -> bool {
        !self.symbols.is_empty()
    }

    pub fn strategy_split(&self, symbol: &str) -> &[StrategySplit] {
        self.splits.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sum of symbol capitals.
    pub fn allocated(&self) -> Decimal {
        saturating_sum(self.symbols.values().map(|s| s.capital))
    }

    /// Unallocated part of the total. Negative when over-allocated.
    pub fn remaining(&self) -> Decimal {
        self.total_capital - self.allocated()
    }

    /// Symbols with capital > 0.
    pub fn configured_symbols(&self) -> impl Iterator<Item = &SymbolAllocation> {
        self.symbols.values().filter(|s| s.capital > Decimal::ZERO)
    }
}

/// Cross-exchange view of one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedSymbol {
    pub symbol: String,
    pub capital: Decimal,
    /// `capital / grand_total`; zero when the grand total is zero
    pub weight: Decimal,
    pub exchanges: Vec<ExchangeId>,
}

/// Whole-portfolio view flattened across exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioAggregate {
    pub grand_total: Decimal,
    pub allocated: Decimal,
    pub symbols: BTreeMap<String, AggregatedSymbol>,
}

/// Aggregate root for one wizard session's allocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationTree {
    exchanges: BTreeMap<ExchangeId, ExchangeAllocation>,
}

impl AllocationTree {
    /// Empty tree over a fixed exchange set.
    pub fn new<I, S>(exchanges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ExchangeId>,
    {
        Self {
            exchanges: exchanges
                .into_iter()
                .map(|id| (id.into(), ExchangeAllocation::default()))
                .collect(),
        }
    }

    pub fn exchanges(&self) -> impl Iterator<Item = (&str, &ExchangeAllocation)> {
        self.exchanges.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub fn exchange(&self, exchange: &str) -> Option<&ExchangeAllocation> {
        self.exchanges.get(exchange)
    }

    pub fn contains_symbol(&self, exchange: &str, symbol: &str) -> bool {
        self.exchanges
            .get(exchange)
            .is_some_and(|node| node.symbols.contains_key(symbol.trim()))
    }

    // ==================== Mutations ====================

    pub fn set_total_capital(&mut self, exchange: &str, amount: Decimal) {
        if let Some(node) = self.exchanges.get_mut(exchange) {
            node.total_capital = clamp_capital(amount);
        }
    }

    pub fn set_available_balance(&mut self, exchange: &str, balance: Decimal) {
        if let Some(node) = self.exchanges.get_mut(exchange) {
            node.available_balance = Some(balance);
        }
    }

    /// Add a symbol, overwriting any existing allocation for it.
    pub fn add_exchange_symbol(&mut self, exchange: &str, symbol: &str, capital: Decimal) {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return;
        }
        if let Some(node) = self.exchanges.get_mut(exchange) {
            node.symbols.insert(
                symbol.to_string(),
                SymbolAllocation {
                    symbol: symbol.to_string(),
                    capital: clamp_capital(capital),
                },
            );
        }
    }

    pub fn set_symbol_capital(&mut self, exchange: &str, symbol: &str, capital: Decimal) {
        if let Some(alloc) = self
            .exchanges
            .get_mut(exchange)
            .and_then(|node| node.symbols.get_mut(symbol.trim()))
        {
            alloc.capital = clamp_capital(capital);
        }
    }

    /// Remove a symbol together with its strategy split.
    pub fn remove_symbol(&mut self, exchange: &str, symbol: &str) {
        let symbol = symbol.trim();
        if let Some(node) = self.exchanges.get_mut(exchange) {
            node.symbols.remove(symbol);
            node.splits.remove(symbol);
        }
    }

    /// Upsert one strategy weight for a pair.
    pub fn set_strategy_weight(&mut self, exchange: &str, symbol: &str, strategy_type: &str, weight: Decimal) {
        let (symbol, strategy_type) = (symbol.trim(), strategy_type.trim());
        let Some(node) = self.exchanges.get_mut(exchange) else {
            return;
        };
        if !node.symbols.contains_key(symbol) || strategy_type.is_empty() {
            return;
        }

        let weight = weight.clamp(Decimal::ZERO, Decimal::ONE);
        let split = node.splits.entry(symbol.to_string()).or_default();
        match split.iter_mut().find(|s| s.strategy_type == strategy_type) {
            Some(entry) => entry.weight = weight,
            None => split.push(StrategySplit {
                strategy_type: strategy_type.to_string(),
                weight,
            }),
        }
    }

    /// Swap a pair's whole split for the given weights.
    pub fn replace_strategy_split(&mut self, exchange: &str, symbol: &str, weights: &BTreeMap<String, Decimal>) {
        let symbol = symbol.trim();
        let Some(node) = self.exchanges.get_mut(exchange) else {
            return;
        };
        if !node.symbols.contains_key(symbol) {
            return;
        }
        let split = weights
            .iter()
            .map(|(ty, w)| (ty.trim(), w))
            .filter(|(ty, _)| !ty.is_empty())
            .map(|(ty, w)| StrategySplit {
                strategy_type: ty.to_string(),
                weight: (*w).clamp(Decimal::ZERO, Decimal::ONE),
            })
            .collect();
        node.splits.insert(symbol.to_string(), split);
    }

    // ==================== Queries ====================

    pub fn strategy_split(&self, exchange: &str, symbol: &str) -> &[StrategySplit] {
        self.exchanges
            .get(exchange)
            .map(|node| node.strategy_split(symbol.trim()))
            .unwrap_or(&[])
    }

    /// Current split of a pair as a map.
    pub fn strategy_weights(&self, exchange: &str, symbol: &str) -> BTreeMap<String, Decimal> {
        self.strategy_split(exchange, symbol)
            .iter()
            .map(|s| (s.strategy_type.clone(), s.weight))
            .collect()
    }

    pub fn weight_sum(&self, exchange: &str, symbol: &str) -> Decimal {
        self.strategy_split(exchange, symbol).iter().map(|s| s.weight).sum()
    }

    pub fn total_allocated_for_exchange(&self, exchange: &str) -> Decimal {
        self.exchanges
            .get(exchange)
            .map(ExchangeAllocation::allocated)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn remaining_for_exchange(&self, exchange: &str) -> Decimal {
        self.exchanges
            .get(exchange)
            .map(ExchangeAllocation::remaining)
            .unwrap_or(Decimal::ZERO)
    }

    /// Symbols with capital > 0. Strategy completeness is a separate question.
    pub fn configured_symbols_for_exchange(&self, exchange: &str) -> Vec<&SymbolAllocation> {
        self.exchanges
            .get(exchange)
            .map(|node| node.configured_symbols().collect())
            .unwrap_or_default()
    }

    /// Every pair with capital > 0, in exchange then symbol order.
    pub fn allocated_pairs(&self) -> Vec<(PairKey, Decimal)> {
        self.exchanges
            .iter()
            .flat_map(|(id, node)| {
                node.configured_symbols()
                    .map(move |s| (PairKey::new(id.clone(), s.symbol.clone()), s.capital))
            })
            .collect()
    }

    /// Sum of every exchange's total capital.
    pub fn grand_total_capital(&self) -> Decimal {
        saturating_sum(self.exchanges.values().map(|node| node.total_capital))
    }

    /// Flatten per-exchange allocations into one cross-exchange view.
    ///
    /// The same symbol on several exchanges is summed; its weight is the summed
    /// capital over the grand total capital.
    pub fn aggregate_across_all_exchanges(&self) -> PortfolioAggregate {
        let grand_total = self.grand_total_capital();
        let mut symbols: BTreeMap<String, AggregatedSymbol> = BTreeMap::new();

        for (id, node) in &self.exchanges {
            for alloc in node.symbols.values() {
                let entry = symbols
                    .entry(alloc.symbol.clone())
                    .or_insert_with(|| AggregatedSymbol {
                        symbol: alloc.symbol.clone(),
                        capital: Decimal::ZERO,
                        weight: Decimal::ZERO,
                        exchanges: Vec::new(),
                    });
                entry.capital = entry.capital.saturating_add(alloc.capital);
                entry.exchanges.push(id.clone());
            }
        }

        let mut allocated = Decimal::ZERO;
        for entry in symbols.values_mut() {
            allocated = allocated.saturating_add(entry.capital);
            if grand_total > Decimal::ZERO {
                entry.weight = entry.capital / grand_total;
            }
        }

        PortfolioAggregate {
            grand_total,
            allocated,
            symbols,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tree() -> AllocationTree {
        let mut tree = AllocationTree::new(["binance", "okx"]);
        tree.set_total_capital("binance", dec!(1000));
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(600));
        tree.add_exchange_symbol("binance", "ETHUSDT", dec!(400));
        tree
    }

    #[test]
    fn test_re_adding_symbol_overwrites() {
        let mut tree = tree();
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(250));
        let node = tree.exchange("binance").unwrap();
        assert_eq!(node.symbols().count(), 2);
        assert_eq!(node.symbol("BTCUSDT").unwrap().capital, dec!(250));
    }

    #[test]
    fn test_unknown_exchange_is_noop() {
        let mut tree = tree();
        tree.add_exchange_symbol("kraken", "BTCUSD", dec!(10));
        tree.set_total_capital("kraken", dec!(10));
        assert!(tree.exchange("kraken").is_none());
        assert_eq!(tree.total_allocated_for_exchange("kraken"), Decimal::ZERO);
    }

    #[test]
    fn test_remove_symbol_drops_split() {
        let mut tree = tree();
        tree.set_strategy_weight("binance", "BTCUSDT", "grid", dec!(1));
        tree.remove_symbol("binance", "BTCUSDT");
        assert!(!tree.contains_symbol("binance", "BTCUSDT"));
        assert!(tree.strategy_split("binance", "BTCUSDT").is_empty());

        // Removing again is harmless
        tree.remove_symbol("binance", "BTCUSDT");
        assert_eq!(tree.total_allocated_for_exchange("binance"), dec!(400));
    }

    #[test]
    fn test_set_strategy_weight_upserts() {
        let mut tree = tree();
        tree.set_strategy_weight("binance", "BTCUSDT", "grid", dec!(0.5));
        tree.set_strategy_weight("binance", "BTCUSDT", "dca", dec!(0.5));
        tree.set_strategy_weight("binance", "BTCUSDT", "grid", dec!(0.6));

        let split = tree.strategy_split("binance", "BTCUSDT");
        assert_eq!(split.len(), 2);
        assert_eq!(tree.weight_sum("binance", "BTCUSDT"), dec!(1.1));
    }

    #[test]
    fn test_strategy_weight_needs_existing_symbol() {
        let mut tree = tree();
        tree.set_strategy_weight("binance", "SOLUSDT", "grid", dec!(1));
        assert!(tree.strategy_split("binance", "SOLUSDT").is_empty());
        assert!(!tree.contains_symbol("binance", "SOLUSDT"));
    }

    #[test]
    fn test_values_are_clamped() {
        let mut tree = tree();
        tree.set_symbol_capital("binance", "ETHUSDT", dec!(-50));
        tree.set_strategy_weight("binance", "ETHUSDT", "grid", dec!(1.7));
        assert_eq!(tree.exchange("binance").unwrap().symbol("ETHUSDT").unwrap().capital, Decimal::ZERO);
        assert_eq!(tree.weight_sum("binance", "ETHUSDT"), Decimal::ONE);
    }

    #[test]
    fn test_configured_symbols_only_counts_capital() {
        let mut tree = tree();
        tree.add_exchange_symbol("binance", "SOLUSDT", Decimal::ZERO);
        let configured = tree.configured_symbols_for_exchange("binance");
        assert_eq!(configured.len(), 2);
        assert_eq!(tree.remaining_for_exchange("binance"), Decimal::ZERO);
    }

    #[test]
    fn test_aggregate_sums_shared_symbols() {
        let mut tree = AllocationTree::new(["binance", "okx"]);
        tree.set_total_capital("binance", dec!(500));
        tree.set_total_capital("okx", dec!(500));
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(300));
        tree.add_exchange_symbol("okx", "BTCUSDT", dec!(200));
        tree.add_exchange_symbol("okx", "ETHUSDT", dec!(100));

        let view = tree.aggregate_across_all_exchanges();
        assert_eq!(view.grand_total, dec!(1000));
        assert_eq!(view.allocated, dec!(600));

        let btc = &view.symbols["BTCUSDT"];
        assert_eq!(btc.capital, dec!(500));
        assert_eq!(btc.weight, dec!(0.5));
        assert_eq!(btc.exchanges, vec!["binance".to_string(), "okx".to_string()]);
        assert_eq!(view.symbols["ETHUSDT"].weight, dec!(0.1));
    }

    #[test]
    fn test_aggregate_with_zero_total() {
        let mut tree = AllocationTree::new(["binance"]);
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(10));
        let view = tree.aggregate_across_all_exchanges();
        assert_eq!(view.symbols["BTCUSDT"].weight, Decimal::ZERO);
    }

    #[test]
    fn test_capital_shares_stay_within_total() {
        let third = Decimal::ONE / dec!(3);
        let two_thirds = dec!(2) / dec!(3);
        let total = dec!(1000);
        let shares = capital_share(total, third) + capital_share(total, two_thirds);
        assert!(shares <= total);
        assert_eq!(capital_share(total, third), dec!(333.33333333));
        assert_eq!(capital_share(total, dec!(0.7)), dec!(700));
    }

    #[test]
    fn test_pair_key_format() {
        assert_eq!(PairKey::new("binance", "BTCUSDT").to_string(), "binance:BTCUSDT");
    }

    #[test]
    fn test_symbol_names_are_trimmed_everywhere() {
        let mut tree = tree();
        tree.add_exchange_symbol("binance", " SOLUSDT ", dec!(0));
        assert!(tree.contains_symbol("binance", "SOLUSDT"));
        assert!(tree.contains_symbol("binance", " SOLUSDT"));

        tree.set_symbol_capital("binance", "SOLUSDT ", dec!(5));
        tree.set_strategy_weight("binance", " SOLUSDT", " grid ", dec!(1));
        assert_eq!(tree.exchange("binance").unwrap().symbol("SOLUSDT").unwrap().capital, dec!(5));
        assert_eq!(tree.strategy_split("binance", "SOLUSDT")[0].strategy_type, "grid");

        tree.remove_symbol("binance", " SOLUSDT ");
        assert!(!tree.contains_symbol("binance", "SOLUSDT"));
        assert!(tree.strategy_split("binance", "SOLUSDT").is_empty());
    }

    #[test]
    fn test_huge_capitals_are_capped() {
        let mut tree = AllocationTree::new(["binance", "okx"]);
        tree.set_total_capital("binance", Decimal::MAX);
        tree.set_total_capital("okx", Decimal::MAX);
        tree.add_exchange_symbol("binance", "A", Decimal::MAX);
        tree.add_exchange_symbol("binance", "B", Decimal::MAX);
        tree.add_exchange_symbol("okx", "A", Decimal::MAX);

        let node = tree.exchange("binance").unwrap();
        assert_eq!(node.total_capital(), MAX_CAPITAL);
        assert_eq!(node.allocated(), MAX_CAPITAL * dec!(2));
        assert_eq!(tree.grand_total_capital(), MAX_CAPITAL * dec!(2));

        let view = tree.aggregate_across_all_exchanges();
        assert_eq!(view.symbols["A"].capital, MAX_CAPITAL * dec!(2));
        assert_eq!(view.symbols["A"].weight, Decimal::ONE);
    }
}
