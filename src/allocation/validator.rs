//! Allocation invariants checked before the wizard may move forward.
//!
//! Checks run in a fixed order and the first failure wins:
//! 1. exchanges holding allocated symbols have a total capital set
//! 2. no exchange allocates more than its total
//! 3. an exchange with symbols allocates to at least one of them
//! 4. something is allocated somewhere
//! 5. every allocated pair's strategy weights sum to 100%
//!
//! Checks 1-4 gate the asset-allocation step, check 5 gates the strategy step.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use thiserror::Error;

use super::tree::{AllocationTree, ExchangeId};

/// Absolute tolerance on a strategy split's weight sum.
///
/// The bound is inclusive: `|sum - 1| <= 0.001` passes, so 0.999 and 1.001 are
/// complete splits while 0.998 and 1.002 are not. Sums are exact decimals, so
/// the boundary values compare exactly.
pub const WEIGHT_SUM_EPSILON: Decimal = dec!(0.001);

/// Why an allocation tree was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("capital total not set for {exchange}")]
    CapitalTotalNotSet { exchange: ExchangeId },

    #[error("allocation exceeds total on {exchange}: allocated {allocated} of {total_capital} (over by {overage})")]
    AllocationExceedsTotal {
        exchange: ExchangeId,
        allocated: Decimal,
        total_capital: Decimal,
        overage: Decimal,
    },

    #[error("all-zero allocation on {exchange}")]
    AllZeroAllocation { exchange: ExchangeId },

    #[error("no allocation anywhere")]
    NoAllocation,

    #[error("weights must sum to 100% for {exchange}:{symbol} (currently {percent}%)")]
    WeightsMustSumTo100 {
        exchange: ExchangeId,
        symbol: String,
        /// Actual sum as a whole percentage
        percent: Decimal,
    },
}

/// Checks 1-4, run when leaving the asset-allocation step.
pub fn validate_asset_allocation(tree: &AllocationTree) -> Result<(), ValidationFailure> {
    // 1. total capital set wherever something is allocated
    for (id, node) in tree.exchanges() {
        if node.configured_symbols().next().is_some() && node.total_capital() <= Decimal::ZERO {
            return Err(ValidationFailure::CapitalTotalNotSet {
                exchange: id.to_string(),
            });
        }
    }

    // 2. allocation within total
    for (id, node) in tree.exchanges() {
        let allocated = node.allocated();
        if allocated > node.total_capital() {
            return Err(ValidationFailure::AllocationExceedsTotal {
                exchange: id.to_string(),
                allocated,
                total_capital: node.total_capital(),
                overage: allocated - node.total_capital(),
            });
        }
    }

    // 3. exchanges with symbols allocate to at least one
    for (id, node) in tree.exchanges() {
        if node.has_symbols() && node.configured_symbols().next().is_none() {
            return Err(ValidationFailure::AllZeroAllocation {
                exchange: id.to_string(),
            });
        }
    }

    // 4. something allocated somewhere
    if tree.allocated_pairs().is_empty() {
        return Err(ValidationFailure::NoAllocation);
    }

    Ok(())
}

/// Check 5, run when leaving the strategy-split step.
pub fn validate_strategy_split(tree: &AllocationTree) -> Result<(), ValidationFailure> {
    match strategy_split_failures(tree).into_iter().next() {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

/// Every allocated pair whose weights do not sum to 100%.
pub fn strategy_split_failures(tree: &AllocationTree) -> Vec<ValidationFailure> {
    tree.allocated_pairs()
        .into_iter()
        .filter_map(|(pair, _)| {
            let sum = tree.weight_sum(&pair.exchange, &pair.symbol);
            if is_complete_split(sum) {
                None
            } else {
                Some(ValidationFailure::WeightsMustSumTo100 {
                    exchange: pair.exchange,
                    symbol: pair.symbol,
                    percent: (sum * dec!(100))
                        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
                })
            }
        })
        .collect()
}

/// All five checks, in order.
pub fn validate(tree: &AllocationTree) -> Result<(), ValidationFailure> {
    validate_asset_allocation(tree)?;
    validate_strategy_split(tree)
}

/// Whether a weight sum counts as 100%.
fn is_complete_split(sum: Decimal) -> bool {
    (sum - Decimal::ONE).abs() <= WEIGHT_SUM_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_a() -> AllocationTree {
        let mut tree = AllocationTree::new(["binance"]);
        tree.set_total_capital("binance", dec!(1000));
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(600));
        tree.add_exchange_symbol("binance", "ETHUSDT", dec!(400));
        tree
    }

    fn single_pair_with_sum(sum: Decimal) -> AllocationTree {
        let mut tree = AllocationTree::new(["binance"]);
        tree.set_total_capital("binance", dec!(1000));
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(1000));
        tree.set_strategy_weight("binance", "BTCUSDT", "grid", dec!(0.5));
        tree.set_strategy_weight("binance", "BTCUSDT", "dca", sum - dec!(0.5));
        tree
    }

    #[test]
    fn test_empty_tree_has_no_allocation() {
        let tree = AllocationTree::new(["binance", "okx"]);
        assert_eq!(validate_asset_allocation(&tree), Err(ValidationFailure::NoAllocation));
    }

    #[test]
    fn test_capital_total_not_set() {
        let mut tree = AllocationTree::new(["binance"]);
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(100));
        assert_eq!(
            validate_asset_allocation(&tree),
            Err(ValidationFailure::CapitalTotalNotSet { exchange: "binance".to_string() })
        );
    }

    #[test]
    fn test_allocation_exceeds_total_reports_overage() {
        let mut tree = scenario_a();
        tree.set_symbol_capital("binance", "ETHUSDT", dec!(401));
        match validate_asset_allocation(&tree) {
            Err(ValidationFailure::AllocationExceedsTotal { exchange, overage, allocated, .. }) => {
                assert_eq!(exchange, "binance");
                assert_eq!(allocated, dec!(1001));
                assert_eq!(overage, dec!(1));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_all_zero_allocation_on_one_exchange() {
        let mut tree = scenario_a();
        tree.add_exchange_symbol("binance", "SOLUSDT", Decimal::ZERO);
        assert!(validate_asset_allocation(&tree).is_ok());

        let mut tree = AllocationTree::new(["binance", "okx"]);
        tree.set_total_capital("binance", dec!(100));
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(100));
        tree.add_exchange_symbol("okx", "ETHUSDT", Decimal::ZERO);
        assert_eq!(
            validate_asset_allocation(&tree),
            Err(ValidationFailure::AllZeroAllocation { exchange: "okx".to_string() })
        );
    }

    #[test]
    fn test_check_order_first_failure_wins() {
        // okx over-allocates (check 2) while binance has no total (check 1)
        let mut tree = AllocationTree::new(["binance", "okx"]);
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(10));
        tree.set_total_capital("okx", dec!(5));
        tree.add_exchange_symbol("okx", "BTCUSDT", dec!(10));
        assert!(matches!(
            validate_asset_allocation(&tree),
            Err(ValidationFailure::CapitalTotalNotSet { .. })
        ));
    }

    #[test]
    fn test_huge_allocation_is_a_failure_not_a_panic() {
        let mut tree = AllocationTree::new(["binance"]);
        tree.set_total_capital("binance", Decimal::MAX);
        tree.add_exchange_symbol("binance", "A", Decimal::MAX);
        tree.add_exchange_symbol("binance", "B", Decimal::MAX);
        assert!(matches!(
            validate_asset_allocation(&tree),
            Err(ValidationFailure::AllocationExceedsTotal { .. })
        ));
    }

    #[test]
    fn test_weight_sum_boundaries() {
        for sum in [dec!(1), dec!(0.999), dec!(1.001), dec!(0.9995)] {
            assert!(validate_strategy_split(&single_pair_with_sum(sum)).is_ok(), "{} should pass", sum);
        }
        for sum in [dec!(0.99), dec!(1.01), dec!(0.998), dec!(1.002)] {
            assert!(validate_strategy_split(&single_pair_with_sum(sum)).is_err(), "{} should fail", sum);
        }
    }

    #[test]
    fn test_epsilon_is_absolute() {
        assert!(is_complete_split(dec!(0.999)));
        assert!(is_complete_split(dec!(1.001)));
        assert!(!is_complete_split(dec!(0.9989)));
        assert!(!is_complete_split(dec!(1.0011)));
    }

    #[test]
    fn test_weight_failure_names_pair_and_percent() {
        let tree = single_pair_with_sum(dec!(0.876));
        let failure = validate_strategy_split(&tree).unwrap_err();
        assert_eq!(
            failure,
            ValidationFailure::WeightsMustSumTo100 {
                exchange: "binance".to_string(),
                symbol: "BTCUSDT".to_string(),
                percent: dec!(88),
            }
        );
        assert!(failure.to_string().contains("88%"));
    }

    #[test]
    fn test_percent_rounds_half_away_from_zero() {
        let failure = validate_strategy_split(&single_pair_with_sum(dec!(0.885))).unwrap_err();
        assert!(failure.to_string().ends_with("(currently 89%)"), "{}", failure);

        let failure = validate_strategy_split(&single_pair_with_sum(dec!(1.125))).unwrap_err();
        assert!(failure.to_string().contains("currently 113%"), "{}", failure);
    }

    #[test]
    fn test_unallocated_pairs_skip_weight_check() {
        let mut tree = scenario_a();
        tree.add_exchange_symbol("binance", "SOLUSDT", Decimal::ZERO);
        tree.set_strategy_weight("binance", "BTCUSDT", "grid", dec!(1));
        tree.set_strategy_weight("binance", "ETHUSDT", "grid", dec!(1));
        assert!(validate(&tree).is_ok());
    }

    #[test]
    fn test_scenario_a_lists_both_symbols() {
        let tree = scenario_a();
        assert!(validate_asset_allocation(&tree).is_ok());

        let symbols: Vec<String> = strategy_split_failures(&tree)
            .into_iter()
            .filter_map(|f| match f {
                ValidationFailure::WeightsMustSumTo100 { symbol, percent, .. } => {
                    assert_eq!(percent, Decimal::ZERO);
                    Some(symbol)
                }
                _ => None,
            })
            .collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_scenario_b_passes() {
        let mut tree = scenario_a();
        tree.set_strategy_weight("binance", "BTCUSDT", "grid", dec!(0.6));
        tree.set_strategy_weight("binance", "BTCUSDT", "dca", dec!(0.4));
        tree.set_strategy_weight("binance", "ETHUSDT", "grid", dec!(1.0));
        assert!(validate(&tree).is_ok());
    }
}
