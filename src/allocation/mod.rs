//! Allocation engine: weight templates, normalization, the allocation tree and its validator.

mod normalizer;
mod template;
mod tree;
mod validator;
mod withdrawal;

pub use normalizer::{checked_weight_sum, normalize, uniform};
pub use template::{canonical_type, RiskProfile, WeightTemplate, KNOWN_STRATEGY_TYPES};
pub use tree::{
    capital_share, AllocationTree, ExchangeId, PairKey, PortfolioAggregate, StrategySplit, MAX_CAPITAL,
};
pub use validator::{
    strategy_split_failures, validate, validate_asset_allocation, validate_strategy_split, ValidationFailure,
    WEIGHT_SUM_EPSILON,
};
pub use withdrawal::{WithdrawalError, WithdrawalPolicy};
