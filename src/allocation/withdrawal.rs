//! Profit withdrawal policy submitted alongside the allocation.

use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How withdrawals are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalMode {
    /// Withdraw a share of every realized profit
    ProfitRatio,
    /// Withdraw once profit crosses a fixed amount
    Threshold,
    /// Withdraw on a fixed schedule
    Scheduled,
}

impl fmt::Display for WithdrawalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ProfitRatio => "profit_ratio",
            Self::Threshold => "threshold",
            Self::Scheduled => "scheduled",
        };
        f.write_str(name)
    }
}

/// Profit-taking rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WithdrawalPolicy {
    pub enabled: bool,

    /// Selected trigger modes
    pub modes: BTreeSet<WithdrawalMode>,

    /// Share of realized profit to withdraw, in (0, 1]
    pub profit_ratio: Decimal,

    /// Profit in quote currency required before withdrawing
    pub min_profit_threshold: Decimal,

    /// Hours between scheduled withdrawals
    pub interval_hours: u32,

    /// Share of profit always left on the exchange, in [0, 1)
    pub keep_reserve_ratio: Decimal,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            modes: BTreeSet::new(),
            profit_ratio: dec!(0.5),      // Half of realized profit
            min_profit_threshold: dec!(0),
            interval_hours: 24,           // Daily
            keep_reserve_ratio: dec!(0.1),
        }
    }
}

/// Why a withdrawal policy was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WithdrawalError {
    #[error("select at least one withdrawal mode")]
    NoModeSelected,

    #[error("profit ratio must be within (0, 1], got {0}")]
    ProfitRatioOutOfRange(Decimal),

    #[error("reserve ratio must be within [0, 1), got {0}")]
    ReserveRatioOutOfRange(Decimal),

    #[error("profit ratio {profit_ratio} plus reserve ratio {reserve_ratio} exceeds 100%")]
    RatiosExceedWhole {
        profit_ratio: Decimal,
        reserve_ratio: Decimal,
    },

    #[error("threshold mode needs a profit threshold above zero, got {0}")]
    ThresholdNotPositive(Decimal),

    #[error("scheduled mode needs an interval of at least one hour")]
    IntervalTooShort,
}

impl WithdrawalPolicy {
    /// Check the policy in isolation. A disabled policy is always valid.
    pub fn validate(&self) -> Result<(), WithdrawalError> {
        if !self.enabled {
            return Ok(());
        }

        if self.modes.is_empty() {
            return Err(WithdrawalError::NoModeSelected);
        }

        if self.profit_ratio <= Decimal::ZERO || self.profit_ratio > Decimal::ONE {
            return Err(WithdrawalError::ProfitRatioOutOfRange(self.profit_ratio));
        }

        if self.keep_reserve_ratio < Decimal::ZERO || self.keep_reserve_ratio >= Decimal::ONE {
            return Err(WithdrawalError::ReserveRatioOutOfRange(self.keep_reserve_ratio));
        }

        if self.profit_ratio + self.keep_reserve_ratio > Decimal::ONE {
            return Err(WithdrawalError::RatiosExceedWhole {
                profit_ratio: self.profit_ratio,
                reserve_ratio: self.keep_reserve_ratio,
            });
        }

        if self.modes.contains(&WithdrawalMode::Threshold) && self.min_profit_threshold <= Decimal::ZERO {
            return Err(WithdrawalError::ThresholdNotPositive(self.min_profit_threshold));
        }

        if self.modes.contains(&WithdrawalMode::Scheduled) && self.interval_hours < 1 {
            return Err(WithdrawalError::IntervalTooShort);
        }

        Ok(())
    }
}
