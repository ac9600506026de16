//! Wizard steps and the pure transition functions between them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::allocation::{
    validate_asset_allocation, validate_strategy_split, AllocationTree, ValidationFailure,
};

/// Wizard steps in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WizardStep {
    AiSetup,
    AssetAlloc,
    StrategySplit,
    ParamTuning,
    WithdrawalSetup,
    Preview,
    Success,
}

impl WizardStep {
    pub const ALL: [WizardStep; 7] = [
        Self::AiSetup,
        Self::AssetAlloc,
        Self::StrategySplit,
        Self::ParamTuning,
        Self::WithdrawalSetup,
        Self::Preview,
        Self::Success,
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::AiSetup => "AI setup",
            Self::AssetAlloc => "Asset allocation",
            Self::StrategySplit => "Strategy split",
            Self::ParamTuning => "Parameter tuning",
            Self::WithdrawalSetup => "Withdrawal setup",
            Self::Preview => "Preview",
            Self::Success => "Success",
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.index() + 1, Self::ALL.len(), self.title())
    }
}

/// Why a transition was refused. The state is left as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{0}")]
    Validation(#[from] ValidationFailure),

    #[error("an AI credential is required to continue (or skip AI setup)")]
    MissingCredential,

    #[error("the preview is produced by generating the configuration")]
    RequiresGenerate,

    #[error("the configuration must be applied to finish")]
    RequiresApply,

    #[error("the wizard is already complete")]
    Finished,

    #[error("expected to be at {expected:?}, currently at {actual:?}")]
    WrongStep {
        expected: WizardStep,
        actual: WizardStep,
    },
}

/// Inputs the forward transition checks against.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub tree: &'a AllocationTree,
    pub ai_credential: Option<&'a str>,
}

/// Immutable wizard position. Transitions return a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WizardState {
    step: WizardStep,
    ai_enabled: bool,
}

impl Default for WizardState {
    fn default() -> Self {
        Self::initial()
    }
}

impl WizardState {
    pub fn initial() -> Self {
        Self {
            step: WizardStep::AiSetup,
            ai_enabled: true,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    /// False once AI setup was skipped.
    pub fn ai_enabled(&self) -> bool {
        self.ai_enabled
    }

    /// Move forward, checking whatever the step being left requires.
    ///
    /// `WithdrawalSetup` and `Preview` never advance here: they move only once
    /// the external generate or apply call has succeeded.
    pub fn advance(&self, ctx: &StepContext<'_>) -> Result<Self, TransitionError> {
        match self.step {
            WizardStep::AiSetup => {
                let has_key = ctx.ai_credential.is_some_and(|k| !k.trim().is_empty());
                if !has_key {
                    return Err(TransitionError::MissingCredential);
                }
                Ok(self.moved_to(WizardStep::AssetAlloc).with_ai(true))
            }
            WizardStep::AssetAlloc => {
                validate_asset_allocation(ctx.tree)?;
                Ok(self.moved_to(WizardStep::StrategySplit))
            }
            WizardStep::StrategySplit => {
                validate_strategy_split(ctx.tree)?;
                Ok(self.moved_to(WizardStep::ParamTuning))
            }
            WizardStep::ParamTuning => Ok(self.moved_to(WizardStep::WithdrawalSetup)),
            WizardStep::WithdrawalSetup => Err(TransitionError::RequiresGenerate),
            WizardStep::Preview => Err(TransitionError::RequiresApply),
            WizardStep::Success => Err(TransitionError::Finished),
        }
    }

    /// Step back. Always allowed, never validates; stays put on the first step.
    pub fn back(&self) -> Self {
        match self.step.previous() {
            Some(prev) => self.moved_to(prev),
            None => *self,
        }
    }

    /// Proceed past AI setup without a credential. Recommendations then fall
    /// back to uniform weights for the rest of the session.
    pub fn skip_ai_setup(&self) -> Result<Self, TransitionError> {
        self.expect_step(WizardStep::AiSetup)?;
        Ok(self.moved_to(WizardStep::AssetAlloc).with_ai(false))
    }

    /// Record a successful generate call.
    pub fn generated(&self) -> Result<Self, TransitionError> {
        self.expect_step(WizardStep::WithdrawalSetup)?;
        Ok(self.moved_to(WizardStep::Preview))
    }

    /// Record a successful apply call.
    pub fn applied(&self) -> Result<Self, TransitionError> {
        self.expect_step(WizardStep::Preview)?;
        Ok(self.moved_to(WizardStep::Success))
    }

    fn expect_step(&self, expected: WizardStep) -> Result<(), TransitionError> {
        if self.step != expected {
            return Err(TransitionError::WrongStep {
                expected,
                actual: self.step,
            });
        }
        Ok(())
    }

    fn moved_to(&self, step: WizardStep) -> Self {
        Self { step, ..*self }
    }

    fn with_ai(self, ai_enabled: bool) -> Self {
        Self { ai_enabled, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn allocated_tree() -> AllocationTree {
        let mut tree = AllocationTree::new(["binance"]);
        tree.set_total_capital("binance", dec!(1000));
        tree.add_exchange_symbol("binance", "BTCUSDT", dec!(600));
        tree.add_exchange_symbol("binance", "ETHUSDT", dec!(400));
        tree
    }

    fn at(step: WizardStep) -> WizardState {
        WizardState {
            step,
            ai_enabled: true,
        }
    }

    #[test]
    fn test_step_order() {
        assert_eq!(WizardStep::AiSetup.index(), 0);
        assert_eq!(WizardStep::Success.index(), 6);
        assert_eq!(WizardStep::AiSetup.previous(), None);
        assert_eq!(WizardStep::Preview.previous(), Some(WizardStep::WithdrawalSetup));
        assert_eq!(WizardStep::StrategySplit.to_string(), "3/7 Strategy split");
    }

    #[test]
    fn test_ai_setup_needs_credential() {
        let tree = AllocationTree::default();
        let state = WizardState::initial();

        for key in [None, Some(""), Some("   ")] {
            let ctx = StepContext { tree: &tree, ai_credential: key };
            assert_eq!(state.advance(&ctx), Err(TransitionError::MissingCredential));
        }

        let ctx = StepContext { tree: &tree, ai_credential: Some("sk-test") };
        let next = state.advance(&ctx).unwrap();
        assert_eq!(next.step(), WizardStep::AssetAlloc);
        assert!(next.ai_enabled());
    }

    #[test]
    fn test_skip_ai_setup_disables_ai() {
        let next = WizardState::initial().skip_ai_setup().unwrap();
        assert_eq!(next.step(), WizardStep::AssetAlloc);
        assert!(!next.ai_enabled());
        assert!(next.skip_ai_setup().is_err());
    }

    #[test]
    fn test_asset_alloc_gate() {
        let empty = AllocationTree::new(["binance"]);
        let ctx = StepContext { tree: &empty, ai_credential: None };
        let state = at(WizardStep::AssetAlloc);
        assert_eq!(
            state.advance(&ctx),
            Err(TransitionError::Validation(ValidationFailure::NoAllocation))
        );

        let tree = allocated_tree();
        let ctx = StepContext { tree: &tree, ai_credential: None };
        assert_eq!(state.advance(&ctx).unwrap().step(), WizardStep::StrategySplit);
    }

    #[test]
    fn test_strategy_split_gate() {
        let mut tree = allocated_tree();
        let state = at(WizardStep::StrategySplit);
        {
            let ctx = StepContext { tree: &tree, ai_credential: None };
            let err = state.advance(&ctx).unwrap_err();
            assert!(err.to_string().starts_with("weights must sum to 100%"));
        }

        tree.set_strategy_weight("binance", "BTCUSDT", "grid", dec!(0.6));
        tree.set_strategy_weight("binance", "BTCUSDT", "dca", dec!(0.4));
        tree.set_strategy_weight("binance", "ETHUSDT", "grid", dec!(1.0));
        let ctx = StepContext { tree: &tree, ai_credential: None };
        assert_eq!(state.advance(&ctx).unwrap().step(), WizardStep::ParamTuning);
    }

    #[test]
    fn test_param_tuning_is_unchecked() {
        let tree = AllocationTree::default();
        let ctx = StepContext { tree: &tree, ai_credential: None };
        assert_eq!(
            at(WizardStep::ParamTuning).advance(&ctx).unwrap().step(),
            WizardStep::WithdrawalSetup
        );
    }

    #[test]
    fn test_preview_and_success_need_external_calls() {
        let tree = allocated_tree();
        let ctx = StepContext { tree: &tree, ai_credential: Some("key") };
        assert_eq!(at(WizardStep::WithdrawalSetup).advance(&ctx), Err(TransitionError::RequiresGenerate));
        assert_eq!(at(WizardStep::Preview).advance(&ctx), Err(TransitionError::RequiresApply));
        assert_eq!(at(WizardStep::Success).advance(&ctx), Err(TransitionError::Finished));

        let preview = at(WizardStep::WithdrawalSetup).generated().unwrap();
        assert_eq!(preview.step(), WizardStep::Preview);
        assert_eq!(preview.applied().unwrap().step(), WizardStep::Success);
        assert!(at(WizardStep::ParamTuning).generated().is_err());
        assert!(at(WizardStep::WithdrawalSetup).applied().is_err());
    }

    #[test]
    fn test_back_never_validates() {
        let mut state = at(WizardStep::Success);
        for expected in [
            WizardStep::Preview,
            WizardStep::WithdrawalSetup,
            WizardStep::ParamTuning,
            WizardStep::StrategySplit,
            WizardStep::AssetAlloc,
            WizardStep::AiSetup,
            WizardStep::AiSetup,
        ] {
            state = state.back();
            assert_eq!(state.step(), expected);
        }
    }
}
