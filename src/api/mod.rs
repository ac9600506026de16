//! External collaborators of the wizard and their implementations.
//!
//! The wizard only talks to these traits. `BackendClient` implements all of
//! them over HTTP; `StaticCatalog` and `OfflineAdvisor` cover the read side
//! without a backend; the local `Database` is a submission sink.

mod backend_client;
mod catalog;
mod types;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::allocation::ExchangeId;
use crate::wizard::SubmissionPayload;

pub use backend_client::BackendClient;
pub use catalog::{OfflineAdvisor, StaticCatalog};
pub use types::*;

/// Exchanges configured for the bot and the symbols each one trades.
#[async_trait]
pub trait ExchangeCatalog: Send + Sync {
    async fn list_configured_exchanges(&self) -> Result<Vec<ExchangeId>>;

    async fn list_available_symbols(&self, exchange: &str) -> Result<Vec<String>>;
}

/// Quote-currency (USDT) balance available on an exchange.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn available_balance(&self, exchange: &str) -> Result<Decimal>;
}

/// Strategy types the backend offers for this deployment.
#[async_trait]
pub trait StrategyTypeSource: Send + Sync {
    async fn list_strategy_types(&self) -> Result<Vec<String>>;
}

/// AI allocation advisor.
#[async_trait]
pub trait RecommendationService: Send + Sync {
    async fn recommend(&self, query: &RecommendationQuery, api_key: &str) -> Result<Recommendation>;
}

/// Where a finished configuration goes.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// Produce a reviewable plan from the payload.
    async fn generate(&self, payload: &SubmissionPayload) -> Result<GeneratedPlan>;

    /// Commit a previously generated plan.
    async fn apply(&self, plan: &GeneratedPlan) -> Result<ApplyReceipt>;
}
