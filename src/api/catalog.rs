//! In-memory collaborators for running the wizard without a backend.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::allocation::ExchangeId;

use super::types::{Recommendation, RecommendationQuery};
use super::{BalanceSource, ExchangeCatalog, RecommendationService, StrategyTypeSource};

/// Fixed exchanges, symbols, balances and strategy types.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    symbols: BTreeMap<ExchangeId, Vec<String>>,
    balances: BTreeMap<ExchangeId, Decimal>,
    strategy_types: Vec<String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_exchange(mut self, exchange: &str, symbols: &[&str]) -> Self {
        self.symbols.insert(
            exchange.to_string(),
            symbols.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    #[cfg(test)]
    pub fn with_balance(mut self, exchange: &str, balance: Decimal) -> Self {
        self.balances.insert(exchange.to_string(), balance);
        self
    }

    #[cfg(test)]
    pub fn with_strategy_types(mut self, types: &[&str]) -> Self {
        self.strategy_types = types.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Add an exchange from owned values.
    pub fn insert_exchange(&mut self, exchange: ExchangeId, symbols: Vec<String>) {
        self.symbols.insert(exchange, symbols);
    }

    pub fn insert_balance(&mut self, exchange: ExchangeId, balance: Decimal) {
        self.balances.insert(exchange, balance);
    }

    pub fn set_strategy_types(&mut self, types: Vec<String>) {
        self.strategy_types = types;
    }
}

#[async_trait]
impl ExchangeCatalog for StaticCatalog {
    async fn list_configured_exchanges(&self) -> Result<Vec<ExchangeId>> {
        Ok(self.symbols.keys().cloned().collect())
    }

    async fn list_available_symbols(&self, exchange: &str) -> Result<Vec<String>> {
        self.symbols
            .get(exchange)
            .cloned()
            .ok_or_else(|| anyhow!("Exchange {} is not configured", exchange))
    }
}

#[async_trait]
impl BalanceSource for StaticCatalog {
    async fn available_balance(&self, exchange: &str) -> Result<Decimal> {
        self.balances
            .get(exchange)
            .copied()
            .ok_or_else(|| anyhow!("No balance known for {}", exchange))
    }
}

#[async_trait]
impl StrategyTypeSource for StaticCatalog {
    async fn list_strategy_types(&self) -> Result<Vec<String>> {
        if self.strategy_types.is_empty() {
            return Err(anyhow!("No strategy types configured"));
        }
        Ok(self.strategy_types.clone())
    }
}

/// Advisor used when no AI service is reachable. Every call fails, so the
/// wizard takes its uniform fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineAdvisor;

#[async_trait]
impl RecommendationService for OfflineAdvisor {
    async fn recommend(&self, query: &RecommendationQuery, _api_key: &str) -> Result<Recommendation> {
        Err(anyhow!("AI service not configured (asked about {})", query.exchange))
    }
}
