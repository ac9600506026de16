//! One operator's pass through the wizard.
//!
//! A `WizardSession` owns the allocation tree, the wizard position and the
//! collaborators it talks to. Every user action is a method; external calls
//! are awaited one at a time and their failures degrade into notices instead
//! of blocking the operator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocation::{
    capital_share, normalize, uniform, validate, AllocationTree, PairKey, RiskProfile,
    WeightTemplate, WithdrawalError, WithdrawalPolicy,
};
use crate::api::{
    ApplyReceipt, BackendClient, BalanceSource, ExchangeCatalog, GeneratedPlan, Recommendation,
    RecommendationQuery, RecommendationService, StrategyTypeSource, SubmissionSink,
};

use super::config::WizardConfig;
use super::payload::{Preview, SubmissionPayload};
use super::recommendation::{
    resolve_strategy_hints, resolve_symbol_weights, DiscardReason, PendingRecommendations,
    RecommendationOutcome, RecommendationRequest, RequestToken, WeightSource,
};
use super::state::{StepContext, TransitionError, WizardState, WizardStep};

/// Everything the session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn ExchangeCatalog>,
    pub balances: Arc<dyn BalanceSource>,
    pub strategy_types: Arc<dyn StrategyTypeSource>,
    pub advisor: Arc<dyn RecommendationService>,
    pub sink: Arc<dyn SubmissionSink>,
}

impl Collaborators {
    /// Use the backend for every collaborator.
    pub fn backend(client: Arc<BackendClient>) -> Self {
        Self {
            catalog: client.clone(),
            balances: client.clone(),
            strategy_types: client.clone(),
            advisor: client.clone(),
            sink: client,
        }
    }
}

/// Which external call degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSource {
    Exchanges,
    Symbols,
    Balance,
    StrategyTypes,
    Recommendation,
}

/// Non-blocking report of a failed external call and the fallback used.
#[derive(Debug, Clone)]
pub struct Notice {
    pub source: NoticeSource,
    pub exchange: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let at = self.at.format("%H:%M:%S");
        match &self.exchange {
            Some(exchange) => write!(f, "{} [{:?}] {}: {}", at, self.source, exchange, self.message),
            None => write!(f, "{} [{:?}] {}", at, self.source, self.message),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("withdrawal policy: {0}")]
    Withdrawal(#[from] WithdrawalError),

    /// Sink failure, message kept as reported
    #[error("{0}")]
    Submission(String),

    #[error("parameters for '{0}' must be a JSON object")]
    InvalidParameters(String),

    #[error("no generated configuration to apply")]
    NotGenerated,
}

pub struct WizardSession {
    id: Uuid,
    config: WizardConfig,
    state: WizardState,
    tree: AllocationTree,
    risk_profile: RiskProfile,
    ai_credential: Option<String>,
    strategy_types: Vec<String>,
    available_symbols: BTreeMap<String, Vec<String>>,
    parameters: BTreeMap<String, serde_json::Value>,
    withdrawal: WithdrawalPolicy,
    pending: PendingRecommendations,
    notices: Vec<Notice>,
    generated: Option<GeneratedPlan>,
    collaborators: Collaborators,
}

impl WizardSession {
    /// Load exchanges, symbols, balances and strategy types.
    ///
    /// Never fails: each failed fetch leaves a notice and its fallback.
    pub async fn open(config: WizardConfig, collaborators: Collaborators) -> Self {
        let id = Uuid::new_v4();
        let mut notices = Vec::new();

        let (exchanges, types) = futures::join!(
            collaborators.catalog.list_configured_exchanges(),
            collaborators.strategy_types.list_strategy_types(),
        );

        let exchanges: Vec<String> = match exchanges {
            Ok(list) => dedupe(list),
            Err(e) => {
                push_notice(&mut notices, NoticeSource::Exchanges, None, format!("{:#}; no exchanges loaded", e));
                Vec::new()
            }
        };

        let strategy_types = match types.map(dedupe) {
            Ok(list) if !list.is_empty() => list,
            Ok(_) => {
                push_notice(
                    &mut notices,
                    NoticeSource::StrategyTypes,
                    None,
                    "backend offered no strategy types; using defaults".to_string(),
                );
                config.fallback_strategy_types.clone()
            }
            Err(e) => {
                push_notice(
                    &mut notices,
                    NoticeSource::StrategyTypes,
                    None,
                    format!("{:#}; using defaults", e),
                );
                config.fallback_strategy_types.clone()
            }
        };

        let catalog = &collaborators.catalog;
        let balances = &collaborators.balances;
        let (symbol_results, balance_results) = futures::join!(
            join_all(exchanges.iter().map(|ex| catalog.list_available_symbols(ex))),
            join_all(exchanges.iter().map(|ex| balances.available_balance(ex))),
        );

        let mut tree = AllocationTree::new(exchanges.iter().cloned());
        let mut available_symbols = BTreeMap::new();

        for ((exchange, symbols), balance) in exchanges.iter().zip(symbol_results).zip(balance_results) {
            match symbols {
                Ok(list) => {
                    available_symbols.insert(exchange.clone(), dedupe(list));
                }
                Err(e) => {
                    push_notice(
                        &mut notices,
                        NoticeSource::Symbols,
                        Some(exchange.as_str()),
                        format!("{:#}; symbol list empty", e),
                    );
                    available_symbols.insert(exchange.clone(), Vec::new());
                }
            }

            match balance {
                Ok(amount) => {
                    tree.set_available_balance(exchange, amount);
                    if config.seed_total_from_balance {
                        tree.set_total_capital(exchange, amount);
                    }
                }
                Err(e) => push_notice(
                    &mut notices,
                    NoticeSource::Balance,
                    Some(exchange.as_str()),
                    format!("{:#}; total capital not pre-filled", e),
                ),
            }
        }

        info!(
            session = %id,
            exchanges = exchanges.len(),
            strategy_types = strategy_types.len(),
            notices = notices.len(),
            "Wizard session opened"
        );

        Self {
            id,
            risk_profile: config.default_risk_profile,
            config,
            state: WizardState::initial(),
            tree,
            ai_credential: None,
            strategy_types,
            available_symbols,
            parameters: BTreeMap::new(),
            withdrawal: WithdrawalPolicy::default(),
            pending: PendingRecommendations::default(),
            notices,
            generated: None,
            collaborators,
        }
    }

    // ==================== Accessors ====================

    pub fn step(&self) -> WizardStep {
        self.state.step()
    }

    /// Symbols the exchange reported when the session opened.
    pub fn available_symbols(&self, exchange: &str) -> &[String] {
        self.available_symbols
            .get(exchange)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    #[cfg(test)]
    pub fn tree(&self) -> &AllocationTree {
        &self.tree
    }

    #[cfg(test)]
    pub fn risk_profile(&self) -> RiskProfile {
        self.risk_profile
    }

    #[cfg(test)]
    pub fn strategy_types(&self) -> &[String] {
        &self.strategy_types
    }

    #[cfg(test)]
    pub fn parameters(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.parameters
    }

    #[cfg(test)]
    pub fn pending_recommendations(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn generated(&self) -> Option<&GeneratedPlan> {
        self.generated.as_ref()
    }

    // ==================== Navigation ====================

    pub fn set_ai_credential(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.ai_credential = if key.trim().is_empty() { None } else { Some(key) };
    }

    pub fn set_risk_profile(&mut self, profile: RiskProfile) {
        self.risk_profile = profile;
    }

    pub fn advance(&mut self) -> Result<WizardStep, TransitionError> {
        let ctx = StepContext {
            tree: &self.tree,
            ai_credential: self.ai_credential.as_deref(),
        };
        match self.state.advance(&ctx) {
            Ok(next) => {
                self.state = next;
                info!(session = %self.id, step = %next.step(), "Advanced");
                Ok(next.step())
            }
            Err(e) => {
                debug!(session = %self.id, step = %self.state.step(), reason = %e, "Advance refused");
                Err(e)
            }
        }
    }

    /// Step back. Leaving the preview drops the generated plan.
    pub fn back(&mut self) -> WizardStep {
        if self.state.step() == WizardStep::Preview {
            self.generated = None;
        }
        self.state = self.state.back();
        self.state.step()
    }

    pub fn skip_ai_setup(&mut self) -> Result<WizardStep, TransitionError> {
        self.state = self.state.skip_ai_setup()?;
        info!(session = %self.id, "AI setup skipped; recommendations use uniform weights");
        Ok(self.state.step())
    }

    // ==================== Asset allocation ====================

    /// Add or overwrite a symbol. Symbols the exchange did not list are
    /// accepted but logged.
    pub fn add_symbol(&mut self, exchange: &str, symbol: &str, capital: Decimal) {
        let listed = self.available_symbols(exchange);
        if !listed.is_empty() && !listed.iter().any(|s| s == symbol.trim()) {
            warn!(session = %self.id, exchange, symbol, "Symbol not listed by the exchange");
        }
        self.tree.add_exchange_symbol(exchange, symbol, capital);
    }

    pub fn remove_symbol(&mut self, exchange: &str, symbol: &str) {
        self.tree.remove_symbol(exchange, symbol);
    }

    pub fn set_total_capital(&mut self, exchange: &str, amount: Decimal) {
        self.tree.set_total_capital(exchange, amount);
    }

    /// Spread the exchange total evenly over its symbols.
    pub fn split_evenly(&mut self, exchange: &str) {
        let Some(node) = self.tree.exchange(exchange) else {
            return;
        };
        let weights = uniform(node.symbols().map(|s| s.symbol.clone()));
        self.apply_symbol_weights(exchange, &weights);
    }

    /// Set symbol capitals from weights over the exchange total.
    ///
    /// Weights are normalized first; symbols not in the tree are ignored.
    pub fn apply_symbol_weights(&mut self, exchange: &str, weights: &BTreeMap<String, Decimal>) {
        let Some(total) = self.tree.exchange(exchange).map(|n| n.total_capital()) else {
            return;
        };
        for (symbol, weight) in normalize(weights) {
            self.tree
                .set_symbol_capital(exchange, &symbol, capital_share(total, weight));
        }
    }

    // ==================== Strategy split ====================

    /// Replace a pair's whole split.
    pub fn set_strategy_split(&mut self, pair: &PairKey, weights: &BTreeMap<String, Decimal>) {
        self.tree
            .replace_strategy_split(&pair.exchange, &pair.symbol, weights);
    }

    /// Select a profile and replace every allocated pair's split with its template.
    ///
    /// Returns the number of pairs updated.
    pub fn apply_risk_profile(&mut self, profile: RiskProfile) -> usize {
        self.risk_profile = profile;
        let split = WeightTemplate::recommended_split(profile, &self.strategy_types);
        let pairs = self.tree.allocated_pairs();
        for (pair, _) in &pairs {
            self.tree
                .replace_strategy_split(&pair.exchange, &pair.symbol, &split);
        }
        info!(session = %self.id, profile = %profile, pairs = pairs.len(), "Risk profile applied");
        pairs.len()
    }

    /// Rescale one pair's current split to sum to one.
    pub fn normalize_strategy_split(&mut self, pair: &PairKey) {
        let current = self.tree.strategy_weights(&pair.exchange, &pair.symbol);
        if current.is_empty() {
            return;
        }
        self.tree
            .replace_strategy_split(&pair.exchange, &pair.symbol, &normalize(&current));
    }

    // ==================== AI recommendation ====================

    /// Issue a recommendation request for symbols on one exchange.
    ///
    /// Selected symbols missing from the tree are added with zero capital.
    /// `None` when the exchange is unknown or the selection is empty.
    pub fn begin_recommendation(&mut self, exchange: &str, symbols: &[String]) -> Option<RecommendationRequest> {
        let total = self.tree.exchange(exchange)?.total_capital();
        let selection = dedupe(symbols.to_vec());
        if selection.is_empty() {
            return None;
        }

        for symbol in &selection {
            if !self.tree.contains_symbol(exchange, symbol) {
                self.tree.add_exchange_symbol(exchange, symbol, Decimal::ZERO);
            }
        }

        let token = self.pending.issue(exchange, selection.clone());
        debug!(session = %self.id, %token, exchange, symbols = selection.len(), "Recommendation requested");

        Some(RecommendationRequest {
            token,
            query: RecommendationQuery {
                exchange: exchange.to_string(),
                symbols: selection,
                risk_profile: self.risk_profile,
                capital: total,
            },
        })
    }

    /// Write a finished recommendation back to the tree.
    ///
    /// A failed call falls back to uniform weights and leaves a notice.
    pub fn complete_recommendation(
        &mut self,
        token: RequestToken,
        result: anyhow::Result<Recommendation>,
    ) -> RecommendationOutcome {
        let Some(target) = self.pending.resolve(token) else {
            debug!(session = %self.id, %token, "Late recommendation ignored");
            return RecommendationOutcome::Discarded(DiscardReason::UnknownToken);
        };

        let selection: Vec<String> = target
            .symbols
            .into_iter()
            .filter(|s| self.tree.contains_symbol(&target.exchange, s))
            .collect();
        if selection.is_empty() {
            debug!(session = %self.id, %token, exchange = %target.exchange, "Recommendation target removed");
            return RecommendationOutcome::Discarded(DiscardReason::TargetRemoved);
        }

        let recommendation = match result {
            Ok(rec) => Some(rec),
            Err(e) => {
                push_notice(
                    &mut self.notices,
                    NoticeSource::Recommendation,
                    Some(target.exchange.as_str()),
                    format!("{:#}; using uniform weights", e),
                );
                None
            }
        };

        let (weights, source) = resolve_symbol_weights(&selection, recommendation.as_ref());
        if source == WeightSource::Uniform && recommendation.is_some() {
            push_notice(
                &mut self.notices,
                NoticeSource::Recommendation,
                Some(target.exchange.as_str()),
                "advisor gave no usable symbol weights; using uniform weights".to_string(),
            );
        }
        self.apply_symbol_weights(&target.exchange, &weights);

        let mut strategy_updates = 0;
        if let Some(rec) = &recommendation {
            for symbol in &selection {
                if let Some(split) = resolve_strategy_hints(symbol, rec, &self.strategy_types) {
                    self.tree
                        .replace_strategy_split(&target.exchange, symbol, &split);
                    strategy_updates += 1;
                }
            }
        }

        if let Some(rationale) = recommendation.as_ref().and_then(|r| r.rationale.as_deref()) {
            debug!(session = %self.id, exchange = %target.exchange, rationale, "Advisor rationale");
        }
        info!(
            session = %self.id,
            exchange = %target.exchange,
            symbols = selection.len(),
            source = ?source,
            strategy_updates,
            waited_ms = (Utc::now() - target.issued_at).num_milliseconds(),
            "Recommendation applied"
        );

        RecommendationOutcome::Applied {
            exchange: target.exchange,
            weights,
            source,
            strategy_updates,
        }
    }

    /// Ask the advisor and apply its answer, bounded by the configured timeout.
    pub async fn recommend(&mut self, exchange: &str, symbols: &[String]) -> RecommendationOutcome {
        let Some(request) = self.begin_recommendation(exchange, symbols) else {
            return RecommendationOutcome::Discarded(DiscardReason::TargetRemoved);
        };

        let result = match self.ai_key() {
            Some(key) => {
                let advisor = self.collaborators.advisor.clone();
                let limit = self.config.ai_timeout();
                match tokio::time::timeout(limit, advisor.recommend(&request.query, &key)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("AI recommendation timed out after {}s", limit.as_secs())),
                }
            }
            None => Err(anyhow!("AI is not enabled for this session")),
        };

        self.complete_recommendation(request.token, result)
    }

    fn ai_key(&self) -> Option<String> {
        if !self.state.ai_enabled() {
            return None;
        }
        self.ai_credential.clone()
    }

    // ==================== Parameters & withdrawal ====================

    pub fn set_strategy_parameters(
        &mut self,
        strategy_type: &str,
        parameters: serde_json::Value,
    ) -> Result<(), SessionError> {
        if !parameters.is_object() {
            return Err(SessionError::InvalidParameters(strategy_type.to_string()));
        }
        self.parameters.insert(strategy_type.to_string(), parameters);
        Ok(())
    }

    pub fn set_withdrawal_policy(&mut self, policy: WithdrawalPolicy) {
        self.withdrawal = policy;
    }

    // ==================== Submission ====================

    pub fn payload(&self) -> SubmissionPayload {
        SubmissionPayload::build(
            self.id,
            &self.tree,
            self.risk_profile,
            &self.parameters,
            &self.withdrawal,
        )
    }

    pub fn preview(&self) -> Preview {
        Preview::build(
            &self.tree,
            self.risk_profile,
            &self.withdrawal,
            self.generated.as_ref().map(|p| p.plan_id.clone()),
        )
    }

    /// Validate everything and hand the payload to the sink. Moves to the
    /// preview on success; any failure leaves the step unchanged.
    pub async fn generate(&mut self) -> Result<GeneratedPlan, SessionError> {
        let next = self.state.generated()?;
        validate(&self.tree).map_err(TransitionError::from)?;
        self.withdrawal.validate()?;

        let payload = self.payload();
        let plan = self
            .collaborators
            .sink
            .generate(&payload)
            .await
            .map_err(|e| {
                warn!(session = %self.id, error = %e, "Generate failed");
                SessionError::Submission(format!("{:#}", e))
            })?;

        info!(session = %self.id, plan_id = %plan.plan_id, "Configuration generated");
        self.state = next;
        self.generated = Some(plan.clone());
        Ok(plan)
    }

    /// Commit the generated plan. Moves to success on success.
    pub async fn apply(&mut self) -> Result<ApplyReceipt, SessionError> {
        let next = self.state.applied()?;
        let plan = self.generated.clone().ok_or(SessionError::NotGenerated)?;

        let receipt = self.collaborators.sink.apply(&plan).await.map_err(|e| {
            warn!(session = %self.id, plan_id = %plan.plan_id, error = %e, "Apply failed");
            SessionError::Submission(format!("{:#}", e))
        })?;

        info!(session = %self.id, plan_id = %receipt.plan_id, status = %receipt.status, "Configuration applied");
        self.state = next;
        Ok(receipt)
    }

    /// End the session. In-flight requests are forgotten.
    pub fn close(mut self) {
        let dropped = self.pending.len();
        self.pending.clear();
        info!(session = %self.id, step = %self.state.step(), dropped_requests = dropped, "Wizard session closed");
    }
}

fn push_notice(notices: &mut Vec<Notice>, source: NoticeSource, exchange: Option<&str>, message: String) {
    warn!(source = ?source, exchange = exchange.unwrap_or("-"), "{}", message);
    notices.push(Notice {
        source,
        exchange: exchange.map(str::to_string),
        message,
        at: Utc::now(),
    });
}

/// Trimmed, non-empty, first occurrence kept.
fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}
