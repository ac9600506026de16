//! HTTP client for the trading bot's configuration backend.
//!
//! Read-only lookups are retried briefly with exponential backoff. Generate and
//! apply are sent once; their failures go back to the operator untouched.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::{Client, StatusCode, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::allocation::ExchangeId;
use crate::wizard::SubmissionPayload;

use super::types::*;
use super::{BalanceSource, ExchangeCatalog, RecommendationService, StrategyTypeSource, SubmissionSink};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_RETRY_WINDOW: Duration = Duration::from_secs(5);
const AI_KEY_HEADER: &str = "x-ai-api-key";

/// Client for the configuration backend.
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url).with_context(|| format!("Invalid backend URL {}", base_url))?;
        if parsed.cannot_be_a_base() {
            anyhow::bail!("Backend URL {} cannot take a path", base_url);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Backend URL for the given path segments, each one percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).with_context(|| format!("Invalid backend URL {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Backend URL {} cannot take a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn read_retry_policy() -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_elapsed_time(Some(READ_RETRY_WINDOW))
            .build()
    }

    /// GET and decode JSON, retrying transport errors, 429 and 5xx.
    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let endpoint = self.endpoint(segments)?;
        debug!(url = %endpoint, "Fetching");

        let client = &self.client;
        let url = endpoint.as_str();
        retry(Self::read_retry_policy(), || async move {
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow!(e).context(format!("Failed to fetch {}", url))))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = anyhow!("Request to {} failed: {} - {}", url, status, body);
                return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    Err(backoff::Error::transient(err))
                } else {
                    Err(backoff::Error::permanent(err))
                };
            }

            response
                .json::<T>()
                .await
                .map_err(|e| backoff::Error::permanent(anyhow!(e).context(format!("Failed to parse response from {}", url))))
        })
        .await
    }

    /// POST JSON once. A failure carries the backend's own message when it sends one.
    async fn post_json<B, T>(&self, segments: &[&str], body: &B, ai_key: Option<&str>) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "Posting");

        let mut request = self.client.post(url.clone()).json(body);
        if let Some(key) = ai_key {
            request = request.header(AI_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorResponse>(&text) {
                Ok(err) if !err.message.is_empty() => anyhow::bail!("{}", err.message),
                _ => anyhow::bail!("Request to {} failed: {} - {}", url, status, text),
            }
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

#[async_trait]
impl ExchangeCatalog for BackendClient {
    async fn list_configured_exchanges(&self) -> Result<Vec<ExchangeId>> {
        self.get_json(&["api", "exchanges"]).await
    }

    async fn list_available_symbols(&self, exchange: &str) -> Result<Vec<String>> {
        self.get_json(&["api", "exchanges", exchange, "symbols"]).await
    }
}

#[async_trait]
impl BalanceSource for BackendClient {
    async fn available_balance(&self, exchange: &str) -> Result<Decimal> {
        let balance: BalanceResponse = self
            .get_json(&["api", "exchanges", exchange, "balance"])
            .await?;
        debug!(exchange = %exchange, asset = %balance.asset, available = %balance.available, "Balance");
        Ok(balance.available)
    }
}

#[async_trait]
impl StrategyTypeSource for BackendClient {
    async fn list_strategy_types(&self) -> Result<Vec<String>> {
        let entries: Vec<StrategyTypeEntry> = self.get_json(&["api", "strategies", "types"]).await?;
        Ok(entries
            .into_iter()
            .filter_map(StrategyTypeEntry::into_enabled_name)
            .collect())
    }
}

#[async_trait]
impl RecommendationService for BackendClient {
    async fn recommend(&self, query: &RecommendationQuery, api_key: &str) -> Result<Recommendation> {
        self.post_json(&["api", "ai", "recommend"], query, Some(api_key)).await
    }
}

#[async_trait]
impl SubmissionSink for BackendClient {
    async fn generate(&self, payload: &SubmissionPayload) -> Result<GeneratedPlan> {
        let plan: GeneratedPlan = self.post_json(&["api", "config", "generate"], payload, None).await?;
        info!(plan_id = %plan.plan_id, "Backend generated configuration");
        Ok(plan)
    }

    async fn apply(&self, plan: &GeneratedPlan) -> Result<ApplyReceipt> {
        let body = ApplyRequest { plan_id: &plan.plan_id };
        let receipt: ApplyReceipt = self.post_json(&["api", "config", "apply"], &body, None).await?;
        info!(plan_id = %receipt.plan_id, status = %receipt.status, "Backend applied configuration");
        Ok(receipt)
    }
}
