//! Local history of generated configurations.
//!
//! Every generated plan is stored with its full JSON payload so it can be
//! listed, inspected and applied later. The database also works as an offline
//! submission sink.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::{ApplyReceipt, GeneratedPlan, SubmissionSink};
use crate::wizard::SubmissionPayload;

pub const STATUS_GENERATED: &str = "generated";
pub const STATUS_APPLIED: &str = "applied";

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored configuration record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredConfig {
    pub plan_id: String,
    pub session_id: String,
    pub risk_profile: String,
    pub exchange_count: i64,
    pub total_capital: String,
    pub payload: String,
    pub status: String,
    pub created_at: String,
    pub applied_at: Option<String>,
}

impl StoredConfig {
    /// Decode the stored payload.
    pub fn payload(&self) -> Result<SubmissionPayload> {
        serde_json::from_str(&self.payload)
            .with_context(|| format!("Stored payload for plan {} is not valid", self.plan_id))
    }

    pub fn is_applied(&self) -> bool {
        self.status == STATUS_APPLIED
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database; one connection so every query sees the same data.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generated_configs (
                plan_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                risk_profile TEXT NOT NULL,
                exchange_count INTEGER NOT NULL DEFAULT 0,
                total_capital TEXT NOT NULL DEFAULT '0',
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'generated',
                created_at TEXT NOT NULL,
                applied_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_generated_configs_created ON generated_configs(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Configs ====================

    /// Store a generated plan together with its payload.
    pub async fn save_generated(&self, plan: &GeneratedPlan, payload: &SubmissionPayload) -> Result<()> {
        let json = serde_json::to_string(payload).context("Failed to serialize payload")?;

        sqlx::query(
            r#"
            INSERT INTO generated_configs
                (plan_id, session_id, risk_profile, exchange_count, total_capital, payload, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(plan_id) DO UPDATE SET
                payload = excluded.payload,
                status = excluded.status,
                created_at = excluded.created_at,
                applied_at = NULL
            "#,
        )
        .bind(plan.plan_id.as_str())
        .bind(payload.session_id.to_string())
        .bind(payload.risk_profile.as_str())
        .bind(payload.exchanges.len() as i64)
        .bind(payload.total_capital().to_string())
        .bind(json)
        .bind(STATUS_GENERATED)
        .bind(plan.generated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save generated config")?;

        debug!(plan_id = %plan.plan_id, "Stored generated config");
        Ok(())
    }

    /// Mark a stored plan as applied.
    pub async fn mark_applied(&self, plan_id: &str, applied_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE generated_configs SET status = ?, applied_at = ? WHERE plan_id = ? AND status = ?",
        )
        .bind(STATUS_APPLIED)
        .bind(applied_at.to_rfc3339())
        .bind(plan_id)
        .bind(STATUS_GENERATED)
        .execute(&self.pool)
        .await
        .context("Failed to mark config applied")?;

        if result.rows_affected() == 0 {
            match self.get_config(plan_id).await? {
                Some(config) if config.is_applied() => bail!("plan {} was already applied", plan_id),
                Some(config) => bail!("plan {} has status '{}'", plan_id, config.status),
                None => bail!("plan {} not found", plan_id),
            }
        }

        Ok(())
    }

    /// Most recent configs first.
    pub async fn list_configs(&self, limit: i64) -> Result<Vec<StoredConfig>> {
        sqlx::query_as::<_, StoredConfig>(
            "SELECT * FROM generated_configs ORDER BY created_at DESC, plan_id LIMIT ?",
        )
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch configs")
    }

    pub async fn get_config(&self, plan_id: &str) -> Result<Option<StoredConfig>> {
        sqlx::query_as::<_, StoredConfig>("SELECT * FROM generated_configs WHERE plan_id = ?")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch config")
    }

    /// Count configs by status: (total, generated, applied).
    pub async fn config_stats(&self) -> Result<(i64, i64, i64)> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM generated_configs")
            .fetch_one(&self.pool)
            .await?;

        let (generated,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM generated_configs WHERE status = ?")
                .bind(STATUS_GENERATED)
                .fetch_one(&self.pool)
                .await?;

        Ok((total, generated, total - generated))
    }
}

#[async_trait]
impl SubmissionSink for Database {
    async fn generate(&self, payload: &SubmissionPayload) -> Result<GeneratedPlan> {
        let pairs: usize = payload.strategies.len();
        let plan = GeneratedPlan {
            plan_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            summary: Some(format!(
                "{} exchanges, {} pairs, ${:.2} total capital",
                payload.exchanges.len(),
                pairs,
                payload.total_capital()
            )),
        };

        self.save_generated(&plan, payload).await?;
        info!(plan_id = %plan.plan_id, pairs, "Config generated locally");
        Ok(plan)
    }

    async fn apply(&self, plan: &GeneratedPlan) -> Result<ApplyReceipt> {
        let applied_at = Utc::now();
        self.mark_applied(&plan.plan_id, applied_at).await?;

        Ok(ApplyReceipt {
            plan_id: plan.plan_id.clone(),
            applied_at,
            task_id: None,
            status: STATUS_APPLIED.to_string(),
        })
    }
}
