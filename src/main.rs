//! Multi-exchange capital allocation wizard.
//!
//! Splits capital across exchanges, symbols and strategy types, checks the
//! bookkeeping invariants and submits the result as a bot configuration.

mod allocation;
mod api;
mod db;
mod plan;
mod wizard;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::allocation::{RiskProfile, WeightTemplate, KNOWN_STRATEGY_TYPES, MAX_CAPITAL, WEIGHT_SUM_EPSILON};
use crate::api::{BackendClient, OfflineAdvisor, SubmissionSink};
use crate::db::Database;
use crate::plan::DraftPlan;
use crate::wizard::{Collaborators, WizardConfig, WizardSession, WizardStep};

/// Capital allocation wizard CLI.
#[derive(Parser)]
#[command(name = "allocwiz")]
#[command(about = "Allocate capital across exchanges, symbols and strategies", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./allocwiz.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Bot backend base URL
    #[arg(long, env = "ALLOCWIZ_BACKEND_URL")]
    backend_url: Option<String>,

    /// AI advisor API key (overrides the draft's aiKey)
    #[arg(long, env = "ALLOCWIZ_AI_KEY", hide_env_values = true)]
    ai_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the strategy weight templates per risk profile
    Templates {
        /// Strategy types to show (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        types: Vec<String>,
    },

    /// Check a draft plan against every wizard gate
    Validate {
        /// Draft plan JSON file
        plan: PathBuf,
    },

    /// Run a wizard session from a draft plan and generate its configuration
    Run {
        /// Draft plan JSON file
        plan: PathBuf,

        /// Apply the generated configuration
        #[arg(long)]
        apply: bool,

        /// Submit to the backend instead of the local database
        #[arg(long)]
        remote_sink: bool,

        /// Answer catalog lookups from the draft even when a backend is set
        #[arg(long)]
        offline: bool,
    },

    /// List generated configurations
    History {
        /// Maximum number of entries
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show one generated configuration
    Show {
        /// Plan id
        plan_id: String,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Templates { types } => {
            let types: Vec<String> = if types.is_empty() {
                KNOWN_STRATEGY_TYPES.iter().map(|s| s.to_string()).collect()
            } else {
                types
            };

            print!("\n{:<16}", "TYPE");
            for profile in RiskProfile::ALL {
                print!(" {:>14}", profile.as_str().to_uppercase());
            }
            println!();
            println!("{}", "-".repeat(16 + 15 * RiskProfile::ALL.len()));

            let rows: Vec<_> = RiskProfile::ALL
                .iter()
                .map(|p| (WeightTemplate::base_weights(*p, &types), WeightTemplate::recommended_split(*p, &types)))
                .collect();

            for ty in &types {
                print!("{:<16}", truncate(ty, 16));
                for (base, split) in &rows {
                    let base = base.get(ty).copied().unwrap_or_default() * dec!(100);
                    let split = split.get(ty).copied().unwrap_or_default() * dec!(100);
                    print!(" {:>6.1}%/{:>5.1}%", base, split);
                }
                println!();
            }
            println!("\nColumns: template weight / normalized over the listed types");
        }

        Commands::Validate { plan } => {
            let draft = DraftPlan::load(&plan)?;
            let report = draft.check();
            println!("{}", report);
            println!("Weight tolerance: ±{}%", WEIGHT_SUM_EPSILON * dec!(100));

            if !report.is_valid() {
                bail!("Draft plan {} does not pass validation", plan.display());
            }
        }

        Commands::Run {
            plan,
            apply,
            remote_sink,
            offline,
        } => {
            let mut draft = DraftPlan::load(&plan)?;
            if let Some(key) = cli.ai_key {
                draft.ai_key = Some(key);
            }

            let db = Arc::new(Database::new(&cli.database).await?);
            let backend = match &cli.backend_url {
                Some(url) => Some(Arc::new(BackendClient::new(url)?)),
                None => None,
            };

            let mut collaborators = match (&backend, offline) {
                (Some(client), false) => {
                    info!(backend = %client.base_url(), "Using backend collaborators");
                    Collaborators::backend(client.clone())
                }
                _ => {
                    let catalog = Arc::new(draft.catalog());
                    Collaborators {
                        catalog: catalog.clone(),
                        balances: catalog.clone(),
                        strategy_types: catalog,
                        advisor: Arc::new(OfflineAdvisor),
                        sink: db.clone(),
                    }
                }
            };

            let sink: Arc<dyn SubmissionSink> = match (&backend, remote_sink) {
                (Some(client), true) => client.clone(),
                (None, true) => bail!("--remote-sink needs --backend-url (or ALLOCWIZ_BACKEND_URL)"),
                (_, false) => db.clone(),
            };
            collaborators.sink = sink;

            let mut session = WizardSession::open(WizardConfig::default(), collaborators).await;
            let outcome = run_session(&draft, &mut session, &db, apply, remote_sink).await;

            if !session.notices().is_empty() {
                println!("\nNotices:");
                for notice in session.notices() {
                    println!("  {}", notice);
                }
            }
            if session.step() != WizardStep::Success {
                println!("Stopped at step {}", session.step());
            }
            session.close();
            outcome?;
        }

        Commands::History { limit } => {
            let db = Database::new(&cli.database).await?;
            let configs = db.list_configs(limit).await?;

            if configs.is_empty() {
                println!("No configurations generated yet. Use 'allocwiz run <plan.json>' to create one.");
                return Ok(());
            }

            println!(
                "\n{:<38} {:<13} {:>9} {:>14} {:<10} {:<20}",
                "PLAN", "PROFILE", "EXCHANGES", "CAPITAL", "STATUS", "CREATED"
            );
            println!("{}", "-".repeat(110));

            for config in &configs {
                println!(
                    "{:<38} {:<13} {:>9} {:>14} {:<10} {:<20}",
                    config.plan_id,
                    config.risk_profile,
                    config.exchange_count,
                    config.total_capital,
                    config.status,
                    truncate(&config.created_at, 20)
                );
            }

            let (total, generated, applied) = db.config_stats().await?;
            println!("\nTotal: {}  Generated: {}  Applied: {}", total, generated, applied);
        }

        Commands::Show { plan_id } => {
            let db = Database::new(&cli.database).await?;
            let Some(config) = db.get_config(&plan_id).await? else {
                bail!("No configuration with plan id {}", plan_id);
            };

            println!("\n=== Plan {} ===\n", config.plan_id);
            println!("Session:      {}", config.session_id);
            println!("Status:       {}", config.status);
            println!("Created:      {}", config.created_at);
            if let Some(applied_at) = &config.applied_at {
                println!("Applied:      {}", applied_at);
            }
            println!();

            let payload = config.payload()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("Failed to render payload")?
            );
        }

        Commands::Config => {
            let config = WizardConfig::default();

            println!("\n=== Wizard Configuration ===\n");
            println!("Defaults:");
            println!("  Risk Profile:         {}", config.default_risk_profile);
            println!("  Fallback Strategies:  {}", config.fallback_strategy_types.join(", "));
            println!("  Seed From Balance:    {}", config.seed_total_from_balance);
            println!("  AI Timeout:           {}s", config.ai_timeout_secs);

            println!("\nValidation:");
            println!("  Weight Tolerance:     ±{}%", WEIGHT_SUM_EPSILON * dec!(100));
            println!("  Max Capital:          ${}", MAX_CAPITAL);

            println!("\nEnvironment:");
            println!("  Database:             {}", cli.database);
            println!(
                "  Backend URL:          {}",
                cli.backend_url.as_deref().unwrap_or("(not set, offline)")
            );
            println!(
                "  AI Key:               {}",
                if cli.ai_key.is_some() { "set" } else { "not set" }
            );

            println!("\nAs JSON:");
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Drive the session to the preview and optionally apply it.
async fn run_session(
    draft: &DraftPlan,
    session: &mut WizardSession,
    db: &Database,
    apply: bool,
    remote_sink: bool,
) -> Result<()> {
    draft.drive(session).await?;

    let plan = session.generate().await.context("Generate failed")?;
    if remote_sink {
        // Keep a local copy of what was submitted
        if let Err(e) = db.save_generated(&plan, &session.payload()).await {
            warn!(plan_id = %plan.plan_id, error = %e, "Could not record plan locally");
        }
    }

    println!("{}", session.preview());
    if let Some(summary) = &plan.summary {
        println!("{}", summary);
    }

    if !apply {
        // Not applied: leave the preview
        session.back();
        println!("Plan {} generated, not applied (use --apply).", plan.plan_id);
        return Ok(());
    }

    let receipt = session.apply().await.context("Apply failed")?;
    if remote_sink {
        if let Err(e) = db.mark_applied(&receipt.plan_id, receipt.applied_at).await {
            warn!(plan_id = %receipt.plan_id, error = %e, "Could not record apply locally");
        }
    }

    println!("Applied plan {} ({})", receipt.plan_id, receipt.status);
    if let Some(task_id) = &receipt.task_id {
        println!("Backend task: {}", task_id);
    }
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
