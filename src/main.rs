// Entry point of the moderation guard.
//
// **Architecture Overview:**
// - `core/` = Business logic (rules, filter, classifier failover, ledger, rate guard)
// - `infra/` = Implementations of core traits (JSON rule file, SQLite, OpenRouter)
// - `console/` = stdin/stdout front-end
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Hand the assembled pipeline to the console session

#[path = "console/console_layer.rs"]
mod console;
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

mod config;

use crate::config::{AppConfig, ClassifierConfig};
use crate::console::ConsoleSession;
use crate::core::classifier::ClassifierGateway;
use crate::core::guard::{MessageGuard, StaticUserDirectory};
use crate::core::ledger::{LedgerStore, ViolationLedger};
use crate::core::moderation::{LocalFilter, ModerationEngine};
use crate::core::rate::RateGuard;
use crate::core::rules::RuleSet;
use crate::infra::classifier::OpenRouterClassifier;
use crate::infra::ledger::{InMemoryLedgerStore, SqliteLedgerStore};
use crate::infra::rules::JsonRuleStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_gateway(config: &ClassifierConfig) -> anyhow::Result<ClassifierGateway> {
    let Some(api_key) = config.api_key.clone() else {
        tracing::warn!("OPENROUTER_API_KEY not set, classifier corroboration disabled");
        return Ok(ClassifierGateway::disabled());
    };

    let primary = OpenRouterClassifier::new(
        api_key.clone(),
        &config.base_url,
        &config.primary_model,
        config.timeout,
    )?;
    let secondary = OpenRouterClassifier::new(
        api_key,
        &config.base_url,
        &config.secondary_model,
        config.timeout,
    )?;

    tracing::info!(
        primary = %config.primary_model,
        secondary = %config.secondary_model,
        max_failures = config.max_failures,
        "Classifier gateway configured"
    );
    Ok(ClassifierGateway::new(config.max_failures, config.timeout)
        .with_primary(Box::new(primary))
        .with_secondary(Box::new(secondary)))
}

async fn build_ledger_store(config: &AppConfig) -> anyhow::Result<Box<dyn LedgerStore>> {
    if config.uses_in_memory_ledger() {
        tracing::warn!("Using in-memory ledger, violations will not survive a restart");
        return Ok(Box::new(InMemoryLedgerStore::new()));
    }

    let store = SqliteLedgerStore::new(&config.db_path).await?;
    tracing::info!(path = %config.db_path, "SQLite ledger ready");
    Ok(Box::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(&config.log_level);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let rules = Arc::new(RuleSet::load(JsonRuleStore::new(&config.rules_path)).await);
    let engine = ModerationEngine::new(rules, LocalFilter::new(config.limits));

    let gateway = build_gateway(&config.classifier)?;

    let ledger = ViolationLedger::new(build_ledger_store(&config).await?);

    let users = StaticUserDirectory::new(
        config.admin_user_ids.iter().copied(),
        config.new_user_ids.iter().copied(),
    );

    let guard = MessageGuard::new(
        RateGuard::default(),
        engine,
        gateway,
        ledger,
        Box::new(users),
    );

    // ========================================================================
    // FRONT-END
    // ========================================================================

    ConsoleSession::new(Arc::new(guard)).run().await
}
