// Environment-driven configuration.
//
// `dotenv` has already populated the process environment by the time
// `AppConfig::from_env` runs. Every value is optional.

use crate::core::classifier::{DEFAULT_CLASSIFIER_TIMEOUT, DEFAULT_MAX_FAILURES};
use crate::core::moderation::HeuristicLimits;
use crate::infra::classifier::DEFAULT_OPENROUTER_BASE_URL;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Database path that selects the in-memory ledger.
pub const IN_MEMORY_DB: &str = ":memory:";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// `None` disables remote corroboration entirely
    pub api_key: Option<String>,
    pub base_url: String,
    pub primary_model: String,
    pub secondary_model: String,
    pub timeout: Duration,
    pub max_failures: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rules_path: String,
    pub db_path: String,
    pub classifier: ClassifierConfig,
    pub admin_user_ids: Vec<u64>,
    pub new_user_ids: Vec<u64>,
    pub limits: HeuristicLimits,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let classifier = ClassifierConfig {
            api_key: get("OPENROUTER_API_KEY"),
            base_url: string_or("OPENROUTER_BASE_URL", DEFAULT_OPENROUTER_BASE_URL),
            primary_model: string_or(
                "MODERATION_PRIMARY_MODEL",
                "google/gemini-2.0-flash-thinking-exp:free",
            ),
            secondary_model: string_or(
                "MODERATION_SECONDARY_MODEL",
                "deepseek/deepseek-r1-distill-llama-70b:free",
            ),
            timeout: Duration::from_secs(parse_or(
                &get,
                "CLASSIFIER_TIMEOUT_SECS",
                DEFAULT_CLASSIFIER_TIMEOUT.as_secs(),
            )?),
            max_failures: parse_or(&get, "CLASSIFIER_MAX_FAILURES", DEFAULT_MAX_FAILURES)?,
        };

        let defaults = HeuristicLimits::default();
        let limits = HeuristicLimits {
            max_message_chars: parse_or(&get, "MAX_MESSAGE_CHARS", defaults.max_message_chars)?,
            caps_ratio_threshold: parse_or(
                &get,
                "CAPS_RATIO_THRESHOLD",
                defaults.caps_ratio_threshold,
            )?,
        };

        Ok(Self {
            rules_path: string_or("MODERATION_RULES_PATH", "data/moderation_rules.json"),
            db_path: string_or("MODERATION_DB_PATH", "data/moderation.db"),
            classifier,
            admin_user_ids: parse_ids(&get, "ADMIN_USER_IDS")?,
            new_user_ids: parse_ids(&get, "NEW_USER_IDS")?,
            limits,
            log_level: string_or("LOG_LEVEL", "info"),
        })
    }

    pub fn uses_in_memory_ledger(&self) -> bool {
        self.db_path == IN_MEMORY_DB
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            key,
            value: value.clone(),
        }),
        None => Ok(default),
    }
}

fn parse_ids<G>(get: &G, key: &'static str) -> Result<Vec<u64>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(value) = get(key) else {
        return Ok(Vec::new());
    };

    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>().map_err(|_| ConfigError::Invalid {
                key,
                value: part.to_string(),
            })
        })
        .collect()
}
