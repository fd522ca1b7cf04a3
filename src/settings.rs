//! Configuration for the ledger
//!
//! Values come from built-in defaults, then an optional `pow-ledger.toml`,
//! then `LEDGER_*` environment variables (e.g. `LEDGER_MINING_DIFFICULTY=4`).

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use std::time::Duration;

use crate::blockchain::pow::{MiningBudget, ProofOfWork, ProofOfWorkError, MAX_DIFFICULTY};

pub const DEFAULT_CONFIG_FILE: &str = "pow-ledger";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Number of leading hex zeros a block hash needs
    #[serde(default = "default_mining_difficulty")]
    pub mining_difficulty: usize,

    #[serde(default = "default_mining_workers")]
    pub mining_workers: usize,

    /// Nonces handed to the workers per round
    #[serde(default = "default_mining_batch_size")]
    pub mining_batch_size: usize,

    #[serde(default)]
    pub max_attempts: Option<u64>,

    #[serde(default)]
    pub mining_timeout_ms: Option<u64>,

    #[serde(default = "default_max_remine_attempts")]
    pub max_remine_attempts: u32,

    /// Address to serve the HTTP API on, e.g. `127.0.0.1:8080`
    #[serde(default)]
    pub http_bind: Option<String>,
}

fn default_mining_difficulty() -> usize {
    3
}

fn default_mining_workers() -> usize {
    1
}

fn default_mining_batch_size() -> usize {
    4096
}

fn default_max_remine_attempts() -> u32 {
    3
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            mining_difficulty: default_mining_difficulty(),
            mining_workers: default_mining_workers(),
            mining_batch_size: default_mining_batch_size(),
            max_attempts: None,
            mining_timeout_ms: None,
            max_remine_attempts: default_max_remine_attempts(),
            http_bind: None,
        }
    }
}

impl LedgerConfig {
    /// Loads configuration from `pow-ledger.toml` (if present) and the environment
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: &str) -> Result<Self, SettingsError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("LEDGER").try_parsing(true))
            .build()?;

        Self::finish(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self, SettingsError> {
        let settings = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;

        Self::finish(settings)
    }

    fn finish(settings: Config) -> Result<Self, SettingsError> {
        let config: LedgerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.mining_difficulty > MAX_DIFFICULTY {
            return Err(SettingsError::Invalid(format!(
                "mining_difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, self.mining_difficulty
            )));
        }
        if self.mining_workers == 0 {
            return Err(SettingsError::Invalid("mining_workers must be at least 1".to_string()));
        }
        if self.mining_batch_size == 0 {
            return Err(SettingsError::Invalid("mining_batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Builds a fresh search budget; any timeout starts counting now
    pub fn mining_budget(&self) -> MiningBudget {
        let mut budget = MiningBudget::unbounded();
        if let Some(max_attempts) = self.max_attempts {
            budget = budget.with_max_attempts(max_attempts);
        }
        if let Some(timeout_ms) = self.mining_timeout_ms {
            budget = budget.with_timeout(Duration::from_millis(timeout_ms));
        }
        budget
    }

    pub fn proof_of_work(&self) -> Result<ProofOfWork, ProofOfWorkError> {
        ProofOfWork::new(self.mining_difficulty)?
            .with_workers(self.mining_workers, self.mining_batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::from_toml("").unwrap();

        assert_eq!(config.mining_difficulty, 3);
        assert_eq!(config.mining_workers, 1);
        assert_eq!(config.max_remine_attempts, 3);
        assert!(config.max_attempts.is_none());
        assert!(config.http_bind.is_none());
        assert!(config.mining_budget().max_attempts().is_none());
    }

    #[test]
    fn test_from_toml() {
        let config = LedgerConfig::from_toml(
            r#"
            mining_difficulty = 4
            mining_workers = 2
            max_attempts = 1000
            http_bind = "127.0.0.1:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.mining_difficulty, 4);
        assert_eq!(config.mining_workers, 2);
        assert_eq!(config.mining_budget().max_attempts(), Some(1000));
        assert_eq!(config.http_bind.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(config.proof_of_work().unwrap().difficulty(), 4);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(matches!(
            LedgerConfig::from_toml("mining_difficulty = 65"),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            LedgerConfig::from_toml("mining_workers = 0"),
            Err(SettingsError::Invalid(_))
        ));
    }
}
