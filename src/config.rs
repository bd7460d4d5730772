//! Ledger configuration
//!
//! Loaded from built-in defaults, an optional TOML file and environment
//! variables prefixed `VAULT_LEDGER__` (e.g. `VAULT_LEDGER__STORAGE__BACKEND=sqlite`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub timeout_ms: u64,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
            database_url: None,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub max_page_size: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self { max_page_size: 1_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub page_size: usize,
    pub max_findings: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            max_findings: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ledger: ChainConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
}

impl LedgerConfig {
    /// Load configuration, layering an optional file and the environment
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = LedgerConfig::default();
        let mut builder = config::Config::builder()
            .set_default("storage.backend", "memory")?
            .set_default("storage.timeout_ms", defaults.storage.timeout_ms as i64)?
            .set_default("ledger.max_page_size", defaults.ledger.max_page_size as i64)?
            .set_default("verification.page_size", defaults.verification.page_size as i64)?
            .set_default(
                "verification.max_findings",
                defaults.verification.max_findings as i64,
            )?;

        if let Some(path) = path {
            if !path.exists() {
                return Err(LedgerError::ConfigError(format!(
                    "Configuration file not found: {:?}",
                    path
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        let config: LedgerConfig = builder
            .add_source(
                config::Environment::with_prefix("VAULT_LEDGER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        info!(
            "Ledger configuration loaded (backend: {:?})",
            config.storage.backend
        );
        Ok(config)
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.timeout_ms == 0 {
            return Err(LedgerError::ConfigError(
                "storage.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.ledger.max_page_size == 0 {
            return Err(LedgerError::ConfigError(
                "ledger.max_page_size must be greater than zero".to_string(),
            ));
        }
        if self.verification.page_size == 0 {
            return Err(LedgerError::ConfigError(
                "verification.page_size must be greater than zero".to_string(),
            ));
        }

        match self.storage.backend {
            StorageBackend::File if self.storage.path.is_none() => Err(LedgerError::ConfigError(
                "file backend requires storage.path".to_string(),
            )),
            StorageBackend::Sqlite if self.storage.database_url.is_none() => {
                Err(LedgerError::ConfigError(
                    "sqlite backend requires storage.database_url".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}
