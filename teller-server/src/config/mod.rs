//! Configuration module for teller-server.
//!
//! Handles loading configuration from TOML files and CLI arguments, and
//! turns it into the runtime settings of the exchange engine and client.

pub mod file;

use crate::config::file::FileConfig;
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teller_core::config::{ClientConfig, ExchangeConfig};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub exchange: ExchangeConfig,
    pub client: ClientConfig,
    pub store_path: PathBuf,
    pub pool_file: PathBuf,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Build the runtime settings
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    fn load_str(&self, config_content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;

        Ok(build_loaded_config(file_config))
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.exchange.rate <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(format!(
            "exchange rate must be positive, got {}",
            config.exchange.rate
        )));
    }
    if config.exchange.command_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "command_buffer must be at least 1".to_string(),
        ));
    }
    if config.exchange.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "request_timeout_secs must be at least 1".to_string(),
        ));
    }
    if config.exchange.max_bind == Some(0) {
        return Err(ConfigError::ValidationError(
            "max_bind must be at least 1 when set".to_string(),
        ));
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig) -> LoadedConfig {
    let exchange = file_config.exchange;
    let sweep_interval =
        (exchange.sweep_interval_secs > 0).then(|| Duration::from_secs(exchange.sweep_interval_secs));

    LoadedConfig {
        listen: file_config.server.listen,
        exchange: ExchangeConfig {
            rate: exchange.rate,
            sweep_interval,
            sweep_on_startup: exchange.sweep_on_startup,
            command_buffer: exchange.command_buffer,
            max_bind: exchange.max_bind,
        },
        client: ClientConfig {
            request_timeout: Duration::from_secs(exchange.request_timeout_secs),
            max_bind: exchange.max_bind,
        },
        store_path: file_config.store.path,
        pool_file: file_config.allocator.pool_file,
    }
}
