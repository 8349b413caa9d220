//! TOML file configuration structures.
//!
//! These structs directly map to the `teller-config.toml` file format.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub exchange: ExchangeConfig,
    pub store: StoreConfig,
    pub allocator: AllocatorConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Exchange configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Destination smallest units paid per source unit, as a decimal string.
    #[serde(with = "rust_decimal::serde::str")]
    pub rate: Decimal,
    /// Seconds between retry sweeps. `0` disables the periodic sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_true")]
    pub sweep_on_startup: bool,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Seconds a bind or status request waits for the engine.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum number of deposit addresses per destination address.
    #[serde(default)]
    pub max_bind: Option<usize>,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_command_buffer() -> usize {
    teller_core::events::DEFAULT_CHANNEL_BUFFER
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Deposit store configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the SQLite database file, created if missing.
    pub path: PathBuf,
}

/// Deposit address allocator configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// JSON file of the form `{"addresses": [...]}`.
    pub pool_file: PathBuf,
}
