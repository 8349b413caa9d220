//! Configuration consumed by the exchange engine and client facade.
//!
//! These types hold validated runtime values. Loading and parsing is handled
//! by the server crate.

use rust_decimal::Decimal;
use std::time::Duration;

use crate::events::DEFAULT_CHANNEL_BUFFER;

/// Exchange engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Destination smallest units paid per source unit deposited.
    pub rate: Decimal,
    /// Period of the retry sweep over `AwaitingSend` records. `None`
    /// disables the periodic sweep.
    pub sweep_interval: Option<Duration>,
    /// Run one retry sweep before serving the first event.
    pub sweep_on_startup: bool,
    /// Capacity of the command queue.
    pub command_buffer: usize,
    /// Maximum number of bindings per destination address, enforced when
    /// the bind is applied.
    pub max_bind: Option<usize>,
}

impl ExchangeConfig {
    pub fn new(rate: Decimal) -> Self {
        Self {
            rate,
            sweep_interval: Some(Duration::from_secs(60)),
            sweep_on_startup: true,
            command_buffer: DEFAULT_CHANNEL_BUFFER,
            max_bind: None,
        }
    }
}

/// Client facade settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long a caller waits for the engine's reply.
    pub request_timeout: Duration,
    /// Maximum number of bindings per destination address, checked before
    /// an address is allocated. [`ExchangeConfig::max_bind`] is the
    /// authoritative limit.
    pub max_bind: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_bind: None,
        }
    }
}
