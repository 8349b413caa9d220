//! Application state shared across all request handlers.

use teller_core::client::ExchangeClient;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (the client is a queue handle).
#[derive(Clone)]
pub struct AppState {
    /// Facade over the exchange engine's command queue.
    pub exchange: ExchangeClient,
}

impl AppState {
    pub fn new(exchange: ExchangeClient) -> Self {
        Self { exchange }
    }
}
