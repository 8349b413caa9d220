//! Event processors for the event-driven architecture.
//!
//! - `ExchangeEngine`: Receives `EngineCommand`, `DepositObserved` and
//!   `PayoutEvent`, owns every deposit store transition

pub mod exchange_engine;

#[cfg(test)]
mod engine_tests;

pub use exchange_engine::{ExchangeEngine, ExchangeError};
