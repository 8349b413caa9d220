//! Queues feeding the exchange engine.
//!
//! # Event Flow
//!
//! 1. `DepositScanner` emits `DepositObserved` -> `ExchangeEngine`
//! 2. `ExchangeEngine` spawns a payout task per `AwaitingSend` record
//! 3. Payout tasks emit `PayoutEvent` -> `ExchangeEngine`
//! 4. `ExchangeClient` submits `EngineCommand` -> `ExchangeEngine`
//!
//! The engine is the only consumer of every queue, so all store writes are
//! totally ordered.

pub mod channels;
pub mod types;

pub use channels::{
    CommandReceiver, CommandSender, DEFAULT_CHANNEL_BUFFER, DepositReceiver, DepositSender,
    PayoutEventReceiver, PayoutEventSender, PayoutStatusReceiver, PayoutStatusSender,
    command_channel, deposit_channel, payout_event_channel, payout_status_channel,
};

pub use types::{CommandKind, DepositObserved, EngineCommand, PayoutEvent, PayoutStatus, Reply};
