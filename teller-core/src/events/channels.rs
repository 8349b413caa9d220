//! Channel factories and handles.
//!
//! Provides factory functions for creating the engine's queues with
//! appropriate buffer sizes.

use super::types::{DepositObserved, EngineCommand, PayoutEvent, PayoutStatus};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
///
/// This provides enough buffer to handle bursts while keeping memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for deposits observed by a scanner.
pub type DepositSender = mpsc::Sender<DepositObserved>;
/// Receiver handle for deposits observed by a scanner.
pub type DepositReceiver = mpsc::Receiver<DepositObserved>;

/// Sender handle for payout status updates.
pub type PayoutStatusSender = mpsc::Sender<PayoutStatus>;
/// Receiver handle for payout status updates.
pub type PayoutStatusReceiver = mpsc::Receiver<PayoutStatus>;

/// Sender handle for payout outcomes.
pub type PayoutEventSender = mpsc::Sender<PayoutEvent>;
/// Receiver handle for payout outcomes.
pub type PayoutEventReceiver = mpsc::Receiver<PayoutEvent>;

/// Sender handle for engine commands.
pub type CommandSender = mpsc::Sender<EngineCommand>;
/// Receiver handle for engine commands.
pub type CommandReceiver = mpsc::Receiver<EngineCommand>;

/// Create a new deposit channel.
///
/// Scanner implementations keep the sender and hand the receiver to the
/// engine through `DepositScanner::take_deposits`.
pub fn deposit_channel() -> (DepositSender, DepositReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new payout status channel.
///
/// One per submitted payout.
pub fn payout_status_channel() -> (PayoutStatusSender, PayoutStatusReceiver) {
    mpsc::channel(2)
}

/// Create a new payout event channel.
pub fn payout_event_channel() -> (PayoutEventSender, PayoutEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new command channel with the given buffer size.
pub fn command_channel(buffer: usize) -> (CommandSender, CommandReceiver) {
    mpsc::channel(buffer.max(1))
}
