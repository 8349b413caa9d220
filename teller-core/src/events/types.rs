//! Event and command type definitions.
//!
//! Three kinds of traffic reach the exchange engine: deposits observed by
//! the scanner, payout progress reported by sender tasks, and commands
//! submitted through the client facade. Commands carry their own typed
//! reply channel, so every request has a statically known response shape.

use crate::backends::SendError;
use crate::entities::DepositInfo;
use crate::processors::ExchangeError;
use rust_decimal::Decimal;
use teller_sdk::objects::RequestId;
use tokio::sync::oneshot;

/// Value received at a source-chain address, as reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositObserved {
    pub address: String,
    pub value: Decimal,
}

/// Progress of a submitted payout, as reported by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayoutStatus {
    /// Broadcast to the destination chain.
    Sent,
    /// Confirmed on the destination chain.
    Confirmed,
}

/// Outcome of a payout task, fed back into the engine queue.
#[derive(Debug)]
pub enum PayoutEvent {
    /// The sender accepted the payout.
    Submitted {
        source_address: String,
        tx_id: String,
    },
    /// The sender rejected the payout or was unavailable.
    Failed {
        source_address: String,
        error: SendError,
    },
    /// The payout transaction was confirmed.
    Confirmed {
        source_address: String,
        tx_id: String,
    },
}

impl PayoutEvent {
    pub fn source_address(&self) -> &str {
        match self {
            PayoutEvent::Submitted { source_address, .. }
            | PayoutEvent::Failed { source_address, .. }
            | PayoutEvent::Confirmed { source_address, .. } => source_address,
        }
    }
}

/// Reply channel for a command producing `T`.
pub type Reply<T> = oneshot::Sender<Result<T, ExchangeError>>;

/// A command submitted to the engine, tagged with the id of the request
/// that produced it.
#[derive(Debug)]
pub struct EngineCommand {
    pub request_id: RequestId,
    pub kind: CommandKind,
}

/// The closed set of commands the engine answers.
#[derive(Debug)]
pub enum CommandKind {
    /// Bind a freshly allocated source address to a destination address.
    Bind {
        source_address: String,
        dest_address: String,
        reply: Reply<()>,
    },
    /// Snapshot of one binding.
    GetDepositInfo {
        source_address: String,
        reply: Reply<Option<DepositInfo>>,
    },
    /// Every binding of one destination address, in creation order.
    ListByDest {
        dest_address: String,
        reply: Reply<Vec<DepositInfo>>,
    },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Bind { .. } => "bind",
            CommandKind::GetDepositInfo { .. } => "get_deposit_info",
            CommandKind::ListByDest { .. } => "list_by_dest",
        }
    }
}
