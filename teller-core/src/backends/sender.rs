use crate::events::PayoutStatusReceiver;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Errors reported by a payout sender.
///
/// Both variants are transient for the engine: the record stays in
/// `AwaitingSend` and is retried by the sweep.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The sender rejected or failed the submission.
    #[error("payout rejected: {0}")]
    Rejected(String),

    /// The sender is closed or not reachable.
    #[error("payout sender unavailable")]
    Unavailable,
}

/// A payout accepted by the sender.
#[derive(Debug)]
pub struct Submission {
    pub tx_id: String,
    /// Progress of the transaction, ending with `PayoutStatus::Confirmed`.
    pub statuses: PayoutStatusReceiver,
}

/// Destination-chain payout submitter.
#[async_trait]
pub trait PayoutSender: Send + Sync {
    /// Pre-flight check. The engine skips dispatch while this is `false`.
    fn is_available(&self) -> bool;

    /// Submit a payout of `amount` smallest units to `dest_address`.
    ///
    /// Resolves once the sender has accepted or rejected the submission.
    async fn submit(&self, dest_address: &str, amount: u64) -> Result<Submission, SendError>;

    /// Resume status tracking for a transaction submitted earlier, possibly
    /// by a previous process.
    async fn track(&self, tx_id: &str) -> Result<PayoutStatusReceiver, SendError> {
        let _ = tx_id;
        Err(SendError::Unavailable)
    }
}

/// Sender for running without a destination chain.
///
/// Never available; every submission fails with [`SendError::Unavailable`],
/// so deposits stay in `AwaitingSend` until a real sender is configured.
#[derive(Debug, Default)]
pub struct NoopSender;

#[async_trait]
impl PayoutSender for NoopSender {
    fn is_available(&self) -> bool {
        false
    }

    async fn submit(&self, dest_address: &str, amount: u64) -> Result<Submission, SendError> {
        info!(dest_address, amount, "NoopSender refusing payout");
        Err(SendError::Unavailable)
    }
}
