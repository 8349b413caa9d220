use crate::events::{DepositReceiver, deposit_channel};
use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

/// Errors reported by a scanner.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The scanner refused to watch the address.
    #[error("failed to watch address {address}: {reason}")]
    Register { address: String, reason: String },

    /// The scanner has shut down.
    #[error("scanner closed")]
    Closed,
}

/// Source-chain watcher.
///
/// Implementations emit a [`crate::events::DepositObserved`] for every
/// deposit to a registered address. Closing the deposit stream signals that
/// no further deposits will be reported.
#[async_trait]
pub trait DepositScanner: Send + Sync {
    /// Start watching `address` for deposits.
    async fn register_address(&self, address: &str) -> Result<(), ScanError>;

    /// Hand over the deposit stream.
    ///
    /// The stream is not restartable: the first call returns it, every later
    /// call returns `None`.
    fn take_deposits(&self) -> Option<DepositReceiver>;
}

/// Scanner for running without a source chain.
///
/// Accepts every registration and reports no deposits; its stream is
/// already closed when handed over.
pub struct NoopScanner {
    deposits: Mutex<Option<DepositReceiver>>,
}

impl NoopScanner {
    pub fn new() -> Self {
        let (_tx, rx) = deposit_channel();
        Self {
            deposits: Mutex::new(Some(rx)),
        }
    }
}

impl Default for NoopScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DepositScanner for NoopScanner {
    async fn register_address(&self, address: &str) -> Result<(), ScanError> {
        info!(address, "NoopScanner ignoring address registration");
        Ok(())
    }

    fn take_deposits(&self) -> Option<DepositReceiver> {
        self.deposits.lock().ok().and_then(|mut guard| guard.take())
    }
}
