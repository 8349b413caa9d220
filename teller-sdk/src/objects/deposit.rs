use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a deposit address binding.
///
/// This is the API/DTO version. For database use, see
/// `teller_core::entities::deposit_info::DepositStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    AwaitingDeposit,
    AwaitingSend,
    AwaitingConfirm,
    Done,
}

/// Snapshot of one deposit address binding as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositStatusEntry {
    pub deposit_address: String,
    pub dest_address: String,
    pub status: DepositStatus,
    /// Amount received on the source chain, once observed.
    pub deposit_value: Option<Decimal>,
    /// Payout in the destination chain's smallest unit.
    pub payout_amount: Option<u64>,
    pub payout_tx_id: Option<String>,
    /// Unix timestamp of the last status transition.
    pub updated_at: i64,
}
