//! Deposit lifecycle records.
//!
//! One row per bound deposit address. Rows are created at bind time and
//! never deleted; every later change goes through
//! [`DatabaseProcessor::update_deposit_info`] so that read, mutation and
//! write happen inside one transaction.

use crate::framework::{DatabaseProcessor, now_utc_seconds};
use kanau::processor::Processor;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;
use teller_sdk::objects::{
    DepositStatus as SdkDepositStatus, DepositStatusEntry as SdkDepositStatusEntry,
};
use thiserror::Error;
use time::OffsetDateTime;

/// Deposit status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see
/// `teller_sdk::objects::DepositStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Address bound, no value observed yet.
    AwaitingDeposit,
    /// Deposit value recorded, payout not yet accepted by the sender.
    AwaitingSend,
    /// Payout accepted by the sender, waiting for chain confirmation.
    AwaitingConfirm,
    /// Payout confirmed. Terminal.
    Done,
}

impl DepositStatus {
    /// The single forward successor of this status, if any.
    pub fn next(self) -> Option<DepositStatus> {
        match self {
            DepositStatus::AwaitingDeposit => Some(DepositStatus::AwaitingSend),
            DepositStatus::AwaitingSend => Some(DepositStatus::AwaitingConfirm),
            DepositStatus::AwaitingConfirm => Some(DepositStatus::Done),
            DepositStatus::Done => None,
        }
    }

    /// Whether moving from `self` to `to` is a legal transition.
    ///
    /// Besides single forward steps, only `AwaitingSend -> AwaitingSend`
    /// (a failed send staying put) is allowed.
    pub fn can_transition_to(self, to: DepositStatus) -> bool {
        self.next() == Some(to)
            || (self == DepositStatus::AwaitingSend && to == DepositStatus::AwaitingSend)
    }

    pub fn is_terminal(self) -> bool {
        self == DepositStatus::Done
    }
}

impl From<DepositStatus> for SdkDepositStatus {
    fn from(value: DepositStatus) -> Self {
        match value {
            DepositStatus::AwaitingDeposit => SdkDepositStatus::AwaitingDeposit,
            DepositStatus::AwaitingSend => SdkDepositStatus::AwaitingSend,
            DepositStatus::AwaitingConfirm => SdkDepositStatus::AwaitingConfirm,
            DepositStatus::Done => SdkDepositStatus::Done,
        }
    }
}

impl From<SdkDepositStatus> for DepositStatus {
    fn from(value: SdkDepositStatus) -> Self {
        match value {
            SdkDepositStatus::AwaitingDeposit => DepositStatus::AwaitingDeposit,
            SdkDepositStatus::AwaitingSend => DepositStatus::AwaitingSend,
            SdkDepositStatus::AwaitingConfirm => DepositStatus::AwaitingConfirm,
            SdkDepositStatus::Done => DepositStatus::Done,
        }
    }
}

/// Errors from the deposit store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("deposit address already present: {0}")]
    DuplicateAddress(String),

    #[error("deposit address not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record for {address}: {reason}")]
    Corrupt { address: String, reason: String },
}

/// Rejected state machine moves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition from {from:?} to {to:?}")]
    Illegal {
        from: DepositStatus,
        to: DepositStatus,
    },

    #[error("deposit already credited (status {0:?})")]
    AlreadyCredited(DepositStatus),

    #[error("deposit value must be positive, got {0}")]
    InvalidDepositValue(Decimal),

    #[error("payout for {value} at rate {rate} is out of range")]
    PayoutOutOfRange { value: Decimal, rate: Decimal },

    #[error("tx id mismatch: recorded {recorded:?}, reported {reported}")]
    TxIdMismatch {
        recorded: Option<String>,
        reported: String,
    },
}

/// Compute the destination-chain payout for a deposit.
///
/// The product is truncated toward zero, dropping fractional destination
/// units.
pub fn compute_payout(value: Decimal, rate: Decimal) -> Result<u64, TransitionError> {
    if value <= Decimal::ZERO {
        return Err(TransitionError::InvalidDepositValue(value));
    }
    value
        .checked_mul(rate)
        .and_then(|product| product.trunc().to_i64())
        .and_then(|amount| u64::try_from(amount).ok())
        .ok_or(TransitionError::PayoutOutOfRange { value, rate })
}

/// One deposit address binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositInfo {
    pub source_address: String,
    pub dest_address: String,
    pub deposit_value: Option<Decimal>,
    pub payout_amount: Option<u64>,
    pub payout_tx_id: Option<String>,
    pub status: DepositStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl DepositInfo {
    /// A fresh binding in `AwaitingDeposit`.
    pub fn new(source_address: impl Into<String>, dest_address: impl Into<String>) -> Self {
        let now = now_utc_seconds();
        Self {
            source_address: source_address.into(),
            dest_address: dest_address.into(),
            deposit_value: None,
            payout_amount: None,
            payout_tx_id: None,
            status: DepositStatus::AwaitingDeposit,
            created_at: now,
            updated_at: now,
        }
    }

    fn advance(&mut self, to: DepositStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Record the observed deposit value and fix the payout amount.
    ///
    /// Only the first deposit to a binding is credited.
    pub fn record_deposit(&mut self, value: Decimal, rate: Decimal) -> Result<(), TransitionError> {
        if self.status != DepositStatus::AwaitingDeposit || self.deposit_value.is_some() {
            return Err(TransitionError::AlreadyCredited(self.status));
        }
        let amount = compute_payout(value, rate)?;
        self.advance(DepositStatus::AwaitingSend)?;
        self.deposit_value = Some(value);
        self.payout_amount = Some(amount);
        Ok(())
    }

    /// Record that the sender accepted the payout under `tx_id`.
    pub fn record_submission(&mut self, tx_id: &str) -> Result<(), TransitionError> {
        self.advance(DepositStatus::AwaitingConfirm)?;
        self.payout_tx_id = Some(tx_id.to_owned());
        Ok(())
    }

    /// Record chain confirmation of the payout `tx_id`.
    pub fn record_confirmation(&mut self, tx_id: &str) -> Result<(), TransitionError> {
        if self.payout_tx_id.as_deref() != Some(tx_id) {
            return Err(TransitionError::TxIdMismatch {
                recorded: self.payout_tx_id.clone(),
                reported: tx_id.to_owned(),
            });
        }
        self.advance(DepositStatus::Done)
    }
}

impl From<DepositInfo> for SdkDepositStatusEntry {
    fn from(info: DepositInfo) -> Self {
        SdkDepositStatusEntry {
            deposit_address: info.source_address,
            dest_address: info.dest_address,
            status: info.status.into(),
            deposit_value: info.deposit_value,
            payout_amount: info.payout_amount,
            payout_tx_id: info.payout_tx_id,
            updated_at: info.updated_at.unix_timestamp(),
        }
    }
}

/// Raw row as stored in `deposit_infos`.
#[derive(Debug, sqlx::FromRow)]
struct DepositInfoRow {
    source_address: String,
    dest_address: String,
    deposit_value: Option<String>,
    payout_amount: Option<i64>,
    payout_tx_id: Option<String>,
    status: DepositStatus,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<DepositInfoRow> for DepositInfo {
    type Error = StoreError;

    fn try_from(row: DepositInfoRow) -> Result<Self, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            address: row.source_address.clone(),
            reason,
        };
        let deposit_value = row
            .deposit_value
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("deposit_value: {e}")))?;
        let payout_amount = row
            .payout_amount
            .map(u64::try_from)
            .transpose()
            .map_err(|e| corrupt(format!("payout_amount: {e}")))?;
        let created_at = OffsetDateTime::from_unix_timestamp(row.created_at)
            .map_err(|e| corrupt(format!("created_at: {e}")))?;
        let updated_at = OffsetDateTime::from_unix_timestamp(row.updated_at)
            .map_err(|e| corrupt(format!("updated_at: {e}")))?;

        Ok(DepositInfo {
            source_address: row.source_address,
            dest_address: row.dest_address,
            deposit_value,
            payout_amount,
            payout_tx_id: row.payout_tx_id,
            status: row.status,
            created_at,
            updated_at,
        })
    }
}

fn decode_rows(rows: Vec<DepositInfoRow>) -> Result<Vec<DepositInfo>, StoreError> {
    rows.into_iter().map(DepositInfo::try_from).collect()
}

fn amount_column(amount: Option<u64>) -> Option<i64> {
    amount.and_then(|a| i64::try_from(a).ok())
}

macro_rules! select_deposit_infos {
    ($tail:literal) => {
        concat!(
            "SELECT source_address, dest_address, deposit_value, payout_amount, \
             payout_tx_id, status, created_at, updated_at FROM deposit_infos ",
            $tail
        )
    };
}

#[derive(Debug, Clone)]
/// Insert a new binding. Fails with `DuplicateAddress` if the source address exists.
pub struct InsertDepositInfo {
    pub info: DepositInfo,
}

impl Processor<InsertDepositInfo> for DatabaseProcessor {
    type Output = ();
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertDepositInfo")]
    async fn process(&self, insert: InsertDepositInfo) -> Result<(), StoreError> {
        let info = insert.info;
        let result = sqlx::query(
            r#"
            INSERT INTO deposit_infos
                (source_address, dest_address, deposit_value, payout_amount,
                 payout_tx_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&info.source_address)
        .bind(&info.dest_address)
        .bind(info.deposit_value.map(|v| v.to_string()))
        .bind(amount_column(info.payout_amount))
        .bind(&info.payout_tx_id)
        .bind(info.status)
        .bind(info.created_at.unix_timestamp())
        .bind(info.updated_at.unix_timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateAddress(info.source_address))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone)]
/// Point lookup by source address. A missing record is `Ok(None)`.
pub struct GetDepositInfo {
    pub source_address: String,
}

impl Processor<GetDepositInfo> for DatabaseProcessor {
    type Output = Option<DepositInfo>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDepositInfo")]
    async fn process(&self, query: GetDepositInfo) -> Result<Option<DepositInfo>, StoreError> {
        let row = sqlx::query_as::<_, DepositInfoRow>(select_deposit_infos!(
            "WHERE source_address = ?"
        ))
        .bind(&query.source_address)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DepositInfo::try_from).transpose()
    }
}

#[derive(Debug, Clone)]
/// All records in one status, in creation order.
pub struct ListDepositInfosByStatus {
    pub status: DepositStatus,
}

impl Processor<ListDepositInfosByStatus> for DatabaseProcessor {
    type Output = Vec<DepositInfo>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListDepositInfosByStatus")]
    async fn process(
        &self,
        query: ListDepositInfosByStatus,
    ) -> Result<Vec<DepositInfo>, StoreError> {
        let rows = sqlx::query_as::<_, DepositInfoRow>(select_deposit_infos!(
            "WHERE status = ? ORDER BY rowid"
        ))
        .bind(query.status)
        .fetch_all(&self.pool)
        .await?;
        decode_rows(rows)
    }
}

#[derive(Debug, Clone)]
/// All records bound to one destination address, in creation order.
pub struct ListDepositInfosByDest {
    pub dest_address: String,
}

impl Processor<ListDepositInfosByDest> for DatabaseProcessor {
    type Output = Vec<DepositInfo>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListDepositInfosByDest")]
    async fn process(&self, query: ListDepositInfosByDest) -> Result<Vec<DepositInfo>, StoreError> {
        let rows = sqlx::query_as::<_, DepositInfoRow>(select_deposit_infos!(
            "WHERE dest_address = ? ORDER BY rowid"
        ))
        .bind(&query.dest_address)
        .fetch_all(&self.pool)
        .await?;
        decode_rows(rows)
    }
}

impl DatabaseProcessor {
    /// Atomically read, mutate and persist one record.
    ///
    /// The mutation runs inside a transaction: if `mutate` fails nothing is
    /// written and its error is returned as is. `source_address` and
    /// `dest_address` are never rewritten. Returns the persisted snapshot.
    ///
    /// The transaction takes the write lock before reading, so a concurrent
    /// writer on another connection makes it wait instead of failing the
    /// upgrade from reader to writer.
    #[tracing::instrument(skip_all, fields(source_address = %source_address), name = "SQL:UpdateDepositInfo")]
    pub async fn update_deposit_info<F, E>(
        &self,
        source_address: &str,
        mutate: F,
    ) -> Result<DepositInfo, E>
    where
        F: FnOnce(&mut DepositInfo) -> Result<(), E>,
        E: From<StoreError>,
    {
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(StoreError::from)?;

        let row = sqlx::query_as::<_, DepositInfoRow>(select_deposit_infos!(
            "WHERE source_address = ?"
        ))
        .bind(source_address)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let Some(row) = row else {
            return Err(StoreError::NotFound(source_address.to_owned()).into());
        };
        let mut info = DepositInfo::try_from(row)?;

        mutate(&mut info)?;
        info.updated_at = now_utc_seconds();

        sqlx::query(
            r#"
            UPDATE deposit_infos
            SET deposit_value = ?, payout_amount = ?, payout_tx_id = ?,
                status = ?, updated_at = ?
            WHERE source_address = ?
            "#,
        )
        .bind(info.deposit_value.map(|v| v.to_string()))
        .bind(amount_column(info.payout_amount))
        .bind(&info.payout_tx_id)
        .bind(info.status)
        .bind(info.updated_at.unix_timestamp())
        .bind(source_address)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(info)
    }
}
