//! Deposit addresses already handed out by the pooled allocator.

use crate::framework::{DatabaseProcessor, now_utc_seconds};
use kanau::processor::Processor;

#[derive(Debug, Clone)]
/// Every address claimed so far.
pub struct ListUsedAddresses;

impl Processor<ListUsedAddresses> for DatabaseProcessor {
    type Output = Vec<String>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListUsedAddresses")]
    async fn process(&self, _query: ListUsedAddresses) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT address FROM used_addresses")
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Mark an address as claimed.
///
/// Returns `false` if the address had already been claimed.
pub struct ClaimAddress {
    pub address: String,
}

impl Processor<ClaimAddress> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimAddress")]
    async fn process(&self, claim: ClaimAddress) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO used_addresses (address, claimed_at)
            VALUES (?, ?)
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(&claim.address)
        .bind(now_utc_seconds().unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
