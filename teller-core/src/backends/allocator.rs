//! Deposit address allocation.
//!
//! The pooled allocator hands out addresses from a precomputed list. Every
//! claim is recorded in the store before the address is returned, so an
//! address is never handed out twice, even across restarts.

use crate::entities::used_address::{ClaimAddress, ListUsedAddresses};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Errors that can occur while loading or drawing from an address pool.
#[derive(Debug, Error)]
pub enum AllocatorError {
    /// Every address in the pool has been handed out.
    #[error("deposit address pool exhausted")]
    Exhausted,

    #[error("address listed twice in pool: {0}")]
    DuplicateInPool(String),

    #[error("empty address in pool")]
    EmptyAddress,

    #[error("failed to read address pool: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse address pool: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Source of unused deposit addresses.
#[async_trait]
pub trait AddressAllocator: Send + Sync {
    /// Claim the next unused address.
    async fn next_address(&self) -> Result<String, AllocatorError>;
}

/// Address pool file format.
///
/// ```json
/// { "addresses": ["addr1", "addr2"] }
/// ```
#[derive(Debug, Deserialize)]
struct AddressPoolFile {
    addresses: Vec<String>,
}

/// Allocator backed by a fixed list of addresses.
pub struct PooledAllocator {
    db: DatabaseProcessor,
    available: Mutex<VecDeque<String>>,
}

impl PooledAllocator {
    /// Build an allocator over `addresses`, skipping those already claimed.
    pub async fn new(
        db: DatabaseProcessor,
        addresses: Vec<String>,
    ) -> Result<Self, AllocatorError> {
        let mut seen = HashSet::with_capacity(addresses.len());
        for address in &addresses {
            if address.trim().is_empty() {
                return Err(AllocatorError::EmptyAddress);
            }
            if !seen.insert(address.as_str()) {
                return Err(AllocatorError::DuplicateInPool(address.clone()));
            }
        }

        let used: HashSet<String> = db.process(ListUsedAddresses).await?.into_iter().collect();
        let total = addresses.len();
        let available: VecDeque<String> = addresses
            .into_iter()
            .filter(|address| !used.contains(address))
            .collect();

        info!(
            total,
            available = available.len(),
            "Deposit address pool loaded"
        );

        Ok(Self {
            db,
            available: Mutex::new(available),
        })
    }

    /// Build an allocator from a JSON pool document.
    pub async fn from_json(db: DatabaseProcessor, json: &str) -> Result<Self, AllocatorError> {
        let file: AddressPoolFile = serde_json::from_str(json)?;
        Self::new(db, file.addresses).await
    }

    /// Build an allocator from a JSON pool file.
    pub async fn from_file(
        db: DatabaseProcessor,
        path: impl AsRef<Path>,
    ) -> Result<Self, AllocatorError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(db, &content).await
    }

    /// Number of addresses not yet handed out.
    pub async fn remaining(&self) -> usize {
        self.available.lock().await.len()
    }
}

#[async_trait]
impl AddressAllocator for PooledAllocator {
    async fn next_address(&self) -> Result<String, AllocatorError> {
        let mut available = self.available.lock().await;

        while let Some(address) = available.pop_front() {
            match self
                .db
                .process(ClaimAddress {
                    address: address.clone(),
                })
                .await
            {
                Ok(true) => return Ok(address),
                Ok(false) => {
                    warn!(%address, "Pool address already claimed, skipping");
                }
                Err(e) => {
                    available.push_front(address);
                    return Err(AllocatorError::Store(e));
                }
            }
        }

        Err(AllocatorError::Exhausted)
    }
}
