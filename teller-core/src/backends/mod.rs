//! Collaborators the exchange engine drives.
//!
//! - `DepositScanner`: watches source-chain addresses, emits `DepositObserved`
//! - `PayoutSender`: submits destination-chain payouts, reports progress
//! - `AddressAllocator`: hands out unused deposit addresses
//!
//! The engine only ever sees the traits. Real chain backends plug in by
//! implementing them; the no-op implementations here let the service run
//! without any chain attached.

pub mod allocator;
pub mod scanner;
pub mod sender;

pub use allocator::{AddressAllocator, AllocatorError, PooledAllocator};
pub use scanner::{DepositScanner, NoopScanner, ScanError};
pub use sender::{NoopSender, PayoutSender, SendError, Submission};
