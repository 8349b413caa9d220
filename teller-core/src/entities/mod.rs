pub mod deposit_info;
pub mod used_address;

pub use deposit_info::{DepositInfo, DepositStatus, StoreError, TransitionError};
