pub mod deposit;
pub mod exchange;

pub use deposit::{DepositStatus, DepositStatusEntry};
pub use exchange::{
    BindRequest, BindResponse, ErrorCode, ErrorResponse, RequestId, StatusResponse,
};
