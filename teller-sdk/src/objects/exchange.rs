//! Bind and status request/response pairs.
//!
//! Every response carries the [`RequestId`] of the request it answers, so
//! callers multiplexing several requests over one connection can correlate
//! them without inspecting payload types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::deposit::DepositStatusEntry;

/// Identifier correlating a request with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a new time-ordered request id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Request body for binding a fresh deposit address to a destination address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindRequest {
    pub dest_address: String,
}

/// Response to a [`BindRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindResponse {
    pub request_id: RequestId,
    /// Source-chain address the depositor should send funds to.
    pub deposit_address: String,
}

/// Response to a status query for one destination address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub request_id: RequestId,
    pub statuses: Vec<DepositStatusEntry>,
}

/// Machine-readable error kinds reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidDestAddress,
    AddressAlreadyBound,
    MaxBindReached,
    AllocatorExhausted,
    NotFound,
    Timeout,
    Unavailable,
    Internal,
}

/// Error body returned in place of a response object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: RequestId,
    pub code: ErrorCode,
    pub message: String,
}
