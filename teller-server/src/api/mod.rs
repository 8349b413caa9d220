//! HTTP API handlers.
//!
//! # Endpoints
//!
//! - `POST /bind`: bind a fresh deposit address to a destination address
//! - `GET /status/{dest_address}`: every binding of a destination address
//! - `GET /deposits/{deposit_address}`: one binding by deposit address

use axum::{
    Json, Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use teller_core::backends::AllocatorError;
use teller_core::client::ClientError;
use teller_core::processors::ExchangeError;
use teller_sdk::objects::{ErrorCode, ErrorResponse, RequestId};

use crate::state::AppState;

mod bind;
mod status;


/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bind", post(bind::bind_address))
        .route("/status/{dest_address}", get(status::get_statuses))
        .route("/deposits/{deposit_address}", get(status::get_deposit))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// Error of one API request, reported as an [`ErrorResponse`].
#[derive(Debug)]
struct ApiError {
    request_id: RequestId,
    kind: ApiErrorKind,
}

#[derive(Debug)]
enum ApiErrorKind {
    /// The exchange client rejected or failed the request.
    Client(ClientError),
    /// The requested deposit address is not bound.
    NotFound,
}

impl ApiError {
    fn client(request_id: RequestId) -> impl FnOnce(ClientError) -> Self {
        move |e| Self {
            request_id,
            kind: ApiErrorKind::Client(e),
        }
    }

    fn not_found(request_id: RequestId) -> Self {
        Self {
            request_id,
            kind: ApiErrorKind::NotFound,
        }
    }

    fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        let e = match &self.kind {
            ApiErrorKind::NotFound => return (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            ApiErrorKind::Client(e) => e,
        };
        match e {
            ClientError::InvalidDestAddress => {
                (StatusCode::BAD_REQUEST, ErrorCode::InvalidDestAddress)
            }
            ClientError::MaxBindReached(_) => (StatusCode::CONFLICT, ErrorCode::MaxBindReached),
            ClientError::Allocator(AllocatorError::Exhausted) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::AllocatorExhausted,
            ),
            ClientError::Allocator(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal)
            }
            ClientError::Exchange(ExchangeError::AddressAlreadyBound(_)) => {
                (StatusCode::CONFLICT, ErrorCode::AddressAlreadyBound)
            }
            ClientError::Exchange(ExchangeError::MaxBindReached(_)) => {
                (StatusCode::CONFLICT, ErrorCode::MaxBindReached)
            }
            ClientError::Exchange(ExchangeError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, ErrorCode::NotFound)
            }
            ClientError::Exchange(ExchangeError::Scanner(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Unavailable)
            }
            ClientError::Exchange(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal),
            ClientError::Timeout => (StatusCode::GATEWAY_TIMEOUT, ErrorCode::Timeout),
            ClientError::EngineStopped => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Unavailable)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        let message = match (&self.kind, code) {
            (ApiErrorKind::Client(e), ErrorCode::Internal) => {
                tracing::error!(request_id = %self.request_id, error = %e, "API internal error");
                "internal server error".to_string()
            }
            (ApiErrorKind::Client(e), _) => e.to_string(),
            (ApiErrorKind::NotFound, _) => "deposit address not found".to_string(),
        };
        let body = ErrorResponse {
            request_id: self.request_id,
            code,
            message,
        };
        (status, Json(body)).into_response()
    }
}
