use axum::{Json, extract::State, response::IntoResponse};
use teller_sdk::objects::{BindRequest, BindResponse, RequestId};

use super::ApiError;
use crate::state::AppState;

/// `POST /bind`: bind a fresh deposit address to a destination address.
pub(super) async fn bind_address(
    state: State<AppState>,
    Json(request): Json<BindRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();

    let deposit_address = state
        .exchange
        .bind_address_as(request_id, &request.dest_address)
        .await
        .map_err(ApiError::client(request_id))?;

    Ok(Json(BindResponse {
        request_id,
        deposit_address,
    }))
}
