use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use teller_sdk::objects::{DepositStatusEntry, RequestId, StatusResponse};

use super::ApiError;
use crate::state::AppState;

/// `GET /status/{dest_address}`: every binding of a destination address.
///
/// An unknown destination address yields an empty list.
pub(super) async fn get_statuses(
    state: State<AppState>,
    Path(dest_address): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();

    let statuses = state
        .exchange
        .get_deposit_statuses_as(request_id, &dest_address)
        .await
        .map_err(ApiError::client(request_id))?;

    Ok(Json(StatusResponse {
        request_id,
        statuses: statuses.into_iter().map(Into::into).collect(),
    }))
}

/// `GET /deposits/{deposit_address}`: one binding by deposit address.
pub(super) async fn get_deposit(
    state: State<AppState>,
    Path(deposit_address): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();

    let info = state
        .exchange
        .get_deposit_info_as(request_id, &deposit_address)
        .await
        .map_err(ApiError::client(request_id))?
        .ok_or(ApiError::not_found(request_id))?;

    Ok(Json(DepositStatusEntry::from(info)))
}
