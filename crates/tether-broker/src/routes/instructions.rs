//! Provider instruction fanout.
//!
//! ## Routes
//!
//! - `GET /instructions` - Pending provider instructions for the caller
//!
//! This is the pull half of instruction delivery; the push half rides on
//! the advertisement response. Agents poll here on a short cadence so a
//! fresh reservation reaches its provider well inside the advertisement
//! cycle, and still arrives even if the provider stops publishing.
//! Duplicate delivery across the two paths is expected; agents key local
//! records by reservation id.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use tether_core::{ReservationDto, ReservationPhase};

use crate::context::CallerIdentity;
use crate::error::{ApiError, ApiErrorBody};
use crate::server::AppState;

/// Pending provider instructions for the calling cluster.
///
/// GET /api/v1/instructions
#[utoipa::path(
    get,
    path = "/api/v1/instructions",
    tag = "instructions",
    responses(
        (status = 200, description = "Instructions for the caller as provider", body = [ReservationDto]),
        (status = 401, description = "Unauthenticated", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    ),
)]
pub(crate) async fn get_instructions(
    identity: CallerIdentity,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let reservations = state
        .reservations
        .list()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(identity.request_id.clone()))?;

    let instructions: Vec<ReservationDto> = reservations
        .iter()
        .filter(|rsv| {
            rsv.record.status.phase == ReservationPhase::Reserved
                && rsv.record.target_cluster_id == identity.cluster_id
        })
        .map(|rsv| ReservationDto::from(&rsv.record))
        .collect();

    tracing::debug!(
        cluster = %identity.cluster_id,
        count = instructions.len(),
        "returning provider instructions"
    );

    Ok(Json(instructions))
}
