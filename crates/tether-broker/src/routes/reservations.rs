//! Synchronous reservation dispatch.
//!
//! ## Routes
//!
//! - `POST /reservations` - Place a reservation and return the instruction inline
//!
//! The requester gets its answer in the response body; there is no
//! polling on the requester side. Within one call the ordering is: create
//! the reservation record in phase `Pending` (pinned), lock the chosen
//! provider's reserved component, then flip the record to `Reserved` or
//! `Failed`. The record is always written with a terminal message on
//! failure so operators can diagnose; the lifecycle observer reconciles
//! any interrupted sequence.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use tether_core::{
    Error, Reservation, ReservationDto, ReservationId, ReservationRequestDto, ResourceQuantities,
    dto::parse_duration_span,
};

use crate::context::CallerIdentity;
use crate::error::{ApiError, ApiErrorBody};
use crate::metrics;
use crate::server::AppState;

/// Place a reservation.
///
/// POST /api/v1/reservations
#[utoipa::path(
    post,
    path = "/api/v1/reservations",
    tag = "reservations",
    request_body = ReservationRequestDto,
    responses(
        (status = 201, description = "Capacity reserved", body = ReservationDto),
        (status = 400, description = "Invalid quantities or duration", body = ApiErrorBody),
        (status = 401, description = "Unauthenticated", body = ApiErrorBody),
        (status = 409, description = "No fit or lock contention (retryable)", body = ReservationDto),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    ),
)]
pub(crate) async fn post_reservation(
    identity: CallerIdentity,
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReservationRequestDto>,
) -> Result<impl IntoResponse, ApiError> {
    let requester_id = identity.cluster_id.clone();
    let request_id = identity.request_id.clone();

    let requested = request
        .requested_resources
        .parse()
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
    if !requested.cpu.is_positive() || !requested.memory.is_positive() {
        return Err(
            ApiError::bad_request("requested CPU and memory must be greater than zero")
                .with_request_id(request_id),
        );
    }

    let priority = request.priority.unwrap_or(0);
    let duration = request
        .duration
        .as_deref()
        .map(parse_duration_span)
        .transpose()
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    // Run the decision engine on a snapshot of the advertisements.
    let target = match state
        .decision
        .select_best_cluster(&requester_id, &requested, priority)
        .await
    {
        Ok(target) => target,
        Err(e @ Error::NoSuitableCluster(_)) => {
            let dto = persist_no_fit(&state, &requester_id, requested, priority, duration, &e)
                .await
                .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
            metrics::reservation_failed();
            return Ok((StatusCode::CONFLICT, Json(dto)));
        }
        Err(e) => return Err(ApiError::from(e).with_request_id(request_id)),
    };
    let target_id = target.record.cluster_id.clone();

    // Persist the record before touching the provider so the pin exists
    // for as long as capacity may be locked.
    let mut reservation = Reservation::new(
        ReservationId::generate(&requester_id),
        requester_id.clone(),
        target_id.clone(),
        requested.clone(),
        priority,
        duration,
    );
    let version = create_reservation(&state, &mut reservation)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    match state.lock.acquire(&target_id, &requested).await {
        Ok(_) => {
            reservation.mark_reserved(format!("resources locked in cluster {target_id}"));
            metrics::reservation_reserved();
        }
        Err(e) => {
            reservation.mark_failed(format!("failed to lock resources: {e}"));
            metrics::reservation_failed();
            update_status(&state, &reservation, &version).await;
            tracing::warn!(
                reservation = %reservation.id,
                requester = %requester_id,
                target = %target_id,
                error = %e,
                "reservation failed during locking"
            );
            return Ok((StatusCode::CONFLICT, Json(ReservationDto::from(&reservation))));
        }
    }

    update_status(&state, &reservation, &version).await;

    tracing::info!(
        reservation = %reservation.id,
        requester = %requester_id,
        target = %target_id,
        cpu = %requested.cpu,
        memory = %requested.memory,
        "reservation created synchronously"
    );

    Ok((StatusCode::CREATED, Json(ReservationDto::from(&reservation))))
}

/// Persists a placement failure so the outcome is diagnosable, then hands
/// back its wire form. The record has no target and never held capacity.
async fn persist_no_fit(
    state: &AppState,
    requester_id: &str,
    requested: ResourceQuantities,
    priority: i32,
    duration: Option<std::time::Duration>,
    cause: &Error,
) -> Result<ReservationDto, Error> {
    let mut reservation = Reservation::new(
        ReservationId::generate(requester_id),
        requester_id,
        String::new(),
        requested,
        priority,
        duration,
    );
    reservation.mark_failed(format!("no suitable cluster found: {cause}"));

    let id = reservation.id.to_string();
    state.reservations.create(&id, &reservation).await?;
    tracing::warn!(
        reservation = %id,
        requester = %requester_id,
        "reservation failed: no suitable cluster"
    );
    Ok(ReservationDto::from(&reservation))
}

/// Creates the pending record, regenerating the id once if an improbable
/// collision occurs.
async fn create_reservation(state: &AppState, reservation: &mut Reservation) -> Result<String, Error> {
    match state
        .reservations
        .create(&reservation.id.to_string(), reservation)
        .await
    {
        Ok(version) => Ok(version),
        Err(Error::Conflict { .. }) => {
            reservation.id = ReservationId::generate(&reservation.requester_id);
            state
                .reservations
                .create(&reservation.id.to_string(), reservation)
                .await
        }
        Err(e) => Err(e),
    }
}

/// Writes the reservation status, logging instead of failing the request:
/// the lifecycle observer reconciles a status write that lost out.
async fn update_status(state: &AppState, reservation: &Reservation, version: &str) {
    if let Err(e) = state
        .reservations
        .update(&reservation.id.to_string(), reservation, version)
        .await
    {
        tracing::warn!(
            reservation = %reservation.id,
            error = %e,
            "failed to update reservation status; observer will reconcile"
        );
    }
}
