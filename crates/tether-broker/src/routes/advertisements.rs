//! Advertisement intake and lookup.
//!
//! ## Routes
//!
//! - `POST /advertisements` - Store or refresh a cluster's advertisement
//! - `GET  /advertisements/{clusterID}` - Fetch a stored advertisement
//!
//! Intake preserves the broker-owned reserved component: an agent publish
//! replaces the agent-owned fields wholesale, but a reserved component
//! already persisted for the cluster survives the write. Without this, a
//! single advertisement cycle would erase outstanding reservation locks.
//!
//! The intake response piggybacks all `Reserved`-phase reservations that
//! name the publishing cluster as provider, so a provider learns about
//! fresh reservations within one advertisement cycle even if it never
//! polls.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;

use tether_core::{
    AdvertisementDto, AdvertisementResponseDto, ClusterAdvertisement, Error, ReservationDto,
    Versioned,
};

use crate::context::CallerIdentity;
use crate::error::{ApiError, ApiErrorBody};
use crate::metrics;
use crate::server::AppState;

/// Store or refresh a cluster advertisement.
///
/// POST /api/v1/advertisements
#[utoipa::path(
    post,
    path = "/api/v1/advertisements",
    tag = "advertisements",
    request_body = AdvertisementDto,
    responses(
        (status = 200, description = "Advertisement stored", body = AdvertisementResponseDto),
        (status = 400, description = "Invalid quantities", body = ApiErrorBody),
        (status = 401, description = "Unauthenticated", body = ApiErrorBody),
        (status = 403, description = "Identity mismatch", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    ),
)]
pub(crate) async fn post_advertisement(
    identity: CallerIdentity,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AdvertisementDto>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.cluster_id != identity.cluster_id {
        return Err(ApiError::from(Error::IdentityMismatch {
            advertised: payload.cluster_id.clone(),
            authenticated: identity.cluster_id.clone(),
        })
        .with_request_id(identity.request_id));
    }

    let incoming = payload
        .to_record()
        .map_err(|e| ApiError::from(e).with_request_id(identity.request_id.clone()))?;

    let stored = store_advertisement(&state, incoming)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(identity.request_id.clone()))?;

    metrics::advertisement_accepted();
    tracing::info!(
        cluster = %stored.record.cluster_id,
        available_cpu = %stored.record.resources.available.cpu,
        available_memory = %stored.record.resources.available.memory,
        "stored advertisement"
    );

    let provider_instructions = pending_provider_instructions(&state, &identity.cluster_id)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to list provider instructions for piggyback");
            Vec::new()
        });

    Ok(Json(AdvertisementResponseDto {
        advertisement: AdvertisementDto::from(&stored.record),
        provider_instructions,
    }))
}

/// Writes the incoming advertisement, preserving any persisted reserved
/// component and re-deriving availability. A conflicting concurrent write
/// (agent republish or reservation lock) is absorbed by one refetch.
async fn store_advertisement(
    state: &AppState,
    mut incoming: ClusterAdvertisement,
) -> Result<Versioned<ClusterAdvertisement>, Error> {
    let key = incoming.key();

    for attempt in 0..2 {
        match state.advertisements.try_fetch(&key).await? {
            Some(existing) => {
                if let Some(reserved) = &existing.record.resources.reserved {
                    tracing::debug!(
                        cluster = %incoming.cluster_id,
                        reserved_cpu = %reserved.cpu,
                        reserved_memory = %reserved.memory,
                        "preserving reserved component through advertisement"
                    );
                    incoming.resources.reserved = Some(reserved.clone());
                }
                incoming.resources.recompute_available();

                match state
                    .advertisements
                    .update(&key, &incoming, &existing.version)
                    .await
                {
                    Ok(version) => {
                        return Ok(Versioned {
                            record: incoming,
                            version,
                        });
                    }
                    Err(Error::Conflict { .. }) if attempt == 0 => continue,
                    Err(e) => return Err(e),
                }
            }
            None => {
                incoming.resources.recompute_available();
                match state.advertisements.create(&key, &incoming).await {
                    Ok(version) => {
                        return Ok(Versioned {
                            record: incoming,
                            version,
                        });
                    }
                    // Lost a first-create race; the record exists now, so
                    // take the overlay path.
                    Err(Error::Conflict { .. }) if attempt == 0 => continue,
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Err(Error::conflict(format!(
        "advertisement {key} kept moving during intake"
    )))
}

async fn pending_provider_instructions(
    state: &AppState,
    provider_id: &str,
) -> Result<Vec<ReservationDto>, Error> {
    let reservations = state.reservations.list().await?;
    Ok(reservations
        .iter()
        .filter(|rsv| {
            rsv.record.status.phase == tether_core::ReservationPhase::Reserved
                && rsv.record.target_cluster_id == provider_id
        })
        .map(|rsv| ReservationDto::from(&rsv.record))
        .collect())
}

/// Fetch a stored advertisement.
///
/// GET /api/v1/advertisements/{clusterID}
#[utoipa::path(
    get,
    path = "/api/v1/advertisements/{clusterID}",
    tag = "advertisements",
    params(
        ("clusterID" = String, Path, description = "Cluster id")
    ),
    responses(
        (status = 200, description = "Advertisement found", body = AdvertisementDto),
        (status = 401, description = "Unauthenticated", body = ApiErrorBody),
        (status = 404, description = "No advertisement for the cluster", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    ),
)]
pub(crate) async fn get_advertisement(
    identity: CallerIdentity,
    State(state): State<Arc<AppState>>,
    Path(cluster_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = ClusterAdvertisement::store_key(&cluster_id);
    let stored = state
        .advertisements
        .fetch(&key)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(identity.request_id))?;

    Ok(Json(AdvertisementDto::from(&stored.record)))
}
