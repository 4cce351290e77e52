//! HTTP route handlers.

pub mod advertisements;
pub mod instructions;
pub mod reservations;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::server::AppState;

/// `/api/v1` routes (authenticated).
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/advertisements",
            post(advertisements::post_advertisement),
        )
        .route(
            "/advertisements/:cluster_id",
            get(advertisements::get_advertisement),
        )
        .route("/reservations", post(reservations::post_reservation))
        .route("/instructions", get(instructions::get_instructions))
}
