//! `OpenAPI` specification generation for the broker API.

use utoipa::OpenApi;

/// `OpenAPI` documentation for the broker REST API (`/api/v1/*`).
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tether Broker API",
        description = "Resource federation broker: advertisements, reservations, instructions"
    ),
    paths(
        crate::routes::advertisements::post_advertisement,
        crate::routes::advertisements::get_advertisement,
        crate::routes::reservations::post_reservation,
        crate::routes::instructions::get_instructions,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            tether_core::ResourceQuantitiesDto,
            tether_core::ResourceMetricsDto,
            tether_core::AdvertisementDto,
            tether_core::AdvertisementResponseDto,
            tether_core::ReservationRequestDto,
            tether_core::ReservationStatusDto,
            tether_core::ReservationDto,
        )
    ),
    tags(
        (name = "advertisements", description = "Cluster advertisement intake"),
        (name = "reservations", description = "Synchronous reservation dispatch"),
        (name = "instructions", description = "Provider instruction fanout"),
    ),
)]
pub struct ApiDoc;

/// Returns the generated `OpenAPI` spec.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
