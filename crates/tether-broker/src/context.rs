//! Caller identity extraction and authentication middleware.
//!
//! The mTLS transport is terminated in front of the broker; the verified
//! client certificate's common name reaches the core as a string in the
//! `x-forwarded-client-cn` header. In debug mode the identity may instead
//! come from `x-cluster-id` for local development and tests.
//!
//! Handlers that act on behalf of a cluster MUST take the cluster id from
//! the extracted [`CallerIdentity`], never from the request body.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ulid::Ulid;

use crate::error::ApiError;
use crate::server::AppState;

/// Header carrying the verified client certificate common name.
pub const FORWARDED_IDENTITY_HEADER: &str = "x-forwarded-client-cn";

/// Debug-mode identity header.
pub const DEBUG_IDENTITY_HEADER: &str = "x-cluster-id";

/// Header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The authenticated caller, bound per request.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    /// The caller's cluster id from the transport credentials.
    pub cluster_id: String,
    /// Request ID for tracing/correlation.
    pub request_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CallerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }

        let headers = &parts.headers;
        let request_id =
            header_string(headers, REQUEST_ID_HEADER).unwrap_or_else(|| Ulid::new().to_string());

        let identity = header_string(headers, FORWARDED_IDENTITY_HEADER).or_else(|| {
            if state.config.debug {
                header_string(headers, DEBUG_IDENTITY_HEADER)
            } else {
                None
            }
        });

        let Some(cluster_id) = identity else {
            return Err(ApiError::unauthorized("client certificate required")
                .with_request_id(request_id));
        };
        if cluster_id.trim().is_empty() {
            return Err(
                ApiError::forbidden("client certificate carries no cluster id")
                    .with_request_id(request_id),
            );
        }

        let identity = Self {
            cluster_id,
            request_id,
        };
        parts.extensions.insert(identity.clone());
        Ok(identity)
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Authentication middleware.
///
/// Runs ahead of the route handlers and injects a verified
/// [`CallerIdentity`] into request extensions; the request id is echoed on
/// the response.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let identity = match CallerIdentity::from_request_parts(&mut parts, &state).await {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };

    let mut req = Request::from_parts(parts, body);
    let request_id = identity.request_id.clone();
    req.extensions_mut().insert(identity);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}
