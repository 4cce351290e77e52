//! Broker server implementation.
//!
//! Wires the state store, decision engine, lock helper and lifecycle
//! observer behind the HTTP surface. `/healthz` is the single
//! unauthenticated endpoint; everything under `/api/v1` goes through the
//! identity middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use tether_core::{
    MemoryStore, Result, StateStore,
    store::{self, AdvertisementStore, ReservationStore},
};

use crate::config::Config;
use crate::decision::DecisionEngine;
use crate::lifecycle::LifecycleObserver;
use crate::locking::ReservationLock;

/// Shared application state for all request handlers.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Advertisement records.
    pub advertisements: AdvertisementStore,
    /// Reservation records.
    pub reservations: ReservationStore,
    /// Provider selection.
    pub decision: DecisionEngine,
    /// Reserved-field locking.
    pub lock: ReservationLock,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates application state over the given state store.
    #[must_use]
    pub fn new(config: Config, backend: Arc<dyn StateStore>) -> Self {
        let advertisements = store::advertisements(Arc::clone(&backend), &config.namespace);
        let reservations = store::reservations(backend, &config.namespace);
        let decision = DecisionEngine::new(advertisements.clone());
        let lock = ReservationLock::new(advertisements.clone(), config.lock_retries);
        Self {
            config,
            advertisements,
            reservations,
            decision,
            lock,
        }
    }

    /// Creates application state with in-memory storage (for testing).
    #[must_use]
    pub fn with_memory_store(config: Config) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Builds the lifecycle observer matching this state.
    #[must_use]
    pub fn lifecycle_observer(&self) -> LifecycleObserver {
        LifecycleObserver::new(
            self.advertisements.clone(),
            self.reservations.clone(),
            self.lock.clone(),
            self.config.stale_after,
            self.config.observer_interval.max(std::time::Duration::from_secs(1)) * 2,
        )
    }
}

/// Liveness endpoint; deliberately shallow and unauthenticated.
async fn healthz() -> &'static str {
    "ok"
}

/// The broker HTTP server.
pub struct Server {
    config: Config,
    backend: Arc<dyn StateStore>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server over in-memory storage; use
    /// [`Server::with_state_store`] for production.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            backend: Arc::new(MemoryStore::new()),
        }
    }

    /// Creates a server with an explicit state store.
    #[must_use]
    pub fn with_state_store(config: Config, backend: Arc<dyn StateStore>) -> Self {
        Self { config, backend }
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn create_router(&self) -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::new(
            self.config.clone(),
            Arc::clone(&self.backend),
        ));

        let auth_layer =
            middleware::from_fn_with_state(Arc::clone(&state), crate::context::auth_middleware);

        let router = Router::new()
            .route("/healthz", get(healthz))
            .route(
                "/openapi.json",
                get(|| async { axum::Json(crate::openapi::openapi()) }),
            )
            .nest("/api/v1", crate::routes::api_v1_routes().layer(auth_layer))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&state));

        (router, state)
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid configuration or when binding fails.
    pub async fn serve(&self) -> Result<()> {
        self.config.validate()?;
        crate::metrics::register_metrics();

        let (router, state) = self.create_router();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        if self.config.observer_interval.is_zero() {
            tracing::warn!("lifecycle observer disabled (TETHER_OBSERVER_INTERVAL=0)");
            drop(shutdown_rx);
        } else {
            let observer = state.lifecycle_observer();
            let interval = self.config.observer_interval;
            tokio::spawn(observer.run(interval, shutdown_rx));
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        tracing::info!(port = self.config.http_port, "starting Tether broker");

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            tether_core::Error::Internal {
                message: format!("failed to bind to {addr}: {e}"),
            }
        })?;

        let result = axum::serve(listener, router)
            .await
            .map_err(|e| tether_core::Error::Internal {
                message: format!("server error: {e}"),
            });

        let _ = shutdown_tx.send(());
        result
    }

    /// Creates a test router wired to this server's state store.
    ///
    /// Intended for integration tests driving routes without binding a
    /// port; the lifecycle observer is not started.
    #[doc(hidden)]
    #[must_use]
    pub fn test_router(&self) -> Router {
        self.create_router().0
    }

    /// Returns application state over this server's store, for tests that
    /// inspect records behind the routes.
    #[doc(hidden)]
    #[must_use]
    pub fn test_state(&self) -> Arc<AppState> {
        Arc::new(AppState::new(
            self.config.clone(),
            Arc::clone(&self.backend),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn debug_server() -> Server {
        Server::new(Config {
            debug: true,
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn healthz_needs_no_identity() {
        let router = debug_server().test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 16).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn api_routes_reject_anonymous_callers() {
        let router = debug_server().test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/instructions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn empty_forwarded_identity_is_forbidden() {
        let router = debug_server().test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/instructions")
                    .header(crate::context::FORWARDED_IDENTITY_HEADER, "  ")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn debug_header_is_ignored_outside_debug() {
        let server = Server::new(Config {
            debug: false,
            cert_path: Some("/etc/tether/certs".into()),
            ..Config::default()
        });
        let router = server.test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/instructions")
                    .header(crate::context::DEBUG_IDENTITY_HEADER, "c1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let router = debug_server().test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(doc["paths"].get("/api/v1/reservations").is_some());
    }
}
