//! HTTP transport to the broker.
//!
//! [`BrokerTransport`] is the seam the agent loops talk through;
//! [`BrokerClient`] is its mTLS HTTP implementation. The client loads its
//! identity from `{cert_path}/tls.crt` + `tls.key` and pins the broker's
//! CA from `{cert_path}/ca.crt`; without a cert path it speaks plain
//! HTTP and identifies via the broker's debug header.
//!
//! 5xx responses are retried with exponential backoff (the broker may be
//! mid-rollout); 4xx responses are surfaced immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use tether_core::{
    AdvertisementDto, AdvertisementResponseDto, Error, ReservationDto, ReservationRequestDto,
    Result,
};

use crate::config::AgentConfig;

/// Base backoff for 5xx retries.
const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Backoff ceiling for 5xx retries.
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(16);

/// Retry budget for 5xx responses and connection failures.
const MAX_RETRIES: u32 = 3;

/// The agent's view of the broker.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Publishes an advertisement; returns piggybacked provider
    /// instructions.
    async fn publish_advertisement(
        &self,
        advertisement: &AdvertisementDto,
    ) -> Result<Vec<ReservationDto>>;

    /// Places a synchronous reservation and returns the instruction.
    async fn request_reservation(
        &self,
        request: &ReservationRequestDto,
    ) -> Result<ReservationDto>;

    /// Pulls pending provider instructions for this cluster.
    async fn fetch_instructions(&self) -> Result<Vec<ReservationDto>>;

    /// Checks broker liveness.
    async fn ping(&self) -> Result<()>;
}

/// mTLS HTTP implementation of [`BrokerTransport`].
pub struct BrokerClient {
    client: reqwest::Client,
    base_url: String,
    cluster_id: String,
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("base_url", &self.base_url)
            .field("cluster_id", &self.cluster_id)
            .finish_non_exhaustive()
    }
}

impl BrokerClient {
    /// Creates a client from the agent configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when certificates cannot be loaded
    /// or the HTTP client cannot be built.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .use_rustls_tls();

        if let Some(cert_path) = &config.cert_path {
            let cert = std::fs::read(cert_path.join("tls.crt"))
                .map_err(|e| Error::InvalidInput(format!("read tls.crt: {e}")))?;
            let key = std::fs::read(cert_path.join("tls.key"))
                .map_err(|e| Error::InvalidInput(format!("read tls.key: {e}")))?;
            let ca = std::fs::read(cert_path.join("ca.crt"))
                .map_err(|e| Error::InvalidInput(format!("read ca.crt: {e}")))?;

            let mut identity_pem = cert;
            identity_pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&identity_pem)
                .map_err(|e| Error::InvalidInput(format!("client identity: {e}")))?;
            let ca = reqwest::Certificate::from_pem(&ca)
                .map_err(|e| Error::InvalidInput(format!("broker CA: {e}")))?;

            builder = builder.identity(identity).add_root_certificate(ca);
        } else {
            tracing::warn!("no cert path configured; using debug identity header");
        }

        let client = builder
            .build()
            .map_err(|e| Error::InvalidInput(format!("build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.broker_url.trim_end_matches('/').to_string(),
            cluster_id: config.cluster_id.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn apply_identity(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        // Ignored by the broker outside debug mode, where the terminating
        // front forwards the certificate identity instead.
        request.header("x-cluster-id", &self.cluster_id)
    }

    /// Sends with bounded retry on connection failures and 5xx.
    async fn send_with_retry(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut backoff = RETRY_BACKOFF_BASE;

        for attempt in 0..=MAX_RETRIES {
            let Some(cloned) = request.try_clone() else {
                return Err(Error::internal("request body is not replayable"));
            };

            match cloned.send().await {
                Ok(response) if !response.status().is_server_error() => return Ok(response),
                Ok(response) if attempt == MAX_RETRIES => {
                    return Err(Error::storage(format!(
                        "broker returned {} after {MAX_RETRIES} retries",
                        response.status()
                    )));
                }
                Ok(response) => {
                    tracing::debug!(status = %response.status(), attempt, "retrying on server error");
                }
                Err(e) if attempt == MAX_RETRIES => {
                    return Err(Error::storage_with_source("broker unreachable", e));
                }
                Err(e) => {
                    tracing::debug!(error = %e, attempt, "retrying on connection failure");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
        }

        Err(Error::storage("broker unreachable"))
    }

    /// Maps a non-success response to the matching error kind.
    async fn error_from_response(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::BAD_REQUEST => Error::InvalidInput(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthenticated(body),
            StatusCode::NOT_FOUND => Error::not_found("record", body),
            StatusCode::CONFLICT => Error::Conflict { message: body },
            _ => Error::storage(format!("broker returned {status}: {body}")),
        }
    }
}

#[async_trait]
impl BrokerTransport for BrokerClient {
    /// Publishes with reserved-component preservation: the broker's view
    /// of this cluster is fetched first and any broker-held reserved
    /// quantities are copied onto the outgoing payload, mirroring the
    /// broker-side preservation in intake.
    async fn publish_advertisement(
        &self,
        advertisement: &AdvertisementDto,
    ) -> Result<Vec<ReservationDto>> {
        let mut outgoing = advertisement.clone();

        let get = self
            .apply_identity(self.client.get(self.url(&format!(
                "/api/v1/advertisements/{}",
                advertisement.cluster_id
            ))))
            .send()
            .await;
        match get {
            Ok(response) if response.status() == StatusCode::OK => {
                if let Ok(existing) = response.json::<AdvertisementDto>().await {
                    if let Some(reserved) = existing.resources.reserved {
                        tracing::debug!(
                            cpu = %reserved.cpu,
                            memory = %reserved.memory,
                            "carrying broker-held reserved quantities on publish"
                        );
                        outgoing.resources.reserved = Some(reserved);
                    }
                }
            }
            Ok(_) | Err(_) => {
                // First publish, or the broker's copy is unreadable; the
                // intake path preserves its own stored value regardless.
            }
        }

        let response = self
            .send_with_retry(
                self.apply_identity(self.client.post(self.url("/api/v1/advertisements")))
                    .json(&outgoing),
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        match response.json::<AdvertisementResponseDto>().await {
            Ok(body) => {
                tracing::info!(
                    cluster = %advertisement.cluster_id,
                    instructions = body.provider_instructions.len(),
                    "advertisement published"
                );
                Ok(body.provider_instructions)
            }
            Err(e) => {
                // The advertisement landed; only the piggyback was lost.
                tracing::warn!(error = %e, "could not decode advertisement response");
                Ok(Vec::new())
            }
        }
    }

    async fn request_reservation(
        &self,
        request: &ReservationRequestDto,
    ) -> Result<ReservationDto> {
        let response = self
            .send_with_retry(
                self.apply_identity(self.client.post(self.url("/api/v1/reservations")))
                    .json(request),
            )
            .await?;

        if !(response.status() == StatusCode::CREATED || response.status() == StatusCode::OK) {
            return Err(Self::error_from_response(response).await);
        }

        let reservation: ReservationDto = response
            .json()
            .await
            .map_err(|e| Error::Serialization {
                message: format!("decode reservation response: {e}"),
            })?;

        tracing::info!(
            reservation = %reservation.id,
            target = %reservation.target_cluster_id,
            "reservation placed synchronously"
        );
        Ok(reservation)
    }

    async fn fetch_instructions(&self) -> Result<Vec<ReservationDto>> {
        let response = self
            .apply_identity(self.client.get(self.url("/api/v1/instructions")))
            .send()
            .await
            .map_err(|e| Error::storage_with_source("fetch instructions", e))?;

        if response.status() != StatusCode::OK {
            return Err(Self::error_from_response(response).await);
        }

        response.json().await.map_err(|e| Error::Serialization {
            message: format!("decode instructions: {e}"),
        })
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("/healthz"))
            .send()
            .await
            .map_err(|e| Error::storage_with_source("ping broker", e))?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(Error::storage(format!(
                "broker liveness returned {}",
                response.status()
            )))
        }
    }
}
