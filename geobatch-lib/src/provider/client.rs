//! HTTP geocoding client.
//!
//! One GET per key against the configured endpoint, with the place name
//! URL-escaped into a query parameter and the whole cycle bounded by a
//! per-request timeout.

use crate::error::{GeobatchError, GeocodeFailure};
use crate::provider::payload::extract_coordinate;
use crate::provider::Geocoder;
use crate::types::{Coordinate, LocationKey, PayloadFormat, RunConfig};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Geocoding client for a single provider endpoint.
#[derive(Clone)]
pub struct GeocodeClient {
    /// HTTP client shared by all requests of a run
    http_client: reqwest::Client,
    /// Endpoint without query string
    base_url: String,
    /// Query parameter carrying the place name
    query_param: String,
    api_key: Option<String>,
    format: PayloadFormat,
    /// Upper bound for one request/response cycle
    timeout: Duration,
}

impl GeocodeClient {
    /// Create a client from run settings.
    pub fn with_config(config: &RunConfig) -> Result<Self, GeobatchError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout + Duration::from_secs(1)) // outer timeout fires first
            .user_agent(format!("geobatch/{}", crate::VERSION))
            .build()
            .map_err(|e| {
                GeobatchError::internal(format!("Failed to create geocoding HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
            query_param: config.query_param.clone(),
            api_key: config.api_key.clone(),
            format: config.format,
            timeout: config.timeout,
        })
    }

    /// Resolve one place name to coordinates.
    ///
    /// # Errors
    ///
    /// - `Transport` when no response arrives: connect failure, reset,
    ///   unreadable body, or the per-request timeout
    /// - `Protocol` for non-2xx statuses and unexpected payloads
    /// - `EmptyResult` when the provider found nothing usable
    pub async fn resolve_key(&self, key: &LocationKey) -> Result<Coordinate, GeocodeFailure> {
        let start_time = Instant::now();

        let result = tokio::time::timeout(self.timeout, self.make_request(key)).await;

        let elapsed = start_time.elapsed();
        match result {
            Ok(outcome) => {
                match &outcome {
                    Ok(coordinate) => debug!(
                        key = %key,
                        lon = coordinate.longitude,
                        lat = coordinate.latitude,
                        ?elapsed,
                        "resolved"
                    ),
                    Err(failure) => debug!(key = %key, %failure, ?elapsed, "resolution failed"),
                }
                outcome
            }
            Err(_) => {
                debug!(key = %key, timeout = ?self.timeout, "request timed out");
                Err(GeocodeFailure::transport(format!(
                    "no response within {:?}",
                    self.timeout
                )))
            }
        }
    }

    async fn make_request(&self, key: &LocationKey) -> Result<Coordinate, GeocodeFailure> {
        let mut request = self
            .http_client
            .get(&self.base_url)
            .query(&[(self.query_param.as_str(), key.as_str())]);
        if let Some(api_key) = &self.api_key {
            request = request.query(&[("key", api_key.as_str())]);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeFailure::protocol_with_status(
                format!("provider returned {}", status),
                status.as_u16(),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GeocodeFailure::transport(format!("failed to read body: {}", e)))?;

        extract_coordinate(&body, self.format)
    }
}

impl Geocoder for GeocodeClient {
    fn resolve(
        &self,
        key: &LocationKey,
    ) -> impl Future<Output = Result<Coordinate, GeocodeFailure>> + Send {
        self.resolve_key(key)
    }
}
