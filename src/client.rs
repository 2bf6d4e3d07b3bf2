//! HTTP client for the vendor geolocation service.

use crate::protocol::{self, ProtocolError};
use crate::types::{Bssid, Position};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request rejected with client error status {status}")]
    Denied { status: StatusCode },
    #[error("server returned error status {status}")]
    ServerStatus { status: StatusCode },
    #[error("request failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Identifiers per request. The service rejects payloads past an
/// undocumented size ceiling, so larger inputs are chunked.
pub const BATCH_SIZE: usize = 15;

const DEFAULT_ENDPOINT: &str = "https://gs-loc.apple.com/clls/wloc";
const USER_AGENT: &str = "locationd/1753.17 CFNetwork/889.9 Darwin/17.2.0";

/// Configuration for the locator client.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts before a batch is abandoned.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
    /// Ceiling on any single wait.
    pub max_backoff: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(15),
            max_retries: 7,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(600),
        }
    }
}

impl LocatorConfig {
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }
}

/// Client for resolving identifiers to positions.
pub struct LocatorClient {
    http: Client,
    config: LocatorConfig,
}

impl LocatorClient {
    pub fn new(config: LocatorConfig) -> Result<Self, LocatorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );

        let http = Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { http, config })
    }

    /// Resolve the given identifiers to positions.
    ///
    /// Inputs are chunked into batches of [`BATCH_SIZE`] and partial results
    /// merged. A batch whose retries are exhausted is logged and skipped so
    /// the remaining batches still resolve.
    pub async fn locate(
        &self,
        bssids: &[Bssid],
    ) -> Result<HashMap<Bssid, Position>, LocatorError> {
        let mut located = HashMap::new();

        for batch in bssids.chunks(BATCH_SIZE) {
            let request = protocol::encode_request(batch, true)?;
            match self.post_with_backoff(request).await {
                Ok(body) => located.extend(self.decode_or_empty(&body)),
                Err(err) => {
                    tracing::error!("batch of {} abandoned: {}", batch.len(), err);
                    continue;
                }
            }
        }

        Ok(located)
    }

    /// Submit one identifier and interpret the full result set as its
    /// neighborhood. This is how the explored graph grows.
    pub async fn find_nearby(
        &self,
        seed: Bssid,
    ) -> Result<HashMap<Bssid, Position>, LocatorError> {
        let request = protocol::encode_request(&[seed], false)?;
        let body = self.post_with_backoff(request).await?;
        Ok(self.decode_or_empty(&body))
    }

    /// An undecodable body counts as zero results for the batch, never a
    /// crash of the caller's loop.
    fn decode_or_empty(&self, body: &[u8]) -> HashMap<Bssid, Position> {
        match protocol::decode_response(body) {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!("treating malformed response as empty: {}", err);
                HashMap::new()
            }
        }
    }

    async fn post_with_backoff(&self, request: Vec<u8>) -> Result<Vec<u8>, LocatorError> {
        let mut delay = self.config.initial_backoff;

        for attempt in 1..=self.config.max_retries {
            match self.post_once(request.clone()).await {
                Ok(body) => return Ok(body),
                Err(err @ LocatorError::Denied { .. }) => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        "attempt {}/{} failed: {}; retrying in {:?}",
                        attempt,
                        self.config.max_retries,
                        err,
                        delay
                    );
                }
            }

            sleep(delay).await;
            delay = next_backoff(delay, self.config.max_backoff);
        }

        Err(LocatorError::RetriesExhausted {
            attempts: self.config.max_retries,
        })
    }

    async fn post_once(&self, request: Vec<u8>) -> Result<Vec<u8>, LocatorError> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .body(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            return Err(LocatorError::Denied { status });
        }
        if !status.is_success() {
            return Err(LocatorError::ServerStatus { status });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Double the wait, add uniform jitter below a tenth of it, cap at `max`.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..=current / 10);
    (current * 2 + jitter).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batching_arithmetic() {
        let bssids: Vec<Bssid> = (0..32u8).map(|i| Bssid::new([0, 0, 0, 0, 0, i])).collect();
        let sizes: Vec<usize> = bssids.chunks(BATCH_SIZE).map(|chunk| chunk.len()).collect();
        assert_eq!(sizes, vec![15, 15, 2]);
    }

    #[test]
    fn test_backoff_is_nondecreasing_and_capped() {
        let max = Duration::from_secs(600);
        let mut delay = Duration::from_secs(2);
        for _ in 0..12 {
            let next = next_backoff(delay, max);
            assert!(next >= delay);
            assert!(next <= max);
            delay = next;
        }
        assert_eq!(delay, max);
    }

    #[test]
    fn test_exhaustion_distinguishable_from_denial() {
        let exhausted = LocatorError::RetriesExhausted { attempts: 7 };
        let denied = LocatorError::Denied {
            status: StatusCode::NOT_FOUND,
        };
        assert!(matches!(
            exhausted,
            LocatorError::RetriesExhausted { attempts: 7 }
        ));
        assert!(!matches!(denied, LocatorError::RetriesExhausted { .. }));
    }
}
