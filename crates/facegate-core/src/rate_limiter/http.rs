use super::{CoordinatorStats, RateLimiter, Reservation};
use crate::error::{FaceResult, FaceServiceError};
use crate::http::{failure_from_reqwest, failure_from_response};
use crate::types::ProviderKind;
use crate::wire::{CoordinatorStatsResponse, ReserveRequest, ReserveResponse, ThrottleRequest};
use async_trait::async_trait;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Rate limiter backed by a coordinator running in another gateway process.
///
/// Talks to `{base_url}/rate-limiter/{account}/...` as served by `facegated`.
pub struct HttpRateLimiter {
    client: reqwest::Client,
    base_url: reqwest::Url,
    account: String,
}

impl HttpRateLimiter {
    pub fn new(base_url: &str, account: &str) -> FaceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FaceServiceError::Custom(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(client, base_url, account)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, account: &str) -> FaceResult<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| FaceServiceError::invalid("coordinator_url", format!("{base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(FaceServiceError::invalid("coordinator_url", "must be an http(s) base URL"));
        }
        if account.is_empty() {
            return Err(FaceServiceError::invalid("account", "must not be empty"));
        }
        Ok(Self {
            client,
            base_url,
            account: account.to_string(),
        })
    }

    /// Account names are pushed as single path segments, so `/`, `?` and `#` are escaped.
    fn url(&self, action: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("rate-limiter").push(&self.account);
            if !action.is_empty() {
                segments.push(action);
            }
        }
        url
    }

    async fn send(&self, operation: &'static str, req: reqwest::RequestBuilder) -> FaceResult<reqwest::Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| FaceServiceError::provider(ProviderKind::Remote, operation, failure_from_reqwest(&e)))?;
        if !resp.status().is_success() {
            let failure = failure_from_response(resp).await;
            return Err(FaceServiceError::provider(ProviderKind::Remote, operation, failure));
        }
        Ok(resp)
    }

    /// Ledger snapshot from the remote coordinator.
    pub async fn stats(&self) -> FaceResult<CoordinatorStats> {
        let resp = self.send("rate_limiter_stats", self.client.get(self.url(""))).await?;
        let body: CoordinatorStatsResponse = resp.json().await.map_err(|e| {
            FaceServiceError::provider(ProviderKind::Remote, "rate_limiter_stats", failure_from_reqwest(&e))
        })?;
        Ok(CoordinatorStats {
            interval_ms: body.interval_ms,
            pending_ms: body.pending_ms,
            throttle_events: body.throttle_events,
            throttle_penalty_ms: body.throttle_penalty_ms,
        })
    }
}

#[async_trait]
impl RateLimiter for HttpRateLimiter {
    async fn reserve_batch(&self, count: u32) -> FaceResult<Reservation> {
        let req = self
            .client
            .post(self.url("reserve"))
            .json(&ReserveRequest { count: count.max(1) });
        let resp = self.send("reserve_batch", req).await?;
        let body: ReserveResponse = resp.json().await.map_err(|e| {
            FaceServiceError::provider(ProviderKind::Remote, "reserve_batch", failure_from_reqwest(&e))
        })?;
        Ok(Reservation {
            delay: Duration::from_millis(body.delay_ms),
            interval: Duration::from_millis(body.interval_ms),
        })
    }

    async fn report_throttle(&self, extra: Duration) -> FaceResult<()> {
        let req = self.client.post(self.url("throttle")).json(&ThrottleRequest {
            delay_ms: extra.as_millis() as u64,
        });
        self.send("report_throttle", req).await?;
        Ok(())
    }
}
