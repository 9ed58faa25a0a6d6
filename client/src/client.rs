use crate::{authority::SessionAuthority, Error, Result};
use minigame_types::{
    api::{
        CompleteSessionRequest, CompleteSessionResponse, DailyLimitsResponse, ErrorBody,
        StartSessionRequest, StartSessionResponse,
    },
    SessionId,
};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the key the authority deduplicates completions on.
const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

/// Retry policy for transient HTTP failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
    /// Whether non-idempotent requests (session start) may be retried.
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            retry_non_idempotent: false,
        }
    }
}

/// HTTP client for the session authority.
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub http_client: HttpClient,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidScheme(scheme.to_string())),
        }

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url,
            http_client,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Returns a copy of the current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub(crate) async fn get_with_retry(&self, url: Url) -> Result<reqwest::Response> {
        self.send_with_retry(true, || self.http_client.get(url.clone()))
            .await
    }

    async fn send_with_retry(
        &self,
        idempotent: bool,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let max_attempts = if idempotent || self.retry_policy.retry_non_idempotent {
            self.retry_policy.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 0usize;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            attempt += 1;
            match make_request().send().await {
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }
                    debug!(%status, attempt, "retrying authority request");
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                    debug!(?err, attempt, "retrying authority request");
                }
            }

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }

    /// Request a new session. Never retried unless `retry_non_idempotent` is set.
    pub async fn start_session(&self, request: &StartSessionRequest) -> Result<StartSessionResponse> {
        let url = self.base_url.join("sessions")?;
        debug!(%url, game_type = %request.game_type, "starting session");
        let response = self
            .send_with_retry(false, || self.http_client.post(url.clone()).json(request))
            .await?;
        decode(response).await
    }

    /// Settle a session. Safe to retry: the authority keys completions on the session id.
    pub async fn complete_session(
        &self,
        session_id: &SessionId,
        request: &CompleteSessionRequest,
    ) -> Result<CompleteSessionResponse> {
        let url = self
            .base_url
            .join(&format!("sessions/{}/complete", session_id.as_str()))?;
        debug!(%url, local_score = request.local_score, "completing session");
        let response = self
            .send_with_retry(true, || {
                self.http_client
                    .post(url.clone())
                    .header(IDEMPOTENCY_KEY, session_id.as_str())
                    .json(request)
            })
            .await?;
        decode(response).await
    }

    pub async fn daily_limits(&self) -> Result<DailyLimitsResponse> {
        let url = self.base_url.join("limits")?;
        let response = self.get_with_retry(url).await?;
        decode(response).await
    }
}

impl SessionAuthority for Client {
    async fn start_session(&self, request: StartSessionRequest) -> Result<StartSessionResponse> {
        Client::start_session(self, &request).await
    }

    async fn complete_session(
        &self,
        session_id: &SessionId,
        request: CompleteSessionRequest,
    ) -> Result<CompleteSessionResponse> {
        Client::complete_session(self, session_id, &request).await
    }

    async fn daily_limits(&self) -> Result<DailyLimitsResponse> {
        Client::daily_limits(self).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|err| {
            warn!(?err, "authority returned an undecodable body");
            Error::UnexpectedResponse
        });
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(error) => Err(Error::from_body(status, error)),
        Err(_) => Err(Error::FailedWithBody { status, body }),
    }
}

pub(crate) fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
