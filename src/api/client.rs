//! Kiwoom REST API Client
//!
//! HTTP client with token-based authentication, sliding-window rate
//! limiting, and bounded retries with exponential backoff and jitter.
//!
//! Classification rules: 401 is an auth failure (renew and retry once per
//! attempt budget), 429 should never happen while the local limiter is
//! correct and is logged as a bug signal, 5xx and connection failures are
//! transient, and a timeout during order submission is an unknown outcome
//! that the coordinator reconciles via a status query.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::auth::{Credential, TokenManager, TokenSource};
use super::models::{
    AccountBalance, BarsResponse, Holding, HoldingsResponse, OhlcvBar, OrderRequest,
    OrderResponse, TokenRequest, TokenResponse,
};
use super::rate_limiter::RateLimiter;
use super::BrokerApi;
use crate::config::ApiConfig;
use crate::error::ApiError;

/// Whether a request is an order submission. Submission timeouts are
/// classified differently because the order may already have executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Query,
    OrderSubmission,
}

/// Kiwoom API client with automatic token management
pub struct KiwoomClient {
    http: Client,
    config: ApiConfig,
    tokens: TokenManager,
    limiter: RateLimiter,
}

impl KiwoomClient {
    pub fn new(config: ApiConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        let tokens = TokenManager::new(config.token_refresh_margin_secs);
        let limiter = RateLimiter::per_second(config.rate_limit_per_sec);
        Self {
            http,
            config,
            tokens,
            limiter,
        }
    }

    /// Retry loop around [`Self::attempt`]. Retryable failures get
    /// exponential backoff with jitter; everything else returns immediately.
    async fn request<T, R>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
        kind: RequestKind,
    ) -> Result<R, ApiError>
    where
        T: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries {
            match self.attempt(method.clone(), path, body, kind).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    if matches!(err, ApiError::RateLimited(_)) {
                        warn!(%err, "broker reported a rate-limit breach the local limiter should prevent");
                    }
                    if matches!(err, ApiError::Auth(_)) {
                        self.tokens.invalidate().await;
                    }
                    if attempt < self.config.max_retries {
                        let delay = self.backoff_delay(attempt);
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            %err,
                            "request failed, backing off before retry"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ApiError::Transient(format!("{path}: retry budget exhausted"))))
    }

    /// One authenticated attempt. Acquires a rate-limit slot first; a retry
    /// consumes another slot.
    async fn attempt<T, R>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
        kind: RequestKind,
    ) -> Result<R, ApiError>
    where
        T: Serialize + Sync,
        R: DeserializeOwned,
    {
        self.limiter.acquire().await;
        let token = self.tokens.access_token(self).await?;

        let url = format!("{}{}", self.config.base_url, path);
        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&token)
            .header("appkey", &self.config.app_key)
            .header("appsecret", &self.config.app_secret);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Err(classify_send_error(&err, kind)),
        };

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body_text, kind));
        }

        serde_json::from_str(&body_text).map_err(|err| ApiError::Decode(format!("{path}: {err}")))
    }

    /// Exponential backoff with jitter: base * 2^(attempt-1) plus up to half
    /// a base of random slack.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_ms.max(1);
        let exponential = base.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(6));
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(exponential + jitter)
    }
}

#[async_trait]
impl TokenSource for KiwoomClient {
    /// Issue a fresh token. Goes through the rate limiter like every other
    /// TR request, but not through the bearer-auth path.
    async fn fetch_credential(&self) -> Result<Credential, ApiError> {
        self.limiter.acquire().await;

        let request =
            TokenRequest::client_credentials(&self.config.app_key, &self.config.app_secret);
        let response = self
            .http
            .post(format!("{}/oauth2/token", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|err| classify_send_error(&err, RequestKind::Query))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body, RequestKind::Query));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))?;
        Ok(Credential::new(token.access_token, token.expires_in))
    }
}

#[async_trait]
impl BrokerApi for KiwoomClient {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, ApiError> {
        info!(
            symbol = %request.symbol,
            side = %request.side,
            quantity = request.quantity,
            order_type = %request.order_type,
            correlation_id = %request.client_order_id,
            "submitting order"
        );
        let response: OrderResponse = self
            .request(
                Method::POST,
                "/api/v1/orders",
                Some(request),
                RequestKind::OrderSubmission,
            )
            .await?;
        info!(order_id = %response.order_id, status = %response.status, "order submitted");
        Ok(response)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderResponse, ApiError> {
        debug!(%order_id, "querying order status");
        self.request(
            Method::GET,
            &format!("/api/v1/orders/{order_id}"),
            None::<&()>,
            RequestKind::Query,
        )
        .await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ApiError> {
        debug!(%order_id, "canceling order");
        let _: serde_json::Value = self
            .request(
                Method::DELETE,
                &format!("/api/v1/orders/{order_id}"),
                None::<&()>,
                RequestKind::Query,
            )
            .await?;
        Ok(())
    }

    async fn fetch_holdings(&self) -> Result<Vec<Holding>, ApiError> {
        debug!("fetching holdings");
        let response: HoldingsResponse = self
            .request(
                Method::GET,
                &format!("/api/v1/accounts/{}/positions", self.config.account_number),
                None::<&()>,
                RequestKind::Query,
            )
            .await?;
        debug!(count = response.positions.len(), "holdings fetched");
        Ok(response.positions)
    }

    async fn fetch_bars(&self, symbol: &str, count: usize) -> Result<Vec<OhlcvBar>, ApiError> {
        let response: BarsResponse = self
            .request(
                Method::GET,
                &format!("/api/v1/market/ohlcv/{symbol}?interval=1D&count={count}"),
                None::<&()>,
                RequestKind::Query,
            )
            .await?;
        Ok(response.bars)
    }

    async fn account_balance(&self) -> Result<AccountBalance, ApiError> {
        self.request(
            Method::GET,
            &format!("/api/v1/accounts/{}/balance", self.config.account_number),
            None::<&()>,
            RequestKind::Query,
        )
        .await
    }
}

fn classify_send_error(err: &reqwest::Error, kind: RequestKind) -> ApiError {
    if err.is_timeout() {
        if kind == RequestKind::OrderSubmission {
            // The broker may have executed the order before the response was
            // lost. Resubmitting would risk a duplicate fill.
            return ApiError::UnknownOutcome(format!("submission timed out: {err}"));
        }
        return ApiError::Transient(format!("request timed out: {err}"));
    }
    ApiError::Transient(err.to_string())
}

fn classify_status(status: StatusCode, body: &str, kind: RequestKind) -> ApiError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Auth(format!("{status}: {message}"))
        }
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(message),
        s if s.is_server_error() => ApiError::Transient(format!("{status}: {message}")),
        _ if kind == RequestKind::OrderSubmission => ApiError::Rejected(message),
        _ => ApiError::Rejected(format!("{status}: {message}")),
    }
}
