//! Error taxonomy for the trading pipeline
//!
//! Each variant carries its recovery policy: `Auth` and `Transient` are
//! retried with backoff, `Rejected` is terminal, `UnknownOutcome` must be
//! reconciled via a status query and is never blindly retried.

use thiserror::Error;

/// Errors surfaced by the brokerage API gateway.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Credential rejected or expired. Recoverable by renewing the token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The broker reported a rate-limit breach. The local limiter should
    /// make this impossible, so seeing it is a bug signal.
    #[error("broker rate limit exceeded: {0}")]
    RateLimited(String),

    /// Connection failures, 5xx responses, timeouts outside order submission.
    #[error("transient network error: {0}")]
    Transient(String),

    /// Business-logic rejection from the broker. Never retried.
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// Order submission timed out; the order may or may not have executed.
    /// Resolved by polling order status, never by resubmitting.
    #[error("order outcome unknown: {0}")]
    UnknownOutcome(String),

    /// The broker response could not be decoded.
    #[error("failed to decode broker response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether the gateway retry loop may attempt this request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Auth(_) | ApiError::Transient(_) | ApiError::RateLimited(_)
        )
    }
}

/// Top-level error type for pipeline components.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Local risk check rejected the order before submission.
    #[error("risk check rejected order: {0}")]
    RiskRejected(String),

    #[error("strategy error: {0}")]
    Strategy(String),

    /// Invalid configuration. Fatal at startup, never recovered at runtime.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ApiError::Auth("401".into()).is_retryable());
        assert!(ApiError::Transient("connect".into()).is_retryable());
        assert!(ApiError::RateLimited("429".into()).is_retryable());
        assert!(!ApiError::Rejected("insufficient funds".into()).is_retryable());
        assert!(!ApiError::UnknownOutcome("timeout".into()).is_retryable());
    }
}
