//! Bearer credential management with single-flight renewal
//!
//! The token is renewed proactively once it comes within the configured
//! safety margin of expiry, never reactively after a request already failed
//! with a stale token (an auth failure still invalidates as a fallback).
//! Renewal is serialized: the first caller to observe staleness fetches a
//! fresh credential while everyone else waits on the same lock and then
//! reads the renewed token.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ApiError;

/// An issued access token with its validity window.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(access_token: String, lifetime_secs: i64) -> Self {
        let issued_at = Utc::now();
        Self {
            access_token,
            issued_at,
            expires_at: issued_at + Duration::seconds(lifetime_secs),
        }
    }

    /// Usable only while outside the safety margin of expiry.
    pub fn is_valid(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        now < self.expires_at - margin
    }
}

/// Source of fresh credentials. Implemented over HTTP by the gateway and by
/// counting fakes in tests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_credential(&self) -> Result<Credential, ApiError>;
}

/// Owns the current credential and serializes renewal.
pub struct TokenManager {
    current: Mutex<Option<Credential>>,
    margin: Duration,
}

impl TokenManager {
    pub fn new(margin_secs: i64) -> Self {
        Self {
            current: Mutex::new(None),
            margin: Duration::seconds(margin_secs),
        }
    }

    /// Return a token valid for immediate use, renewing first if the cached
    /// one is absent, expired, or within the safety margin.
    pub async fn access_token(&self, source: &dyn TokenSource) -> Result<String, ApiError> {
        let mut current = self.current.lock().await;

        if let Some(credential) = current.as_ref() {
            if credential.is_valid(self.margin, Utc::now()) {
                return Ok(credential.access_token.clone());
            }
            debug!("access token inside refresh margin, renewing");
        } else {
            debug!("no access token cached, fetching one");
        }

        let credential = source.fetch_credential().await?;
        info!(expires_at = %credential.expires_at, "access token renewed");
        let token = credential.access_token.clone();
        *current = Some(credential);
        Ok(token)
    }

    /// Drop the cached credential so the next caller renews. Used when the
    /// broker rejects a token the margin check still considered valid.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        fetches: AtomicUsize,
        lifetime_secs: i64,
    }

    impl CountingSource {
        fn new(lifetime_secs: i64) -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                lifetime_secs,
            }
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch_credential(&self) -> Result<Credential, ApiError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            // Simulated network latency so concurrent callers overlap.
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(Credential::new(format!("token-{n}"), self.lifetime_secs))
        }
    }

    #[test]
    fn test_credential_respects_safety_margin() {
        let credential = Credential::new("t".into(), 3600);
        let now = Utc::now();

        assert!(credential.is_valid(Duration::seconds(300), now));
        // Within the margin of expiry the credential must not be used.
        assert!(!credential.is_valid(Duration::seconds(300), now + Duration::seconds(3301)));
        assert!(!credential.is_valid(Duration::seconds(300), now + Duration::seconds(7200)));
    }

    #[tokio::test]
    async fn test_concurrent_stale_callers_renew_exactly_once() {
        let manager = Arc::new(TokenManager::new(300));
        let source = Arc::new(CountingSource::new(3600));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let source = Arc::clone(&source);
            handles.push(tokio::spawn(async move {
                manager.access_token(source.as_ref()).await.unwrap()
            }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap());
        }

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == "token-0"));
    }

    #[tokio::test]
    async fn test_expired_token_triggers_renewal() {
        let manager = TokenManager::new(300);
        // Lifetime shorter than the margin, so it is stale immediately.
        let source = CountingSource::new(60);

        manager.access_token(&source).await.unwrap();
        manager.access_token(&source).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_renewal() {
        let manager = TokenManager::new(300);
        let source = CountingSource::new(3600);

        let first = manager.access_token(&source).await.unwrap();
        let cached = manager.access_token(&source).await.unwrap();
        assert_eq!(first, cached);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        manager.invalidate().await;
        let renewed = manager.access_token(&source).await.unwrap();
        assert_ne!(first, renewed);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }
}
