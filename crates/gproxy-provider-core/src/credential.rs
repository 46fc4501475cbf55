//! The shared OAuth-token concurrency primitive every bearer-token
//! provider adapter (Gemini-CLI, Kiro) builds its `refreshTokenIfNearExpiry`
//! around: a read-mostly token behind an `RwLock`, and a refresh-lock that
//! guarantees at most one refresh in flight per provider even when many
//! concurrent requests all notice the token is near expiry at once.
//!
//! Static-key providers (the generic OpenAI-compatible endpoint, Claude
//! via a bearer key) don't need this — their credential is just a string
//! with no lifecycle, so they hold it directly rather than through a
//! `TokenCell`.

use std::future::Future;

use tokio::sync::{Mutex, RwLock};

use crate::errors::{ProviderError, ProviderResult};

/// The bearer token and the metadata needed to decide when it must be
/// refreshed. `refresh_token` is provider-specific opaque material (an
/// OAuth2 refresh token for Gemini-CLI, an SSO refresh token for Kiro).
#[derive(Debug, Clone)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

pub struct TokenCell {
    state: RwLock<TokenState>,
    refresh_lock: Mutex<()>,
}

impl TokenCell {
    pub fn new(state: TokenState) -> Self {
        Self {
            state: RwLock::new(state),
            refresh_lock: Mutex::new(()),
        }
    }

    pub async fn access_token(&self) -> String {
        self.state.read().await.access_token.clone()
    }

    pub async fn snapshot(&self) -> TokenState {
        self.state.read().await.clone()
    }

    pub async fn is_near_expiry(&self, skew_secs: i64) -> bool {
        let now = gproxy_common::unix_now();
        self.state.read().await.expires_at - now <= skew_secs
    }

    /// Refreshes the token if it's within `skew_secs` of expiry, using
    /// `refresh` to talk to the provider's token endpoint. Holding the
    /// refresh lock for the whole check-then-act window is what makes this
    /// single-flight: a second caller that loses the race to acquire the
    /// lock will find, once it gets the lock, that an earlier caller
    /// already refreshed and skip the network call entirely.
    pub async fn refresh_if_near_expiry<F, Fut>(
        &self,
        skew_secs: i64,
        refresh: F,
    ) -> ProviderResult<()>
    where
        F: FnOnce(TokenState) -> Fut,
        Fut: Future<Output = ProviderResult<TokenState>>,
    {
        let _guard = self.refresh_lock.lock().await;
        if !self.is_near_expiry(skew_secs).await {
            return Ok(());
        }
        let current = self.snapshot().await;
        let refreshed = refresh(current).await?;
        let mut state = self.state.write().await;
        *state = refreshed;
        Ok(())
    }

    pub async fn force_set(&self, state: TokenState) {
        let _guard = self.refresh_lock.lock().await;
        *self.state.write().await = state;
    }
}

/// A static API key with no lifecycle — the shape static-key providers use
/// in place of `TokenCell`.
#[derive(Debug, Clone)]
pub struct ApiKeyCredential {
    pub key: String,
}

impl ApiKeyCredential {
    pub fn new(key: impl Into<String>) -> ProviderResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ProviderError::MissingCredentialField("api_key"));
        }
        Ok(Self { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(expires_in: i64) -> TokenState {
        TokenState {
            access_token: "tok".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: gproxy_common::unix_now() + expires_in,
        }
    }

    #[tokio::test]
    async fn skips_refresh_when_far_from_expiry() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let cell = TokenCell::new(state(3600));
        let called = Arc::new(AtomicBool::new(false));
        let called_inner = called.clone();
        cell.refresh_if_near_expiry(60, move |_| {
            called_inner.store(true, Ordering::SeqCst);
            async move { Ok(state(3600)) }
        })
        .await
        .unwrap();
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn refreshes_when_near_expiry() {
        let cell = TokenCell::new(state(10));
        cell.refresh_if_near_expiry(60, |_| async { Ok(state(3600)) })
            .await
            .unwrap();
        assert!(!cell.is_near_expiry(60).await);
    }

    #[tokio::test]
    async fn concurrent_refreshes_single_flight() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let cell = Arc::new(TokenCell::new(state(5)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cell = cell.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cell.refresh_if_near_expiry(60, |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(state(3600)) }
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
