//! The process-lifetime state every request handler shares: one
//! `UpstreamProvider` singleton per configured provider, the system-prompt
//! manager, and the startup config. No database, no per-user state — this
//! gateway keeps none (spec §1 Non-goals).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gproxy_provider_core::UpstreamProvider;

use crate::config::{GlobalConfig, ProviderKind};
use crate::prompt_log::PromptLogger;
use crate::system_prompt::SystemPromptManager;

pub struct AppState {
    pub global: GlobalConfig,
    pub providers: HashMap<ProviderKind, Arc<dyn UpstreamProvider>>,
    pub system_prompt: SystemPromptManager,
    pub prompt_log: PromptLogger,
}

impl AppState {
    pub fn provider(&self, kind: ProviderKind) -> Option<Arc<dyn UpstreamProvider>> {
        self.providers.get(&kind).cloned()
    }

    /// The provider a request should use: the override if one resolved,
    /// otherwise the configured default.
    pub fn resolve_provider(&self, override_kind: Option<ProviderKind>) -> ProviderKind {
        override_kind.unwrap_or(self.global.default_provider)
    }
}

/// §4.4: a single background task that wakes every `cron_near_minutes`
/// and calls `refresh_token_if_near_expiry` on every initialized
/// provider. Each adapter's own single-flight lock makes this safe to run
/// concurrently with in-flight requests that trigger their own refresh.
pub fn spawn_background_refresh(state: Arc<AppState>) {
    if !state.global.cron_refresh_token {
        return;
    }
    let interval = Duration::from_secs(state.global.cron_near_minutes.max(1) * 60);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            for (kind, provider) in &state.providers {
                if let Err(err) = provider.refresh_token_if_near_expiry().await {
                    tracing::warn!(provider = kind.as_path_segment(), error = %err, "background token refresh failed");
                }
            }
        }
    });
}
