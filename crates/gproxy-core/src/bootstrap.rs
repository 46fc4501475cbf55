//! Turns a parsed `GlobalConfig` into a running `AppState`: builds the
//! shared HTTP client, constructs whichever provider adapters have
//! credentials configured, and wires the system-prompt manager.

use std::collections::HashMap;
use std::sync::Arc;

use gproxy_provider_core::UpstreamProvider;
use gproxy_provider_impl::{
    ClaudeCustomConfig, ClaudeCustomProvider, GeminiCliConfig, GeminiCliProvider, KiroConfig,
    KiroProvider, OpenAiCustomConfig, OpenAiCustomProvider, WreqUpstreamClient,
};

use crate::config::{GlobalConfig, ProviderKind};
use crate::error::ProxyError;
use crate::prompt_log::PromptLogger;
use crate::state::AppState;
use crate::system_prompt::SystemPromptManager;

/// Builds every provider adapter this config has credentials for. A
/// provider with no configured key/credential is simply absent from the
/// registry; routing to it later fails as `UnsupportedModel`/`NotFound`
/// rather than at startup, since only the default provider is mandatory.
pub async fn bootstrap(global: GlobalConfig) -> Result<Arc<AppState>, ProxyError> {
    let mut providers: HashMap<ProviderKind, Arc<dyn UpstreamProvider>> = HashMap::new();

    for kind in ProviderKind::ALL {
        let settings = global.provider_settings(kind);
        match build_provider(kind, &settings, global.request_max_retries, global.request_base_delay_ms).await? {
            Some(provider) => {
                providers.insert(kind, provider);
            }
            None => {
                if kind == global.default_provider {
                    return Err(ProxyError::ConfigError(format!(
                        "default provider '{}' has no configured credentials",
                        kind.as_path_segment()
                    )));
                }
            }
        }
    }

    let system_prompt = SystemPromptManager::new(
        global.system_prompt_file.clone(),
        global.system_prompt_mode,
        global.system_prompt_mirror_file.clone(),
    );
    let prompt_log = PromptLogger::new(global.log_prompts, global.prompt_log_base_name.clone());

    let state = Arc::new(AppState {
        global,
        providers,
        system_prompt,
        prompt_log,
    });
    Ok(state)
}

async fn build_provider(
    kind: ProviderKind,
    settings: &crate::config::ProviderSettings,
    request_max_retries: u32,
    request_base_delay_ms: u64,
) -> Result<Option<Arc<dyn UpstreamProvider>>, ProxyError> {
    match kind {
        ProviderKind::OpenaiCustom => {
            let Some(api_key) = settings.api_key.clone() else { return Ok(None) };
            let client = Arc::new(
                WreqUpstreamClient::new(settings.proxy.as_deref())
                    .map_err(|err| ProxyError::ConfigError(err.to_string()))?,
            );
            let config = OpenAiCustomConfig {
                base_url: settings
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                api_key,
                openrouter_referer: settings.openrouter_referer.clone(),
                openrouter_title: settings.openrouter_title.clone(),
                request_max_retries,
                request_base_delay_ms,
            };
            let provider = OpenAiCustomProvider::new(config, client)
                .map_err(|err| ProxyError::ConfigError(err.to_string()))?;
            Ok(Some(Arc::new(provider)))
        }
        ProviderKind::ClaudeCustom => {
            let Some(api_key) = settings.api_key.clone() else { return Ok(None) };
            let client = Arc::new(
                WreqUpstreamClient::new(settings.proxy.as_deref())
                    .map_err(|err| ProxyError::ConfigError(err.to_string()))?,
            );
            let config = ClaudeCustomConfig {
                base_url: settings
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
                api_key,
                request_max_retries,
                request_base_delay_ms,
            };
            let provider = ClaudeCustomProvider::new(config, client)
                .map_err(|err| ProxyError::ConfigError(err.to_string()))?;
            Ok(Some(Arc::new(provider)))
        }
        ProviderKind::GeminiCli => {
            use std::io::IsTerminal;
            if settings.credential_base64.is_none()
                && settings.credential_path.is_none()
                && default_gemini_cli_credential_path().map(|p| !p.exists()).unwrap_or(true)
                && !std::io::stdin().is_terminal()
            {
                return Ok(None);
            }
            let client = Arc::new(
                WreqUpstreamClient::new(settings.proxy.as_deref())
                    .map_err(|err| ProxyError::ConfigError(err.to_string()))?,
            );
            let config = GeminiCliConfig {
                base_url: settings.base_url.clone(),
                project_id: settings.project_id.clone(),
                default_tier: settings.default_tier.clone(),
                credential_base64: settings.credential_base64.clone(),
                credential_path: settings.credential_path.clone(),
                proxy: settings.proxy.clone(),
                request_max_retries,
                request_base_delay_ms,
            };
            let provider = GeminiCliProvider::new(config, client)
                .await
                .map_err(|err| ProxyError::ConfigError(err.to_string()))?;
            Ok(Some(Arc::new(provider)))
        }
        ProviderKind::Kiro => {
            if settings.credential_base64.is_none()
                && settings.credential_path.is_none()
                && default_kiro_sso_cache_dir().map(|p| !p.exists()).unwrap_or(true)
            {
                return Ok(None);
            }
            let client = Arc::new(
                WreqUpstreamClient::new(settings.proxy.as_deref())
                    .map_err(|err| ProxyError::ConfigError(err.to_string()))?,
            );
            let config = KiroConfig {
                credential_base64: settings.credential_base64.clone(),
                credential_path: settings.credential_path.clone(),
                proxy: settings.proxy.clone(),
                request_max_retries,
                request_base_delay_ms,
            };
            let provider = KiroProvider::new(config, client)
                .await
                .map_err(|err| ProxyError::ConfigError(err.to_string()))?;
            Ok(Some(Arc::new(provider)))
        }
    }
}

fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(std::path::PathBuf::from)
}

fn default_gemini_cli_credential_path() -> Option<std::path::PathBuf> {
    home_dir().map(|home| home.join(".gemini").join("oauth_creds.json"))
}

fn default_kiro_sso_cache_dir() -> Option<std::path::PathBuf> {
    home_dir().map(|home| home.join(".aws").join("sso").join("cache"))
}
