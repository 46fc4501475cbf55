//! The startup configuration shape `bootstrap` consumes. CLI parsing and
//! TOML file loading happen in `apps/gproxy` (an external collaborator
//! per spec); this module only defines the value they must produce.

use std::path::PathBuf;

use gproxy_protocol::ProtocolFamily;
use serde::{Deserialize, Serialize};

/// One of the four upstreams this gateway can route to. Each is
/// permanently associated with exactly one native protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    GeminiCli,
    OpenaiCustom,
    ClaudeCustom,
    Kiro,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::GeminiCli,
        ProviderKind::OpenaiCustom,
        ProviderKind::ClaudeCustom,
        ProviderKind::Kiro,
    ];

    /// The leading path segment / `model-provider` header value this
    /// provider answers to, e.g. `/claude-custom/v1/chat/completions`.
    pub fn as_path_segment(self) -> &'static str {
        match self {
            ProviderKind::GeminiCli => "gemini-cli",
            ProviderKind::OpenaiCustom => "openai-custom",
            ProviderKind::ClaudeCustom => "claude-custom",
            ProviderKind::Kiro => "kiro",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_path_segment() == segment)
    }

    /// The wire format this provider natively speaks. Kiro is CodeWhisperer
    /// underneath but is driven through this gateway's Claude-shaped
    /// request/response plumbing (see `providers::kiro`), so its native
    /// family is Claude.
    pub fn native_family(self) -> ProtocolFamily {
        match self {
            ProviderKind::GeminiCli => ProtocolFamily::Gemini,
            ProviderKind::OpenaiCustom => ProtocolFamily::OpenAi,
            ProviderKind::ClaudeCustom => ProtocolFamily::Claude,
            ProviderKind::Kiro => ProtocolFamily::Claude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultModelMode {
    Fallback,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemPromptMode {
    Overwrite,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogPromptsMode {
    None,
    Console,
    File,
}

/// Credentials and endpoint settings for one provider. Only the fields a
/// given `ProviderKind` actually uses are populated by `bootstrap`; the
/// rest stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub openrouter_referer: Option<String>,
    #[serde(default)]
    pub openrouter_title: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub default_tier: Option<String>,
    #[serde(default)]
    pub credential_base64: Option<String>,
    #[serde(default)]
    pub credential_path: Option<PathBuf>,
    #[serde(default)]
    pub proxy: Option<String>,
}

/// The immutable, process-lifetime startup configuration. `AppState` is
/// built from exactly one of these; per-request provider overrides are
/// represented separately (see `classify::Resolved`) rather than by
/// mutating this value, per §9's "no deep-copy needed" note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
    pub default_provider: ProviderKind,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_model_mode")]
    pub default_model_mode: DefaultModelMode,
    /// Keyed by `ProviderKind::as_path_segment()` rather than the enum
    /// itself — serde's derived map-key serialization for enums is not
    /// reliable across both the JSON and TOML backends this config is
    /// loaded through.
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ProviderSettings>,
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
    #[serde(default = "default_system_prompt_mode")]
    pub system_prompt_mode: SystemPromptMode,
    #[serde(default)]
    pub system_prompt_mirror_file: Option<PathBuf>,
    #[serde(default = "default_log_prompts")]
    pub log_prompts: LogPromptsMode,
    #[serde(default)]
    pub prompt_log_base_name: Option<String>,
    #[serde(default = "default_max_retries")]
    pub request_max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub request_base_delay_ms: u64,
    #[serde(default = "default_cron_near_minutes")]
    pub cron_near_minutes: u64,
    #[serde(default)]
    pub cron_refresh_token: bool,
}

fn default_model_mode() -> DefaultModelMode {
    DefaultModelMode::Fallback
}

fn default_system_prompt_mode() -> SystemPromptMode {
    SystemPromptMode::Overwrite
}

fn default_log_prompts() -> LogPromptsMode {
    LogPromptsMode::None
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_cron_near_minutes() -> u64 {
    30
}

impl GlobalConfig {
    pub fn provider_settings(&self, kind: ProviderKind) -> ProviderSettings {
        self.providers
            .get(kind.as_path_segment())
            .cloned()
            .unwrap_or_default()
    }
}
