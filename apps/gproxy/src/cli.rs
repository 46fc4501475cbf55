//! Flag parsing and config-file loading (spec.md §1: external collaborator).
//! `clap` parses the command line; an optional TOML file loaded through the
//! `config` crate supplies the rest; CLI flags that were actually passed
//! win over the file, per spec.md §6 ("flags override file").

use std::collections::HashMap;

use clap::Parser;
use gproxy_core::config::{
    DefaultModelMode, GlobalConfig, LogPromptsMode, ProviderKind, ProviderSettings, SystemPromptMode,
};

#[derive(Parser, Debug)]
#[command(name = "gproxy", about = "Local HTTP gateway translating OpenAI/Gemini/Claude requests")]
pub struct Cli {
    #[arg(long, env = "GPROXY_CONFIG")]
    pub config: Option<String>,

    #[arg(long, env = "GPROXY_HOST")]
    pub host: Option<String>,
    #[arg(long, env = "GPROXY_PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "GPROXY_API_KEY")]
    pub api_key: Option<String>,
    #[arg(long = "model-provider", env = "GPROXY_DEFAULT_PROVIDER")]
    pub default_provider: Option<String>,
    #[arg(long, env = "GPROXY_DEFAULT_MODEL")]
    pub default_model: Option<String>,
    #[arg(long, env = "GPROXY_DEFAULT_MODEL_MODE")]
    pub default_model_mode: Option<String>,

    #[arg(long, env = "GPROXY_SYSTEM_PROMPT_FILE")]
    pub system_prompt_file: Option<String>,
    #[arg(long, env = "GPROXY_SYSTEM_PROMPT_MODE")]
    pub system_prompt_mode: Option<String>,
    #[arg(long, env = "GPROXY_SYSTEM_PROMPT_MIRROR_FILE")]
    pub system_prompt_mirror_file: Option<String>,

    #[arg(long, env = "GPROXY_LOG_PROMPTS")]
    pub log_prompts: Option<String>,
    #[arg(long, env = "GPROXY_PROMPT_LOG_BASE_NAME")]
    pub prompt_log_base_name: Option<String>,

    #[arg(long, env = "GPROXY_REQUEST_MAX_RETRIES")]
    pub request_max_retries: Option<u32>,
    #[arg(long, env = "GPROXY_REQUEST_BASE_DELAY")]
    pub request_base_delay: Option<u64>,
    #[arg(long, env = "GPROXY_CRON_NEAR_MINUTES")]
    pub cron_near_minutes: Option<u64>,
    #[arg(long, env = "GPROXY_CRON_REFRESH_TOKEN")]
    pub cron_refresh_token: bool,

    #[arg(long, env = "GPROXY_PROXY")]
    pub proxy: Option<String>,

    #[arg(long, env = "GPROXY_OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,
    #[arg(long, env = "GPROXY_OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,
    #[arg(long, env = "GPROXY_OPENROUTER_REFERER")]
    pub openrouter_referer: Option<String>,
    #[arg(long, env = "GPROXY_OPENROUTER_TITLE")]
    pub openrouter_title: Option<String>,

    #[arg(long, env = "GPROXY_CLAUDE_API_KEY")]
    pub claude_api_key: Option<String>,
    #[arg(long, env = "GPROXY_CLAUDE_BASE_URL")]
    pub claude_base_url: Option<String>,

    #[arg(long, env = "GPROXY_GEMINI_PROJECT_ID")]
    pub gemini_project_id: Option<String>,
    #[arg(long, env = "GPROXY_GEMINI_DEFAULT_TIER")]
    pub gemini_default_tier: Option<String>,
    #[arg(long, env = "GPROXY_GEMINI_CREDENTIAL_BASE64")]
    pub gemini_credential_base64: Option<String>,
    #[arg(long, env = "GPROXY_GEMINI_CREDENTIAL_PATH")]
    pub gemini_credential_path: Option<String>,

    #[arg(long, env = "GPROXY_KIRO_CREDENTIAL_BASE64")]
    pub kiro_credential_base64: Option<String>,
    #[arg(long, env = "GPROXY_KIRO_CREDENTIAL_PATH")]
    pub kiro_credential_path: Option<String>,
}

/// The file-loadable subset of `GlobalConfig`; every field optional so a
/// partial (or absent) file is valid and CLI flags fill the rest.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    api_key: Option<String>,
    default_provider: Option<String>,
    default_model: Option<String>,
    default_model_mode: Option<String>,
    system_prompt_file: Option<String>,
    system_prompt_mode: Option<String>,
    system_prompt_mirror_file: Option<String>,
    log_prompts: Option<String>,
    prompt_log_base_name: Option<String>,
    request_max_retries: Option<u32>,
    request_base_delay: Option<u64>,
    cron_near_minutes: Option<u64>,
    cron_refresh_token: Option<bool>,
    proxy: Option<String>,
    #[serde(default)]
    providers: HashMap<String, ProviderSettings>,
}

fn load_file_config(path: Option<&str>) -> Result<FileConfig, anyhow::Error> {
    let Some(path) = path else { return Ok(FileConfig::default()) };
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .build()?;
    Ok(settings.try_deserialize()?)
}

fn parse_model_mode(value: &str) -> anyhow::Result<DefaultModelMode> {
    match value {
        "fallback" => Ok(DefaultModelMode::Fallback),
        "force" => Ok(DefaultModelMode::Force),
        other => anyhow::bail!("invalid default-model-mode '{other}', expected fallback|force"),
    }
}

fn parse_system_prompt_mode(value: &str) -> anyhow::Result<SystemPromptMode> {
    match value {
        "overwrite" => Ok(SystemPromptMode::Overwrite),
        "append" => Ok(SystemPromptMode::Append),
        other => anyhow::bail!("invalid system-prompt-mode '{other}', expected overwrite|append"),
    }
}

fn parse_log_prompts(value: &str) -> anyhow::Result<LogPromptsMode> {
    match value {
        "none" => Ok(LogPromptsMode::None),
        "console" => Ok(LogPromptsMode::Console),
        "file" => Ok(LogPromptsMode::File),
        other => anyhow::bail!("invalid log-prompts '{other}', expected none|console|file"),
    }
}

fn parse_provider(value: &str) -> anyhow::Result<ProviderKind> {
    ProviderKind::from_path_segment(value)
        .ok_or_else(|| anyhow::anyhow!("unknown provider '{value}'"))
}

/// Builds the final `GlobalConfig` by loading `cli.config` (if set) and
/// overlaying every CLI flag that was actually supplied on top of it.
pub fn resolve_global_config(cli: &Cli) -> anyhow::Result<GlobalConfig> {
    let file = load_file_config(cli.config.as_deref())?;

    let host = cli.host.clone().or(file.host).unwrap_or_else(|| "127.0.0.1".to_string());
    let port = cli.port.or(file.port).unwrap_or(8787);
    let api_key = cli
        .api_key
        .clone()
        .or(file.api_key)
        .ok_or_else(|| anyhow::anyhow!("no api-key configured: pass --api-key or set it in the config file"))?;
    let default_provider_str = cli
        .default_provider
        .clone()
        .or(file.default_provider)
        .unwrap_or_else(|| "openai-custom".to_string());
    let default_provider = parse_provider(&default_provider_str)?;

    let default_model_mode = match cli.default_model_mode.clone().or(file.default_model_mode) {
        Some(value) => parse_model_mode(&value)?,
        None => DefaultModelMode::Fallback,
    };
    let system_prompt_mode = match cli.system_prompt_mode.clone().or(file.system_prompt_mode) {
        Some(value) => parse_system_prompt_mode(&value)?,
        None => SystemPromptMode::Overwrite,
    };
    let log_prompts = match cli.log_prompts.clone().or(file.log_prompts) {
        Some(value) => parse_log_prompts(&value)?,
        None => LogPromptsMode::None,
    };

    let mut providers = file.providers;
    overlay_provider_overrides(&mut providers, cli);

    Ok(GlobalConfig {
        host,
        port,
        api_key,
        default_provider,
        default_model: cli.default_model.clone().or(file.default_model),
        default_model_mode,
        providers,
        system_prompt_file: (cli.system_prompt_file.clone().or(file.system_prompt_file)).map(Into::into),
        system_prompt_mode,
        system_prompt_mirror_file: (cli.system_prompt_mirror_file.clone().or(file.system_prompt_mirror_file))
            .map(Into::into),
        log_prompts,
        prompt_log_base_name: cli.prompt_log_base_name.clone().or(file.prompt_log_base_name),
        request_max_retries: cli.request_max_retries.or(file.request_max_retries).unwrap_or(3),
        request_base_delay_ms: cli.request_base_delay.or(file.request_base_delay).unwrap_or(1000),
        cron_near_minutes: cli.cron_near_minutes.or(file.cron_near_minutes).unwrap_or(30),
        cron_refresh_token: cli.cron_refresh_token || file.cron_refresh_token.unwrap_or(false),
    })
}

/// CLI-level per-provider overrides layered on top of whatever the file
/// already populated for that provider's settings.
fn overlay_provider_overrides(providers: &mut HashMap<String, ProviderSettings>, cli: &Cli) {
    let openai = providers.entry(ProviderKind::OpenaiCustom.as_path_segment().to_string()).or_default();
    if cli.openai_api_key.is_some() {
        openai.api_key = cli.openai_api_key.clone();
    }
    if cli.openai_base_url.is_some() {
        openai.base_url = cli.openai_base_url.clone();
    }
    if cli.openrouter_referer.is_some() {
        openai.openrouter_referer = cli.openrouter_referer.clone();
    }
    if cli.openrouter_title.is_some() {
        openai.openrouter_title = cli.openrouter_title.clone();
    }
    if cli.proxy.is_some() {
        openai.proxy = cli.proxy.clone();
    }

    let claude = providers.entry(ProviderKind::ClaudeCustom.as_path_segment().to_string()).or_default();
    if cli.claude_api_key.is_some() {
        claude.api_key = cli.claude_api_key.clone();
    }
    if cli.claude_base_url.is_some() {
        claude.base_url = cli.claude_base_url.clone();
    }
    if cli.proxy.is_some() {
        claude.proxy = cli.proxy.clone();
    }

    let gemini = providers.entry(ProviderKind::GeminiCli.as_path_segment().to_string()).or_default();
    if cli.gemini_project_id.is_some() {
        gemini.project_id = cli.gemini_project_id.clone();
    }
    if cli.gemini_default_tier.is_some() {
        gemini.default_tier = cli.gemini_default_tier.clone();
    }
    if cli.gemini_credential_base64.is_some() {
        gemini.credential_base64 = cli.gemini_credential_base64.clone();
    }
    if let Some(path) = &cli.gemini_credential_path {
        gemini.credential_path = Some(path.into());
    }
    if cli.proxy.is_some() {
        gemini.proxy = cli.proxy.clone();
    }

    let kiro = providers.entry(ProviderKind::Kiro.as_path_segment().to_string()).or_default();
    if cli.kiro_credential_base64.is_some() {
        kiro.credential_base64 = cli.kiro_credential_base64.clone();
    }
    if let Some(path) = &cli.kiro_credential_path {
        kiro.credential_path = Some(path.into());
    }
    if cli.proxy.is_some() {
        kiro.proxy = cli.proxy.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli::parse_from(["gproxy", "--api-key", "secret"])
    }

    #[test]
    fn defaults_host_and_port_when_nothing_configured() {
        let cli = base_cli();
        let config = resolve_global_config(&cli).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8787);
        assert_eq!(config.default_provider, ProviderKind::OpenaiCustom);
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let cli = Cli::parse_from(["gproxy"]);
        assert!(resolve_global_config(&cli).is_err());
    }

    #[test]
    fn cli_provider_override_wins() {
        let cli = Cli::parse_from(["gproxy", "--api-key", "secret", "--model-provider", "claude-custom"]);
        let config = resolve_global_config(&cli).unwrap();
        assert_eq!(config.default_provider, ProviderKind::ClaudeCustom);
    }

    #[test]
    fn openai_api_key_flag_populates_provider_settings() {
        let cli = Cli::parse_from(["gproxy", "--api-key", "secret", "--openai-api-key", "sk-test"]);
        let config = resolve_global_config(&cli).unwrap();
        assert_eq!(
            config.provider_settings(ProviderKind::OpenaiCustom).api_key.as_deref(),
            Some("sk-test")
        );
    }
}
