//! The AWS CodeWhisperer ("Kiro") adapter. No example repo in this
//! workspace's retrieval pack carries a Kiro/CodeWhisperer provider —
//! this module is built directly from spec.md §4.3.4's algorithmic
//! description, in the idiom the other OAuth-bearing adapter
//! (`geminicli`) already establishes: a `TokenCell` for the access
//! token, `gproxy_common::atomic_write` for credential persistence, and
//! the same 401/403-triggers-one-refresh wrapper shape. See DESIGN.md.
//!
//! Kiro only ever serves Claude-family requests, so its native exchange
//! shape (the `Value` the engine hands `generate_content`) is a Claude
//! `CreateMessageRequest`/`CreateMessageResponse` JSON body — the engine
//! never needs a fifth wire format just for this one provider.

mod bracket_parser;
mod event_stream;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use gproxy_provider_core::{
    ByteStream, ProviderError, ProviderResult, TokenCell, TokenState, UpstreamClient,
    UpstreamHttpRequest, UpstreamProvider,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::client::call_checked;

const PROVIDER_NAME: &str = "kiro";
const DEFAULT_BASE_URL_TEMPLATE: &str = "https://codewhisperer.{region}.amazonaws.com";
const TOKEN_REFRESH_SKEW_SECS: i64 = 120;

fn model_endpoint(model: &str) -> &'static str {
    if model.starts_with("amazonq") {
        "/SendMessageStreaming"
    } else {
        "/generateAssistantResponse"
    }
}

fn map_model_id(model: &str) -> ProviderResult<&'static str> {
    if model.contains("claude-sonnet-4") {
        Ok("CLAUDE_SONNET_4_20250514_V1_0")
    } else if model.contains("claude-3-7-sonnet") {
        Ok("CLAUDE_3_7_SONNET_20250219_V1_0")
    } else {
        Err(ProviderError::Unsupported("kiro only serves claude-sonnet-4 and claude-3-7-sonnet models"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct KiroCredentialFile {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: String,
    region: String,
    #[serde(rename = "expiresAt")]
    expires_at: String,
    #[serde(rename = "authMethod", default)]
    auth_method: Option<String>,
    #[serde(rename = "profileArn", default)]
    profile_arn: Option<String>,
    #[serde(rename = "clientId", default)]
    client_id: Option<String>,
    #[serde(rename = "clientSecret", default)]
    client_secret: Option<String>,
}

pub struct KiroConfig {
    pub credential_base64: Option<String>,
    pub credential_path: Option<PathBuf>,
    pub proxy: Option<String>,
    pub request_max_retries: u32,
    pub request_base_delay_ms: u64,
}

pub struct KiroProvider {
    token: TokenCell,
    region: String,
    auth_method: String,
    profile_arn: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    credential_path: PathBuf,
    fingerprint: String,
    client: Arc<dyn UpstreamClient>,
    oauth_client: Arc<wreq::Client>,
    max_retries: u32,
    base_delay: std::time::Duration,
}

impl KiroProvider {
    pub async fn new(config: KiroConfig, client: Arc<dyn UpstreamClient>) -> ProviderResult<Self> {
        let oauth_client = crate::client::shared_client(config.proxy.as_deref())?;
        let max_retries = config.request_max_retries;
        let base_delay = std::time::Duration::from_millis(config.request_base_delay_ms);
        let (credential, path) = load_credential(&config).await?;
        let fingerprint = machine_fingerprint();
        Ok(Self {
            token: TokenCell::new(TokenState {
                access_token: credential.access_token,
                refresh_token: credential.refresh_token,
                expires_at: parse_iso8601(&credential.expires_at).unwrap_or(0),
            }),
            region: credential.region,
            auth_method: credential.auth_method.unwrap_or_else(|| "social".to_string()),
            profile_arn: credential.profile_arn,
            client_id: credential.client_id,
            client_secret: credential.client_secret,
            credential_path: path,
            fingerprint,
            client,
            oauth_client,
            max_retries,
            base_delay,
        })
    }

    fn base_url(&self) -> String {
        DEFAULT_BASE_URL_TEMPLATE.replace("{region}", &self.region)
    }

    fn refresh_url(&self) -> String {
        if self.auth_method == "social" {
            format!("https://prod.{}.auth.desktop.kiro.dev/refreshToken", self.region)
        } else {
            format!("https://oidc.{}.amazonaws.com/token", self.region)
        }
    }

    async fn build_request(&self, model: &str, claude_request: &Value) -> ProviderResult<UpstreamHttpRequest> {
        let model_id = map_model_id(model)?;
        let request: gproxy_protocol::claude::CreateMessageRequest =
            serde_json::from_value(claude_request.clone()).map_err(|err| ProviderError::Other(err.to_string()))?;
        let conversation_state = build_conversation_state(&request, model_id, self.profile_arn.clone());
        let path = model_endpoint(model_id);
        let url = format!("{}{}", self.base_url(), path);
        let bytes = serde_json::to_vec(&conversation_state).map_err(|err| ProviderError::Other(err.to_string()))?;
        let access_token = self.token.access_token().await;
        Ok(UpstreamHttpRequest::post_json(url, Bytes::from(bytes))
            .with_header("authorization", format!("Bearer {access_token}"))
            .with_header("x-amz-user-agent", format!("aws-sdk-js/kiro-{}", self.fingerprint))
            .with_header("user-agent", format!("kiro-gproxy/{}", self.fingerprint)))
    }

    async fn call_with_auth_retry(&self, model: &str, claude_request: &Value) -> ProviderResult<bytes::Bytes> {
        let req = self.build_request(model, claude_request).await?;
        match gproxy_provider_core::retry_with_backoff_params(self.max_retries, self.base_delay, || {
            let req = req.clone();
            let client = self.client.clone();
            async move { call_checked(client.as_ref(), req).await }
        })
        .await
        {
            Ok(resp) => Ok(resp.body),
            Err(ProviderError::Upstream(gproxy_provider_core::UpstreamFailure::Http { status: 403, .. })) => {
                self.force_refresh().await?;
                let retried = self.build_request(model, claude_request).await?;
                let resp = call_checked(self.client.as_ref(), retried).await?;
                Ok(resp.body)
            }
            Err(other) => Err(other),
        }
    }

    async fn force_refresh(&self) -> ProviderResult<()> {
        let oauth_client = self.oauth_client.clone();
        let refresh_url = self.refresh_url();
        let auth_method = self.auth_method.clone();
        let client_id = self.client_id.clone();
        let client_secret = self.client_secret.clone();
        self.token
            .refresh_if_near_expiry(i64::MAX, move |state| {
                let oauth_client = oauth_client.clone();
                let refresh_url = refresh_url.clone();
                let auth_method = auth_method.clone();
                let client_id = client_id.clone();
                let client_secret = client_secret.clone();
                async move {
                    refresh_kiro_token(&oauth_client, &refresh_url, &auth_method, &state.refresh_token, client_id.as_deref(), client_secret.as_deref()).await
                }
            })
            .await?;
        self.persist().await;
        Ok(())
    }

    async fn persist(&self) {
        let snapshot = self.token.snapshot().await;
        let credential = KiroCredentialFile {
            access_token: snapshot.access_token,
            refresh_token: snapshot.refresh_token,
            region: self.region.clone(),
            expires_at: format_iso8601(snapshot.expires_at),
            auth_method: Some(self.auth_method.clone()),
            profile_arn: self.profile_arn.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        };
        if let Ok(bytes) = serde_json::to_vec_pretty(&credential) {
            if let Err(err) = gproxy_common::atomic_write(&self.credential_path, &bytes).await {
                tracing::warn!(error = %err, "failed to persist kiro credentials");
            }
        }
    }
}

#[async_trait]
impl UpstreamProvider for KiroProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn generate_content(&self, model: &str, request: Value) -> ProviderResult<Value> {
        let body = self.call_with_auth_retry(model, &request).await?;
        let parsed = event_stream::parse_response(&body);
        Ok(to_claude_response(model, parsed))
    }

    async fn generate_content_stream(&self, model: &str, request: Value) -> ProviderResult<ByteStream> {
        // Kiro has no native streaming transport; the full response is
        // parsed synchronously and replayed as one synthetic Claude SSE
        // event sequence (message_start .. message_stop), per spec.md's
        // explicit "unspecified" call on pseudo-streaming.
        let body = self.call_with_auth_retry(model, &request).await?;
        let parsed = event_stream::parse_response(&body);
        let response = to_claude_response(model, parsed);
        let response: gproxy_protocol::claude::CreateMessageResponse =
            serde_json::from_value(response).map_err(|err| ProviderError::Other(err.to_string()))?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(8);
        tokio::spawn(async move {
            let mut encoder = gproxy_transform::claude::StreamEncoder::new(response.id.clone(), response.model.clone());
            let mut frames = Vec::new();
            for part in response_to_parts(&response) {
                match part {
                    StreamablePart::Text(text) => {
                        frames.extend(encoder.encode(&gproxy_transform::CanonicalStreamEvent::TextDelta(text)));
                    }
                    StreamablePart::ToolCall { index, id, name, arguments } => {
                        frames.extend(encoder.encode(&gproxy_transform::CanonicalStreamEvent::ToolCallStart { index, id, name }));
                        frames.extend(encoder.encode(&gproxy_transform::CanonicalStreamEvent::ToolCallArgumentsDelta {
                            index,
                            partial_json: arguments,
                        }));
                    }
                }
            }
            let finish_reason = match response.stop_reason {
                Some(gproxy_protocol::claude::StopReason::ToolUse) => gproxy_transform::CanonicalFinishReason::ToolUse,
                Some(gproxy_protocol::claude::StopReason::MaxTokens) => gproxy_transform::CanonicalFinishReason::Length,
                _ => gproxy_transform::CanonicalFinishReason::Stop,
            };
            frames.extend(encoder.encode(&gproxy_transform::CanonicalStreamEvent::Done {
                finish_reason,
                usage: gproxy_transform::CanonicalUsage {
                    input_tokens: response.usage.input_tokens,
                    output_tokens: response.usage.output_tokens,
                },
            }));
            let _ = tx.send(Bytes::from(frames)).await;
        });
        Ok(rx)
    }

    async fn list_models(&self) -> ProviderResult<Value> {
        Ok(json!({
            "data": [
                { "id": "claude-sonnet-4", "type": "model" },
                { "id": "claude-3-7-sonnet", "type": "model" },
            ],
            "has_more": false,
        }))
    }

    async fn refresh_token_if_near_expiry(&self) -> ProviderResult<()> {
        let oauth_client = self.oauth_client.clone();
        let refresh_url = self.refresh_url();
        let auth_method = self.auth_method.clone();
        let client_id = self.client_id.clone();
        let client_secret = self.client_secret.clone();
        self.token
            .refresh_if_near_expiry(TOKEN_REFRESH_SKEW_SECS, move |state| {
                let oauth_client = oauth_client.clone();
                let refresh_url = refresh_url.clone();
                let auth_method = auth_method.clone();
                let client_id = client_id.clone();
                let client_secret = client_secret.clone();
                async move {
                    refresh_kiro_token(&oauth_client, &refresh_url, &auth_method, &state.refresh_token, client_id.as_deref(), client_secret.as_deref()).await
                }
            })
            .await?;
        self.persist().await;
        Ok(())
    }
}

enum StreamablePart {
    Text(String),
    ToolCall { index: u32, id: String, name: String, arguments: String },
}

fn response_to_parts(response: &gproxy_protocol::claude::CreateMessageResponse) -> Vec<StreamablePart> {
    let mut out = Vec::new();
    let mut index = 0u32;
    for block in &response.content {
        match block {
            gproxy_protocol::claude::ContentBlock::Text { text } => out.push(StreamablePart::Text(text.clone())),
            gproxy_protocol::claude::ContentBlock::ToolUse { id, name, input } => {
                out.push(StreamablePart::ToolCall {
                    index,
                    id: id.clone(),
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_default(),
                });
                index += 1;
            }
            _ => {}
        }
    }
    out
}

fn build_conversation_state(
    request: &gproxy_protocol::claude::CreateMessageRequest,
    model_id: &str,
    profile_arn: Option<String>,
) -> Value {
    use gproxy_protocol::claude::{ContentBlock, MessageContent, Role};

    let system_text = request.system.as_ref().map(|s| match s {
        gproxy_protocol::claude::SystemPrompt::Text(t) => t.clone(),
        gproxy_protocol::claude::SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    });

    let mut turns: Vec<(Role, String)> = request
        .messages
        .iter()
        .map(|m| {
            let text = match &m.content {
                MessageContent::Text(t) => t.clone(),
                MessageContent::Blocks(blocks) => blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.clone()),
                        ContentBlock::ToolResult { content, .. } => content.as_ref().map(|c| match c {
                            gproxy_protocol::claude::ToolResultContent::Text(t) => t.clone(),
                            gproxy_protocol::claude::ToolResultContent::Blocks(_) => String::new(),
                        }),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            };
            (m.role, text)
        })
        .collect();

    if let Some(system) = system_text {
        if !system.is_empty() {
            match turns.first_mut() {
                Some((Role::User, text)) => *text = format!("{system}\n\n{text}"),
                _ => turns.insert(0, (Role::User, system)),
            }
        }
    }

    let tool_specs: Vec<Value> = request
        .tools
        .iter()
        .flatten()
        .map(|tool| {
            json!({
                "toolSpecification": {
                    "name": tool.name,
                    "description": tool.description.clone().unwrap_or_default(),
                    "inputSchema": { "json": tool.input_schema },
                }
            })
        })
        .collect();

    let current = turns.pop();
    let history: Vec<Value> = turns
        .iter()
        .map(|(role, text)| match role {
            Role::User => json!({ "userInputMessage": { "content": text } }),
            Role::Assistant => json!({ "assistantResponseMessage": { "content": text } }),
        })
        .collect();

    let current_message = match current {
        Some((_, text)) => {
            let mut message = json!({
                "content": text,
                "modelId": model_id,
                "origin": "AI_EDITOR",
            });
            if !tool_specs.is_empty() {
                message["userInputMessageContext"] = json!({ "tools": tool_specs });
            }
            json!({ "userInputMessage": message })
        }
        None => json!({ "userInputMessage": { "content": "", "modelId": model_id, "origin": "AI_EDITOR" } }),
    };

    let conversation_state = json!({
        "chatTriggerType": "MANUAL",
        "conversationId": uuid::Uuid::new_v4().to_string(),
        "currentMessage": current_message,
        "history": history,
    });

    let mut body = json!({ "conversationState": conversation_state });
    if let Some(profile_arn) = profile_arn {
        body["profileArn"] = json!(profile_arn);
    }
    body
}

fn to_claude_response(model: &str, parsed: event_stream::ParsedResponse) -> Value {
    let mut bracket_calls = Vec::new();
    let bare_text = bracket_parser::strip_and_collect_bracket_calls(&parsed.text, &mut bracket_calls);

    let mut content = Vec::new();
    if !bare_text.trim().is_empty() {
        content.push(json!({ "type": "text", "text": bare_text }));
    }

    let mut seen = std::collections::HashSet::new();
    for call in bracket_calls {
        let args_json = call.args.to_string();
        if !seen.insert((call.name.clone(), args_json)) {
            continue;
        }
        content.push(json!({
            "type": "tool_use",
            "id": format!("toolu_{}", uuid::Uuid::new_v4().simple()),
            "name": call.name,
            "input": call.args,
        }));
    }
    for (tool_use_id, tool_call) in parsed.tool_calls {
        content.push(json!({
            "type": "tool_use",
            "id": tool_use_id,
            "name": tool_call.name,
            "input": tool_call.input(),
        }));
    }

    let stop_reason = if content.iter().any(|c| c["type"] == "tool_use") {
        "tool_use"
    } else {
        "end_turn"
    };

    json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "content": content,
        "model": model,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": { "input_tokens": 0, "output_tokens": 0 },
    })
}

fn machine_fingerprint() -> String {
    let mac = mac_address::get_mac_address()
        .ok()
        .flatten()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "00:00:00:00:00:00".to_string());
    let mut hasher = Sha256::new();
    hasher.update(mac.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn parse_iso8601(value: &str) -> Option<i64> {
    time::OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp())
}

fn format_iso8601(unix_secs: i64) -> String {
    time::OffsetDateTime::from_unix_timestamp(unix_secs)
        .ok()
        .and_then(|dt| dt.format(&time::format_description::well_known::Rfc3339).ok())
        .unwrap_or_default()
}

async fn load_credential(config: &KiroConfig) -> ProviderResult<(KiroCredentialFile, PathBuf)> {
    if let Some(b64) = &config.credential_base64 {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|err| ProviderError::InvalidConfig(format!("invalid kiro credential base64: {err}")))?;
        let parsed: KiroCredentialFile = serde_json::from_slice(&bytes).map_err(|err| ProviderError::InvalidConfig(err.to_string()))?;
        let path = default_sso_path().join("kiro-auth-token.json");
        return Ok((parsed, path));
    }

    if let Some(path) = &config.credential_path {
        return load_and_merge(path).await.map(|c| (c, path.clone()));
    }

    let default_path = default_sso_path().join("kiro-auth-token.json");
    if let Ok(merged) = load_and_merge(&default_path).await {
        return Ok((merged, default_path));
    }

    let merged = merge_sso_cache_directory(&default_sso_path()).await?;
    Ok((merged, default_path))
}

fn default_sso_path() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    home.join(".aws").join("sso").join("cache")
}

async fn load_and_merge(path: &Path) -> ProviderResult<KiroCredentialFile> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| ProviderError::InvalidConfig(format!("failed to read {}: {err}", path.display())))?;
    serde_json::from_slice(&bytes).map_err(|err| ProviderError::InvalidConfig(err.to_string()))
}

/// Merges every `*.json` file in the SSO cache directory into one record;
/// a field present in any file wins, later files breaking ties, matching
/// spec.md's "merged record" language for discovery without an explicit
/// `kiro-auth-token.json`.
async fn merge_sso_cache_directory(dir: &Path) -> ProviderResult<KiroCredentialFile> {
    let mut merged = serde_json::Map::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| ProviderError::InvalidConfig(format!("no kiro credentials found under {}: {err}", dir.display())))?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(bytes) = tokio::fs::read(&path).await else { continue };
        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&bytes) else { continue };
        for (key, value) in map {
            merged.insert(key, value);
        }
    }
    serde_json::from_value(Value::Object(merged)).map_err(|err| {
        ProviderError::InvalidConfig(format!("sso cache did not yield a complete kiro credential: {err}"))
    })
}

#[derive(Serialize)]
struct SocialRefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct OidcRefreshRequest<'a> {
    #[serde(rename = "clientId")]
    client_id: &'a str,
    #[serde(rename = "clientSecret")]
    client_secret: &'a str,
    #[serde(rename = "grantType")]
    grant_type: &'a str,
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct KiroRefreshResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
    #[serde(rename = "expiresIn", default)]
    expires_in: Option<i64>,
}

async fn refresh_kiro_token(
    client: &wreq::Client,
    refresh_url: &str,
    auth_method: &str,
    refresh_token: &str,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> ProviderResult<TokenState> {
    let response = if auth_method == "social" {
        client
            .post(refresh_url)
            .json(&SocialRefreshRequest { refresh_token })
            .send()
            .await
    } else {
        client
            .post(refresh_url)
            .json(&OidcRefreshRequest {
                client_id: client_id.unwrap_or_default(),
                client_secret: client_secret.unwrap_or_default(),
                grant_type: "refresh_token",
                refresh_token,
            })
            .send()
            .await
    }
    .map_err(|err| ProviderError::Other(format!("kiro refresh request failed: {err}")))?;

    let status = response.status();
    let body = response.bytes().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ProviderError::Upstream(gproxy_provider_core::UpstreamFailure::Http {
            status: status.as_u16(),
            body,
        }));
    }
    let parsed: KiroRefreshResponse = serde_json::from_slice(&body).map_err(|err| ProviderError::Other(err.to_string()))?;
    let now = gproxy_common::unix_now();
    Ok(TokenState {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
        expires_at: now + parsed.expires_in.unwrap_or(3600),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_endpoint_routes_amazonq_to_streaming() {
        assert_eq!(model_endpoint("amazonq-foo"), "/SendMessageStreaming");
        assert_eq!(model_endpoint("CLAUDE_SONNET_4_20250514_V1_0"), "/generateAssistantResponse");
    }

    #[test]
    fn map_model_id_rejects_unsupported_models() {
        assert!(map_model_id("gpt-4o").is_err());
        assert_eq!(map_model_id("claude-sonnet-4-20250514").unwrap(), "CLAUDE_SONNET_4_20250514_V1_0");
    }

    #[test]
    fn iso8601_round_trips() {
        let formatted = format_iso8601(1_700_000_000);
        let parsed = parse_iso8601(&formatted).unwrap();
        assert_eq!(parsed, 1_700_000_000);
    }
}
