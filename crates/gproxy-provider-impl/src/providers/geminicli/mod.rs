//! Google Code Assist adapter (the OAuth2, `gemini-cli`-compatible
//! endpoint). Grounded on the teacher's `providers/geminicli/mod.rs` and
//! `provider/geminicli/{oauth,refresh}.rs`: the same Code Assist envelope
//! (`{model, project, user_prompt_id, request}` in, `response.response`
//! out), the same fixed OAuth2 client id/secret pair, the same
//! `loadCodeAssist`/`onboardUser` project-discovery dance.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use gproxy_provider_core::{
    ByteStream, ProviderError, ProviderResult, TokenCell, TokenState, UpstreamClient,
    UpstreamHttpRequest, UpstreamProvider,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::client::call_checked;
use crate::oauth_common;

const PROVIDER_NAME: &str = "geminicli";
const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";
const USER_AGENT: &str = "GeminiCLI/0.1.5 (Windows; AMD64)";
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CLIENT_ID: &str = "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const CLIENT_SECRET: &str = "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";
const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/userinfo.email https://www.googleapis.com/auth/userinfo.profile";
const LOOPBACK_PORT: u16 = 8085;
const TOKEN_REFRESH_SKEW_SECS: i64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    access_token: String,
    refresh_token: String,
    /// Epoch milliseconds, matching the shape `~/.gemini/oauth_creds.json`
    /// is persisted in by the real gemini-cli tool.
    expiry_date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
}

pub struct GeminiCliConfig {
    pub base_url: Option<String>,
    pub project_id: Option<String>,
    pub default_tier: Option<String>,
    pub credential_base64: Option<String>,
    pub credential_path: Option<PathBuf>,
    pub proxy: Option<String>,
    pub request_max_retries: u32,
    pub request_base_delay_ms: u64,
}

impl GeminiCliConfig {
    fn credential_file_path(&self) -> PathBuf {
        self.credential_path.clone().unwrap_or_else(|| {
            dirs_home().join(".gemini").join("oauth_creds.json")
        })
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

pub struct GeminiCliProvider {
    base_url: String,
    default_tier: String,
    credential_path: PathBuf,
    token: TokenCell,
    project_id: RwLock<Option<String>>,
    client: Arc<dyn UpstreamClient>,
    oauth_client: Arc<wreq::Client>,
    max_retries: u32,
    base_delay: std::time::Duration,
}

impl GeminiCliProvider {
    pub async fn new(config: GeminiCliConfig, client: Arc<dyn UpstreamClient>) -> ProviderResult<Self> {
        let base_url = config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let credential_path = config.credential_file_path();
        let oauth_client = crate::client::shared_client(config.proxy.as_deref())?;
        let max_retries = config.request_max_retries;
        let base_delay = std::time::Duration::from_millis(config.request_base_delay_ms);

        let loaded = load_credential(&config, &credential_path, &oauth_client).await?;

        Ok(Self {
            base_url,
            default_tier: config.default_tier.clone().unwrap_or_else(|| "free-tier".to_string()),
            credential_path,
            token: TokenCell::new(TokenState {
                access_token: loaded.access_token,
                refresh_token: loaded.refresh_token,
                expires_at: loaded.expiry_date / 1000,
            }),
            project_id: RwLock::new(config.project_id.clone().or(loaded.project_id)),
            client,
            oauth_client,
            max_retries,
            base_delay,
        })
    }

    async fn ensure_project_id(&self) -> ProviderResult<String> {
        if let Some(id) = self.project_id.read().await.clone() {
            return Ok(id);
        }
        let access_token = self.token.access_token().await;
        let discovered = discover_project_id(&self.oauth_client, &self.base_url, &access_token, &self.default_tier).await?;
        if discovered == "default" {
            return Err(ProviderError::InvalidConfig(
                "Code Assist returned the literal project id `default`".to_string(),
            ));
        }
        *self.project_id.write().await = Some(discovered.clone());
        Ok(discovered)
    }

    async fn wrap_request(&self, model: &str, body: Value) -> ProviderResult<Value> {
        let project_id = self.ensure_project_id().await?;
        Ok(json!({
            "model": normalize_model(model),
            "project": project_id,
            "user_prompt_id": generate_user_prompt_id(),
            "request": body,
        }))
    }

    async fn build_request(&self, path: &str, wrapped: &Value) -> ProviderResult<UpstreamHttpRequest> {
        let access_token = self.token.access_token().await;
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        let bytes = serde_json::to_vec(wrapped).map_err(|err| ProviderError::Other(err.to_string()))?;
        Ok(UpstreamHttpRequest::post_json(url, Bytes::from(bytes))
            .with_header("authorization", format!("Bearer {access_token}"))
            .with_header("user-agent", USER_AGENT)
            .with_header("accept", "application/json"))
    }

    /// One 401-triggers-refresh-then-retry attempt, independent of the
    /// general retry budget (invariant 6 in spec.md's testable properties).
    async fn call_with_auth_retry(&self, req_body: Value, path: &str) -> ProviderResult<bytes::Bytes> {
        let wrapped = self.wrap_request_from_value(req_body.clone()).await?;
        let req = self.build_request(path, &wrapped).await?;
        match gproxy_provider_core::retry_with_backoff_params(self.max_retries, self.base_delay, || {
            let req = req.clone();
            let client = self.client.clone();
            async move { call_checked(client.as_ref(), req).await }
        })
        .await
        {
            Ok(resp) => Ok(resp.body),
            Err(ProviderError::Upstream(gproxy_provider_core::UpstreamFailure::Http { status: 401, .. })) => {
                self.force_refresh().await?;
                let wrapped = self.wrap_request_from_value(req_body).await?;
                let retried = self.build_request(path, &wrapped).await?;
                let resp = call_checked(self.client.as_ref(), retried).await?;
                Ok(resp.body)
            }
            Err(other) => Err(other),
        }
    }

    async fn wrap_request_from_value(&self, body: Value) -> ProviderResult<Value> {
        let model = body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.wrap_request(&model, body).await
    }

    async fn force_refresh(&self) -> ProviderResult<()> {
        let oauth_client = self.oauth_client.clone();
        self.token
            .refresh_if_near_expiry(i64::MAX, move |state| {
                let oauth_client = oauth_client.clone();
                async move { refresh_access_token(&oauth_client, &state.refresh_token).await }
            })
            .await?;
        let snapshot = self.token.snapshot().await;
        persist_credential(&self.credential_path, &snapshot, self.project_id.read().await.clone()).await;
        Ok(())
    }
}

#[async_trait]
impl UpstreamProvider for GeminiCliProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn generate_content(&self, model: &str, mut request: Value) -> ProviderResult<Value> {
        if let Some(obj) = request.as_object_mut() {
            obj.insert("model".to_string(), Value::String(model.to_string()));
        }
        let body = self.call_with_auth_retry(request, "/v1internal:generateContent").await?;
        let envelope: Value = serde_json::from_slice(&body).map_err(|err| ProviderError::Other(err.to_string()))?;
        envelope
            .get("response")
            .cloned()
            .ok_or_else(|| ProviderError::Other("Code Assist response missing `response` envelope".to_string()))
    }

    async fn generate_content_stream(&self, model: &str, mut request: Value) -> ProviderResult<ByteStream> {
        if let Some(obj) = request.as_object_mut() {
            obj.insert("model".to_string(), Value::String(model.to_string()));
        }
        let wrapped = self.wrap_request_from_value(request).await?;
        let req = self.build_request("/v1internal:streamGenerateContent?alt=sse", &wrapped).await?;
        let raw = self.client.call_stream(req).await?;
        Ok(unwrap_code_assist_stream(raw))
    }

    async fn list_models(&self) -> ProviderResult<Value> {
        // Code Assist exposes no public model-listing endpoint; the set of
        // supported models is the fixed Gemini family this gateway targets.
        Ok(json!({
            "models": [
                { "name": "models/gemini-2.5-pro", "displayName": "Gemini 2.5 Pro" },
                { "name": "models/gemini-2.5-flash", "displayName": "Gemini 2.5 Flash" },
            ]
        }))
    }

    async fn refresh_token_if_near_expiry(&self) -> ProviderResult<()> {
        let oauth_client = self.oauth_client.clone();
        self.token
            .refresh_if_near_expiry(TOKEN_REFRESH_SKEW_SECS, move |state| {
                let oauth_client = oauth_client.clone();
                async move { refresh_access_token(&oauth_client, &state.refresh_token).await }
            })
            .await?;
        let snapshot = self.token.snapshot().await;
        persist_credential(&self.credential_path, &snapshot, self.project_id.read().await.clone()).await;
        Ok(())
    }
}

fn normalize_model(model: &str) -> String {
    model.strip_prefix("models/").unwrap_or(model).to_string()
}

fn generate_user_prompt_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Code Assist SSE frames arrive wrapped the same way unary responses do
/// (`{"response": <gemini native chunk>}`); unwrap each event before
/// handing the bytes to the generic Gemini stream decoder downstream, so
/// it only ever sees native `{candidates, usageMetadata}` chunks.
fn unwrap_code_assist_stream(mut raw: ByteStream) -> ByteStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut parser = gproxy_protocol::SseParser::new();
        while let Some(chunk) = raw.recv().await {
            let events = parser.push_bytes(&chunk);
            for event in events {
                let Ok(value) = serde_json::from_str::<Value>(&event.data) else { continue };
                let Some(inner) = value.get("response") else { continue };
                let frame = format!("data: {}\n\n", inner);
                if tx.send(Bytes::from(frame.into_bytes())).await.is_err() {
                    return;
                }
            }
        }
    });
    rx
}

struct LoadedCredential {
    access_token: String,
    refresh_token: String,
    expiry_date: i64,
    project_id: Option<String>,
}

async fn load_credential(
    config: &GeminiCliConfig,
    path: &PathBuf,
    oauth_client: &wreq::Client,
) -> ProviderResult<LoadedCredential> {
    if let Some(b64) = &config.credential_base64 {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|err| ProviderError::InvalidConfig(format!("invalid credential base64: {err}")))?;
        let parsed: CredentialFile = serde_json::from_slice(&bytes).map_err(|err| ProviderError::InvalidConfig(err.to_string()))?;
        return Ok(parsed.into());
    }

    if let Ok(contents) = tokio::fs::read(path).await {
        let parsed: CredentialFile = serde_json::from_slice(&contents).map_err(|err| ProviderError::InvalidConfig(err.to_string()))?;
        return Ok(parsed.into());
    }

    oauth_common::ensure_interactive_available()?;
    let state = uuid::Uuid::new_v4().to_string();
    let redirect_uri = format!("http://localhost:{LOOPBACK_PORT}");
    let consent_url = format!(
        "{AUTH_URL}?response_type=code&client_id={CLIENT_ID}&redirect_uri={redirect_uri}&scope={}&access_type=offline&prompt=consent&include_granted_scopes=true&state={state}",
        urlencode(OAUTH_SCOPE),
    );
    let code = tokio::task::spawn_blocking(move || oauth_common::run_loopback_consent(LOOPBACK_PORT, &consent_url))
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))??;

    let token = exchange_code(oauth_client, &code, &redirect_uri).await?;
    let now_ms = gproxy_common::unix_now() * 1000;
    let credential = CredentialFile {
        access_token: token.access_token,
        refresh_token: token.refresh_token.unwrap_or_default(),
        expiry_date: now_ms + token.expires_in.unwrap_or(3600) * 1000,
        project_id: None,
    };
    persist_credential_file(path, &credential).await;
    Ok(credential.into())
}

impl From<CredentialFile> for LoadedCredential {
    fn from(value: CredentialFile) -> Self {
        Self {
            access_token: value.access_token,
            refresh_token: value.refresh_token,
            expiry_date: value.expiry_date,
            project_id: value.project_id,
        }
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::new();
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_uri: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

async fn exchange_code(client: &wreq::Client, code: &str, redirect_uri: &str) -> ProviderResult<oauth_common::TokenResponse> {
    let request = TokenRequest {
        client_id: CLIENT_ID,
        client_secret: CLIENT_SECRET,
        grant_type: "authorization_code",
        code: Some(code),
        redirect_uri: Some(redirect_uri),
        refresh_token: None,
    };
    send_token_request(client, &request).await
}

async fn refresh_access_token(client: &wreq::Client, refresh_token: &str) -> ProviderResult<TokenState> {
    let request = TokenRequest {
        client_id: CLIENT_ID,
        client_secret: CLIENT_SECRET,
        grant_type: "refresh_token",
        code: None,
        redirect_uri: None,
        refresh_token: Some(refresh_token),
    };
    let token = send_token_request(client, &request).await?;
    let now = gproxy_common::unix_now();
    Ok(TokenState {
        access_token: token.access_token,
        refresh_token: token.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
        expires_at: now + token.expires_in.unwrap_or(3600),
    })
}

async fn send_token_request(client: &wreq::Client, request: &TokenRequest<'_>) -> ProviderResult<oauth_common::TokenResponse> {
    let response = client
        .post(TOKEN_URL)
        .form(request)
        .send()
        .await
        .map_err(|err| ProviderError::Other(format!("token endpoint request failed: {err}")))?;
    let status = response.status();
    let body = response.bytes().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ProviderError::Upstream(gproxy_provider_core::UpstreamFailure::Http {
            status: status.as_u16(),
            body,
        }));
    }
    serde_json::from_slice(&body).map_err(|err| ProviderError::Other(err.to_string()))
}

async fn persist_credential(path: &PathBuf, state: &TokenState, project_id: Option<String>) {
    let credential = CredentialFile {
        access_token: state.access_token.clone(),
        refresh_token: state.refresh_token.clone(),
        expiry_date: state.expires_at * 1000,
        project_id,
    };
    persist_credential_file(path, &credential).await;
}

async fn persist_credential_file(path: &PathBuf, credential: &CredentialFile) {
    if let Ok(bytes) = serde_json::to_vec_pretty(credential) {
        if let Err(err) = gproxy_common::atomic_write(path, &bytes).await {
            tracing::warn!(error = %err, "failed to persist geminicli oauth credentials");
        }
    }
}

async fn discover_project_id(
    client: &wreq::Client,
    base_url: &str,
    access_token: &str,
    default_tier: &str,
) -> ProviderResult<String> {
    let load_url = format!("{}/v1internal:loadCodeAssist", base_url.trim_end_matches('/'));
    let payload = json!({ "metadata": { "pluginType": "GEMINI" } });
    let response = client
        .post(&load_url)
        .header("authorization", format!("Bearer {access_token}"))
        .header("content-type", "application/json")
        .body(serde_json::to_vec(&payload).unwrap())
        .send()
        .await
        .map_err(|err| ProviderError::Other(format!("loadCodeAssist failed: {err}")))?;
    let body: Value = response.json().await.map_err(|err| ProviderError::Other(err.to_string()))?;
    if let Some(project) = body.get("cloudaicompanionProject").and_then(|v| v.as_str()) {
        return Ok(project.to_string());
    }

    let onboard_url = format!("{}/v1internal:onboardUser", base_url.trim_end_matches('/'));
    let tier_id = body
        .get("currentTier")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or(default_tier)
        .to_string();
    let onboard_payload = json!({
        "tierId": tier_id,
        "metadata": { "pluginType": "GEMINI" },
        "cloudaicompanionProject": "default",
    });
    loop {
        let response = client
            .post(&onboard_url)
            .header("authorization", format!("Bearer {access_token}"))
            .header("content-type", "application/json")
            .body(serde_json::to_vec(&onboard_payload).unwrap())
            .send()
            .await
            .map_err(|err| ProviderError::Other(format!("onboardUser failed: {err}")))?;
        let body: Value = response.json().await.map_err(|err| ProviderError::Other(err.to_string()))?;
        if body.get("done").and_then(|v| v.as_bool()) == Some(true) {
            return body
                .get("response")
                .and_then(|v| v.get("cloudaicompanionProject"))
                .and_then(|v| v.get("id"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| ProviderError::Other("onboardUser completed with no project id".to_string()));
        }
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_model_strips_models_prefix() {
        assert_eq!(normalize_model("models/gemini-2.5-pro"), "gemini-2.5-pro");
        assert_eq!(normalize_model("gemini-2.5-pro"), "gemini-2.5-pro");
    }

    #[test]
    fn generate_user_prompt_id_is_unique() {
        let a = generate_user_prompt_id();
        let b = generate_user_prompt_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn unwrap_code_assist_stream_strips_envelope() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(4);
        let unwrapped = unwrap_code_assist_stream(rx);
        tx.send(Bytes::from(
            "data: {\"response\": {\"candidates\": []}}\n\n".as_bytes().to_vec(),
        ))
        .await
        .unwrap();
        drop(tx);
        let mut out = unwrapped;
        let chunk = out.recv().await.unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains("candidates"));
        assert!(!text.contains("\"response\""));
    }
}
