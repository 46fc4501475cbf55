//! Generic OpenAI-compatible endpoint: a static bearer key, no token
//! lifecycle. Grounded on `providers/custom/mod.rs`'s OpenAI arm in the
//! teacher, trimmed to the operations this gateway exposes (no
//! `/v1/responses`, no token counting — out of scope per Non-goals).

use async_trait::async_trait;
use bytes::Bytes;
use gproxy_provider_core::{
    ApiKeyCredential, ByteStream, ProviderError, ProviderResult, UpstreamClient,
    UpstreamHttpRequest, UpstreamProvider,
};
use serde_json::Value;
use std::sync::Arc;

use crate::client::call_checked;

const PROVIDER_NAME: &str = "openai";

pub struct OpenAiCustomConfig {
    pub base_url: String,
    pub api_key: String,
    pub openrouter_referer: Option<String>,
    pub openrouter_title: Option<String>,
    pub request_max_retries: u32,
    pub request_base_delay_ms: u64,
}

pub struct OpenAiCustomProvider {
    config: OpenAiCustomConfig,
    credential: ApiKeyCredential,
    client: Arc<dyn UpstreamClient>,
}

impl OpenAiCustomProvider {
    pub fn new(config: OpenAiCustomConfig, client: Arc<dyn UpstreamClient>) -> ProviderResult<Self> {
        let credential = ApiKeyCredential::new(config.api_key.clone())?;
        Ok(Self {
            config,
            credential,
            client,
        })
    }

    fn is_openrouter(&self) -> bool {
        self.config.base_url.contains("openrouter.ai")
            || self.config.openrouter_referer.is_some()
    }

    fn build_request(&self, path: &str, body: Value) -> ProviderResult<UpstreamHttpRequest> {
        let url = build_url(&self.config.base_url, path);
        let bytes = serde_json::to_vec(&body).map_err(|err| ProviderError::Other(err.to_string()))?;
        let mut req = UpstreamHttpRequest::post_json(url, Bytes::from(bytes))
            .with_header("authorization", format!("Bearer {}", self.credential.key))
            .with_header("accept", "application/json");
        if self.is_openrouter() {
            if let Some(referer) = &self.config.openrouter_referer {
                req = req.with_header("HTTP-Referer", referer.clone());
            }
            if let Some(title) = &self.config.openrouter_title {
                req = req.with_header("X-Title", title.clone());
            }
        }
        Ok(req)
    }
}

#[async_trait]
impl UpstreamProvider for OpenAiCustomProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn generate_content(&self, _model: &str, request: Value) -> ProviderResult<Value> {
        let req = self.build_request("/chat/completions", request)?;
        let resp = gproxy_provider_core::retry_with_backoff_params(
            self.config.request_max_retries,
            std::time::Duration::from_millis(self.config.request_base_delay_ms),
            || {
                let req = req.clone();
                let client = self.client.clone();
                async move { call_checked(client.as_ref(), req).await }
            },
        )
        .await?;
        serde_json::from_slice(&resp.body).map_err(|err| ProviderError::Other(err.to_string()))
    }

    async fn generate_content_stream(&self, _model: &str, mut request: Value) -> ProviderResult<ByteStream> {
        if let Some(obj) = request.as_object_mut() {
            obj.insert("stream".to_string(), Value::Bool(true));
        }
        let req = self.build_request("/chat/completions", request)?;
        self.client.call_stream(req).await
    }

    async fn list_models(&self) -> ProviderResult<Value> {
        let url = build_url(&self.config.base_url, "/models");
        let req = UpstreamHttpRequest::get(url)
            .with_header("authorization", format!("Bearer {}", self.credential.key))
            .with_header("accept", "application/json");
        let resp = call_checked(self.client.as_ref(), req).await?;
        serde_json::from_slice(&resp.body).map_err(|err| ProviderError::Other(err.to_string()))
    }

    async fn refresh_token_if_near_expiry(&self) -> ProviderResult<()> {
        Ok(())
    }
}

fn build_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OpenAiCustomConfig {
        OpenAiCustomConfig {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: "sk-test".to_string(),
            openrouter_referer: Some("https://gproxy.local".to_string()),
            openrouter_title: Some("gproxy".to_string()),
            request_max_retries: 3,
            request_base_delay_ms: 1000,
        }
    }

    struct NullClient;

    #[async_trait]
    impl UpstreamClient for NullClient {
        async fn call(&self, _request: UpstreamHttpRequest) -> ProviderResult<gproxy_provider_core::UpstreamHttpResponse> {
            unreachable!()
        }
        async fn call_stream(&self, _request: UpstreamHttpRequest) -> ProviderResult<ByteStream> {
            unreachable!()
        }
    }

    #[test]
    fn detects_openrouter_base_url() {
        let provider = OpenAiCustomProvider::new(config(), Arc::new(NullClient)).unwrap();
        assert!(provider.is_openrouter());
    }

    #[test]
    fn rejects_empty_api_key() {
        let mut cfg = config();
        cfg.api_key = "   ".to_string();
        assert!(OpenAiCustomProvider::new(cfg, Arc::new(NullClient)).is_err());
    }

    #[test]
    fn build_request_adds_openrouter_headers() {
        let provider = OpenAiCustomProvider::new(config(), Arc::new(NullClient)).unwrap();
        let req = provider
            .build_request("/chat/completions", serde_json::json!({}))
            .unwrap();
        assert_eq!(req.headers.get("HTTP-Referer").unwrap(), "https://gproxy.local");
        assert_eq!(req.headers.get("X-Title").unwrap(), "gproxy");
    }
}
