//! The static-API-key Claude endpoint: POST `<baseUrl>/messages` with
//! `anthropic-version`. Grounded on the Claude arm of the teacher's
//! `providers/custom/mod.rs`; the model list here is static per spec
//! rather than fetched, so `list_models` never calls out.

use async_trait::async_trait;
use bytes::Bytes;
use gproxy_provider_core::{
    ApiKeyCredential, ByteStream, ProviderError, ProviderResult, UpstreamClient,
    UpstreamHttpRequest, UpstreamProvider,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::client::call_checked;

const PROVIDER_NAME: &str = "claude";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const STATIC_MODEL_FAMILIES: &[&str] = &[
    "claude-opus-4",
    "claude-sonnet-4",
    "claude-3-7",
    "claude-3-5",
    "claude-3-opus",
    "claude-3-haiku",
];

pub struct ClaudeCustomConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_max_retries: u32,
    pub request_base_delay_ms: u64,
}

pub struct ClaudeCustomProvider {
    config: ClaudeCustomConfig,
    credential: ApiKeyCredential,
    client: Arc<dyn UpstreamClient>,
}

impl ClaudeCustomProvider {
    pub fn new(config: ClaudeCustomConfig, client: Arc<dyn UpstreamClient>) -> ProviderResult<Self> {
        let credential = ApiKeyCredential::new(config.api_key.clone())?;
        Ok(Self {
            config,
            credential,
            client,
        })
    }

    fn build_request(&self, path: &str, body: Value) -> ProviderResult<UpstreamHttpRequest> {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let bytes = serde_json::to_vec(&body).map_err(|err| ProviderError::Other(err.to_string()))?;
        Ok(UpstreamHttpRequest::post_json(url, Bytes::from(bytes))
            .with_header("x-api-key", self.credential.key.clone())
            .with_header("anthropic-version", ANTHROPIC_VERSION)
            .with_header("accept", "application/json"))
    }
}

#[async_trait]
impl UpstreamProvider for ClaudeCustomProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn generate_content(&self, _model: &str, request: Value) -> ProviderResult<Value> {
        let req = self.build_request("/messages", request)?;
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
        let req = self.build_request("/messages", request)?;
        self.client.call_stream(req).await
    }

    async fn list_models(&self) -> ProviderResult<Value> {
        let models: Vec<Value> = STATIC_MODEL_FAMILIES
            .iter()
            .map(|family| {
                json!({
                    "id": family,
                    "type": "model",
                    "display_name": family,
                })
            })
            .collect();
        Ok(json!({ "data": models, "has_more": false }))
    }

    async fn refresh_token_if_near_expiry(&self) -> ProviderResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ClaudeCustomProvider {
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
        ClaudeCustomProvider::new(
            ClaudeCustomConfig {
                base_url: "https://api.anthropic.com/v1".to_string(),
                api_key: "sk-ant-test".to_string(),
                request_max_retries: 3,
                request_base_delay_ms: 1000,
            },
            Arc::new(NullClient),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn list_models_is_static_and_never_calls_out() {
        let provider = provider();
        let models = provider.list_models().await.unwrap();
        let data = models["data"].as_array().unwrap();
        assert_eq!(data.len(), STATIC_MODEL_FAMILIES.len());
        assert!(data.iter().any(|m| m["id"] == "claude-sonnet-4"));
    }

    #[test]
    fn build_request_carries_anthropic_headers() {
        let provider = provider();
        let req = provider.build_request("/messages", json!({})).unwrap();
        assert_eq!(req.headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
        assert_eq!(req.headers.get("x-api-key").unwrap(), "sk-ant-test");
    }
}
