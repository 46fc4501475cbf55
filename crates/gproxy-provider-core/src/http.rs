//! The small transport-facing trait every provider adapter calls through.
//! Implemented once in `gproxy-provider-impl` over `wreq`/`wreq-util`
//! (not `reqwest`, to stay on the crates this workspace already depends
//! on for outbound HTTP).

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::Receiver;

use crate::errors::ProviderResult;

pub type ByteStream = Receiver<Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl UpstreamHttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn post_json(url: impl Into<String>, body: Bytes) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers,
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl UpstreamHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport abstraction so adapters (and their tests) don't depend on a
/// concrete HTTP client crate. `call` is for unary request/response;
/// `call_stream` is for SSE/event-stream bodies, yielding raw chunks on
/// the returned channel as they arrive over the wire.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn call(&self, request: UpstreamHttpRequest) -> ProviderResult<UpstreamHttpResponse>;

    async fn call_stream(&self, request: UpstreamHttpRequest) -> ProviderResult<ByteStream>;
}
