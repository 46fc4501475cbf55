//! The single `wreq::Client` this whole process shares, and its
//! `UpstreamClient` implementation. A global proxy is set once at
//! startup; every adapter goes through the same pooled connections.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use gproxy_provider_core::errors::{ProviderError, TransportErrorKind, UpstreamFailure};
use gproxy_provider_core::http::{ByteStream, HttpMethod, UpstreamHttpRequest, UpstreamHttpResponse};
use gproxy_provider_core::{ProviderResult, UpstreamClient};
use wreq::Proxy;

static SHARED_CLIENT: OnceLock<Arc<wreq::Client>> = OnceLock::new();

/// Builds (once) and returns the process-wide `wreq::Client`. The proxy is
/// fixed for the lifetime of the process — `gproxy-core::bootstrap` reads
/// it once from configuration before any adapter is constructed.
pub fn shared_client(proxy: Option<&str>) -> ProviderResult<Arc<wreq::Client>> {
    if let Some(client) = SHARED_CLIENT.get() {
        return Ok(client.clone());
    }

    let mut builder = wreq::Client::builder().emulation(wreq_util::Emulation::Chrome136);
    if let Some(proxy_url) = proxy {
        let proxy = Proxy::all(proxy_url)
            .map_err(|err| ProviderError::InvalidConfig(format!("invalid proxy url: {err}")))?;
        builder = builder.proxy(proxy);
    }

    let client = builder
        .build()
        .map_err(|err| ProviderError::InvalidConfig(format!("failed to build http client: {err}")))?;
    let _ = SHARED_CLIENT.set(Arc::new(client));
    Ok(SHARED_CLIENT.get().expect("shared client just set").clone())
}

/// Calls `client` and turns a non-2xx response into `UpstreamFailure::Http`
/// so callers can feed this straight into `retry_with_backoff` — retryable
/// status codes are decided there, not here.
pub async fn call_checked(
    client: &dyn UpstreamClient,
    request: UpstreamHttpRequest,
) -> ProviderResult<UpstreamHttpResponse> {
    let resp = client.call(request).await?;
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(ProviderError::Upstream(UpstreamFailure::Http {
            status: resp.status,
            body: resp.body,
        }))
    }
}

pub struct WreqUpstreamClient {
    client: Arc<wreq::Client>,
}

impl WreqUpstreamClient {
    pub fn new(proxy: Option<&str>) -> ProviderResult<Self> {
        Ok(Self {
            client: shared_client(proxy)?,
        })
    }

    fn build_request(&self, request: &UpstreamHttpRequest) -> wreq::RequestBuilder {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url).body(request.body.to_vec()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    fn map_transport_error(err: wreq::Error) -> ProviderError {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        ProviderError::Upstream(UpstreamFailure::Transport {
            kind,
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl UpstreamClient for WreqUpstreamClient {
    async fn call(&self, request: UpstreamHttpRequest) -> ProviderResult<UpstreamHttpResponse> {
        let response = self
            .build_request(&request)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(Self::map_transport_error)?;

        Ok(UpstreamHttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn call_stream(&self, request: UpstreamHttpRequest) -> ProviderResult<ByteStream> {
        let response = self
            .build_request(&request)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.bytes().await.unwrap_or_default();
            return Err(ProviderError::Upstream(UpstreamFailure::Http { status, body }));
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
        let mut stream = response.bytes_stream();
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else { break };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
