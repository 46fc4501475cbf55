//! The single-request translation pipeline: classify → strategy → convert
//! → provider adapter (with retries/refresh) → convert back → respond.
//! This is the only place that ties `gproxy-transform` and
//! `gproxy-provider-core`/`-impl` together.

use std::sync::Arc;

use bytes::Bytes;
use gproxy_protocol::ProtocolFamily;
use gproxy_transform::{CanonicalFinishReason, CanonicalRequest, CanonicalStreamEvent, CanonicalUsage};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::classify::{Classified, EndpointType};
use crate::config::{DefaultModelMode, ProviderKind};
use crate::error::ProxyError;
use crate::state::AppState;

pub enum ProxyResponse {
    Json(Value),
    Stream {
        receiver: mpsc::Receiver<Bytes>,
    },
}

/// Runs the whole pipeline for one already-classified request.
pub async fn handle(state: &AppState, classified: Classified, body: Bytes) -> Result<ProxyResponse, ProxyError> {
    match classified.endpoint {
        EndpointType::Health => Ok(ProxyResponse::Json(health_body(state))),
        EndpointType::OpenAiModelList => handle_model_list(state, classified.provider, ProtocolFamily::OpenAi).await,
        EndpointType::GeminiModelList => handle_model_list(state, classified.provider, ProtocolFamily::Gemini).await,
        EndpointType::OpenAiChat => {
            handle_chat(state, classified.provider, ProtocolFamily::OpenAi, body, None, None).await
        }
        EndpointType::ClaudeMessage => {
            handle_chat(state, classified.provider, ProtocolFamily::Claude, body, None, None).await
        }
        EndpointType::GeminiContent { model, stream } => {
            handle_chat(state, classified.provider, ProtocolFamily::Gemini, body, Some(model), Some(stream)).await
        }
    }
}

fn health_body(state: &AppState) -> Value {
    serde_json::json!({
        "status": "ok",
        "timestamp": gproxy_common::unix_now(),
        "provider": state.global.default_provider.as_path_segment(),
    })
}

fn resolve_active_provider(
    state: &AppState,
    override_kind: Option<ProviderKind>,
) -> Result<(ProviderKind, Arc<dyn gproxy_provider_core::UpstreamProvider>), ProxyError> {
    let kind = state.resolve_provider(override_kind);
    let provider = state
        .provider(kind)
        .ok_or_else(|| ProxyError::ConfigError(format!("provider '{}' is not configured", kind.as_path_segment())))?;
    Ok((kind, provider))
}

async fn handle_model_list(
    state: &AppState,
    override_kind: Option<ProviderKind>,
    inbound_family: ProtocolFamily,
) -> Result<ProxyResponse, ProxyError> {
    let (provider_kind, provider) = resolve_active_provider(state, override_kind)?;
    let native = provider.list_models().await?;
    let body = convert_model_list(provider_kind.native_family(), inbound_family, native)?;
    Ok(ProxyResponse::Json(body))
}

fn model_list_items(family: ProtocolFamily, body: &Value) -> Vec<Value> {
    match family {
        ProtocolFamily::OpenAi => body.get("data").and_then(Value::as_array).cloned().unwrap_or_default(),
        ProtocolFamily::Gemini => body.get("models").and_then(Value::as_array).cloned().unwrap_or_default(),
        ProtocolFamily::Claude => body.get("data").and_then(Value::as_array).cloned().unwrap_or_default(),
    }
}

fn wrap_model_list(family: ProtocolFamily, items: Vec<Value>) -> Value {
    match family {
        ProtocolFamily::OpenAi => serde_json::json!({ "object": "list", "data": items }),
        ProtocolFamily::Gemini => serde_json::json!({ "models": items }),
        ProtocolFamily::Claude => serde_json::json!({ "data": items, "has_more": false }),
    }
}

fn convert_model_list(from: ProtocolFamily, to: ProtocolFamily, body: Value) -> Result<Value, ProxyError> {
    let items = model_list_items(from, &body)
        .into_iter()
        .map(|item| gproxy_transform::convert_model(from, to, item).map_err(ProxyError::from))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(wrap_model_list(to, items))
}

/// Applies spec §4.1's default-model policy in place.
fn apply_default_model_policy(global: &crate::config::GlobalConfig, request: &mut CanonicalRequest) {
    let Some(default_model) = &global.default_model else { return };
    match global.default_model_mode {
        DefaultModelMode::Force => request.model = default_model.clone(),
        DefaultModelMode::Fallback if request.model.trim().is_empty() => {
            request.model = default_model.clone();
        }
        DefaultModelMode::Fallback => {}
    }
}

async fn handle_chat(
    state: &AppState,
    override_kind: Option<ProviderKind>,
    inbound_family: ProtocolFamily,
    body: Bytes,
    path_model: Option<String>,
    path_stream: Option<bool>,
) -> Result<ProxyResponse, ProxyError> {
    let (provider_kind, provider) = resolve_active_provider(state, override_kind)?;
    let native_family = provider_kind.native_family();

    let body_value: Value =
        serde_json::from_slice(&body).map_err(|err| ProxyError::MalformedJson(err.to_string()))?;

    let mut canonical = gproxy_transform::decode_request(inbound_family, body_value)?;
    if let Some(model) = path_model {
        canonical.model = model;
    }
    if let Some(stream) = path_stream {
        canonical.stream = stream;
    }
    if canonical.turns.is_empty() {
        return Err(ProxyError::EmptyConversation);
    }

    apply_default_model_policy(&state.global, &mut canonical);
    state.system_prompt.apply(&mut canonical).await;
    state.system_prompt.mirror(&canonical).await;
    state.prompt_log.log(&canonical).await;

    tracing::info!(
        endpoint_family = %inbound_family,
        provider = provider_kind.as_path_segment(),
        model = %canonical.model,
        stream = canonical.stream,
        prompt = %gproxy_transform::canonical_prompt_preview(&canonical),
        "dispatching request"
    );

    let model = canonical.model.clone();
    let stream = canonical.stream;
    let outbound_body = gproxy_transform::encode_request(native_family, &canonical)?;

    if stream {
        let upstream = provider.generate_content_stream(&model, outbound_body).await?;
        let receiver = transcode_stream(upstream, native_family, inbound_family, model);
        Ok(ProxyResponse::Stream { receiver })
    } else {
        let native_response = provider.generate_content(&model, outbound_body).await?;
        let response_id = format!("gproxy-{}", gproxy_common::TraceId::new());
        let created = gproxy_common::unix_now();
        let canonical_response = gproxy_transform::decode_response(native_family, native_response)?;
        let body = gproxy_transform::encode_response(inbound_family, &canonical_response, &response_id, created)?;
        Ok(ProxyResponse::Json(body))
    }
}

enum AnyStreamDecoder {
    OpenAi(gproxy_transform::openai::StreamDecoder),
    Gemini(gproxy_transform::gemini::StreamDecoder),
    Claude(gproxy_transform::claude::StreamDecoder),
}

impl AnyStreamDecoder {
    fn new(family: ProtocolFamily) -> Self {
        match family {
            ProtocolFamily::OpenAi => AnyStreamDecoder::OpenAi(gproxy_transform::openai::StreamDecoder::new()),
            ProtocolFamily::Gemini => AnyStreamDecoder::Gemini(gproxy_transform::gemini::StreamDecoder::new()),
            ProtocolFamily::Claude => AnyStreamDecoder::Claude(gproxy_transform::claude::StreamDecoder::new()),
        }
    }

    fn push_bytes(&mut self, chunk: &Bytes) -> Vec<CanonicalStreamEvent> {
        match self {
            AnyStreamDecoder::OpenAi(d) => d.push_bytes(chunk),
            AnyStreamDecoder::Gemini(d) => d.push_bytes(chunk),
            AnyStreamDecoder::Claude(d) => d.push_bytes(chunk),
        }
    }

    fn finish(&mut self) -> Vec<CanonicalStreamEvent> {
        match self {
            AnyStreamDecoder::OpenAi(d) => d.finish(),
            AnyStreamDecoder::Gemini(d) => d.finish(),
            AnyStreamDecoder::Claude(d) => d.finish(),
        }
    }
}

enum AnyStreamEncoder {
    OpenAi(gproxy_transform::openai::StreamEncoder),
    Gemini(gproxy_transform::gemini::StreamEncoder),
    Claude(gproxy_transform::claude::StreamEncoder),
}

impl AnyStreamEncoder {
    fn new(family: ProtocolFamily, id: String, created: i64, model: String) -> Self {
        match family {
            ProtocolFamily::OpenAi => {
                AnyStreamEncoder::OpenAi(gproxy_transform::openai::StreamEncoder::new(id, created, model))
            }
            ProtocolFamily::Gemini => AnyStreamEncoder::Gemini(gproxy_transform::gemini::StreamEncoder::new()),
            ProtocolFamily::Claude => AnyStreamEncoder::Claude(gproxy_transform::claude::StreamEncoder::new(id, model)),
        }
    }

    fn encode(&mut self, event: &CanonicalStreamEvent) -> Vec<u8> {
        match self {
            AnyStreamEncoder::OpenAi(e) => e.encode(event),
            AnyStreamEncoder::Gemini(e) => e.encode(event),
            AnyStreamEncoder::Claude(e) => e.encode(event),
        }
    }
}

/// Spawns a task that reads `upstream`'s native-family SSE bytes,
/// re-emits them as `inbound_family` SSE bytes, and guarantees the
/// outbound stream always ends with a terminal `Done` event even if the
/// upstream connection closes without one (§8 invariant 7).
fn transcode_stream(
    mut upstream: mpsc::Receiver<Bytes>,
    native_family: ProtocolFamily,
    inbound_family: ProtocolFamily,
    model: String,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let id = format!("gproxy-{}", gproxy_common::TraceId::new());
        let created = gproxy_common::unix_now();
        let mut decoder = AnyStreamDecoder::new(native_family);
        let mut encoder = AnyStreamEncoder::new(inbound_family, id, created, model);
        let mut saw_done = false;

        while let Some(chunk) = upstream.recv().await {
            for event in decoder.push_bytes(&chunk) {
                if matches!(event, CanonicalStreamEvent::Done { .. }) {
                    saw_done = true;
                }
                let frame = encoder.encode(&event);
                if tx.send(Bytes::from(frame)).await.is_err() {
                    return;
                }
            }
        }

        for event in decoder.finish() {
            if matches!(event, CanonicalStreamEvent::Done { .. }) {
                saw_done = true;
            }
            let frame = encoder.encode(&event);
            if tx.send(Bytes::from(frame)).await.is_err() {
                return;
            }
        }

        if !saw_done {
            let frame = encoder.encode(&CanonicalStreamEvent::Done {
                finish_reason: CanonicalFinishReason::Stop,
                usage: CanonicalUsage::default(),
            });
            let _ = tx.send(Bytes::from(frame)).await;
        }
    });
    rx
}
