//! The HTTP frontend: one catch-all handler that runs every inbound
//! request through `gproxy_core::classify` → `gproxy_core::auth` →
//! `gproxy_core::proxy_engine::handle`, then turns the result (or error)
//! into an axum response. SSE responses stream chunk by chunk.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use gproxy_core::proxy_engine::ProxyResponse;
use gproxy_core::{classify_request, AppState, EndpointType, ProxyError};

/// Builds the full router for one running gateway. The only state every
/// handler needs is the shared `AppState`; there is no per-route setup
/// because `classify` already resolves method+path+headers into an
/// `EndpointType` before any handler logic runs.
pub fn proxy_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return preflight_response();
    }
    match route(state, method, uri, headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// `CorsLayer::permissive()` attaches the `access-control-allow-*`
/// headers to every response, including this one; `classify_request` has
/// no route for `OPTIONS` itself, so it's answered here directly rather
/// than falling through to `NotFound`.
fn preflight_response() -> Response {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .expect("static preflight response is always valid")
}

async fn route(
    state: Arc<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let classified = classify_request(&method, uri.path(), &headers)?;

    if !matches!(classified.endpoint, EndpointType::Health) {
        let query = uri.query().unwrap_or("");
        gproxy_core::authenticate(&state.global.api_key, &headers, query)?;
    }

    match gproxy_core::proxy_engine::handle(&state, classified, body).await? {
        ProxyResponse::Json(value) => Ok(axum::Json(value).into_response()),
        ProxyResponse::Stream { receiver } => Ok(sse_response(receiver)),
    }
}

fn sse_response(receiver: tokio::sync::mpsc::Receiver<Bytes>) -> Response {
    let stream = ReceiverStream::new(receiver).map(Ok::<_, std::io::Error>);
    let body = Body::from_stream(stream);
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("connection", "keep-alive")
        .body(body)
        .expect("static SSE headers are always valid")
}
