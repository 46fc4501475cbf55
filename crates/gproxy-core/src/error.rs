//! The error-kind taxonomy. `ProxyError` is the single type the HTTP
//! frontend serializes; every other layer returns one of these instead of
//! writing a status code itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Unauthorized: API key is invalid or missing.")]
    Unauthorized,

    #[error("malformed request body: {0}")]
    MalformedJson(String),

    #[error("model '{0}' is not supported by this provider")]
    UnsupportedModel(String),

    #[error("request contains no messages")]
    EmptyConversation,

    #[error("not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("upstream authentication failed: {0}")]
    UpstreamAuth(String),

    #[error("upstream rate limit exceeded")]
    UpstreamRateLimited,

    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("upstream returned an unparseable response: {0}")]
    UpstreamProtocol(String),

    /// Never reaches the HTTP serializer: returned from `bootstrap` and
    /// causes `main` to exit non-zero before the listener binds.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::MalformedJson(_)
            | ProxyError::UnsupportedModel(_)
            | ProxyError::EmptyConversation => StatusCode::BAD_REQUEST,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::UpstreamAuth(_)
            | ProxyError::UpstreamRateLimited
            | ProxyError::UpstreamFailure(_)
            | ProxyError::UpstreamProtocol(_) => StatusCode::BAD_GATEWAY,
            ProxyError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<&str> {
        match self {
            ProxyError::MalformedJson(detail)
            | ProxyError::UnsupportedModel(detail)
            | ProxyError::UpstreamAuth(detail)
            | ProxyError::UpstreamFailure(detail)
            | ProxyError::UpstreamProtocol(detail)
            | ProxyError::ConfigError(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn body_json(&self) -> serde_json::Value {
        match self.details() {
            Some(details) => json!({ "error": { "message": self.to_string(), "details": details } }),
            None => json!({ "error": { "message": self.to_string() } }),
        }
    }
}

impl From<gproxy_transform::RegistryError> for ProxyError {
    fn from(err: gproxy_transform::RegistryError) -> Self {
        ProxyError::MalformedJson(err.to_string())
    }
}

impl From<gproxy_provider_core::ProviderError> for ProxyError {
    fn from(err: gproxy_provider_core::ProviderError) -> Self {
        use gproxy_provider_core::{ProviderError, UpstreamFailure};
        match err {
            ProviderError::Upstream(UpstreamFailure::Http { status, body }) => {
                let body_text = String::from_utf8_lossy(&body).to_string();
                match status {
                    401 | 403 => ProxyError::UpstreamAuth(body_text),
                    429 => ProxyError::UpstreamRateLimited,
                    _ => ProxyError::UpstreamFailure(format!("status {status}: {body_text}")),
                }
            }
            ProviderError::Upstream(UpstreamFailure::Transport { kind, message }) => {
                ProxyError::UpstreamFailure(format!("{kind:?}: {message}"))
            }
            ProviderError::Unsupported(what) => ProxyError::UnsupportedModel(what.to_string()),
            ProviderError::InvalidConfig(detail) => ProxyError::ConfigError(detail),
            ProviderError::MissingCredentialField(field) => {
                ProxyError::ConfigError(format!("missing credential field: {field}"))
            }
            ProviderError::Other(detail) => ProxyError::UpstreamProtocol(detail),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), axum::Json(self.body_json())).into_response()
    }
}
