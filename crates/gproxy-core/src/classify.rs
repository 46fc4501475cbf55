//! Turns method + path + headers into an `EndpointType` and a resolved
//! provider, the way spec §4.1 describes: strip a leading provider path
//! segment or a `model-provider` header before classifying what's left.

use axum::http::{HeaderMap, Method};

use crate::config::ProviderKind;
use crate::error::ProxyError;
use gproxy_protocol::ProtocolFamily;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointType {
    OpenAiChat,
    OpenAiModelList,
    GeminiContent { model: String, stream: bool },
    GeminiModelList,
    ClaudeMessage,
    Health,
}

impl EndpointType {
    pub fn inbound_family(&self) -> Option<ProtocolFamily> {
        match self {
            EndpointType::OpenAiChat | EndpointType::OpenAiModelList => Some(ProtocolFamily::OpenAi),
            EndpointType::GeminiContent { .. } | EndpointType::GeminiModelList => {
                Some(ProtocolFamily::Gemini)
            }
            EndpointType::ClaudeMessage => Some(ProtocolFamily::Claude),
            EndpointType::Health => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classified {
    pub endpoint: EndpointType,
    pub provider: Option<ProviderKind>,
}

const MODEL_PROVIDER_HEADER: &str = "model-provider";

/// Resolves the provider in spec's priority order (leading path segment,
/// then the `model-provider` header, then `None` — the caller substitutes
/// the configured default). Returns the path with any provider segment
/// stripped.
pub fn resolve_provider<'a>(
    path: &'a str,
    headers: &HeaderMap,
) -> (Option<ProviderKind>, &'a str) {
    let trimmed = path.trim_start_matches('/');
    if let Some((first, rest)) = trimmed.split_once('/') {
        if let Some(provider) = ProviderKind::from_path_segment(first) {
            return (Some(provider), rest.trim_start_matches('/'));
        }
    } else if let Some(provider) = ProviderKind::from_path_segment(trimmed) {
        return (Some(provider), "");
    }

    let header_provider = headers
        .get(MODEL_PROVIDER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(ProviderKind::from_path_segment);
    (header_provider, path)
}

/// Classifies method + (already provider-stripped) path into exactly one
/// endpoint-type, or a routing error.
pub fn classify(method: &Method, path: &str) -> Result<EndpointType, ProxyError> {
    let trimmed = path.trim_start_matches('/');
    let segments: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    };

    match segments.as_slice() {
        ["health"] if method == Method::GET => Ok(EndpointType::Health),
        ["v1", "chat", "completions"] => {
            require_post(method)?;
            Ok(EndpointType::OpenAiChat)
        }
        ["v1", "models"] => {
            require_get(method)?;
            Ok(EndpointType::OpenAiModelList)
        }
        ["v1beta", "models"] => {
            require_get(method)?;
            Ok(EndpointType::GeminiModelList)
        }
        ["v1beta", "models", rest] => {
            require_post(method)?;
            classify_gemini_content(rest)
        }
        ["v1", "messages"] => {
            require_post(method)?;
            Ok(EndpointType::ClaudeMessage)
        }
        _ => Err(ProxyError::NotFound),
    }
}

fn classify_gemini_content(segment: &str) -> Result<EndpointType, ProxyError> {
    let (model, action) = segment
        .split_once(':')
        .ok_or(ProxyError::NotFound)?;
    match action {
        "generateContent" => Ok(EndpointType::GeminiContent {
            model: model.to_string(),
            stream: false,
        }),
        "streamGenerateContent" => Ok(EndpointType::GeminiContent {
            model: model.to_string(),
            stream: true,
        }),
        _ => Err(ProxyError::NotFound),
    }
}

fn require_post(method: &Method) -> Result<(), ProxyError> {
    if method == Method::POST {
        Ok(())
    } else {
        Err(ProxyError::MethodNotAllowed)
    }
}

fn require_get(method: &Method) -> Result<(), ProxyError> {
    if method == Method::GET {
        Ok(())
    } else {
        Err(ProxyError::MethodNotAllowed)
    }
}

/// Combines provider resolution and endpoint classification, as the HTTP
/// handlers see it.
pub fn classify_request(method: &Method, path: &str, headers: &HeaderMap) -> Result<Classified, ProxyError> {
    let (provider, stripped) = resolve_provider(path, headers);
    let endpoint = classify(method, stripped)?;
    Ok(Classified { endpoint, provider })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_openai_chat() {
        let endpoint = classify(&Method::POST, "/v1/chat/completions").unwrap();
        assert_eq!(endpoint, EndpointType::OpenAiChat);
    }

    #[test]
    fn classifies_gemini_stream_content() {
        let endpoint = classify(&Method::POST, "/v1beta/models/gemini-2.5-pro:streamGenerateContent").unwrap();
        assert_eq!(
            endpoint,
            EndpointType::GeminiContent { model: "gemini-2.5-pro".to_string(), stream: true }
        );
    }

    #[test]
    fn unknown_path_is_not_found() {
        assert!(matches!(classify(&Method::GET, "/nope"), Err(ProxyError::NotFound)));
    }

    #[test]
    fn wrong_method_is_method_not_allowed() {
        assert!(matches!(classify(&Method::GET, "/v1/chat/completions"), Err(ProxyError::MethodNotAllowed)));
    }

    #[test]
    fn strips_leading_provider_segment() {
        let headers = HeaderMap::new();
        let (provider, rest) = resolve_provider("/claude-custom/v1/chat/completions", &headers);
        assert_eq!(provider, Some(ProviderKind::ClaudeCustom));
        assert_eq!(rest, "v1/chat/completions");
    }

    #[test]
    fn reads_model_provider_header_when_no_path_segment() {
        let mut headers = HeaderMap::new();
        headers.insert("model-provider", "kiro".parse().unwrap());
        let (provider, rest) = resolve_provider("/v1/chat/completions", &headers);
        assert_eq!(provider, Some(ProviderKind::Kiro));
        assert_eq!(rest, "/v1/chat/completions");
    }
}
