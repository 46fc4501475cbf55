//! Per-family pure operations used for logging and model/stream
//! extraction ahead of the full canonical conversion. Every function here
//! must never panic, even on a malformed body — callers use these for
//! best-effort logging, not validation.

use gproxy_protocol::ProtocolFamily;
use serde_json::Value;

/// `(modelName, isStream)`. For Gemini the model travels in the URL, not
/// the body, so the model half is always `None` here; the router reads it
/// from the classified endpoint instead.
pub fn extract_model_and_stream(family: ProtocolFamily, body: &Value) -> (Option<String>, bool) {
    match family {
        ProtocolFamily::OpenAi | ProtocolFamily::Claude => {
            let model = body.get("model").and_then(Value::as_str).map(str::to_string);
            let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
            (model, stream)
        }
        ProtocolFamily::Gemini => (None, false),
    }
}

/// Best-effort extraction of the human-readable prompt text, for logging
/// only.
pub fn extract_prompt_text(family: ProtocolFamily, body: &Value) -> String {
    match family {
        ProtocolFamily::OpenAi => body
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| text_of(m.get("content")?))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        ProtocolFamily::Gemini => body
            .get("contents")
            .and_then(Value::as_array)
            .map(|contents| {
                contents
                    .iter()
                    .flat_map(|c| c.get("parts").and_then(Value::as_array).cloned().unwrap_or_default())
                    .filter_map(|p| p.get("text").and_then(Value::as_str).map(str::to_string))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        ProtocolFamily::Claude => body
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| text_of(m.get("content")?))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
    }
}

/// Best-effort extraction of assistant text from a unary response body,
/// for logging and for the round-trip/invariant tests in §8.
pub fn extract_response_text(family: ProtocolFamily, body: &Value) -> String {
    match family {
        ProtocolFamily::OpenAi => body
            .get("choices")
            .and_then(Value::as_array)
            .map(|choices| {
                choices
                    .iter()
                    .filter_map(|c| c.get("message")?.get("content")?.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        ProtocolFamily::Gemini => body
            .get("candidates")
            .and_then(Value::as_array)
            .map(|candidates| {
                candidates
                    .iter()
                    .flat_map(|c| {
                        c.get("content")
                            .and_then(|content| content.get("parts"))
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default()
                    })
                    .filter_map(|p| p.get("text").and_then(Value::as_str).map(str::to_string))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        ProtocolFamily::Claude => body
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str).map(str::to_string))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
    }
}

fn text_of(content: &Value) -> Option<String> {
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content.as_array().map(|parts| {
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_openai_model_and_stream() {
        let body = json!({"model": "gpt-4o", "stream": true, "messages": []});
        assert_eq!(
            extract_model_and_stream(ProtocolFamily::OpenAi, &body),
            (Some("gpt-4o".to_string()), true)
        );
    }

    #[test]
    fn extracts_openai_prompt_text_from_string_content() {
        let body = json!({"messages": [{"role": "user", "content": "hello"}]});
        assert_eq!(extract_prompt_text(ProtocolFamily::OpenAi, &body), "hello");
    }

    #[test]
    fn extracts_gemini_prompt_text_from_parts() {
        let body = json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]});
        assert_eq!(extract_prompt_text(ProtocolFamily::Gemini, &body), "hi");
    }

    #[test]
    fn never_panics_on_malformed_body() {
        let body = json!("not an object");
        assert_eq!(extract_prompt_text(ProtocolFamily::Claude, &body), "");
        assert_eq!(extract_response_text(ProtocolFamily::OpenAi, &body), "");
        assert_eq!(extract_model_and_stream(ProtocolFamily::Claude, &body), (None, false));
    }

    #[test]
    fn extracts_claude_response_text() {
        let body = json!({"content": [{"type": "text", "text": "2+2=4"}]});
        assert_eq!(extract_response_text(ProtocolFamily::Claude, &body), "2+2=4");
    }
}
