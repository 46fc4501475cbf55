//! The canonical message model. Every wire format is translated to and
//! from this shape; no conversion function ever maps one wire family
//! directly onto another. Never serialized directly — callers always go
//! through a family module's `to_canonical`/`from_canonical` pair.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalRole {
    User,
    Assistant,
}

/// Where a multimodal part's bytes live: inlined as base64, or referenced
/// by URL. Every wire format that can carry the part natively accepts
/// both; Claude only accepts `Base64` and degrades `Uri` (and all audio)
/// to a text placeholder (§4.2's multimodal normalization rules).
#[derive(Debug, Clone)]
pub enum MediaSource {
    Base64(String),
    Uri(String),
}

#[derive(Debug, Clone)]
pub enum CanonicalPart {
    Text(String),
    Image {
        mime_type: String,
        source: MediaSource,
    },
    Audio {
        mime_type: String,
        source: MediaSource,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        tool_call_id: String,
        /// Gemini identifies function responses by name, not call id; the
        /// OpenAI/Claude converters that originate a tool result populate
        /// this from the tool_call they're answering so the Gemini encoder
        /// has something to key on. See the documented simplification in
        /// the design notes: when it's missing, the tool name is assumed to
        /// equal the id.
        name: Option<String>,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone)]
pub struct CanonicalTurn {
    pub role: CanonicalRole,
    pub parts: Vec<CanonicalPart>,
}

#[derive(Debug, Clone)]
pub struct CanonicalTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub enum CanonicalToolChoice {
    Auto,
    None,
    Required,
    Named(String),
}

#[derive(Debug, Clone, Default)]
pub struct CanonicalRequest {
    pub model: String,
    pub system: Option<String>,
    pub turns: Vec<CanonicalTurn>,
    pub tools: Vec<CanonicalTool>,
    pub tool_choice: Option<CanonicalToolChoice>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub stream: bool,
}

impl Default for CanonicalRole {
    fn default() -> Self {
        CanonicalRole::User
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalFinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CanonicalResponse {
    pub model: String,
    pub parts: Vec<CanonicalPart>,
    pub finish_reason: CanonicalFinishReason,
    pub usage: CanonicalUsage,
}

/// A single increment of a streaming response. Tool-call arguments arrive
/// piecemeal (`ToolCallArgumentsDelta`) regardless of whether the source
/// wire format sent them whole (Gemini) or split across several frames
/// (OpenAI, Claude) — the family decoder is responsible for that
/// normalization so encoders only ever see the same two-step shape.
#[derive(Debug, Clone)]
pub enum CanonicalStreamEvent {
    TextDelta(String),
    ToolCallStart {
        index: u32,
        id: String,
        name: String,
    },
    ToolCallArgumentsDelta {
        index: u32,
        partial_json: String,
    },
    Done {
        finish_reason: CanonicalFinishReason,
        usage: CanonicalUsage,
    },
}

#[derive(Debug, Clone)]
pub struct CanonicalModel {
    pub id: String,
    pub display_name: String,
}

const PROMPT_PREVIEW_MAX_CHARS: usize = 200;

/// The last user turn's text, concatenated across its text parts. Used as
/// the basis for both the truncated tracing preview and the full
/// `log-prompts=file`/`console` dump.
pub fn canonical_last_user_text(request: &CanonicalRequest) -> String {
    request
        .turns
        .iter()
        .rev()
        .find(|turn| turn.role == CanonicalRole::User)
        .map(|turn| {
            turn.parts
                .iter()
                .filter_map(|part| match part {
                    CanonicalPart::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

/// A short, log-safe preview of the last user turn's text, truncated to
/// `PROMPT_PREVIEW_MAX_CHARS` chars. Used for the always-on `tracing`
/// dispatch line; `log-prompts=console|file` dump the untruncated text
/// separately (see `gproxy-core::prompt_log`).
pub fn canonical_prompt_preview(request: &CanonicalRequest) -> String {
    let text = canonical_last_user_text(request);
    if text.chars().count() <= PROMPT_PREVIEW_MAX_CHARS {
        text
    } else {
        let mut preview: String = text.chars().take(PROMPT_PREVIEW_MAX_CHARS).collect();
        preview.push('…');
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_user_text(text: &str) -> CanonicalRequest {
        CanonicalRequest {
            turns: vec![CanonicalTurn {
                role: CanonicalRole::User,
                parts: vec![CanonicalPart::Text(text.to_string())],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn preview_passes_short_prompts_through_unchanged() {
        let request = request_with_user_text("hello there");
        assert_eq!(canonical_prompt_preview(&request), "hello there");
    }

    #[test]
    fn preview_truncates_long_prompts_with_ellipsis() {
        let request = request_with_user_text(&"a".repeat(500));
        let preview = canonical_prompt_preview(&request);
        assert_eq!(preview.chars().count(), PROMPT_PREVIEW_MAX_CHARS + 1);
        assert!(preview.ends_with('…'));
    }

    #[test]
    fn preview_uses_last_user_turn_not_assistant() {
        let request = CanonicalRequest {
            turns: vec![
                CanonicalTurn { role: CanonicalRole::User, parts: vec![CanonicalPart::Text("first".into())] },
                CanonicalTurn { role: CanonicalRole::Assistant, parts: vec![CanonicalPart::Text("reply".into())] },
                CanonicalTurn { role: CanonicalRole::User, parts: vec![CanonicalPart::Text("second".into())] },
            ],
            ..Default::default()
        };
        assert_eq!(canonical_last_user_text(&request), "second");
    }
}
