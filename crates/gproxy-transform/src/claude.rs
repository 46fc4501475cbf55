//! Claude Messages API <-> canonical model conversion.

use gproxy_protocol::claude::{
    ClaudeModel, ContentBlock, ContentBlockDelta, CreateMessageRequest, CreateMessageResponse,
    ImageSource, Message, MessageContent, MessageDeltaFields, Role, StopReason, StreamEvent,
    SystemPrompt, Tool, ToolChoice, ToolResultContent, Usage,
};
use gproxy_protocol::SseEvent;
use serde_json::Value;

use crate::canonical::{
    CanonicalFinishReason, CanonicalModel, CanonicalPart, CanonicalRequest, CanonicalResponse,
    CanonicalRole, CanonicalStreamEvent, CanonicalTool, CanonicalToolChoice, CanonicalTurn,
    CanonicalUsage, MediaSource,
};

pub fn request_to_canonical(req: CreateMessageRequest) -> CanonicalRequest {
    let system = req.system.map(|system| match system {
        SystemPrompt::Text(text) => text,
        SystemPrompt::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    });

    let turns = req
        .messages
        .into_iter()
        .map(|message| {
            let role = match message.role {
                Role::User => CanonicalRole::User,
                Role::Assistant => CanonicalRole::Assistant,
            };
            let parts = match message.content {
                MessageContent::Text(text) => vec![CanonicalPart::Text(text)],
                MessageContent::Blocks(blocks) => {
                    blocks.into_iter().map(block_to_canonical).collect()
                }
            };
            CanonicalTurn { role, parts }
        })
        .collect();

    CanonicalRequest {
        model: req.model,
        system,
        turns,
        tools: req.tools.into_iter().flatten().map(tool_to_canonical).collect(),
        tool_choice: req.tool_choice.map(tool_choice_to_canonical),
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: Some(req.max_tokens),
        stop_sequences: Vec::new(),
        stream: req.stream.unwrap_or(false),
    }
}

pub fn canonical_to_request(req: &CanonicalRequest) -> CreateMessageRequest {
    CreateMessageRequest {
        model: req.model.clone(),
        messages: req.turns.iter().map(turn_to_message).collect(),
        max_tokens: req.max_tokens.unwrap_or(8192),
        system: req.system.clone().map(SystemPrompt::Text),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: Some(req.stream),
        tools: (!req.tools.is_empty()).then(|| req.tools.iter().map(canonical_to_tool).collect()),
        tool_choice: req.tool_choice.as_ref().map(canonical_to_tool_choice),
    }
}

fn turn_to_message(turn: &CanonicalTurn) -> Message {
    let role = match turn.role {
        CanonicalRole::User => Role::User,
        CanonicalRole::Assistant => Role::Assistant,
    };
    let blocks: Vec<ContentBlock> = turn.parts.iter().map(canonical_to_block).collect();
    Message {
        role,
        content: MessageContent::Blocks(blocks),
    }
}

fn block_to_canonical(block: ContentBlock) -> CanonicalPart {
    match block {
        ContentBlock::Text { text } => CanonicalPart::Text(text),
        ContentBlock::Image { source } => CanonicalPart::Image {
            mime_type: source.media_type,
            source: MediaSource::Base64(source.data),
        },
        ContentBlock::ToolUse { id, name, input } => CanonicalPart::ToolCall {
            id,
            name,
            arguments: input,
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let text = match content {
                Some(ToolResultContent::Text(text)) => text,
                Some(ToolResultContent::Blocks(blocks)) => blocks
                    .into_iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                None => String::new(),
            };
            CanonicalPart::ToolResult {
                tool_call_id: tool_use_id,
                name: None,
                content: text,
                is_error: is_error.unwrap_or(false),
            }
        }
    }
}

fn canonical_to_block(part: &CanonicalPart) -> ContentBlock {
    match part {
        CanonicalPart::Text(text) => ContentBlock::Text { text: text.clone() },
        // Claude only accepts base64 images; a URI-sourced one degrades
        // to a text placeholder per the multimodal normalization rules.
        CanonicalPart::Image { mime_type, source } => match source {
            MediaSource::Base64(data) => ContentBlock::Image {
                source: ImageSource {
                    kind: "base64".to_string(),
                    media_type: mime_type.clone(),
                    data: data.clone(),
                },
            },
            MediaSource::Uri(uri) => ContentBlock::Text {
                text: format!("[Image: {uri}]"),
            },
        },
        // Claude has no audio input at all; both sources degrade.
        CanonicalPart::Audio { source, .. } => ContentBlock::Text {
            text: match source {
                MediaSource::Base64(_) => "[Audio attachment omitted]".to_string(),
                MediaSource::Uri(uri) => format!("[Audio: {uri}]"),
            },
        },
        CanonicalPart::ToolCall { id, name, arguments } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: arguments.clone(),
        },
        CanonicalPart::ToolResult {
            tool_call_id,
            content,
            is_error,
            ..
        } => ContentBlock::ToolResult {
            tool_use_id: tool_call_id.clone(),
            content: Some(ToolResultContent::Text(content.clone())),
            is_error: Some(*is_error),
        },
    }
}

fn tool_to_canonical(tool: Tool) -> CanonicalTool {
    CanonicalTool {
        name: tool.name,
        description: tool.description,
        parameters: tool.input_schema,
    }
}

fn canonical_to_tool(tool: &CanonicalTool) -> Tool {
    Tool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.parameters.clone(),
    }
}

fn tool_choice_to_canonical(choice: ToolChoice) -> CanonicalToolChoice {
    match choice {
        ToolChoice::Auto => CanonicalToolChoice::Auto,
        ToolChoice::None => CanonicalToolChoice::None,
        ToolChoice::Any => CanonicalToolChoice::Required,
        ToolChoice::Tool { name } => CanonicalToolChoice::Named(name),
    }
}

fn canonical_to_tool_choice(choice: &CanonicalToolChoice) -> ToolChoice {
    match choice {
        CanonicalToolChoice::Auto => ToolChoice::Auto,
        CanonicalToolChoice::None => ToolChoice::None,
        CanonicalToolChoice::Required => ToolChoice::Any,
        CanonicalToolChoice::Named(name) => ToolChoice::Tool { name: name.clone() },
    }
}

pub fn response_to_canonical(resp: CreateMessageResponse) -> CanonicalResponse {
    CanonicalResponse {
        model: resp.model,
        parts: resp.content.into_iter().map(block_to_canonical).collect(),
        finish_reason: resp
            .stop_reason
            .map(finish_reason_to_canonical)
            .unwrap_or(CanonicalFinishReason::Stop),
        usage: CanonicalUsage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        },
    }
}

pub fn canonical_to_response(id: String, resp: &CanonicalResponse) -> CreateMessageResponse {
    CreateMessageResponse {
        id,
        kind: CreateMessageResponse::type_name().to_string(),
        role: Role::Assistant,
        content: resp.parts.iter().map(canonical_to_block).collect(),
        model: resp.model.clone(),
        stop_reason: Some(finish_reason_from_canonical(resp.finish_reason)),
        stop_sequence: None,
        usage: Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        },
    }
}

fn finish_reason_to_canonical(reason: StopReason) -> CanonicalFinishReason {
    match reason {
        StopReason::EndTurn => CanonicalFinishReason::Stop,
        StopReason::MaxTokens => CanonicalFinishReason::Length,
        StopReason::StopSequence => CanonicalFinishReason::Stop,
        StopReason::ToolUse => CanonicalFinishReason::ToolUse,
    }
}

fn finish_reason_from_canonical(reason: CanonicalFinishReason) -> StopReason {
    match reason {
        CanonicalFinishReason::Stop => StopReason::EndTurn,
        CanonicalFinishReason::Length => StopReason::MaxTokens,
        CanonicalFinishReason::ToolUse => StopReason::ToolUse,
        CanonicalFinishReason::ContentFilter => StopReason::EndTurn,
    }
}

pub fn model_to_canonical(model: ClaudeModel) -> CanonicalModel {
    CanonicalModel {
        id: model.id,
        display_name: model.display_name,
    }
}

pub fn canonical_to_model(model: &CanonicalModel) -> ClaudeModel {
    ClaudeModel {
        id: model.id.clone(),
        kind: "model".to_string(),
        display_name: model.display_name.clone(),
    }
}

/// Claude splits a tool call's JSON arguments across `input_json_delta`
/// events keyed by the block `index` opened in the preceding
/// `content_block_start`; this tracks which block each index represents
/// so argument fragments can be forwarded without buffering the whole
/// thing here — the canonical event stream carries the same split.
#[derive(Default)]
pub struct StreamDecoder {
    parser: gproxy_protocol::SseParser,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &bytes::Bytes) -> Vec<CanonicalStreamEvent> {
        let events = self.parser.push_bytes(chunk);
        self.ingest_events(events)
    }

    /// Flushes a final event left buffered when upstream closes the
    /// connection without a trailing blank line.
    pub fn finish(&mut self) -> Vec<CanonicalStreamEvent> {
        let events = self.parser.finish();
        self.ingest_events(events)
    }

    fn ingest_events(&mut self, events: Vec<SseEvent>) -> Vec<CanonicalStreamEvent> {
        let mut out = Vec::new();
        for event in events {
            let Ok(stream_event) = serde_json::from_str::<StreamEvent>(&event.data) else {
                continue;
            };
            match stream_event {
                StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::ToolUse { id, name, .. },
                } => out.push(CanonicalStreamEvent::ToolCallStart { index, id, name }),
                StreamEvent::ContentBlockStart {
                    content_block: ContentBlock::Text { text },
                    ..
                } if !text.is_empty() => out.push(CanonicalStreamEvent::TextDelta(text)),
                StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::TextDelta { text },
                } => {
                    let _ = index;
                    out.push(CanonicalStreamEvent::TextDelta(text));
                }
                StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::InputJsonDelta { partial_json },
                } => out.push(CanonicalStreamEvent::ToolCallArgumentsDelta {
                    index,
                    partial_json,
                }),
                StreamEvent::MessageDelta { delta, usage } => {
                    out.push(CanonicalStreamEvent::Done {
                        finish_reason: delta
                            .stop_reason
                            .map(finish_reason_to_canonical)
                            .unwrap_or(CanonicalFinishReason::Stop),
                        usage: CanonicalUsage {
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                        },
                    });
                }
                _ => {}
            }
        }
        out
    }
}

/// Renders canonical stream events into the Claude SSE event sequence:
/// one `message_start`, per-block `content_block_start`/`_delta`/`_stop`,
/// then `message_delta` and `message_stop`.
pub struct StreamEncoder {
    id: String,
    model: String,
    open_index: Option<u32>,
    emitted_start: bool,
}

impl StreamEncoder {
    pub fn new(id: String, model: String) -> Self {
        Self {
            id,
            model,
            open_index: None,
            emitted_start: false,
        }
    }

    fn frame(event: &StreamEvent) -> Vec<u8> {
        format!("data: {}\n\n", serde_json::to_string(event).unwrap()).into_bytes()
    }

    pub fn encode(&mut self, event: &CanonicalStreamEvent) -> Vec<u8> {
        let mut out = Vec::new();
        if !self.emitted_start {
            self.emitted_start = true;
            out.extend(Self::frame(&StreamEvent::MessageStart {
                message: CreateMessageResponse {
                    id: self.id.clone(),
                    kind: CreateMessageResponse::type_name().to_string(),
                    role: Role::Assistant,
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            }));
        }

        match event {
            CanonicalStreamEvent::TextDelta(text) => {
                if self.open_index.is_none() {
                    self.open_index = Some(0);
                    out.extend(Self::frame(&StreamEvent::ContentBlockStart {
                        index: 0,
                        content_block: ContentBlock::Text { text: String::new() },
                    }));
                }
                out.extend(Self::frame(&StreamEvent::ContentBlockDelta {
                    index: self.open_index.unwrap_or(0),
                    delta: ContentBlockDelta::TextDelta { text: text.clone() },
                }));
            }
            CanonicalStreamEvent::ToolCallStart { index, id, name } => {
                if let Some(open) = self.open_index {
                    out.extend(Self::frame(&StreamEvent::ContentBlockStop { index: open }));
                }
                self.open_index = Some(*index);
                out.extend(Self::frame(&StreamEvent::ContentBlockStart {
                    index: *index,
                    content_block: ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: Value::Object(Default::default()),
                    },
                }));
            }
            CanonicalStreamEvent::ToolCallArgumentsDelta { index, partial_json } => {
                out.extend(Self::frame(&StreamEvent::ContentBlockDelta {
                    index: *index,
                    delta: ContentBlockDelta::InputJsonDelta {
                        partial_json: partial_json.clone(),
                    },
                }));
            }
            CanonicalStreamEvent::Done {
                finish_reason,
                usage,
            } => {
                if let Some(open) = self.open_index.take() {
                    out.extend(Self::frame(&StreamEvent::ContentBlockStop { index: open }));
                }
                out.extend(Self::frame(&StreamEvent::MessageDelta {
                    delta: MessageDeltaFields {
                        stop_reason: Some(finish_reason_from_canonical(*finish_reason)),
                        stop_sequence: None,
                    },
                    usage: Usage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    },
                }));
                out.extend(Self::frame(&StreamEvent::MessageStop));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_use_block_becomes_canonical_tool_call() {
        let block = ContentBlock::ToolUse {
            id: "toolu_1".to_string(),
            name: "search".to_string(),
            input: serde_json::json!({"q": "rust"}),
        };
        match block_to_canonical(block) {
            CanonicalPart::ToolCall { name, arguments, .. } => {
                assert_eq!(name, "search");
                assert_eq!(arguments["q"], "rust");
            }
            _ => panic!("expected tool call"),
        }
    }

    #[test]
    fn tool_result_without_name_falls_back_to_nothing() {
        let part = CanonicalPart::ToolResult {
            tool_call_id: "toolu_1".to_string(),
            name: None,
            content: "42".to_string(),
            is_error: false,
        };
        let block = canonical_to_block(&part);
        match block {
            ContentBlock::ToolResult { tool_use_id, .. } => assert_eq!(tool_use_id, "toolu_1"),
            _ => panic!("expected tool result"),
        }
    }

    #[test]
    fn uri_sourced_image_degrades_to_text_placeholder() {
        let part = CanonicalPart::Image {
            mime_type: "image/png".to_string(),
            source: MediaSource::Uri("https://example.com/cat.png".to_string()),
        };
        match canonical_to_block(&part) {
            ContentBlock::Text { text } => {
                assert!(text.contains("https://example.com/cat.png"));
            }
            _ => panic!("expected a text placeholder, not an image block"),
        }
    }

    #[test]
    fn audio_part_always_degrades_to_text_placeholder() {
        let part = CanonicalPart::Audio {
            mime_type: "audio/wav".to_string(),
            source: MediaSource::Base64("AAAA".to_string()),
        };
        match canonical_to_block(&part) {
            ContentBlock::Text { .. } => {}
            _ => panic!("expected a text placeholder, Claude has no audio input"),
        }
    }
}
