//! OpenAI chat-completions <-> canonical model conversion.

use gproxy_protocol::openai::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChatCompletionStreamChoice, ChatMessage, ChoiceDelta, ContentPart, FinishReason,
    FunctionCall as WireFunctionCall, ImageUrl, InputAudio, MessageContent, MessageRole, Model,
    StopSequence, Tool, ToolCall, ToolChoice, ToolFunction, Usage,
};
use gproxy_protocol::{SseEvent, SseParser};
use serde_json::Value;

use crate::canonical::{
    CanonicalFinishReason, CanonicalModel, CanonicalPart, CanonicalRequest, CanonicalResponse,
    CanonicalRole, CanonicalStreamEvent, CanonicalTool, CanonicalToolChoice, CanonicalTurn,
    CanonicalUsage, MediaSource,
};

pub fn request_to_canonical(req: ChatCompletionRequest) -> CanonicalRequest {
    let mut system = None;
    let mut turns = Vec::new();

    for message in req.messages {
        match message.role {
            MessageRole::System => {
                if let Some(text) = content_to_text(message.content) {
                    system = Some(match system {
                        Some(existing) => format!("{existing}\n{text}"),
                        None => text,
                    });
                }
            }
            MessageRole::User => {
                turns.push(CanonicalTurn {
                    role: CanonicalRole::User,
                    parts: content_to_parts(message.content),
                });
            }
            MessageRole::Assistant => {
                let mut parts = content_to_parts(message.content);
                for call in message.tool_calls.into_iter().flatten() {
                    parts.push(tool_call_to_part(call));
                }
                turns.push(CanonicalTurn {
                    role: CanonicalRole::Assistant,
                    parts,
                });
            }
            MessageRole::Tool => {
                let content = content_to_text(message.content).unwrap_or_default();
                turns.push(CanonicalTurn {
                    role: CanonicalRole::User,
                    parts: vec![CanonicalPart::ToolResult {
                        tool_call_id: message.tool_call_id.unwrap_or_default(),
                        name: message.name,
                        content,
                        is_error: false,
                    }],
                });
            }
        }
    }

    CanonicalRequest {
        model: req.model,
        system,
        turns,
        tools: req.tools.into_iter().flatten().map(tool_to_canonical).collect(),
        tool_choice: req.tool_choice.map(tool_choice_to_canonical),
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: req.max_completion_tokens.or(req.max_tokens),
        stop_sequences: match req.stop {
            Some(StopSequence::Single(s)) => vec![s],
            Some(StopSequence::Many(items)) => items,
            None => Vec::new(),
        },
        stream: req.stream.unwrap_or(false),
    }
}

pub fn canonical_to_request(req: &CanonicalRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(ChatMessage {
            role: MessageRole::System,
            content: Some(MessageContent::Text(system.clone())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        });
    }
    for turn in &req.turns {
        messages.extend(turn_to_messages(turn));
    }

    ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        stream: Some(req.stream),
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: None,
        max_completion_tokens: req.max_tokens,
        stop: (!req.stop_sequences.is_empty()).then(|| StopSequence::Many(req.stop_sequences.clone())),
        tools: (!req.tools.is_empty())
            .then(|| req.tools.iter().map(canonical_to_tool).collect()),
        tool_choice: req.tool_choice.as_ref().map(canonical_to_tool_choice),
        n: None,
        user: None,
    }
}

fn turn_to_messages(turn: &CanonicalTurn) -> Vec<ChatMessage> {
    let mut tool_results = Vec::new();
    let mut text_parts = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();
    let mut tool_calls = Vec::new();

    for part in &turn.parts {
        match part {
            CanonicalPart::Text(text) => {
                text_parts.push(text.clone());
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            CanonicalPart::Image { mime_type, source } => {
                content_parts.push(match source {
                    MediaSource::Base64(data) => ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{mime_type};base64,{data}"),
                            detail: None,
                        },
                    },
                    MediaSource::Uri(uri) => ContentPart::ImageUrl {
                        image_url: ImageUrl { url: uri.clone(), detail: None },
                    },
                });
            }
            CanonicalPart::Audio { mime_type, source } => match source {
                MediaSource::Base64(data) => content_parts.push(ContentPart::InputAudio {
                    input_audio: InputAudio {
                        data: data.clone(),
                        format: mime_type.strip_prefix("audio/").unwrap_or(mime_type).to_string(),
                    },
                }),
                MediaSource::Uri(uri) => {
                    let text = format!("[Audio: {uri}]");
                    text_parts.push(text.clone());
                    content_parts.push(ContentPart::Text { text });
                }
            },
            CanonicalPart::ToolCall { id, name, arguments } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    kind: "function".to_string(),
                    function: WireFunctionCall {
                        name: name.clone(),
                        arguments: arguments.to_string(),
                    },
                });
            }
            CanonicalPart::ToolResult {
                tool_call_id,
                content,
                ..
            } => {
                tool_results.push(ChatMessage {
                    role: MessageRole::Tool,
                    content: Some(MessageContent::Text(content.clone())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id.clone()),
                });
            }
        }
    }

    if !tool_results.is_empty() {
        return tool_results;
    }

    let role = match turn.role {
        CanonicalRole::User => MessageRole::User,
        CanonicalRole::Assistant => MessageRole::Assistant,
    };
    let has_media = content_parts
        .iter()
        .any(|part| !matches!(part, ContentPart::Text { .. }));
    let content = if has_media {
        (!content_parts.is_empty()).then_some(MessageContent::Parts(content_parts))
    } else if text_parts.is_empty() {
        None
    } else {
        Some(MessageContent::Text(text_parts.join("\n")))
    };
    vec![ChatMessage {
        role,
        content,
        name: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }]
}

fn content_to_text(content: Option<MessageContent>) -> Option<String> {
    match content {
        Some(MessageContent::Text(text)) => Some(text),
        Some(MessageContent::Parts(parts)) => {
            let text: Vec<String> = parts
                .into_iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text),
                    ContentPart::ImageUrl { .. } | ContentPart::InputAudio { .. } => None,
                })
                .collect();
            (!text.is_empty()).then(|| text.join("\n"))
        }
        None => None,
    }
}

fn content_to_parts(content: Option<MessageContent>) -> Vec<CanonicalPart> {
    match content {
        Some(MessageContent::Text(text)) => vec![CanonicalPart::Text(text)],
        Some(MessageContent::Parts(parts)) => parts
            .into_iter()
            .map(|part| match part {
                ContentPart::Text { text } => CanonicalPart::Text(text),
                ContentPart::ImageUrl { image_url } => decode_image_url(&image_url.url),
                ContentPart::InputAudio { input_audio } => CanonicalPart::Audio {
                    mime_type: format!("audio/{}", input_audio.format),
                    source: MediaSource::Base64(input_audio.data),
                },
            })
            .collect(),
        None => Vec::new(),
    }
}

/// A data URL inlines base64 bytes; anything else is a plain reference
/// the target family either forwards as-is (Gemini `fileData`, OpenAI
/// itself) or degrades to a text placeholder (Claude, which only accepts
/// base64 images).
fn decode_image_url(url: &str) -> CanonicalPart {
    match url.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) {
        Some((mime_type, data)) => CanonicalPart::Image {
            mime_type: mime_type.to_string(),
            source: MediaSource::Base64(data.to_string()),
        },
        None => CanonicalPart::Image {
            mime_type: "image/*".to_string(),
            source: MediaSource::Uri(url.to_string()),
        },
    }
}

fn tool_call_to_part(call: ToolCall) -> CanonicalPart {
    let arguments: Value =
        serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| Value::Null);
    CanonicalPart::ToolCall {
        id: call.id,
        name: call.function.name,
        arguments,
    }
}

fn tool_to_canonical(tool: Tool) -> CanonicalTool {
    match tool {
        Tool::Function { function } => CanonicalTool {
            name: function.name,
            description: function.description,
            parameters: function.parameters.unwrap_or(Value::Null),
        },
    }
}

fn canonical_to_tool(tool: &CanonicalTool) -> Tool {
    Tool::Function {
        function: ToolFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: Some(tool.parameters.clone()),
        },
    }
}

fn tool_choice_to_canonical(choice: ToolChoice) -> CanonicalToolChoice {
    match choice {
        ToolChoice::Mode(mode) => match mode.as_str() {
            "none" => CanonicalToolChoice::None,
            "required" => CanonicalToolChoice::Required,
            _ => CanonicalToolChoice::Auto,
        },
        ToolChoice::Specific { function, .. } => CanonicalToolChoice::Named(function.name),
    }
}

fn canonical_to_tool_choice(choice: &CanonicalToolChoice) -> ToolChoice {
    match choice {
        CanonicalToolChoice::Auto => ToolChoice::Mode("auto".to_string()),
        CanonicalToolChoice::None => ToolChoice::Mode("none".to_string()),
        CanonicalToolChoice::Required => ToolChoice::Mode("required".to_string()),
        CanonicalToolChoice::Named(name) => ToolChoice::Specific {
            kind: "function".to_string(),
            function: gproxy_protocol::openai::ToolChoiceFunction { name: name.clone() },
        },
    }
}

pub fn response_to_canonical(resp: ChatCompletionResponse) -> CanonicalResponse {
    let choice = resp.choices.into_iter().next();
    let mut parts = Vec::new();
    let mut finish_reason = CanonicalFinishReason::Stop;

    if let Some(choice) = choice {
        if let Some(text) = content_to_text(choice.message.content) {
            parts.push(CanonicalPart::Text(text));
        }
        for call in choice.message.tool_calls.into_iter().flatten() {
            parts.push(tool_call_to_part(call));
        }
        finish_reason = choice
            .finish_reason
            .map(finish_reason_to_canonical)
            .unwrap_or(CanonicalFinishReason::Stop);
    }

    CanonicalResponse {
        model: resp.model,
        parts,
        finish_reason,
        usage: resp
            .usage
            .map(|u| CanonicalUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default(),
    }
}

pub fn canonical_to_response(id: String, created: i64, resp: &CanonicalResponse) -> ChatCompletionResponse {
    let mut content_text = String::new();
    let mut tool_calls = Vec::new();
    for part in &resp.parts {
        match part {
            CanonicalPart::Text(text) => {
                if !content_text.is_empty() {
                    content_text.push('\n');
                }
                content_text.push_str(text);
            }
            CanonicalPart::ToolCall { id, name, arguments } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    kind: "function".to_string(),
                    function: WireFunctionCall {
                        name: name.clone(),
                        arguments: arguments.to_string(),
                    },
                });
            }
            CanonicalPart::Image { .. } | CanonicalPart::Audio { .. } | CanonicalPart::ToolResult { .. } => {}
        }
    }

    ChatCompletionResponse {
        id,
        object: ChatCompletionResponse::object_name().to_string(),
        created,
        model: resp.model.clone(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatMessage {
                role: MessageRole::Assistant,
                content: (!content_text.is_empty()).then_some(MessageContent::Text(content_text)),
                name: None,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            },
            finish_reason: Some(finish_reason_from_canonical(resp.finish_reason)),
        }],
        usage: Some(Usage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        }),
    }
}

fn finish_reason_to_canonical(reason: FinishReason) -> CanonicalFinishReason {
    match reason {
        FinishReason::Stop => CanonicalFinishReason::Stop,
        FinishReason::Length => CanonicalFinishReason::Length,
        FinishReason::ToolCalls => CanonicalFinishReason::ToolUse,
        FinishReason::ContentFilter => CanonicalFinishReason::ContentFilter,
    }
}

fn finish_reason_from_canonical(reason: CanonicalFinishReason) -> FinishReason {
    match reason {
        CanonicalFinishReason::Stop => FinishReason::Stop,
        CanonicalFinishReason::Length => FinishReason::Length,
        CanonicalFinishReason::ToolUse => FinishReason::ToolCalls,
        CanonicalFinishReason::ContentFilter => FinishReason::ContentFilter,
    }
}

pub fn model_to_canonical(model: Model) -> CanonicalModel {
    CanonicalModel {
        id: model.id,
        display_name: String::new(),
    }
}

pub fn canonical_to_model(model: &CanonicalModel, created: i64, owned_by: &str) -> Model {
    Model {
        id: model.id.clone(),
        object: "model".to_string(),
        created,
        owned_by: owned_by.to_string(),
    }
}

/// Accumulates OpenAI's tool-call stream deltas (which arrive split across
/// many chunks, addressed by `index`) into canonical events. OpenAI sends
/// tool call id/name in the first delta for an index and argument
/// fragments in subsequent deltas for the same index.
#[derive(Default)]
pub struct StreamDecoder {
    parser: SseParser,
    started_indices: std::collections::HashSet<u32>,
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
            if event.data == "[DONE]" {
                continue;
            }
            let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
                continue;
            };
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    out.push(CanonicalStreamEvent::TextDelta(content));
                }
                for call in choice.delta.tool_calls.into_iter().flatten() {
                    if self.started_indices.insert(call.index) {
                        out.push(CanonicalStreamEvent::ToolCallStart {
                            index: call.index,
                            id: call.id.unwrap_or_default(),
                            name: call
                                .function
                                .as_ref()
                                .and_then(|f| f.name.clone())
                                .unwrap_or_default(),
                        });
                    }
                    if let Some(args) = call.function.and_then(|f| f.arguments) {
                        out.push(CanonicalStreamEvent::ToolCallArgumentsDelta {
                            index: call.index,
                            partial_json: args,
                        });
                    }
                }
                if let Some(reason) = choice.finish_reason {
                    out.push(CanonicalStreamEvent::Done {
                        finish_reason: finish_reason_to_canonical(reason),
                        usage: chunk
                            .usage
                            .as_ref()
                            .map(|u| CanonicalUsage {
                                input_tokens: u.prompt_tokens,
                                output_tokens: u.completion_tokens,
                            })
                            .unwrap_or_default(),
                    });
                }
            }
        }
        out
    }
}

/// Renders canonical stream events back into OpenAI chunk SSE frames.
pub struct StreamEncoder {
    id: String,
    created: i64,
    model: String,
    next_tool_index: u32,
}

impl StreamEncoder {
    pub fn new(id: String, created: i64, model: String) -> Self {
        Self {
            id,
            created,
            model,
            next_tool_index: 0,
        }
    }

    pub fn encode(&mut self, event: &CanonicalStreamEvent) -> Vec<u8> {
        let choice = match event {
            CanonicalStreamEvent::TextDelta(text) => ChatCompletionStreamChoice {
                index: 0,
                delta: ChoiceDelta {
                    role: None,
                    content: Some(text.clone()),
                    tool_calls: None,
                },
                finish_reason: None,
            },
            CanonicalStreamEvent::ToolCallStart { id, name, .. } => {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                ChatCompletionStreamChoice {
                    index: 0,
                    delta: ChoiceDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![gproxy_protocol::openai::ToolCallDelta {
                            index,
                            id: Some(id.clone()),
                            kind: Some("function".to_string()),
                            function: Some(gproxy_protocol::openai::FunctionCallDelta {
                                name: Some(name.clone()),
                                arguments: None,
                            }),
                        }]),
                    },
                    finish_reason: None,
                }
            }
            CanonicalStreamEvent::ToolCallArgumentsDelta { partial_json, .. } => {
                let index = self.next_tool_index.saturating_sub(1);
                ChatCompletionStreamChoice {
                    index: 0,
                    delta: ChoiceDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![gproxy_protocol::openai::ToolCallDelta {
                            index,
                            id: None,
                            kind: None,
                            function: Some(gproxy_protocol::openai::FunctionCallDelta {
                                name: None,
                                arguments: Some(partial_json.clone()),
                            }),
                        }]),
                    },
                    finish_reason: None,
                }
            }
            CanonicalStreamEvent::Done {
                finish_reason,
                usage,
            } => {
                let chunk = ChatCompletionChunk {
                    id: self.id.clone(),
                    object: ChatCompletionChunk::object_name().to_string(),
                    created: self.created,
                    model: self.model.clone(),
                    choices: vec![ChatCompletionStreamChoice {
                        index: 0,
                        delta: ChoiceDelta::default(),
                        finish_reason: Some(finish_reason_from_canonical(*finish_reason)),
                    }],
                    usage: Some(Usage {
                        prompt_tokens: usage.input_tokens,
                        completion_tokens: usage.output_tokens,
                        total_tokens: usage.input_tokens + usage.output_tokens,
                    }),
                };
                let mut frame = format!("data: {}\n\n", serde_json::to_string(&chunk).unwrap());
                frame.push_str("data: [DONE]\n\n");
                return frame.into_bytes();
            }
        };

        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: ChatCompletionChunk::object_name().to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![choice],
            usage: None,
        };
        format!("data: {}\n\n", serde_json::to_string(&chunk).unwrap()).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_becomes_canonical_system_field() {
        let req = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                ChatMessage {
                    role: MessageRole::System,
                    content: Some(MessageContent::Text("be terse".to_string())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                },
                ChatMessage {
                    role: MessageRole::User,
                    content: Some(MessageContent::Text("hi".to_string())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                },
            ],
            stream: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            max_completion_tokens: None,
            stop: None,
            tools: None,
            tool_choice: None,
            n: None,
            user: None,
        };
        let canonical = request_to_canonical(req);
        assert_eq!(canonical.system.as_deref(), Some("be terse"));
        assert_eq!(canonical.turns.len(), 1);
    }

    #[test]
    fn tool_call_round_trips_through_canonical() {
        let call = ToolCall {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: WireFunctionCall {
                name: "get_weather".to_string(),
                arguments: "{\"city\":\"nyc\"}".to_string(),
            },
        };
        let part = tool_call_to_part(call);
        match part {
            CanonicalPart::ToolCall { name, arguments, .. } => {
                assert_eq!(name, "get_weather");
                assert_eq!(arguments["city"], "nyc");
            }
            _ => panic!("expected tool call part"),
        }
    }

    #[test]
    fn plain_image_url_is_kept_as_a_uri_not_dropped() {
        let part = decode_image_url("https://example.com/cat.png");
        match part {
            CanonicalPart::Image { source: MediaSource::Uri(uri), .. } => {
                assert_eq!(uri, "https://example.com/cat.png");
            }
            _ => panic!("expected a uri-sourced image part"),
        }
    }

    #[test]
    fn data_url_image_is_kept_as_base64() {
        let part = decode_image_url("data:image/png;base64,AAAA");
        match part {
            CanonicalPart::Image { mime_type, source: MediaSource::Base64(data) } => {
                assert_eq!(mime_type, "image/png");
                assert_eq!(data, "AAAA");
            }
            _ => panic!("expected a base64-sourced image part"),
        }
    }
}
