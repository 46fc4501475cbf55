//! Gemini generateContent <-> canonical model conversion.

use gproxy_protocol::gemini::{
    Blob, Candidate, Content, ContentRole, FileData, FinishReason,
    FunctionCall as WireFunctionCall, FunctionCallingConfig, FunctionCallingMode,
    FunctionDeclaration, GeminiModel, GenerateContentRequest, GenerateContentResponse,
    GenerationConfig, Part, Tool, ToolConfig, UsageMetadata,
};
use gproxy_protocol::SseEvent;
use serde_json::Value;

use crate::canonical::{
    CanonicalFinishReason, CanonicalModel, CanonicalPart, CanonicalRequest, CanonicalResponse,
    CanonicalRole, CanonicalStreamEvent, CanonicalTool, CanonicalToolChoice, CanonicalTurn,
    CanonicalUsage, MediaSource,
};

/// Strips Claude's `input_schema.$schema` draft marker before handing the
/// schema to Gemini, which rejects unrecognized top-level keywords.
fn strip_json_schema_marker(mut schema: Value) -> Value {
    if let Value::Object(map) = &mut schema {
        map.remove("$schema");
    }
    schema
}

pub fn request_to_canonical(req: GenerateContentRequest) -> CanonicalRequest {
    let system = req
        .system_instruction
        .map(|content| parts_to_text(&content.parts));

    let turns = req
        .contents
        .into_iter()
        .map(|content| {
            let role = match content.role {
                Some(ContentRole::Model) => CanonicalRole::Assistant,
                _ => CanonicalRole::User,
            };
            CanonicalTurn {
                role,
                parts: content.parts.into_iter().map(part_to_canonical).collect(),
            }
        })
        .collect();

    let tools: Vec<CanonicalTool> = req
        .tools
        .into_iter()
        .flatten()
        .flat_map(|tool| tool.function_declarations.into_iter().flatten())
        .map(|decl| CanonicalTool {
            name: decl.name,
            description: decl.description,
            parameters: decl.parameters.unwrap_or(Value::Null),
        })
        .collect();

    let tool_choice = req
        .tool_config
        .and_then(|config| config.function_calling_config)
        .map(|config| match config.mode {
            Some(FunctionCallingMode::None) => CanonicalToolChoice::None,
            Some(FunctionCallingMode::Any) => config
                .allowed_function_names
                .and_then(|names| names.into_iter().next())
                .map(CanonicalToolChoice::Named)
                .unwrap_or(CanonicalToolChoice::Required),
            _ => CanonicalToolChoice::Auto,
        });

    let gen = req.generation_config.unwrap_or_default();

    CanonicalRequest {
        model: String::new(),
        system,
        turns,
        tools,
        tool_choice,
        temperature: gen.temperature,
        top_p: gen.top_p,
        max_tokens: gen.max_output_tokens,
        stop_sequences: gen.stop_sequences.unwrap_or_default(),
        stream: false,
    }
}

pub fn canonical_to_request(req: &CanonicalRequest) -> GenerateContentRequest {
    let contents = req
        .turns
        .iter()
        .filter_map(turn_to_content)
        .collect::<Vec<_>>();

    let system_instruction = req.system.as_ref().map(|text| Content {
        role: None,
        parts: vec![Part::text(text.clone())],
    });

    let tools = (!req.tools.is_empty()).then(|| {
        vec![Tool {
            function_declarations: Some(
                req.tools
                    .iter()
                    .map(|tool| FunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: Some(strip_json_schema_marker(tool.parameters.clone())),
                    })
                    .collect(),
            ),
        }]
    });

    let tool_config = req.tool_choice.as_ref().map(|choice| {
        let (mode, names) = match choice {
            CanonicalToolChoice::Auto => (FunctionCallingMode::Auto, None),
            CanonicalToolChoice::None => (FunctionCallingMode::None, None),
            CanonicalToolChoice::Required => (FunctionCallingMode::Any, None),
            CanonicalToolChoice::Named(name) => (FunctionCallingMode::Any, Some(vec![name.clone()])),
        };
        ToolConfig {
            function_calling_config: Some(FunctionCallingConfig {
                mode: Some(mode),
                allowed_function_names: names,
            }),
        }
    });

    let generation_config = Some(GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        max_output_tokens: req.max_tokens,
        stop_sequences: (!req.stop_sequences.is_empty()).then(|| req.stop_sequences.clone()),
    });

    GenerateContentRequest {
        contents,
        system_instruction,
        tools,
        tool_config,
        generation_config,
    }
}

fn turn_to_content(turn: &CanonicalTurn) -> Option<Content> {
    let role = match turn.role {
        CanonicalRole::User => ContentRole::User,
        CanonicalRole::Assistant => ContentRole::Model,
    };
    let parts: Vec<Part> = turn.parts.iter().map(canonical_to_part).collect();
    if parts.is_empty() {
        None
    } else {
        Some(Content {
            role: Some(role),
            parts,
        })
    }
}

fn part_to_canonical(part: Part) -> CanonicalPart {
    if let Some(text) = part.text {
        return CanonicalPart::Text(text);
    }
    if let Some(blob) = part.inline_data {
        return media_part(blob.mime_type, MediaSource::Base64(blob.data));
    }
    if let Some(file) = part.file_data {
        return media_part(file.mime_type, MediaSource::Uri(file.file_uri));
    }
    if let Some(call) = part.function_call {
        return CanonicalPart::ToolCall {
            id: call.name.clone(),
            name: call.name,
            arguments: call.args.unwrap_or(Value::Null),
        };
    }
    if let Some(response) = part.function_response {
        return CanonicalPart::ToolResult {
            tool_call_id: response.name.clone(),
            name: Some(response.name),
            content: response.response.to_string(),
            is_error: false,
        };
    }
    CanonicalPart::Text(String::new())
}

/// An audio mime type (`audio/*`) becomes a `CanonicalPart::Audio`;
/// everything else (images) becomes `CanonicalPart::Image`. Gemini's wire
/// format doesn't tag inline/file data with a part kind, only a mime
/// type, so this is the only place that distinction can be drawn.
fn media_part(mime_type: String, source: MediaSource) -> CanonicalPart {
    if mime_type.starts_with("audio/") {
        CanonicalPart::Audio { mime_type, source }
    } else {
        CanonicalPart::Image { mime_type, source }
    }
}

fn canonical_to_part(part: &CanonicalPart) -> Part {
    match part {
        CanonicalPart::Text(text) => Part::text(text.clone()),
        CanonicalPart::Image { mime_type, source } | CanonicalPart::Audio { mime_type, source } => {
            match source {
                MediaSource::Base64(data) => Part {
                    inline_data: Some(Blob {
                        mime_type: mime_type.clone(),
                        data: data.clone(),
                    }),
                    ..Default::default()
                },
                MediaSource::Uri(uri) => Part {
                    file_data: Some(FileData {
                        mime_type: mime_type.clone(),
                        file_uri: uri.clone(),
                    }),
                    ..Default::default()
                },
            }
        }
        CanonicalPart::ToolCall { name, arguments, .. } => Part {
            function_call: Some(WireFunctionCall {
                name: name.clone(),
                args: Some(arguments.clone()),
            }),
            ..Default::default()
        },
        CanonicalPart::ToolResult {
            name,
            tool_call_id,
            content,
            ..
        } => Part {
            function_response: Some(gproxy_protocol::gemini::FunctionResponse {
                name: name.clone().unwrap_or_else(|| tool_call_id.clone()),
                response: serde_json::from_str(content)
                    .unwrap_or_else(|_| Value::String(content.clone())),
            }),
            ..Default::default()
        },
    }
}

fn parts_to_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|part| part.text.clone())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn response_to_canonical(resp: GenerateContentResponse) -> CanonicalResponse {
    let candidate = resp.candidates.into_iter().next();
    let mut parts = Vec::new();
    let mut finish_reason = CanonicalFinishReason::Stop;

    if let Some(candidate) = candidate {
        parts = candidate
            .content
            .parts
            .into_iter()
            .map(part_to_canonical)
            .collect();
        finish_reason = candidate
            .finish_reason
            .map(finish_reason_to_canonical)
            .unwrap_or(CanonicalFinishReason::Stop);
    }

    CanonicalResponse {
        model: String::new(),
        parts,
        finish_reason,
        usage: resp
            .usage_metadata
            .map(|u| CanonicalUsage {
                input_tokens: u.prompt_token_count.unwrap_or(0),
                output_tokens: u.candidates_token_count.unwrap_or(0),
            })
            .unwrap_or_default(),
    }
}

pub fn canonical_to_response(resp: &CanonicalResponse) -> GenerateContentResponse {
    let role = Some(ContentRole::Model);
    let parts = resp.parts.iter().map(canonical_to_part).collect();

    GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content { role, parts },
            finish_reason: Some(finish_reason_from_canonical(resp.finish_reason)),
            index: Some(0),
        }],
        usage_metadata: Some(UsageMetadata {
            prompt_token_count: Some(resp.usage.input_tokens),
            candidates_token_count: Some(resp.usage.output_tokens),
            total_token_count: Some(resp.usage.input_tokens + resp.usage.output_tokens),
        }),
    }
}

fn finish_reason_to_canonical(reason: FinishReason) -> CanonicalFinishReason {
    match reason {
        FinishReason::Stop => CanonicalFinishReason::Stop,
        FinishReason::MaxTokens => CanonicalFinishReason::Length,
        FinishReason::Safety | FinishReason::Recitation => CanonicalFinishReason::ContentFilter,
        FinishReason::Other => CanonicalFinishReason::Stop,
    }
}

fn finish_reason_from_canonical(reason: CanonicalFinishReason) -> FinishReason {
    match reason {
        CanonicalFinishReason::Stop => FinishReason::Stop,
        CanonicalFinishReason::Length => FinishReason::MaxTokens,
        CanonicalFinishReason::ToolUse => FinishReason::Stop,
        CanonicalFinishReason::ContentFilter => FinishReason::Safety,
    }
}

pub fn model_to_canonical(model: GeminiModel) -> CanonicalModel {
    CanonicalModel {
        id: model.name.trim_start_matches("models/").to_string(),
        display_name: model.display_name.unwrap_or_default(),
    }
}

pub fn canonical_to_model(model: &CanonicalModel) -> GeminiModel {
    GeminiModel {
        name: format!("models/{}", model.id),
        display_name: Some(model.display_name.clone()),
        description: None,
    }
}

/// Gemini's non-streaming-shaped responses double as its stream frames:
/// each SSE `data:` payload is a whole `GenerateContentResponse`, so unlike
/// OpenAI/Claude there's no partial-argument accumulation to do — a
/// function call always arrives complete in a single `Part`.
#[derive(Default)]
pub struct StreamDecoder {
    parser: gproxy_protocol::SseParser,
    next_tool_index: u32,
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
            let Ok(resp) = serde_json::from_str::<GenerateContentResponse>(&event.data) else {
                continue;
            };
            let Some(candidate) = resp.candidates.into_iter().next() else {
                continue;
            };
            for part in candidate.content.parts {
                if let Some(text) = part.text {
                    out.push(CanonicalStreamEvent::TextDelta(text));
                } else if let Some(call) = part.function_call {
                    let index = self.next_tool_index;
                    self.next_tool_index += 1;
                    out.push(CanonicalStreamEvent::ToolCallStart {
                        index,
                        id: call.name.clone(),
                        name: call.name,
                    });
                    out.push(CanonicalStreamEvent::ToolCallArgumentsDelta {
                        index,
                        partial_json: call.args.unwrap_or(Value::Null).to_string(),
                    });
                }
            }
            if let Some(reason) = candidate.finish_reason {
                out.push(CanonicalStreamEvent::Done {
                    finish_reason: finish_reason_to_canonical(reason),
                    usage: resp
                        .usage_metadata
                        .map(|u| CanonicalUsage {
                            input_tokens: u.prompt_token_count.unwrap_or(0),
                            output_tokens: u.candidates_token_count.unwrap_or(0),
                        })
                        .unwrap_or_default(),
                });
            }
        }
        out
    }
}

pub struct StreamEncoder;

impl StreamEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&mut self, event: &CanonicalStreamEvent) -> Vec<u8> {
        let resp = match event {
            CanonicalStreamEvent::TextDelta(text) => GenerateContentResponse {
                candidates: vec![Candidate {
                    content: Content {
                        role: Some(ContentRole::Model),
                        parts: vec![Part::text(text.clone())],
                    },
                    finish_reason: None,
                    index: Some(0),
                }],
                usage_metadata: None,
            },
            CanonicalStreamEvent::ToolCallStart { name, .. } => GenerateContentResponse {
                candidates: vec![Candidate {
                    content: Content {
                        role: Some(ContentRole::Model),
                        parts: vec![Part {
                            function_call: Some(WireFunctionCall {
                                name: name.clone(),
                                args: None,
                            }),
                            ..Default::default()
                        }],
                    },
                    finish_reason: None,
                    index: Some(0),
                }],
                usage_metadata: None,
            },
            CanonicalStreamEvent::ToolCallArgumentsDelta { .. } => return Vec::new(),
            CanonicalStreamEvent::Done {
                finish_reason,
                usage,
            } => GenerateContentResponse {
                candidates: vec![Candidate {
                    content: Content {
                        role: Some(ContentRole::Model),
                        parts: vec![],
                    },
                    finish_reason: Some(finish_reason_from_canonical(*finish_reason)),
                    index: Some(0),
                }],
                usage_metadata: Some(UsageMetadata {
                    prompt_token_count: Some(usage.input_tokens),
                    candidates_token_count: Some(usage.output_tokens),
                    total_token_count: Some(usage.input_tokens + usage.output_tokens),
                }),
            },
        };
        format!("data: {}\n\n", serde_json::to_string(&resp).unwrap()).into_bytes()
    }
}

impl Default for StreamEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_role_defaults_to_user() {
        let content = Content {
            role: None,
            parts: vec![Part::text("hi")],
        };
        let req = GenerateContentRequest {
            contents: vec![content],
            system_instruction: None,
            tools: None,
            tool_config: None,
            generation_config: None,
        };
        let canonical = request_to_canonical(req);
        assert_eq!(canonical.turns[0].role, CanonicalRole::User);
    }

    #[test]
    fn function_call_arrives_whole_in_one_part() {
        let mut decoder = StreamDecoder::new();
        let body = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"functionCall": {"name": "lookup", "args": {"q": "x"}}}]},
            }]
        });
        let events =
            decoder.ingest_events(vec![SseEvent {
                event: None,
                data: body.to_string(),
            }]);
        assert!(matches!(events[0], CanonicalStreamEvent::ToolCallStart { .. }));
        assert!(matches!(
            events[1],
            CanonicalStreamEvent::ToolCallArgumentsDelta { .. }
        ));
    }

    #[test]
    fn schema_marker_is_stripped_from_tool_parameters() {
        let request = CanonicalRequest {
            tools: vec![CanonicalTool {
                name: "search".to_string(),
                description: None,
                parameters: serde_json::json!({
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "type": "object",
                }),
            }],
            ..Default::default()
        };
        let wire = canonical_to_request(&request);
        let params = &wire.tools.unwrap()[0].function_declarations.as_ref().unwrap()[0]
            .parameters
            .clone()
            .unwrap();
        assert!(params.get("$schema").is_none());
        assert_eq!(params["type"], "object");
    }

    #[test]
    fn file_uri_image_round_trips_as_file_data() {
        let part = CanonicalPart::Image {
            mime_type: "image/png".to_string(),
            source: MediaSource::Uri("gs://bucket/cat.png".to_string()),
        };
        match canonical_to_part(&part) {
            Part { file_data: Some(file), inline_data: None, .. } => {
                assert_eq!(file.file_uri, "gs://bucket/cat.png");
            }
            _ => panic!("expected fileData, not inlineData"),
        }
    }
}
