//! OpenAI-compatible chat-completions wire types (`/v1/chat/completions`,
//! `/v1/models`). Scoped to what this gateway actually accepts and
//! produces — no Responses API, no prediction/service-tier fields that no
//! adapter in this repo ever reads. `input_audio` content parts are kept
//! since the converter's multimodal rules treat audio like images.

mod models;
mod request;
mod response;
mod stream;
mod types;

pub use models::{Model, ModelListResponse};
pub use request::{ChatCompletionRequest, StopSequence};
pub use response::{ChatCompletionChoice, ChatCompletionResponse, Usage};
pub use stream::{
    ChatCompletionChunk, ChatCompletionStreamChoice, ChoiceDelta, FunctionCallDelta, ToolCallDelta,
};
pub use types::{
    ChatMessage, ContentPart, FinishReason, FunctionCall, ImageUrl, InputAudio, MessageContent,
    MessageRole, Tool, ToolCall, ToolChoice, ToolChoiceFunction, ToolFunction,
};
