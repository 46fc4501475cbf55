//! Claude Messages API wire types (`/v1/messages`), scoped to the core
//! (non-Beta) surface: text/image/tool_use/tool_result content blocks and
//! the standard SSE event sequence. No thinking blocks, no server-side
//! tool execution, no Files API — none of this gateway's providers need
//! them.

mod models;
mod request;
mod response;
mod stream;
mod types;

pub use models::{ClaudeModel, ModelListResponse};
pub use request::{CreateMessageRequest, SystemPrompt};
pub use response::{CreateMessageResponse, StopReason, Usage};
pub use stream::{ContentBlockDelta, MessageDeltaFields, StreamEvent};
pub use types::{
    ContentBlock, ImageSource, Message, MessageContent, Role, Tool, ToolChoice, ToolResultContent,
};
