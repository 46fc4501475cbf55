use serde::{Deserialize, Serialize};

use super::response::{CreateMessageResponse, StopReason, Usage};
use super::types::ContentBlock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDeltaFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

/// The event sequence a Claude stream emits: one `message_start`, then one
/// `content_block_start`/`content_block_delta`*/`content_block_stop` cycle
/// per block, a `message_delta` carrying the final stop reason and usage,
/// and a closing `message_stop`. `ping` may appear anywhere as a keepalive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: CreateMessageResponse,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: ContentBlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaFields,
        usage: Usage,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamErrorDetail,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}
