//! Wire-format types for the three inbound/outbound protocol families this
//! gateway speaks: OpenAI's chat-completions API, Gemini's
//! `generateContent`/`streamGenerateContent` API, and Claude's Messages
//! API. Nothing in here knows about providers, conversion, or transport —
//! these are pure serde shapes, deliberately kept separate from
//! `gproxy-transform`'s canonical message model so that adding a wire
//! field never forces a change to conversion logic and vice versa.

pub mod claude;
pub mod family;
pub mod gemini;
pub mod openai;
pub mod sse;

pub use family::ProtocolFamily;
pub use sse::{SseEvent, SseParser};
