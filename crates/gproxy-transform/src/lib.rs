//! Protocol translation. Converts OpenAI/Gemini/Claude wire bodies into a
//! private canonical message model and back, and streams the equivalent
//! translation chunk-by-chunk for `generateContentStream`-shaped
//! responses. This crate has no knowledge of providers, credentials, or
//! transport — it only ever sees already-parsed JSON bodies and raw SSE
//! byte chunks.

pub mod canonical;
pub mod claude;
pub mod gemini;
pub mod openai;
pub mod registry;

pub use canonical::{
    canonical_last_user_text, canonical_prompt_preview, CanonicalFinishReason, CanonicalModel,
    CanonicalPart, CanonicalRequest, CanonicalResponse, CanonicalRole, CanonicalStreamEvent,
    CanonicalTool, CanonicalToolChoice, CanonicalTurn, CanonicalUsage, MediaSource,
};
pub use registry::{
    convert_model, convert_request, convert_response, decode_request, decode_response,
    encode_request, encode_response, RegistryError,
};
