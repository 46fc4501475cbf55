//! The provider adapter interface. Every upstream (Gemini-CLI, the
//! generic OpenAI-compatible endpoint, Claude, Kiro) implements this in
//! its own native wire format — `gproxy_core`'s engine is responsible for
//! converting into and out of that format via `gproxy-transform` before
//! and after calling an adapter. JSON (`serde_json::Value`) is the
//! exchange type here rather than a per-provider Rust struct so the trait
//! stays object-safe across adapters whose native shapes differ.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ProviderResult;
use crate::http::ByteStream;

#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Non-streaming `generateContent` in this provider's native body
    /// shape. `model` is the already-resolved, already-provider-specific
    /// model identifier.
    async fn generate_content(&self, model: &str, request: Value) -> ProviderResult<Value>;

    /// Streaming `generateContent`. The returned channel yields raw bytes
    /// exactly as they arrive over the wire (SSE frames, or — for Kiro —
    /// raw AWS event-stream frames); the caller's stream decoder parses
    /// them incrementally.
    async fn generate_content_stream(&self, model: &str, request: Value) -> ProviderResult<ByteStream>;

    async fn list_models(&self) -> ProviderResult<Value>;

    /// Refreshes this provider's credential if it's near expiry. A no-op
    /// for static-key providers.
    async fn refresh_token_if_near_expiry(&self) -> ProviderResult<()>;
}
