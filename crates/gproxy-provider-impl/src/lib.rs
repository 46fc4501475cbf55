//! Concrete `UpstreamProvider` adapters and the shared HTTP transport
//! they run on. `gproxy-core` depends on this crate only through the
//! trait objects in `gproxy-provider-core`; nothing here is public API
//! beyond the per-provider config/provider pairs and the shared client
//! constructor.

pub mod client;
pub mod oauth_common;
pub mod providers;

pub use client::{shared_client, WreqUpstreamClient};
pub use providers::{
    ClaudeCustomConfig, ClaudeCustomProvider, GeminiCliConfig, GeminiCliProvider, KiroConfig,
    KiroProvider, OpenAiCustomConfig, OpenAiCustomProvider,
};
