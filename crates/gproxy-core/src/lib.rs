//! Ties the wire-format layer (`gproxy-protocol`), the converter
//! (`gproxy-transform`), and the provider adapters (`gproxy-provider-core`/
//! `-impl`) into the single-request pipeline spec.md §2 describes:
//! `classify` (§4.1) → `proxy_engine::handle` (§4.2/§4.3) → the HTTP
//! frontend in `gproxy-router` writes the result back. Nothing in this
//! crate depends on `axum` beyond the header/method types `classify` and
//! `auth` pattern-match on; the actual HTTP server lives in
//! `gproxy-router`/`apps/gproxy`.

pub mod auth;
pub mod bootstrap;
pub mod classify;
pub mod config;
pub mod error;
pub mod prompt_log;
pub mod proxy_engine;
pub mod state;
pub mod strategy;
pub mod system_prompt;

pub use auth::{authenticate, extract_presented_key};
pub use bootstrap::bootstrap;
pub use classify::{classify, classify_request, resolve_provider, Classified, EndpointType};
pub use config::{DefaultModelMode, GlobalConfig, LogPromptsMode, ProviderKind, ProviderSettings, SystemPromptMode};
pub use error::ProxyError;
pub use prompt_log::PromptLogger;
pub use proxy_engine::ProxyResponse;
pub use state::{spawn_background_refresh, AppState};
