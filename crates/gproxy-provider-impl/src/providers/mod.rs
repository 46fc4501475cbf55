//! One module per upstream this gateway speaks to. Each exposes a
//! `*Config` (plain data, built by `gproxy-core::bootstrap` from the
//! startup configuration) and a `*Provider` implementing
//! `gproxy_provider_core::UpstreamProvider`.

pub mod claude_custom;
pub mod geminicli;
pub mod kiro;
pub mod openai_custom;

pub use claude_custom::{ClaudeCustomConfig, ClaudeCustomProvider};
pub use geminicli::{GeminiCliConfig, GeminiCliProvider};
pub use kiro::{KiroConfig, KiroProvider};
pub use openai_custom::{OpenAiCustomConfig, OpenAiCustomProvider};
