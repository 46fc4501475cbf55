use serde::{Deserialize, Serialize};

/// The three wire shapes this gateway translates between. `Copy`/`Eq`/
/// `Hash` so it can key the conversion registry directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolFamily {
    OpenAi,
    Gemini,
    Claude,
}

impl ProtocolFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolFamily::OpenAi => "openai",
            ProtocolFamily::Gemini => "gemini",
            ProtocolFamily::Claude => "claude",
        }
    }
}

impl std::fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
