//! Gemini `generateContent`/`streamGenerateContent` wire types
//! (`camelCase` on the wire, matching Google's own JSON convention).

mod models;
mod request;
mod response;
mod types;

pub use models::{GeminiModel, ModelListResponse};
pub use request::{GenerateContentRequest, GenerationConfig};
pub use response::{Candidate, GenerateContentResponse, UsageMetadata};
pub use types::{
    Blob, Content, ContentRole, FileData, FinishReason, FunctionCall, FunctionCallingConfig,
    FunctionCallingMode, FunctionDeclaration, FunctionResponse, Part, Tool, ToolConfig,
};
