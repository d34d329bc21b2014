pub mod artifact;
pub mod document;
pub mod message;
pub mod session;

pub use artifact::{Artifact, ArtifactType};
pub use document::{format_size, DocumentStatus, KnowledgeDocument, TransitionError};
pub use message::{Message, MessageType, SourceCitation, ThinkingStep, ToolCall};
pub use session::Session;

use serde::{Deserialize, Serialize};

/// The model backends a conversation can be routed to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AiModel {
    /// Local server answering from the indexed knowledge base.
    #[default]
    LocalRag,
    /// Local server with web search augmentation.
    WebSearch,
    /// Cloud Gemini model.
    Gemini,
}

impl AiModel {
    pub const ALL: [AiModel; 3] = [AiModel::LocalRag, AiModel::WebSearch, AiModel::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            AiModel::LocalRag => "local_rag",
            AiModel::WebSearch => "web_search",
            AiModel::Gemini => "gemini",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            AiModel::LocalRag => "Local RAG",
            AiModel::WebSearch => "Web Search",
            AiModel::Gemini => "Gemini",
        }
    }

    /// Model id sent to the backend.
    pub fn request_model(self) -> &'static str {
        match self {
            AiModel::LocalRag => "local-rag",
            AiModel::WebSearch => "web-search",
            AiModel::Gemini => "gemini-2.0-flash",
        }
    }

    pub fn is_local(self) -> bool {
        !matches!(self, AiModel::Gemini)
    }

    /// Unknown identifiers fall back to the local RAG model.
    pub fn parse_lossy(raw: &str) -> Self {
        match raw {
            "local_rag" => AiModel::LocalRag,
            "web_search" => AiModel::WebSearch,
            "gemini" => AiModel::Gemini,
            _ => AiModel::LocalRag,
        }
    }
}

impl std::fmt::Display for AiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}
