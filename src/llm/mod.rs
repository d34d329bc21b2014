pub mod gemini;
pub mod openai;

use crate::models::{AiModel, Message, MessageType};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageType::System.as_str().to_string(),
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.message_type.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub stream: bool,
}

impl ChatRequest {
    /// Request for `model` over a conversation, skipping empty streaming placeholders.
    pub fn for_history(model: AiModel, history: &[Message], stream: bool) -> Self {
        Self {
            messages: history
                .iter()
                .filter(|m| !(m.is_streaming && m.content.is_empty()))
                .map(ChatMessage::from)
                .collect(),
            model: model.request_model().to_string(),
            stream,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
}

/// Unified provider enum: the local server or Gemini.
#[derive(Debug, Clone)]
pub enum Provider {
    /// OpenAI-compatible local server (RAG and web search).
    Local(openai::OpenAiConfig),
    Gemini(gemini::GeminiConfig),
}

impl Provider {
    pub fn local(server_url: &str) -> Self {
        Provider::Local(openai::OpenAiConfig::local(server_url))
    }

    pub fn gemini(api_key: String) -> Self {
        Provider::Gemini(gemini::GeminiConfig {
            api_key,
            base_url: gemini::DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Resolve the backend for `model` from the current settings.
    pub fn for_model(model: AiModel, settings: &Settings) -> Result<Self, LlmError> {
        match model {
            AiModel::LocalRag | AiModel::WebSearch => Ok(Provider::local(&settings.server_url)),
            AiModel::Gemini => settings
                .gemini_api_key
                .clone()
                .filter(|key| !key.is_empty())
                .map(Provider::gemini)
                .ok_or(LlmError::MissingApiKey("Gemini")),
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        match self {
            Provider::Local(config) => openai::chat(config, request).await,
            Provider::Gemini(config) => gemini::chat(config, request).await,
        }
    }

    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_chunk: impl Fn(StreamChunk) + Send,
    ) -> Result<String, LlmError> {
        match self {
            Provider::Local(config) => openai::chat_stream(config, request, on_chunk).await,
            Provider::Gemini(config) => gemini::chat_stream(config, request, on_chunk).await,
        }
    }
}

/// Pop every complete `data:` payload out of an SSE byte buffer.
///
/// Lines are decoded only once their newline has arrived, so a character
/// split across network chunks stays intact.
pub(crate) fn drain_sse_data(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line);
        if let Some(data) = line.trim().strip_prefix("data:") {
            payloads.push(data.trim_start().to_string());
        }
    }
    payloads
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("{0} API key not configured")]
    MissingApiKey(&'static str),
}

impl Serialize for LlmError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_sse_keeps_partial_line() {
        let mut buffer = b"data: one\n\nevent: ping\ndata:two\ndata: thr".to_vec();
        assert_eq!(drain_sse_data(&mut buffer), vec!["one", "two"]);
        assert_eq!(buffer, b"data: thr");
        buffer.extend_from_slice(b"ee\n");
        assert_eq!(drain_sse_data(&mut buffer), vec!["three"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_sse_joins_character_split_across_chunks() {
        let line = "data: 안녕\n".as_bytes();
        // cut inside the three-byte encoding of the first syllable
        let (head, tail) = line.split_at(7);

        let mut buffer = head.to_vec();
        assert!(drain_sse_data(&mut buffer).is_empty());
        buffer.extend_from_slice(tail);
        assert_eq!(drain_sse_data(&mut buffer), vec!["안녕"]);
    }

    #[test]
    fn test_provider_resolution() {
        let mut settings = Settings {
            server_url: "http://box:8000/".into(),
            ..Settings::default()
        };
        match Provider::for_model(AiModel::WebSearch, &settings).unwrap() {
            Provider::Local(config) => assert_eq!(config.base_url, "http://box:8000/v1"),
            other => panic!("unexpected provider {other:?}"),
        }

        assert!(matches!(
            Provider::for_model(AiModel::Gemini, &settings),
            Err(LlmError::MissingApiKey("Gemini"))
        ));
        settings.gemini_api_key = Some("key".into());
        assert!(matches!(
            Provider::for_model(AiModel::Gemini, &settings),
            Ok(Provider::Gemini(_))
        ));
    }

    #[test]
    fn test_request_skips_empty_placeholder() {
        let history = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("").with_streaming(true),
        ];
        let request = ChatRequest::for_history(AiModel::LocalRag, &history, true);
        assert_eq!(request.model, "local-rag");
        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user"]);
    }
}
