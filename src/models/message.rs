use super::Artifact;
use crate::codec::{required, CodecError, FieldSink, FieldSource, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Assistant,
    System,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
            MessageType::System => "system",
        }
    }

    /// Unknown values read back as `User`.
    pub fn parse_lossy(raw: &str) -> Self {
        match raw {
            "assistant" => MessageType::Assistant,
            "system" => MessageType::System,
            _ => MessageType::User,
        }
    }
}

/// One step of visible model reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub title: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: String,
    pub result: Option<String>,
}

/// A retrieved passage backing an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub title: String,
    pub snippet: String,
    pub score: Option<f32>,
    pub url: Option<String>,
}

/// One turn of a conversation.
///
/// Messages are values: every change produces a new instance through the
/// `with_*` methods. Equality and hashing look at the id only.
#[derive(Debug, Clone)]
pub struct Message {
    id: String,
    pub content: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub citations: Vec<String>,
    pub is_streaming: bool,
    // UI-only metadata, never persisted
    pub thinking_steps: Vec<ThinkingStep>,
    pub tool_calls: Vec<ToolCall>,
    pub sources: Vec<SourceCitation>,
    pub artifact: Option<Artifact>,
}

impl Message {
    fn new(message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            message_type,
            timestamp: Utc::now(),
            citations: Vec::new(),
            is_streaming: false,
            thinking_steps: Vec::new(),
            tool_calls: Vec::new(),
            sources: Vec::new(),
            artifact: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageType::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageType::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageType::System, content)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_user(&self) -> bool {
        self.message_type == MessageType::User
    }

    #[must_use]
    pub fn with_content(self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..self
        }
    }

    #[must_use]
    pub fn with_streaming(self, is_streaming: bool) -> Self {
        Self {
            is_streaming,
            ..self
        }
    }

    #[must_use]
    pub fn with_citations(self, citations: Vec<String>) -> Self {
        Self { citations, ..self }
    }

    #[must_use]
    pub fn with_thinking_steps(self, thinking_steps: Vec<ThinkingStep>) -> Self {
        Self {
            thinking_steps,
            ..self
        }
    }

    #[must_use]
    pub fn with_tool_calls(self, tool_calls: Vec<ToolCall>) -> Self {
        Self { tool_calls, ..self }
    }

    #[must_use]
    pub fn with_sources(self, sources: Vec<SourceCitation>) -> Self {
        Self { sources, ..self }
    }

    #[must_use]
    pub fn with_artifact(self, artifact: Option<Artifact>) -> Self {
        Self { artifact, ..self }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

impl Hash for Message {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Record for Message {
    fn write<S: FieldSink>(&self, sink: &mut S) {
        sink.put_str("id", &self.id);
        sink.put_str("content", &self.content);
        sink.put_str("type", self.message_type.as_str());
        sink.put_time("timestamp", self.timestamp);
        sink.put_str_list("citations", &self.citations);
        sink.put_bool("isStreaming", self.is_streaming);
    }

    fn read<S: FieldSource>(source: &mut S) -> Result<Self, CodecError> {
        let id = required(source.take_str("id")?, "id")?;
        let content = source.take_str("content")?.unwrap_or_default();
        let message_type = source
            .take_str("type")?
            .map(|raw| MessageType::parse_lossy(&raw))
            .unwrap_or(MessageType::User);
        let timestamp = required(source.take_time("timestamp")?, "timestamp")?;
        let citations = source.take_str_list("citations")?.unwrap_or_default();
        let is_streaming = source.take_bool("isStreaming")?.unwrap_or(false);
        Ok(Self {
            id,
            content,
            message_type,
            timestamp,
            citations,
            is_streaming,
            thinking_steps: Vec::new(),
            tool_calls: Vec::new(),
            sources: Vec::new(),
            artifact: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_bytes, from_json, to_bytes, to_json};
    use crate::models::ArtifactType;
    use std::collections::HashSet;

    #[test]
    fn test_constructors_assign_fresh_ids() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.message_type, MessageType::User);
        assert_eq!(Message::assistant("x").message_type, MessageType::Assistant);
        assert_eq!(Message::system("x").message_type, MessageType::System);
        assert!(!a.is_streaming);
        assert!(a.citations.is_empty());
    }

    #[test]
    fn test_equality_is_by_id() {
        let original = Message::assistant("draft");
        let edited = original.clone().with_content("final").with_streaming(true);
        assert_eq!(original, edited);

        let mut set = HashSet::new();
        set.insert(original);
        assert!(!set.insert(edited));
        assert!(set.insert(Message::assistant("draft")));
    }

    #[test]
    fn test_copy_on_write_preserves_other_fields() {
        let original = Message::assistant("a").with_citations(vec!["doc.pdf".into()]);
        let updated = original.clone().with_content("b");
        assert_eq!(updated.id(), original.id());
        assert_eq!(updated.timestamp, original.timestamp);
        assert_eq!(updated.citations, vec!["doc.pdf".to_string()]);
        assert_eq!(original.content, "a");
    }

    #[test]
    fn test_json_round_trip_drops_transient_fields() {
        let message = Message::assistant("answer")
            .with_citations(vec!["a.md".into(), "b.pdf".into()])
            .with_streaming(true)
            .with_thinking_steps(vec![ThinkingStep {
                title: "Search".into(),
                detail: "2 hits".into(),
            }])
            .with_tool_calls(vec![ToolCall {
                name: "web_search".into(),
                arguments: "{}".into(),
                result: None,
            }])
            .with_sources(vec![SourceCitation {
                title: "a.md".into(),
                snippet: "...".into(),
                score: Some(0.9),
                url: None,
            }])
            .with_artifact(Some(Artifact::new(
                "Snippet",
                ArtifactType::Json,
                "{}",
                None,
            )));

        let json = to_json(&message);
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["id", "content", "type", "timestamp", "citations", "isStreaming"]
        );

        let restored: Message = from_json(&json).unwrap();
        assert_eq!(restored.id(), message.id());
        assert_eq!(restored.content, "answer");
        assert_eq!(restored.message_type, MessageType::Assistant);
        assert_eq!(restored.timestamp, message.timestamp);
        assert_eq!(restored.citations, message.citations);
        assert!(restored.is_streaming);
        assert!(restored.thinking_steps.is_empty());
        assert!(restored.tool_calls.is_empty());
        assert!(restored.sources.is_empty());
        assert!(restored.artifact.is_none());

        let from_binary: Message = from_bytes(&to_bytes(&message)).unwrap();
        assert_eq!(from_binary.content, message.content);
        assert_eq!(from_binary.timestamp, message.timestamp);
    }

    #[test]
    fn test_tolerant_deserialization() {
        let json = serde_json::json!({
            "id": "m1",
            "content": "hello",
            "type": "robot",
            "timestamp": "2024-01-02T03:04:05Z"
        });
        let message: Message = from_json(&json).unwrap();
        assert_eq!(message.message_type, MessageType::User);
        assert!(message.citations.is_empty());
        assert!(!message.is_streaming);
    }
}
