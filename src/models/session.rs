use super::{AiModel, Message};
use crate::codec::{required, CodecError, FieldSink, FieldSource, Record};
use chrono::{DateTime, Utc};
use std::hash::{Hash, Hasher};

pub const PLACEHOLDER_TITLE: &str = "New Chat";
pub const EMPTY_PREVIEW: &str = "No messages yet";

const PREVIEW_CHARS: usize = 50;
const TITLE_CHARS: usize = 30;
const ELLIPSIS: &str = "...";

/// A named conversation owning its messages in conversation order.
///
/// Every operation consumes the session and returns the next version;
/// `updated_at` never moves backwards.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    pub title: String,
    messages: Vec<Message>,
    pub selected_model: AiModel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_pinned: bool,
}

impl Session {
    pub fn create(selected_model: AiModel) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: PLACEHOLDER_TITLE.to_string(),
            messages: Vec::new(),
            selected_model,
            created_at: now,
            updated_at: now,
            is_pinned: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn has_placeholder_title(&self) -> bool {
        self.title == PLACEHOLDER_TITLE
    }

    fn touched(mut self) -> Self {
        self.updated_at = Utc::now().max(self.updated_at);
        self
    }

    #[must_use]
    pub fn add_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self.touched()
    }

    /// Replace the final message. An empty session comes back untouched.
    #[must_use]
    pub fn update_last_message(mut self, message: Message) -> Self {
        match self.messages.last_mut() {
            Some(last) => *last = message,
            None => return self,
        }
        self.touched()
    }

    #[must_use]
    pub fn clear_messages(mut self) -> Self {
        self.messages.clear();
        self.touched()
    }

    #[must_use]
    pub fn rename(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self.touched()
    }

    #[must_use]
    pub fn toggle_pin(mut self) -> Self {
        self.is_pinned = !self.is_pinned;
        self.touched()
    }

    #[must_use]
    pub fn with_model(mut self, model: AiModel) -> Self {
        self.selected_model = model;
        self.touched()
    }

    pub fn last_message_preview(&self) -> String {
        match self.messages.last() {
            None => EMPTY_PREVIEW.to_string(),
            Some(message) => {
                let flat = message.content.replace('\n', " ");
                truncate_chars(&flat, PREVIEW_CHARS)
            }
        }
    }
}

/// Title derived from a first user message: its first line, shortened.
pub fn title_from_prompt(prompt: &str) -> String {
    let first_line = prompt.trim().lines().next().unwrap_or_default().trim();
    if first_line.is_empty() {
        return PLACEHOLDER_TITLE.to_string();
    }
    truncate_chars(first_line, TITLE_CHARS)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{}", &text[..cut], ELLIPSIS),
        None => text.to_string(),
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Session {}

impl Hash for Session {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Record for Session {
    fn write<S: FieldSink>(&self, sink: &mut S) {
        sink.put_str("id", &self.id);
        sink.put_str("title", &self.title);
        sink.put_records("messages", &self.messages);
        sink.put_str("selectedModel", self.selected_model.as_str());
        sink.put_time("createdAt", self.created_at);
        sink.put_time("updatedAt", self.updated_at);
        sink.put_bool("isPinned", self.is_pinned);
    }

    fn read<S: FieldSource>(source: &mut S) -> Result<Self, CodecError> {
        let id = required(source.take_str("id")?, "id")?;
        let title = source
            .take_str("title")?
            .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string());
        let messages = source.take_records("messages")?.unwrap_or_default();
        let selected_model = source
            .take_str("selectedModel")?
            .map(|raw| AiModel::parse_lossy(&raw))
            .unwrap_or_default();
        let created_at = required(source.take_time("createdAt")?, "createdAt")?;
        let updated_at = source.take_time("updatedAt")?.unwrap_or(created_at);
        let is_pinned = source.take_bool("isPinned")?.unwrap_or(false);
        Ok(Self {
            id,
            title,
            messages,
            selected_model,
            created_at,
            updated_at,
            is_pinned,
        })
    }
}
