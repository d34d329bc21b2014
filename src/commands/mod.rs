pub mod chat;
pub mod knowledge;
pub mod settings;

pub use chat::{ChatService, ChatStreamEvent};
pub use knowledge::{ChunkInfo, FilePicker, KnowledgeBase, PickedFile};
pub use settings::{available_models, ModelInfo, SettingsView};
