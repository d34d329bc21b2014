//! Side-by-side comparison of several models.
//!
//! A submission fans out to every selected model at once. Each model gets
//! its own conversation; its reply is streamed token by token into a
//! placeholder message. All per-model futures are polled on the calling
//! task via `join_all`, so they interleave without running in parallel and
//! the conversation map never sees concurrent writers.

use crate::llm::{ChatRequest, LlmError, Provider};
use crate::models::{AiModel, Message};
use crate::settings::SettingsStore;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MAX_ARENA_MODELS: usize = 3;
pub const DEFAULT_TOKEN_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("Select at least one model")]
    NoModels,
    #[error("At most 3 models can be compared, got {0}")]
    TooManyModels(usize),
    #[error("{0} is selected more than once")]
    DuplicateModel(AiModel),
    #[error("The last selected model cannot be removed")]
    LastModel,
    #[error("A comparison is still running")]
    Busy,
}

/// Produces the full reply of one model; the controller does the streaming.
#[async_trait]
pub trait ArenaResponder: Send + Sync {
    async fn respond(&self, model: AiModel, history: &[Message]) -> Result<String, LlmError>;
}

/// Fixed reply per model, for demos and offline use.
pub struct CannedResponder {
    responses: HashMap<AiModel, String>,
}

impl CannedResponder {
    pub fn new(responses: HashMap<AiModel, String>) -> Self {
        Self { responses }
    }
}

impl Default for CannedResponder {
    fn default() -> Self {
        let responses = HashMap::from([
            (
                AiModel::LocalRag,
                "Based on the documents in your knowledge base, here is what I found.".to_string(),
            ),
            (
                AiModel::WebSearch,
                "According to recent results from the web, here is a summary.".to_string(),
            ),
            (
                AiModel::Gemini,
                "Here is a general answer drawing on what I know.".to_string(),
            ),
        ]);
        Self { responses }
    }
}

#[async_trait]
impl ArenaResponder for CannedResponder {
    async fn respond(&self, model: AiModel, _history: &[Message]) -> Result<String, LlmError> {
        Ok(self.responses.get(&model).cloned().unwrap_or_default())
    }
}

/// Asks the real backend for each model, using the current settings.
pub struct ProviderResponder {
    settings: SettingsStore,
}

impl ProviderResponder {
    pub fn new(settings: SettingsStore) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ArenaResponder for ProviderResponder {
    async fn respond(&self, model: AiModel, history: &[Message]) -> Result<String, LlmError> {
        let provider = Provider::for_model(model, &self.settings.current())?;
        let request = ChatRequest::for_history(model, history, false);
        Ok(provider.chat(&request).await?.content)
    }
}

/// Snapshot of one streamed step, for the view layer.
#[derive(Debug, Clone)]
pub struct ArenaUpdate {
    pub model: AiModel,
    pub message_id: String,
    pub content: String,
    pub is_streaming: bool,
}

struct ArenaState {
    selected: Vec<AiModel>,
    conversations: HashMap<AiModel, Vec<Message>>,
}

/// Resets the generating flag however the submission ends.
struct GeneratingGuard<'a>(&'a AtomicBool);

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ArenaController {
    responder: Arc<dyn ArenaResponder>,
    token_delay: Duration,
    state: Mutex<ArenaState>,
    generating: AtomicBool,
}

impl ArenaController {
    pub fn new(responder: Arc<dyn ArenaResponder>) -> Self {
        Self {
            responder,
            token_delay: DEFAULT_TOKEN_DELAY,
            state: Mutex::new(ArenaState {
                selected: vec![AiModel::LocalRag, AiModel::Gemini],
                conversations: HashMap::new(),
            }),
            generating: AtomicBool::new(false),
        }
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, ArenaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    pub fn selected_models(&self) -> Vec<AiModel> {
        self.state().selected.clone()
    }

    pub fn conversation(&self, model: AiModel) -> Vec<Message> {
        self.state()
            .conversations
            .get(&model)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_selected_models(&self, models: Vec<AiModel>) -> Result<(), ArenaError> {
        if self.is_generating() {
            return Err(ArenaError::Busy);
        }
        validate_selection(&models)?;
        self.state().selected = models;
        Ok(())
    }

    /// Add or remove one model, keeping the selection valid.
    pub fn toggle_model(&self, model: AiModel) -> Result<Vec<AiModel>, ArenaError> {
        if self.is_generating() {
            return Err(ArenaError::Busy);
        }
        let mut state = self.state();
        let mut next = state.selected.clone();
        match next.iter().position(|m| *m == model) {
            Some(_) if next.len() == 1 => return Err(ArenaError::LastModel),
            Some(index) => {
                next.remove(index);
            }
            None => next.push(model),
        }
        validate_selection(&next)?;
        state.selected = next.clone();
        Ok(next)
    }

    pub fn clear(&self) -> Result<(), ArenaError> {
        if self.is_generating() {
            return Err(ArenaError::Busy);
        }
        self.state().conversations.clear();
        Ok(())
    }

    /// Send `input` to every selected model and wait until all replies finish.
    ///
    /// Returns `false` without doing anything when the input is blank or a
    /// previous submission is still running.
    pub async fn submit(&self, input: &str, on_update: impl Fn(ArenaUpdate) + Send + Sync) -> bool {
        let prompt = input.trim();
        if prompt.is_empty() {
            return false;
        }
        if self.generating.swap(true, Ordering::SeqCst) {
            debug!("Arena submission ignored while generating");
            return false;
        }
        let _guard = GeneratingGuard(&self.generating);

        let models = {
            let mut state = self.state();
            let models = state.selected.clone();
            for model in &models {
                state
                    .conversations
                    .entry(*model)
                    .or_default()
                    .push(Message::user(prompt));
            }
            models
        };
        info!(models = models.len(), "Arena submission started");

        join_all(models.iter().map(|model| self.run_model(*model, &on_update))).await;

        info!("Arena submission finished");
        true
    }

    async fn run_model(&self, model: AiModel, on_update: &(impl Fn(ArenaUpdate) + Send + Sync)) {
        let placeholder = Message::assistant("").with_streaming(true);
        let message_id = placeholder.id().to_string();
        let history = {
            let mut state = self.state();
            let conversation = state.conversations.entry(model).or_default();
            let history = conversation.clone();
            conversation.push(placeholder);
            history
        };

        // A failing model is finalized with a notice; the others carry on.
        let response = match self.responder.respond(model, &history).await {
            Ok(text) => text,
            Err(e) => {
                warn!(model = model.as_str(), error = %e, "Arena model failed");
                format!("Error: {e}")
            }
        };

        let mut partial = String::new();
        for (i, token) in response.split_whitespace().enumerate() {
            tokio::time::sleep(self.token_delay).await;
            if i > 0 {
                partial.push(' ');
            }
            partial.push_str(token);
            let content = partial.clone();
            if let Some(update) =
                self.replace_message(model, &message_id, |m| m.with_content(content))
            {
                on_update(update);
            }
        }

        if let Some(update) = self.replace_message(model, &message_id, |m| {
            m.with_content(response).with_streaming(false)
        }) {
            on_update(update);
        }
        debug!(model = model.as_str(), "Arena stream complete");
    }

    fn replace_message(
        &self,
        model: AiModel,
        message_id: &str,
        update: impl FnOnce(Message) -> Message,
    ) -> Option<ArenaUpdate> {
        let mut state = self.state();
        let slot = state
            .conversations
            .get_mut(&model)?
            .iter_mut()
            .find(|m| m.id() == message_id)?;
        let next = update(slot.clone());
        let snapshot = ArenaUpdate {
            model,
            message_id: message_id.to_string(),
            content: next.content.clone(),
            is_streaming: next.is_streaming,
        };
        *slot = next;
        Some(snapshot)
    }
}

fn validate_selection(models: &[AiModel]) -> Result<(), ArenaError> {
    if models.is_empty() {
        return Err(ArenaError::NoModels);
    }
    if models.len() > MAX_ARENA_MODELS {
        return Err(ArenaError::TooManyModels(models.len()));
    }
    for (i, model) in models.iter().enumerate() {
        if models[..i].contains(model) {
            return Err(ArenaError::DuplicateModel(*model));
        }
    }
    Ok(())
}
