use crate::commands::knowledge::{ChunkInfo, KnowledgeBase};
use crate::db::Database;
use crate::doc_processor::summarize;
use crate::error::{AppError, Result};
use crate::llm::{ChatRequest, Provider, StreamChunk};
use crate::models::session::title_from_prompt;
use crate::models::{AiModel, Artifact, Message, Session, SourceCitation, ThinkingStep};
use crate::settings::SettingsStore;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatStreamEvent {
    pub session_id: String,
    pub delta: String,
    pub done: bool,
}

/// Passages pulled from the knowledge base for one prompt.
#[derive(Default)]
struct Retrieval {
    hits: Vec<ChunkInfo>,
}

impl Retrieval {
    fn context_message(&self) -> Option<Message> {
        if self.hits.is_empty() {
            return None;
        }
        let mut context = String::from(
            "Answer using the following passages from the user's documents when they are relevant.\n",
        );
        for (i, hit) in self.hits.iter().enumerate() {
            context.push_str(&format!(
                "\n[{}] {}:\n{}\n",
                i + 1,
                hit.document_name,
                hit.content
            ));
        }
        Some(Message::system(context))
    }

    fn citations(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for hit in &self.hits {
            if !names.contains(&hit.document_name) {
                names.push(hit.document_name.clone());
            }
        }
        names
    }

    fn sources(&self) -> Vec<SourceCitation> {
        self.hits
            .iter()
            .map(|hit| SourceCitation {
                title: hit.document_name.clone(),
                snippet: summarize(&hit.content),
                score: hit.score,
                url: None,
            })
            .collect()
    }

    fn thinking_steps(&self) -> Vec<ThinkingStep> {
        if self.hits.is_empty() {
            return Vec::new();
        }
        vec![ThinkingStep {
            title: "Searched knowledge base".into(),
            detail: format!(
                "Found {} relevant passages in {} documents",
                self.hits.len(),
                self.citations().len()
            ),
        }]
    }
}

/// Conversations: session bookkeeping plus the send/stream loop.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    settings: SettingsStore,
    knowledge: KnowledgeBase,
}

impl ChatService {
    pub fn new(db: Arc<Database>, settings: SettingsStore, knowledge: KnowledgeBase) -> Self {
        Self {
            db,
            settings,
            knowledge,
        }
    }

    /// New empty session. Without an explicit model the preferred one is used.
    pub fn create_session(&self, model: Option<AiModel>) -> Result<Session> {
        let model = model.unwrap_or_else(|| self.settings.current().model());
        let session = Session::create(model);
        self.db.save_session(&session)?;
        info!(id = session.id(), %model, "Session created");
        Ok(session)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.db.list_sessions()?)
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        self.db
            .get_session(id)?
            .ok_or_else(|| AppError::session_not_found(id))
    }

    pub fn delete_session(&self, id: &str) -> Result<()> {
        if !self.db.delete_session(id)? {
            return Err(AppError::session_not_found(id));
        }
        info!(id, "Session deleted");
        Ok(())
    }

    fn modify(&self, id: &str, change: impl FnOnce(Session) -> Session) -> Result<Session> {
        let session = change(self.get_session(id)?);
        self.db.save_session(&session)?;
        Ok(session)
    }

    /// Blank titles are ignored.
    pub fn rename_session(&self, id: &str, title: &str) -> Result<Session> {
        let title = title.trim();
        if title.is_empty() {
            return self.get_session(id);
        }
        self.modify(id, |s| s.rename(title))
    }

    pub fn toggle_pin(&self, id: &str) -> Result<Session> {
        self.modify(id, Session::toggle_pin)
    }

    pub fn clear_session(&self, id: &str) -> Result<Session> {
        self.modify(id, Session::clear_messages)
    }

    pub fn set_session_model(&self, id: &str, model: AiModel) -> Result<Session> {
        self.modify(id, |s| s.with_model(model))
    }

    async fn retrieve(&self, prompt: &str) -> Retrieval {
        match self.knowledge.search(prompt, None).await {
            Ok(hits) => {
                debug!(hits = hits.len(), "Knowledge base searched");
                Retrieval { hits }
            }
            Err(e) => {
                warn!(error = %e, "Knowledge search failed, answering without context");
                Retrieval::default()
            }
        }
    }

    /// Append `content` as a user message and stream the assistant reply
    /// into the session. Blank input leaves the session untouched.
    ///
    /// A provider failure is written into the reply as an error notice and
    /// the session is saved before the error is returned.
    pub async fn send_message<F>(
        &self,
        session_id: &str,
        content: &str,
        on_event: F,
    ) -> Result<Session>
    where
        F: Fn(ChatStreamEvent) + Send + Sync,
    {
        let session = self.get_session(session_id)?;
        let content = content.trim();
        if content.is_empty() {
            debug!(session_id, "Ignoring blank message");
            return Ok(session);
        }

        let retitle =
            session.has_placeholder_title() && !session.messages().iter().any(Message::is_user);
        let mut session = session.add_message(Message::user(content));
        if retitle {
            session = session.rename(title_from_prompt(content));
        }
        self.db.save_session(&session)?;

        let model = session.selected_model;
        let retrieval = if model == AiModel::LocalRag {
            self.retrieve(content).await
        } else {
            Retrieval::default()
        };

        let mut history: Vec<Message> = retrieval.context_message().into_iter().collect();
        history.extend(session.messages().iter().cloned());
        let request = ChatRequest::for_history(model, &history, true);

        let placeholder = Message::assistant("")
            .with_streaming(true)
            .with_thinking_steps(retrieval.thinking_steps())
            .with_sources(retrieval.sources())
            .with_citations(retrieval.citations());
        let live = Mutex::new(session.add_message(placeholder));

        let outcome = match Provider::for_model(model, &self.settings.current()) {
            Ok(provider) => {
                provider
                    .chat_stream(&request, |chunk: StreamChunk| {
                        if !chunk.delta.is_empty() {
                            let mut current =
                                live.lock().unwrap_or_else(PoisonError::into_inner);
                            if let Some(last) = current.last_message().cloned() {
                                let text = format!("{}{}", last.content, chunk.delta);
                                *current =
                                    current.clone().update_last_message(last.with_content(text));
                            }
                        }
                        on_event(ChatStreamEvent {
                            session_id: session_id.to_string(),
                            delta: chunk.delta,
                            done: chunk.done,
                        });
                    })
                    .await
            }
            Err(e) => Err(e),
        };

        let session = live.into_inner().unwrap_or_else(PoisonError::into_inner);
        let (reply, failure) = match outcome {
            Ok(reply) => (reply, None),
            Err(e) => {
                warn!(session_id, error = %e, "Assistant reply failed");
                on_event(ChatStreamEvent {
                    session_id: session_id.to_string(),
                    delta: String::new(),
                    done: true,
                });
                (format!("Error: {e}"), Some(e))
            }
        };

        let artifact = match failure {
            None => Artifact::extract_from(&reply),
            Some(_) => None,
        };
        let session = match session.last_message().cloned() {
            Some(last) => {
                let finished = last
                    .with_content(reply)
                    .with_streaming(false)
                    .with_artifact(artifact);
                session.update_last_message(finished)
            }
            None => session,
        };
        self.db.save_session(&session)?;

        match failure {
            Some(e) => Err(e.into()),
            None => {
                info!(session_id, messages = session.messages().len(), "Reply complete");
                Ok(session)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::knowledge::tests::{embedding_server, StaticPicker};
    use crate::commands::knowledge::PickedFile;
    use crate::llm::LlmError;
    use crate::models::MessageType;
    use crate::settings::KEY_SERVER_URL;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REPLY: &str = "Here you go:\n```rust\nfn main() {\n    let x = 1;\n    let y = 2;\n    println!(\"{}\", x + y);\n}\n```";

    fn sse_body(reply: &str) -> String {
        let mut body = String::new();
        for piece in reply.split_inclusive('\n') {
            let event = serde_json::json!({
                "choices": [{ "delta": { "content": piece }, "finish_reason": null }]
            });
            body.push_str(&format!("data: {event}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn mount_reply(server: &MockServer, reply: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse_body(reply), "text/event-stream"),
            )
            .mount(server)
            .await;
    }

    async fn service(server_url: &str) -> (ChatService, KnowledgeBase) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.set_setting(KEY_SERVER_URL, server_url).unwrap();
        let settings = SettingsStore::load(db.clone()).await;
        let knowledge = KnowledgeBase::new(db.clone(), settings.clone());
        (ChatService::new(db, settings, knowledge.clone()), knowledge)
    }

    #[tokio::test]
    async fn test_send_message_streams_and_persists() {
        let server = MockServer::start().await;
        mount_reply(&server, REPLY).await;
        let (chat, _) = service(&server.uri()).await;
        let session = chat.create_session(None).unwrap();
        assert_eq!(session.selected_model, AiModel::LocalRag);

        let events = Mutex::new(Vec::new());
        let updated = chat
            .send_message(session.id(), "  Show me a Rust program\nplease ", |event| {
                events.lock().unwrap().push(event);
            })
            .await
            .unwrap();

        assert_eq!(updated.title, "Show me a Rust program");
        assert_eq!(updated.messages().len(), 2);
        let reply = &updated.messages()[1];
        assert_eq!(reply.message_type, MessageType::Assistant);
        assert_eq!(reply.content, REPLY);
        assert!(!reply.is_streaming);
        let artifact = reply.artifact.as_ref().unwrap();
        assert_eq!(artifact.language.as_deref(), Some("rust"));

        let events = events.into_inner().unwrap();
        assert!(events.last().unwrap().done);
        let streamed: String = events.iter().map(|e| e.delta.as_str()).collect();
        assert_eq!(streamed, REPLY);
        assert!(events.iter().all(|e| e.session_id == session.id()));

        let stored = chat.get_session(session.id()).unwrap();
        assert_eq!(stored.messages()[1].content, REPLY);
        assert_eq!(stored.title, "Show me a Rust program");
    }

    #[tokio::test]
    async fn test_title_is_only_derived_once() {
        let server = MockServer::start().await;
        mount_reply(&server, "ok").await;
        let (chat, _) = service(&server.uri()).await;
        let session = chat.create_session(None).unwrap();

        chat.send_message(session.id(), "first", |_| {}).await.unwrap();
        let updated = chat
            .send_message(session.id(), "second", |_| {})
            .await
            .unwrap();
        assert_eq!(updated.title, "first");
        assert_eq!(updated.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_blank_message_is_ignored() {
        let (chat, _) = service("http://127.0.0.1:9").await;
        let session = chat.create_session(None).unwrap();
        let unchanged = chat.send_message(session.id(), "   ", |_| {}).await.unwrap();
        assert!(unchanged.messages().is_empty());
        assert!(unchanged.has_placeholder_title());
    }

    #[tokio::test]
    async fn test_missing_gemini_key_is_recorded_in_reply() {
        let (chat, _) = service("http://127.0.0.1:9").await;
        let session = chat.create_session(Some(AiModel::Gemini)).unwrap();

        let done = Mutex::new(false);
        let err = chat
            .send_message(session.id(), "hello", |event| {
                *done.lock().unwrap() = event.done;
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Llm(LlmError::MissingApiKey("Gemini"))));
        assert!(done.into_inner().unwrap());

        let stored = chat.get_session(session.id()).unwrap();
        let reply = stored.last_message().unwrap();
        assert_eq!(reply.content, "Error: Gemini API key not configured");
        assert!(!reply.is_streaming);
    }

    #[tokio::test]
    async fn test_local_rag_attaches_sources() {
        let server = embedding_server().await;
        mount_reply(&server, "Rust uses ownership.").await;
        let (chat, knowledge) = service(&server.uri()).await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rust.md");
        std::fs::write(&file, "Rust tracks ownership at compile time.").unwrap();
        let picker = StaticPicker {
            files: vec![PickedFile {
                path: file.to_string_lossy().into_owned(),
                size: 38,
            }],
            directory: None,
        };
        knowledge.add_files(&picker).unwrap();
        knowledge.index_pending().await.unwrap();

        let session = chat.create_session(Some(AiModel::LocalRag)).unwrap();
        let updated = chat
            .send_message(session.id(), "How does rust manage memory?", |_| {})
            .await
            .unwrap();

        let reply = updated.last_message().unwrap();
        assert_eq!(reply.citations, vec!["rust.md"]);
        assert_eq!(reply.sources.len(), 1);
        assert_eq!(reply.thinking_steps.len(), 1);
        assert!(reply.artifact.is_none());

        let requests = server.received_requests().await.unwrap();
        let chat_request = requests
            .iter()
            .find(|r| r.url.path() == "/v1/chat/completions")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&chat_request.body).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("compile time"));
    }

    #[tokio::test]
    async fn test_session_bookkeeping() {
        let (chat, _) = service("http://127.0.0.1:9").await;
        let a = chat.create_session(Some(AiModel::WebSearch)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = chat.create_session(None).unwrap();

        let renamed = chat.rename_session(a.id(), "  Trip plans ").unwrap();
        assert_eq!(renamed.title, "Trip plans");
        assert_eq!(chat.rename_session(a.id(), " ").unwrap().title, "Trip plans");

        std::thread::sleep(std::time::Duration::from_millis(2));
        chat.toggle_pin(b.id()).unwrap();
        let order: Vec<String> = chat
            .list_sessions()
            .unwrap()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(order, vec![b.id().to_string(), a.id().to_string()]);

        let switched = chat.set_session_model(a.id(), AiModel::Gemini).unwrap();
        assert_eq!(switched.selected_model, AiModel::Gemini);
        assert!(chat.clear_session(a.id()).unwrap().messages().is_empty());

        chat.delete_session(a.id()).unwrap();
        assert!(matches!(
            chat.delete_session(a.id()),
            Err(AppError::NotFound { kind: "Session", .. })
        ));
        assert_eq!(chat.list_sessions().unwrap().len(), 1);
    }
}
