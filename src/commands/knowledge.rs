use crate::db::models::NewChunk;
use crate::db::Database;
use crate::doc_processor::{self, DocumentError, CHUNK_OVERLAP, CHUNK_SIZE};
use crate::embedding::{
    bytes_to_embedding, embedding_to_bytes, generate_embeddings, search_similar, EMBEDDING_MODEL,
};
use crate::error::{AppError, Result};
use crate::llm::openai::OpenAiConfig;
use crate::models::{DocumentStatus, KnowledgeDocument, TransitionError};
use crate::settings::SettingsStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const EMBEDDING_BATCH: usize = 20;
pub const DEFAULT_TOP_K: usize = 5;
pub const INTERRUPTED_MESSAGE: &str = "Indexing was interrupted";

/// One file chosen by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickedFile {
    pub path: String,
    pub size: u64,
}

/// Native file dialogs, supplied by the shell.
pub trait FilePicker: Send + Sync {
    fn pick_files(&self) -> Vec<PickedFile>;
    fn pick_directory(&self) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub id: String,
    pub document_id: String,
    pub document_name: String,
    pub content: String,
    pub chunk_index: i64,
    pub score: Option<f32>,
}

/// The indexed document corpus used for retrieval.
#[derive(Clone)]
pub struct KnowledgeBase {
    db: Arc<Database>,
    settings: SettingsStore,
}

impl KnowledgeBase {
    pub fn new(db: Arc<Database>, settings: SettingsStore) -> Self {
        Self { db, settings }
    }

    fn embedding_config(&self) -> OpenAiConfig {
        OpenAiConfig::local(&self.settings.current().server_url)
    }

    pub fn list_documents(&self) -> Result<Vec<KnowledgeDocument>> {
        Ok(self.db.list_documents()?)
    }

    pub fn get_document(&self, id: &str) -> Result<KnowledgeDocument> {
        self.db
            .get_document(id)?
            .ok_or_else(|| AppError::document_not_found(id))
    }

    /// Register picked files as pending documents. Already known paths are skipped.
    pub fn add_files(&self, picker: &dyn FilePicker) -> Result<Vec<KnowledgeDocument>> {
        self.register(picker.pick_files())
    }

    /// Register every supported file below a picked directory.
    pub fn add_directory(&self, picker: &dyn FilePicker) -> Result<Vec<KnowledgeDocument>> {
        let Some(root) = picker.pick_directory() else {
            debug!("Directory selection cancelled");
            return Ok(Vec::new());
        };
        let files = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && doc_processor::is_supported(entry.path()))
            .map(|entry| PickedFile {
                path: entry.path().to_string_lossy().into_owned(),
                size: entry.metadata().map(|m| m.len()).unwrap_or(0),
            })
            .collect();
        self.register(files)
    }

    fn register(&self, files: Vec<PickedFile>) -> Result<Vec<KnowledgeDocument>> {
        let mut added = Vec::new();
        for file in files {
            if self.db.has_document_path(&file.path)? {
                debug!(path = %file.path, "Document already in knowledge base");
                continue;
            }
            let doc = KnowledgeDocument::create(file.path, file.size);
            self.db.save_document(&doc)?;
            info!(name = doc.name(), "Document added");
            added.push(doc);
        }
        Ok(added)
    }

    /// Parse, chunk and embed one document. Failures end up in the document
    /// status rather than in the returned error.
    pub async fn index_document(&self, id: &str) -> Result<KnowledgeDocument> {
        let doc = self.get_document(id)?.mark_as_indexing()?;
        self.db.save_document(&doc)?;
        info!(name = doc.name(), "Indexing document");

        let doc = match self.build_index(&doc).await {
            Ok((summary, vectors)) => {
                info!(name = doc.name(), vectors, "Document indexed");
                doc.mark_as_indexed(Some(summary), Some(vectors))?
            }
            Err(e) => {
                warn!(name = doc.name(), error = %e, "Indexing failed");
                if let Err(cleanup) = self.db.delete_chunks(doc.id()) {
                    warn!(name = doc.name(), error = %cleanup, "Failed to drop partial chunks");
                }
                doc.mark_as_failed(e.to_string())?
            }
        };
        self.db.save_document(&doc)?;
        Ok(doc)
    }

    async fn build_index(&self, doc: &KnowledgeDocument) -> Result<(String, u64)> {
        let path = PathBuf::from(doc.path());
        let (summary, chunks) = tokio::task::spawn_blocking(move || parse_and_chunk(&path)).await??;

        let config = self.embedding_config();
        let mut rows = Vec::with_capacity(chunks.len());
        for (batch_index, batch) in chunks.chunks(EMBEDDING_BATCH).enumerate() {
            let embeddings = generate_embeddings(&config, batch, EMBEDDING_MODEL).await?;
            for (offset, (content, embedding)) in batch.iter().zip(embeddings).enumerate() {
                rows.push(NewChunk {
                    content: content.clone(),
                    chunk_index: (batch_index * EMBEDDING_BATCH + offset) as i64,
                    embedding: embedding_to_bytes(&embedding),
                });
            }
        }
        self.db.replace_chunks(doc.id(), &rows)?;
        Ok((summary, rows.len() as u64))
    }

    /// Retry a failed document.
    pub async fn reindex_document(&self, id: &str) -> Result<KnowledgeDocument> {
        let doc = self.get_document(id)?;
        if !doc.can_reindex() {
            return Err(TransitionError {
                from: doc.status(),
                to: DocumentStatus::Indexing,
            }
            .into());
        }
        self.index_document(id).await
    }

    /// Fail documents left in `indexing` by a previous run and drop their
    /// partial vectors. Only safe before any indexing starts in this process.
    pub fn recover_interrupted(&self) -> Result<Vec<KnowledgeDocument>> {
        let stuck = self.db.list_documents_with_status(DocumentStatus::Indexing)?;
        let mut recovered = Vec::with_capacity(stuck.len());
        for doc in stuck {
            self.db.delete_chunks(doc.id())?;
            let doc = doc.mark_as_failed(INTERRUPTED_MESSAGE)?;
            self.db.save_document(&doc)?;
            warn!(name = doc.name(), "Recovered interrupted indexing");
            recovered.push(doc);
        }
        Ok(recovered)
    }

    /// Index every pending document, oldest first.
    pub async fn index_pending(&self) -> Result<Vec<KnowledgeDocument>> {
        let pending = self.db.list_documents_with_status(DocumentStatus::Pending)?;
        let mut results = Vec::with_capacity(pending.len());
        for doc in pending {
            results.push(self.index_document(doc.id()).await?);
        }
        Ok(results)
    }

    /// Drop a document's vectors and mark it deleted. Refused while indexing.
    pub fn delete_document(&self, id: &str) -> Result<KnowledgeDocument> {
        let doc = self.get_document(id)?.mark_as_deleted()?;
        self.db.delete_chunks(doc.id())?;
        self.db.save_document(&doc)?;
        info!(name = doc.name(), "Document deleted");
        Ok(doc)
    }

    /// Search knowledge base for chunks relevant to a query
    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<ChunkInfo>> {
        let top_k = top_k.unwrap_or(DEFAULT_TOP_K);
        let chunks = self.db.embedded_chunks()?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let query_embeddings =
            generate_embeddings(&self.embedding_config(), &[query.to_string()], EMBEDDING_MODEL)
                .await?;
        let Some(query_emb) = query_embeddings.first() else {
            return Ok(Vec::new());
        };

        let candidates: Vec<Vec<f32>> = chunks
            .iter()
            .map(|c| bytes_to_embedding(&c.embedding))
            .collect();

        Ok(search_similar(query_emb, &candidates, top_k)
            .into_iter()
            .map(|(index, score)| {
                let chunk = &chunks[index];
                ChunkInfo {
                    id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    document_name: chunk.document_name.clone(),
                    content: chunk.content.clone(),
                    chunk_index: chunk.chunk_index,
                    score: Some(score),
                }
            })
            .collect())
    }
}

fn parse_and_chunk(path: &Path) -> std::result::Result<(String, Vec<String>), DocumentError> {
    let parsed = doc_processor::parse_file(path)?;
    let chunks = doc_processor::chunk_text(&parsed.content, CHUNK_SIZE, CHUNK_OVERLAP);
    if chunks.is_empty() {
        return Err(DocumentError::Empty);
    }
    Ok((doc_processor::summarize(&parsed.content), chunks))
}
