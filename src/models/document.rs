use crate::codec::{required, CodecError, FieldSink, FieldSource, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ingestion state of a knowledge document.
///
/// ```text
/// pending -> indexing -> indexed
///                     -> failed -> indexing (retry)
/// pending | indexed | failed -> deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Indexing,
    Indexed,
    Failed,
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Indexing => "indexing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Deleted => "deleted",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "Pending",
            DocumentStatus::Indexing => "Indexing",
            DocumentStatus::Indexed => "Indexed",
            DocumentStatus::Failed => "Failed",
            DocumentStatus::Deleted => "Deleted",
        }
    }

    /// Unknown values read back as `Pending` so the document is indexed again.
    pub fn parse_lossy(raw: &str) -> Self {
        match raw {
            "indexing" => DocumentStatus::Indexing,
            "indexed" => DocumentStatus::Indexed,
            "failed" => DocumentStatus::Failed,
            "deleted" => DocumentStatus::Deleted,
            _ => DocumentStatus::Pending,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot move document from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeDocument {
    id: String,
    name: String,
    path: String,
    doc_type: String,
    size: u64,
    status: DocumentStatus,
    added_at: DateTime<Utc>,
    indexed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    summary: Option<String>,
    vector_count: Option<u64>,
}

impl KnowledgeDocument {
    /// A new pending document. Name and type are derived here and never again.
    pub fn create(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .to_string();
        let doc_type = name
            .rfind('.')
            .map(|dot| name[dot..].to_string())
            .unwrap_or_default();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            path,
            doc_type,
            size,
            status: DocumentStatus::Pending,
            added_at: Utc::now(),
            indexed_at: None,
            error_message: None,
            summary: None,
            vector_count: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Extension including the leading dot, or empty.
    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    pub fn indexed_at(&self) -> Option<DateTime<Utc>> {
        self.indexed_at
    }

    /// Only a failed document carries a message.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn vector_count(&self) -> Option<u64> {
        self.vector_count
    }

    pub fn can_delete(&self) -> bool {
        self.status != DocumentStatus::Indexing
    }

    pub fn can_reindex(&self) -> bool {
        self.status == DocumentStatus::Failed
    }

    pub fn formatted_size(&self) -> String {
        format_size(self.size)
    }

    fn transition(&self, to: DocumentStatus, allowed: &[DocumentStatus]) -> Result<(), TransitionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }

    pub fn mark_as_indexing(self) -> Result<Self, TransitionError> {
        self.transition(
            DocumentStatus::Indexing,
            &[DocumentStatus::Pending, DocumentStatus::Failed],
        )?;
        Ok(Self {
            status: DocumentStatus::Indexing,
            error_message: None,
            ..self
        })
    }

    pub fn mark_as_indexed(
        self,
        summary: Option<String>,
        vector_count: Option<u64>,
    ) -> Result<Self, TransitionError> {
        self.transition(DocumentStatus::Indexed, &[DocumentStatus::Indexing])?;
        Ok(Self {
            status: DocumentStatus::Indexed,
            indexed_at: Some(Utc::now()),
            error_message: None,
            summary,
            vector_count,
            ..self
        })
    }

    pub fn mark_as_failed(self, error: impl Into<String>) -> Result<Self, TransitionError> {
        self.transition(DocumentStatus::Failed, &[DocumentStatus::Indexing])?;
        Ok(Self {
            status: DocumentStatus::Failed,
            error_message: Some(error.into()),
            ..self
        })
    }

    /// Deleting an already deleted document is a no-op.
    pub fn mark_as_deleted(self) -> Result<Self, TransitionError> {
        if self.status == DocumentStatus::Deleted {
            return Ok(self);
        }
        self.transition(
            DocumentStatus::Deleted,
            &[
                DocumentStatus::Pending,
                DocumentStatus::Indexed,
                DocumentStatus::Failed,
            ],
        )?;
        Ok(Self {
            status: DocumentStatus::Deleted,
            error_message: None,
            ..self
        })
    }
}

/// Human readable byte count with 1024-based units.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let value = bytes as f64;
    if value < KB {
        format!("{bytes} B")
    } else if value < MB {
        format!("{:.1} KB", value / KB)
    } else if value < GB {
        format!("{:.1} MB", value / MB)
    } else {
        format!("{:.1} GB", value / GB)
    }
}

impl Record for KnowledgeDocument {
    fn write<S: FieldSink>(&self, sink: &mut S) {
        sink.put_str("id", &self.id);
        sink.put_str("name", &self.name);
        sink.put_str("path", &self.path);
        sink.put_str("type", &self.doc_type);
        sink.put_u64("size", self.size);
        sink.put_str("status", self.status.as_str());
        sink.put_time("addedAt", self.added_at);
        sink.put_opt_time("indexedAt", self.indexed_at);
        sink.put_opt_str("errorMessage", self.error_message.as_deref());
        sink.put_opt_str("summary", self.summary.as_deref());
        sink.put_opt_u64("vectorCount", self.vector_count);
    }

    fn read<S: FieldSource>(source: &mut S) -> Result<Self, CodecError> {
        let id = required(source.take_str("id")?, "id")?;
        let name = source.take_str("name")?.unwrap_or_default();
        let path = source.take_str("path")?.unwrap_or_default();
        let doc_type = source.take_str("type")?.unwrap_or_default();
        let size = source.take_u64("size")?.unwrap_or(0);
        let status = source
            .take_str("status")?
            .map(|raw| DocumentStatus::parse_lossy(&raw))
            .unwrap_or(DocumentStatus::Pending);
        let added_at = required(source.take_time("addedAt")?, "addedAt")?;
        let indexed_at = source.take_opt_time("indexedAt")?;
        let error_message = source
            .take_opt_str("errorMessage")?
            .filter(|_| status == DocumentStatus::Failed);
        let summary = source.take_opt_str("summary")?;
        let vector_count = source.take_opt_u64("vectorCount")?;
        Ok(Self {
            id,
            name,
            path,
            doc_type,
            size,
            status,
            added_at,
            indexed_at,
            error_message,
            summary,
            vector_count,
        })
    }
}
