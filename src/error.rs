use crate::arena::ArenaError;
use crate::db::DbError;
use crate::doc_processor::DocumentError;
use crate::llm::LlmError;
use crate::models::TransitionError;
use serde::Serialize;

/// Error handed to the embedding shell.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    pub(crate) fn session_not_found(id: &str) -> Self {
        AppError::NotFound {
            kind: "Session",
            id: id.to_string(),
        }
    }

    pub(crate) fn document_not_found(id: &str) -> Self {
        AppError::NotFound {
            kind: "Document",
            id: id.to_string(),
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_message() {
        let err = AppError::session_not_found("abc");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!("Session not found: abc")
        );
    }
}
