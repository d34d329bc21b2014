pub mod models;

use crate::codec::{self, CodecError};
use crate::models::{DocumentStatus, KnowledgeDocument, Session};
use crate::settings::{KeyValueStore, StoreError};
use models::{NewChunk, StoredChunk};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DATABASE_FILE: &str = "chat-box.db";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt record: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Application database. Sessions and documents are stored as binary
/// records next to the few columns needed for ordering and filtering.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(app_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(app_dir)?;
        let conn = Connection::open(app_dir.join(DATABASE_FILE))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                record BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                record BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                content TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                embedding BLOB,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Sessions ──

    pub fn save_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (id, is_pinned, updated_at, record) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                is_pinned = excluded.is_pinned,
                updated_at = excluded.updated_at,
                record = excluded.record",
            params![
                session.id(),
                session.is_pinned,
                session.updated_at.timestamp_micros(),
                codec::to_bytes(session),
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        let record: Option<Vec<u8>> = conn
            .query_row(
                "SELECT record FROM sessions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(record.map(|bytes| codec::from_bytes(&bytes)).transpose()?)
    }

    /// Pinned sessions first, then most recently updated.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT record FROM sessions ORDER BY is_pinned DESC, updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        let mut sessions = Vec::new();
        for bytes in rows {
            sessions.push(codec::from_bytes(&bytes?)?);
        }
        Ok(sessions)
    }

    pub fn delete_session(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    // ── Documents ──

    pub fn save_document(&self, doc: &KnowledgeDocument) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO documents (id, status, added_at, record) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                added_at = excluded.added_at,
                record = excluded.record",
            params![
                doc.id(),
                doc.status().as_str(),
                doc.added_at().timestamp_micros(),
                codec::to_bytes(doc),
            ],
        )?;
        Ok(())
    }

    pub fn get_document(&self, id: &str) -> Result<Option<KnowledgeDocument>> {
        let conn = self.conn();
        let record: Option<Vec<u8>> = conn
            .query_row(
                "SELECT record FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(record.map(|bytes| codec::from_bytes(&bytes)).transpose()?)
    }

    /// Newest first, deleted documents excluded.
    pub fn list_documents(&self) -> Result<Vec<KnowledgeDocument>> {
        self.query_documents(
            "SELECT record FROM documents WHERE status != ?1 ORDER BY added_at DESC",
            DocumentStatus::Deleted,
        )
    }

    pub fn list_documents_with_status(
        &self,
        status: DocumentStatus,
    ) -> Result<Vec<KnowledgeDocument>> {
        self.query_documents(
            "SELECT record FROM documents WHERE status = ?1 ORDER BY added_at ASC",
            status,
        )
    }

    fn query_documents(
        &self,
        sql: &str,
        status: DocumentStatus,
    ) -> Result<Vec<KnowledgeDocument>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![status.as_str()], |row| row.get::<_, Vec<u8>>(0))?;
        let mut docs = Vec::new();
        for bytes in rows {
            docs.push(codec::from_bytes(&bytes?)?);
        }
        Ok(docs)
    }

    /// Whether a live document already points at `path`.
    pub fn has_document_path(&self, path: &str) -> Result<bool> {
        Ok(self
            .list_documents()?
            .iter()
            .any(|doc| doc.path() == path))
    }

    // ── Chunks ──

    /// Swap the chunk set of a document in one transaction.
    pub fn replace_chunks(&self, document_id: &str, chunks: &[NewChunk]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (id, document_id, content, chunk_index, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    document_id,
                    chunk.content,
                    chunk.chunk_index,
                    chunk.embedding,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_chunks(&self, document_id: &str) -> Result<usize> {
        let conn = self.conn();
        Ok(conn.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?)
    }

    /// Every chunk that has an embedding, joined with its document name.
    pub fn embedded_chunks(&self) -> Result<Vec<StoredChunk>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.document_id, c.content, c.chunk_index, c.embedding, d.record
             FROM chunks c JOIN documents d ON d.id = c.document_id
             WHERE c.embedding IS NOT NULL AND d.status = ?1",
        )?;
        let rows = stmt.query_map(params![DocumentStatus::Indexed.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, Vec<u8>>(5)?,
            ))
        })?;
        let mut chunks = Vec::new();
        for row in rows {
            let (id, document_id, content, chunk_index, embedding, record) = row?;
            let doc: KnowledgeDocument = codec::from_bytes(&record)?;
            chunks.push(StoredChunk {
                id,
                document_id,
                document_name: doc.name().to_string(),
                content,
                chunk_index,
                embedding,
            });
        }
        Ok(chunks)
    }

    // ── Settings ──

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        self.get_setting(key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        self.set_setting(key, value)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn remove(&self, key: &str) -> std::result::Result<(), StoreError> {
        self.delete_setting(key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
