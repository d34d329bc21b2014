/// Chunk ready to be written, embedding already serialized.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub chunk_index: i64,
    pub embedding: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub document_id: String,
    pub document_name: String,
    pub content: String,
    pub chunk_index: i64,
    pub embedding: Vec<u8>,
}
