use std::fs;
use std::path::Path;

pub const CHUNK_SIZE: usize = 512;
pub const CHUNK_OVERLAP: usize = 64;
const SUMMARY_CHARS: usize = 200;

/// Extensions the knowledge base can ingest.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "pdf"];

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("PDF parse error: {0}")]
    Pdf(String),
    #[error("Unsupported file type: .{0}")]
    Unsupported(String),
    #[error("Document is empty or could not be parsed")]
    Empty,
}

/// Parsed document content
pub struct ParsedDocument {
    pub content: String,
    pub file_type: String,
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Parse a document file into plain text
pub fn parse_file(path: &Path) -> Result<ParsedDocument, DocumentError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let read_err = |source: std::io::Error| DocumentError::Read {
        path: path.display().to_string(),
        source,
    };

    match ext.as_str() {
        "txt" => Ok(ParsedDocument {
            content: fs::read_to_string(path).map_err(read_err)?,
            file_type: "txt".into(),
        }),
        "md" | "markdown" => Ok(ParsedDocument {
            content: fs::read_to_string(path).map_err(read_err)?,
            file_type: "md".into(),
        }),
        "pdf" => {
            let bytes = fs::read(path).map_err(read_err)?;
            let content = pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| DocumentError::Pdf(e.to_string()))?;
            Ok(ParsedDocument {
                content,
                file_type: "pdf".into(),
            })
        }
        _ => Err(DocumentError::Unsupported(ext)),
    }
}

/// Split text into overlapping chunks for embedding
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || chunk_size == 0 {
        return vec![];
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        if end >= chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Short plain-text summary: the opening of the document, whitespace collapsed.
pub fn summarize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(SUMMARY_CHARS) {
        Some((cut, _)) => format!("{}...", &collapsed[..cut]),
        None => collapsed,
    }
}
