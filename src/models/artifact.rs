use crate::codec::{required, CodecError, FieldSink, FieldSource, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum body length, in lines, for a fenced block to become an artifact.
pub const MIN_ARTIFACT_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Code,
    Markdown,
    Html,
    Mermaid,
    Json,
}

impl ArtifactType {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::Code => "code",
            ArtifactType::Markdown => "markdown",
            ArtifactType::Html => "html",
            ArtifactType::Mermaid => "mermaid",
            ArtifactType::Json => "json",
        }
    }

    /// Unknown values read back as `Code`.
    pub fn parse_lossy(raw: &str) -> Self {
        match raw {
            "markdown" => ArtifactType::Markdown,
            "html" => ArtifactType::Html,
            "mermaid" => ArtifactType::Mermaid,
            "json" => ArtifactType::Json,
            _ => ArtifactType::Code,
        }
    }

    /// Classify a code fence info string.
    fn from_fence(lang: &str) -> (Self, Option<String>) {
        match lang.to_ascii_lowercase().as_str() {
            "mermaid" => (ArtifactType::Mermaid, None),
            "html" | "htm" => (ArtifactType::Html, None),
            "json" => (ArtifactType::Json, None),
            "markdown" | "md" => (ArtifactType::Markdown, None),
            "" => (ArtifactType::Code, None),
            other => (ArtifactType::Code, Some(other.to_string())),
        }
    }
}

/// A generated side-document attached to an assistant reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    id: String,
    pub title: String,
    pub artifact_type: ArtifactType,
    pub content: String,
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Artifact {
    pub fn new(
        title: impl Into<String>,
        artifact_type: ArtifactType,
        content: impl Into<String>,
        language: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            artifact_type,
            content: content.into(),
            language,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn with_content(self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            updated_at: Some(Utc::now()),
            ..self
        }
    }

    #[must_use]
    pub fn with_title(self, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            updated_at: Some(Utc::now()),
            ..self
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self.artifact_type {
            ArtifactType::Markdown => ".md",
            ArtifactType::Html => ".html",
            ArtifactType::Mermaid => ".mmd",
            ArtifactType::Json => ".json",
            ArtifactType::Code => code_extension(self.language.as_deref()),
        }
    }

    pub fn display_name(&self) -> String {
        match self.artifact_type {
            ArtifactType::Markdown => "Markdown".into(),
            ArtifactType::Html => "HTML".into(),
            ArtifactType::Mermaid => "Mermaid Diagram".into(),
            ArtifactType::Json => "JSON".into(),
            ArtifactType::Code => match self.language.as_deref() {
                Some(lang) if !lang.is_empty() => {
                    let mut chars = lang.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect(),
                        None => "Code".into(),
                    }
                }
                _ => "Code".into(),
            },
        }
    }

    /// Pull the first sufficiently long fenced block out of a reply.
    pub fn extract_from(reply: &str) -> Option<Self> {
        let mut lines = reply.lines();
        while let Some(line) = lines.next() {
            let Some(info) = line.trim_start().strip_prefix("```") else {
                continue;
            };
            let lang = info.trim();
            let mut body = Vec::new();
            let mut closed = false;
            for inner in lines.by_ref() {
                if inner.trim_start().starts_with("```") {
                    closed = true;
                    break;
                }
                body.push(inner);
            }
            if closed && body.len() >= MIN_ARTIFACT_LINES {
                let (artifact_type, language) = ArtifactType::from_fence(lang);
                let mut artifact = Artifact::new("", artifact_type, body.join("\n"), language);
                artifact.title = format!("{} snippet", artifact.display_name());
                return Some(artifact);
            }
        }
        None
    }
}

fn code_extension(language: Option<&str>) -> &'static str {
    match language.map(str::to_ascii_lowercase).as_deref() {
        Some("rust" | "rs") => ".rs",
        Some("python" | "py") => ".py",
        Some("javascript" | "js") => ".js",
        Some("typescript" | "ts") => ".ts",
        Some("dart") => ".dart",
        Some("go") => ".go",
        Some("java") => ".java",
        Some("kotlin") => ".kt",
        Some("swift") => ".swift",
        Some("c") => ".c",
        Some("cpp" | "c++") => ".cpp",
        Some("css") => ".css",
        Some("sql") => ".sql",
        Some("shell" | "bash" | "sh") => ".sh",
        Some("yaml" | "yml") => ".yaml",
        _ => ".txt",
    }
}

impl Record for Artifact {
    fn write<S: FieldSink>(&self, sink: &mut S) {
        sink.put_str("id", &self.id);
        sink.put_str("title", &self.title);
        sink.put_str("type", self.artifact_type.as_str());
        sink.put_str("content", &self.content);
        sink.put_opt_str("language", self.language.as_deref());
        sink.put_time("createdAt", self.created_at);
        sink.put_opt_time("updatedAt", self.updated_at);
    }

    fn read<S: FieldSource>(source: &mut S) -> Result<Self, CodecError> {
        Ok(Self {
            id: required(source.take_str("id")?, "id")?,
            title: source.take_str("title")?.unwrap_or_default(),
            artifact_type: source
                .take_str("type")?
                .map(|raw| ArtifactType::parse_lossy(&raw))
                .unwrap_or(ArtifactType::Code),
            content: source.take_str("content")?.unwrap_or_default(),
            language: source.take_opt_str("language")?,
            created_at: required(source.take_time("createdAt")?, "createdAt")?,
            updated_at: source.take_opt_time("updatedAt")?,
        })
    }
}
