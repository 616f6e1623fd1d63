//! Core data models that flow through the ingestion and query pipeline.
//!
//! ```text
//! Document ──chunk──▶ Chunk ──embed──▶ EmbeddedChunk ──▶ Index
//!                                                          │
//! question ──retrieve──▶ RetrievalResult ──assemble──▶ context ──▶ answer
//! ```

use serde::{Deserialize, Serialize};

/// Metadata attached to a [`Document`] by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// File name the document came from (e.g. `"handbook.pdf"`).
    pub source: String,
    pub author: Option<String>,
    pub title: Option<String>,
    /// 1-based page number for paginated sources (PDF).
    pub page: Option<u32>,
    /// MIME type of the original file.
    pub content_type: String,
}

impl DocumentMetadata {
    /// Metadata with only a source and content type set.
    pub fn new(source: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            author: None,
            title: None,
            page: None,
            content_type: content_type.into(),
        }
    }
}

/// Normalized document text plus its metadata. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(text: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// A bounded passage of a document, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier derived from source, page, index and content.
    pub id: String,
    /// Position of this chunk within its parent document.
    pub chunk_index: usize,
    /// Trimmed passage text. Never empty.
    pub content: String,
    /// SHA-256 of `content`, hex-encoded.
    pub hash: String,
    /// Metadata inherited from the parent document.
    pub metadata: DocumentMetadata,
}

/// A chunk plus its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Ordered passages selected for one query. Scores are not exposed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<Chunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Source descriptors for display, one per chunk in retrieved order.
    pub fn sources(&self) -> Vec<SourceInfo> {
        self.chunks.iter().map(SourceInfo::from).collect()
    }
}

/// Display-oriented description of where a passage came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source: String,
    pub author: Option<String>,
    pub title: Option<String>,
    pub page: Option<u32>,
}

impl From<&Chunk> for SourceInfo {
    fn from(chunk: &Chunk) -> Self {
        Self {
            source: chunk.metadata.source.clone(),
            author: chunk.metadata.author.clone(),
            title: chunk.metadata.title.clone(),
            page: chunk.metadata.page,
        }
    }
}

impl std::fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let page = self
            .page
            .map(|p| p.to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        write!(
            f,
            "{} (title: {}, author: {}, page: {})",
            self.source,
            self.title.as_deref().unwrap_or("Unknown"),
            self.author.as_deref().unwrap_or("Unknown"),
            page
        )
    }
}

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Generation finished normally.
    Completed,
    /// Generation failed; `answer` holds what was streamed before the error.
    Failed,
    /// The caller stopped consuming; `answer` holds what was streamed so far.
    Abandoned,
}

/// One question/answer exchange and the passages that grounded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub context: Vec<Chunk>,
    pub status: TurnStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_info_display_unknowns() {
        let info = SourceInfo {
            source: "notes.txt".into(),
            author: None,
            title: None,
            page: None,
        };
        assert_eq!(
            info.to_string(),
            "notes.txt (title: Unknown, author: Unknown, page: Unknown)"
        );
    }

    #[test]
    fn test_retrieval_result_sources_in_order() {
        let mut meta = DocumentMetadata::new("a.pdf", "application/pdf");
        meta.page = Some(3);
        let chunk = |id: &str, meta: DocumentMetadata| Chunk {
            id: id.into(),
            chunk_index: 0,
            content: "text".into(),
            hash: String::new(),
            metadata: meta,
        };
        let result = RetrievalResult {
            chunks: vec![
                chunk("1", meta.clone()),
                chunk("2", DocumentMetadata::new("b.md", "text/markdown")),
            ],
        };
        let sources = result.sources();
        assert_eq!(sources[0].source, "a.pdf");
        assert_eq!(sources[0].page, Some(3));
        assert_eq!(sources[1].source, "b.md");
    }
}
