//! Error taxonomy shared by every pipeline stage.
//!
//! Ingestion recovers [`RagError::Load`] and [`RagError::UnsupportedFormat`]
//! locally (skip the file, keep the batch). Everything else propagates to the
//! caller of the stage that produced it.

use thiserror::Error;

/// Errors produced by the ingestion and query pipelines.
#[derive(Debug, Error)]
pub enum RagError {
    /// A single document could not be read or parsed.
    #[error("failed to load {path}: {message}")]
    Load {
        /// Path of the offending file.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// The file extension is not one of the supported document types.
    #[error("unsupported file type '{extension}': {path}")]
    UnsupportedFormat {
        /// Path of the skipped file.
        path: String,
        /// Lower-cased extension, empty when the file has none.
        extension: String,
    },

    /// The embedding service failed or returned malformed output.
    #[error("embedding error ({model}): {message}")]
    Embedding {
        /// Embedding model identifier.
        model: String,
        /// What went wrong.
        message: String,
    },

    /// The persisted index is missing, unreadable, or incompatible.
    #[error("index load error ({path}): {message}")]
    IndexLoad {
        /// Index directory.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// The generation service failed before or during streaming.
    #[error("generation error ({model}): {message}")]
    Generation {
        /// Generation model identifier.
        model: String,
        /// What went wrong.
        message: String,
    },

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failure while writing or structuring an index.
    #[error("index error: {0}")]
    Index(String),
}

impl RagError {
    /// Whether ingestion should log this error and continue with the next file.
    pub fn is_skippable(&self) -> bool {
        matches!(self, RagError::Load { .. } | RagError::UnsupportedFormat { .. })
    }
}

/// Convenience result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skippable_variants() {
        let load = RagError::Load {
            path: "a.pdf".into(),
            message: "bad xref".into(),
        };
        let unsupported = RagError::UnsupportedFormat {
            path: "a.docx".into(),
            extension: "docx".into(),
        };
        let embed = RagError::Embedding {
            model: "nomic-embed-text".into(),
            message: "connection refused".into(),
        };
        assert!(load.is_skippable());
        assert!(unsupported.is_skippable());
        assert!(!embed.is_skippable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = RagError::IndexLoad {
            path: "index_store/index".into(),
            message: "not found".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("index_store/index"));
        assert!(msg.contains("not found"));
    }
}
