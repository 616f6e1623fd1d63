//! Ingestion pipeline orchestration.
//!
//! Coordinates the full build flow: loader → chunking → embedding →
//! persisted index. Per-file load failures are recorded and skipped; any
//! embedding failure aborts the build before anything is written, so a
//! partially embedded index never replaces a good one.

use anyhow::Result;
use docqa_core::chunk::{chunk_documents, ChunkOptions};
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::error::RagError;
use docqa_core::index::memory::InMemoryIndex;
use docqa_core::index::{IndexInfo, VectorIndex};
use docqa_core::models::{Chunk, EmbeddedChunk};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::index_store;
use crate::loader::{load_documents, LoaderOptions};

/// Outcome of an index build.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents_loaded: usize,
    pub chunks_created: usize,
    /// Files skipped during loading, with the reason.
    pub skipped: Vec<RagError>,
    /// False when there was nothing to index.
    pub index_written: bool,
}

impl IngestReport {
    /// `(documents loaded, chunks created)`.
    pub fn counts(&self) -> (usize, usize) {
        (self.documents_loaded, self.chunks_created)
    }
}

/// Embed every chunk and collect the result into an in-memory index.
///
/// Chunks are sent to the provider `batch_size` at a time. The first
/// embedding error aborts the build.
pub async fn build(
    chunks: Vec<Chunk>,
    embedder: &dyn EmbeddingProvider,
    batch_size: usize,
) -> docqa_core::error::Result<InMemoryIndex> {
    let info = IndexInfo {
        model: embedder.model_name().to_string(),
        dims: embedder.dims(),
    };
    let total = chunks.len();
    let mut index = InMemoryIndex::new(info);

    let mut remaining = chunks.into_iter().peekable();
    while remaining.peek().is_some() {
        let batch: Vec<Chunk> = remaining.by_ref().take(batch_size.max(1)).collect();
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(RagError::Embedding {
                model: embedder.model_name().to_string(),
                message: format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
            });
        }

        for (chunk, vector) in batch.into_iter().zip(vectors) {
            index.insert(EmbeddedChunk { chunk, vector })?;
        }
        debug!(embedded = index.len(), total, "embedding progress");
    }

    info!(chunks = index.len(), model = %embedder.model_name(), "index built");
    Ok(index)
}

/// Load, chunk, embed and persist the configured documents directory.
///
/// An empty document set is not an error: the report carries zero counts,
/// a warning is logged and no index is written.
pub async fn build_index(
    config: &Config,
    embedder: &dyn EmbeddingProvider,
) -> docqa_core::error::Result<IngestReport> {
    let options = ChunkOptions::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
    let loader_options = LoaderOptions {
        recursive: config.docs.recursive,
        exclude_globs: config.docs.exclude_globs.clone(),
    };

    let loaded = load_documents(&config.docs.dir, &loader_options)
        .map_err(|e| RagError::Config(format!("docs.exclude_globs: {}", e)))?;

    let chunks = chunk_documents(&loaded.documents, &options);
    let mut report = IngestReport {
        documents_loaded: loaded.documents.len(),
        chunks_created: chunks.len(),
        skipped: loaded.skipped,
        index_written: false,
    };
    info!(
        documents = report.documents_loaded,
        chunks = report.chunks_created,
        skipped = report.skipped.len(),
        "documents chunked"
    );

    if chunks.is_empty() {
        warn!(
            dir = %config.docs.dir.display(),
            "no document content to index; index not written"
        );
        return Ok(report);
    }

    let index = build(chunks, embedder, config.embedding.batch_size).await?;
    index_store::persist(&index, &config.index.path).await?;
    report.index_written = true;

    Ok(report)
}

/// CLI entry point for `docqa build`: run the build and print a summary.
pub async fn run_build(config: &Config, embedder: &dyn EmbeddingProvider) -> Result<()> {
    let report = build_index(config, embedder).await?;

    println!("build {}", config.docs.dir.display());
    println!("  documents loaded: {}", report.documents_loaded);
    println!("  chunks created: {}", report.chunks_created);
    println!("  skipped: {}", report.skipped.len());
    for reason in &report.skipped {
        println!("    - {}", reason);
    }
    if report.index_written {
        println!("  index: {}", config.index.path.display());
    } else {
        println!("  index: not written (no documents)");
    }
    println!("ok");

    Ok(())
}
