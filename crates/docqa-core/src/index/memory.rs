//! In-memory [`VectorIndex`] implementation.
//!
//! Exact nearest-neighbour search: brute-force cosine similarity over all
//! stored vectors. Built once, then shared read-only (typically behind an
//! `Arc`).

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::EmbeddedChunk;

use super::{Candidate, IndexInfo, VectorIndex};

/// In-memory index of embedded chunks, kept in insertion order.
#[derive(Debug, Clone)]
pub struct InMemoryIndex {
    info: IndexInfo,
    entries: Vec<EmbeddedChunk>,
}

impl InMemoryIndex {
    pub fn new(info: IndexInfo) -> Self {
        Self {
            info,
            entries: Vec::new(),
        }
    }

    /// Build an index from already-embedded chunks.
    pub fn from_entries(info: IndexInfo, entries: Vec<EmbeddedChunk>) -> Result<Self> {
        let mut index = Self::new(info);
        for entry in entries {
            index.insert(entry)?;
        }
        Ok(index)
    }

    /// Insert a vector with its chunk payload.
    ///
    /// Rejects vectors whose length differs from the index dimensionality.
    pub fn insert(&mut self, entry: EmbeddedChunk) -> Result<()> {
        if entry.vector.len() != self.info.dims {
            return Err(RagError::Index(format!(
                "chunk {} has {} dimensions, index expects {}",
                entry.chunk.id,
                entry.vector.len(),
                self.info.dims
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[EmbeddedChunk] {
        &self.entries
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn info(&self) -> &IndexInfo {
        &self.info
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    async fn nearest(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Candidate>> {
        if query_vec.len() != self.info.dims {
            return Err(RagError::Index(format!(
                "query vector has {} dimensions, index expects {}",
                query_vec.len(),
                self.info.dims
            )));
        }

        let mut candidates: Vec<Candidate> = self
            .entries
            .iter()
            .map(|e| Candidate {
                chunk: e.chunk.clone(),
                vector: e.vector.clone(),
                score: cosine_similarity(query_vec, &e.vector),
            })
            .collect();

        // Stable sort: equal scores keep insertion order.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}
