//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the capability the retriever needs from an
//! index: "k nearest by vector, with payload". [`memory::InMemoryIndex`] is
//! the exact (brute-force cosine) implementation used by the app; persistence
//! is handled by the app crate, which loads a persisted index back into one.
//!
//! Indexes are built once from a full chunk set and replaced wholesale on
//! rebuild. Nothing in this module mutates an index after construction.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Chunk;

/// Embedding configuration an index was built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Embedding model identifier.
    pub model: String,
    /// Vector dimensionality.
    pub dims: usize,
}

/// A chunk returned from a nearest-neighbour query.
///
/// Carries its vector so MMR can compute candidate-to-candidate similarity
/// without another index round-trip.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Read-only nearest-neighbour capability over embedded chunks.
///
/// Implementations must be `Send + Sync`; queries are async so remote or
/// disk-backed indexes can suspend.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embedding configuration the index was built with.
    fn info(&self) -> &IndexInfo;

    /// Number of embedded chunks.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return up to `limit` candidates ordered by descending similarity.
    ///
    /// Ties keep insertion order so results are deterministic.
    async fn nearest(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Candidate>>;
}
