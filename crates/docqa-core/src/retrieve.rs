//! Diversity-aware retrieval with Maximal Marginal Relevance.
//!
//! # Algorithm
//!
//! 1. Embed the query with the same provider that built the index.
//! 2. Fetch the `max(fetch_k, k)` nearest candidates by cosine similarity.
//! 3. Greedily select up to `k` candidates, each time taking the one that
//!    maximises `λ × sim(c, q) − (1 − λ) × max_{s ∈ S} sim(c, s)`, where `S`
//!    is the set selected so far (the redundancy term is `0` while `S` is
//!    empty).
//! 4. Equal MMR scores go to the candidate ranked higher by query similarity.
//!
//! `λ = 1` reduces to plain top-k similarity; `λ = 0` maximises diversity
//! once the first (most similar) candidate is in.

use tracing::debug;

use crate::embedding::{check_dims, cosine_similarity, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::index::{Candidate, VectorIndex};
use crate::models::RetrievalResult;

/// Default number of passages returned.
pub const DEFAULT_K: usize = 4;
/// Default candidate pool size.
pub const DEFAULT_FETCH_K: usize = 20;
/// Default relevance/diversity trade-off.
pub const DEFAULT_LAMBDA_MULT: f32 = 0.5;

/// MMR tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MmrParams {
    k: usize,
    fetch_k: usize,
    lambda_mult: f32,
}

impl MmrParams {
    /// Validated parameters: `k ≥ 1`, `fetch_k ≥ k`, `0 ≤ lambda_mult ≤ 1`.
    pub fn new(k: usize, fetch_k: usize, lambda_mult: f32) -> Result<Self> {
        if k == 0 {
            return Err(RagError::Config("retrieval.k must be >= 1".into()));
        }
        if fetch_k < k {
            return Err(RagError::Config(format!(
                "retrieval.fetch_k ({}) must be >= retrieval.k ({})",
                fetch_k, k
            )));
        }
        if !(0.0..=1.0).contains(&lambda_mult) {
            return Err(RagError::Config(format!(
                "retrieval.lambda_mult must be in [0, 1], got {}",
                lambda_mult
            )));
        }
        Ok(Self {
            k,
            fetch_k,
            lambda_mult,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn fetch_k(&self) -> usize {
        self.fetch_k
    }

    pub fn lambda_mult(&self) -> f32 {
        self.lambda_mult
    }
}

impl Default for MmrParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            fetch_k: DEFAULT_FETCH_K,
            lambda_mult: DEFAULT_LAMBDA_MULT,
        }
    }
}

/// Select up to `k` candidates by MMR.
///
/// `candidates` must be ordered by descending query similarity, with
/// [`Candidate::score`] holding that similarity. Returns indices into
/// `candidates` in selection order. Pure and deterministic.
pub fn maximal_marginal_relevance(
    candidates: &[Candidate],
    k: usize,
    lambda_mult: f32,
) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(&candidates[idx].vector, &candidates[s].vector))
                .fold(None, |acc: Option<f32>, sim| {
                    Some(acc.map_or(sim, |m| m.max(sim)))
                })
                .unwrap_or(0.0);

            let score = lambda_mult * candidates[idx].score - (1.0 - lambda_mult) * redundancy;
            // Strict comparison: the earlier (more similar) candidate wins ties.
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    selected
}

/// Retrieve a relevant and diverse passage set for `query`.
///
/// Returns at most `params.k()` chunks; fewer when the index holds fewer.
/// The index is only read.
pub async fn retrieve(
    query: &str,
    index: &dyn VectorIndex,
    embedder: &dyn EmbeddingProvider,
    params: &MmrParams,
) -> Result<RetrievalResult> {
    let query_vec = embedder.embed(query).await?;
    check_dims(embedder, &query_vec)?;

    let fetch = params.fetch_k().max(params.k());
    let candidates = index.nearest(&query_vec, fetch).await?;
    let picked = maximal_marginal_relevance(&candidates, params.k(), params.lambda_mult());

    debug!(
        candidates = candidates.len(),
        selected = picked.len(),
        k = params.k(),
        "mmr selection"
    );

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    let chunks = picked
        .into_iter()
        .filter_map(|i| slots[i].take().map(|c| c.chunk))
        .collect();

    Ok(RetrievalResult { chunks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::memory::InMemoryIndex;
    use crate::index::IndexInfo;
    use crate::models::{Chunk, DocumentMetadata, EmbeddedChunk};
    use async_trait::async_trait;

    struct QueryEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for QueryEmbedder {
        fn model_name(&self) -> &str {
            "test"
        }
        fn dims(&self) -> usize {
            self.0.len()
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn model_name(&self) -> &str {
            "down"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagError::Embedding {
                model: "down".into(),
                message: "connection refused".into(),
            })
        }
    }

    fn embedded(id: &str, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                id: id.into(),
                chunk_index: 0,
                content: format!("passage {}", id),
                hash: String::new(),
                metadata: DocumentMetadata::new("doc.txt", "text/plain"),
            },
            vector,
        }
    }

    /// `exact` and `near_dup` point almost the same way; `other` is off-axis.
    fn sample_index() -> InMemoryIndex {
        InMemoryIndex::from_entries(
            IndexInfo {
                model: "test".into(),
                dims: 2,
            },
            vec![
                embedded("other", vec![0.7, 0.7]),
                embedded("exact", vec![1.0, 0.0]),
                embedded("near_dup", vec![0.99, 0.01]),
                embedded("orthogonal", vec![0.0, 1.0]),
            ],
        )
        .unwrap()
    }

    fn ids(result: &RetrievalResult) -> Vec<&str> {
        result.chunks.iter().map(|c| c.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_lambda_one_is_top_k() {
        let index = sample_index();
        let embedder = QueryEmbedder(vec![1.0, 0.0]);
        let params = MmrParams::new(2, 20, 1.0).unwrap();
        let result = retrieve("q", &index, &embedder, &params).await.unwrap();
        assert_eq!(ids(&result), vec!["exact", "near_dup"]);
    }

    #[tokio::test]
    async fn test_lambda_zero_prefers_diversity() {
        let index = sample_index();
        let embedder = QueryEmbedder(vec![1.0, 0.0]);
        let params = MmrParams::new(2, 20, 0.0).unwrap();
        let result = retrieve("q", &index, &embedder, &params).await.unwrap();
        // First pick is the best match; the second avoids the near duplicate.
        assert_eq!(result.chunks[0].id, "exact");
        assert_ne!(result.chunks[1].id, "near_dup");
    }

    #[test]
    fn test_balanced_lambda_skips_duplicate() {
        let candidate = |vector: Vec<f32>, score: f32| Candidate {
            chunk: embedded("x", vector.clone()).chunk,
            vector,
            score,
        };
        let candidates = vec![
            candidate(vec![1.0, 0.0], 0.9),
            candidate(vec![1.0, 0.0], 0.89),
            candidate(vec![0.0, 1.0], 0.5),
        ];
        assert_eq!(maximal_marginal_relevance(&candidates, 2, 0.5), vec![0, 2]);
        assert_eq!(maximal_marginal_relevance(&candidates, 2, 1.0), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_deterministic() {
        let index = sample_index();
        let embedder = QueryEmbedder(vec![0.6, 0.4]);
        let params = MmrParams::default();
        let first = retrieve("q", &index, &embedder, &params).await.unwrap();
        let second = retrieve("q", &index, &embedder, &params).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fewer_chunks_than_k_returns_all() {
        let index = sample_index();
        let embedder = QueryEmbedder(vec![1.0, 0.0]);
        let params = MmrParams::new(10, 20, 0.5).unwrap();
        let result = retrieve("q", &index, &embedder, &params).await.unwrap();
        assert_eq!(result.len(), 4);
    }

    #[tokio::test]
    async fn test_result_bounded_by_k_and_index_untouched() {
        let index = sample_index();
        let before = index.entries().to_vec();
        let embedder = QueryEmbedder(vec![1.0, 0.0]);
        let params = MmrParams::new(3, 3, 0.5).unwrap();
        let result = retrieve("q", &index, &embedder, &params).await.unwrap();
        assert!(result.len() <= 3);
        assert_eq!(index.entries(), before.as_slice());
    }

    #[tokio::test]
    async fn test_empty_index_yields_empty_result() {
        let index = InMemoryIndex::new(IndexInfo {
            model: "test".into(),
            dims: 2,
        });
        let embedder = QueryEmbedder(vec![1.0, 0.0]);
        let result = retrieve("q", &index, &embedder, &MmrParams::default())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let index = sample_index();
        let err = retrieve("q", &index, &FailingEmbedder, &MmrParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Embedding { .. }));
    }

    #[test]
    fn test_mmr_ties_keep_rank_order() {
        let candidate = |score: f32| Candidate {
            chunk: embedded("x", vec![1.0, 0.0]).chunk,
            vector: vec![1.0, 0.0],
            score,
        };
        let candidates = vec![candidate(0.9), candidate(0.9), candidate(0.9)];
        assert_eq!(maximal_marginal_relevance(&candidates, 2, 1.0), vec![0, 1]);
    }

    #[test]
    fn test_params_validation() {
        assert!(MmrParams::new(0, 20, 0.5).is_err());
        assert!(MmrParams::new(5, 4, 0.5).is_err());
        assert!(MmrParams::new(4, 20, 1.5).is_err());
        assert!(MmrParams::new(4, 20, -0.1).is_err());
        assert!(MmrParams::new(4, 4, 0.0).is_ok());
        let d = MmrParams::default();
        assert_eq!((d.k(), d.fetch_k(), d.lambda_mult()), (4, 20, 0.5));
    }
}
