use async_trait::async_trait;
use docqa::index_store::{self, INDEX_FILE};
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::error::{RagError, Result};
use docqa_core::index::memory::InMemoryIndex;
use docqa_core::index::{IndexInfo, VectorIndex};
use docqa_core::models::{Chunk, DocumentMetadata, EmbeddedChunk};
use tempfile::TempDir;

struct NamedEmbedder {
    model: &'static str,
    dims: usize,
}

#[async_trait]
impl EmbeddingProvider for NamedEmbedder {
    fn model_name(&self) -> &str {
        self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; self.dims])
    }
}

fn entry(id: &str, content: &str, page: Option<u32>, vector: Vec<f32>) -> EmbeddedChunk {
    let mut metadata = DocumentMetadata::new("handbook.pdf", "application/pdf");
    metadata.page = page;
    metadata.title = Some("Employee Handbook".into());
    EmbeddedChunk {
        chunk: Chunk {
            id: id.into(),
            chunk_index: 0,
            content: content.into(),
            hash: format!("hash-{}", id),
            metadata,
        },
        vector,
    }
}

fn sample_index(model: &str, entries: Vec<EmbeddedChunk>) -> InMemoryIndex {
    InMemoryIndex::from_entries(
        IndexInfo {
            model: model.into(),
            dims: 3,
        },
        entries,
    )
    .unwrap()
}

#[tokio::test]
async fn test_persist_then_load_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index_store").join("index");
    let index = sample_index(
        "nomic-embed-text",
        vec![
            entry("a", "Vacation requests go through HR.", Some(1), vec![0.1, -0.5, 2.25]),
            entry("b", "Expense reports are due monthly.", Some(2), vec![1.0, 0.0, 0.0]),
            entry("c", "Remote work needs manager approval.", None, vec![0.0, 0.3, 0.7]),
        ],
    );

    index_store::persist(&index, &path).await.unwrap();
    assert!(path.join(INDEX_FILE).is_file());

    let loaded = index_store::load(&path).await.unwrap();
    assert_eq!(loaded.info(), index.info());
    assert_eq!(loaded.entries(), index.entries());

    let manifest = index_store::read_manifest(&path).await.unwrap();
    assert_eq!(manifest.model, "nomic-embed-text");
    assert_eq!(manifest.dims, 3);
    assert_eq!(manifest.chunk_count, 3);
}

#[tokio::test]
async fn test_loaded_index_answers_queries_like_the_original() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index");
    let index = sample_index(
        "m",
        vec![
            entry("x", "first passage text here", None, vec![1.0, 0.0, 0.0]),
            entry("y", "second passage text here", None, vec![1.0, 0.0, 0.0]),
            entry("z", "third passage text here", None, vec![0.0, 1.0, 0.0]),
        ],
    );
    index_store::persist(&index, &path).await.unwrap();
    let loaded = index_store::load(&path).await.unwrap();

    let query = [1.0, 0.0, 0.0];
    let before: Vec<String> = index
        .nearest(&query, 3)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.chunk.id)
        .collect();
    let after: Vec<String> = loaded
        .nearest(&query, 3)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.chunk.id)
        .collect();
    assert_eq!(before, after);
    assert_eq!(after, vec!["x", "y", "z"]);
}

#[tokio::test]
async fn test_missing_index_is_load_error() {
    let tmp = TempDir::new().unwrap();
    let err = index_store::load(&tmp.path().join("nope")).await.unwrap_err();
    assert!(matches!(err, RagError::IndexLoad { .. }));
    assert!(err.to_string().contains("docqa build"));
}

#[tokio::test]
async fn test_garbage_file_is_load_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index");
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join(INDEX_FILE), b"definitely not sqlite").unwrap();

    let err = index_store::load(&path).await.unwrap_err();
    assert!(matches!(err, RagError::IndexLoad { .. }));
}

#[tokio::test]
async fn test_incompatible_embedder_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index");
    let index = sample_index("nomic-embed-text", vec![entry("a", "content of a", None, vec![1.0, 0.0, 0.0])]);
    index_store::persist(&index, &path).await.unwrap();

    let other_model = NamedEmbedder {
        model: "text-embedding-3-small",
        dims: 3,
    };
    let err = index_store::load_compatible(&path, &other_model)
        .await
        .unwrap_err();
    match err {
        RagError::IndexLoad { path: p, message } => {
            assert!(message.contains("incompatible"));
            assert!(p.ends_with("index"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let other_dims = NamedEmbedder {
        model: "nomic-embed-text",
        dims: 768,
    };
    assert!(index_store::load_compatible(&path, &other_dims).await.is_err());

    let same = NamedEmbedder {
        model: "nomic-embed-text",
        dims: 3,
    };
    assert_eq!(
        index_store::load_compatible(&path, &same).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_rebuild_replaces_previous_index_wholesale() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index");

    let first = sample_index(
        "m",
        vec![
            entry("old-1", "old passage one", None, vec![1.0, 0.0, 0.0]),
            entry("old-2", "old passage two", None, vec![0.0, 1.0, 0.0]),
        ],
    );
    index_store::persist(&first, &path).await.unwrap();

    let second = sample_index("m", vec![entry("new-1", "new passage", None, vec![0.0, 0.0, 1.0])]);
    index_store::persist(&second, &path).await.unwrap();

    let loaded = index_store::load(&path).await.unwrap();
    let ids: Vec<&str> = loaded.entries().iter().map(|e| e.chunk.id.as_str()).collect();
    assert_eq!(ids, vec!["new-1"]);

    // Only the index directory itself remains; no staging or swapped-out copies.
    let leftovers: Vec<String> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(leftovers, vec!["index".to_string()]);
}
