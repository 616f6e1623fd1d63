//! Persisted index: write once, load many.
//!
//! An index directory holds a single SQLite file, `index.sqlite`, with three
//! tables:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `manifest` | format version, embedding model, dims, chunk count, build time |
//! | `chunks` | chunk text and metadata, keyed by insertion position |
//! | `vectors` | little-endian `f32` BLOB per chunk position |
//!
//! [`persist`] writes into a sibling staging directory and renames it over
//! the target only after the database is fully written and closed, so
//! readers see either the previous index or the new one. [`load`] rebuilds
//! an [`InMemoryIndex`] from the file without calling the embedding service.

use chrono::{DateTime, Utc};
use docqa_core::embedding::{blob_to_vec, vec_to_blob, EmbeddingProvider};
use docqa_core::error::{RagError, Result};
use docqa_core::index::memory::InMemoryIndex;
use docqa_core::index::{IndexInfo, VectorIndex};
use docqa_core::models::{Chunk, DocumentMetadata, EmbeddedChunk};
use serde::Serialize;
use sqlx::Row;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::db;
use crate::migrate::{self, FORMAT_VERSION};

/// Name of the database file inside an index directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// Build description stored alongside the vectors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexManifest {
    pub format_version: i64,
    pub model: String,
    pub dims: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

impl IndexManifest {
    pub fn info(&self) -> IndexInfo {
        IndexInfo {
            model: self.model.clone(),
            dims: self.dims,
        }
    }
}

fn write_err(context: &str, e: impl std::fmt::Display) -> RagError {
    RagError::Index(format!("{}: {}", context, e))
}

fn load_err(path: &Path, message: impl Into<String>) -> RagError {
    RagError::IndexLoad {
        path: path.display().to_string(),
        message: message.into(),
    }
}

/// Sibling path `<dir>/<name>.<tag>-<uuid>` used for staging and swapping.
fn sibling(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "index".to_string());
    path.with_file_name(format!("{}.{}-{}", name, tag, uuid::Uuid::new_v4()))
}

/// Write `index` to `path`, replacing any previous index there.
pub async fn persist(index: &InMemoryIndex, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| write_err("creating index parent directory", e))?;
        }
    }

    let staging = sibling(path, "staging");
    std::fs::create_dir_all(&staging).map_err(|e| write_err("creating staging directory", e))?;

    if let Err(e) = write_database(index, &staging.join(INDEX_FILE)).await {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    swap_into_place(&staging, path)?;

    info!(
        path = %path.display(),
        chunks = index.len(),
        model = %index.info().model,
        "index persisted"
    );
    Ok(())
}

async fn write_database(index: &InMemoryIndex, db_path: &Path) -> Result<()> {
    let pool = db::connect(db_path, true)
        .await
        .map_err(|e| write_err("opening index database", e))?;

    let result: Result<()> = async {
        migrate::create_schema(&pool)
            .await
            .map_err(|e| write_err("creating schema", e))?;

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| write_err("starting transaction", e))?;

        let info = index.info();
        sqlx::query(
            "INSERT INTO manifest (id, format_version, model, dims, chunk_count, created_at)
             VALUES (1, ?, ?, ?, ?, ?)",
        )
        .bind(FORMAT_VERSION)
        .bind(&info.model)
        .bind(info.dims as i64)
        .bind(index.len() as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| write_err("writing manifest", e))?;

        for (position, entry) in index.entries().iter().enumerate() {
            let chunk = &entry.chunk;
            let meta = &chunk.metadata;
            sqlx::query(
                "INSERT INTO chunks (position, id, chunk_index, content, hash, source, author, title, page, content_type)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(position as i64)
            .bind(&chunk.id)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.content)
            .bind(&chunk.hash)
            .bind(&meta.source)
            .bind(&meta.author)
            .bind(&meta.title)
            .bind(meta.page.map(i64::from))
            .bind(&meta.content_type)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_err("writing chunk", e))?;

            sqlx::query("INSERT INTO vectors (position, embedding) VALUES (?, ?)")
                .bind(position as i64)
                .bind(vec_to_blob(&entry.vector))
                .execute(&mut *tx)
                .await
                .map_err(|e| write_err("writing vector", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| write_err("committing index", e))?;
        Ok(())
    }
    .await;

    pool.close().await;
    result
}

/// Rename `staging` to `target`, moving an existing target aside first.
fn swap_into_place(staging: &Path, target: &Path) -> Result<()> {
    let previous = if target.exists() {
        let aside = sibling(target, "old");
        std::fs::rename(target, &aside).map_err(|e| {
            let _ = std::fs::remove_dir_all(staging);
            write_err("moving previous index aside", e)
        })?;
        Some(aside)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(staging, target) {
        if let Some(aside) = &previous {
            if let Err(restore) = std::fs::rename(aside, target) {
                warn!(error = %restore, path = %aside.display(), "could not restore previous index");
            }
        }
        let _ = std::fs::remove_dir_all(staging);
        return Err(write_err("renaming staged index into place", e));
    }

    if let Some(aside) = previous {
        if let Err(e) = std::fs::remove_dir_all(&aside) {
            warn!(error = %e, path = %aside.display(), "could not remove previous index");
        } else {
            debug!(path = %aside.display(), "previous index removed");
        }
    }
    Ok(())
}

async fn open_for_read(path: &Path) -> Result<sqlx::SqlitePool> {
    let file = path.join(INDEX_FILE);
    if !file.is_file() {
        return Err(load_err(
            path,
            "index not found; build it first with `docqa build`",
        ));
    }
    db::connect(&file, false)
        .await
        .map_err(|e| load_err(path, format!("cannot open index database: {}", e)))
}

async fn fetch_manifest(pool: &sqlx::SqlitePool, path: &Path) -> Result<IndexManifest> {
    let row = sqlx::query(
        "SELECT format_version, model, dims, chunk_count, created_at FROM manifest WHERE id = 1",
    )
    .fetch_optional(pool)
    .await
    .map_err(|e| load_err(path, format!("unreadable manifest: {}", e)))?
    .ok_or_else(|| load_err(path, "manifest is missing"))?;

    let get_i64 = |col: &str| -> Result<i64> {
        row.try_get::<i64, _>(col)
            .map_err(|e| load_err(path, format!("manifest.{}: {}", col, e)))
    };
    let format_version = get_i64("format_version")?;
    if format_version != FORMAT_VERSION {
        return Err(load_err(
            path,
            format!(
                "unsupported index format version {} (expected {})",
                format_version, FORMAT_VERSION
            ),
        ));
    }
    let dims = get_i64("dims")?;
    let chunk_count = get_i64("chunk_count")?;
    if dims <= 0 || chunk_count < 0 {
        return Err(load_err(path, "manifest has invalid dims or chunk count"));
    }

    let model: String = row
        .try_get("model")
        .map_err(|e| load_err(path, format!("manifest.model: {}", e)))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| load_err(path, format!("manifest.created_at: {}", e)))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| load_err(path, format!("manifest.created_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(IndexManifest {
        format_version,
        model,
        dims: dims as usize,
        chunk_count: chunk_count as usize,
        created_at,
    })
}

/// Read only the manifest of the index at `path`.
pub async fn read_manifest(path: &Path) -> Result<IndexManifest> {
    let pool = open_for_read(path).await?;
    let manifest = fetch_manifest(&pool, path).await;
    pool.close().await;
    manifest
}

/// Load the index at `path` into memory.
///
/// Fails with [`RagError::IndexLoad`] when the index is missing, unreadable,
/// or internally inconsistent. Never falls back to an empty index.
pub async fn load(path: &Path) -> Result<InMemoryIndex> {
    let pool = open_for_read(path).await?;
    let result = load_entries(&pool, path).await;
    pool.close().await;

    let (manifest, entries) = result?;
    let index = InMemoryIndex::from_entries(manifest.info(), entries)
        .map_err(|e| load_err(path, e.to_string()))?;

    info!(
        path = %path.display(),
        chunks = index.len(),
        model = %manifest.model,
        dims = manifest.dims,
        "index loaded"
    );
    Ok(index)
}

async fn load_entries(
    pool: &sqlx::SqlitePool,
    path: &Path,
) -> Result<(IndexManifest, Vec<EmbeddedChunk>)> {
    let manifest = fetch_manifest(pool, path).await?;

    let rows = sqlx::query(
        "SELECT c.position, c.id, c.chunk_index, c.content, c.hash, c.source, c.author,
                c.title, c.page, c.content_type, v.embedding
         FROM chunks c
         JOIN vectors v ON v.position = c.position
         ORDER BY c.position",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| load_err(path, format!("unreadable chunks: {}", e)))?;

    if rows.len() != manifest.chunk_count {
        return Err(load_err(
            path,
            format!(
                "manifest lists {} chunks but {} have vectors",
                manifest.chunk_count,
                rows.len()
            ),
        ));
    }

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let entry = row_to_entry(&row).map_err(|e| load_err(path, format!("bad chunk row: {}", e)))?;
        if entry.vector.len() != manifest.dims {
            return Err(load_err(
                path,
                format!(
                    "chunk {} has {} dimensions, manifest says {}",
                    entry.chunk.id,
                    entry.vector.len(),
                    manifest.dims
                ),
            ));
        }
        entries.push(entry);
    }

    Ok((manifest, entries))
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<EmbeddedChunk, sqlx::Error> {
    let page: Option<i64> = row.try_get("page")?;
    let chunk_index: i64 = row.try_get("chunk_index")?;
    let blob: Vec<u8> = row.try_get("embedding")?;

    Ok(EmbeddedChunk {
        chunk: Chunk {
            id: row.try_get("id")?,
            chunk_index: chunk_index as usize,
            content: row.try_get("content")?,
            hash: row.try_get("hash")?,
            metadata: DocumentMetadata {
                source: row.try_get("source")?,
                author: row.try_get("author")?,
                title: row.try_get("title")?,
                page: page.map(|p| p as u32),
                content_type: row.try_get("content_type")?,
            },
        },
        vector: blob_to_vec(&blob),
    })
}

/// Refuse an index built with a different embedding configuration.
pub fn check_compatible(info: &IndexInfo, embedder: &dyn EmbeddingProvider) -> Result<()> {
    if info.model != embedder.model_name() || info.dims != embedder.dims() {
        return Err(RagError::IndexLoad {
            path: String::new(),
            message: format!(
                "incompatible index: built with {} ({} dims), configured embedder is {} ({} dims); rebuild the index",
                info.model,
                info.dims,
                embedder.model_name(),
                embedder.dims()
            ),
        });
    }
    Ok(())
}

/// Load the index at `path` and verify it matches `embedder`.
pub async fn load_compatible(path: &Path, embedder: &dyn EmbeddingProvider) -> Result<InMemoryIndex> {
    let index = load(path).await?;
    check_compatible(index.info(), embedder).map_err(|e| match e {
        RagError::IndexLoad { message, .. } => load_err(path, message),
        other => other,
    })?;
    Ok(index)
}
