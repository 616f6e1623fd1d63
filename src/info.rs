//! Index overview.
//!
//! Prints what a persisted index contains: the embedding configuration it
//! was built with, its size, and a per-source chunk breakdown. Used by
//! `docqa info` to check a build before serving it.

use anyhow::{Context, Result};
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::index_store::{self, INDEX_FILE};

/// Run the info command: read the manifest and print a summary.
pub async fn run_info(config: &Config) -> Result<()> {
    let manifest = index_store::read_manifest(&config.index.path).await?;
    let db_path = config.index.path.join(INDEX_FILE);
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    println!("docqa index");
    println!("=============");
    println!();
    println!("  Path:        {}", config.index.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Built:       {}", manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Format:      v{}", manifest.format_version);
    println!();
    println!("  Model:       {}", manifest.model);
    println!("  Dimensions:  {}", manifest.dims);
    println!("  Chunks:      {}", manifest.chunk_count);

    let pool = db::connect(&db_path, false)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let rows = sqlx::query(
        r#"
        SELECT source, COUNT(*) AS chunk_count, COUNT(DISTINCT page) AS page_count
        FROM chunks
        GROUP BY source
        ORDER BY chunk_count DESC, source ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;
    pool.close().await;

    if !rows.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<40} {:>8} {:>8}", "SOURCE", "CHUNKS", "PAGES");
        for row in &rows {
            let source: String = row.get("source");
            let chunks: i64 = row.get("chunk_count");
            let pages: i64 = row.get("page_count");
            let pages = if pages > 0 {
                pages.to_string()
            } else {
                "-".to_string()
            };
            println!("  {:<40} {:>8} {:>8}", source, chunks, pages);
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
