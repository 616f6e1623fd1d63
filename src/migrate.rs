use sqlx::SqlitePool;

/// Schema version written to the manifest; readers reject other versions.
pub const FORMAT_VERSION: i64 = 1;

/// Create the index tables in a fresh database.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Single-row description of how the index was built
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manifest (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            format_version INTEGER NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks in insertion order; `position` preserves tie-breaking on reload
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            position INTEGER PRIMARY KEY,
            id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            hash TEXT NOT NULL,
            source TEXT NOT NULL,
            author TEXT,
            title TEXT,
            page INTEGER,
            content_type TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            position INTEGER PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (position) REFERENCES chunks(position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
        .execute(pool)
        .await?;

    Ok(())
}
