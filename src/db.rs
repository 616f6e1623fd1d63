use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Open the SQLite file backing a persisted index.
///
/// Writers (`create = true`) get a fresh file; readers open it read-only.
/// Rollback journaling keeps the index a single file once the pool is closed,
/// so the containing directory can be renamed into place.
pub async fn connect(db_path: &Path, create: bool) -> Result<SqlitePool, sqlx::Error> {
    let mut options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(create)
        .read_only(!create);
    if create {
        options = options.journal_mode(SqliteJournalMode::Delete);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(if create { 1 } else { 5 })
        .connect_with(options)
        .await?;

    Ok(pool)
}
