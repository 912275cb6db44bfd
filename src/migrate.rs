use anyhow::Result;
use sqlx::SqlitePool;

/// Create the documents table and its lookup indexes. Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // `body` holds the document exactly as it would be sent to the search
    // cluster; the other columns are the keyword fields queried by
    // reconciliation.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            directory TEXT NOT NULL,
            name TEXT NOT NULL,
            spot_name TEXT,
            indexed_at INTEGER NOT NULL,
            body TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_directory ON documents(directory)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_path ON documents(directory, name)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_spot ON documents(spot_name)")
        .execute(pool)
        .await?;

    Ok(())
}
