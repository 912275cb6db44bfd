//! SQLite-backed [`IndexClient`] implementation.
//!
//! A local stand-in for the search cluster: each document is stored as its
//! JSON body next to the keyword columns that counts and searches filter
//! on. Cursors are row offsets over a stable `ORDER BY id`.

use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use fbs_core::index::{
    BulkItemResult, DeleteSummary, IndexClient, IndexFilter, IndexedFile, SearchPage,
};
use fbs_core::IndexDocument;

use crate::{db, migrate};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and ensure the
    /// schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::open_pool(path).await?;
        migrate::ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Stored body of one document.
    pub async fn get(&self, id: &str) -> Result<Option<IndexDocument>> {
        let row = sqlx::query("SELECT body FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.get("body");
                let mut doc: IndexDocument = serde_json::from_str(&body)?;
                doc.id = id.to_string();
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Per-spot document counts, spots without a name last.
    pub async fn spot_counts(&self) -> Result<Vec<(Option<String>, u64)>> {
        let rows = sqlx::query(
            "SELECT spot_name, COUNT(*) AS n FROM documents GROUP BY spot_name ORDER BY spot_name IS NULL, spot_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let n: i64 = row.get("n");
                (row.get("spot_name"), n as u64)
            })
            .collect())
    }
}

/// `WHERE` clause and bind values for a filter.
fn filter_clause(filter: &IndexFilter) -> (&'static str, Vec<&str>) {
    match filter {
        IndexFilter::All => ("", Vec::new()),
        IndexFilter::Directory(dir) => (" WHERE directory = ?", vec![dir.as_str()]),
        IndexFilter::Path { directory, name } => (
            " WHERE directory = ? AND name = ?",
            vec![directory.as_str(), name.as_str()],
        ),
        IndexFilter::Spot(spot) => (" WHERE spot_name = ?", vec![spot.as_str()]),
    }
}

#[async_trait]
impl IndexClient for SqliteIndex {
    async fn create_index(&self) -> Result<()> {
        migrate::ensure_schema(&self.pool).await
    }

    async fn bulk_index(&self, docs: &[IndexDocument]) -> Result<Vec<BulkItemResult>> {
        let now = chrono::Utc::now().timestamp();
        let mut items = Vec::with_capacity(docs.len());
        let mut tx = self.pool.begin().await?;

        for doc in docs {
            let body = match serde_json::to_string(doc) {
                Ok(body) => body,
                Err(e) => {
                    items.push(BulkItemResult::failed(doc.id.clone(), 400, e.to_string()));
                    continue;
                }
            };

            let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
                .bind(&doc.id)
                .fetch_one(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT INTO documents (id, directory, name, spot_name, indexed_at, body)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    directory = excluded.directory,
                    name = excluded.name,
                    spot_name = excluded.spot_name,
                    indexed_at = excluded.indexed_at,
                    body = excluded.body
                "#,
            )
            .bind(&doc.id)
            .bind(doc.directory())
            .bind(doc.name())
            .bind(doc.spot_name())
            .bind(now)
            .bind(&body)
            .execute(&mut *tx)
            .await?;

            items.push(BulkItemResult::ok(
                doc.id.clone(),
                if exists { 200 } else { 201 },
            ));
        }

        tx.commit().await?;
        Ok(items)
    }

    async fn count(&self, filter: &IndexFilter) -> Result<u64> {
        let (clause, binds) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM documents{}", clause);
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let n = query.fetch_one(&self.pool).await?;
        Ok(n as u64)
    }

    async fn search(
        &self,
        filter: &IndexFilter,
        size: usize,
        cursor: Option<&str>,
    ) -> Result<SearchPage> {
        let offset = match cursor {
            Some(c) => c
                .parse::<i64>()
                .map_err(|_| anyhow!("invalid cursor: {}", c))?,
            None => 0,
        };
        let (clause, binds) = filter_clause(filter);
        let sql = format!(
            "SELECT id, directory, name FROM documents{} ORDER BY id LIMIT ? OFFSET ?",
            clause
        );
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(value);
        }
        // One extra row tells whether another page exists.
        let rows = query
            .bind(size as i64 + 1)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let mut hits: Vec<IndexedFile> = rows
            .iter()
            .map(|row| IndexedFile {
                id: row.get("id"),
                directory: row.get("directory"),
                name: row.get("name"),
            })
            .collect();
        let next_cursor = if hits.len() > size {
            hits.truncate(size);
            Some((offset + size as i64).to_string())
        } else {
            None
        };
        Ok(SearchPage { hits, next_cursor })
    }

    async fn delete_bulk(&self, ids: &[String]) -> Result<DeleteSummary> {
        let mut tx = self.pool.begin().await?;
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let result = sqlx::query("DELETE FROM documents WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            items.push(if result.rows_affected() > 0 {
                BulkItemResult::ok(id.clone(), 200)
            } else {
                BulkItemResult::failed(id.clone(), 404, "not_found")
            });
        }
        tx.commit().await?;
        Ok(DeleteSummary::from_items(items))
    }
}
