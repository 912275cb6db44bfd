//! Index client abstraction.
//!
//! The [`IndexClient`] trait is the only view the extraction pipeline and the
//! reconciliation engine have of the document store. It exposes four
//! operation shapes (bulk index, count, paged search, bulk delete) plus
//! batched variants of count and search that backends with a multi-query
//! facility override to save round trips.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{join_path, IndexDocument};

/// Which documents a count or search applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexFilter {
    All,
    /// Documents whose parent directory is exactly this one.
    Directory(String),
    /// The single document for one absolute path.
    Path { directory: String, name: String },
    /// Documents belonging to a spot.
    Spot(String),
}

impl IndexFilter {
    /// Exact-path filter built from an absolute path.
    pub fn path(path: &str) -> Self {
        let (directory, name) = crate::models::split_path(path);
        Self::Path { directory, name }
    }

    pub fn matches(&self, doc: &IndexDocument) -> bool {
        match self {
            IndexFilter::All => true,
            IndexFilter::Directory(dir) => doc.directory() == dir,
            IndexFilter::Path { directory, name } => {
                doc.directory() == directory && doc.name() == name
            }
            IndexFilter::Spot(spot) => doc.spot_name() == Some(spot.as_str()),
        }
    }
}

/// Outcome of one item in a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub id: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn ok(id: impl Into<String>, status: u16) -> Self {
        Self {
            id: id.into(),
            status,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, status: u16, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The fields of an indexed record that reconciliation needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub id: String,
    pub directory: String,
    pub name: String,
}

impl IndexedFile {
    pub fn path(&self) -> String {
        join_path(&self.directory, &self.name)
    }
}

/// One page of search results. `next_cursor` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub hits: Vec<IndexedFile>,
    pub next_cursor: Option<String>,
}

/// Result of a bulk delete, as reported by the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub success_count: usize,
    pub failed_count: usize,
    pub per_item_errors: Vec<BulkItemResult>,
}

impl DeleteSummary {
    /// Fold per-item results into counts.
    pub fn from_items(items: Vec<BulkItemResult>) -> Self {
        let mut summary = Self::default();
        for item in items {
            if item.is_success() {
                summary.success_count += 1;
            } else {
                summary.failed_count += 1;
                summary.per_item_errors.push(item);
            }
        }
        summary
    }
}

/// Abstract document index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`bulk_index`](IndexClient::bulk_index) | Upsert documents by id |
/// | [`count`](IndexClient::count) | Number of documents matching a filter |
/// | [`search`](IndexClient::search) | One page of matching records |
/// | [`delete_bulk`](IndexClient::delete_bulk) | Delete documents by id |
///
/// An `Err` from any method means the index could not be reached or the
/// request as a whole was rejected. Per-item failures inside a bulk call are
/// reported in the returned items instead.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Create the index (or schema) if it does not exist yet.
    async fn create_index(&self) -> Result<()> {
        Ok(())
    }

    async fn bulk_index(&self, docs: &[IndexDocument]) -> Result<Vec<BulkItemResult>>;

    async fn count(&self, filter: &IndexFilter) -> Result<u64>;

    /// Counts for several filters, in order. One round trip where the backend
    /// supports it.
    async fn count_many(&self, filters: &[IndexFilter]) -> Result<Vec<u64>> {
        let mut counts = Vec::with_capacity(filters.len());
        for filter in filters {
            counts.push(self.count(filter).await?);
        }
        Ok(counts)
    }

    async fn search(
        &self,
        filter: &IndexFilter,
        size: usize,
        cursor: Option<&str>,
    ) -> Result<SearchPage>;

    /// First pages for several filters, in order.
    async fn search_many(&self, filters: &[IndexFilter], size: usize) -> Result<Vec<SearchPage>> {
        let mut pages = Vec::with_capacity(filters.len());
        for filter in filters {
            pages.push(self.search(filter, size, None).await?);
        }
        Ok(pages)
    }

    /// Release server-side state held for a cursor. Best effort.
    async fn release_cursor(&self, _cursor: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_bulk(&self, ids: &[String]) -> Result<DeleteSummary>;
}
