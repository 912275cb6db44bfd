//! In-memory [`IndexClient`] implementation for tests and dry runs.
//!
//! Documents live in a `BTreeMap` keyed by id behind `std::sync::RwLock`, so
//! search order is stable and cursors are plain offsets.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::IndexDocument;

use super::{BulkItemResult, DeleteSummary, IndexClient, IndexFilter, IndexedFile, SearchPage};

/// In-memory index.
pub struct InMemoryIndex {
    docs: RwLock<BTreeMap<String, IndexDocument>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<IndexDocument> {
        self.docs.read().ok()?.get(id).cloned()
    }

    /// Insert a document under an arbitrary id, bypassing content addressing.
    /// Useful for simulating a corrupted index.
    pub fn insert_raw(&self, id: &str, mut doc: IndexDocument) {
        doc.id = id.to_string();
        if let Ok(mut docs) = self.docs.write() {
            docs.insert(id.to_string(), doc);
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl IndexClient for InMemoryIndex {
    async fn bulk_index(&self, docs: &[IndexDocument]) -> Result<Vec<BulkItemResult>> {
        let mut store = self.docs.write().map_err(poisoned)?;
        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            let status = if store.insert(doc.id.clone(), doc.clone()).is_some() {
                200
            } else {
                201
            };
            items.push(BulkItemResult::ok(doc.id.clone(), status));
        }
        Ok(items)
    }

    async fn count(&self, filter: &IndexFilter) -> Result<u64> {
        let store = self.docs.read().map_err(poisoned)?;
        Ok(store.values().filter(|doc| filter.matches(doc)).count() as u64)
    }

    async fn search(
        &self,
        filter: &IndexFilter,
        size: usize,
        cursor: Option<&str>,
    ) -> Result<SearchPage> {
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| anyhow!("invalid cursor: {}", c))?,
            None => 0,
        };
        let store = self.docs.read().map_err(poisoned)?;
        let mut matching = store
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .skip(offset);
        let hits: Vec<IndexedFile> = matching
            .by_ref()
            .take(size)
            .map(|(id, doc)| IndexedFile {
                id: id.clone(),
                directory: doc.directory().to_string(),
                name: doc.name().to_string(),
            })
            .collect();
        let next_cursor = if matching.next().is_some() {
            Some((offset + hits.len()).to_string())
        } else {
            None
        };
        Ok(SearchPage { hits, next_cursor })
    }

    async fn delete_bulk(&self, ids: &[String]) -> Result<DeleteSummary> {
        let mut store = self.docs.write().map_err(poisoned)?;
        let items = ids
            .iter()
            .map(|id| match store.remove(id) {
                Some(_) => BulkItemResult::ok(id.clone(), 200),
                None => BulkItemResult::failed(id.clone(), 404, "not_found"),
            })
            .collect();
        Ok(DeleteSummary::from_items(items))
    }
}
