//! # FBS
//!
//! A file-based metadata crawler and search-index builder for a scientific
//! data archive.
//!
//! FBS walks dataset directories, picks a format extractor for every file,
//! pulls out stat metadata, phenomena and spatial/temporal coverage, and
//! bulk-loads one document per file into a search index. Document ids are
//! the SHA-1 of the absolute path, so re-scanning is always an upsert. A
//! reconciliation pass compares the index with the disk to find files that
//! were never indexed and documents whose files are gone.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌───────────┐   ┌──────────────┐
//! │ File lists │──▶│ Classifier │──▶│ Extractors│──▶│   Pipeline    │
//! │ datasets   │   │ pattern/ext│   │ per format│   │ enrich+batch │
//! └────────────┘   └────────────┘   └───────────┘   └──────┬───────┘
//!                                                          ▼
//!                  ┌────────────┐                  ┌──────────────┐
//!                  │ Reconciler │─────────────────▶│ IndexClient  │
//!                  │ missing/del│                  │ ES or SQLite │
//!                  └────────────┘                  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber and per-run log files |
//! | [`file_list`] | Directory walking, list files, datasets, scan windows |
//! | [`classifier`] | Choosing an extractor for a path |
//! | [`extract`] | Extractor family and the shared metadata driver |
//! | [`sniff`] | Magic-byte format detection |
//! | [`identity`] | uid/gid to name resolution |
//! | [`spots`] | Spot name to archive path mapping |
//! | [`pipeline`] | Extraction pipeline |
//! | [`scan`] | `fbs scan` orchestration |
//! | [`reconcile`] | Missing and deleted file detection |
//! | [`elasticsearch`] | HTTP index backend |
//! | [`sqlite_index`] | Local index backend |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | SQLite schema |
//! | [`stats`] | Index statistics |

pub mod classifier;
pub mod config;
pub mod db;
pub mod elasticsearch;
pub mod extract;
pub mod file_list;
pub mod identity;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod reconcile;
pub mod scan;
pub mod sniff;
pub mod spots;
pub mod sqlite_index;
pub mod stats;

use anyhow::Result;
use fbs_core::index::IndexClient;

use crate::config::{Backend, Config};

/// Open the index backend selected by `[index].backend`.
pub async fn open_index(config: &Config) -> Result<Box<dyn IndexClient>> {
    match config.index.backend {
        Backend::Elasticsearch => Ok(Box::new(elasticsearch::ElasticsearchIndex::new(
            &config.index,
        )?)),
        Backend::Sqlite => Ok(Box::new(
            sqlite_index::SqliteIndex::open(&config.index.path).await?,
        )),
    }
}
