//! Index/filesystem reconciliation for one spot.
//!
//! `find_missing_files` runs a coarse per-directory count check and only
//! escalates inconsistent directories to per-file existence queries.
//! `find_deleted_files` pages through everything indexed for the spot and
//! deletes what is no longer on disk.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use fbs_core::document_id;
use fbs_core::index::{DeleteSummary, IndexClient, IndexFilter};
use fbs_core::models::split_path;

use crate::config::{Config, ReconcileConfig};
use crate::file_list::{walk_files, write_file_list};
use crate::scan::load_spots;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Several documents for one path. Content-addressed ids make this
    /// impossible unless the index was written to by something else.
    #[error("integrity error: {hits} documents indexed for {path}")]
    Integrity { path: String, hits: usize },

    #[error("index request failed: {0:#}")]
    Index(anyhow::Error),
}

/// Result of [`Reconciler::find_deleted_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletedReport {
    pub indexed_count: u64,
    pub on_disk_count: usize,
    /// Indexed paths no longer on disk, sorted.
    pub deleted: Vec<String>,
    /// `None` when nothing was sent to the index.
    pub summary: Option<DeleteSummary>,
}

pub struct Reconciler<'a> {
    index: &'a dyn IndexClient,
    batch_size: usize,
    page_size: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(index: &'a dyn IndexClient, config: &ReconcileConfig) -> Self {
        Self {
            index,
            batch_size: config.batch_size.max(1),
            page_size: config.page_size.max(1),
        }
    }

    /// Files on disk that have no document in the index, sorted.
    pub async fn find_missing_files(&self, files: &[String]) -> Result<Vec<String>, ReconcileError> {
        let mut by_directory: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for path in files {
            let (directory, _) = split_path(path);
            by_directory.entry(directory).or_default().push(path);
        }
        let directories: Vec<(String, Vec<&str>)> = by_directory.into_iter().collect();
        info!(
            files = files.len(),
            directories = directories.len(),
            "checking directory counts"
        );

        let mut missing: Vec<String> = Vec::new();
        let mut suspects: Vec<&str> = Vec::new();

        for chunk in directories.chunks(self.batch_size) {
            let filters: Vec<IndexFilter> = chunk
                .iter()
                .map(|(dir, _)| IndexFilter::Directory(dir.clone()))
                .collect();
            let counts = self
                .index
                .count_many(&filters)
                .await
                .map_err(ReconcileError::Index)?;
            for ((dir, on_disk), indexed) in chunk.iter().zip(counts) {
                if indexed == 0 && !on_disk.is_empty() {
                    missing.extend(on_disk.iter().map(|p| p.to_string()));
                } else if indexed != on_disk.len() as u64 {
                    debug!(directory = %dir, indexed, on_disk = on_disk.len(), "directory escalated");
                    suspects.extend(on_disk.iter().copied());
                }
            }
        }
        info!(
            suspects = suspects.len(),
            missing = missing.len(),
            "directory check complete"
        );

        for chunk in suspects.chunks(self.batch_size) {
            let filters: Vec<IndexFilter> = chunk.iter().map(|p| IndexFilter::path(p)).collect();
            // Two hits are enough to detect a duplicate.
            let pages = self
                .index
                .search_many(&filters, 2)
                .await
                .map_err(ReconcileError::Index)?;
            for (path, page) in chunk.iter().zip(pages) {
                match page.hits.len() {
                    0 => missing.push(path.to_string()),
                    1 => {}
                    hits => {
                        return Err(ReconcileError::Integrity {
                            path: path.to_string(),
                            hits,
                        })
                    }
                }
            }
        }

        missing.sort();
        info!(missing = missing.len(), "existence check complete");
        Ok(missing)
    }

    /// Indexed files of `spot` that are no longer on disk. Unless
    /// `dry_run`, their documents are deleted.
    pub async fn find_deleted_files(
        &self,
        spot: &str,
        files: &[String],
        dry_run: bool,
    ) -> Result<DeletedReport, ReconcileError> {
        let filter = IndexFilter::Spot(spot.to_string());
        let indexed_count = self.index.count(&filter).await.map_err(ReconcileError::Index)?;
        let mut report = DeletedReport {
            indexed_count,
            on_disk_count: files.len(),
            ..Default::default()
        };
        if indexed_count <= files.len() as u64 {
            info!(spot, indexed = indexed_count, on_disk = files.len(), "no stale documents");
            return Ok(report);
        }

        let on_disk: HashSet<&str> = files.iter().map(String::as_str).collect();
        let mut deleted: Vec<String> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = match self
                .index
                .search(&filter, self.page_size, cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    if let Some(c) = &cursor {
                        self.release(c).await;
                    }
                    return Err(ReconcileError::Index(e));
                }
            };
            deleted.extend(
                page.hits
                    .iter()
                    .map(|hit| hit.path())
                    .filter(|path| !on_disk.contains(path.as_str())),
            );
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        deleted.sort();
        deleted.dedup();
        info!(spot, deleted = deleted.len(), "stale documents found");

        if !deleted.is_empty() && !dry_run {
            let ids: Vec<String> = deleted.iter().map(|p| document_id(p)).collect();
            let summary = self
                .index
                .delete_bulk(&ids)
                .await
                .map_err(ReconcileError::Index)?;
            for item in &summary.per_item_errors {
                warn!(
                    id = %item.id,
                    status = item.status,
                    reason = item.error.as_deref().unwrap_or("unknown"),
                    "delete rejected"
                );
            }
            info!(
                success = summary.success_count,
                failed = summary.failed_count,
                "delete complete"
            );
            report.summary = Some(summary);
        }
        report.deleted = deleted;
        Ok(report)
    }

    /// Give up a scroll early. The final page releases its own cursor.
    async fn release(&self, cursor: &str) {
        if let Err(e) = self.index.release_cursor(cursor).await {
            warn!(error = %format!("{:#}", e), "failed to release cursor");
        }
    }
}

/// Default output file for a reconciliation run: `<spot>_missing.txt` or
/// `<spot>_deleted.txt` in `dir`.
pub fn default_output(dir: &Path, spot: &str, deleted: bool) -> PathBuf {
    let suffix = if deleted { "deleted" } else { "missing" };
    dir.join(format!("{}_{}.txt", spot, suffix))
}

#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub spot: String,
    /// Directory to walk. Defaults to the spot's path in the spot mapping.
    pub path: Option<PathBuf>,
    pub deleted: bool,
    /// List stale documents without deleting them.
    pub dry_run: bool,
    pub output: Option<PathBuf>,
}

/// Run one reconciliation and write its path list. Returns the number of
/// paths found. An empty result writes no file.
pub async fn run_reconcile(config: &Config, request: ReconcileRequest) -> Result<usize> {
    let root = match &request.path {
        Some(path) => path.clone(),
        None => {
            let spots = load_spots(config)?;
            match spots.path_for_spot(&request.spot) {
                Some(path) => PathBuf::from(path),
                None => bail!(
                    "no path given and spot '{}' is not in the spot mapping",
                    request.spot
                ),
            }
        }
    };
    let files = walk_files(&root, &config.scan)?;
    let index = crate::open_index(config).await?;
    let reconciler = Reconciler::new(index.as_ref(), &config.reconcile);

    let found = if request.deleted {
        let report = reconciler
            .find_deleted_files(&request.spot, &files, request.dry_run)
            .await?;
        println!(
            "Spot: {} Indexed: {} On disk: {} Deleted: {}",
            request.spot,
            report.indexed_count,
            report.on_disk_count,
            report.deleted.len()
        );
        if let Some(summary) = &report.summary {
            println!(
                "  removed: {} failed: {}",
                summary.success_count, summary.failed_count
            );
        }
        report.deleted
    } else {
        let missing = reconciler.find_missing_files(&files).await?;
        println!(
            "Spot: {} On disk: {} Missing: {}",
            request.spot,
            files.len(),
            missing.len()
        );
        missing
    };

    if !found.is_empty() {
        let output = request
            .output
            .clone()
            .unwrap_or_else(|| default_output(Path::new("."), &request.spot, request.deleted));
        write_file_list(&output, &found)?;
        println!("  written to {}", output.display());
    }
    Ok(found.len())
}
