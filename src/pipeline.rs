//! Extraction pipeline: classify, extract, enrich, batch and index a file
//! list (or one window of it).
//!
//! Per-file failures are counted, never thrown. A run only aborts on a bad
//! window (checked before any I/O) or when a bulk request as a whole fails.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use fbs_core::index::IndexClient;
use fbs_core::IndexDocument;

use crate::classifier::FormatClassifier;
use crate::extract::{ExtractedMetadata, Extractor, Level};
use crate::identity::IdentityResolver;
use crate::spots::SpotMapping;

/// Documents per bulk request unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 800;

/// A contiguous `(start, count)` slice of a file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub start: usize,
    pub count: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("window start {start} is beyond the end of a {len}-item list")]
    StartOutOfRange { start: usize, len: usize },

    #[error("window {start}+{count} exceeds list length {len}")]
    CountOutOfRange { start: usize, count: usize, len: usize },
}

impl ScanWindow {
    pub fn validate(&self, len: usize) -> Result<(), WindowError> {
        if self.start > len {
            return Err(WindowError::StartOutOfRange {
                start: self.start,
                len,
            });
        }
        match self.start.checked_add(self.count) {
            Some(end) if end <= len => Ok(()),
            _ => Err(WindowError::CountOutOfRange {
                start: self.start,
                count: self.count,
                len,
            }),
        }
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> Result<&'a [T], WindowError> {
        self.validate(items.len())?;
        Ok(&items[self.start..self.start + self.count])
    }
}

impl fmt::Display for ScanWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.start, self.count)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("index request failed: {0:#}")]
    Index(anyhow::Error),
}

/// The per-run outcome record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub dataset: String,
    pub indexed: usize,
    pub database_errors: usize,
    pub properties_errors: usize,
    pub total: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Dataset: {} Indexed: {} Database errors: {} Properties errors: {} Total: {}",
            self.dataset, self.indexed, self.database_errors, self.properties_errors, self.total
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub level: Level,
    pub calculate_checksum: bool,
    pub batch_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            level: Level::Phenomena,
            calculate_checksum: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// One pipeline instance owns its classifier and identity caches; nothing
/// is shared with other runs.
pub struct Pipeline<'a> {
    index: &'a dyn IndexClient,
    spots: &'a SpotMapping,
    classifier: FormatClassifier,
    identity: IdentityResolver,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        index: &'a dyn IndexClient,
        spots: &'a SpotMapping,
        classifier: FormatClassifier,
        identity: IdentityResolver,
        options: PipelineOptions,
    ) -> Self {
        Self {
            index,
            spots,
            classifier,
            identity,
            options,
        }
    }

    /// Scan `files`, or the `window` of it, and index the results.
    pub async fn scan_files(
        &mut self,
        dataset: &str,
        files: &[String],
        window: Option<ScanWindow>,
    ) -> Result<RunSummary, PipelineError> {
        let files = match window {
            Some(window) => window.slice(files)?,
            None => files,
        };

        let mut summary = RunSummary {
            dataset: dataset.to_string(),
            total: files.len(),
            ..Default::default()
        };
        let batch_size = self.options.batch_size.max(1);
        let mut batch: Vec<IndexDocument> = Vec::with_capacity(batch_size.min(files.len()));

        info!(
            dataset,
            files = files.len(),
            level = self.options.level.number(),
            "scan started"
        );

        for path in files {
            if let Some(doc) = self.process_file(path, &mut summary) {
                batch.push(doc);
            }
            if batch.len() >= batch_size {
                self.flush(&mut batch, &mut summary).await?;
            }
        }
        self.flush(&mut batch, &mut summary).await?;

        info!(
            dataset = %summary.dataset,
            indexed = summary.indexed,
            database_errors = summary.database_errors,
            properties_errors = summary.properties_errors,
            total = summary.total,
            "scan complete"
        );
        Ok(summary)
    }

    fn process_file(&mut self, path: &str, summary: &mut RunSummary) -> Option<IndexDocument> {
        let started = Instant::now();
        let fs_path = Path::new(path);
        let kind = self.classifier.select(fs_path);
        debug!(path, extractor = %kind, "classified");

        let extractor = Extractor::new(
            kind,
            fs_path,
            self.options.level,
            self.options.calculate_checksum,
        );
        match extractor.get_metadata() {
            Ok(metadata) => Some(self.build_document(metadata)),
            Err(e) => {
                summary.properties_errors += 1;
                let (directory, name) = fbs_core::models::split_path(path);
                error!(
                    name = %name,
                    directory = %directory,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %format!("{:#}", e),
                    "properties error"
                );
                None
            }
        }
    }

    fn build_document(&mut self, metadata: ExtractedMetadata) -> IndexDocument {
        let ExtractedMetadata {
            mut file,
            phenomena,
            spatial,
        } = metadata;
        file.user = self.identity.resolve_user(file.uid);
        file.group = self.identity.resolve_group(file.gid);
        let spot = self.spots.spot_for_path(&file.path()).map(str::to_string);
        IndexDocument::new(file, phenomena, spatial, spot)
    }

    async fn flush(
        &self,
        batch: &mut Vec<IndexDocument>,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }
        let items = self
            .index
            .bulk_index(batch)
            .await
            .map_err(PipelineError::Index)?;
        for item in &items {
            if item.is_success() {
                summary.indexed += 1;
            } else {
                summary.database_errors += 1;
                warn!(
                    id = %item.id,
                    status = item.status,
                    reason = item.error.as_deref().unwrap_or("unknown"),
                    "index write rejected"
                );
            }
        }
        debug!(submitted = batch.len(), "bulk request sent");
        batch.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use fbs_core::document_id;
    use fbs_core::index::memory::InMemoryIndex;
    use fbs_core::index::{BulkItemResult, DeleteSummary, IndexFilter, SearchPage};
    use std::collections::HashMap;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::extract::tags_json::TAGS_FILE_NAME;

    /// Records bulk calls and rejects documents whose name contains "reject".
    #[derive(Default)]
    struct RecordingIndex {
        bulk_calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl IndexClient for RecordingIndex {
        async fn bulk_index(&self, docs: &[IndexDocument]) -> Result<Vec<BulkItemResult>> {
            self.bulk_calls.lock().unwrap().push(docs.len());
            Ok(docs
                .iter()
                .map(|d| {
                    if d.name().contains("reject") {
                        BulkItemResult::failed(d.id.clone(), 400, "mapper_parsing_exception")
                    } else {
                        BulkItemResult::ok(d.id.clone(), 201)
                    }
                })
                .collect())
        }

        async fn count(&self, _filter: &IndexFilter) -> Result<u64> {
            Ok(0)
        }

        async fn search(&self, _: &IndexFilter, _: usize, _: Option<&str>) -> Result<SearchPage> {
            Ok(SearchPage::default())
        }

        async fn delete_bulk(&self, _ids: &[String]) -> Result<DeleteSummary> {
            Ok(DeleteSummary::default())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl IndexClient for Unreachable {
        async fn bulk_index(&self, _docs: &[IndexDocument]) -> Result<Vec<BulkItemResult>> {
            anyhow::bail!("connection refused")
        }

        async fn count(&self, _filter: &IndexFilter) -> Result<u64> {
            anyhow::bail!("connection refused")
        }

        async fn search(&self, _: &IndexFilter, _: usize, _: Option<&str>) -> Result<SearchPage> {
            anyhow::bail!("connection refused")
        }

        async fn delete_bulk(&self, _ids: &[String]) -> Result<DeleteSummary> {
            anyhow::bail!("connection refused")
        }
    }

    fn offline_identity() -> IdentityResolver {
        IdentityResolver::new(HashMap::new(), HashMap::new(), None)
    }

    fn write_dataset(dir: &Path) -> Vec<String> {
        let files = [
            (TAGS_FILE_NAME, r#"{"phenomena": [{"var_id": "tas", "units": "K"}]}"#),
            ("flight.na", "14 1001\nnot enough header\n"),
            ("notes", "free text\n"),
        ];
        files
            .iter()
            .map(|(name, content)| {
                let path = dir.join(name);
                fs::write(&path, content).unwrap();
                path.to_string_lossy().into_owned()
            })
            .collect()
    }

    fn numbered(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("/nowhere/{}.nc", i)).collect()
    }

    #[test]
    fn test_window_bounds() {
        let files = numbered(12);
        assert_eq!(
            ScanWindow { start: 5, count: 10 }.slice(&files),
            Err(WindowError::CountOutOfRange {
                start: 5,
                count: 10,
                len: 12
            })
        );
        assert_eq!(ScanWindow { start: 0, count: 12 }.slice(&files).unwrap().len(), 12);
        assert_eq!(ScanWindow { start: 12, count: 0 }.slice(&files).unwrap().len(), 0);
        assert!(matches!(
            ScanWindow { start: 13, count: 0 }.validate(12),
            Err(WindowError::StartOutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_bad_window_aborts_before_io() {
        let index = RecordingIndex::default();
        let spots = SpotMapping::empty();
        let mut pipeline = Pipeline::new(
            &index,
            &spots,
            FormatClassifier::new(),
            offline_identity(),
            PipelineOptions::default(),
        );
        let result = pipeline
            .scan_files("ds", &numbered(12), Some(ScanWindow { start: 5, count: 10 }))
            .await;
        assert!(matches!(result, Err(PipelineError::Window(_))));
        assert!(index.bulk_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_indexes_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let files = write_dataset(tmp.path());
        let index = InMemoryIndex::new();
        let mut spots = SpotMapping::empty();
        spots.insert("spot-test", &tmp.path().to_string_lossy());

        let uid = fs::metadata(&files[0]).unwrap().uid();
        let mut users = HashMap::new();
        users.insert(uid, "archiver".to_string());
        let identity = IdentityResolver::new(users, HashMap::new(), None);

        let mut pipeline = Pipeline::new(
            &index,
            &spots,
            FormatClassifier::new(),
            identity,
            PipelineOptions::default(),
        );
        let summary = pipeline.scan_files("ds", &files, None).await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                dataset: "ds".to_string(),
                indexed: 3,
                database_errors: 0,
                properties_errors: 0,
                total: 3,
            }
        );

        let tags = index.get(&document_id(&files[0])).unwrap();
        assert_eq!(tags.info.file.user, "archiver");
        assert_eq!(tags.spot_name(), Some("spot-test"));
        assert_eq!(tags.info.phenomena.as_ref().unwrap()[0].get("var_id"), Some("tas"));

        // The truncated NASA Ames header degrades rather than failing.
        let ames = index.get(&document_id(&files[1])).unwrap();
        assert_eq!(ames.info.file.read_status, fbs_core::ReadStatus::ReadError);

        pipeline.scan_files("ds", &files, None).await.unwrap();
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_per_file_failures_are_counted() {
        let tmp = TempDir::new().unwrap();
        let mut files = write_dataset(tmp.path());
        let rejected = tmp.path().join("reject.csv");
        fs::write(&rejected, "a,b\n").unwrap();
        files.push(rejected.to_string_lossy().into_owned());
        files.push(tmp.path().join("vanished.nc").to_string_lossy().into_owned());

        let index = RecordingIndex::default();
        let spots = SpotMapping::empty();
        let options = PipelineOptions {
            batch_size: 2,
            ..PipelineOptions::default()
        };
        let mut pipeline = Pipeline::new(
            &index,
            &spots,
            FormatClassifier::new(),
            offline_identity(),
            options,
        );
        let summary = pipeline.scan_files("ds", &files, None).await.unwrap();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.indexed, 3);
        assert_eq!(summary.database_errors, 1);
        assert_eq!(summary.properties_errors, 1);
        assert_eq!(*index.bulk_calls.lock().unwrap(), vec![2, 2]);
    }

    #[tokio::test]
    async fn test_unreachable_index_aborts() {
        let tmp = TempDir::new().unwrap();
        let files = write_dataset(tmp.path());
        let spots = SpotMapping::empty();
        let mut pipeline = Pipeline::new(
            &Unreachable,
            &spots,
            FormatClassifier::new(),
            offline_identity(),
            PipelineOptions::default(),
        );
        let result = pipeline.scan_files("ds", &files, None).await;
        assert!(matches!(result, Err(PipelineError::Index(_))));
    }

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            dataset: "faam".to_string(),
            indexed: 10,
            database_errors: 1,
            properties_errors: 2,
            total: 13,
        };
        assert_eq!(
            summary.to_string(),
            "Dataset: faam Indexed: 10 Database errors: 1 Properties errors: 2 Total: 13"
        );
    }
}
