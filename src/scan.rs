//! `fbs scan`: resolve the file list, build the pipeline from config and
//! run it against the configured index.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use crate::classifier::FormatClassifier;
use crate::config::Config;
use crate::extract::Level;
use crate::file_list::{read_file_list, walk_files, Datasets};
use crate::identity::IdentityResolver;
use crate::pipeline::{Pipeline, PipelineOptions, RunSummary, ScanWindow};
use crate::spots::SpotMapping;

/// Where the files of a scan come from.
#[derive(Debug, Clone)]
pub enum ScanSource {
    /// A dataset id from the datasets file; its directory is walked.
    Dataset(String),
    /// A prepared list, one path per line. The dataset id is the file stem.
    FileList(PathBuf),
}

impl ScanSource {
    /// Dataset label used in the summary and the log file name.
    pub fn label(&self) -> String {
        match self {
            ScanSource::Dataset(id) => id.clone(),
            ScanSource::FileList(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }

    fn files(&self, config: &Config) -> Result<Vec<String>> {
        match self {
            ScanSource::FileList(path) => read_file_list(path),
            ScanSource::Dataset(id) => {
                let table = config
                    .scan
                    .datasets_file
                    .as_deref()
                    .context("scan.datasets_file must be set to scan by dataset id")?;
                let datasets = Datasets::load(table)?;
                let root = datasets
                    .get(id)
                    .with_context(|| format!("Unknown dataset: '{}'", id))?;
                walk_files(root, &config.scan)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub source: ScanSource,
    /// Overrides `scan.level`.
    pub level: Option<u8>,
    pub window: Option<ScanWindow>,
    /// Forces content checksums on regardless of `scan.checksum`.
    pub checksum: bool,
}

pub fn load_spots(config: &Config) -> Result<SpotMapping> {
    match &config.scan.spot_file {
        Some(path) => SpotMapping::load(path),
        None => Ok(SpotMapping::empty()),
    }
}

fn resolve_level(config: &Config, requested: Option<u8>) -> Result<Level> {
    let n = requested.unwrap_or(config.scan.level);
    match Level::from_number(n) {
        Some(level) => Ok(level),
        None => bail!("level must be 1, 2 or 3 (got {})", n),
    }
}

pub async fn run_scan(config: &Config, request: ScanRequest) -> Result<RunSummary> {
    // Everything that can be rejected up front is checked before the index
    // is touched.
    let level = resolve_level(config, request.level)?;
    let files = request.source.files(config)?;
    if let Some(window) = request.window {
        window.validate(files.len())?;
    }
    let spots = load_spots(config)?;
    let classifier = FormatClassifier::from_config(&config.handlers)?;
    let identity = IdentityResolver::from_config(&config.identity);

    let index = crate::open_index(config).await?;
    let options = PipelineOptions {
        level,
        calculate_checksum: request.checksum || config.scan.checksum,
        batch_size: config.scan.batch_size,
    };

    let mut pipeline = Pipeline::new(index.as_ref(), &spots, classifier, identity, options);
    let summary = pipeline
        .scan_files(&request.source.label(), &files, request.window)
        .await?;

    println!("{}", summary);
    Ok(summary)
}

/// Parse a `--start`/`--count` pair into a window.
pub fn window_from_args(start: Option<usize>, count: Option<usize>) -> Result<Option<ScanWindow>> {
    match (start, count) {
        (None, None) => Ok(None),
        (Some(start), Some(count)) => Ok(Some(ScanWindow { start, count })),
        _ => bail!("--start and --count must be given together"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_from_list_stem() {
        let source = ScanSource::FileList(PathBuf::from("/lists/faam-core.txt"));
        assert_eq!(source.label(), "faam-core");
        assert_eq!(ScanSource::Dataset("arsf".into()).label(), "arsf");
    }

    #[test]
    fn test_window_args_must_pair() {
        assert_eq!(window_from_args(None, None).unwrap(), None);
        assert_eq!(
            window_from_args(Some(5), Some(10)).unwrap(),
            Some(ScanWindow { start: 5, count: 10 })
        );
        assert!(window_from_args(Some(5), None).is_err());
    }

    #[test]
    fn test_level_override() {
        let config = Config::default();
        assert_eq!(resolve_level(&config, None).unwrap(), Level::Phenomena);
        assert_eq!(resolve_level(&config, Some(3)).unwrap(), Level::Coverage);
        assert!(resolve_level(&config, Some(4)).is_err());
    }

    #[tokio::test]
    async fn test_bad_window_fails_before_opening_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let list = tmp.path().join("ds.txt");
        std::fs::write(&list, "/a\n/b\n").unwrap();
        let mut config = Config::default();
        config.index.path = tmp.path().join("index.sqlite");

        let request = ScanRequest {
            source: ScanSource::FileList(list),
            level: Some(1),
            window: Some(ScanWindow { start: 1, count: 5 }),
            checksum: false,
        };
        assert!(run_scan(&config, request).await.is_err());
        assert!(!config.index.path.exists());
    }
}
