//! File lists: walking dataset directories, reading and writing list files,
//! the `datasets.ini` dataset table, and partitioning lists into scan
//! windows for the cluster scheduler.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::pipeline::ScanWindow;

/// Every regular file under `root`, sorted. Dot-files and paths matching
/// `scan.exclude_globs` (relative to `root`) are skipped. Unreadable
/// directories are logged and skipped.
pub fn walk_files(root: &Path, scan: &ScanConfig) -> Result<Vec<String>> {
    if !root.is_dir() {
        bail!("Dataset directory does not exist: {}", root.display());
    }
    let exclude_set = build_globset(&scan.exclude_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(scan.follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }

        match path.to_str() {
            Some(p) => files.push(p.to_string()),
            None => warn!(path = %path.display(), "skipping non UTF-8 path"),
        }
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// One path per line; blank lines are ignored.
pub fn read_file_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file list: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Write one path per line, creating parent directories as needed.
pub fn write_file_list<S: AsRef<str>>(path: &Path, items: &[S]) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let mut content = String::new();
    for item in items {
        content.push_str(item.as_ref());
        content.push('\n');
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(items.len())
}

/// The dataset table: `dataset_id = path` lines. `#` and `;` start
/// comments and `[section]` headers are ignored.
#[derive(Debug, Default, Clone)]
pub struct Datasets {
    entries: Vec<(String, PathBuf)>,
}

impl Datasets {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read datasets file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid datasets file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut entries: Vec<(String, PathBuf)> = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') || line.starts_with('[') {
                continue;
            }
            let Some((id, path)) = line.split_once('=') else {
                bail!("line {}: expected 'dataset_id = path'", lineno + 1);
            };
            let (id, path) = (id.trim(), path.trim());
            if id.is_empty() || path.is_empty() {
                bail!("line {}: empty dataset id or path", lineno + 1);
            }
            entries.retain(|(existing, _)| existing != id);
            entries.push((id.to_string(), PathBuf::from(path)));
        }
        Ok(Self { entries })
    }

    pub fn get(&self, id: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, p)| p.as_path())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(id, p)| (id.as_str(), p.as_path()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `all` selects every dataset; anything else must name one.
    pub fn select(&self, id: &str) -> Result<Vec<(&str, &Path)>> {
        if id == "all" {
            return Ok(self.iter().collect());
        }
        match self.entries.iter().find(|(existing, _)| existing == id) {
            Some((id, path)) => Ok(vec![(id.as_str(), path.as_path())]),
            None => bail!("Unknown dataset: '{}'", id),
        }
    }
}

/// Walk each selected dataset and write its list to `<out_dir>/<id>.txt`.
/// Returns the dataset ids with their file counts.
pub fn make_lists(
    datasets: &Datasets,
    selection: &str,
    out_dir: &Path,
    scan: &ScanConfig,
) -> Result<Vec<(String, usize)>> {
    let mut written = Vec::new();
    for (id, root) in datasets.select(selection)? {
        let files = walk_files(root, scan)?;
        let target = out_dir.join(format!("{}.txt", id));
        write_file_list(&target, &files)?;
        info!(dataset = id, files = files.len(), list = %target.display(), "file list written");
        written.push((id.to_string(), files.len()));
    }
    Ok(written)
}

/// Disjoint windows of at most `size` items covering `len` items.
pub fn plan_windows(len: usize, size: usize) -> Vec<ScanWindow> {
    if size == 0 {
        return Vec::new();
    }
    (0..len)
        .step_by(size)
        .map(|start| ScanWindow {
            start,
            count: size.min(len - start),
        })
        .collect()
}

/// One `fbs scan` command per window of every `.txt` list in `list_dir`.
pub fn plan_commands(
    list_dir: &Path,
    size: usize,
    level: u8,
    config_path: &Path,
) -> Result<Vec<String>> {
    if size == 0 {
        bail!("Window size must be > 0");
    }
    if !(1..=3).contains(&level) {
        bail!("level must be 1, 2 or 3 (got {})", level);
    }
    let mut lists: Vec<PathBuf> = fs::read_dir(list_dir)
        .with_context(|| format!("Failed to read list directory: {}", list_dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().map(|e| e == "txt").unwrap_or(false))
        .collect();
    lists.sort();

    let mut commands = Vec::new();
    for list in lists {
        let len = read_file_list(&list)?.len();
        for window in plan_windows(len, size) {
            commands.push(format!(
                "fbs --config {} scan --file-list {} --level {} --start {} --count {}",
                config_path.display(),
                list.display(),
                level,
                window.start,
                window.count
            ));
        }
    }
    Ok(commands)
}
