use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::extract::ExtractorKind;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    /// Ordered pattern table consulted by the format classifier.
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Elasticsearch,
    #[default]
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Base URL of the Elasticsearch cluster.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_index_name")]
    pub name: String,
    /// SQLite database file for the local backend.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_key_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            url: None,
            name: default_index_name(),
            path: default_db_path(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            api_key_id: None,
            api_key: None,
        }
    }
}

fn default_index_name() -> String {
    "ceda-fbi".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/fbs.sqlite")
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub checksum: bool,
    #[serde(default)]
    pub spot_file: Option<PathBuf>,
    #[serde(default)]
    pub datasets_file: Option<PathBuf>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            batch_size: default_batch_size(),
            checksum: false,
            spot_file: None,
            datasets_file: None,
            follow_symlinks: false,
            exclude_globs: Vec::new(),
        }
    }
}

fn default_level() -> u8 {
    2
}
fn default_batch_size() -> usize {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct HandlerConfig {
    pub pattern: String,
    pub extractor: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryMode {
    #[default]
    #[serde(alias = "getent")]
    Nss,
    None,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    #[serde(default = "default_passwd_file")]
    pub passwd_file: PathBuf,
    #[serde(default = "default_group_file")]
    pub group_file: PathBuf,
    #[serde(default)]
    pub directory: DirectoryMode,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            passwd_file: default_passwd_file(),
            group_file: default_group_file(),
            directory: DirectoryMode::default(),
        }
    }
}

fn default_passwd_file() -> PathBuf {
    PathBuf::from("/etc/passwd")
}
fn default_group_file() -> PathBuf {
    PathBuf::from("/etc/group")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    /// Queries per multi-query round trip.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Configuration used by commands that can run without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.index.name.trim().is_empty() {
        anyhow::bail!("index.name must not be empty");
    }

    if config.index.backend == Backend::Elasticsearch && config.index.url.is_none() {
        anyhow::bail!("index.url must be set when backend is 'elasticsearch'");
    }

    if config.index.api_key.is_some() != config.index.api_key_id.is_some() {
        anyhow::bail!("index.api_key and index.api_key_id must be set together");
    }

    if !(1..=3).contains(&config.scan.level) {
        anyhow::bail!("scan.level must be 1, 2 or 3 (got {})", config.scan.level);
    }

    if config.scan.batch_size == 0 {
        anyhow::bail!("scan.batch_size must be > 0");
    }

    if config.reconcile.batch_size == 0 || config.reconcile.page_size == 0 {
        anyhow::bail!("reconcile.batch_size and reconcile.page_size must be > 0");
    }

    for handler in &config.handlers {
        regex::Regex::new(&handler.pattern)
            .with_context(|| format!("Invalid handler pattern: '{}'", handler.pattern))?;
        handler
            .extractor
            .parse::<ExtractorKind>()
            .with_context(|| format!("Invalid extractor for pattern '{}'", handler.pattern))?;
    }

    Ok(())
}
