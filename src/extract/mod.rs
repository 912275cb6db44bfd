//! Metadata extraction.
//!
//! Each supported format has a reader implementing [`MetadataExtractor`]. The
//! set of readers is closed: [`ExtractorKind`] names every one of them and is
//! what the format classifier hands back. [`Extractor`] is the shared driver
//! that stats the file, optionally checksums it, asks the reader for content
//! at the requested level, and degrades to stat-only output when the reader
//! fails.
//!
//! | Kind | Reader |
//! |------|--------|
//! | `generic` | stat only |
//! | `metadata-tags` | [`tags_json`] |
//! | `badc-csv`, `csv` | [`badc_csv`] |
//! | `nasa-ames` | [`nasa_ames`] |
//! | `netcdf` | [`netcdf`] |
//! | `kml` | [`kml`] |
//! | `esa-safe` | [`safe`] |
//! | `grib`, `hdf`, `pp` | [`binary`] |

pub mod badc_csv;
pub mod binary;
pub mod kml;
pub mod nasa_ames;
pub mod netcdf;
pub mod safe;
pub mod tags_json;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

use fbs_core::models::{FileMetadata, ReadStatus, LOCATION_ON_DISK, NO_EXTENSION};
use fbs_core::{Phenomenon, SpatialEnvelope, TemporalRange};

/// Detail level of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Stat metadata only.
    Stat = 1,
    /// Adds phenomena.
    Phenomena = 2,
    /// Adds spatial and temporal coverage.
    Coverage = 3,
}

impl Level {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Level::Stat),
            2 => Some(Level::Phenomena),
            3 => Some(Level::Coverage),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        self as u8
    }
}

/// Reader failure. Never escapes [`Extractor::get_metadata`]; it is turned
/// into `read_status = read-error` there.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The file is not in the reader's format. The classifier treats this as
    /// "try the next candidate".
    #[error("not a {expected} file: {reason}")]
    WrongFormat {
        expected: &'static str,
        reason: String,
    },

    #[error("malformed {format} content: {reason}")]
    Malformed {
        format: &'static str,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FormatError {
    pub fn wrong_format(expected: &'static str, reason: impl Into<String>) -> Self {
        FormatError::WrongFormat {
            expected,
            reason: reason.into(),
        }
    }

    pub fn malformed(format: &'static str, reason: impl Into<String>) -> Self {
        FormatError::Malformed {
            format,
            reason: reason.into(),
        }
    }
}

/// What a reader found inside a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatContent {
    pub phenomena: Vec<Phenomenon>,
    pub spatial: Option<SpatialEnvelope>,
    pub temporal: Option<TemporalRange>,
    /// Overrides the kind's default format label.
    pub format: Option<String>,
    /// Set when the reader gave up part way: what was read is kept, and the
    /// document is still marked `read-error`.
    pub incomplete: Option<String>,
}

/// One format reader.
pub trait MetadataExtractor: Send + Sync {
    /// Cheap check that `path` is in this reader's format. The default
    /// accepts everything.
    fn sniff(&self, _path: &Path) -> Result<(), FormatError> {
        Ok(())
    }

    /// Read phenomena and, at [`Level::Coverage`], spatial/temporal coverage.
    /// Only called for levels above [`Level::Stat`].
    fn read(&self, path: &Path, level: Level) -> Result<FormatContent, FormatError>;
}

/// The closed set of extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractorKind {
    Generic,
    MetadataTags,
    BadcCsv,
    Csv,
    NasaAmes,
    NetCdf,
    Kml,
    EsaSafe,
    Grib,
    Hdf,
    Pp,
}

impl ExtractorKind {
    pub const ALL: [ExtractorKind; 11] = [
        ExtractorKind::Generic,
        ExtractorKind::MetadataTags,
        ExtractorKind::BadcCsv,
        ExtractorKind::Csv,
        ExtractorKind::NasaAmes,
        ExtractorKind::NetCdf,
        ExtractorKind::Kml,
        ExtractorKind::EsaSafe,
        ExtractorKind::Grib,
        ExtractorKind::Hdf,
        ExtractorKind::Pp,
    ];

    pub fn id(self) -> &'static str {
        match self {
            ExtractorKind::Generic => "generic",
            ExtractorKind::MetadataTags => "metadata-tags",
            ExtractorKind::BadcCsv => "badc-csv",
            ExtractorKind::Csv => "csv",
            ExtractorKind::NasaAmes => "nasa-ames",
            ExtractorKind::NetCdf => "netcdf",
            ExtractorKind::Kml => "kml",
            ExtractorKind::EsaSafe => "esa-safe",
            ExtractorKind::Grib => "grib",
            ExtractorKind::Hdf => "hdf",
            ExtractorKind::Pp => "pp",
        }
    }

    /// Value stored in `info.format`. The generic extractor has none.
    pub fn format_label(self) -> Option<&'static str> {
        match self {
            ExtractorKind::Generic => None,
            ExtractorKind::MetadataTags => Some("Metadata tags json"),
            ExtractorKind::BadcCsv => Some("BADC CSV"),
            ExtractorKind::Csv => Some("CSV"),
            ExtractorKind::NasaAmes => Some("NASA Ames"),
            ExtractorKind::NetCdf => Some("NetCDF"),
            ExtractorKind::Kml => Some("KML"),
            ExtractorKind::EsaSafe => Some("Manifest"),
            ExtractorKind::Grib => Some("GRIB"),
            ExtractorKind::Hdf => Some("HDF"),
            ExtractorKind::Pp => Some("PP"),
        }
    }

    /// The reader behind this kind.
    pub fn reader(self) -> &'static dyn MetadataExtractor {
        match self {
            ExtractorKind::Generic | ExtractorKind::Csv => &StatOnly,
            ExtractorKind::MetadataTags => &tags_json::TagsJsonReader,
            ExtractorKind::BadcCsv => &badc_csv::BadcCsvReader,
            ExtractorKind::NasaAmes => &nasa_ames::NasaAmesReader,
            ExtractorKind::NetCdf => &netcdf::NetCdfReader,
            ExtractorKind::Kml => &kml::KmlReader,
            ExtractorKind::EsaSafe => &safe::SafeManifestReader,
            ExtractorKind::Grib => &binary::GRIB,
            ExtractorKind::Hdf => &binary::HDF,
            ExtractorKind::Pp => &binary::PP,
        }
    }

    pub fn sniff(self, path: &Path) -> Result<(), FormatError> {
        self.reader().sniff(path)
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ExtractorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        ExtractorKind::ALL
            .into_iter()
            .find(|kind| kind.id() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = ExtractorKind::ALL.iter().map(|k| k.id()).collect();
                anyhow::anyhow!(
                    "Unknown extractor: '{}'. Must be one of: {}",
                    s,
                    known.join(", ")
                )
            })
    }
}

/// Reader for formats that contribute nothing beyond stat metadata.
struct StatOnly;

impl MetadataExtractor for StatOnly {
    fn read(&self, _path: &Path, _level: Level) -> Result<FormatContent, FormatError> {
        Ok(FormatContent::default())
    }
}

/// Output of one extraction. `phenomena` is only ever set at level 2 and
/// above, `spatial` only at level 3; temporal coverage lives in
/// `file.temporal`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMetadata {
    pub file: FileMetadata,
    pub phenomena: Option<Vec<Phenomenon>>,
    pub spatial: Option<SpatialEnvelope>,
}

/// One extraction job: a kind applied to a path at a level.
pub struct Extractor<'a> {
    kind: ExtractorKind,
    path: &'a Path,
    level: Level,
    calculate_checksum: bool,
}

impl<'a> Extractor<'a> {
    pub fn new(kind: ExtractorKind, path: &'a Path, level: Level, calculate_checksum: bool) -> Self {
        Self {
            kind,
            path,
            level,
            calculate_checksum,
        }
    }

    /// Extract metadata. Reader failures degrade the result to stat-only
    /// output with `read_status = read-error`; only a failed stat (or
    /// checksum read) is returned as an error.
    pub fn get_metadata(&self) -> Result<ExtractedMetadata> {
        let mut file = stat_file(self.path)?;
        file.format = self.kind.format_label().map(str::to_string);

        if self.calculate_checksum {
            file.checksum = Some(sha256_file(self.path)?);
        }

        if self.level == Level::Stat {
            return Ok(ExtractedMetadata {
                file,
                phenomena: None,
                spatial: None,
            });
        }

        match self.kind.reader().read(self.path, self.level) {
            Ok(content) => {
                if let Some(reason) = &content.incomplete {
                    warn!(
                        path = %self.path.display(),
                        extractor = %self.kind,
                        reason = %reason,
                        "partial read"
                    );
                    file.read_status = ReadStatus::ReadError;
                }
                if let Some(format) = content.format {
                    file.format = Some(format);
                }
                let (spatial, temporal) = if self.level == Level::Coverage {
                    (content.spatial, content.temporal)
                } else {
                    (None, None)
                };
                file.temporal = temporal;
                let phenomena = (!content.phenomena.is_empty()).then_some(content.phenomena);
                Ok(ExtractedMetadata {
                    file,
                    phenomena,
                    spatial,
                })
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    extractor = %self.kind,
                    error = %e,
                    "read error, indexing stat metadata only"
                );
                file.read_status = ReadStatus::ReadError;
                Ok(ExtractedMetadata {
                    file,
                    phenomena: None,
                    spatial: None,
                })
            }
        }
    }
}

/// Stat-level metadata for `path`. `user`/`group` hold the numeric ids until
/// the pipeline resolves them.
pub fn stat_file(path: &Path) -> Result<FileMetadata> {
    let link_meta = std::fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let is_link = link_meta.file_type().is_symlink();
    let meta = if is_link {
        std::fs::metadata(path)
            .with_context(|| format!("Failed to follow link {}", path.display()))?
    } else {
        link_meta
    };
    if !meta.is_file() {
        anyhow::bail!("Not a regular file: {}", path.display());
    }

    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Path is not valid UTF-8: {}", path.display()))?;
    let (directory, name) = fbs_core::models::split_path(path_str);

    let last_modified = meta
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::SystemTime::UNIX_EPOCH));

    let file_type = match path.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => NO_EXTENSION.to_string(),
    };

    Ok(FileMetadata {
        name,
        directory,
        location: LOCATION_ON_DISK.to_string(),
        size: meta.len(),
        last_modified,
        user: meta.uid().to_string(),
        group: meta.gid().to_string(),
        uid: meta.uid(),
        gid: meta.gid(),
        is_link,
        file_type,
        checksum: None,
        read_status: ReadStatus::Successful,
        format: None,
        temporal: None,
    })
}

/// Hex SHA-256 of a file's content, streamed.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_extractor_ids_round_trip() {
        for kind in ExtractorKind::ALL {
            assert_eq!(kind.id().parse::<ExtractorKind>().unwrap(), kind);
        }
        assert_eq!("NASA_AMES".parse::<ExtractorKind>().unwrap(), ExtractorKind::NasaAmes);
        assert!("word-doc".parse::<ExtractorKind>().is_err());
    }

    #[test]
    fn test_stat_only_level() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("flight.nc");
        fs::write(&path, b"not really netcdf").unwrap();

        let meta = Extractor::new(ExtractorKind::NetCdf, &path, Level::Stat, false)
            .get_metadata()
            .unwrap();
        assert_eq!(meta.file.name, "flight.nc");
        assert_eq!(meta.file.file_type, ".nc");
        assert_eq!(meta.file.size, 17);
        assert_eq!(meta.file.read_status, ReadStatus::Successful);
        assert_eq!(meta.file.format.as_deref(), Some("NetCDF"));
        assert!(meta.phenomena.is_none());
    }

    #[test]
    fn test_reader_failure_degrades_to_read_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.nc");
        fs::write(&path, b"garbage").unwrap();

        let meta = Extractor::new(ExtractorKind::NetCdf, &path, Level::Coverage, true)
            .get_metadata()
            .unwrap();
        assert_eq!(meta.file.read_status, ReadStatus::ReadError);
        assert!(meta.phenomena.is_none());
        assert!(meta.spatial.is_none());
        assert!(meta.file.checksum.is_some());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gone.nc");
        assert!(Extractor::new(ExtractorKind::Generic, &path, Level::Phenomena, false)
            .get_metadata()
            .is_err());
    }

    #[test]
    fn test_file_without_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("README");
        fs::write(&path, b"hello").unwrap();
        let file = stat_file(&path).unwrap();
        assert_eq!(file.file_type, NO_EXTENSION);
        assert!(!file.is_link);
    }

    #[test]
    fn test_sha256_checksum() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
