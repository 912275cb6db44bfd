//! Core data model for scanned files and the documents stored in the index.
//!
//! A [`FileMetadata`] is produced once per scan attempt and never mutated
//! after the pipeline has enriched it. It is merged with the optional
//! phenomena and spatial coverage into an [`IndexDocument`], whose id is the
//! SHA-1 of the absolute path. Re-indexing a path therefore always targets the
//! same document (upsert semantics).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::phenomena::Phenomenon;
use crate::spatial::SpatialEnvelope;
use crate::temporal::TemporalRange;

/// Value of `info.location` for files read from the archive disks.
pub const LOCATION_ON_DISK: &str = "on_disk";

/// `info.type` value for files that have no extension.
pub const NO_EXTENSION: &str = "File without extension.";

/// Whether the format reader managed to read the file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadStatus {
    Successful,
    ReadError,
}

/// Stat-level metadata for one file, plus the temporal range and format
/// label contributed by its format reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub directory: String,
    pub location: String,
    /// Size in bytes.
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Owner name. Holds the numeric uid until the pipeline resolves it.
    pub user: String,
    /// Group name. Holds the numeric gid until the pipeline resolves it.
    pub group: String,
    #[serde(skip)]
    pub uid: u32,
    #[serde(skip)]
    pub gid: u32,
    pub is_link: bool,
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub read_status: ReadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalRange>,
}

impl FileMetadata {
    /// Absolute path reconstructed from `directory` and `name`.
    pub fn path(&self) -> String {
        join_path(&self.directory, &self.name)
    }
}

/// Join a directory and a file name with exactly one separator.
pub fn join_path(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", directory.trim_end_matches('/'), name)
}

/// Split an absolute path into `(directory, name)`.
///
/// `"/a/b.nc"` gives `("/a", "b.nc")`; a file directly under the root gives
/// `("/", name)`.
pub fn split_path(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => (String::new(), path.to_string()),
    }
}

/// Content-addressed document id: hex SHA-1 of the absolute path.
pub fn document_id(path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(path.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Wrapper that keeps the archive's `{"coordinates": {"type": ..}}` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spatial {
    pub coordinates: SpatialEnvelope,
}

/// Everything stored under the document's `info` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    #[serde(flatten)]
    pub file: FileMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phenomena: Option<Vec<Phenomenon>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial: Option<Spatial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_name: Option<String>,
}

/// The unit persisted to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(skip)]
    pub id: String,
    pub info: DocumentInfo,
}

impl IndexDocument {
    pub fn new(
        file: FileMetadata,
        phenomena: Option<Vec<Phenomenon>>,
        spatial: Option<SpatialEnvelope>,
        spot_name: Option<String>,
    ) -> Self {
        let id = document_id(&file.path());
        Self {
            id,
            info: DocumentInfo {
                file,
                phenomena,
                spatial: spatial.map(|coordinates| Spatial { coordinates }),
                spot_name,
            },
        }
    }

    pub fn path(&self) -> String {
        self.info.file.path()
    }

    pub fn directory(&self) -> &str {
        &self.info.file.directory
    }

    pub fn name(&self) -> &str {
        &self.info.file.name
    }

    pub fn spot_name(&self) -> Option<&str> {
        self.info.spot_name.as_deref()
    }
}

#[cfg(test)]
pub(crate) fn sample_file(path: &str) -> FileMetadata {
    let (directory, name) = split_path(path);
    FileMetadata {
        name,
        directory,
        location: LOCATION_ON_DISK.to_string(),
        size: 1024,
        last_modified: DateTime::from_timestamp(1_500_000_000, 0).unwrap(),
        user: "1000".to_string(),
        group: "1000".to_string(),
        uid: 1000,
        gid: 1000,
        is_link: false,
        file_type: ".nc".to_string(),
        checksum: None,
        read_status: ReadStatus::Successful,
        format: None,
        temporal: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_sha1_of_path() {
        assert_eq!(
            document_id("/badc/accacia/data/flight1.nc"),
            "63f0a6668b4c24bd2961e4d10030581599b4db21"
        );
    }

    #[test]
    fn test_same_path_same_id() {
        let a = IndexDocument::new(sample_file("/badc/x/a.nc"), None, None, None);
        let mut changed = sample_file("/badc/x/a.nc");
        changed.size = 99;
        changed.read_status = ReadStatus::ReadError;
        let b = IndexDocument::new(changed, None, None, Some("spot-1".into()));
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_split_and_join_path() {
        assert_eq!(
            split_path("/badc/x/a.nc"),
            ("/badc/x".to_string(), "a.nc".to_string())
        );
        assert_eq!(split_path("/a.nc"), ("/".to_string(), "a.nc".to_string()));
        assert_eq!(join_path("/", "a.nc"), "/a.nc");
        assert_eq!(join_path("/badc/x", "a.nc"), "/badc/x/a.nc");
    }

    #[test]
    fn test_document_serializes_under_info() {
        let doc = IndexDocument::new(
            sample_file("/badc/x/a.nc"),
            None,
            SpatialEnvelope::envelope(-10.0, 50.0, 2.0, 60.0),
            Some("spot-1".into()),
        );
        let value = serde_json::to_value(&doc).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["info"]["name"], "a.nc");
        assert_eq!(value["info"]["directory"], "/badc/x");
        assert_eq!(value["info"]["type"], ".nc");
        assert_eq!(value["info"]["read_status"], "successful");
        assert_eq!(value["info"]["spot_name"], "spot-1");
        assert_eq!(value["info"]["spatial"]["coordinates"]["type"], "envelope");
        assert!(value["info"].get("uid").is_none());
    }
}
