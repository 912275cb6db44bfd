//! `metadata_tags.json` files: hand-written dataset descriptions dropped into
//! archive directories.
//!
//! ```json
//! {
//!   "phenomena": [{"var_id": "tas", "units": "K"}],
//!   "time": ["1859-01-01T00:00:00", "2016-03-04T23:59:59"],
//!   "geospatial": [-180.0, 90, 180, -90]
//! }
//! ```
//!
//! `geospatial` is west, north, east, south.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use fbs_core::{Phenomenon, SpatialEnvelope, TemporalRange};

use super::{FormatContent, FormatError, Level, MetadataExtractor};

pub const TAGS_FILE_NAME: &str = "metadata_tags.json";

const FORMAT: &str = "metadata tags";

#[derive(Debug, Deserialize)]
struct TagsFile {
    #[serde(default)]
    phenomena: Vec<serde_json::Map<String, Value>>,
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    geospatial: Vec<f64>,
}

pub struct TagsJsonReader;

fn load(path: &Path) -> Result<TagsFile, FormatError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| FormatError::malformed(FORMAT, e.to_string()))
}

impl MetadataExtractor for TagsJsonReader {
    fn sniff(&self, path: &Path) -> Result<(), FormatError> {
        let head = crate::sniff::read_head(path, 64)?;
        match head.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Ok(()),
            _ => Err(FormatError::wrong_format(FORMAT, "not a JSON object")),
        }
    }

    fn read(&self, path: &Path, level: Level) -> Result<FormatContent, FormatError> {
        let tags = load(path)?;

        let phenomena = tags
            .phenomena
            .iter()
            .filter_map(|item| {
                Phenomenon::from_attributes(item.iter().filter_map(|(k, v)| {
                    v.as_str().map(|s| (k.as_str(), s))
                }))
            })
            .collect();

        let mut content = FormatContent {
            phenomena,
            ..Default::default()
        };

        if level == Level::Coverage {
            if let &[west, north, east, south] = tags.geospatial.as_slice() {
                content.spatial = SpatialEnvelope::envelope(west, south, east, north);
            }
            if let [start, end] = &tags.time[..] {
                content.temporal = TemporalRange::parse(start, end);
            }
        }

        Ok(content)
    }
}
