//! ESA SAFE `manifest.safe` files (Sentinel products).
//!
//! The footprint is a `gml:coordinates` list of `lat,lon` pairs and the
//! acquisition period is `safe:startTime` / `safe:stopTime`.

use std::path::Path;

use fbs_core::{SpatialEnvelope, TemporalRange};

use super::kml::{element_texts, parse_coordinates};
use super::{FormatContent, FormatError, Level, MetadataExtractor};
use crate::sniff;

const FORMAT: &str = "SAFE manifest";

pub struct SafeManifestReader;

impl MetadataExtractor for SafeManifestReader {
    fn sniff(&self, path: &Path) -> Result<(), FormatError> {
        let head = sniff::read_head(path, sniff::SNIFF_LEN)?;
        if String::from_utf8_lossy(&head).contains("XFDU") {
            Ok(())
        } else {
            Err(FormatError::wrong_format(FORMAT, "no XFDU root element"))
        }
    }

    fn read(&self, path: &Path, level: Level) -> Result<FormatContent, FormatError> {
        if level < Level::Coverage {
            return Ok(FormatContent::default());
        }

        let xml = std::fs::read(path)?;
        let elements = element_texts(&xml, &["coordinates", "startTime", "stopTime"])
            .map_err(|e| FormatError::malformed(FORMAT, e.to_string()))?;
        let text = |wanted: &str| {
            elements
                .iter()
                .find(|(name, _)| name == wanted)
                .map(|(_, text)| text.as_str())
        };

        // Pairs are lat,lon here, the reverse of KML.
        let points: Vec<(f64, f64)> = text("coordinates")
            .map(parse_coordinates)
            .unwrap_or_default()
            .into_iter()
            .map(|(lat, lon)| (lon, lat))
            .collect();
        let incomplete = points.is_empty().then(|| "no footprint coordinates".to_string());

        let temporal = match (text("startTime"), text("stopTime")) {
            (Some(start), Some(stop)) => TemporalRange::parse(start, stop),
            _ => None,
        };

        Ok(FormatContent {
            spatial: SpatialEnvelope::from_points(points),
            temporal,
            incomplete,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xfdu:XFDU xmlns:xfdu="urn:ccsds:schema:xfdu:1" xmlns:safe="http://www.esa.int/safe/sentinel-1.0" xmlns:gml="http://www.opengis.net/gml">
  <metadataSection>
    <metadataObject ID="acquisitionPeriod">
      <metadataWrap><xmlData>
        <safe:acquisitionPeriod>
          <safe:startTime>2016-05-12T06:20:31.123456</safe:startTime>
          <safe:stopTime>2016-05-12T06:20:58.654321</safe:stopTime>
        </safe:acquisitionPeriod>
      </xmlData></metadataWrap>
    </metadataObject>
    <metadataObject ID="measurementFrameSet">
      <metadataWrap><xmlData>
        <safe:frameSet><safe:frame><safe:footPrint>
          <gml:coordinates>52.1,-1.5 52.6,1.9 50.9,2.3 50.4,-1.1</gml:coordinates>
        </safe:footPrint></safe:frame></safe:frameSet>
      </xmlData></metadataWrap>
    </metadataObject>
  </metadataSection>
</xfdu:XFDU>"#;

    #[test]
    fn test_reads_manifest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manifest.safe");
        fs::write(&path, MANIFEST).unwrap();

        assert!(SafeManifestReader.sniff(&path).is_ok());
        let content = SafeManifestReader.read(&path, Level::Coverage).unwrap();
        assert_eq!(
            content.spatial,
            Some(SpatialEnvelope::Envelope([[-1.5, 50.4], [2.3, 52.6]]))
        );
        let temporal = content.temporal.unwrap();
        assert_eq!(temporal.start_time, "2016-05-12T06:20:31");
        assert_eq!(temporal.end_time, "2016-05-12T06:20:58");
        assert!(content.phenomena.is_empty());
    }

    #[test]
    fn test_not_a_manifest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("other.manifest");
        fs::write(&path, "<html></html>").unwrap();
        assert!(matches!(
            SafeManifestReader.sniff(&path),
            Err(FormatError::WrongFormat { .. })
        ));
    }

    #[test]
    fn test_missing_footprint_keeps_period() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manifest.safe");
        let start = MANIFEST.find("<metadataObject ID=\"measurementFrameSet\">").unwrap();
        let end = MANIFEST.find("</metadataSection>").unwrap();
        fs::write(&path, format!("{}{}", &MANIFEST[..start], &MANIFEST[end..])).unwrap();

        let content = SafeManifestReader.read(&path, Level::Coverage).unwrap();
        assert!(content.spatial.is_none());
        assert_eq!(content.incomplete.as_deref(), Some("no footprint coordinates"));
        assert_eq!(content.temporal.unwrap().start_time, "2016-05-12T06:20:31");
    }
}
