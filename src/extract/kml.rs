//! KML documents and zipped KMZ archives, as produced for aircraft flight
//! lines and photography footprints.
//!
//! Coverage is the bounding box of every `<coordinates>` tuple in the
//! document and the span of its `<when>`, `<begin>` and `<end>` stamps.

use quick_xml::events::Event;
use std::io::{Cursor, Read};
use std::path::Path;

use fbs_core::temporal::parse_datetime;
use fbs_core::{SpatialEnvelope, TemporalRange};

use super::{FormatContent, FormatError, Level, MetadataExtractor};
use crate::sniff;

const FORMAT: &str = "KML";

/// Maximum decompressed bytes read from a KMZ entry.
const MAX_KML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Text content of every element whose local name is in `wanted`, in
/// document order.
pub(crate) fn element_texts(
    xml: &[u8],
    wanted: &[&str],
) -> Result<Vec<(String, String)>, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut text_buf = Vec::new();
    let mut out = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if wanted.contains(&name.as_str()) {
                    match reader.read_event_into(&mut text_buf)? {
                        Event::Text(te) => out.push((name, te.unescape()?.into_owned())),
                        Event::CData(cd) => {
                            out.push((name, String::from_utf8_lossy(&cd.into_inner()).into_owned()))
                        }
                        _ => {}
                    }
                    text_buf.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// `lon,lat[,alt]` tuples separated by whitespace. Unparseable tuples are
/// skipped.
pub fn parse_coordinates(text: &str) -> Vec<(f64, f64)> {
    text.split_whitespace()
        .filter_map(|tuple| {
            let mut parts = tuple.split(',');
            let lon = parts.next()?.trim().parse::<f64>().ok()?;
            let lat = parts.next()?.trim().parse::<f64>().ok()?;
            Some((lon, lat))
        })
        .collect()
}

fn malformed(reason: impl Into<String>) -> FormatError {
    FormatError::malformed(FORMAT, reason)
}

/// The KML document inside a KMZ archive: the entry named after the
/// archive, else the first `.kml` entry. Entries larger than `limit` bytes
/// once decompressed are rejected.
fn kml_from_kmz(path: &Path, bytes: &[u8], limit: u64) -> Result<Vec<u8>, FormatError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| malformed(e.to_string()))?;
    let preferred = path
        .file_stem()
        .map(|s| format!("{}.kml", s.to_string_lossy()));
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let entry_name = preferred
        .filter(|p| names.contains(p))
        .or_else(|| {
            names
                .iter()
                .find(|n| n.to_ascii_lowercase().ends_with(".kml"))
                .cloned()
        })
        .ok_or_else(|| malformed("archive holds no .kml entry"))?;

    let entry = archive
        .by_name(&entry_name)
        .map_err(|e| malformed(e.to_string()))?;
    let mut out = Vec::new();
    entry.take(limit.saturating_add(1)).read_to_end(&mut out)?;
    if out.len() as u64 > limit {
        return Err(malformed(format!(
            "entry {} exceeds size limit ({} bytes)",
            entry_name, limit
        )));
    }
    Ok(out)
}

pub struct KmlReader;

impl MetadataExtractor for KmlReader {
    fn sniff(&self, path: &Path) -> Result<(), FormatError> {
        let head = sniff::read_head(path, sniff::SNIFF_LEN)?;
        if head.starts_with(sniff::ZIP_MAGIC) || String::from_utf8_lossy(&head).contains("<kml") {
            Ok(())
        } else {
            Err(FormatError::wrong_format(FORMAT, "neither a KMZ archive nor a KML document"))
        }
    }

    /// KML carries no phenomena, so below [`Level::Coverage`] nothing is read.
    fn read(&self, path: &Path, level: Level) -> Result<FormatContent, FormatError> {
        if level < Level::Coverage {
            return Ok(FormatContent::default());
        }

        let bytes = std::fs::read(path)?;
        let xml = if bytes.starts_with(sniff::ZIP_MAGIC) {
            kml_from_kmz(path, &bytes, MAX_KML_ENTRY_BYTES)?
        } else {
            bytes
        };

        let elements = element_texts(&xml, &["coordinates", "when", "begin", "end"])
            .map_err(|e| malformed(e.to_string()))?;

        let mut points = Vec::new();
        let mut times = Vec::new();
        for (name, text) in &elements {
            if name == "coordinates" {
                points.extend(parse_coordinates(text));
            } else if let Some(t) = parse_datetime(text) {
                times.push(t);
            }
        }
        let temporal = match (times.iter().min(), times.iter().max()) {
            (Some(start), Some(end)) => Some(TemporalRange::new(*start, *end)),
            _ => None,
        };

        let incomplete = points.is_empty().then(|| "no coordinates found".to_string());
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
    use crate::extract::{Extractor, ExtractorKind};
    use fbs_core::ReadStatus;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark>
      <TimeSpan><begin>2011-10-12T10:00:00Z</begin><end>2011-10-12T12:30:00Z</end></TimeSpan>
      <LineString>
        <coordinates>
          -0.5,51.2,300 -0.1,51.6,310
          0.3,51.4,305
        </coordinates>
      </LineString>
    </Placemark>
  </Document>
</kml>"#;

    fn check(content: &FormatContent) {
        assert_eq!(
            content.spatial,
            Some(SpatialEnvelope::Envelope([[-0.5, 51.2], [0.3, 51.6]]))
        );
        let temporal = content.temporal.as_ref().unwrap();
        assert_eq!(temporal.start_time, "2011-10-12T10:00:00");
        assert_eq!(temporal.end_time, "2011-10-12T12:30:00");
    }

    #[test]
    fn test_reads_kml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("GB11_05-2011_285.kml");
        fs::write(&path, DOC).unwrap();

        assert!(KmlReader.sniff(&path).is_ok());
        check(&KmlReader.read(&path, Level::Coverage).unwrap());
        assert_eq!(
            KmlReader.read(&path, Level::Phenomena).unwrap(),
            FormatContent::default()
        );
    }

    #[test]
    fn test_reads_kmz() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("flight.kmz");
        let file = fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("flight.kml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(DOC.as_bytes()).unwrap();
        zip.finish().unwrap();

        assert!(KmlReader.sniff(&path).is_ok());
        check(&KmlReader.read(&path, Level::Coverage).unwrap());
    }

    #[test]
    fn test_parse_coordinates_skips_junk() {
        assert_eq!(
            parse_coordinates("1,2 junk 3,4,5"),
            vec![(1.0, 2.0), (3.0, 4.0)]
        );
    }

    #[test]
    fn test_document_without_coordinates_keeps_time() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stamp.kml");
        fs::write(
            &path,
            "<kml><Document><Placemark><TimeStamp><when>2011-10-12T10:00:00Z</when></TimeStamp></Placemark></Document></kml>",
        )
        .unwrap();

        let content = KmlReader.read(&path, Level::Coverage).unwrap();
        assert!(content.spatial.is_none());
        assert!(content.incomplete.is_some());
        let temporal = content.temporal.unwrap();
        assert_eq!(temporal.start_time, "2011-10-12T10:00:00");
        assert_eq!(temporal.end_time, "2011-10-12T10:00:00");

        let meta = Extractor::new(ExtractorKind::Kml, &path, Level::Coverage, false)
            .get_metadata()
            .unwrap();
        assert_eq!(meta.file.read_status, ReadStatus::ReadError);
        assert!(meta.spatial.is_none());
        assert_eq!(
            meta.file.temporal.map(|t| t.start_time).as_deref(),
            Some("2011-10-12T10:00:00")
        );
    }

    #[test]
    fn test_kmz_entry_size_limit() {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("big.kml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(&[b' '; 2048]).unwrap();
        let bytes = zip.finish().unwrap().into_inner();
        let path = Path::new("/archive/big.kmz");

        assert_eq!(kml_from_kmz(path, &bytes, 2048).unwrap().len(), 2048);
        assert!(matches!(
            kml_from_kmz(path, &bytes, 2047),
            Err(FormatError::Malformed { .. })
        ));
    }
}
