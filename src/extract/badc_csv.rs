//! BADC-CSV files.
//!
//! The header is a run of `attribute,context,value[,extra]` rows ending at a
//! row whose first field is `data`. Context `G` marks a global attribute; any
//! other context is the column (variable) the attribute belongs to.

use std::collections::HashMap;
use std::path::Path;

use fbs_core::temporal::parse_datetime;
use fbs_core::{Phenomenon, SpatialEnvelope, TemporalRange};

use super::{FormatContent, FormatError, Level, MetadataExtractor};

/// Token that distinguishes BADC-CSV from plain CSV.
pub const CONVENTION_TOKEN: &str = "Conventions,G,BADC-CSV";

/// How much of a `.csv` file is searched for [`CONVENTION_TOKEN`].
pub const PEEK_LEN: usize = 500;

const FORMAT: &str = "BADC-CSV";

/// Whether the start of a file carries the BADC-CSV convention token.
pub fn has_convention_token(path: &Path) -> std::io::Result<bool> {
    let head = crate::sniff::read_head(path, PEEK_LEN)?;
    Ok(String::from_utf8_lossy(&head).contains(CONVENTION_TOKEN))
}

/// Split one CSV record, honouring double-quoted fields.
pub fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn ascii_only(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.chars() {
        if c.is_ascii() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push(' ');
            in_run = true;
        }
    }
    out
}

#[derive(Debug, Default)]
struct Header {
    /// Column name and its attribute pairs, in order of first appearance.
    variables: Vec<(String, Vec<(String, String)>)>,
    dates: Vec<String>,
    location: Option<Vec<String>>,
}

fn parse_header(text: &str) -> Header {
    let mut header = Header::default();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for line in text.lines() {
        let row = split_record(line.trim_end_matches('\r'));
        let Some(first) = row.first() else { continue };
        if first.trim() == "data" {
            break;
        }
        if row.len() < 3 {
            continue;
        }
        let attribute = row[0].trim();
        let context = row[1].trim();
        if context == "G" {
            match attribute {
                "date_valid" => header.dates.push(row[2].trim().to_string()),
                "location" => {
                    header.location = Some(row[2..].iter().map(|f| f.trim().to_string()).collect())
                }
                _ => {}
            }
            continue;
        }

        let idx = *positions.entry(context.to_string()).or_insert_with(|| {
            header.variables.push((context.to_string(), Vec::new()));
            header.variables.len() - 1
        });
        let attrs = &mut header.variables[idx].1;
        attrs.push((attribute.to_string(), ascii_only(&row[2])));
        // long_name rows carry the units in the fourth field.
        if attribute == "long_name" {
            if let Some(units) = row.get(3).filter(|u| !u.trim().is_empty()) {
                attrs.push(("units".to_string(), ascii_only(units)));
            }
        }
    }
    header
}

fn location_envelope(fields: &[String]) -> Option<SpatialEnvelope> {
    if fields.first().map(|f| f.eq_ignore_ascii_case("global")) == Some(true) {
        return Some(SpatialEnvelope::global());
    }
    let numbers: Vec<f64> = fields
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| f.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match *numbers.as_slice() {
        [lat, lon] => SpatialEnvelope::point(lon, lat),
        [lat1, lon1, lat2, lon2] => SpatialEnvelope::from_points([(lon1, lat1), (lon2, lat2)]),
        _ => None,
    }
}

pub struct BadcCsvReader;

impl MetadataExtractor for BadcCsvReader {
    fn sniff(&self, path: &Path) -> Result<(), FormatError> {
        if has_convention_token(path)? {
            Ok(())
        } else {
            Err(FormatError::wrong_format(FORMAT, "missing convention token"))
        }
    }

    fn read(&self, path: &Path, level: Level) -> Result<FormatContent, FormatError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        let header = parse_header(&text);

        let phenomena = header
            .variables
            .into_iter()
            .filter_map(|(_, attrs)| Phenomenon::from_attributes(attrs))
            .collect();

        let mut content = FormatContent {
            phenomena,
            ..Default::default()
        };

        if level == Level::Coverage {
            let mut dates: Vec<_> = header.dates.iter().filter_map(|d| parse_datetime(d)).collect();
            dates.sort();
            if let (Some(first), Some(last)) = (dates.first(), dates.last()) {
                content.temporal = Some(TemporalRange::new(*first, *last));
            }
            content.spatial = header.location.as_deref().and_then(location_envelope);
        }

        Ok(content)
    }
}
