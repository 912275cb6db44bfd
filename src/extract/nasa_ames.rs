//! NASA Ames files, file format index 1001 (one independent variable).
//!
//! Header layout (one item per line):
//!
//! ```text
//! NLHEAD FFI
//! ONAME / ORG / SNAME / MNAME
//! IVOL NVOL
//! DATE RDATE          (yyyy mm dd yyyy mm dd)
//! DX
//! XNAME
//! NV
//! VSCAL...
//! VMISS...
//! VNAME x NV
//! ```

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use fbs_core::{Phenomenon, TemporalRange};

use super::{FormatContent, FormatError, Level, MetadataExtractor};
use crate::sniff;

const FORMAT: &str = "NASA Ames";

static NAME_AND_UNITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<name>.*?)\s*\((?P<units>[^()]*)\)\s*$").unwrap());

/// Split `Temperature (K)` into name and units.
pub fn split_name_units(text: &str) -> (String, Option<String>) {
    match NAME_AND_UNITS.captures(text.trim()) {
        Some(caps) => {
            let units = caps["units"].trim();
            (
                caps["name"].trim().to_string(),
                (!units.is_empty()).then(|| units.to_string()),
            )
        }
        None => (text.trim().to_string(), None),
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct AmesHeader {
    pub ffi: u32,
    pub date: Option<NaiveDate>,
    /// Independent variable followed by the dependent variables.
    pub variables: Vec<String>,
}

fn malformed(reason: impl Into<String>) -> FormatError {
    FormatError::malformed(FORMAT, reason)
}

fn parse_ints(line: &str) -> Vec<i64> {
    line.split_whitespace()
        .filter_map(|t| t.parse::<i64>().ok())
        .collect()
}

pub fn parse_header(text: &str) -> Result<AmesHeader, FormatError> {
    let mut lines = text.lines();
    let mut next = |what: &str| {
        lines
            .next()
            .ok_or_else(|| malformed(format!("header ends before {}", what)))
    };

    let first = parse_ints(next("NLHEAD FFI")?);
    let &[_nlhead, ffi] = first.as_slice() else {
        return Err(malformed("first line must be 'NLHEAD FFI'"));
    };
    let ffi = u32::try_from(ffi).map_err(|_| malformed(format!("FFI {} out of range", ffi)))?;
    if ffi != 1001 {
        return Err(malformed(format!("unsupported FFI {}", ffi)));
    }

    for what in ["ONAME", "ORG", "SNAME", "MNAME", "IVOL NVOL"] {
        next(what)?;
    }

    let date_fields = parse_ints(next("DATE")?);
    let date = match date_fields.as_slice() {
        [y, m, d, ..] => match (i32::try_from(*y), u32::try_from(*m), u32::try_from(*d)) {
            (Ok(y), Ok(m), Ok(d)) => NaiveDate::from_ymd_opt(y, m, d),
            _ => None,
        },
        _ => None,
    };

    next("DX")?;
    let xname = next("XNAME")?.trim().to_string();

    let nv = next("NV")?
        .trim()
        .parse::<usize>()
        .map_err(|_| malformed("NV is not an integer"))?;
    next("VSCAL")?;
    next("VMISS")?;

    let mut variables = vec![xname];
    for i in 0..nv {
        variables.push(next(&format!("VNAME {}", i + 1))?.trim().to_string());
    }

    Ok(AmesHeader {
        ffi,
        date,
        variables,
    })
}

pub struct NasaAmesReader;

impl MetadataExtractor for NasaAmesReader {
    fn sniff(&self, path: &Path) -> Result<(), FormatError> {
        let line = sniff::first_line(path)?;
        if sniff::has_two_integer_tokens(&line) {
            Ok(())
        } else {
            Err(FormatError::wrong_format(FORMAT, "first line is not 'NLHEAD FFI'"))
        }
    }

    fn read(&self, path: &Path, level: Level) -> Result<FormatContent, FormatError> {
        let head = sniff::read_head(path, 256 * 1024)?;
        let header = parse_header(&String::from_utf8_lossy(&head))?;

        let phenomena = header
            .variables
            .iter()
            .filter_map(|var| {
                let (name, units) = split_name_units(var);
                let mut attrs = vec![("name".to_string(), name)];
                if let Some(units) = units {
                    attrs.push(("units".to_string(), units));
                }
                Phenomenon::from_attributes(attrs)
            })
            .collect();

        let mut content = FormatContent {
            phenomena,
            ..Default::default()
        };
        if level == Level::Coverage {
            content.temporal = header
                .date
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(TemporalRange::instant);
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) const SAMPLE: &str = "14 1001\n\
Smith, J.\n\
ARSF\n\
AIMMS-20\n\
VOC-05\n\
1 1\n\
2008 11 02 2009 01 15\n\
0.0\n\
Time (seconds since 00:00 UTC)\n\
2\n\
1.0 1.0\n\
-9999 -9999\n\
Static air temperature (K)\n\
Pressure altitude (m)\n\
0\n\
0\n\
0.0 250.1 1200.0\n";

    #[test]
    fn test_parse_header() {
        let header = parse_header(SAMPLE).unwrap();
        assert_eq!(header.ffi, 1001);
        assert_eq!(header.date, NaiveDate::from_ymd_opt(2008, 11, 2));
        assert_eq!(header.variables.len(), 3);
        assert_eq!(header.variables[1], "Static air temperature (K)");
    }

    #[test]
    fn test_split_name_units() {
        assert_eq!(
            split_name_units("Static air temperature (K)"),
            ("Static air temperature".to_string(), Some("K".to_string()))
        );
        assert_eq!(split_name_units("Flag"), ("Flag".to_string(), None));
    }

    #[test]
    fn test_read_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("flight.na");
        fs::write(&path, SAMPLE).unwrap();

        assert!(NasaAmesReader.sniff(&path).is_ok());
        let content = NasaAmesReader.read(&path, Level::Coverage).unwrap();
        assert_eq!(content.phenomena.len(), 3);
        assert_eq!(content.phenomena[1].best_name.as_deref(), Some("Static air temperature"));
        assert_eq!(content.phenomena[1].get("units"), Some("K"));
        assert_eq!(content.temporal.unwrap().start_time, "2008-11-02T00:00:00");
    }

    #[test]
    fn test_other_ffi_is_malformed() {
        assert!(matches!(
            parse_header("20 2010\n"),
            Err(FormatError::Malformed { .. })
        ));
        // 4294968297 wraps to 1001 when truncated to 32 bits.
        assert!(matches!(
            parse_header(&SAMPLE.replacen("14 1001", "14 4294968297", 1)),
            Err(FormatError::Malformed { .. })
        ));
    }
}
