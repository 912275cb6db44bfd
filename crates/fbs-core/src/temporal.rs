//! Temporal coverage of a file.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output format for every timestamp the index sees.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y%m%dT%H%M%S",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d", "%d/%m/%Y"];

/// Range query helper stored alongside the two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub gte: String,
    pub lte: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalRange {
    pub start_time: String,
    pub end_time: String,
    pub time_range: TimeRange,
}

impl TemporalRange {
    /// Build a range, swapping the endpoints if they arrive reversed.
    pub fn new(a: NaiveDateTime, b: NaiveDateTime) -> Self {
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        let start = start.format(TIME_FORMAT).to_string();
        let end = end.format(TIME_FORMAT).to_string();
        Self {
            time_range: TimeRange {
                gte: start.clone(),
                lte: end.clone(),
            },
            start_time: start,
            end_time: end,
        }
    }

    pub fn instant(at: NaiveDateTime) -> Self {
        Self::new(at, at)
    }

    /// Parse two textual timestamps. Either endpoint failing to parse drops
    /// the whole range.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self::new(parse_datetime(start)?, parse_datetime(end)?))
    }
}

/// Parse the timestamp spellings found in archive file headers.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    let stripped = text.trim_end_matches('Z');
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(stripped, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(stripped, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed_endpoints_are_swapped() {
        let range = TemporalRange::parse("2012-06-30", "2012-01-01 12:00:00").unwrap();
        assert_eq!(range.start_time, "2012-01-01T12:00:00");
        assert_eq!(range.end_time, "2012-06-30T00:00:00");
        assert_eq!(range.time_range.gte, range.start_time);
        assert_eq!(range.time_range.lte, range.end_time);
    }

    #[test]
    fn test_parse_datetime_spellings() {
        let expected = NaiveDate::from_ymd_opt(2015, 3, 7)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        for text in [
            "2015-03-07T10:30:00Z",
            "2015-03-07T10:30:00",
            "2015-03-07 10:30:00",
            "2015-03-07T10:30",
            "20150307T103000",
            "2015/03/07 10:30:00",
        ] {
            assert_eq!(parse_datetime(text), Some(expected), "{}", text);
        }
        assert!(parse_datetime("yesterday").is_none());
        assert!(parse_datetime("").is_none());
    }

    #[test]
    fn test_unparseable_endpoint_drops_range() {
        assert!(TemporalRange::parse("2015-01-01", "soon").is_none());
    }
}
