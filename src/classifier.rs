//! Format classification: which extractor handles a given path.
//!
//! Resolution order, first match wins:
//!
//! 1. reserved basenames (`metadata_tags.json`)
//! 2. the configured pattern table, ascending priority, subject to the
//!    extractor's own sniff accepting the file
//! 3. the extension table
//! 4. content sniffing
//! 5. the extractor last chosen for the same directory
//! 6. the generic stat-only extractor
//!
//! Steps 1 to 4 record their answer in the directory cache consulted by
//! step 5. [`FormatClassifier::select`] never fails.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::HandlerConfig;
use crate::extract::badc_csv::has_convention_token;
use crate::extract::tags_json::TAGS_FILE_NAME;
use crate::extract::ExtractorKind;
use crate::sniff::{self, Signature};

struct Rule {
    pattern: Regex,
    kind: ExtractorKind,
    priority: i32,
}

/// Which step of the resolution order produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Basename,
    Pattern,
    Extension,
    Content,
    Locality,
    Fallback,
}

pub struct FormatClassifier {
    rules: Vec<Rule>,
    /// Parent directory to the extractor last resolved there.
    locality: HashMap<String, ExtractorKind>,
}

impl FormatClassifier {
    /// A classifier with no pattern table.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            locality: HashMap::new(),
        }
    }

    pub fn from_config(handlers: &[HandlerConfig]) -> Result<Self> {
        let mut classifier = Self::new();
        for handler in handlers {
            let pattern = Regex::new(&handler.pattern)
                .with_context(|| format!("Invalid handler pattern: '{}'", handler.pattern))?;
            let kind = handler.extractor.parse::<ExtractorKind>()?;
            classifier.add_rule(pattern, kind, handler.priority);
        }
        Ok(classifier)
    }

    /// Add a pattern-table entry. Entries with equal priority keep their
    /// insertion order.
    pub fn add_rule(&mut self, pattern: Regex, kind: ExtractorKind, priority: i32) {
        self.rules.push(Rule {
            pattern,
            kind,
            priority,
        });
        self.rules.sort_by_key(|r| r.priority);
    }

    pub fn select(&mut self, path: &Path) -> ExtractorKind {
        self.select_with_reason(path).0
    }

    pub fn select_with_reason(&mut self, path: &Path) -> (ExtractorKind, Resolution) {
        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Some((kind, how)) = self.resolve(path) {
            self.locality.insert(dir, kind);
            return (kind, how);
        }
        if let Some(&kind) = self.locality.get(&dir) {
            debug!(path = %path.display(), extractor = %kind, "reusing directory extractor");
            return (kind, Resolution::Locality);
        }
        (ExtractorKind::Generic, Resolution::Fallback)
    }

    fn resolve(&self, path: &Path) -> Option<(ExtractorKind, Resolution)> {
        by_basename(path)
            .map(|k| (k, Resolution::Basename))
            .or_else(|| self.by_pattern(path).map(|k| (k, Resolution::Pattern)))
            .or_else(|| by_extension(path).map(|k| (k, Resolution::Extension)))
            .or_else(|| by_content(path).map(|k| (k, Resolution::Content)))
    }

    fn by_pattern(&self, path: &Path) -> Option<ExtractorKind> {
        let text = path.to_string_lossy();
        for rule in self.rules.iter().filter(|r| r.pattern.is_match(&text)) {
            match rule.kind.sniff(path) {
                Ok(()) => return Some(rule.kind),
                Err(e) => debug!(
                    path = %text,
                    extractor = %rule.kind,
                    priority = rule.priority,
                    error = %e,
                    "pattern matched but extractor rejected file"
                ),
            }
        }
        None
    }
}

impl Default for FormatClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolution {
    pub fn label(self) -> &'static str {
        match self {
            Resolution::Basename => "basename",
            Resolution::Pattern => "pattern",
            Resolution::Extension => "extension",
            Resolution::Content => "content",
            Resolution::Locality => "locality",
            Resolution::Fallback => "fallback",
        }
    }
}

/// `fbs classify`: print the extractor chosen for each path and which
/// resolution step chose it. Paths are classified in order, so the
/// directory cache behaves as it would during a scan.
pub fn run_classify(handlers: &[HandlerConfig], paths: &[PathBuf]) -> Result<()> {
    let mut classifier = FormatClassifier::from_config(handlers)?;
    for path in paths {
        let (kind, how) = classifier.select_with_reason(path);
        println!("{}\t{}\t{}", path.display(), kind, how.label());
    }
    Ok(())
}

fn by_basename(path: &Path) -> Option<ExtractorKind> {
    (path.file_name()? == TAGS_FILE_NAME).then_some(ExtractorKind::MetadataTags)
}

fn by_extension(path: &Path) -> Option<ExtractorKind> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    let kind = match ext.as_str() {
        "nc" => ExtractorKind::NetCdf,
        "na" => ExtractorKind::NasaAmes,
        "pp" => ExtractorKind::Pp,
        "grb" | "grib" | "grib2" => ExtractorKind::Grib,
        "manifest" | "safe" => ExtractorKind::EsaSafe,
        "kmz" | "kml" => ExtractorKind::Kml,
        "hdf" | "h5" | "he5" => ExtractorKind::Hdf,
        "csv" => match has_convention_token(path) {
            Ok(true) => ExtractorKind::BadcCsv,
            _ => ExtractorKind::Csv,
        },
        _ => return None,
    };
    Some(kind)
}

fn by_content(path: &Path) -> Option<ExtractorKind> {
    match sniff::sniff_file(path).ok()? {
        Signature::NetCdf => Some(ExtractorKind::NetCdf),
        Signature::Hdf5 | Signature::Hdf4 => Some(ExtractorKind::Hdf),
        Signature::Pp => Some(ExtractorKind::Pp),
        Signature::Text => {
            let line = sniff::first_line(path).ok()?;
            sniff::has_two_integer_tokens(&line).then_some(ExtractorKind::NasaAmes)
        }
        Signature::Data => {
            let head = sniff::read_head(path, 4).ok()?;
            (head == sniff::GRIB_MAGIC).then_some(ExtractorKind::Grib)
        }
        Signature::Empty => None,
    }
}
