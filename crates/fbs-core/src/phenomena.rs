//! Phenomenon normalization.
//!
//! Every format reader hands raw `(name, value)` attribute pairs for each
//! variable to [`Phenomenon::from_attributes`]. One policy is applied to all
//! formats so that the same logical variable produces the same `agg_string`
//! in every file, whatever order its attributes were read in.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Attribute names and values must be shorter than this.
pub const MAX_ATTR_LENGTH: usize = 256;

/// Attribute names a phenomenon may carry at all.
const ACCEPTED_ATTRIBUTES: [&str; 7] = [
    "standard_name",
    "long_name",
    "title",
    "name",
    "short_name",
    "units",
    "var_id",
];

/// Attributes stored as fields of the phenomenon and fed into `agg_string`.
const STORED_ATTRIBUTES: [&str; 4] = ["units", "var_id", "standard_name", "long_name"];

/// Attributes whose values are display names.
const NAME_ATTRIBUTES: [&str; 4] = ["standard_name", "long_name", "title", "name"];

/// Preference order for `best_name`.
const BEST_NAME_ORDER: [&str; 6] = [
    "long_name",
    "standard_name",
    "title",
    "name",
    "short_name",
    "var_id",
];

static DATE_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+-\d+-\d+.*").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"  +").unwrap());

/// A normalized description of one variable found in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phenomenon {
    /// Filtered attributes (`units`, `var_id`, `standard_name`, `long_name`).
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
    /// Sorted, de-duplicated, quoted display names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_name: Option<String>,
    /// Canonical aggregation key.
    pub agg_string: String,
}

/// Whether an attribute pair passes the shared allow-list and value checks.
pub fn is_valid_attribute(name: &str, value: &str) -> bool {
    ACCEPTED_ATTRIBUTES.contains(&name)
        && name.chars().count() < MAX_ATTR_LENGTH
        && value.chars().count() < MAX_ATTR_LENGTH
        && !DATE_LIKE.is_match(value)
}

/// Trim, collapse runs of spaces and drop double quotes.
pub fn clean_value(value: &str) -> String {
    MULTI_SPACE
        .replace_all(value.trim(), " ")
        .replace('"', "")
}

impl Phenomenon {
    /// Build a phenomenon from raw attribute pairs.
    ///
    /// Returns `None` when nothing survives filtering.
    pub fn from_attributes<I, K, V>(attributes: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut pairs: Vec<(String, String)> = attributes
            .into_iter()
            .filter_map(|(k, v)| {
                let name = k.as_ref().trim().to_string();
                let value = clean_value(v.as_ref());
                if value.is_empty() || !is_valid_attribute(&name, &value) {
                    None
                } else {
                    Some((name, value))
                }
            })
            .collect();
        pairs.sort();
        pairs.dedup();

        let first = |wanted: &str| {
            pairs
                .iter()
                .find(|(name, _)| name == wanted)
                .map(|(_, value)| value.as_str())
        };

        let long_name_is_standard_name = match (first("long_name"), first("standard_name")) {
            (Some(long), Some(standard)) => long == standard && long.contains('_'),
            _ => false,
        };

        let mut stored = BTreeMap::new();
        let mut names = BTreeSet::new();
        for (name, value) in &pairs {
            if STORED_ATTRIBUTES.contains(&name.as_str()) {
                stored.entry(name.clone()).or_insert_with(|| value.clone());
            }
            if NAME_ATTRIBUTES.contains(&name.as_str()) {
                let display = if name == "long_name" && long_name_is_standard_name {
                    value.replace('_', " ")
                } else {
                    value.clone()
                };
                names.insert(format!("\"{}\"", display));
            }
        }
        let names: Vec<String> = names.into_iter().collect();

        let best_name = BEST_NAME_ORDER
            .iter()
            .find_map(|wanted| first(wanted))
            .map(str::to_string);

        if stored.is_empty() && names.is_empty() && best_name.is_none() {
            return None;
        }

        let agg_string = aggregation_key(&stored, &names);

        Some(Self {
            attributes: stored,
            names,
            best_name,
            agg_string,
        })
    }

    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }
}

fn aggregation_key(stored: &BTreeMap<String, String>, names: &[String]) -> String {
    let mut parts: Vec<String> = stored
        .iter()
        .map(|(name, value)| format!("\"{}\":\"{}\"", name, value))
        .collect();
    if !names.is_empty() {
        parts.push(format!("\"names\":{}", names.join(";")));
    }
    parts.sort();
    parts.join(",")
}
