//! Spot mapping: archive spot names to filesystem path prefixes and back.
//!
//! The table is loaded once at startup and is read-only afterwards. Two line
//! formats are accepted, one mapping per line:
//!
//! ```text
//! spot-1400-accacia=/badc/accacia
//! spot-1401-abacus /badc/abacus
//! ```

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct SpotMapping {
    spot_to_path: HashMap<String, String>,
    path_to_spot: HashMap<String, String>,
}

impl SpotMapping {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read spot mapping: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid spot mapping: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut mapping = Self::default();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (spot, path) = match line.split_once('=') {
                Some((spot, path)) => (spot.trim(), path.trim()),
                None => {
                    let mut parts = line.split_whitespace();
                    match (parts.next(), parts.next(), parts.next()) {
                        (Some(spot), Some(path), None) => (spot, path),
                        _ => bail!("line {}: expected 'spot=path' or 'spot path'", lineno + 1),
                    }
                }
            };
            if spot.is_empty() || path.is_empty() {
                bail!("line {}: empty spot or path", lineno + 1);
            }
            mapping.insert(spot, path);
        }
        Ok(mapping)
    }

    pub fn insert(&mut self, spot: &str, path: &str) {
        let path = normalize(path);
        self.spot_to_path.insert(spot.to_string(), path.clone());
        self.path_to_spot.insert(path, spot.to_string());
    }

    pub fn len(&self) -> usize {
        self.spot_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spot_to_path.is_empty()
    }

    pub fn path_for_spot(&self, spot: &str) -> Option<&str> {
        self.spot_to_path.get(spot).map(String::as_str)
    }

    /// Spot owning `path`, found by climbing parent directories until a
    /// mapped prefix matches. Reaching `/` without a match gives `None`.
    pub fn spot_for_path(&self, path: &str) -> Option<&str> {
        let mut key = normalize(path);
        loop {
            if key == "/" || key.is_empty() {
                return None;
            }
            if let Some(spot) = self.path_to_spot.get(&key) {
                return Some(spot);
            }
            key = match key.rfind('/') {
                Some(0) => "/".to_string(),
                Some(idx) => key[..idx].to_string(),
                None => return None,
            };
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
