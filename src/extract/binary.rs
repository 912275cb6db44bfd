//! Binary formats recognized by signature only: GRIB, HDF4/HDF5 and
//! Met Office PP. Their content contributes nothing beyond stat metadata
//! and the format label.

use std::path::Path;

use super::{FormatContent, FormatError, Level, MetadataExtractor};
use crate::sniff;

pub struct BinaryReader {
    format: &'static str,
    signatures: &'static [&'static [u8]],
}

pub static GRIB: BinaryReader = BinaryReader {
    format: "GRIB",
    signatures: &[sniff::GRIB_MAGIC],
};

pub static HDF: BinaryReader = BinaryReader {
    format: "HDF",
    signatures: &[sniff::HDF5_MAGIC, sniff::HDF4_MAGIC],
};

pub static PP: BinaryReader = BinaryReader {
    format: "PP",
    signatures: &[sniff::PP_BIG_ENDIAN, sniff::PP_LITTLE_ENDIAN],
};

impl BinaryReader {
    fn matches(&self, head: &[u8]) -> bool {
        self.signatures.iter().any(|sig| head.starts_with(sig))
    }
}

impl MetadataExtractor for BinaryReader {
    fn sniff(&self, path: &Path) -> Result<(), FormatError> {
        let head = sniff::read_head(path, 16)?;
        if self.matches(&head) {
            Ok(())
        } else {
            Err(FormatError::wrong_format(self.format, "signature mismatch"))
        }
    }

    fn read(&self, path: &Path, _level: Level) -> Result<FormatContent, FormatError> {
        self.sniff(path)?;
        Ok(FormatContent::default())
    }
}
