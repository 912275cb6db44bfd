//! Magic-byte sniffing for the classifier's content fallback.
//!
//! Only the handful of signatures the archive cares about are recognized.
//! Everything else is reported as plain text or as unclassified binary data,
//! and the classifier applies its own secondary heuristics to those.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes read from the start of a file for sniffing.
pub const SNIFF_LEN: usize = 1024;

pub const NETCDF_MAGIC: &[u8] = b"CDF";
pub const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";
pub const HDF4_MAGIC: &[u8] = b"\x0e\x03\x13\x01";
pub const GRIB_MAGIC: &[u8] = b"GRIB";
pub const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
/// Met Office PP files start with a Fortran record marker for the 64-word
/// header: 256 as a 32-bit integer.
pub const PP_BIG_ENDIAN: &[u8] = b"\x00\x00\x01\x00";
pub const PP_LITTLE_ENDIAN: &[u8] = b"\x00\x01\x00\x00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// Classic NetCDF (CDF-1, CDF-2 or CDF-5).
    NetCdf,
    Hdf5,
    Hdf4,
    Pp,
    /// ASCII text.
    Text,
    /// Binary content with no recognized signature.
    Data,
    Empty,
}

/// Read up to `len` bytes from the start of `path`.
pub fn read_head(path: &Path, len: usize) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn is_netcdf_classic(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf.starts_with(NETCDF_MAGIC) && matches!(buf[3], 1 | 2 | 5)
}

/// Bytes the `file` utility counts as ASCII text: printable ASCII plus
/// BEL, BS, HT, LF, VT, FF, CR and ESC.
fn is_text_byte(b: u8) -> bool {
    matches!(b, 0x07..=0x0d | 0x1b | 0x20..=0x7e)
}

pub fn looks_like_text(buf: &[u8]) -> bool {
    !buf.is_empty() && buf.iter().all(|&b| is_text_byte(b))
}

pub fn classify_bytes(buf: &[u8]) -> Signature {
    if buf.is_empty() {
        Signature::Empty
    } else if is_netcdf_classic(buf) {
        Signature::NetCdf
    } else if buf.starts_with(HDF5_MAGIC) {
        Signature::Hdf5
    } else if buf.starts_with(HDF4_MAGIC) {
        Signature::Hdf4
    } else if buf.starts_with(PP_BIG_ENDIAN) || buf.starts_with(PP_LITTLE_ENDIAN) {
        Signature::Pp
    } else if looks_like_text(buf) {
        Signature::Text
    } else {
        Signature::Data
    }
}

pub fn sniff_file(path: &Path) -> io::Result<Signature> {
    Ok(classify_bytes(&read_head(path, SNIFF_LEN)?))
}

/// First line of a text file, without the line terminator.
pub fn first_line(path: &Path) -> io::Result<String> {
    let head = read_head(path, SNIFF_LEN)?;
    let text = String::from_utf8_lossy(&head);
    Ok(text.lines().next().unwrap_or("").to_string())
}

/// Whether a line starts with two whitespace-separated unsigned integers,
/// as the first line of a NASA Ames file (`NLHEAD FFI`) does.
pub fn has_two_integer_tokens(line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    let is_int = |t: Option<&str>| {
        t.map(|t| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    };
    is_int(tokens.next()) && is_int(tokens.next())
}
