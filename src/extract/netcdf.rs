//! Classic NetCDF files (CDF-1, CDF-2 and CDF-5).
//!
//! The header is parsed in full from a prefix of the file. Coordinate values
//! are only read, straight from each variable's offset, when coverage is
//! requested. NetCDF-4 files are HDF5 containers and are reported as
//! malformed so they degrade to stat-only output.

use chrono::{NaiveDateTime, TimeDelta};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use fbs_core::temporal::parse_datetime;
use fbs_core::{Phenomenon, SpatialEnvelope, TemporalRange};

use super::{FormatContent, FormatError, Level, MetadataExtractor};
use crate::sniff;

const FORMAT: &str = "NetCDF";

/// First attempt at reading the header.
const HEADER_PREFIX: usize = 4 * 1024 * 1024;
/// Headers that do not fit in this are rejected.
const HEADER_PREFIX_MAX: usize = 64 * 1024 * 1024;

/// Largest coordinate variable read for coverage.
const MAX_COORDINATE_BYTES: u64 = 256 * 1024 * 1024;

/// Values beyond this magnitude are fill values.
const FILL_LIMIT: f64 = 1.0e30;

const TAG_DIMENSION: u32 = 0x0A;
const TAG_VARIABLE: u32 = 0x0B;
const TAG_ATTRIBUTE: u32 = 0x0C;

static TIME_UNITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*([a-z]+)\s+since\s+(.+?)\s*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Classic,
    Offset64,
    Data64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcType {
    Byte,
    Char,
    Short,
    Int,
    Float,
    Double,
    UByte,
    UShort,
    UInt,
    Int64,
    UInt64,
}

impl NcType {
    fn from_code(code: u32, version: Version) -> Option<Self> {
        let ty = match code {
            1 => NcType::Byte,
            2 => NcType::Char,
            3 => NcType::Short,
            4 => NcType::Int,
            5 => NcType::Float,
            6 => NcType::Double,
            7 => NcType::UByte,
            8 => NcType::UShort,
            9 => NcType::UInt,
            10 => NcType::Int64,
            11 => NcType::UInt64,
            _ => return None,
        };
        // Extended types only exist in CDF-5.
        if code > 6 && version != Version::Data64 {
            return None;
        }
        Some(ty)
    }

    fn size(self) -> usize {
        match self {
            NcType::Byte | NcType::Char | NcType::UByte => 1,
            NcType::Short | NcType::UShort => 2,
            NcType::Int | NcType::UInt | NcType::Float => 4,
            NcType::Double | NcType::Int64 | NcType::UInt64 => 8,
        }
    }

    /// Decode big-endian values. Characters decode to nothing.
    fn decode(self, bytes: &[u8]) -> Vec<f64> {
        let size = self.size();
        bytes
            .chunks_exact(size)
            .filter_map(|c| {
                Some(match self {
                    NcType::Char => return None,
                    NcType::Byte => c[0] as i8 as f64,
                    NcType::UByte => c[0] as f64,
                    NcType::Short => i16::from_be_bytes([c[0], c[1]]) as f64,
                    NcType::UShort => u16::from_be_bytes([c[0], c[1]]) as f64,
                    NcType::Int => i32::from_be_bytes(c.try_into().ok()?) as f64,
                    NcType::UInt => u32::from_be_bytes(c.try_into().ok()?) as f64,
                    NcType::Float => f32::from_be_bytes(c.try_into().ok()?) as f64,
                    NcType::Double => f64::from_be_bytes(c.try_into().ok()?),
                    NcType::Int64 => i64::from_be_bytes(c.try_into().ok()?) as f64,
                    NcType::UInt64 => u64::from_be_bytes(c.try_into().ok()?) as f64,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Numbers(Vec<f64>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Numbers(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Numbers(v) => v.first().copied(),
            AttrValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    /// Zero for the record dimension.
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub dim_ids: Vec<usize>,
    pub attributes: Vec<(String, AttrValue)>,
    pub nc_type: NcType,
    pub vsize: u64,
    pub begin: u64,
}

impl Variable {
    fn attribute(&self, name: &str) -> Option<&AttrValue> {
        lookup(&self.attributes, name)
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.attribute(name).and_then(AttrValue::as_text)
    }

    fn is_valid_value(&self, value: f64) -> bool {
        if !value.is_finite() || value.abs() > FILL_LIMIT {
            return false;
        }
        ["_FillValue", "missing_value"]
            .iter()
            .filter_map(|a| self.attribute(a).and_then(AttrValue::as_number))
            .all(|fill| fill != value)
    }
}

fn lookup<'a>(attributes: &'a [(String, AttrValue)], name: &str) -> Option<&'a AttrValue> {
    attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: Version,
    pub num_records: u64,
    pub dimensions: Vec<Dimension>,
    pub attributes: Vec<(String, AttrValue)>,
    pub variables: Vec<Variable>,
}

impl Header {
    fn is_record(&self, var: &Variable) -> bool {
        var.dim_ids
            .first()
            .and_then(|&id| self.dimensions.get(id))
            .map(|d| d.length == 0)
            .unwrap_or(false)
    }

    /// Elements in one record (or in the whole variable when it has no
    /// record dimension). `None` when the header's lengths overflow.
    fn element_count(&self, var: &Variable) -> Option<u64> {
        let skip = usize::from(self.is_record(var));
        var.dim_ids[skip..].iter().try_fold(1u64, |n, &id| {
            n.checked_mul(self.dimensions.get(id).map(|d| d.length).unwrap_or(0))
        })
    }

    fn record_size(&self) -> Option<u64> {
        let record_vars: Vec<&Variable> =
            self.variables.iter().filter(|v| self.is_record(v)).collect();
        match record_vars.as_slice() {
            // A lone record variable is stored without padding.
            [only] => self
                .element_count(only)?
                .checked_mul(only.nc_type.size() as u64),
            vars => vars.iter().try_fold(0u64, |n, v| n.checked_add(v.vsize)),
        }
    }

    fn global_number(&self, name: &str) -> Option<f64> {
        lookup(&self.attributes, name).and_then(AttrValue::as_number)
    }

    fn global_text(&self, name: &str) -> Option<&str> {
        lookup(&self.attributes, name).and_then(AttrValue::as_text)
    }
}

#[derive(Debug, PartialEq)]
enum HeaderError {
    /// The prefix ended before the header did.
    Truncated,
    Invalid(String),
}

struct HeaderReader<'a> {
    buf: &'a [u8],
    pos: usize,
    version: Version,
}

impl<'a> HeaderReader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8], HeaderError> {
        let end = self.pos.checked_add(n).ok_or(HeaderError::Truncated)?;
        let out = self.buf.get(self.pos..end).ok_or(HeaderError::Truncated)?;
        self.pos = end;
        Ok(out)
    }

    fn padded(&mut self, n: usize) -> Result<&'a [u8], HeaderError> {
        let out = self.bytes(n)?;
        self.bytes((4 - n % 4) % 4)?;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, HeaderError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, HeaderError> {
        let b = self.bytes(8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(u64::from_be_bytes(word))
    }

    /// Counts, lengths and sizes: 64-bit in CDF-5 only.
    fn count(&mut self) -> Result<u64, HeaderError> {
        match self.version {
            Version::Data64 => self.u64(),
            _ => self.u32().map(u64::from),
        }
    }

    /// Variable data offsets: 32-bit in CDF-1 only.
    fn offset(&mut self) -> Result<u64, HeaderError> {
        match self.version {
            Version::Classic => self.u32().map(u64::from),
            _ => self.u64(),
        }
    }

    fn len(&mut self) -> Result<usize, HeaderError> {
        let n = self.count()?;
        usize::try_from(n).map_err(|_| HeaderError::Invalid(format!("length {} out of range", n)))
    }

    fn name(&mut self) -> Result<String, HeaderError> {
        let n = self.len()?;
        Ok(String::from_utf8_lossy(self.padded(n)?).into_owned())
    }

    fn list(&mut self, tag: u32) -> Result<usize, HeaderError> {
        let found = self.u32()?;
        let n = self.len()?;
        match (found, n) {
            (0, 0) => Ok(0),
            (t, n) if t == tag => Ok(n),
            (t, _) => Err(HeaderError::Invalid(format!(
                "expected list tag {:#x}, found {:#x}",
                tag, t
            ))),
        }
    }

    fn nc_type(&mut self) -> Result<NcType, HeaderError> {
        let code = self.u32()?;
        NcType::from_code(code, self.version)
            .ok_or_else(|| HeaderError::Invalid(format!("unknown type code {}", code)))
    }

    fn attributes(&mut self) -> Result<Vec<(String, AttrValue)>, HeaderError> {
        let n = self.list(TAG_ATTRIBUTE)?;
        let mut attrs = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            let name = self.name()?;
            let ty = self.nc_type()?;
            let count = self.len()?;
            let size = count.checked_mul(ty.size()).ok_or(HeaderError::Truncated)?;
            let raw = self.padded(size)?;
            let value = match ty {
                NcType::Char => AttrValue::Text(
                    String::from_utf8_lossy(raw)
                        .trim_end_matches('\0')
                        .to_string(),
                ),
                _ => AttrValue::Numbers(ty.decode(raw)),
            };
            attrs.push((name, value));
        }
        Ok(attrs)
    }
}

fn parse_header(buf: &[u8]) -> Result<Header, HeaderError> {
    if buf.len() < 4 {
        return Err(HeaderError::Truncated);
    }
    if !sniff::is_netcdf_classic(buf) {
        return Err(HeaderError::Invalid("missing CDF signature".to_string()));
    }
    let version = match buf[3] {
        1 => Version::Classic,
        2 => Version::Offset64,
        _ => Version::Data64,
    };
    let mut r = HeaderReader {
        buf,
        pos: 4,
        version,
    };

    let num_records = r.count()?;

    let n = r.list(TAG_DIMENSION)?;
    let mut dimensions = Vec::with_capacity(n.min(1024));
    for _ in 0..n {
        let name = r.name()?;
        let length = r.count()?;
        dimensions.push(Dimension { name, length });
    }

    let attributes = r.attributes()?;

    let n = r.list(TAG_VARIABLE)?;
    let mut variables = Vec::with_capacity(n.min(1024));
    for _ in 0..n {
        let name = r.name()?;
        let ndims = r.len()?;
        let mut dim_ids = Vec::with_capacity(ndims.min(64));
        for _ in 0..ndims {
            let id = r.len()?;
            if id >= dimensions.len() {
                return Err(HeaderError::Invalid(format!(
                    "variable {} uses unknown dimension {}",
                    name, id
                )));
            }
            dim_ids.push(id);
        }
        let attributes = r.attributes()?;
        let nc_type = r.nc_type()?;
        let vsize = r.count()?;
        let begin = r.offset()?;
        variables.push(Variable {
            name,
            dim_ids,
            attributes,
            nc_type,
            vsize,
            begin,
        });
    }

    Ok(Header {
        version,
        num_records,
        dimensions,
        attributes,
        variables,
    })
}

fn read_header(path: &Path) -> Result<Header, FormatError> {
    let mut prefix = HEADER_PREFIX;
    loop {
        let buf = sniff::read_head(path, prefix)?;
        if buf.starts_with(sniff::HDF5_MAGIC) {
            return Err(FormatError::malformed(
                FORMAT,
                "NetCDF-4 (HDF5) content is not supported",
            ));
        }
        match parse_header(&buf) {
            Ok(header) => return Ok(header),
            Err(HeaderError::Truncated) if buf.len() == prefix && prefix < HEADER_PREFIX_MAX => {
                prefix = HEADER_PREFIX_MAX;
            }
            Err(HeaderError::Truncated) => {
                return Err(FormatError::malformed(FORMAT, "header is truncated"))
            }
            Err(HeaderError::Invalid(reason)) => return Err(FormatError::malformed(FORMAT, reason)),
        }
    }
}

/// Raw values of a variable, fill values included. Record variables are
/// only read when they are one-dimensional.
fn read_values(file: &mut File, header: &Header, var: &Variable) -> std::io::Result<Vec<f64>> {
    if var.nc_type == NcType::Char {
        return Ok(Vec::new());
    }
    let size = var.nc_type.size() as u64;

    if header.is_record(var) {
        if var.dim_ids.len() != 1 {
            return Ok(Vec::new());
        }
        let Some(stride) = header.record_size() else {
            return Ok(Vec::new());
        };
        let total = header.num_records.saturating_mul(size);
        if total > MAX_COORDINATE_BYTES {
            return Ok(Vec::new());
        }
        if stride == size {
            return read_at(file, var.begin, total).map(|b| var.nc_type.decode(&b));
        }
        let capacity = header.num_records.min(MAX_COORDINATE_BYTES / size);
        let mut values = Vec::with_capacity(capacity as usize);
        for i in 0..header.num_records {
            let Some(offset) = i.checked_mul(stride).and_then(|o| o.checked_add(var.begin)) else {
                return Ok(Vec::new());
            };
            let bytes = read_at(file, offset, size)?;
            values.extend(var.nc_type.decode(&bytes));
        }
        return Ok(values);
    }

    match header.element_count(var).and_then(|n| n.checked_mul(size)) {
        Some(total) if total <= MAX_COORDINATE_BYTES => {
            read_at(file, var.begin, total).map(|b| var.nc_type.decode(&b))
        }
        _ => Ok(Vec::new()),
    }
}

fn read_at(file: &mut File, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len as usize);
    file.by_ref().take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    Lat,
    Lon,
}

impl Axis {
    fn standard_name(self) -> &'static str {
        match self {
            Axis::Lat => "latitude",
            Axis::Lon => "longitude",
        }
    }

    fn names(self) -> &'static [&'static str] {
        match self {
            Axis::Lat => &["lat", "latitude"],
            Axis::Lon => &["lon", "long", "longitude"],
        }
    }

    fn units(self) -> &'static str {
        match self {
            Axis::Lat => "degrees_north",
            Axis::Lon => "degrees_east",
        }
    }
}

fn find_coordinate(header: &Header, axis: Axis) -> Option<&Variable> {
    let numeric = header.variables.iter().filter(|v| v.nc_type != NcType::Char);
    numeric
        .clone()
        .find(|v| v.text("standard_name") == Some(axis.standard_name()))
        .or_else(|| {
            numeric
                .clone()
                .find(|v| axis.names().contains(&v.name.to_ascii_lowercase().as_str()))
        })
        .or_else(|| numeric.clone().find(|v| v.text("units") == Some(axis.units())))
}

fn valid_range(var: &Variable, values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|&v| var.is_valid_value(v))
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

fn spatial_from_data(file: &mut File, header: &Header) -> Option<SpatialEnvelope> {
    let lat = find_coordinate(header, Axis::Lat)?;
    let lon = find_coordinate(header, Axis::Lon)?;
    let lat_values = read_values(file, header, lat).ok()?;
    let lon_values = read_values(file, header, lon).ok()?;

    // Lat and lon indexed by the same non-coordinate dimension trace a path.
    let shared = match (lat.dim_ids.as_slice(), lon.dim_ids.as_slice()) {
        ([a], [b]) if a == b => header.dimensions.get(*a),
        _ => None,
    };
    if let Some(dim) = shared {
        if dim.name != lat.name && dim.name != lon.name {
            let points: Vec<(f64, f64)> = lon_values
                .iter()
                .zip(&lat_values)
                .filter(|(x, y)| lon.is_valid_value(**x) && lat.is_valid_value(**y))
                .map(|(&x, &y)| (x, y))
                .collect();
            return SpatialEnvelope::track(&points);
        }
    }

    let (lat_min, lat_max) = valid_range(lat, &lat_values)?;
    let (mut lon_min, mut lon_max) = valid_range(lon, &lon_values)?;
    // 0..360 grids cover every longitude.
    if lon_max > 180.0 {
        lon_min = -180.0;
        lon_max = 180.0;
    }
    SpatialEnvelope::from_points([(lon_min, lat_min), (lon_max, lat_max)])
}

fn spatial_from_attributes(header: &Header) -> Option<SpatialEnvelope> {
    SpatialEnvelope::from_points([
        (
            header.global_number("geospatial_lon_min")?,
            header.global_number("geospatial_lat_min")?,
        ),
        (
            header.global_number("geospatial_lon_max")?,
            header.global_number("geospatial_lat_max")?,
        ),
    ])
}

/// Seconds per unit and reference time of a `<unit> since <date>` string.
pub fn parse_time_units(units: &str) -> Option<(f64, NaiveDateTime)> {
    let caps = TIME_UNITS.captures(units)?;
    let scale = match caps[1].to_ascii_lowercase().as_str() {
        "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
        "minutes" | "minute" | "mins" | "min" => 60.0,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
        "days" | "day" | "d" => 86400.0,
        _ => return None,
    };
    let reference = caps[2].trim().trim_end_matches("UTC").trim();
    Some((scale, parse_datetime(reference)?))
}

fn offset_time(reference: NaiveDateTime, seconds: f64) -> Option<NaiveDateTime> {
    let millis = seconds * 1000.0;
    if !millis.is_finite() || millis.abs() > 9.0e15 {
        return None;
    }
    reference.checked_add_signed(TimeDelta::try_milliseconds(millis.round() as i64)?)
}

fn temporal_from_data(file: &mut File, header: &Header) -> Option<TemporalRange> {
    let time = header.variables.iter().find(|v| {
        v.nc_type != NcType::Char
            && (v.name == "time" || v.text("standard_name") == Some("time") || v.text("axis") == Some("T"))
            && v.text("units").map(|u| u.contains("since")).unwrap_or(false)
    })?;
    let (scale, reference) = parse_time_units(time.text("units")?)?;
    let values = read_values(file, header, time).ok()?;
    let (lo, hi) = valid_range(time, &values)?;
    Some(TemporalRange::new(
        offset_time(reference, lo * scale)?,
        offset_time(reference, hi * scale)?,
    ))
}

fn temporal_from_attributes(header: &Header) -> Option<TemporalRange> {
    TemporalRange::parse(
        header.global_text("time_coverage_start")?,
        header.global_text("time_coverage_end")?,
    )
}

fn phenomena(header: &Header) -> Vec<Phenomenon> {
    header
        .variables
        .iter()
        .filter_map(|var| {
            let text_attrs = var
                .attributes
                .iter()
                .filter_map(|(name, value)| value.as_text().map(|t| (name.as_str(), t)));
            Phenomenon::from_attributes(
                std::iter::once(("var_id", var.name.as_str())).chain(text_attrs),
            )
        })
        .collect()
}

pub struct NetCdfReader;

impl MetadataExtractor for NetCdfReader {
    fn sniff(&self, path: &Path) -> Result<(), FormatError> {
        let head = sniff::read_head(path, 8)?;
        if sniff::is_netcdf_classic(&head) || head.starts_with(sniff::HDF5_MAGIC) {
            Ok(())
        } else {
            Err(FormatError::wrong_format(FORMAT, "no CDF or HDF5 signature"))
        }
    }

    fn read(&self, path: &Path, level: Level) -> Result<FormatContent, FormatError> {
        let header = read_header(path)?;
        let mut content = FormatContent {
            phenomena: phenomena(&header),
            ..Default::default()
        };

        if level == Level::Coverage {
            match File::open(path) {
                Ok(mut file) => {
                    content.spatial = spatial_from_data(&mut file, &header)
                        .or_else(|| spatial_from_attributes(&header));
                    content.temporal = temporal_from_data(&mut file, &header)
                        .or_else(|| temporal_from_attributes(&header));
                }
                Err(e) => content.incomplete = Some(format!("cannot read coordinates: {}", e)),
            }
        }

        Ok(content)
    }
}
