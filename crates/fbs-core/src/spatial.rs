//! Geographic coverage attached to a document.
//!
//! Longitudes are normalized into `[-180, 180]` and latitudes clamped into
//! `[-90, 90]` before anything reaches the index, which rejects out-of-range
//! geo shapes.

use serde::{Deserialize, Serialize};

/// Tracks longer than this are thinned before indexing.
pub const MAX_TRACK_POINTS: usize = 500;

/// A spatial shape in `[lon, lat]` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates", rename_all = "lowercase")]
pub enum SpatialEnvelope {
    /// `[[lon_min, lat_min], [lon_max, lat_max]]`.
    Envelope([[f64; 2]; 2]),
    Point([f64; 2]),
    #[serde(rename = "linestring")]
    Track(Vec<[f64; 2]>),
}

pub fn normalize_lon(lon: f64) -> f64 {
    let lon = if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    };
    round3(lon.clamp(-180.0, 180.0))
}

pub fn normalize_lat(lat: f64) -> f64 {
    round3(lat.clamp(-90.0, 90.0))
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl SpatialEnvelope {
    /// Bounding box from its corners.
    ///
    /// Returns `None` for non-finite input or when a minimum exceeds its
    /// maximum after normalization.
    pub fn envelope(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Option<Self> {
        if ![lon_min, lat_min, lon_max, lat_max]
            .iter()
            .all(|v| v.is_finite())
        {
            return None;
        }
        let (lon_min, lon_max) = (normalize_lon(lon_min), normalize_lon(lon_max));
        let (lat_min, lat_max) = (normalize_lat(lat_min), normalize_lat(lat_max));
        if lon_min > lon_max || lat_min > lat_max {
            return None;
        }
        Some(Self::Envelope([[lon_min, lat_min], [lon_max, lat_max]]))
    }

    pub fn point(lon: f64, lat: f64) -> Option<Self> {
        if !lon.is_finite() || !lat.is_finite() {
            return None;
        }
        Some(Self::Point([normalize_lon(lon), normalize_lat(lat)]))
    }

    pub fn global() -> Self {
        Self::Envelope([[-180.0, -90.0], [180.0, 90.0]])
    }

    /// Bounding box of a set of `(lon, lat)` points. A single distinct point
    /// gives a [`SpatialEnvelope::Point`].
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut bounds: Option<(f64, f64, f64, f64)> = None;
        for (lon, lat) in points {
            if !lon.is_finite() || !lat.is_finite() {
                continue;
            }
            let (lon, lat) = (normalize_lon(lon), normalize_lat(lat));
            bounds = Some(match bounds {
                None => (lon, lat, lon, lat),
                Some((x0, y0, x1, y1)) => (x0.min(lon), y0.min(lat), x1.max(lon), y1.max(lat)),
            });
        }
        let (lon_min, lat_min, lon_max, lat_max) = bounds?;
        if lon_min == lon_max && lat_min == lat_max {
            return Self::point(lon_min, lat_min);
        }
        Self::envelope(lon_min, lat_min, lon_max, lat_max)
    }

    /// A flight or ship track. Long tracks are sampled down to at most
    /// [`MAX_TRACK_POINTS`], always keeping the last point.
    pub fn track(points: &[(f64, f64)]) -> Option<Self> {
        let cleaned: Vec<[f64; 2]> = points
            .iter()
            .filter(|(lon, lat)| lon.is_finite() && lat.is_finite())
            .map(|&(lon, lat)| [normalize_lon(lon), normalize_lat(lat)])
            .collect();
        match cleaned.len() {
            0 => None,
            1 => Some(Self::Point(cleaned[0])),
            n if n <= MAX_TRACK_POINTS => Some(Self::Track(cleaned)),
            n => {
                let step = n.div_ceil(MAX_TRACK_POINTS - 1);
                let mut sampled: Vec<[f64; 2]> = cleaned.iter().step_by(step).copied().collect();
                if let Some(last) = cleaned.last() {
                    if sampled.last() != Some(last) {
                        sampled.push(*last);
                    }
                }
                Some(Self::Track(sampled))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longitude_wraps_and_clamps() {
        assert_eq!(normalize_lon(190.0), -170.0);
        assert_eq!(normalize_lon(-190.0), 170.0);
        assert_eq!(normalize_lon(720.0), 180.0);
        assert_eq!(normalize_lon(12.34567), 12.346);
        assert_eq!(normalize_lat(95.0), 90.0);
        assert_eq!(normalize_lat(-91.0), -90.0);
    }

    #[test]
    fn test_envelope_corners() {
        let env = SpatialEnvelope::envelope(-10.0, 50.0, 2.0, 60.0).unwrap();
        assert_eq!(
            env,
            SpatialEnvelope::Envelope([[-10.0, 50.0], [2.0, 60.0]])
        );
    }

    #[test]
    fn test_envelope_rejects_inverted_or_nan() {
        assert!(SpatialEnvelope::envelope(10.0, 0.0, -10.0, 5.0).is_none());
        assert!(SpatialEnvelope::envelope(f64::NAN, 0.0, 1.0, 1.0).is_none());
    }

    #[test]
    fn test_from_points() {
        let env = SpatialEnvelope::from_points(vec![(1.0, 2.0), (-3.0, 5.0), (4.0, -1.0)]).unwrap();
        assert_eq!(env, SpatialEnvelope::Envelope([[-3.0, -1.0], [4.0, 5.0]]));

        let point = SpatialEnvelope::from_points(vec![(1.0, 2.0), (1.0, 2.0)]).unwrap();
        assert_eq!(point, SpatialEnvelope::Point([1.0, 2.0]));

        assert!(SpatialEnvelope::from_points(Vec::new()).is_none());
    }

    #[test]
    fn test_long_track_is_thinned() {
        let points: Vec<(f64, f64)> = (0..2000).map(|i| (i as f64 * 0.01, 50.0)).collect();
        match SpatialEnvelope::track(&points).unwrap() {
            SpatialEnvelope::Track(sampled) => {
                assert!(sampled.len() <= MAX_TRACK_POINTS);
                assert_eq!(sampled.first(), Some(&[0.0, 50.0]));
                assert_eq!(sampled.last(), Some(&[19.99, 50.0]));
            }
            other => panic!("expected track, got {:?}", other),
        }
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(SpatialEnvelope::global()).unwrap();
        assert_eq!(value["type"], "envelope");
        assert_eq!(value["coordinates"][0][0], -180.0);
        let value = serde_json::to_value(SpatialEnvelope::Track(vec![[0.0, 0.0], [1.0, 1.0]])).unwrap();
        assert_eq!(value["type"], "linestring");
    }
}
