//! # Geographic Utilities
//!
//! Core geographic computation utilities for GPS run analysis.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a GPS track in meters |
//! | [`elevation_change`] | Accumulated climb and descent of a track |
//! | [`compute_bounds`] | Bounding box of a set of points |
//! | [`compute_center`] | Centroid of a set of points |
//! | [`sample_every_nth`] | Thin a track while keeping its endpoints |
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! The haversine formula calculates the great-circle distance between two points on a sphere.
//! Distances here use a spherical Earth of radius 6,371,000 m.
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)

use geo::{BoundingRect, Centroid, MultiPoint, Point};
use crate::GeoPoint;

/// Mean Earth radius used for all distances, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Bounding box for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// # Example
///
/// ```rust
/// use run_metrics::{GeoPoint, geo_utils};
/// use chrono::Utc;
///
/// let now = Utc::now();
/// let london = GeoPoint::new(51.5074, -0.1278, 0.0, now);
/// let paris = GeoPoint::new(48.8566, 2.3522, 0.0, now);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_500.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    haversine_coords(p1.latitude, p1.longitude, p2.latitude, p2.longitude)
}

/// Haversine distance between raw coordinate pairs, in meters.
pub fn haversine_coords(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Clamp guards against rounding pushing `a` just above 1 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

/// Calculate the total length of a polyline (GPS track) in meters.
///
/// Sums the haversine distance between consecutive points. Empty or single-point
/// tracks return 0.0.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Accumulated climb and descent, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ElevationChange {
    pub gain: f64,
    /// Magnitude of descent (always >= 0)
    pub loss: f64,
}

impl ElevationChange {
    /// Account for a single elevation delta.
    #[inline]
    pub fn add_delta(&mut self, delta: f64) {
        if delta > 0.0 {
            self.gain += delta;
        } else {
            self.loss -= delta;
        }
    }
}

/// Sum positive and negative elevation deltas between consecutive points.
pub fn elevation_change(points: &[GeoPoint]) -> ElevationChange {
    let mut change = ElevationChange::default();
    for w in points.windows(2) {
        change.add_delta(w[1].elevation - w[0].elevation);
    }
    change
}

// =============================================================================
// Bounding Box / Center Functions
// =============================================================================

fn to_multi_point<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> MultiPoint<f64> {
    MultiPoint::new(
        points
            .into_iter()
            .map(|p| Point::new(p.longitude, p.latitude))
            .collect(),
    )
}

/// Compute the bounding box of a set of points. Returns `None` for empty input.
pub fn compute_bounds<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<Bounds> {
    let rect = to_multi_point(points).bounding_rect()?;
    Some(Bounds {
        min_lat: rect.min().y,
        max_lat: rect.max().y,
        min_lng: rect.min().x,
        max_lng: rect.max().x,
    })
}

/// Compute the centroid of a set of points as (latitude, longitude).
///
/// Simple planar averaging; adequate for the extent of a single run.
pub fn compute_center<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<(f64, f64)> {
    let centroid = to_multi_point(points).centroid()?;
    Some((centroid.y(), centroid.x()))
}

// =============================================================================
// Resampling
// =============================================================================

/// Keep every `step`-th point, always retaining the first and last point.
///
/// A `step` of 0 or 1, or a track of two points or fewer, is returned unchanged.
pub fn sample_every_nth(points: &[GeoPoint], step: usize) -> Vec<GeoPoint> {
    if step <= 1 || points.len() <= 2 {
        return points.to_vec();
    }

    let last = points.len() - 1;
    points
        .iter()
        .enumerate()
        .filter(|(i, _)| i % step == 0 || *i == last)
        .map(|(_, p)| *p)
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use geo::{Distance, Haversine};

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn pt(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint::new(lat, lng, 0.0, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_haversine_distance_same_point() {
        let p = pt(51.5074, -0.1278);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_distance_known_value() {
        // London to Paris is approximately 344 km
        let london = pt(51.5074, -0.1278);
        let paris = pt(48.8566, 2.3522);
        let dist = haversine_distance(&london, &paris);
        assert!(approx_eq(dist, 343_500.0, 5000.0));
    }

    #[test]
    fn test_haversine_is_symmetric() {
        let pairs = [
            (pt(51.5074, -0.1278), pt(48.8566, 2.3522)),
            (pt(-33.8688, 151.2093), pt(35.6762, 139.6503)),
            (pt(0.0, 179.9), pt(0.0, -179.9)),
        ];
        for (a, b) in pairs {
            assert_eq!(haversine_distance(&a, &b), haversine_distance(&b, &a));
        }
    }

    #[test]
    fn test_haversine_triangle_inequality() {
        let points = [
            pt(51.5074, -0.1278),
            pt(48.8566, 2.3522),
            pt(40.7128, -74.0060),
            pt(-33.8688, 151.2093),
            pt(51.5080, -0.1290),
        ];
        for a in &points {
            for b in &points {
                for c in &points {
                    let direct = haversine_distance(a, c);
                    let via = haversine_distance(a, b) + haversine_distance(b, c);
                    assert!(direct <= via + 1e-6, "triangle inequality violated");
                }
            }
        }
    }

    #[test]
    fn test_haversine_agrees_with_geo() {
        // geo uses a 6,371,008.8 m radius, so results differ by ~1.4 ppm
        let a = pt(37.7749, -122.4194);
        let b = pt(34.0522, -118.2437);
        let ours = haversine_distance(&a, &b);
        let theirs = Haversine::distance(Point::new(a.longitude, a.latitude), Point::new(b.longitude, b.latitude));
        assert!((ours - theirs).abs() / theirs < 1e-5);
    }

    #[test]
    fn test_polyline_length_empty_and_single() {
        assert_eq!(polyline_length(&[]), 0.0);
        assert_eq!(polyline_length(&[pt(51.5074, -0.1278)]), 0.0);
    }

    #[test]
    fn test_polyline_length_two_points() {
        let track = vec![pt(51.5074, -0.1278), pt(51.5080, -0.1280)];
        let length = polyline_length(&track);
        assert!(length > 0.0);
        assert!(length < 100.0); // Should be about 68m
    }

    #[test]
    fn test_elevation_change_splits_gain_and_loss() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let track: Vec<GeoPoint> = [100.0, 110.0, 105.0, 120.0, 90.0]
            .iter()
            .map(|e| GeoPoint::new(0.0, 0.0, *e, t))
            .collect();
        let change = elevation_change(&track);
        assert_eq!(change.gain, 25.0);
        assert_eq!(change.loss, 35.0);
    }

    #[test]
    fn test_compute_bounds_and_center() {
        let track = vec![pt(51.50, -0.13), pt(51.51, -0.12), pt(51.505, -0.125)];
        let bounds = compute_bounds(&track).unwrap();
        assert_eq!(bounds.min_lat, 51.50);
        assert_eq!(bounds.max_lat, 51.51);
        assert_eq!(bounds.min_lng, -0.13);
        assert_eq!(bounds.max_lng, -0.12);

        let (lat, lng) = compute_center(&track).unwrap();
        assert!(approx_eq(lat, 51.505, 1e-9));
        assert!(approx_eq(lng, -0.125, 1e-9));
    }

    #[test]
    fn test_compute_bounds_empty() {
        let empty: Vec<GeoPoint> = vec![];
        assert!(compute_bounds(&empty).is_none());
        assert!(compute_center(&empty).is_none());
    }

    #[test]
    fn test_sample_every_nth_keeps_endpoints() {
        let track: Vec<GeoPoint> = (0..25).map(|i| pt(i as f64 * 0.001, 0.0)).collect();
        let sampled = sample_every_nth(&track, 10);
        // indices 0, 10, 20 and the last (24)
        assert_eq!(sampled.len(), 4);
        assert_eq!(sampled.first(), track.first());
        assert_eq!(sampled.last(), track.last());

        let exact: Vec<GeoPoint> = (0..21).map(|i| pt(i as f64 * 0.001, 0.0)).collect();
        assert_eq!(sample_every_nth(&exact, 10).len(), 3);
        assert_eq!(sample_every_nth(&exact, 1).len(), 21);
    }
}
