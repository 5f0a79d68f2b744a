//! # Run Metrics
//!
//! Distance, duration, elevation, pace and split computation shared by every
//! ingestion path.
//!
//! ## Algorithm
//! 1. Per-track distance and elevation are summed over consecutive points in
//!    stored order; gaps between tracks are never bridged
//! 2. All points are merged and ordered by timestamp to find start, end and duration
//! 3. Splits walk the merged sequence, closing a split at the first point whose
//!    accumulated distance reaches one unit (within [`SPLIT_TOLERANCE_METERS`])
//!    and starting the next split there
//! 4. A trailing partial split is dropped

use chrono::{DateTime, Utc};
use crate::config::UnitSystem;
use crate::geo_utils::{elevation_change, haversine_distance, polyline_length, ElevationChange};
use crate::{GeoPoint, MileSplit, Track};

/// Slack when deciding a split is complete. Covers floating-point shortfall
/// on evenly spaced points and distances given to the whole meter.
pub const SPLIT_TOLERANCE_METERS: f64 = 0.5;

/// Derived metrics for a set of tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetrics {
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    pub elevation_gain_meters: f64,
    pub elevation_loss_meters: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Minutes per distance unit
    pub average_pace: f64,
    pub splits: Vec<MileSplit>,
}

impl RunMetrics {
    /// Compute metrics for the given tracks.
    ///
    /// Returns `None` if the tracks contain no points at all.
    pub fn from_tracks(tracks: &[Track], units: UnitSystem) -> Option<Self> {
        let merged = merged_points(tracks);
        let start_time = merged.first()?.1.timestamp;
        let end_time = merged.last()?.1.timestamp;

        let total_distance_meters: f64 = tracks.iter().map(|t| polyline_length(&t.points)).sum();
        let elevation = tracks
            .iter()
            .map(|t| elevation_change(&t.points))
            .fold(ElevationChange::default(), |acc, c| ElevationChange {
                gain: acc.gain + c.gain,
                loss: acc.loss + c.loss,
            });

        let total_duration_seconds = seconds_between(start_time, end_time);
        let unit_meters = units.distance_unit_meters();

        Some(Self {
            total_distance_meters,
            total_duration_seconds,
            elevation_gain_meters: elevation.gain,
            elevation_loss_meters: elevation.loss,
            start_time,
            end_time,
            average_pace: average_pace(total_duration_seconds, total_distance_meters, unit_meters),
            splits: splits_from_sequence(&merged, unit_meters),
        })
    }
}

/// Pace in minutes per unit. Zero when there is no distance.
///
/// # Example
/// ```
/// use run_metrics::metrics::average_pace;
///
/// // 5 km in 25 minutes
/// assert_eq!(average_pace(1500.0, 5000.0, 1000.0), 5.0);
/// assert_eq!(average_pace(1500.0, 0.0, 1000.0), 0.0);
/// ```
#[inline]
pub fn average_pace(duration_seconds: f64, distance_meters: f64, unit_meters: f64) -> f64 {
    if distance_meters <= 0.0 || unit_meters <= 0.0 {
        return 0.0;
    }
    (duration_seconds / 60.0) / (distance_meters / unit_meters)
}

/// Compute unit-distance splits over the time-ordered points of all tracks.
pub fn compute_splits(tracks: &[Track], unit_meters: f64) -> Vec<MileSplit> {
    splits_from_sequence(&merged_points(tracks), unit_meters)
}

/// All points tagged with their track index, ordered by timestamp.
///
/// The sort is stable, so points sharing a timestamp keep their stored order.
pub fn merged_points(tracks: &[Track]) -> Vec<(usize, &GeoPoint)> {
    let mut merged: Vec<(usize, &GeoPoint)> = tracks
        .iter()
        .enumerate()
        .flat_map(|(i, t)| t.points.iter().map(move |p| (i, p)))
        .collect();
    merged.sort_by_key(|(_, p)| p.timestamp);
    merged
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

fn splits_from_sequence(sequence: &[(usize, &GeoPoint)], unit_meters: f64) -> Vec<MileSplit> {
    if sequence.len() < 2 || unit_meters <= 0.0 {
        return vec![];
    }

    let mut splits = Vec::new();
    let mut cumulative = 0.0;
    let mut split_start = sequence[0].1;
    let mut split_start_distance = 0.0;
    let mut split_distance = 0.0;
    let mut elevation = ElevationChange::default();

    for pair in sequence.windows(2) {
        let (prev_track, prev) = pair[0];
        let (track, current) = pair[1];

        // Hops between tracks carry no distance
        if prev_track == track {
            let d = haversine_distance(prev, current);
            cumulative += d;
            split_distance += d;
            elevation.add_delta(current.elevation - prev.elevation);
        }

        if split_distance >= unit_meters - SPLIT_TOLERANCE_METERS {
            let duration = seconds_between(split_start.timestamp, current.timestamp);
            splits.push(MileSplit {
                index: splits.len() as u32 + 1,
                pace: average_pace(duration, split_distance, unit_meters),
                duration_seconds: duration,
                elevation_gain: elevation.gain,
                elevation_loss: elevation.loss,
                start_distance: split_start_distance,
                end_distance: cumulative,
            });

            split_start = current;
            split_start_distance = cumulative;
            split_distance = 0.0;
            elevation = ElevationChange::default();
        }
    }

    splits
}
