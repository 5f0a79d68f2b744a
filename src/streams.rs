//! # Remote Stream Normalizer
//!
//! Converts remote activity payloads (parallel per-type sample arrays plus an
//! activity summary) into the same [`RunRecord`] the track parser produces.
//!
//! Payloads are validated into a typed [`RemoteStreamSet`] at the boundary.
//! Three payload shapes are accepted:
//!
//! ```text
//! { "latlng": [[lat, lng], ...], "time": [0, 5, ...] }                 flat
//! { "latlng": { "data": [[lat, lng], ...] }, "time": { "data": [...] } } keyed by type
//! [ { "type": "latlng", "data": [...] }, { "type": "time", ... } ]     list
//! ```

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::UnitSystem;
use crate::error::{StreamError, StreamProblem};
use crate::metrics::average_pace;
use crate::{GeoPoint, RunOrigin, RunRecord, Track};

/// Longest time offset accepted in a stream, in seconds (30 days).
const MAX_OFFSET_SECONDS: f64 = 30.0 * 86_400.0;

/// Activity summary from the remote listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteActivitySummary {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Meters
    #[serde(default)]
    pub distance: f64,
    /// Seconds
    #[serde(default)]
    pub moving_time: u64,
    /// Seconds, including pauses
    #[serde(default)]
    pub elapsed_time: Option<u64>,
    /// Meters
    #[serde(default)]
    pub total_elevation_gain: f64,
    pub start_date: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub sport_type: Option<String>,
    #[serde(default)]
    pub average_heartrate: Option<f64>,
}

impl RemoteActivitySummary {
    /// True if either the sport type or the legacy type is one of `running_types`.
    pub fn is_run(&self, running_types: &[String]) -> bool {
        [self.sport_type.as_deref(), self.activity_type.as_deref()]
            .into_iter()
            .flatten()
            .any(|t| running_types.iter().any(|r| r.eq_ignore_ascii_case(t)))
    }

    /// Synthetic source file used for remote runs.
    pub fn source_file(&self) -> String {
        format!("remote-{}", self.id)
    }
}

/// Validated, equal-length sample arrays for one activity.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStreamSet {
    pub latlng: Vec<[f64; 2]>,
    /// Seconds from activity start
    pub time: Vec<f64>,
    pub altitude: Option<Vec<f64>>,
    /// Cumulative meters as reported by the remote
    pub distance: Option<Vec<f64>>,
    pub heartrate: Option<Vec<f64>>,
}

enum Field<T> {
    Missing,
    Malformed,
    Present(T),
}

impl RemoteStreamSet {
    /// Validate a raw payload. Every structural problem is reported, not just the first.
    pub fn from_payload(payload: &Value) -> Result<Self, StreamError> {
        let mut problems = Vec::new();

        let latlng = required(&mut problems, "latlng", extract(payload, "latlng", parse_pairs));
        let time = match required(&mut problems, "time", extract(payload, "time", parse_numbers)) {
            Some(time) if !time.iter().all(|t| t.is_finite() && (0.0..=MAX_OFFSET_SECONDS).contains(t)) => {
                problems.push(StreamProblem::Malformed("time"));
                None
            }
            time => time,
        };

        let expected = match (&latlng, &time) {
            (Some(latlng), Some(time)) => {
                if latlng.len() != time.len() {
                    problems.push(StreamProblem::LengthMismatch {
                        field: "time",
                        expected: latlng.len(),
                        actual: time.len(),
                    });
                }
                Some(latlng.len())
            }
            (Some(latlng), None) => Some(latlng.len()),
            _ => None,
        };

        let altitude = optional(&mut problems, "altitude", extract(payload, "altitude", parse_numbers), expected);
        let distance = optional(&mut problems, "distance", extract(payload, "distance", parse_numbers), expected);

        // Heart rate is auxiliary; a bad stream is dropped rather than rejected
        let heartrate = match extract(payload, "heartrate", parse_numbers) {
            Field::Present(hr) if Some(hr.len()) == expected => Some(hr),
            Field::Missing => None,
            _ => {
                debug!("[StreamNormalizer] Dropping unusable heartrate stream");
                None
            }
        };

        match (latlng, time) {
            (Some(latlng), Some(time)) if problems.is_empty() => Ok(Self { latlng, time, altitude, distance, heartrate }),
            _ => Err(StreamError::InvalidStreamData { problems }),
        }
    }

    pub fn len(&self) -> usize {
        self.latlng.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latlng.is_empty()
    }

    /// Build one track whose point timestamps are `start + offset`.
    ///
    /// Samples with out-of-range coordinates or unrepresentable times are skipped.
    pub fn to_track(&self, name: &str, start: DateTime<Utc>) -> Track {
        let points = self
            .latlng
            .iter()
            .zip(&self.time)
            .enumerate()
            .filter_map(|(i, ([lat, lng], offset))| {
                let elevation = self.altitude.as_ref().and_then(|alt| alt.get(i).copied()).unwrap_or(0.0);
                let timestamp = offset_timestamp(start, *offset)?;
                Some(GeoPoint::new(*lat, *lng, elevation, timestamp))
            })
            .filter(GeoPoint::is_valid)
            .collect();
        Track::new(name, points)
    }

    /// Mean of the heart-rate samples, if any.
    pub fn average_heart_rate(&self) -> Option<f64> {
        let hr = self.heartrate.as_ref().filter(|hr| !hr.is_empty())?;
        Some(hr.iter().sum::<f64>() / hr.len() as f64)
    }
}

/// `start + offset` seconds, or `None` if the offset is not finite or overflows.
fn offset_timestamp(start: DateTime<Utc>, offset: f64) -> Option<DateTime<Utc>> {
    let millis = (offset * 1000.0).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 / 2.0 {
        return None;
    }
    start.checked_add_signed(Duration::try_milliseconds(millis as i64)?)
}

fn stream_value<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
    let raw = match payload {
        Value::Object(map) => map.get(key)?,
        Value::Array(items) => items
            .iter()
            .find(|item| item.get("type").and_then(Value::as_str) == Some(key))?,
        _ => return None,
    };
    match raw {
        Value::Object(map) => map.get("data"),
        other => Some(other),
    }
}

fn extract<T>(payload: &Value, key: &str, parse: fn(&Value) -> Option<T>) -> Field<T> {
    match stream_value(payload, key) {
        None | Some(Value::Null) => Field::Missing,
        Some(value) => parse(value).map_or(Field::Malformed, Field::Present),
    }
}

fn parse_numbers(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(Value::as_f64).collect()
}

fn parse_pairs(value: &Value) -> Option<Vec<[f64; 2]>> {
    value
        .as_array()?
        .iter()
        .map(|pair| match pair.as_array()?.as_slice() {
            [lat, lng] => Some([lat.as_f64()?, lng.as_f64()?]),
            _ => None,
        })
        .collect()
}

fn required<T: HasLen>(problems: &mut Vec<StreamProblem>, name: &'static str, field: Field<T>) -> Option<T> {
    match field {
        Field::Missing => {
            problems.push(StreamProblem::Missing(name));
            None
        }
        Field::Malformed => {
            problems.push(StreamProblem::Malformed(name));
            None
        }
        Field::Present(v) if v.sample_count() == 0 => {
            problems.push(StreamProblem::Empty(name));
            None
        }
        Field::Present(v) => Some(v),
    }
}

fn optional(
    problems: &mut Vec<StreamProblem>,
    name: &'static str,
    field: Field<Vec<f64>>,
    expected: Option<usize>,
) -> Option<Vec<f64>> {
    match field {
        Field::Missing => None,
        Field::Malformed => {
            problems.push(StreamProblem::Malformed(name));
            None
        }
        Field::Present(v) => match expected {
            Some(expected) if v.len() != expected => {
                problems.push(StreamProblem::LengthMismatch { field: name, expected, actual: v.len() });
                None
            }
            _ => Some(v),
        },
    }
}

trait HasLen {
    fn sample_count(&self) -> usize;
}

impl<T> HasLen for Vec<T> {
    fn sample_count(&self) -> usize {
        self.len()
    }
}

// ============================================================================
// Conversion
// ============================================================================

/// Build a full run from a summary and validated streams.
pub fn run_from_streams(
    summary: &RemoteActivitySummary,
    streams: &RemoteStreamSet,
    units: UnitSystem,
) -> Result<RunRecord, StreamError> {
    let name = if summary.name.is_empty() { "Run" } else { summary.name.as_str() };
    let track = streams.to_track(name, summary.start_date);

    let mut run = RunRecord::from_tracks(summary.source_file(), vec![track], RunOrigin::RemoteSync, Some(summary.id), units)
        .ok_or_else(|| StreamError::InvalidStreamData { problems: vec![StreamProblem::Malformed("latlng")] })?;
    run.average_heart_rate = streams.average_heart_rate().or(summary.average_heartrate);
    Ok(run)
}

/// Validate a raw payload and build a full run from it.
pub fn run_from_payload(
    summary: &RemoteActivitySummary,
    payload: &Value,
    units: UnitSystem,
) -> Result<RunRecord, StreamError> {
    let streams = RemoteStreamSet::from_payload(payload)?;
    run_from_streams(summary, &streams, units)
}

/// A run with no GPS points, built from the activity summary alone.
pub fn coarse_run(summary: &RemoteActivitySummary, units: UnitSystem) -> RunRecord {
    let duration = summary.moving_time as f64;
    let elapsed = summary.elapsed_time.unwrap_or(summary.moving_time);
    let distance = summary.distance.max(0.0);

    RunRecord {
        source_file: summary.source_file(),
        tracks: vec![],
        total_distance_meters: distance,
        total_duration_seconds: duration,
        elevation_gain_meters: summary.total_elevation_gain.max(0.0),
        elevation_loss_meters: 0.0,
        start_time: summary.start_date,
        end_time: i64::try_from(elapsed)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|d| summary.start_date.checked_add_signed(d))
            .unwrap_or(summary.start_date),
        average_pace: average_pace(duration, distance, units.distance_unit_meters()),
        splits: vec![],
        origin: RunOrigin::RemoteSync,
        remote_id: Some(summary.id),
        tags: Default::default(),
        notes: None,
        average_heart_rate: summary.average_heartrate,
        synthetic_timestamps: false,
        point_stride: 1,
    }
}

/// Outcome of converting one remote activity.
#[derive(Debug, Clone)]
pub enum Conversion {
    Full(RunRecord),
    /// Streams were unusable; the run carries summary metrics only
    Coarse { run: RunRecord, reason: StreamError },
}

impl Conversion {
    pub fn run(&self) -> &RunRecord {
        match self {
            Conversion::Full(run) | Conversion::Coarse { run, .. } => run,
        }
    }

    pub fn into_run(self) -> RunRecord {
        match self {
            Conversion::Full(run) | Conversion::Coarse { run, .. } => run,
        }
    }

    pub fn is_coarse(&self) -> bool {
        matches!(self, Conversion::Coarse { .. })
    }
}

/// Convert an activity, falling back to a coarse run when the streams are invalid.
pub fn run_or_fallback(summary: &RemoteActivitySummary, payload: &Value, units: UnitSystem) -> Conversion {
    match run_from_payload(summary, payload, units) {
        Ok(run) => Conversion::Full(run),
        Err(reason) => {
            warn!("[StreamNormalizer] Activity {}: {}; using summary only", summary.id, reason);
            Conversion::Coarse { run: coarse_run(summary, units), reason }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::METERS_PER_MILE;
    use chrono::TimeZone;
    use serde_json::json;

    fn summary() -> RemoteActivitySummary {
        serde_json::from_value(json!({
            "id": 9001,
            "name": "Tempo",
            "distance": 4828.032,
            "moving_time": 1500,
            "elapsed_time": 1620,
            "total_elevation_gain": 35.5,
            "start_date": "2024-06-01T06:30:00Z",
            "type": "Run",
            "sport_type": "TrailRun",
            "average_heartrate": 151.0
        }))
        .unwrap()
    }

    #[test]
    fn test_is_run_matches_either_type() {
        let s = summary();
        assert!(s.is_run(&["Run".to_string()]));
        assert!(s.is_run(&["trailrun".to_string()]));
        assert!(!s.is_run(&["Ride".to_string()]));
    }

    #[test]
    fn test_flat_payload_builds_timed_track() {
        let payload = json!({
            "latlng": [[40.0, -105.0], [40.001, -105.0], [40.002, -105.0]],
            "time": [0, 30, 60.5],
            "altitude": [1600.0, 1602.0, 1601.0],
            "heartrate": [140, 150, 160]
        });
        let run = run_from_payload(&summary(), &payload, UnitSystem::Imperial).unwrap();
        let points = &run.tracks[0].points;
        assert_eq!(points.len(), 3);
        assert_eq!(run.tracks[0].name, "Tempo");
        assert_eq!(points[2].timestamp, Utc.with_ymd_and_hms(2024, 6, 1, 6, 31, 0).unwrap() + Duration::milliseconds(500));
        assert_eq!(run.elevation_gain_meters, 2.0);
        assert_eq!(run.elevation_loss_meters, 1.0);
        assert_eq!(run.average_heart_rate, Some(150.0));
        assert_eq!(run.identity(), crate::RunIdentity::Remote { remote_id: 9001 });
        assert_eq!(run.source_file, "remote-9001");
    }

    #[test]
    fn test_keyed_and_list_payloads_match_flat() {
        let flat = json!({ "latlng": [[40.0, -105.0], [40.01, -105.0]], "time": [0, 300] });
        let keyed = json!({
            "latlng": { "data": [[40.0, -105.0], [40.01, -105.0]], "series_type": "distance" },
            "time": { "data": [0, 300] }
        });
        let list = json!([
            { "type": "latlng", "data": [[40.0, -105.0], [40.01, -105.0]] },
            { "type": "time", "data": [0, 300] }
        ]);
        let a = RemoteStreamSet::from_payload(&flat).unwrap();
        assert_eq!(a, RemoteStreamSet::from_payload(&keyed).unwrap());
        assert_eq!(a, RemoteStreamSet::from_payload(&list).unwrap());
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_reports_every_problem() {
        let payload = json!({ "time": [], "altitude": "oops" });
        let err = RemoteStreamSet::from_payload(&payload).unwrap_err();
        assert_eq!(
            err.problems(),
            &[
                StreamProblem::Missing("latlng"),
                StreamProblem::Empty("time"),
                StreamProblem::Malformed("altitude"),
            ]
        );
    }

    #[test]
    fn test_length_mismatch_named() {
        let payload = json!({
            "latlng": [[40.0, -105.0], [40.001, -105.0], [40.002, -105.0]],
            "time": [0, 30],
            "distance": [0.0, 111.0, 222.0, 333.0]
        });
        let err = RemoteStreamSet::from_payload(&payload).unwrap_err();
        assert_eq!(
            err.problems(),
            &[
                StreamProblem::LengthMismatch { field: "time", expected: 3, actual: 2 },
                StreamProblem::LengthMismatch { field: "distance", expected: 3, actual: 4 },
            ]
        );
    }

    #[test]
    fn test_mismatched_heartrate_is_dropped() {
        let payload = json!({ "latlng": [[40.0, -105.0], [40.001, -105.0]], "time": [0, 30], "heartrate": [150] });
        let streams = RemoteStreamSet::from_payload(&payload).unwrap();
        assert!(streams.heartrate.is_none());

        // summary average is used instead
        let run = run_from_streams(&summary(), &streams, UnitSystem::Metric).unwrap();
        assert_eq!(run.average_heart_rate, Some(151.0));
    }

    #[test]
    fn test_fallback_uses_summary_metrics() {
        let conversion = run_or_fallback(&summary(), &json!({}), UnitSystem::Imperial);
        assert!(conversion.is_coarse());
        let run = conversion.into_run();
        assert!(run.tracks.is_empty());
        assert_eq!(run.total_distance_meters, 4828.032);
        assert_eq!(run.total_duration_seconds, 1500.0);
        assert_eq!(run.elevation_gain_meters, 35.5);
        assert_eq!(run.end_time - run.start_time, Duration::seconds(1620));
        // 25 minutes over 3 miles
        assert!((run.average_pace - 25.0 / (4828.032 / METERS_PER_MILE)).abs() < 1e-9);
        assert!(run.splits.is_empty());
        assert_eq!(run.remote_id, Some(9001));
    }

    #[test]
    fn test_out_of_range_offsets_fall_back() {
        for bad in [json!([0, 1e18]), json!([0, -30]), json!([0, 3.0e6])] {
            let payload = json!({ "latlng": [[40.0, -105.0], [40.001, -105.0]], "time": bad });
            let err = RemoteStreamSet::from_payload(&payload).unwrap_err();
            assert_eq!(err.problems(), &[StreamProblem::Malformed("time")]);

            let conversion = run_or_fallback(&summary(), &payload, UnitSystem::Metric);
            assert!(conversion.is_coarse());
        }
    }

    #[test]
    fn test_huge_elapsed_time_keeps_start() {
        let mut s = summary();
        s.elapsed_time = Some(u64::MAX);
        let run = coarse_run(&s, UnitSystem::Metric);
        assert_eq!(run.end_time, run.start_time);
    }

    #[test]
    fn test_short_altitude_defaults_to_zero() {
        let streams = RemoteStreamSet {
            latlng: vec![[40.0, -105.0], [40.001, -105.0], [40.002, -105.0]],
            time: vec![0.0, 30.0, 60.0],
            altitude: Some(vec![1600.0]),
            distance: None,
            heartrate: None,
        };
        let track = streams.to_track("hand-built", summary().start_date);
        assert_eq!(track.points.len(), 3);
        assert_eq!(track.points[0].elevation, 1600.0);
        assert_eq!(track.points[2].elevation, 0.0);
    }

    #[test]
    fn test_all_invalid_coordinates_fall_back() {
        let payload = json!({ "latlng": [[123.0, -105.0], [124.0, -105.0]], "time": [0, 30] });
        assert!(run_or_fallback(&summary(), &payload, UnitSystem::Imperial).is_coarse());
    }
}
