//! # Track Parser
//!
//! Reads GPX-shaped track markup into [`Track`]s using the quick-xml event reader.
//!
//! - `<trk>` elements become tracks, named by their `<name>` child
//! - `<trkpt lat=".." lon="..">` elements become points; `<ele>` defaults to 0
//! - A missing or unreadable `<time>` falls back to the parse time and marks
//!   the resulting run with `synthetic_timestamps`
//! - Points with non-numeric or out-of-range coordinates are skipped
//!
//! Malformed documents are rejected wholesale.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::config::UnitSystem;
use crate::error::TrackParseError;
use crate::{GeoPoint, RunOrigin, RunRecord, Track};

/// Tracks read from one document, with parse diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTracks {
    /// Tracks with at least one valid point, in document order
    pub tracks: Vec<Track>,
    /// Points whose timestamp fell back to the parse time
    pub synthetic_points: usize,
    /// Points dropped for missing or invalid coordinates
    pub skipped_points: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TextField {
    TrackName,
    Elevation,
    Time,
}

#[derive(Debug, Default)]
struct PointBuilder {
    latitude: Option<f64>,
    longitude: Option<f64>,
    elevation: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct TrackBuilder {
    name: String,
    points: Vec<GeoPoint>,
}

/// Parse a track document. Every point without a usable timestamp gets `parsed_at`.
pub fn parse_track_document(markup: &str, parsed_at: DateTime<Utc>) -> Result<ParsedTracks, TrackParseError> {
    let mut reader = Reader::from_str(markup);
    reader.trim_text(true);

    let mut depth: usize = 0;
    let mut saw_root = false;
    let mut tracks: Vec<Track> = Vec::new();
    let mut track: Option<TrackBuilder> = None;
    let mut point: Option<PointBuilder> = None;
    let mut field: Option<TextField> = None;
    let mut text = String::new();
    let mut synthetic_points = 0;
    let mut skipped_points = 0;
    let mut track_count = 0;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| TrackParseError::Malformed(format!("at byte {}: {}", reader.buffer_position(), e)))?;

        match event {
            Event::Start(ref e) => {
                depth += 1;
                saw_root = true;
                match e.local_name().as_ref() {
                    b"trk" => {
                        track_count += 1;
                        track = Some(TrackBuilder::default());
                    }
                    b"trkpt" if track.is_some() => point = Some(start_point(e)?),
                    b"name" if track.is_some() && point.is_none() => field = Some(TextField::TrackName),
                    b"ele" if point.is_some() => field = Some(TextField::Elevation),
                    b"time" if point.is_some() => field = Some(TextField::Time),
                    _ => {}
                }
                text.clear();
            }
            Event::Empty(ref e) => {
                saw_root = true;
                if e.local_name().as_ref() == b"trkpt" {
                    if let Some(t) = track.as_mut() {
                        let p = start_point(e)?;
                        finish_point(p, t, parsed_at, &mut synthetic_points, &mut skipped_points);
                    }
                }
            }
            Event::Text(ref e) if field.is_some() => {
                let value = e.unescape().map_err(|e| TrackParseError::Malformed(e.to_string()))?;
                text.push_str(&value);
            }
            Event::CData(ref e) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(e));
            }
            Event::End(ref e) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| TrackParseError::Malformed("unexpected closing tag".to_string()))?;
                match e.local_name().as_ref() {
                    b"trk" => {
                        if let Some(t) = track.take() {
                            if t.points.is_empty() {
                                debug!("[TrackParser] Dropping track {} with no valid points", track_count);
                            } else {
                                let name = if t.name.is_empty() { format!("Track {}", track_count) } else { t.name };
                                tracks.push(Track::new(name, t.points));
                            }
                        }
                    }
                    b"trkpt" => {
                        if let (Some(p), Some(t)) = (point.take(), track.as_mut()) {
                            finish_point(p, t, parsed_at, &mut synthetic_points, &mut skipped_points);
                        }
                    }
                    _ => {}
                }

                if let Some(f) = field.take() {
                    apply_text(f, text.trim(), track.as_mut(), point.as_mut());
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(TrackParseError::Malformed("no root element".to_string()));
    }
    if depth != 0 {
        return Err(TrackParseError::Malformed(format!("{} unclosed element(s)", depth)));
    }
    if tracks.is_empty() {
        return Err(TrackParseError::NoUsableTracks);
    }

    Ok(ParsedTracks { tracks, synthetic_points, skipped_points })
}

/// Parse raw bytes, rejecting anything that is not UTF-8.
pub fn parse_track_bytes(bytes: &[u8], parsed_at: DateTime<Utc>) -> Result<ParsedTracks, TrackParseError> {
    let markup = std::str::from_utf8(bytes).map_err(|_| TrackParseError::InvalidUtf8)?;
    parse_track_document(markup, parsed_at)
}

/// Parse a document into an uploaded [`RunRecord`].
pub fn try_parse_run(
    source_file: &str,
    markup: &str,
    units: UnitSystem,
    parsed_at: DateTime<Utc>,
) -> Result<RunRecord, TrackParseError> {
    let parsed = parse_track_document(markup, parsed_at)?;
    into_run(source_file, parsed, units)
}

pub(crate) fn into_run(source_file: &str, parsed: ParsedTracks, units: UnitSystem) -> Result<RunRecord, TrackParseError> {
    if parsed.skipped_points > 0 {
        debug!("[TrackParser] {}: skipped {} points with invalid coordinates", source_file, parsed.skipped_points);
    }

    let mut run = RunRecord::from_tracks(source_file, parsed.tracks, RunOrigin::Upload, None, units)
        .ok_or(TrackParseError::NoUsableTracks)?;

    if parsed.synthetic_points > 0 {
        warn!(
            "[TrackParser] {}: {} points had no timestamp, using parse time; duration and pace are unreliable",
            source_file, parsed.synthetic_points
        );
        run.synthetic_timestamps = true;
    }

    Ok(run)
}

/// Parse a document into an uploaded run, or `None` (logged) when it is unusable.
pub fn parse_run(source_file: &str, markup: &str, units: UnitSystem) -> Option<RunRecord> {
    match try_parse_run(source_file, markup, units, Utc::now()) {
        Ok(run) => Some(run),
        Err(e) => {
            warn!("[TrackParser] Skipping {}: {}", source_file, e);
            None
        }
    }
}

fn start_point(e: &BytesStart) -> Result<PointBuilder, TrackParseError> {
    let mut builder = PointBuilder::default();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| TrackParseError::Malformed(e.to_string()))?;
        let value = attr.unescape_value().map_err(|e| TrackParseError::Malformed(e.to_string()))?;
        match attr.key.local_name().as_ref() {
            b"lat" => builder.latitude = value.trim().parse().ok(),
            b"lon" => builder.longitude = value.trim().parse().ok(),
            _ => {}
        }
    }
    Ok(builder)
}

fn apply_text(field: TextField, value: &str, track: Option<&mut TrackBuilder>, point: Option<&mut PointBuilder>) {
    match (field, track, point) {
        (TextField::TrackName, Some(t), _) => t.name = value.to_string(),
        (TextField::Elevation, _, Some(p)) => p.elevation = value.parse().ok(),
        (TextField::Time, _, Some(p)) => p.timestamp = parse_timestamp(value),
        _ => {}
    }
}

fn finish_point(
    builder: PointBuilder,
    track: &mut TrackBuilder,
    parsed_at: DateTime<Utc>,
    synthetic_points: &mut usize,
    skipped_points: &mut usize,
) {
    let (Some(latitude), Some(longitude)) = (builder.latitude, builder.longitude) else {
        *skipped_points += 1;
        return;
    };

    let timestamp = builder.timestamp.unwrap_or_else(|| {
        *synthetic_points += 1;
        parsed_at
    });

    let point = GeoPoint::new(latitude, longitude, builder.elevation.unwrap_or(0.0), timestamp);
    if point.is_valid() {
        track.points.push(point);
    } else {
        *skipped_points += 1;
    }
}

/// RFC 3339, or a zone-less ISO-8601 timestamp read as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
