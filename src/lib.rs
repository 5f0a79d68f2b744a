//! # Run Metrics
//!
//! GPS run ingestion, metrics and training aggregates.
//!
//! This library provides:
//! - Track markup parsing and remote stream normalization into one canonical [`RunRecord`]
//! - Haversine distance, elevation, pace and per-unit-distance splits
//! - A deduplicating run repository with quota-aware persistence
//! - Weekly/monthly buckets, calendar heatmaps, goal progress and achievements
//!
//! ## Features
//!
//! - **`parallel`** - Parse batches of uploaded files in parallel with rayon
//! - **`http`** - Enable the remote API client and sync driver
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use run_metrics::{track_parser, UnitSystem};
//!
//! let gpx = r#"<gpx><trk><name>Lunch Run</name><trkseg>
//!     <trkpt lat="51.5000" lon="-0.1200"><ele>10</ele><time>2024-03-01T12:00:00Z</time></trkpt>
//!     <trkpt lat="51.5100" lon="-0.1200"><ele>12</ele><time>2024-03-01T12:06:00Z</time></trkpt>
//! </trkseg></trk></gpx>"#;
//!
//! let run = track_parser::parse_run("lunch.gpx", gpx, UnitSystem::Metric).unwrap();
//! println!("{:.0}m at {:.2} min/km", run.total_distance_meters, run.average_pace);
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub mod config;
pub mod error;
pub mod geo_utils;
pub mod metrics;
pub mod track_parser;
pub mod streams;
pub mod storage;
pub mod repository;
pub mod aggregation;
pub mod heatmap;
pub mod goals;
pub mod achievements;
pub mod import;
pub mod run_log;

// HTTP module for remote activity fetching
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod sync;

pub use config::{EngineConfig, PersistenceConfig, UnitSystem};
pub use error::{Error, Result};
pub use geo_utils::Bounds;
pub use metrics::RunMetrics;
pub use repository::RunRepository;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use aggregation::{PeriodKind, PeriodStats};
pub use heatmap::{HeatmapCell, HeatmapConfig, HeatmapRange, HeatmapResult, generate_heatmap};
pub use goals::{Goal, GoalMetric};
pub use achievements::{Achievement, AchievementStats, ACHIEVEMENTS};
pub use run_log::{ChangeSummary, RunLog};

#[cfg(feature = "http")]
pub use http::RemoteClient;
#[cfg(feature = "http")]
pub use sync::{CancelFlag, StopReason, SyncDriver, SyncEvent, SyncSummary};

// ============================================================================
// Core Types
// ============================================================================

/// A timestamped GPS fix with elevation.
///
/// # Example
/// ```
/// use run_metrics::GeoPoint;
/// use chrono::Utc;
///
/// let point = GeoPoint::new(51.5074, -0.1278, 11.0, Utc::now()); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level, 0 when the source had none
    pub elevation: f64,
    pub timestamp: DateTime<Utc>,
}

impl GeoPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64, elevation: f64, timestamp: DateTime<Utc>) -> Self {
        Self { latitude, longitude, elevation, timestamp }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A named, ordered sequence of points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub points: Vec<GeoPoint>,
}

impl Track {
    pub fn new(name: impl Into<String>, points: Vec<GeoPoint>) -> Self {
        Self { name: name.into(), points }
    }
}

/// Stats for one completed unit-distance segment of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MileSplit {
    /// 1-based position of the split within the run
    pub index: u32,
    /// Minutes per distance unit
    pub pace: f64,
    pub duration_seconds: f64,
    pub elevation_gain: f64,
    pub elevation_loss: f64,
    /// Cumulative meters at the split's first point
    pub start_distance: f64,
    /// Cumulative meters at the point that crossed the threshold
    pub end_distance: f64,
}

/// Which ingestion path produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOrigin {
    Upload,
    RemoteSync,
}

/// Deduplication key for a [`RunRecord`].
///
/// Remote runs are identified by their provider id alone, uploads by the
/// source file and the run's start time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunIdentity {
    Upload { source_file: String, start_time: DateTime<Utc> },
    Remote { remote_id: u64 },
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunIdentity::Upload { source_file, start_time } => {
                write!(f, "upload:{}@{}", source_file, start_time.to_rfc3339())
            }
            RunIdentity::Remote { remote_id } => write!(f, "remote:{}", remote_id),
        }
    }
}

fn full_stride() -> u32 {
    1
}

/// The canonical run record both ingestion paths converge to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Uploaded file name, or a synthetic name for remote runs
    pub source_file: String,
    pub tracks: Vec<Track>,
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    pub elevation_gain_meters: f64,
    #[serde(default)]
    pub elevation_loss_meters: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Minutes per distance unit
    pub average_pace: f64,
    pub splits: Vec<MileSplit>,
    pub origin: RunOrigin,
    pub remote_id: Option<u64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub average_heart_rate: Option<f64>,
    /// True when some points had no timestamp and used the parse time instead.
    /// Duration and pace of such runs are unreliable.
    #[serde(default)]
    pub synthetic_timestamps: bool,
    /// Keep-every-Nth factor applied by storage degradation (1 = full resolution)
    #[serde(default = "full_stride")]
    pub point_stride: u32,
}

impl RunRecord {
    /// Build a record from parsed tracks, computing all derived metrics.
    ///
    /// Returns `None` if the tracks contain no points.
    pub fn from_tracks(
        source_file: impl Into<String>,
        tracks: Vec<Track>,
        origin: RunOrigin,
        remote_id: Option<u64>,
        units: UnitSystem,
    ) -> Option<Self> {
        let metrics = RunMetrics::from_tracks(&tracks, units)?;

        Some(Self {
            source_file: source_file.into(),
            tracks,
            total_distance_meters: metrics.total_distance_meters,
            total_duration_seconds: metrics.total_duration_seconds,
            elevation_gain_meters: metrics.elevation_gain_meters,
            elevation_loss_meters: metrics.elevation_loss_meters,
            start_time: metrics.start_time,
            end_time: metrics.end_time,
            average_pace: metrics.average_pace,
            splits: metrics.splits,
            origin,
            remote_id,
            tags: BTreeSet::new(),
            notes: None,
            average_heart_rate: None,
            synthetic_timestamps: false,
            point_stride: 1,
        })
    }

    /// The deduplication key of this run.
    pub fn identity(&self) -> RunIdentity {
        match (self.origin, self.remote_id) {
            (RunOrigin::RemoteSync, Some(remote_id)) => RunIdentity::Remote { remote_id },
            _ => RunIdentity::Upload {
                source_file: self.source_file.clone(),
                start_time: self.start_time,
            },
        }
    }

    /// Total number of GPS points across all tracks.
    pub fn point_count(&self) -> usize {
        self.tracks.iter().map(|t| t.points.len()).sum()
    }

    /// Name of the first track, falling back to the source file.
    pub fn display_name(&self) -> &str {
        self.tracks
            .first()
            .map(|t| t.name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.source_file)
    }

    /// Calendar date the run started on, at the given UTC offset.
    pub fn start_date(&self, offset: FixedOffset) -> NaiveDate {
        aggregation::calendar_date(self.start_time, offset)
    }

    /// Bounding box of every point in the run.
    pub fn bounds(&self) -> Option<Bounds> {
        geo_utils::compute_bounds(self.tracks.iter().flat_map(|t| t.points.iter()))
    }

    /// Centroid of every point in the run, as (latitude, longitude).
    pub fn center(&self) -> Option<(f64, f64)> {
        geo_utils::compute_center(self.tracks.iter().flat_map(|t| t.points.iter()))
    }
}

// ============================================================================
// Tests
// ============================================================================
