//! Engine configuration.
//!
//! All settings are plain structs with sensible defaults, so callers only
//! override what they need:
//!
//! ```rust
//! use run_metrics::{EngineConfig, UnitSystem};
//!
//! let config = EngineConfig {
//!     units: UnitSystem::Metric,
//!     utc_offset_minutes: 60,
//!     ..EngineConfig::default()
//! };
//! assert_eq!(config.persistence.safety_ratio, 0.9);
//! ```

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

pub const METERS_PER_MILE: f64 = 1609.344;
pub const METERS_PER_KILOMETER: f64 = 1000.0;
pub const METERS_PER_FOOT: f64 = 0.3048;

/// Display unit system for paces, splits, goal targets and heatmap values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSystem {
    /// Miles and feet
    #[default]
    Imperial,
    /// Kilometers and meters
    Metric,
}

impl UnitSystem {
    /// Length of one distance unit (and therefore one split) in meters.
    pub fn distance_unit_meters(self) -> f64 {
        match self {
            UnitSystem::Imperial => METERS_PER_MILE,
            UnitSystem::Metric => METERS_PER_KILOMETER,
        }
    }

    /// Length of one elevation unit in meters.
    pub fn elevation_unit_meters(self) -> f64 {
        match self {
            UnitSystem::Imperial => METERS_PER_FOOT,
            UnitSystem::Metric => 1.0,
        }
    }

    pub fn distance_label(self) -> &'static str {
        match self {
            UnitSystem::Imperial => "mi",
            UnitSystem::Metric => "km",
        }
    }

    pub fn elevation_label(self) -> &'static str {
        match self {
            UnitSystem::Imperial => "ft",
            UnitSystem::Metric => "m",
        }
    }

    #[inline]
    pub fn to_distance_units(self, meters: f64) -> f64 {
        meters / self.distance_unit_meters()
    }

    #[inline]
    pub fn to_elevation_units(self, meters: f64) -> f64 {
        meters / self.elevation_unit_meters()
    }
}

/// Storage budget and degradation policy for the run repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Byte quota for all persisted data. `None` defers to the store's own quota.
    pub quota_bytes: Option<usize>,
    /// Fraction of the quota a projected write may use before degrading.
    /// Default: 0.9
    pub safety_ratio: f64,
    /// Only runs that started more than this many days ago are degraded.
    /// Default: 30
    pub degrade_after_days: i64,
    /// Keep-every-Nth factors tried in order on each degraded retry.
    /// Default: [10, 20]
    pub degrade_strides: Vec<u32>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            quota_bytes: None,
            safety_ratio: 0.9,
            degrade_after_days: 30,
            degrade_strides: vec![10, 20],
        }
    }
}

/// Fixed offset for `minutes` east of UTC, falling back to UTC when out of range.
pub fn utc_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub units: UnitSystem,
    /// Offset applied when mapping timestamps onto calendar days
    /// (streaks, buckets, heatmap). Default: 0 (UTC)
    pub utc_offset_minutes: i32,
    pub persistence: PersistenceConfig,
}

impl EngineConfig {
    /// Calendar offset, falling back to UTC when out of range.
    pub fn calendar_offset(&self) -> FixedOffset {
        utc_offset(self.utc_offset_minutes)
    }
}

/// Remote sync settings.
#[cfg(feature = "http")]
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// API root. Default: https://www.strava.com/api/v3
    pub base_url: String,
    /// Activities requested per listing page. Default: 100
    pub per_page: u32,
    /// Minimum spacing between request starts. Default: 1s
    pub min_fetch_interval: std::time::Duration,
    /// 429 responses tolerated per request before giving up. Default: 5
    pub max_rate_limit_retries: u32,
    /// Upper bound for a single rate-limit backoff. Default: 60s
    pub max_backoff: std::time::Duration,
    /// Activity types treated as runs (case-insensitive). Default: Run, TrailRun, VirtualRun
    pub running_types: Vec<String>,
}

#[cfg(feature = "http")]
impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.strava.com/api/v3".to_string(),
            per_page: 100,
            min_fetch_interval: std::time::Duration::from_secs(1),
            max_rate_limit_retries: 5,
            max_backoff: std::time::Duration::from_secs(60),
            running_types: vec!["Run".to_string(), "TrailRun".to_string(), "VirtualRun".to_string()],
        }
    }
}
