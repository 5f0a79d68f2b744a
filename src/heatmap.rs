//! Calendar heatmap generation.
//!
//! Builds a dense grid of daily cells over a display window:
//! - Total distance per calendar day (in the configured unit)
//! - A 0-4 intensity level relative to the busiest day in the window
//! - References to the runs on each day for drill-down
//!
//! Every day in the window gets a cell, including days without runs.

use chrono::{Duration, FixedOffset, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::aggregation::calendar_date;
use crate::config::{utc_offset, UnitSystem};
use crate::RunRecord;

/// Which days the heatmap covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatmapRange {
    /// The six months up to and including today
    Recent,
    /// The 365 days up to and including today
    Year,
    /// First run date through last run date
    All,
    /// Explicit inclusive range
    Custom { start: NaiveDate, end: NaiveDate },
}

/// Configuration for heatmap generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapConfig {
    /// Display window (default: Recent)
    pub range: HeatmapRange,
    /// Unit for cell values (default: Imperial)
    pub units: UnitSystem,
    /// Offset used to assign runs to calendar days (default: 0)
    pub utc_offset_minutes: i32,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            range: HeatmapRange::Recent,
            units: UnitSystem::default(),
            utc_offset_minutes: 0,
        }
    }
}

impl HeatmapConfig {
    fn offset(&self) -> FixedOffset {
        utc_offset(self.utc_offset_minutes)
    }
}

/// A single day in the heatmap grid
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapCell<'a> {
    pub date: NaiveDate,
    /// Total distance that day, in the configured unit
    pub value: f64,
    /// 0 (no running) through 4 (busiest)
    pub level: u8,
    pub runs: Vec<&'a RunRecord>,
}

/// Complete heatmap result
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapResult<'a> {
    /// One cell per day from `start` to `end`, in order
    pub cells: Vec<HeatmapCell<'a>>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Largest cell value, used for level normalization
    pub max_value: f64,
    /// Summary stats
    pub total_value: f64,
    pub active_days: usize,
}

/// Intensity level for `value` relative to `max_value`.
///
/// 0 at ratio 0, then 1-4 for ratios below 0.2, 0.4, 0.7 and up to 1.0.
pub fn intensity_level(value: f64, max_value: f64) -> u8 {
    if value <= 0.0 || max_value <= 0.0 {
        return 0;
    }
    let ratio = value / max_value;
    if ratio < 0.2 {
        1
    } else if ratio < 0.4 {
        2
    } else if ratio < 0.7 {
        3
    } else {
        4
    }
}

/// Resolve the display window for `range`. `None` when `All` has no runs to span.
pub fn display_window(range: HeatmapRange, runs: &[RunRecord], today: NaiveDate, offset: FixedOffset) -> Option<(NaiveDate, NaiveDate)> {
    match range {
        HeatmapRange::Recent => Some((today.checked_sub_months(Months::new(6)).unwrap_or(today), today)),
        HeatmapRange::Year => Some((today - Duration::days(364), today)),
        HeatmapRange::All => {
            let dates = runs.iter().map(|r| calendar_date(r.start_time, offset));
            let first = dates.clone().min()?;
            let last = dates.max()?;
            Some((first, last))
        }
        HeatmapRange::Custom { start, end } if start <= end => Some((start, end)),
        HeatmapRange::Custom { start, end } => Some((end, start)),
    }
}

/// Generate a dense daily heatmap from runs.
pub fn generate_heatmap<'a>(runs: &'a [RunRecord], today: NaiveDate, config: &HeatmapConfig) -> HeatmapResult<'a> {
    let offset = config.offset();

    let Some((start, end)) = display_window(config.range, runs, today, offset) else {
        return HeatmapResult {
            cells: vec![],
            start: today,
            end: today,
            max_value: 0.0,
            total_value: 0.0,
            active_days: 0,
        };
    };

    // Per-day totals within the window
    let mut days: BTreeMap<NaiveDate, (f64, Vec<&'a RunRecord>)> = BTreeMap::new();
    for run in runs {
        let date = calendar_date(run.start_time, offset);
        if date < start || date > end {
            continue;
        }
        let entry = days.entry(date).or_default();
        entry.0 += config.units.to_distance_units(run.total_distance_meters);
        entry.1.push(run);
    }

    let max_value = days.values().map(|(v, _)| *v).fold(0.0, f64::max);

    let cells: Vec<HeatmapCell<'a>> = start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| {
            let (value, mut runs) = days.remove(&date).unwrap_or_default();
            runs.sort_by_key(|r| r.start_time);
            HeatmapCell { date, value, level: intensity_level(value, max_value), runs }
        })
        .collect();

    let total_value = cells.iter().map(|c| c.value).sum();
    let active_days = cells.iter().filter(|c| !c.runs.is_empty()).count();

    HeatmapResult { cells, start, end, max_value, total_value, active_days }
}

/// Look up the cell for `date`.
pub fn query_heatmap_cell<'r, 'a>(heatmap: &'r HeatmapResult<'a>, date: NaiveDate) -> Option<&'r HeatmapCell<'a>> {
    if date < heatmap.start || date > heatmap.end {
        return None;
    }
    let index = (date - heatmap.start).num_days() as usize;
    heatmap.cells.get(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::METERS_PER_KILOMETER;
    use crate::{RunOrigin, RunRecord};
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn run_on(day: NaiveDate, hour: u32, km: f64) -> RunRecord {
        let start = Utc.from_utc_datetime(&day.and_hms_opt(hour, 0, 0).unwrap());
        RunRecord {
            source_file: format!("{}-{}.gpx", day, hour),
            tracks: vec![],
            total_distance_meters: km * METERS_PER_KILOMETER,
            total_duration_seconds: km * 300.0,
            elevation_gain_meters: 0.0,
            elevation_loss_meters: 0.0,
            start_time: start,
            end_time: start + Duration::seconds((km * 300.0) as i64),
            average_pace: 5.0,
            splits: vec![],
            origin: RunOrigin::Upload,
            remote_id: None,
            tags: Default::default(),
            notes: None,
            average_heart_rate: None,
            synthetic_timestamps: false,
            point_stride: 1,
        }
    }

    fn metric(range: HeatmapRange) -> HeatmapConfig {
        HeatmapConfig { range, units: UnitSystem::Metric, ..HeatmapConfig::default() }
    }

    #[test]
    fn test_intensity_levels() {
        assert_eq!(intensity_level(0.0, 10.0), 0);
        assert_eq!(intensity_level(1.0, 10.0), 1);
        assert_eq!(intensity_level(2.0, 10.0), 2);
        assert_eq!(intensity_level(3.9, 10.0), 2);
        assert_eq!(intensity_level(4.0, 10.0), 3);
        assert_eq!(intensity_level(7.0, 10.0), 4);
        assert_eq!(intensity_level(10.0, 10.0), 4);
        assert_eq!(intensity_level(5.0, 0.0), 0);
    }

    #[test]
    fn test_dense_fill_over_ten_days() {
        let runs = vec![run_on(date(2024, 6, 2), 7, 5.0), run_on(date(2024, 6, 8), 7, 10.0)];
        let range = HeatmapRange::Custom { start: date(2024, 6, 1), end: date(2024, 6, 10) };
        let result = generate_heatmap(&runs, date(2024, 6, 10), &metric(range));

        assert_eq!(result.cells.len(), 10);
        assert_eq!(result.cells.iter().filter(|c| c.value == 0.0).count(), 8);
        assert_eq!(result.max_value, 10.0);
        assert_eq!(result.active_days, 2);
        assert_eq!(result.total_value, 15.0);

        let busy = query_heatmap_cell(&result, date(2024, 6, 8)).unwrap();
        assert_eq!(busy.level, 4);
        assert_eq!(busy.runs.len(), 1);
        assert_eq!(query_heatmap_cell(&result, date(2024, 6, 2)).unwrap().level, 3);
        assert!(query_heatmap_cell(&result, date(2024, 6, 11)).is_none());
    }

    #[test]
    fn test_same_day_runs_are_summed() {
        let day = date(2024, 6, 5);
        let runs = vec![run_on(day, 6, 3.0), run_on(day, 18, 4.0)];
        let range = HeatmapRange::Custom { start: day, end: day };
        let result = generate_heatmap(&runs, day, &metric(range));
        assert_eq!(result.cells.len(), 1);
        assert_eq!(result.cells[0].value, 7.0);
        assert_eq!(result.cells[0].runs[0].start_time.format("%H").to_string(), "06");
    }

    #[test]
    fn test_year_and_recent_windows() {
        let today = date(2024, 8, 31);
        let year = generate_heatmap(&[], today, &metric(HeatmapRange::Year));
        assert_eq!(year.cells.len(), 365);
        assert_eq!(year.end, today);

        let recent = generate_heatmap(&[], today, &metric(HeatmapRange::Recent));
        assert_eq!(recent.start, date(2024, 2, 29));
        assert_eq!(recent.cells.last().unwrap().date, today);
    }

    #[test]
    fn test_all_range_spans_data() {
        let runs = vec![run_on(date(2024, 3, 1), 7, 5.0), run_on(date(2024, 3, 20), 7, 5.0)];
        let result = generate_heatmap(&runs, date(2024, 6, 1), &metric(HeatmapRange::All));
        assert_eq!(result.start, date(2024, 3, 1));
        assert_eq!(result.end, date(2024, 3, 20));
        assert_eq!(result.cells.len(), 20);

        let empty = generate_heatmap(&[], date(2024, 6, 1), &metric(HeatmapRange::All));
        assert!(empty.cells.is_empty());
    }

    #[test]
    fn test_runs_outside_window_ignored() {
        let runs = vec![run_on(date(2023, 1, 1), 7, 50.0), run_on(date(2024, 6, 1), 7, 5.0)];
        let result = generate_heatmap(&runs, date(2024, 6, 1), &metric(HeatmapRange::Recent));
        assert_eq!(result.max_value, 5.0);
        assert_eq!(result.active_days, 1);
    }
}
