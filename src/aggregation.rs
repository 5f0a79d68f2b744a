//! # Aggregation
//!
//! Buckets runs into ISO weeks (Monday start), calendar months or custom date
//! ranges. Calendar dates are taken at a fixed UTC offset so a late-evening run
//! lands on the day the runner experienced it.
//!
//! Bucket pace is computed from bucket totals (distance-weighted), never by
//! averaging per-run paces.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::UnitSystem;
use crate::metrics::average_pace;
use crate::RunRecord;

/// Calendar date of `ts` at `offset`.
pub fn calendar_date(ts: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    ts.with_timezone(&offset).date_naive()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    /// ISO week, Monday through Sunday
    Week,
    Month,
}

impl PeriodKind {
    /// First day of the period containing `date`.
    pub fn period_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            PeriodKind::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            PeriodKind::Month => date.with_day(1).unwrap_or(date),
        }
    }

    /// Last day (inclusive) of the period starting at `start`.
    pub fn period_end(self, start: NaiveDate) -> NaiveDate {
        match self {
            PeriodKind::Week => start + Duration::days(6),
            PeriodKind::Month => start
                .checked_add_months(Months::new(1))
                .and_then(|next| next.pred_opt())
                .unwrap_or(start),
        }
    }

    /// Start of the period before the one starting at `start`.
    pub fn previous_start(self, start: NaiveDate) -> NaiveDate {
        match self {
            PeriodKind::Week => start - Duration::days(7),
            PeriodKind::Month => start.checked_sub_months(Months::new(1)).unwrap_or(start),
        }
    }

    /// `2024-W05` for weeks (ISO year), `January 2024` for months.
    pub fn label(self, start: NaiveDate) -> String {
        match self {
            PeriodKind::Week => {
                let week = start.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            PeriodKind::Month => start.format("%B %Y").to_string(),
        }
    }
}

/// Totals for one time bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodStats<'a> {
    pub label: String,
    pub start_date: NaiveDate,
    /// Inclusive
    pub end_date: NaiveDate,
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    pub total_elevation_meters: f64,
    /// Minutes per distance unit, from the bucket totals
    pub average_pace: f64,
    pub run_count: usize,
    pub runs: Vec<&'a RunRecord>,
}

impl<'a> PeriodStats<'a> {
    fn empty(label: String, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            label,
            start_date,
            end_date,
            total_distance_meters: 0.0,
            total_duration_seconds: 0.0,
            total_elevation_meters: 0.0,
            average_pace: 0.0,
            run_count: 0,
            runs: Vec::new(),
        }
    }

    fn add(&mut self, run: &'a RunRecord) {
        self.total_distance_meters += run.total_distance_meters;
        self.total_duration_seconds += run.total_duration_seconds;
        self.total_elevation_meters += run.elevation_gain_meters;
        self.run_count += 1;
        self.runs.push(run);
    }

    fn finish(mut self, units: UnitSystem) -> Self {
        self.average_pace = average_pace(self.total_duration_seconds, self.total_distance_meters, units.distance_unit_meters());
        self.runs.sort_by_key(|r| r.start_time);
        self
    }

    /// Total distance in the display unit.
    pub fn distance(&self, units: UnitSystem) -> f64 {
        units.to_distance_units(self.total_distance_meters)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Group runs into periods. Only periods with at least one run are returned,
/// in chronological order.
pub fn bucket_runs<'a>(
    runs: &'a [RunRecord],
    kind: PeriodKind,
    offset: FixedOffset,
    units: UnitSystem,
) -> Vec<PeriodStats<'a>> {
    let mut buckets: BTreeMap<NaiveDate, PeriodStats<'a>> = BTreeMap::new();

    for run in runs {
        let start = kind.period_start(calendar_date(run.start_time, offset));
        buckets
            .entry(start)
            .or_insert_with(|| PeriodStats::empty(kind.label(start), start, kind.period_end(start)))
            .add(run);
    }

    buckets.into_values().map(|b| b.finish(units)).collect()
}

pub fn weekly_stats<'a>(runs: &'a [RunRecord], offset: FixedOffset, units: UnitSystem) -> Vec<PeriodStats<'a>> {
    bucket_runs(runs, PeriodKind::Week, offset, units)
}

pub fn monthly_stats<'a>(runs: &'a [RunRecord], offset: FixedOffset, units: UnitSystem) -> Vec<PeriodStats<'a>> {
    bucket_runs(runs, PeriodKind::Month, offset, units)
}

/// Totals for an arbitrary inclusive date range.
pub fn custom_period<'a>(
    runs: &'a [RunRecord],
    start: NaiveDate,
    end: NaiveDate,
    offset: FixedOffset,
    units: UnitSystem,
) -> PeriodStats<'a> {
    let mut stats = PeriodStats::empty(format!("{} to {}", start, end), start, end);
    for run in runs {
        if stats.contains(calendar_date(run.start_time, offset)) {
            stats.add(run);
        }
    }
    stats.finish(units)
}

/// The last `count` periods ending with the one containing `today`, oldest
/// first. Periods without runs are included with zero totals.
pub fn recent_periods<'a>(
    runs: &'a [RunRecord],
    kind: PeriodKind,
    count: usize,
    today: NaiveDate,
    offset: FixedOffset,
    units: UnitSystem,
) -> Vec<PeriodStats<'a>> {
    let mut starts = Vec::with_capacity(count);
    let mut start = kind.period_start(today);
    for _ in 0..count {
        starts.push(start);
        start = kind.previous_start(start);
    }
    starts.reverse();

    let Some(&first) = starts.first() else {
        return vec![];
    };

    let mut filled: BTreeMap<NaiveDate, PeriodStats<'a>> = starts
        .iter()
        .map(|&s| (s, PeriodStats::empty(kind.label(s), s, kind.period_end(s))))
        .collect();

    for run in runs {
        let date = calendar_date(run.start_time, offset);
        if date < first || date > today {
            continue;
        }
        if let Some(bucket) = filled.get_mut(&kind.period_start(date)) {
            bucket.add(run);
        }
    }

    filled.into_values().map(|b| b.finish(units)).collect()
}
