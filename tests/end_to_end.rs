//! Upload-to-aggregate flows through the public API.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use run_metrics::import::TrackFile;
use run_metrics::{
    EngineConfig, FileStore, GoalMetric, HeatmapRange, KeyValueStore, MemoryStore, PeriodKind, RunLog, UnitSystem,
};
use tempfile::TempDir;

/// Meters per 0.001 degrees of latitude at R = 6,371,000 m.
const STEP_METERS: f64 = 111.194_926_6;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 20, 0, 0).unwrap()
}

fn metric() -> EngineConfig {
    EngineConfig { units: UnitSystem::Metric, ..EngineConfig::default() }
}

/// Straight northbound run: `points` fixes 0.001 degrees apart, 30 s between fixes.
fn gpx(start: DateTime<Utc>, points: usize) -> String {
    let mut doc = String::from("<gpx><trk><name>Morning Run</name><trkseg>");
    for i in 0..points {
        doc.push_str(&format!(
            r#"<trkpt lat="{:.3}" lon="-105.000"><ele>{}</ele><time>{}</time></trkpt>"#,
            40.0 + i as f64 * 0.001,
            1600 + (i % 2),
            (start + Duration::seconds(i as i64 * 30)).to_rfc3339()
        ));
    }
    doc.push_str("</trkseg></trk></gpx>");
    doc
}

fn june(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, 7, 0, 0).unwrap()
}

fn june_files() -> Vec<TrackFile> {
    vec![
        TrackFile::new("mon.gpx", gpx(june(3), 12)),
        TrackFile::new("tue.gpx", gpx(june(4), 12)),
        TrackFile::new("broken.gpx", "<gpx><trk><trkseg><trkpt lat="),
        TrackFile::new("next-mon.gpx", gpx(june(10), 12)),
    ]
}

#[test]
fn test_upload_aggregate_and_reopen_from_disk() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path(), None).unwrap();
    let mut log = RunLog::open(store, metric()).unwrap().with_clock(now);

    let import = log.import_files(&june_files()).unwrap();
    assert_eq!(import.summary.inserted, 3);
    assert_eq!(import.failed.len(), 1);
    assert_eq!(import.failed[0].0, "broken.gpx");
    assert!(import.summary.achievements_unlocked.contains(&"first_run"));

    let run = &log.runs()[0];
    assert!((run.total_distance_meters - 11.0 * STEP_METERS).abs() < 1.0);
    assert_eq!(run.total_duration_seconds, 330.0);
    assert_eq!(run.splits.len(), 1);
    assert_eq!(run.elevation_gain_meters, 6.0);

    // Re-uploading the same files is a no-op
    let again = log.import_files(&june_files()).unwrap();
    assert_eq!(again.summary.inserted, 0);
    assert_eq!(log.runs().len(), 3);

    // June 3 and 4 share an ISO week; June 10 starts the next one
    let weeks = log.weekly_stats();
    assert_eq!(weeks.len(), 2);
    assert_eq!(weeks[0].label, "2024-W23");
    assert_eq!(weeks[0].run_count, 2);
    assert_eq!(weeks[1].run_count, 1);
    assert_eq!(log.monthly_stats().len(), 1);
    assert_eq!(log.longest_streak(), 2);
    assert_eq!(log.current_streak(), 1);

    let recent = log.recent_periods(PeriodKind::Week, 4);
    assert_eq!(recent.iter().map(|p| p.run_count).collect::<Vec<_>>(), vec![0, 0, 2, 1]);

    let heatmap = log.heatmap(HeatmapRange::All);
    assert_eq!(heatmap.start, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
    assert_eq!(heatmap.cells.len(), 8);
    assert_eq!(heatmap.active_days, 3);

    assert!(dir.path().join("runs.json").exists());
    drop(log);

    let reopened = RunLog::open(FileStore::open(dir.path(), None).unwrap(), metric()).unwrap().with_clock(now);
    assert_eq!(reopened.runs().len(), 3);
    assert!(reopened.unlocked().contains("first_run"));
    assert!((reopened.runs()[2].total_distance_meters - 11.0 * STEP_METERS).abs() < 1.0);
}

#[test]
fn test_goal_progress_tracks_imports_and_deletes() {
    let mut log = RunLog::open(MemoryStore::new(), metric()).unwrap().with_clock(now);
    let (goal_id, _) = log
        .add_goal(GoalMetric::Distance, 3.0, june(1) - Duration::hours(7), june(30))
        .unwrap();

    let import = log.import_files(&june_files()).unwrap();
    assert_eq!(import.summary.goals_completed, vec![goal_id.clone()]);
    assert_eq!(log.goal(&goal_id).unwrap().progress, 3.0);

    let identity = log.runs()[0].identity();
    let change = log.delete_run(&identity).unwrap();
    assert_eq!(change.removed, 1);

    let goal = log.goal(&goal_id).unwrap();
    assert!(goal.completed);
    assert!(goal.progress < 3.0);
}

#[test]
fn test_old_runs_degrade_to_fit_quota() {
    let april: Vec<TrackFile> = (1..=3)
        .map(|day| TrackFile::new(format!("april-{}.gpx", day), gpx(Utc.with_ymd_and_hms(2024, 4, day, 7, 0, 0).unwrap(), 200)))
        .collect();

    // Measure the full-resolution footprint first
    let mut unlimited = RunLog::open(MemoryStore::new(), metric()).unwrap().with_clock(now);
    unlimited.import_files(&april).unwrap();
    let full_bytes = unlimited.repository().store().entry_bytes("runs");
    let original = unlimited.runs().to_vec();

    let quota = full_bytes * 6 / 10;
    let mut log = RunLog::open(MemoryStore::with_quota(quota), metric()).unwrap().with_clock(now);
    let import = log.import_files(&april).unwrap();
    assert_eq!(import.summary.inserted, 3);

    let store = log.repository().store();
    assert!(store.used_bytes() <= quota);
    for (run, before) in log.runs().iter().zip(&original) {
        assert_eq!(run.point_stride, 10);
        assert_eq!(run.point_count(), 21);
        assert_eq!(run.total_distance_meters, before.total_distance_meters);
        assert_eq!(run.splits, before.splits);
        assert_eq!(run.tracks[0].points.first(), before.tracks[0].points.first());
        assert_eq!(run.tracks[0].points.last(), before.tracks[0].points.last());
    }
}
