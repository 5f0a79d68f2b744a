//! Import GPX files into a run log and print weekly totals.
//!
//! Run with: cargo run --example import_gpx -- path/to/run.gpx [more.gpx ...]
//!
//! Without arguments a generated sample week is imported instead.

use chrono::{Duration, TimeZone, Utc};
use run_metrics::import::TrackFile;
use run_metrics::{EngineConfig, HeatmapRange, MemoryStore, PeriodKind, RunLog, UnitSystem};
use std::time::Instant;

/// A straight northbound run of `points` fixes, ~11 m apart, one every 4 seconds.
fn sample_gpx(day: u32, points: usize) -> String {
    let start = Utc.with_ymd_and_hms(2024, 6, day, 6, 30, 0).unwrap();
    let mut gpx = String::from("<gpx><trk><name>Morning Run</name><trkseg>");
    for i in 0..points {
        let ts = start + Duration::seconds(i as i64 * 4);
        gpx.push_str(&format!(
            r#"<trkpt lat="{:.6}" lon="-0.127800"><ele>{:.1}</ele><time>{}</time></trkpt>"#,
            51.5 + i as f64 * 0.0001,
            10.0 + (i as f64 / 20.0).sin() * 5.0,
            ts.to_rfc3339()
        ));
    }
    gpx.push_str("</trkseg></trk></gpx>");
    gpx
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let files: Vec<TrackFile> = if args.is_empty() {
        println!("No files given, importing a generated sample week\n");
        (3..=9).map(|day| TrackFile::new(format!("june-{}.gpx", day), sample_gpx(day, 600 + day as usize * 40))).collect()
    } else {
        args.iter()
            .filter_map(|path| match std::fs::read(path) {
                Ok(bytes) => Some(TrackFile::new(path.clone(), bytes)),
                Err(e) => {
                    eprintln!("Cannot read {}: {}", path, e);
                    None
                }
            })
            .collect()
    };

    let config = EngineConfig { units: UnitSystem::Metric, ..EngineConfig::default() };
    let mut log = match RunLog::open(MemoryStore::new(), config) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Cannot open run log: {}", e);
            return;
        }
    };

    let start = Instant::now();
    let import = match log.import_files(&files) {
        Ok(import) => import,
        Err(e) => {
            eprintln!("Import failed: {}", e);
            return;
        }
    };
    println!("Imported {} of {} files in {:?}", import.summary.inserted, files.len(), start.elapsed());
    for (name, err) in &import.failed {
        println!("  skipped {}: {}", name, err);
    }
    if !import.summary.achievements_unlocked.is_empty() {
        println!("Unlocked: {}", import.summary.achievements_unlocked.join(", "));
    }

    println!("\nRuns:");
    for run in log.runs() {
        println!(
            "  {}  {:<20} {:>6.2} km  {:>5.2} min/km  +{:.0} m  {} splits",
            run.start_time.format("%Y-%m-%d"),
            run.display_name(),
            run.total_distance_meters / 1000.0,
            run.average_pace,
            run.elevation_gain_meters,
            run.splits.len()
        );
    }

    println!("\nWeekly totals:");
    for week in log.weekly_stats() {
        println!(
            "  {}  {} runs  {:.2} km  avg {:.2} min/km",
            week.label,
            week.run_count,
            week.total_distance_meters / 1000.0,
            week.average_pace
        );
    }

    let months = log.recent_periods(PeriodKind::Month, 3);
    println!("\nLast {} months: {:?}", months.len(), months.iter().map(|m| m.run_count).collect::<Vec<_>>());

    let heatmap = log.heatmap(HeatmapRange::All);
    println!(
        "Heatmap: {} days, {} active, max {:.2} km/day",
        heatmap.cells.len(),
        heatmap.active_days,
        heatmap.max_value
    );
    println!("Longest streak: {} days", log.longest_streak());
}
