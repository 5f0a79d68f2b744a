//! Batch import of uploaded track files.
//!
//! Parsing is pure, so with the `parallel` feature files are parsed on the
//! rayon pool. Failures are reported per file and never abort the batch.

use chrono::{DateTime, Utc};
use log::{info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::UnitSystem;
use crate::error::TrackParseError;
use crate::track_parser::{into_run, parse_track_bytes};
use crate::RunRecord;

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct TrackFile {
    pub name: String,
    pub contents: Vec<u8>,
}

impl TrackFile {
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), contents: contents.into() }
    }
}

/// Parsed runs plus the files that could not be used.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// In input order
    pub records: Vec<RunRecord>,
    pub failed: Vec<(String, TrackParseError)>,
}

fn parse_file(file: &TrackFile, units: UnitSystem, parsed_at: DateTime<Utc>) -> Result<RunRecord, TrackParseError> {
    let parsed = parse_track_bytes(&file.contents, parsed_at)?;
    into_run(&file.name, parsed, units)
}

/// Parse every file, collecting failures instead of stopping.
pub fn parse_track_files(files: &[TrackFile], units: UnitSystem) -> ImportReport {
    let parsed_at = Utc::now();

    #[cfg(feature = "parallel")]
    let results: Vec<Result<RunRecord, TrackParseError>> =
        files.par_iter().map(|f| parse_file(f, units, parsed_at)).collect();

    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<RunRecord, TrackParseError>> =
        files.iter().map(|f| parse_file(f, units, parsed_at)).collect();

    let mut report = ImportReport::default();
    for (file, result) in files.iter().zip(results) {
        match result {
            Ok(run) => report.records.push(run),
            Err(e) => {
                warn!("[Import] Skipping {}: {}", file.name, e);
                report.failed.push((file.name.clone(), e));
            }
        }
    }

    info!(
        "[Import] Parsed {} of {} files ({} failed)",
        report.records.len(),
        files.len(),
        report.failed.len()
    );
    report
}
