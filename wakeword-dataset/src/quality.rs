/// Corpus quality check
///
/// Flags files whose duration or size is implausible for a short keyword
/// clip and aggregates duration/size statistics for the dataset metadata.

use crate::corpus::Corpus;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Shortest acceptable clip in seconds
pub const MIN_DURATION_SECS: f64 = 0.5;

/// Longest acceptable clip in seconds
pub const MAX_DURATION_SECS: f64 = 3.0;

/// Files at or below this size are treated as truncated
pub const MIN_FILE_BYTES: u64 = 1000;

/// Min/max/mean of a series
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl RangeStats {
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        Self { min, max, avg }
    }
}

/// Aggregate result of a quality pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub duration_stats: RangeStats,
    pub size_stats: RangeStats,
}

/// Duration and size bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityChecker {
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
    pub min_file_bytes: u64,
}

impl Default for QualityChecker {
    fn default() -> Self {
        Self {
            min_duration_secs: MIN_DURATION_SECS,
            max_duration_secs: MAX_DURATION_SECS,
            min_file_bytes: MIN_FILE_BYTES,
        }
    }
}

impl QualityChecker {
    /// Check every corpus entry; unreadable files count as invalid
    pub fn check(&self, corpus: &Corpus) -> QualityReport {
        let mut report = QualityReport::default();
        let mut durations = Vec::with_capacity(corpus.len());
        let mut sizes = Vec::with_capacity(corpus.len());

        for entry in corpus.entries() {
            report.total_files += 1;

            match probe(&entry.path) {
                Ok((duration, size)) => {
                    durations.push(duration);
                    sizes.push(size as f64);

                    if self.is_valid(duration, size) {
                        report.valid_files += 1;
                    } else {
                        report.invalid_files += 1;
                        warn!(
                            "Quality issue: {} (duration {:.2}s, {} bytes)",
                            entry.path.display(),
                            duration,
                            size
                        );
                    }
                }
                Err(e) => {
                    report.invalid_files += 1;
                    warn!("Cannot check {}: {}", entry.path.display(), e);
                }
            }
        }

        report.duration_stats = RangeStats::of(&durations);
        report.size_stats = RangeStats::of(&sizes);

        info!(
            "Quality check: {}/{} files valid",
            report.valid_files, report.total_files
        );

        report
    }

    pub fn is_valid(&self, duration_secs: f64, size_bytes: u64) -> bool {
        (self.min_duration_secs..=self.max_duration_secs).contains(&duration_secs)
            && size_bytes > self.min_file_bytes
    }
}

/// Duration (from the WAV header) and file size
fn probe(path: &Path) -> Result<(f64, u64), String> {
    let size = fs::metadata(path).map_err(|e| e.to_string())?.len();
    let reader = hound::WavReader::open(path).map_err(|e| e.to_string())?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err("zero sample rate".to_string());
    }
    Ok((reader.duration() as f64 / spec.sample_rate as f64, size))
}
