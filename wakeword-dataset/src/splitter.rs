/// Train/val/test splitting
///
/// `partition` shuffles the corpus index and cuts it into three contiguous
/// slices; `materialize` copies each slice into its own directory tree and
/// writes a `relative/path label` manifest per split.

use crate::corpus::{Corpus, CorpusEntry, Label};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Guard against `N * 0.7` landing just below an integer
const FLOOR_EPSILON: f64 = 1e-9;

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("Invalid split ratios: {0}")]
    InvalidRatios(String),

    #[error("Corpus is empty")]
    EmptyCorpus,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SplitError + '_ {
    move |source| SplitError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Dataset partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Split proportions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.70,
            val: 0.15,
            test: 0.15,
        }
    }
}

impl SplitRatios {
    pub fn validate(&self) -> Result<(), SplitError> {
        for (name, value) in [("train", self.train), ("val", self.val), ("test", self.test)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SplitError::InvalidRatios(format!(
                    "{} ratio {} must be >= 0",
                    name, value
                )));
            }
        }

        let sum = self.train + self.val + self.test;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(SplitError::InvalidRatios(format!(
                "ratios sum to {}, expected 1.0",
                sum
            )));
        }

        Ok(())
    }

    /// Train, val and test sizes for `total` items; test takes the remainder
    pub fn sizes(&self, total: usize) -> (usize, usize, usize) {
        let floor = |ratio: f64| ((total as f64 * ratio) + FLOOR_EPSILON).floor() as usize;
        let train = floor(self.train).min(total);
        let val = floor(self.val).min(total - train);
        (train, val, total - train - val)
    }
}

/// Three disjoint slices of one shuffled corpus
#[derive(Debug, Clone, Default)]
pub struct DatasetSplits {
    pub train: Vec<CorpusEntry>,
    pub val: Vec<CorpusEntry>,
    pub test: Vec<CorpusEntry>,
}

impl DatasetSplits {
    pub fn get(&self, split: Split) -> &[CorpusEntry] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    pub fn total(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }
}

/// Per-split counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitStats {
    pub total: usize,
    pub positive: usize,
    pub negative: usize,
}

impl SplitStats {
    pub fn of(entries: &[CorpusEntry]) -> Self {
        let positive = entries.iter().filter(|e| e.label == Label::Positive).count();
        Self {
            total: entries.len(),
            positive,
            negative: entries.len() - positive,
        }
    }
}

/// Stats for every split, as recorded in the dataset metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub train: SplitStats,
    pub val: SplitStats,
    pub test: SplitStats,
}

/// Shuffling splitter
#[derive(Debug, Clone)]
pub struct DatasetSplitter {
    ratios: SplitRatios,
}

impl DatasetSplitter {
    pub fn new(ratios: SplitRatios) -> Result<Self, SplitError> {
        ratios.validate()?;
        Ok(Self { ratios })
    }

    pub fn ratios(&self) -> &SplitRatios {
        &self.ratios
    }

    /// Shuffle every corpus entry and slice into train/val/test.
    ///
    /// No stratification: label and category proportions per split follow
    /// from the shuffle alone.
    pub fn partition<R: Rng + ?Sized>(&self, corpus: &Corpus, rng: &mut R) -> DatasetSplits {
        let mut entries: Vec<CorpusEntry> = corpus.entries().cloned().collect();
        entries.shuffle(rng);

        let (train, val, _) = self.ratios.sizes(entries.len());
        let test = entries.split_off(train + val);
        let val = entries.split_off(train);

        debug!(
            "Partitioned {} entries into {}/{}/{}",
            corpus.len(),
            entries.len(),
            val.len(),
            test.len()
        );

        DatasetSplits {
            train: entries,
            val,
            test,
        }
    }

    /// Copy every split under `out_dir` and write the manifests
    pub fn materialize(
        &self,
        splits: &DatasetSplits,
        out_dir: &Path,
    ) -> Result<SplitSummary, SplitError> {
        let mut summary = SplitSummary::default();

        for split in Split::ALL {
            let stats = materialize_split(split, splits.get(split), &out_dir.join(split.name()))?;
            info!(
                "{} split: {} files ({} positive, {} negative)",
                split, stats.total, stats.positive, stats.negative
            );

            match split {
                Split::Train => summary.train = stats,
                Split::Val => summary.val = stats,
                Split::Test => summary.test = stats,
            }
        }

        Ok(summary)
    }

    /// Partition then materialize
    pub fn split<R: Rng + ?Sized>(
        &self,
        corpus: &Corpus,
        out_dir: &Path,
        rng: &mut R,
    ) -> Result<SplitSummary, SplitError> {
        if corpus.is_empty() {
            return Err(SplitError::EmptyCorpus);
        }
        let splits = self.partition(corpus, rng);
        self.materialize(&splits, out_dir)
    }
}

fn materialize_split(
    split: Split,
    entries: &[CorpusEntry],
    split_dir: &Path,
) -> Result<SplitStats, SplitError> {
    // Class directories are rebuilt so files from an earlier run never leak in
    for label in [Label::Positive, Label::Negative] {
        let dir = split_dir.join(label.dir_name());
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(io_error(&dir))?;
        }
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    }

    let mut written = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let name = format!("{}_{}_{:05}.wav", split, entry.category.name(), i);
        let target = split_dir.join(entry.label.dir_name()).join(&name);
        fs::copy(&entry.path, &target).map_err(io_error(&entry.path))?;
        written.push((entry.label, name));
    }

    write_manifest(split, split_dir, written)?;

    Ok(SplitStats::of(entries))
}

/// `{split}_files.txt`: sorted positives, then sorted negatives
fn write_manifest(
    split: Split,
    split_dir: &Path,
    mut written: Vec<(Label, String)>,
) -> Result<PathBuf, SplitError> {
    let path = split_dir.join(format!("{}_files.txt", split));
    let file = fs::File::create(&path).map_err(io_error(&path))?;
    let mut writer = BufWriter::new(file);

    written.sort_by(|a, b| (a.0 != Label::Positive, &a.1).cmp(&(b.0 != Label::Positive, &b.1)));
    for (label, name) in &written {
        writeln!(writer, "{}/{} {}", label.dir_name(), name, label.as_int())
            .map_err(io_error(&path))?;
    }

    writer.flush().map_err(io_error(&path))?;
    debug!("Wrote {} ({} entries)", path.display(), written.len());
    Ok(path)
}
