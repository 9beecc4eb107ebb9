/// In-memory corpus index
///
/// Maps a sample identifier to its file, label, category and provenance.
/// Generators insert entries as they write files; `Corpus::scan` rebuilds the
/// index from the on-disk directory convention once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Corpus directory not found: {0}")]
    MissingDirectory(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Duplicate sample id: {0}")]
    DuplicateId(String),
}

/// Binary wake-word label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Wake word absent
    Negative,
    /// Wake word present
    Positive,
}

impl Label {
    /// Integer label used in manifests (1 = wake word present)
    pub fn as_int(self) -> u8 {
        match self {
            Label::Positive => 1,
            Label::Negative => 0,
        }
    }

    /// Split subdirectory holding samples with this label
    pub fn dir_name(self) -> &'static str {
        match self {
            Label::Positive => "positive",
            Label::Negative => "negative",
        }
    }
}

/// Where a sample came from in the generation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleCategory {
    Positive,
    Negative,
    FarField,
    EnhancedPositive,
    EnhancedNegative,
}

impl SampleCategory {
    pub const ALL: [SampleCategory; 5] = [
        SampleCategory::Positive,
        SampleCategory::Negative,
        SampleCategory::FarField,
        SampleCategory::EnhancedPositive,
        SampleCategory::EnhancedNegative,
    ];

    /// Far-field and enhanced-positive samples count as positives
    pub fn label(self) -> Label {
        match self {
            SampleCategory::Positive
            | SampleCategory::FarField
            | SampleCategory::EnhancedPositive => Label::Positive,
            SampleCategory::Negative | SampleCategory::EnhancedNegative => Label::Negative,
        }
    }

    /// Directory relative to the raw corpus root
    pub fn relative_dir(self) -> &'static str {
        match self {
            SampleCategory::Positive => "positive",
            SampleCategory::Negative => "negative",
            SampleCategory::FarField => "far_field",
            SampleCategory::EnhancedPositive => "enhanced/positive",
            SampleCategory::EnhancedNegative => "enhanced/negative",
        }
    }

    /// Short name used in file names
    pub fn name(self) -> &'static str {
        match self {
            SampleCategory::Positive => "positive",
            SampleCategory::Negative => "negative",
            SampleCategory::FarField => "far_field",
            SampleCategory::EnhancedPositive => "enhanced_positive",
            SampleCategory::EnhancedNegative => "enhanced_negative",
        }
    }
}

impl fmt::Display for SampleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Generation details recorded for each sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Synthesis engine or augmentation that produced the file
    pub engine: Option<String>,

    /// Spoken text, when known
    pub text: Option<String>,

    /// Engine- or effect-specific parameters
    pub params: BTreeMap<String, String>,

    /// Source sample for derived files (far-field, enhanced)
    pub source: Option<PathBuf>,
}

/// Unique sample identifier (`{category}/{file stem}`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleId(String);

impl SampleId {
    pub fn new(category: SampleCategory, stem: &str) -> Self {
        Self(format!("{}/{}", category.relative_dir(), stem))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One labeled audio file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: SampleId,
    pub path: PathBuf,
    pub category: SampleCategory,
    pub label: Label,
    pub provenance: Provenance,
}

impl CorpusEntry {
    pub fn new(path: PathBuf, category: SampleCategory, provenance: Provenance) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            id: SampleId::new(category, &stem),
            path,
            category,
            label: category.label(),
            provenance,
        }
    }
}

/// Labeled sample index
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entries: BTreeMap<SampleId, CorpusEntry>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every `*.wav` file under the category directories of `root`.
    ///
    /// Missing category directories are skipped; a missing root is an error.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(CorpusError::MissingDirectory(root.display().to_string()));
        }

        let mut corpus = Self::new();

        for category in SampleCategory::ALL {
            let dir = root.join(category.relative_dir());
            if !dir.is_dir() {
                debug!("Skipping missing category directory {}", dir.display());
                continue;
            }

            for path in list_wav_files(&dir)? {
                corpus.insert(CorpusEntry::new(path, category, Provenance::default()))?;
            }
        }

        info!(
            "Indexed {} samples under {} ({} positive, {} negative)",
            corpus.len(),
            root.display(),
            corpus.count_label(Label::Positive),
            corpus.count_label(Label::Negative)
        );

        Ok(corpus)
    }

    /// Add an entry; ids must be unique
    pub fn insert(&mut self, entry: CorpusEntry) -> Result<(), CorpusError> {
        if self.entries.contains_key(&entry.id) {
            return Err(CorpusError::DuplicateId(entry.id.to_string()));
        }
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    /// Add many entries, logging and skipping duplicates
    pub fn extend(&mut self, entries: impl IntoIterator<Item = CorpusEntry>) {
        for entry in entries {
            if let Err(e) = self.insert(entry) {
                warn!("{}", e);
            }
        }
    }

    pub fn get(&self, id: &SampleId) -> Option<&CorpusEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CorpusEntry> {
        self.entries.values()
    }

    pub fn by_category(&self, category: SampleCategory) -> impl Iterator<Item = &CorpusEntry> {
        self.entries.values().filter(move |e| e.category == category)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_label(&self, label: Label) -> usize {
        self.entries.values().filter(|e| e.label == label).count()
    }

    pub fn count_by_category(&self) -> HashMap<SampleCategory, usize> {
        let mut counts = HashMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.category).or_insert(0) += 1;
        }
        counts
    }
}

/// Sorted list of `*.wav` files directly inside `dir`
pub fn list_wav_files(dir: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let io_err = |source| CorpusError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_wav = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if path.is_file() && is_wav {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
