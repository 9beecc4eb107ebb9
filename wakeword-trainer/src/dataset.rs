/// Labelled feature sets
///
/// Loads a split directory (`positive/` and `negative/` WAV files), brings
/// every clip to 16 kHz mono, fits it to the network input length and
/// extracts its feature matrix.

use crate::features::{FeatureError, FeatureMatrix, MelExtractor};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};
use wakeword_dataset::corpus::list_wav_files;
use wakeword_dataset::{
    read_wav, AudioPostProcessor, CorpusError, Label, PostProcessError, PostProcessorConfig,
};

/// Fewest positive clips worth training on
pub const MIN_POSITIVE_SAMPLES: usize = 10;

/// Fewest negative clips worth training on
pub const MIN_NEGATIVE_SAMPLES: usize = 20;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Data directory not found: {0}")]
    MissingDirectory(String),

    #[error("Insufficient training data: {positive} positive (need {min_positive}), {negative} negative (need {min_negative})")]
    InsufficientData {
        positive: usize,
        negative: usize,
        min_positive: usize,
        min_negative: usize,
    },

    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),
}

/// Feature matrices with binary labels
#[derive(Debug, Clone, Default)]
pub struct LabeledFeatures {
    pub features: Vec<FeatureMatrix>,

    /// 1 = wake word, 0 = other speech
    pub labels: Vec<u8>,

    pub files: Vec<PathBuf>,
}

impl LabeledFeatures {
    /// Load `dir/positive` and `dir/negative`; unreadable files are skipped
    pub fn load_dir(dir: impl AsRef<Path>, extractor: &MelExtractor) -> Result<Self, DatasetError> {
        let dir = dir.as_ref();
        info!("Loading dataset from {}", dir.display());

        let converter = AudioPostProcessor::new(PostProcessorConfig {
            target_sample_rate: extractor.config().sample_rate,
            ..PostProcessorConfig::default()
        })?;

        let mut set = Self::default();
        for label in [Label::Positive, Label::Negative] {
            let class_dir = dir.join(label.dir_name());
            if !class_dir.is_dir() {
                return Err(DatasetError::MissingDirectory(
                    class_dir.display().to_string(),
                ));
            }

            let files = list_wav_files(&class_dir)?;
            info!("Found {} {} files", files.len(), label.dir_name());

            for path in files {
                match load_clip(&path, &converter, extractor) {
                    Ok(features) => set.push(features, label.as_int(), path),
                    Err(e) => error!("Skipping {}: {}", path.display(), e),
                }
            }
        }

        info!(
            "Dataset loaded: {} samples ({} positive, {} negative)",
            set.len(),
            set.count_positive(),
            set.count_negative()
        );

        Ok(set)
    }

    pub fn push(&mut self, features: FeatureMatrix, label: u8, file: PathBuf) {
        self.features.push(features);
        self.labels.push(label);
        self.files.push(file);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn count_positive(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }

    pub fn count_negative(&self) -> usize {
        self.len() - self.count_positive()
    }

    /// Fail unless both classes meet their minimum count
    pub fn ensure_trainable(&self) -> Result<(), DatasetError> {
        let (positive, negative) = (self.count_positive(), self.count_negative());
        if positive < MIN_POSITIVE_SAMPLES || negative < MIN_NEGATIVE_SAMPLES {
            return Err(DatasetError::InsufficientData {
                positive,
                negative,
                min_positive: MIN_POSITIVE_SAMPLES,
                min_negative: MIN_NEGATIVE_SAMPLES,
            });
        }
        Ok(())
    }

    /// Subset in the order of `indices`
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut subset = Self::default();
        for &i in indices {
            subset.push(
                self.features[i].clone(),
                self.labels[i],
                self.files[i].clone(),
            );
        }
        subset
    }

    /// Shuffle, then hold out the last `fraction` as validation data
    pub fn shuffle_split<R: Rng>(&self, fraction: f64, rng: &mut R) -> (Self, Self) {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);

        let held_out = ((self.len() as f64) * fraction).floor() as usize;
        let (train, val) = indices.split_at(self.len() - held_out.min(self.len()));
        debug!("Split {} samples into {} train / {} val", self.len(), train.len(), val.len());

        (self.select(train), self.select(val))
    }
}

fn load_clip(
    path: &Path,
    converter: &AudioPostProcessor,
    extractor: &MelExtractor,
) -> Result<FeatureMatrix, DatasetError> {
    let raw = read_wav(path).map_err(PostProcessError::from)?;
    let audio = converter.to_target_format(&raw)?;
    Ok(extractor.extract_clip(&audio.samples)?)
}
