/// Pipeline configuration
///
/// One value object carries every stage's settings. It can be loaded from a
/// YAML file and is then overridden by command-line flags.

use crate::audio_preprocessor::PostProcessorConfig;
use crate::augment::AugmentConfig;
use crate::far_field::FarFieldProfile;
use crate::generator::DEFAULT_CONCURRENCY;
use crate::splitter::SplitRatios;
use crate::synth::EngineKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Sample counts per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCounts {
    pub positive: usize,
    pub negative: usize,
    pub far_field: usize,
}

impl SampleCounts {
    pub fn total(&self) -> usize {
        self.positive + self.negative + self.far_field
    }
}

/// Named dataset sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetPreset {
    Small,
    Medium,
    Large,
    Xlarge,
}

impl DatasetPreset {
    pub const ALL: [DatasetPreset; 4] = [
        DatasetPreset::Small,
        DatasetPreset::Medium,
        DatasetPreset::Large,
        DatasetPreset::Xlarge,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DatasetPreset::Small => "small",
            DatasetPreset::Medium => "medium",
            DatasetPreset::Large => "large",
            DatasetPreset::Xlarge => "xlarge",
        }
    }

    pub fn counts(self) -> SampleCounts {
        let (positive, negative, far_field) = match self {
            DatasetPreset::Small => (200, 800, 100),
            DatasetPreset::Medium => (1000, 4000, 500),
            DatasetPreset::Large => (3000, 12000, 1500),
            DatasetPreset::Xlarge => (5000, 20000, 2500),
        };
        SampleCounts {
            positive,
            negative,
            far_field,
        }
    }
}

impl fmt::Display for DatasetPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings for the whole generation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Dataset root (`raw/`, `train/`, `val/`, `test/` live below it)
    pub output_dir: PathBuf,

    /// Preset the counts came from; `None` for custom counts
    pub preset: Option<DatasetPreset>,

    pub counts: SampleCounts,

    /// Generate far-field copies of positives
    pub far_field: bool,

    /// Write noise/speed/gain variants
    pub augment: bool,

    /// Concurrent synthesis tasks
    pub concurrency: usize,

    /// RNG seed for job planning, effects and shuffling
    pub seed: Option<u64>,

    /// Restrict synthesis to these engines (empty = every detected engine)
    pub engines: Vec<EngineKind>,

    pub post_processor: PostProcessorConfig,
    pub augmentation: AugmentConfig,
    pub split_ratios: SplitRatios,
    pub far_field_profiles: Vec<FarFieldProfile>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("datasets/korean_wake_word"),
            preset: Some(DatasetPreset::Medium),
            counts: DatasetPreset::Medium.counts(),
            far_field: true,
            augment: false,
            concurrency: DEFAULT_CONCURRENCY,
            seed: None,
            engines: Vec::new(),
            post_processor: PostProcessorConfig::default(),
            augmentation: AugmentConfig::default(),
            split_ratios: SplitRatios::default(),
            far_field_profiles: FarFieldProfile::catalog(),
        }
    }
}

impl PipelineConfig {
    /// Load from YAML; missing fields take their defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Switch to a preset's counts
    pub fn apply_preset(&mut self, preset: DatasetPreset) {
        self.preset = Some(preset);
        self.counts = preset.counts();
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.counts.positive == 0 && self.counts.negative == 0 {
            return Err(ConfigError::Invalid(
                "At least one positive or negative sample is required".to_string(),
            ));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "Concurrency must be at least 1".to_string(),
            ));
        }

        if self.far_field && self.counts.far_field > 0 {
            if self.far_field_profiles.is_empty() {
                return Err(ConfigError::Invalid(
                    "Far-field generation needs at least one profile".to_string(),
                ));
            }
            for profile in &self.far_field_profiles {
                profile
                    .validate()
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            }
        }

        self.post_processor
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("Post-processor: {}", e)))?;
        self.augmentation
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("Augmentation: {}", e)))?;
        self.split_ratios
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("Split: {}", e)))?;

        Ok(())
    }

    /// Name recorded in the dataset metadata
    pub fn dataset_name(&self) -> String {
        let suffix = self.preset.map(DatasetPreset::name).unwrap_or("custom");
        format!("korean_wake_word_{}", suffix)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.output_dir.join("raw")
    }

    /// Per-request synthesis scratch files
    pub fn scratch_dir(&self) -> PathBuf {
        self.output_dir.join("temp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.counts, DatasetPreset::Medium.counts());
        assert_eq!(config.dataset_name(), "korean_wake_word_medium");
        assert_eq!(config.far_field_profiles.len(), 4);
    }

    #[test]
    fn test_preset_counts() {
        assert_eq!(DatasetPreset::Small.counts().total(), 1100);
        assert_eq!(DatasetPreset::Medium.counts().total(), 5500);
        assert_eq!(DatasetPreset::Large.counts().total(), 16500);
        assert_eq!(DatasetPreset::Xlarge.counts().total(), 27500);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = PipelineConfig::default();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.counts = SampleCounts {
            positive: 0,
            negative: 0,
            far_field: 10,
        };
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.far_field_profiles.clear();
        assert!(config.validate().is_err());
        config.far_field = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "output_dir: /tmp/ds\npreset: small\ncounts:\n  positive: 10\n  negative: 40\n  far_field: 5\nconcurrency: 2\nengines: [offline]\nsplit_ratios:\n  train: 0.8\n  val: 0.1\n  test: 0.1\n"
        )
        .unwrap();

        let config = PipelineConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/ds"));
        assert_eq!(config.preset, Some(DatasetPreset::Small));
        assert_eq!(config.counts.negative, 40);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.engines, vec![EngineKind::Offline]);
        assert!(config.far_field);
        assert_eq!(config.post_processor, PostProcessorConfig::default());
    }

    #[test]
    fn test_yaml_rejects_invalid_ratios() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "split_ratios:\n  train: 0.9\n  val: 0.2\n  test: 0.1\n").unwrap();
        assert!(matches!(
            PipelineConfig::from_yaml_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
