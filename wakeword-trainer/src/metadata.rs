/// Model metadata record (`model_metadata.json`)

use crate::features::{
    MelConfig, EMB_FEATURE_SIZE, EMB_INPUT_COUNT, MEL_FEATURE_SIZE, MEL_INPUT_COUNT,
    MEL_OUTPUT_COUNT, WAKE_INPUT_COUNT,
};
use crate::training::{BinaryMetrics, TrainingConfig, TrainingReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use wakeword_dataset::{WAKE_WORD, WAKE_WORD_ROMANIZED};

pub const MODEL_METADATA_FILE: &str = "model_metadata.json";

/// Model family written into the metadata
pub const MODEL_TYPE: &str = "mel-embedding-wake";

/// Tensor shape constants shared with the consuming detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub mel_input_count: usize,
    pub mel_output_count: usize,
    pub mel_feature_size: usize,
    pub emb_input_count: usize,
    pub emb_feature_size: usize,
    pub wake_input_count: usize,
}

impl AudioParams {
    pub fn new(mel: &MelConfig) -> Self {
        Self {
            sample_rate: mel.sample_rate,
            mel_input_count: MEL_INPUT_COUNT,
            mel_output_count: MEL_OUTPUT_COUNT,
            mel_feature_size: MEL_FEATURE_SIZE,
            emb_input_count: EMB_INPUT_COUNT,
            emb_feature_size: EMB_FEATURE_SIZE,
            wake_input_count: WAKE_INPUT_COUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub wake_word: String,
    pub romanized: String,
    pub model_type: String,
    pub training_time: DateTime<Utc>,
    pub audio_params: AudioParams,
    pub training_params: TrainingConfig,

    /// Validation metrics of the restored weights
    pub performance: BinaryMetrics,
    pub test_performance: Option<BinaryMetrics>,

    pub best_epoch: usize,
    pub epochs_run: usize,
    pub training_time_seconds: f64,

    /// Artifacts that were written successfully
    pub model_files: Vec<String>,
}

impl ModelMetadata {
    pub fn new(
        mel: &MelConfig,
        training: &TrainingConfig,
        report: &TrainingReport,
        model_files: Vec<String>,
    ) -> Self {
        Self {
            wake_word: WAKE_WORD.to_string(),
            romanized: WAKE_WORD_ROMANIZED.to_string(),
            model_type: MODEL_TYPE.to_string(),
            training_time: Utc::now(),
            audio_params: AudioParams::new(mel),
            training_params: training.clone(),
            performance: report.validation,
            test_performance: report.test,
            best_epoch: report.best_epoch,
            epochs_run: report.history.len(),
            training_time_seconds: report.training_secs,
            model_files,
        }
    }

    pub fn save(&self, output_dir: &Path) -> std::io::Result<PathBuf> {
        let path = output_dir.join(MODEL_METADATA_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("Model metadata saved: {}", path.display());
        Ok(path)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_metadata_roundtrip() {
        let dir = tempdir().unwrap();
        let report = TrainingReport {
            history: Vec::new(),
            best_epoch: 7,
            stopped_early: true,
            train_samples: 80,
            val_samples: 20,
            validation: BinaryMetrics {
                loss: 0.2,
                accuracy: 0.95,
                precision: 0.9,
                recall: 1.0,
            },
            test: None,
            training_secs: 3.5,
        };

        let metadata = ModelMetadata::new(
            &MelConfig::default(),
            &TrainingConfig::default(),
            &report,
            vec!["wake.wwm".to_string()],
        );
        let path = metadata.save(dir.path()).unwrap();
        let loaded = ModelMetadata::load(&path).unwrap();

        assert_eq!(loaded, metadata);
        assert_eq!(loaded.audio_params.mel_input_count, 1152);
        assert_eq!(loaded.audio_params.wake_input_count, 16);
        assert_eq!(loaded.training_params.batch_size, 32);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("하이넛지"));
    }
}
