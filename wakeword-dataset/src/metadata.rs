/// Dataset metadata records
///
/// `metadata.json` (next to the raw corpus) describes how samples were
/// generated; `dataset_metadata.json` (at the dataset root) describes the
/// finished, split dataset. Both are written once at the end of a run.

use crate::audio_preprocessor::PostProcessorConfig;
use crate::config::{PipelineConfig, SampleCounts};
use crate::corpus::{Corpus, SampleCategory};
use crate::far_field::FarFieldProfile;
use crate::quality::QualityReport;
use crate::splitter::{SplitRatios, SplitSummary};
use crate::synth::{EngineKind, EngineRegistry, VoiceParams};
use crate::words;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the generation record
pub const GENERATION_METADATA_FILE: &str = "metadata.json";

/// File name of the dataset record
pub const DATASET_METADATA_FILE: &str = "dataset_metadata.json";

/// Serialize `value` as pretty JSON into `path`
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    info!("Metadata saved: {}", path.display());
    Ok(())
}

/// How the raw corpus was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub wake_word: String,
    pub romanized: String,
    pub target_sample_rate: u32,
    pub target_duration: f64,
    pub generation_time: DateTime<Utc>,

    /// Engine availability at generation time
    pub tts_engines: BTreeMap<EngineKind, bool>,

    /// Voice presets per available engine
    pub tts_configs: BTreeMap<EngineKind, Vec<VoiceParams>>,

    pub negative_words_count: usize,
    pub far_field_configs: Vec<FarFieldProfile>,

    /// Sample count per corpus category
    pub statistics: BTreeMap<SampleCategory, usize>,
}

impl GenerationMetadata {
    pub fn new(
        registry: &EngineRegistry,
        post_processor: &PostProcessorConfig,
        profiles: &[FarFieldProfile],
        corpus: &Corpus,
    ) -> Self {
        let tts_engines = EngineKind::ALL
            .into_iter()
            .map(|kind| (kind, registry.get(kind).is_some()))
            .collect();

        let tts_configs = registry
            .kinds()
            .into_iter()
            .filter_map(|kind| registry.get(kind).map(|engine| (kind, engine.presets())))
            .collect();

        let counts = corpus.count_by_category();
        let statistics = SampleCategory::ALL
            .into_iter()
            .map(|category| (category, counts.get(&category).copied().unwrap_or(0)))
            .collect();

        Self {
            wake_word: words::WAKE_WORD.to_string(),
            romanized: words::WAKE_WORD_ROMANIZED.to_string(),
            target_sample_rate: post_processor.target_sample_rate,
            target_duration: post_processor.target_duration_secs,
            generation_time: Utc::now(),
            tts_engines,
            tts_configs,
            negative_words_count: words::negative_vocabulary().len(),
            far_field_configs: profiles.to_vec(),
            statistics,
        }
    }

    pub fn save(&self, raw_dir: &Path) -> std::io::Result<PathBuf> {
        let path = raw_dir.join(GENERATION_METADATA_FILE);
        write_json(&path, self)?;
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub wake_word: String,
    pub language: String,
    pub generation_time: DateTime<Utc>,
    pub generation_duration_seconds: f64,
    pub config_name: String,
    pub config: SampleCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSpecs {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_seconds: f64,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub valid_samples: usize,
    pub quality_stats: QualityReport,
    pub split_stats: SplitSummary,
    pub split_ratios: SplitRatios,
}

/// The finished dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub dataset_info: DatasetInfo,
    pub audio_specs: AudioSpecs,
    pub dataset_stats: DatasetStats,
    pub usage: BTreeMap<String, String>,
}

impl DatasetMetadata {
    pub fn new(
        config: &PipelineConfig,
        quality: QualityReport,
        splits: SplitSummary,
        duration_secs: f64,
    ) -> Self {
        let usage = [
            ("training", "Use train/ directory for model training"),
            ("validation", "Use val/ directory for hyperparameter tuning"),
            ("testing", "Use test/ directory for final evaluation"),
            (
                "file_format",
                "Each split contains positive/ and negative/ subdirectories",
            ),
            (
                "labels",
                "1 = wake word (positive), 0 = non-wake word (negative)",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            dataset_info: DatasetInfo {
                name: config.dataset_name(),
                wake_word: words::WAKE_WORD.to_string(),
                language: words::LANGUAGE.to_string(),
                generation_time: Utc::now(),
                generation_duration_seconds: duration_secs,
                config_name: config
                    .preset
                    .map(|p| p.name().to_string())
                    .unwrap_or_else(|| "custom".to_string()),
                config: config.counts,
            },
            audio_specs: AudioSpecs {
                sample_rate: config.post_processor.target_sample_rate,
                channels: 1,
                duration_seconds: config.post_processor.target_duration_secs,
                format: "wav".to_string(),
            },
            dataset_stats: DatasetStats {
                total_samples: quality.total_files,
                valid_samples: quality.valid_files,
                quality_stats: quality,
                split_stats: splits,
                split_ratios: config.split_ratios,
            },
            usage,
        }
    }

    pub fn save(&self, output_dir: &Path) -> std::io::Result<PathBuf> {
        let path = output_dir.join(DATASET_METADATA_FILE);
        write_json(&path, self)?;
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
    use crate::corpus::{CorpusEntry, Provenance};
    use crate::splitter::SplitStats;
    use tempfile::tempdir;

    #[test]
    fn test_dataset_metadata_roundtrip() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::default();
        let quality = QualityReport {
            total_files: 10,
            valid_files: 9,
            invalid_files: 1,
            ..Default::default()
        };
        let splits = SplitSummary {
            train: SplitStats {
                total: 7,
                positive: 2,
                negative: 5,
            },
            ..Default::default()
        };

        let metadata = DatasetMetadata::new(&config, quality, splits, 12.5);
        let path = metadata.save(dir.path()).unwrap();
        assert!(path.ends_with(DATASET_METADATA_FILE));

        let loaded = DatasetMetadata::load(&path).unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(loaded.dataset_info.name, "korean_wake_word_medium");
        assert_eq!(loaded.dataset_info.wake_word, "하이넛지");
        assert_eq!(loaded.audio_specs.sample_rate, 16000);
        assert_eq!(loaded.dataset_stats.split_stats.train.total, 7);

        // Hangul is written as-is, not escaped
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("하이넛지"));
    }

    #[test]
    fn test_generation_metadata_counts() {
        let dir = tempdir().unwrap();
        let mut corpus = Corpus::new();
        corpus
            .insert(CorpusEntry::new(
                "a.wav".into(),
                SampleCategory::Positive,
                Provenance::default(),
            ))
            .unwrap();

        let metadata = GenerationMetadata::new(
            &EngineRegistry::new(),
            &PostProcessorConfig::default(),
            &FarFieldProfile::catalog(),
            &corpus,
        );

        assert_eq!(metadata.statistics[&SampleCategory::Positive], 1);
        assert_eq!(metadata.statistics[&SampleCategory::FarField], 0);
        assert_eq!(metadata.tts_engines.len(), 3);
        assert!(metadata.tts_engines.values().all(|available| !available));
        assert_eq!(metadata.far_field_configs.len(), 4);

        let path = metadata.save(dir.path()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["statistics"]["positive"], 1);
        assert_eq!(json["tts_engines"]["offline"], false);
    }
}
