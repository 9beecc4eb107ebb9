/// Sample augmentation
///
/// Writes noisy, speed-perturbed and gain-shifted copies of raw samples into
/// `enhanced/positive` and `enhanced/negative`. Negatives are augmented at
/// half strength and only up to a capped number of sources.

use crate::audio::{self, AudioBuffer, AudioError, AudioSample};
use crate::audio_preprocessor::{self, PostProcessError};
use crate::corpus::{CorpusEntry, Label, Provenance, SampleCategory};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum AugmentError {
    #[error("Invalid augmentation config: {0}")]
    InvalidConfig(String),

    #[error("Empty input buffer")]
    EmptyBuffer,

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Processing error: {0}")]
    Process(#[from] PostProcessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Augmentation strengths (for positives; negatives use half)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Standard deviation of added Gaussian noise
    pub noise_level: f32,

    /// Speed factor range
    pub speed_range: (f32, f32),

    /// Gain range in dB
    pub gain_range_db: (f32, f32),

    /// Maximum number of negative sources to augment
    pub max_negative_sources: usize,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            noise_level: 0.05,
            speed_range: (0.9, 1.1),
            gain_range_db: (-6.0, 3.0),
            max_negative_sources: 50,
        }
    }
}

impl AugmentConfig {
    pub fn validate(&self) -> Result<(), AugmentError> {
        if !self.noise_level.is_finite() || self.noise_level < 0.0 {
            return Err(AugmentError::InvalidConfig(format!(
                "noise level {} must be >= 0",
                self.noise_level
            )));
        }

        let (lo, hi) = self.speed_range;
        if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || lo > hi {
            return Err(AugmentError::InvalidConfig(format!(
                "speed range {}..{} must be positive and ordered",
                lo, hi
            )));
        }

        let (lo, hi) = self.gain_range_db;
        if !(lo.is_finite() && hi.is_finite()) || lo > hi {
            return Err(AugmentError::InvalidConfig(format!(
                "gain range {}..{} dB must be ordered",
                lo, hi
            )));
        }

        Ok(())
    }

    /// Same effects with every range halved around its neutral point
    pub fn half_strength(&self) -> Self {
        let halve = |(lo, hi): (f32, f32), neutral: f32| {
            (neutral + (lo - neutral) / 2.0, neutral + (hi - neutral) / 2.0)
        };

        Self {
            noise_level: self.noise_level / 2.0,
            speed_range: halve(self.speed_range, 1.0),
            gain_range_db: halve(self.gain_range_db, 0.0),
            max_negative_sources: self.max_negative_sources,
        }
    }
}

/// Augmentation variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Noise,
    Speed,
    Gain,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Noise, Variant::Speed, Variant::Gain];

    pub fn name(self) -> &'static str {
        match self {
            Variant::Noise => "noise",
            Variant::Speed => "speed",
            Variant::Gain => "gain",
        }
    }
}

/// Add Gaussian noise, limiting the result to full scale
pub fn add_noise<R: Rng + ?Sized>(
    samples: &[AudioSample],
    noise_level: f32,
    rng: &mut R,
) -> Result<Vec<AudioSample>, AugmentError> {
    if noise_level <= 0.0 {
        return Ok(samples.to_vec());
    }
    let noise = Normal::new(0.0f32, noise_level)
        .map_err(|e| AugmentError::InvalidConfig(e.to_string()))?;
    let noisy: Vec<f32> = samples.iter().map(|s| s + noise.sample(rng)).collect();
    Ok(limit_peak(noisy))
}

/// Play back `factor` times faster (resample-based, pitch follows speed),
/// then fit to `target_len`.
pub fn change_speed(
    samples: &[AudioSample],
    sample_rate: u32,
    factor: f32,
    target_len: usize,
) -> Result<Vec<AudioSample>, AugmentError> {
    if samples.is_empty() {
        return Err(AugmentError::EmptyBuffer);
    }
    let virtual_rate = (sample_rate as f32 * factor).round() as u32;
    let sped = audio_preprocessor::resample(samples, virtual_rate, sample_rate)?;
    Ok(audio_preprocessor::fit_to_length(&sped, target_len))
}

/// Scale by `gain_db`, limiting the result to full scale
pub fn apply_gain(samples: &[AudioSample], gain_db: f32) -> Vec<AudioSample> {
    let gain = audio_preprocessor::db_to_linear(gain_db);
    limit_peak(samples.iter().map(|s| s * gain).collect())
}

fn limit_peak(mut samples: Vec<AudioSample>) -> Vec<AudioSample> {
    let peak = audio::peak(&samples);
    if peak > 1.0 {
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }
    samples
}

/// Outcome of an augmentation batch
#[derive(Debug, Clone, Default)]
pub struct AugmentReport {
    pub sources: usize,
    pub generated: usize,
    pub failed: usize,
    pub entries: Vec<CorpusEntry>,
}

/// Writes enhanced copies of corpus samples
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentConfig,
}

impl Augmenter {
    pub fn new(config: AugmentConfig) -> Result<Self, AugmentError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Augment every positive and up to `max_negative_sources` negatives.
    ///
    /// `raw_dir` is the corpus root; outputs go under `raw_dir/enhanced/`.
    pub fn augment<R: Rng + ?Sized>(
        &self,
        positives: &[PathBuf],
        negatives: &[PathBuf],
        raw_dir: &Path,
        rng: &mut R,
    ) -> Result<AugmentReport, AugmentError> {
        let mut report = AugmentReport::default();

        let negatives = &negatives[..negatives.len().min(self.config.max_negative_sources)];
        let half = self.config.half_strength();

        for (label, sources, config) in [
            (Label::Positive, positives, &self.config),
            (Label::Negative, negatives, &half),
        ] {
            let category = match label {
                Label::Positive => SampleCategory::EnhancedPositive,
                Label::Negative => SampleCategory::EnhancedNegative,
            };
            let out_dir = raw_dir.join(category.relative_dir());
            fs::create_dir_all(&out_dir)?;

            for (i, source) in sources.iter().enumerate() {
                report.sources += 1;
                match augment_file(source, label, category, &out_dir, config, rng) {
                    Ok(entries) => {
                        report.generated += entries.len();
                        report.entries.extend(entries);
                    }
                    Err(e) => {
                        warn!("Augmenting {} failed: {}", source.display(), e);
                        report.failed += 1;
                    }
                }

                if (i + 1) % 10 == 0 {
                    debug!("Augmented {} {} files", i + 1, label.dir_name());
                }
            }
        }

        info!(
            "Augmentation: {} variants from {} sources ({} failed)",
            report.generated, report.sources, report.failed
        );

        Ok(report)
    }
}

fn augment_file<R: Rng + ?Sized>(
    source: &Path,
    label: Label,
    category: SampleCategory,
    out_dir: &Path,
    config: &AugmentConfig,
    rng: &mut R,
) -> Result<Vec<CorpusEntry>, AugmentError> {
    let input = audio::read_wav(source)?;
    let samples = audio_preprocessor::downmix(&input.samples, input.channels);
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut entries = Vec::with_capacity(Variant::ALL.len());

    for variant in Variant::ALL {
        let (output, param) = match variant {
            Variant::Noise => (
                add_noise(&samples, config.noise_level, rng)?,
                config.noise_level,
            ),
            Variant::Speed => {
                let factor = rng.gen_range(config.speed_range.0..=config.speed_range.1);
                (
                    change_speed(&samples, input.sample_rate, factor, samples.len())?,
                    factor,
                )
            }
            Variant::Gain => {
                let gain_db = rng.gen_range(config.gain_range_db.0..=config.gain_range_db.1);
                (apply_gain(&samples, gain_db), gain_db)
            }
        };

        let path = out_dir.join(format!("{}_{}_{}.wav", label.dir_name(), variant.name(), stem));
        audio::write_wav(&path, &AudioBuffer::mono(output, input.sample_rate))?;

        let mut provenance = Provenance {
            engine: Some(format!("augment_{}", variant.name())),
            source: Some(source.to_path_buf()),
            ..Default::default()
        };
        provenance.params.insert(variant.name().to_string(), param.to_string());

        entries.push(CorpusEntry::new(path, category, provenance));
    }

    Ok(entries)
}
