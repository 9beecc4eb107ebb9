/// Audio post-processing module
///
/// Turns a raw synthesized clip into a corpus sample: mono, 16kHz,
/// peak-normalized, optionally compressed, and forced to an exact duration.

use crate::audio::{self, AudioBuffer, AudioError, AudioSample};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace};

/// Target sample rate for every corpus sample (16kHz)
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Target clip duration in seconds
pub const TARGET_DURATION_SECS: f64 = 2.0;

/// Normalization headroom in dBFS
pub const NORMALIZE_HEADROOM_DB: f32 = -0.1;

/// A peak within one 16-bit step of the target counts as already normalized.
const PEAK_TOLERANCE: f32 = 1.0 / 32768.0;

#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("Invalid sample rate: {0} Hz (must be > 0)")]
    InvalidSampleRate(u32),

    #[error("Invalid channel count: {0} (must be >= 1)")]
    InvalidChannelCount(u16),

    #[error("Invalid target duration: {0}s")]
    InvalidDuration(f64),

    #[error("Resampling failed: {0}")]
    ResamplingError(String),

    #[error("Empty audio buffer")]
    EmptyBuffer,

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Dynamic range compressor settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorConfig {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            threshold_db: -20.0,
            ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 50.0,
        }
    }
}

/// Post-processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessorConfig {
    /// Output sample rate
    pub target_sample_rate: u32,

    /// Output duration in seconds
    pub target_duration_secs: f64,

    /// Peak amplitude after normalization (linear)
    pub peak_target: f32,

    /// Apply the compressor after normalization
    pub compress_dynamic_range: bool,

    pub compressor: CompressorConfig,
}

impl Default for PostProcessorConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: TARGET_SAMPLE_RATE,
            target_duration_secs: TARGET_DURATION_SECS,
            peak_target: db_to_linear(NORMALIZE_HEADROOM_DB),
            compress_dynamic_range: false,
            compressor: CompressorConfig::default(),
        }
    }
}

impl PostProcessorConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), PostProcessError> {
        if self.target_sample_rate == 0 {
            return Err(PostProcessError::InvalidSampleRate(self.target_sample_rate));
        }

        if !self.target_duration_secs.is_finite() || self.target_duration_secs <= 0.0 {
            return Err(PostProcessError::InvalidDuration(self.target_duration_secs));
        }

        Ok(())
    }

    /// Exact number of output samples
    pub fn target_len(&self) -> usize {
        (self.target_duration_secs * self.target_sample_rate as f64).round() as usize
    }
}

/// Audio post-processor for generated samples
#[derive(Debug, Clone)]
pub struct AudioPostProcessor {
    config: PostProcessorConfig,
}

impl AudioPostProcessor {
    /// Create a new post-processor
    pub fn new(config: PostProcessorConfig) -> Result<Self, PostProcessError> {
        config.validate()?;

        debug!(
            "Creating post-processor: {}Hz mono, {:.2}s, compression={}",
            config.target_sample_rate, config.target_duration_secs, config.compress_dynamic_range
        );

        Ok(Self { config })
    }

    pub fn config(&self) -> &PostProcessorConfig {
        &self.config
    }

    /// Full pipeline: mono, resample, normalize, compress, fit duration
    pub fn process(&self, input: &AudioBuffer) -> Result<AudioBuffer, PostProcessError> {
        trace!(
            "Processing {} samples ({} Hz, {} ch)",
            input.samples.len(),
            input.sample_rate,
            input.channels
        );

        let converted = self.to_target_format(input)?;

        let normalized = normalize_peak(&converted.samples, self.config.peak_target);

        let dynamics = if self.config.compress_dynamic_range {
            compress(&normalized, self.config.target_sample_rate, &self.config.compressor)
        } else {
            normalized
        };

        let fitted = fit_to_length(&dynamics, self.config.target_len());

        debug!(
            "Post-processed {} -> {} samples",
            input.samples.len(),
            fitted.len()
        );

        Ok(AudioBuffer::mono(fitted, self.config.target_sample_rate))
    }

    /// Down-mix and resample only, keeping the original duration
    pub fn to_target_format(&self, input: &AudioBuffer) -> Result<AudioBuffer, PostProcessError> {
        if input.sample_rate == 0 {
            return Err(PostProcessError::InvalidSampleRate(input.sample_rate));
        }

        if input.channels == 0 {
            return Err(PostProcessError::InvalidChannelCount(input.channels));
        }

        if input.frames() == 0 {
            return Err(PostProcessError::EmptyBuffer);
        }

        let mono = downmix(&input.samples, input.channels);

        let resampled = if input.sample_rate != self.config.target_sample_rate {
            resample(&mono, input.sample_rate, self.config.target_sample_rate)?
        } else {
            mono
        };

        Ok(AudioBuffer::mono(resampled, self.config.target_sample_rate))
    }

    /// Read `input`, process it and write the result to `output`
    pub fn process_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<AudioBuffer, PostProcessError> {
        let raw = audio::read_wav(input)?;
        let processed = self.process(&raw)?;
        audio::write_wav(output, &processed)?;
        Ok(processed)
    }
}

/// Average interleaved channels into a mono signal
pub fn downmix(samples: &[AudioSample], channels: u16) -> Vec<AudioSample> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample a mono signal between two rates
pub fn resample(
    samples: &[AudioSample],
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<AudioSample>, PostProcessError> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
        WindowFunction,
    };

    if from_rate == 0 {
        return Err(PostProcessError::InvalidSampleRate(from_rate));
    }
    if to_rate == 0 {
        return Err(PostProcessError::InvalidSampleRate(to_rate));
    }
    if samples.is_empty() {
        return Err(PostProcessError::EmptyBuffer);
    }
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    debug!("Resampling: {} Hz -> {} Hz", from_rate, to_rate);

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        2.0,
        params,
        samples.len(),
        1, // mono
    )
    .map_err(|e| PostProcessError::ResamplingError(e.to_string()))?;

    let input_waves = vec![samples.to_vec()];

    let mut output_waves = resampler
        .process(&input_waves, None)
        .map_err(|e| PostProcessError::ResamplingError(e.to_string()))?;

    Ok(output_waves.swap_remove(0))
}

/// Scale so the peak equals `target`.
///
/// Silent input and input already at the target peak are returned unchanged.
pub fn normalize_peak(samples: &[AudioSample], target: f32) -> Vec<AudioSample> {
    let peak = audio::peak(samples);

    if peak == 0.0 {
        debug!("Silent audio detected, skipping normalization");
        return samples.to_vec();
    }

    if (peak - target).abs() <= PEAK_TOLERANCE {
        return samples.to_vec();
    }

    let scale = target / peak;
    trace!("Normalizing audio: peak={:.3}, scale={:.3}", peak, scale);
    samples.iter().map(|&s| s * scale).collect()
}

/// Feed-forward compressor with an attack/release envelope follower
pub fn compress(
    samples: &[AudioSample],
    sample_rate: u32,
    config: &CompressorConfig,
) -> Vec<AudioSample> {
    let coeff = |ms: f32| {
        let n = ms * 0.001 * sample_rate as f32;
        if n <= 0.0 {
            0.0
        } else {
            (-1.0 / n).exp()
        }
    };
    let attack = coeff(config.attack_ms);
    let release = coeff(config.release_ms);
    let ratio = config.ratio.max(1.0);

    let mut envelope = 0.0f32;
    samples
        .iter()
        .map(|&s| {
            let level = s.abs();
            let c = if level > envelope { attack } else { release };
            envelope = c * envelope + (1.0 - c) * level;

            let level_db = linear_to_db(envelope);
            if level_db > config.threshold_db {
                let reduction_db = (level_db - config.threshold_db) * (1.0 - 1.0 / ratio);
                s * db_to_linear(-reduction_db)
            } else {
                s
            }
        })
        .collect()
}

/// Centre-crop or symmetrically zero-pad to exactly `target_len` samples.
///
/// An odd padding sample goes after the signal.
pub fn fit_to_length(samples: &[AudioSample], target_len: usize) -> Vec<AudioSample> {
    let len = samples.len();

    if len > target_len {
        let start = (len - target_len) / 2;
        samples[start..start + target_len].to_vec()
    } else if len < target_len {
        let missing = target_len - len;
        let before = missing / 2;
        let mut out = Vec::with_capacity(target_len);
        out.resize(before, 0.0);
        out.extend_from_slice(samples);
        out.resize(target_len, 0.0);
        out
    } else {
        samples.to_vec()
    }
}

pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

pub fn linear_to_db(value: f32) -> f32 {
    20.0 * value.max(1e-10).log10()
}
