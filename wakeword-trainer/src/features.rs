/// Log-mel feature extraction
///
/// Turns a fixed-length 16 kHz clip into the (frames × mel bins) matrix the
/// networks consume: framed power spectrum, triangular mel filterbank, dB
/// conversion relative to the loudest bin, then whole-matrix standardisation
/// squashed into [-1, 1].

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Samples per network input (512 + 160 * 4)
pub const MEL_INPUT_COUNT: usize = 1152;

/// Frames per feature matrix
pub const MEL_OUTPUT_COUNT: usize = 5;

/// Mel bins per frame
pub const MEL_FEATURE_SIZE: usize = 32;

/// Frames the embedding network looks at
pub const EMB_INPUT_COUNT: usize = 76;

/// Embedding width
pub const EMB_FEATURE_SIZE: usize = 96;

/// Embeddings the wake network looks at
pub const WAKE_INPUT_COUNT: usize = 16;

const AMIN: f32 = 1e-10;
const STD_EPSILON: f32 = 1e-8;
const CLIP_SIGMA: f32 = 3.0;

#[derive(Error, Debug, PartialEq)]
pub enum FeatureError {
    #[error("Invalid mel configuration: {0}")]
    InvalidConfig(String),

    #[error("Empty audio buffer")]
    EmptyBuffer,

    #[error("Non-finite sample at index {0}")]
    NonFinite(usize),
}

/// Mel spectrogram parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MelConfig {
    pub sample_rate: u32,

    /// Clip length the extractor is sized for
    pub input_samples: usize,

    pub fft_size: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub f_min: f32,
    pub f_max: f32,

    /// Dynamic range kept below the loudest bin
    pub top_db: f32,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            input_samples: MEL_INPUT_COUNT,
            fft_size: 512,
            hop_length: 160,
            n_mels: MEL_FEATURE_SIZE,
            f_min: 0.0,
            f_max: 8000.0,
            top_db: 80.0,
        }
    }
}

impl MelConfig {
    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.sample_rate == 0 {
            return Err(FeatureError::InvalidConfig(
                "sample_rate must be positive".to_string(),
            ));
        }

        if self.fft_size == 0 || self.hop_length == 0 || self.n_mels == 0 {
            return Err(FeatureError::InvalidConfig(
                "fft_size, hop_length and n_mels must be positive".to_string(),
            ));
        }

        if self.input_samples < self.fft_size {
            return Err(FeatureError::InvalidConfig(format!(
                "input_samples {} shorter than one FFT frame ({})",
                self.input_samples, self.fft_size
            )));
        }

        let nyquist = self.sample_rate as f32 / 2.0;
        if !(0.0..nyquist).contains(&self.f_min) || self.f_max <= self.f_min || self.f_max > nyquist
        {
            return Err(FeatureError::InvalidConfig(format!(
                "mel range {}..{} Hz outside 0..{} Hz",
                self.f_min, self.f_max, nyquist
            )));
        }

        if !self.top_db.is_finite() || self.top_db <= 0.0 {
            return Err(FeatureError::InvalidConfig(
                "top_db must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Frames produced from `input_samples` without centre padding
    pub fn output_frames(&self) -> usize {
        frame_count(self.input_samples, self.fft_size, self.hop_length)
    }

    fn n_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }
}

fn frame_count(len: usize, fft_size: usize, hop: usize) -> usize {
    if len < fft_size {
        0
    } else {
        (len - fft_size) / hop + 1
    }
}

/// Row-major (frame, mel bin) matrix
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Vec<f32>,
    frames: usize,
    bins: usize,
}

impl FeatureMatrix {
    pub fn zeros(frames: usize, bins: usize) -> Self {
        Self {
            data: vec![0.0; frames * bins],
            frames,
            bins,
        }
    }

    /// Wrap row-major values; `None` if the length does not match the shape
    pub fn from_vec(data: Vec<f32>, frames: usize, bins: usize) -> Option<Self> {
        (data.len() == frames * bins).then_some(Self { data, frames, bins })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.frames, self.bins)
    }

    pub fn get(&self, frame: usize, bin: usize) -> f32 {
        self.data[frame * self.bins + bin]
    }

    pub fn row(&self, frame: usize) -> &[f32] {
        &self.data[frame * self.bins..(frame + 1) * self.bins]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Truncate or zero-pad along the time axis
    fn with_frames(mut self, frames: usize) -> Self {
        self.data.resize(frames * self.bins, 0.0);
        self.frames = frames;
        self
    }
}

/// Centre-crop or end-pad a clip to `len` samples
pub fn fit_length(samples: &[f32], len: usize) -> Vec<f32> {
    if samples.len() > len {
        let start = (samples.len() - len) / 2;
        samples[start..start + len].to_vec()
    } else {
        let mut out = samples.to_vec();
        out.resize(len, 0.0);
        out
    }
}

/// Periodic Hann window
fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos())
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Area-normalised triangular filters, one row of `n_bins` weights per band
fn mel_filterbank(config: &MelConfig) -> Vec<Vec<f32>> {
    let n_bins = config.n_bins();
    let bin_hz: Vec<f32> = (0..n_bins)
        .map(|k| k as f32 * config.sample_rate as f32 / config.fft_size as f32)
        .collect();

    let mel_lo = hz_to_mel(config.f_min);
    let mel_hi = hz_to_mel(config.f_max);
    let edges: Vec<f32> = (0..config.n_mels + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f32 / (config.n_mels + 1) as f32))
        .collect();

    (0..config.n_mels)
        .map(|m| {
            let (left, centre, right) = (edges[m], edges[m + 1], edges[m + 2]);
            let norm = 2.0 / (right - left);
            bin_hz
                .iter()
                .map(|&f| {
                    let rising = (f - left) / (centre - left);
                    let falling = (right - f) / (right - centre);
                    rising.min(falling).max(0.0) * norm
                })
                .collect()
        })
        .collect()
}

/// Log-mel extractor with a cached FFT plan and filterbank
pub struct MelExtractor {
    config: MelConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    filterbank: Vec<Vec<f32>>,
}

impl MelExtractor {
    pub fn new(config: MelConfig) -> Result<Self, FeatureError> {
        config.validate()?;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.fft_size);

        Ok(Self {
            window: hann_window(config.fft_size),
            filterbank: mel_filterbank(&config),
            fft,
            config,
        })
    }

    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    /// Fit a clip of any length to the input size, then extract
    pub fn extract_clip(&self, samples: &[f32]) -> Result<FeatureMatrix, FeatureError> {
        if samples.is_empty() {
            return Err(FeatureError::EmptyBuffer);
        }
        self.extract(&fit_length(samples, self.config.input_samples))
    }

    /// Features of `samples`, always shaped (output_frames, n_mels)
    pub fn extract(&self, samples: &[f32]) -> Result<FeatureMatrix, FeatureError> {
        if samples.is_empty() {
            return Err(FeatureError::EmptyBuffer);
        }

        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(FeatureError::NonFinite(index));
        }

        let frames = frame_count(samples.len(), self.config.fft_size, self.config.hop_length);
        let mut mel = FeatureMatrix::zeros(frames, self.config.n_mels);

        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.config.fft_size];
        let mut power = vec![0.0f32; self.config.n_bins()];

        for frame in 0..frames {
            let start = frame * self.config.hop_length;
            for (slot, (&s, &w)) in buffer
                .iter_mut()
                .zip(samples[start..].iter().zip(&self.window))
            {
                *slot = Complex::new(s * w, 0.0);
            }

            self.fft.process(&mut buffer);

            for (p, c) in power.iter_mut().zip(&buffer) {
                *p = c.norm_sqr();
            }

            for (m, filter) in self.filterbank.iter().enumerate() {
                mel.data[frame * self.config.n_mels + m] =
                    filter.iter().zip(&power).map(|(w, p)| w * p).sum();
            }
        }

        power_to_db(&mut mel.data, self.config.top_db);
        standardize(&mut mel.data);

        let expected = self.config.output_frames();
        if frames != expected {
            trace!("Adjusting {} frames to {}", frames, expected);
        }

        Ok(mel.with_frames(expected))
    }
}

/// dB relative to the maximum, floored `top_db` below it
fn power_to_db(values: &mut [f32], top_db: f32) {
    let reference = values.iter().copied().fold(AMIN, f32::max);
    let ref_db = 10.0 * reference.log10();

    for v in values.iter_mut() {
        *v = 10.0 * v.max(AMIN).log10() - ref_db;
    }

    let peak = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    for v in values.iter_mut() {
        *v = v.max(peak - top_db);
    }
}

/// Z-score, clip at ±3σ, scale into [-1, 1]
fn standardize(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }

    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt();

    for v in values.iter_mut() {
        *v = ((*v - mean) / (std + STD_EPSILON)).clamp(-CLIP_SIGMA, CLIP_SIGMA) / CLIP_SIGMA;
    }
}
