/// Far-field simulation
///
/// Turns a close-mic clip into an approximation of the same utterance heard
/// from across a room: distance attenuation, a single 50 ms echo, Gaussian
/// background noise, air absorption (low-pass) beyond 3 m, then peak
/// normalisation.

use crate::audio::{self, AudioBuffer, AudioError, AudioSample};
use crate::audio_preprocessor::{downmix, resample, PostProcessError};
use crate::corpus::{CorpusEntry, Provenance, SampleCategory};
use crate::filter::ButterworthLowpass;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Echo delay in seconds
pub const REVERB_DELAY_SECS: f64 = 0.05;

/// Distance above which the air-absorption low-pass kicks in (meters)
pub const LOWPASS_MIN_DISTANCE: f32 = 3.0;

/// Butterworth order for air absorption
pub const LOWPASS_ORDER: usize = 4;

#[derive(Error, Debug)]
pub enum FarFieldError {
    #[error("Invalid far-field profile {name}: {reason}")]
    InvalidProfile { name: String, reason: String },

    #[error("Empty input buffer")]
    EmptyBuffer,

    #[error("No source samples to derive far-field copies from")]
    NoSources,

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Format conversion failed: {0}")]
    Convert(#[from] PostProcessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Named acoustic distance preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarFieldProfile {
    pub name: String,

    /// Speaker distance in meters
    pub distance: f32,

    /// Echo gain relative to the direct signal
    pub reverb_level: f32,

    /// Standard deviation of the added Gaussian noise
    pub noise_level: f32,
}

impl FarFieldProfile {
    pub fn new(name: &str, distance: f32, reverb_level: f32, noise_level: f32) -> Self {
        Self {
            name: name.to_string(),
            distance,
            reverb_level,
            noise_level,
        }
    }

    /// The fixed four-distance catalog
    pub fn catalog() -> Vec<FarFieldProfile> {
        vec![
            Self::new("near_field", 1.5, 0.1, 0.02),
            Self::new("mid_field", 4.0, 0.3, 0.05),
            Self::new("far_field", 8.0, 0.5, 0.08),
            Self::new("very_far_field", 12.0, 0.7, 0.12),
        ]
    }

    pub fn validate(&self) -> Result<(), FarFieldError> {
        let invalid = |reason: &str| FarFieldError::InvalidProfile {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if !self.distance.is_finite() || self.distance <= 0.0 {
            return Err(invalid("distance must be > 0"));
        }
        if !self.reverb_level.is_finite() || self.reverb_level < 0.0 {
            return Err(invalid("reverb level must be >= 0"));
        }
        if !self.noise_level.is_finite() || self.noise_level < 0.0 {
            return Err(invalid("noise level must be >= 0"));
        }
        Ok(())
    }

    /// Low-pass cutoff for this distance, `None` when no filtering applies
    pub fn lowpass_cutoff_hz(&self) -> Option<f32> {
        (self.distance > LOWPASS_MIN_DISTANCE).then(|| (4000.0 - self.distance * 200.0).max(2000.0))
    }
}

/// Far-field effect chain for one sample rate
#[derive(Debug, Clone)]
pub struct FarFieldSimulator {
    sample_rate: u32,
}

impl FarFieldSimulator {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Apply the far-field chain to a mono clip
    pub fn apply<R: Rng + ?Sized>(
        &self,
        samples: &[AudioSample],
        profile: &FarFieldProfile,
        rng: &mut R,
    ) -> Result<Vec<AudioSample>, FarFieldError> {
        profile.validate()?;
        if samples.is_empty() {
            return Err(FarFieldError::EmptyBuffer);
        }

        // 1. distance attenuation
        let gain = 1.0 / profile.distance.sqrt();
        let attenuated: Vec<f32> = samples.iter().map(|s| s * gain).collect();

        // 2. single echo
        let mut signal = add_echo(
            &attenuated,
            (REVERB_DELAY_SECS * self.sample_rate as f64) as usize,
            profile.reverb_level,
        );

        // 3. background noise
        if profile.noise_level > 0.0 {
            let noise = Normal::new(0.0f32, profile.noise_level).map_err(|e| {
                FarFieldError::InvalidProfile {
                    name: profile.name.clone(),
                    reason: e.to_string(),
                }
            })?;
            for s in signal.iter_mut() {
                *s += noise.sample(rng);
            }
        }

        // 4. air absorption
        if let Some(cutoff) = profile.lowpass_cutoff_hz() {
            let filter = ButterworthLowpass::new(LOWPASS_ORDER, cutoff as f64, self.sample_rate);
            signal = filter.filtfilt(&signal);
        }

        // 5. peak normalisation to full scale
        let peak = audio::peak(&signal);
        if peak > 0.0 {
            for s in signal.iter_mut() {
                *s /= peak;
            }
        }

        debug!(
            "Applied far-field profile {} ({} m) to {} samples",
            profile.name,
            profile.distance,
            signal.len()
        );

        Ok(signal)
    }

    /// Derive `count` far-field copies from random `sources`.
    ///
    /// Each copy uses a random source and a random profile. Per-file failures
    /// are logged and counted; the batch continues.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        sources: &[PathBuf],
        profiles: &[FarFieldProfile],
        count: usize,
        output_dir: &Path,
        rng: &mut R,
    ) -> Result<FarFieldReport, FarFieldError> {
        if sources.is_empty() || profiles.is_empty() {
            return Err(FarFieldError::NoSources);
        }
        fs::create_dir_all(output_dir)?;

        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut report = FarFieldReport {
            requested: count,
            ..Default::default()
        };

        for index in 0..count {
            let (Some(source), Some(profile)) = (sources.choose(rng), profiles.choose(rng)) else {
                break;
            };

            let path = output_dir.join(format!(
                "far_field_{}_{}_{:04}.wav",
                profile.name, timestamp, index
            ));

            match self.derive_file(source, &path, profile, rng) {
                Ok(()) => {
                    let mut provenance = Provenance {
                        engine: Some("far_field".to_string()),
                        source: Some(source.clone()),
                        ..Default::default()
                    };
                    provenance.params.insert("profile".into(), profile.name.clone());
                    provenance
                        .params
                        .insert("distance".into(), profile.distance.to_string());

                    report
                        .entries
                        .push(CorpusEntry::new(path, SampleCategory::FarField, provenance));
                    report.generated += 1;
                }
                Err(e) => {
                    warn!("Far-field sample {} from {} failed: {}", index, source.display(), e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Far-field generation: {}/{} written ({} failed)",
            report.generated, report.requested, report.failed
        );

        Ok(report)
    }

    fn derive_file<R: Rng + ?Sized>(
        &self,
        source: &Path,
        output: &Path,
        profile: &FarFieldProfile,
        rng: &mut R,
    ) -> Result<(), FarFieldError> {
        let input = audio::read_wav(source)?;
        let samples = self.to_simulator_format(&input)?;
        let samples = self.apply(&samples, profile, rng)?;
        audio::write_wav(output, &AudioBuffer::mono(samples, self.sample_rate))?;
        Ok(())
    }

    /// Mono at the simulator rate, so the echo delay and low-pass cutoff land
    /// where the profile says
    fn to_simulator_format(&self, input: &AudioBuffer) -> Result<Vec<AudioSample>, FarFieldError> {
        let mono = downmix(&input.samples, input.channels);
        if input.sample_rate == self.sample_rate {
            return Ok(mono);
        }

        debug!(
            "Converting {} Hz / {} ch input to {} Hz mono",
            input.sample_rate, input.channels, self.sample_rate
        );
        Ok(resample(&mono, input.sample_rate, self.sample_rate)?)
    }
}

/// Outcome of a far-field batch
#[derive(Debug, Clone, Default)]
pub struct FarFieldReport {
    pub requested: usize,
    pub generated: usize,
    pub failed: usize,
    pub entries: Vec<CorpusEntry>,
}

/// `signal + delayed(signal) * level`; skipped when the clip is shorter than the delay
fn add_echo(samples: &[f32], delay: usize, level: f32) -> Vec<f32> {
    let mut out = samples.to_vec();
    if level <= 0.0 || delay == 0 || samples.len() <= delay {
        return out;
    }
    for (o, s) in out[delay..].iter_mut().zip(samples) {
        *o += s * level;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn tone(freqs: &[f32], len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                freqs
                    .iter()
                    .map(|f| 0.3 * (2.0 * std::f32::consts::PI * f * i as f32 / 16000.0).sin())
                    .sum()
            })
            .collect()
    }

    /// Signal power at one frequency (Goertzel)
    fn power_at(samples: &[f32], freq: f32, sample_rate: f32) -> f32 {
        let coeff = 2.0 * (2.0 * std::f32::consts::PI * freq / sample_rate).cos();
        let (mut s1, mut s2) = (0.0f32, 0.0f32);
        for &x in samples {
            let s0 = x + coeff * s1 - s2;
            s2 = s1;
            s1 = s0;
        }
        (s1 * s1 + s2 * s2 - coeff * s1 * s2) / samples.len() as f32
    }

    #[test]
    fn test_catalog() {
        let catalog = FarFieldProfile::catalog();
        assert_eq!(catalog.len(), 4);
        assert!(catalog.iter().all(|p| p.validate().is_ok()));
        assert_eq!(catalog[0].lowpass_cutoff_hz(), None);
        assert_eq!(catalog[1].lowpass_cutoff_hz(), Some(3200.0));
        assert_eq!(catalog[2].lowpass_cutoff_hz(), Some(2400.0));
        assert_eq!(catalog[3].lowpass_cutoff_hz(), Some(2000.0));
    }

    #[test]
    fn test_output_peak_is_bounded() {
        let sim = FarFieldSimulator::new(16000);
        let mut rng = StdRng::seed_from_u64(7);
        let input = tone(&[440.0, 1200.0], 32000);

        for profile in FarFieldProfile::catalog() {
            let out = sim.apply(&input, &profile, &mut rng).unwrap();
            assert_eq!(out.len(), input.len());
            assert!(audio::peak(&out) <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn test_high_frequencies_attenuated_beyond_cutoff() {
        let sim = FarFieldSimulator::new(16000);
        let mut rng = StdRng::seed_from_u64(11);
        let input = tone(&[500.0, 6000.0], 32000);

        let profile = FarFieldProfile::new("quiet_far", 8.0, 0.0, 0.0);
        let out = sim.apply(&input, &profile, &mut rng).unwrap();

        let in_ratio = power_at(&input, 6000.0, 16000.0) / power_at(&input, 500.0, 16000.0);
        let out_ratio = power_at(&out, 6000.0, 16000.0) / power_at(&out, 500.0, 16000.0);
        assert!(out_ratio < in_ratio * 1e-3);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let sim = FarFieldSimulator::new(16000);
        let input = tone(&[300.0], 8000);
        let profile = &FarFieldProfile::catalog()[2];

        let a = sim.apply(&input, profile, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = sim.apply(&input, profile, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_echo_skipped_for_short_clip() {
        assert_eq!(add_echo(&[0.5; 10], 800, 0.5), vec![0.5; 10]);
        let echoed = add_echo(&[1.0, 0.0, 0.0], 2, 0.5);
        assert_eq!(echoed, vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_invalid_profile_and_empty_input() {
        let sim = FarFieldSimulator::new(16000);
        let mut rng = StdRng::seed_from_u64(0);
        let bad = FarFieldProfile::new("bad", 0.0, 0.1, 0.1);
        assert!(matches!(
            sim.apply(&[0.1], &bad, &mut rng),
            Err(FarFieldError::InvalidProfile { .. })
        ));
        assert!(matches!(
            sim.apply(&[], &FarFieldProfile::catalog()[0], &mut rng),
            Err(FarFieldError::EmptyBuffer)
        ));
    }

    #[test]
    fn test_generate_writes_named_files() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.wav");
        audio::write_wav(&source, &AudioBuffer::mono(tone(&[440.0], 32000), 16000)).unwrap();

        let out_dir = dir.path().join("far_field");
        let sim = FarFieldSimulator::new(16000);
        let report = sim
            .generate(
                &[source.clone(), dir.path().join("missing.wav")],
                &FarFieldProfile::catalog(),
                6,
                &out_dir,
                &mut StdRng::seed_from_u64(5),
            )
            .unwrap();

        assert_eq!(report.requested, 6);
        assert_eq!(report.generated + report.failed, 6);
        assert_eq!(report.entries.len(), report.generated);
        for entry in &report.entries {
            let name = entry.path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("far_field_"));
            assert!(entry.path.exists());
            assert_eq!(entry.category, SampleCategory::FarField);
            assert_eq!(entry.provenance.source.as_ref(), Some(&source));
        }
    }

    #[test]
    fn test_foreign_rate_input_is_filtered_at_simulator_rate() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("stereo_48k.wav");
        let mono = tone(&[500.0 / 3.0, 2000.0], 48000);
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();
        audio::write_wav(&source, &AudioBuffer::new(stereo, 48000, 2)).unwrap();

        // tone() assumes 16 kHz, so at 48 kHz these are 500 Hz and 6 kHz
        let profile = FarFieldProfile::new("quiet_far", 12.0, 0.0, 0.0);
        let output = dir.path().join("out.wav");
        let sim = FarFieldSimulator::new(16000);
        sim.derive_file(&source, &output, &profile, &mut StdRng::seed_from_u64(0))
            .unwrap();

        let out = audio::read_wav(&output).unwrap();
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.channels, 1);
        assert!((out.samples.len() as i64 - 16000).abs() < 1000);

        let body = &out.samples[1000..out.samples.len() - 1000];
        assert!(power_at(body, 6000.0, 16000.0) < 0.01 * power_at(body, 500.0, 16000.0));
    }

    #[test]
    fn test_generate_without_sources_fails() {
        let dir = tempdir().unwrap();
        let sim = FarFieldSimulator::new(16000);
        assert!(matches!(
            sim.generate(&[], &FarFieldProfile::catalog(), 1, dir.path(), &mut StdRng::seed_from_u64(0)),
            Err(FarFieldError::NoSources)
        ));
    }
}
