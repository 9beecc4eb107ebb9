/// Audio buffer and WAV I/O
///
/// Every stage of the corpus pipeline exchanges `AudioBuffer`s: interleaved
/// f32 samples in [-1.0, 1.0] plus the rate and channel count they were
/// recorded with.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace};

/// Audio sample format (f32 normalized to -1.0 to 1.0)
pub type AudioSample = f32;

/// Scale used for 16-bit PCM conversion in both directions.
const PCM16_SCALE: f32 = 32768.0;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to read WAV file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: hound::Error,
    },

    #[error("Failed to write WAV file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: hound::Error,
    },

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),

    #[error("Empty audio: {0}")]
    Empty(String),
}

/// In-memory PCM clip
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples
    pub samples: Vec<AudioSample>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<AudioSample>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Mono buffer shortcut
    pub fn mono(samples: Vec<AudioSample>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Peak absolute amplitude
    pub fn peak(&self) -> f32 {
        peak(&self.samples)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Peak absolute amplitude of a sample slice
pub fn peak(samples: &[AudioSample]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Read a WAV file into an `AudioBuffer`.
///
/// Integer formats are scaled by `1 / 2^(bits - 1)`, float files are taken
/// as-is. Zero-length files are rejected.
pub fn read_wav(path: impl AsRef<Path>) -> Result<AudioBuffer, AudioError> {
    let path = path.as_ref();
    let shown = path.display().to_string();

    let mut reader = WavReader::open(path).map_err(|source| AudioError::Read {
        path: shown.clone(),
        source,
    })?;

    let spec = reader.spec();
    trace!(
        "Reading {}: {} Hz, {} ch, {} bit {:?}",
        shown,
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        spec.sample_format
    );

    let samples: Vec<AudioSample> = match spec.sample_format {
        SampleFormat::Float => {
            if spec.bits_per_sample != 32 {
                return Err(AudioError::UnsupportedFormat(format!(
                    "{}-bit float",
                    spec.bits_per_sample
                )));
            }
            reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|source| AudioError::Read {
                    path: shown.clone(),
                    source,
                })?
        }
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(AudioError::UnsupportedFormat(format!(
                    "{}-bit integer",
                    spec.bits_per_sample
                )));
            }
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|source| AudioError::Read {
                    path: shown.clone(),
                    source,
                })?
        }
    };

    if samples.is_empty() || spec.channels == 0 {
        return Err(AudioError::Empty(shown));
    }

    Ok(AudioBuffer::new(samples, spec.sample_rate, spec.channels))
}

/// Write a buffer as 16-bit PCM WAV.
pub fn write_wav(path: impl AsRef<Path>, buffer: &AudioBuffer) -> Result<(), AudioError> {
    let path = path.as_ref();
    let shown = path.display().to_string();

    let spec = WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec).map_err(|source| AudioError::Write {
        path: shown.clone(),
        source,
    })?;

    for &sample in &buffer.samples {
        writer
            .write_sample(f32_to_i16(sample))
            .map_err(|source| AudioError::Write {
                path: shown.clone(),
                source,
            })?;
    }

    writer.finalize().map_err(|source| AudioError::Write {
        path: shown.clone(),
        source,
    })?;

    debug!("Wrote {} samples to {}", buffer.samples.len(), shown);
    Ok(())
}

/// Convert a float sample to i16 PCM (round, then clamp)
pub fn f32_to_i16(sample: AudioSample) -> i16 {
    (sample * PCM16_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert an i16 PCM sample to float
pub fn i16_to_f32(sample: i16) -> AudioSample {
    sample as f32 / PCM16_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_pcm16_conversion_is_lossless_for_pcm_values() {
        for s in [i16::MIN, -12345, -1, 0, 1, 4096, i16::MAX] {
            assert_eq!(f32_to_i16(i16_to_f32(s)), s);
        }
    }

    #[test]
    fn test_f32_to_i16_clamping() {
        assert_eq!(f32_to_i16(1.5), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_wav_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let samples: Vec<f32> = (0..1600).map(|i| ((i % 50) as f32 / 50.0) - 0.5).collect();
        let buffer = AudioBuffer::mono(samples.clone(), 16000);
        write_wav(&path, &buffer).unwrap();

        let loaded = read_wav(&path).unwrap();
        assert_eq!(loaded.sample_rate, 16000);
        assert_eq!(loaded.channels, 1);
        assert_eq!(loaded.samples.len(), samples.len());
        for (a, b) in loaded.samples.iter().zip(&samples) {
            assert_relative_eq!(*a, *b, epsilon = 1.0 / 32768.0);
        }
    }

    #[test]
    fn test_read_float_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for s in [0.25f32, -0.25, 0.5, -0.5] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let loaded = read_wav(&path).unwrap();
        assert_eq!(loaded.channels, 2);
        assert_eq!(loaded.frames(), 2);
        assert_eq!(loaded.samples, vec![0.25, -0.25, 0.5, -0.5]);
    }

    #[test]
    fn test_read_empty_wav_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        WavWriter::create(&path, spec).unwrap().finalize().unwrap();

        assert!(matches!(read_wav(&path), Err(AudioError::Empty(_))));
    }

    #[test]
    fn test_read_missing_file_fails() {
        assert!(matches!(
            read_wav("/nonexistent/clip.wav"),
            Err(AudioError::Read { .. })
        ));
    }

    #[test]
    fn test_duration() {
        let buffer = AudioBuffer::new(vec![0.0; 32000], 16000, 2);
        assert_eq!(buffer.frames(), 16000);
        assert_relative_eq!(buffer.duration_secs(), 1.0);
    }
}
