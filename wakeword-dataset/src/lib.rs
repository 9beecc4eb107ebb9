/// Wake-word dataset library
///
/// Synthesises Korean wake-word samples through external TTS engines,
/// post-processes them to fixed-length 16 kHz mono clips, derives far-field
/// and augmented variants, and splits the corpus into train/val/test.

pub mod audio;
pub mod audio_preprocessor;
pub mod augment;
pub mod config;
pub mod corpus;
pub mod far_field;
pub mod filter;
pub mod generator;
pub mod metadata;
pub mod quality;
pub mod splitter;
pub mod synth;
pub mod words;

// Re-export main types
pub use audio::{read_wav, write_wav, AudioBuffer, AudioError, AudioSample};
pub use audio_preprocessor::{
    AudioPostProcessor, CompressorConfig, PostProcessError, PostProcessorConfig,
    TARGET_DURATION_SECS, TARGET_SAMPLE_RATE,
};
pub use augment::{AugmentConfig, AugmentError, AugmentReport, Augmenter};
pub use config::{ConfigError, DatasetPreset, PipelineConfig, SampleCounts};
pub use corpus::{Corpus, CorpusEntry, CorpusError, Label, Provenance, SampleCategory, SampleId};
pub use far_field::{FarFieldError, FarFieldProfile, FarFieldReport, FarFieldSimulator};
pub use generator::{
    plan_jobs, GenerateError, GenerationReport, JobOutcome, SampleGenerator, SynthesisJob,
};
pub use metadata::{DatasetMetadata, GenerationMetadata};
pub use quality::{QualityChecker, QualityReport};
pub use splitter::{DatasetSplits, DatasetSplitter, Split, SplitError, SplitRatios, SplitStats};
pub use synth::{
    EngineKind, EngineRegistry, EngineStatus, GoogleEngine, NeuralEngine, OfflineEngine,
    SpeechSynthesizer, SynthesisError, VoiceParams,
};
pub use words::{WAKE_WORD, WAKE_WORD_ROMANIZED};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
