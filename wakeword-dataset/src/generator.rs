//! Bounded-concurrency sample generation
//!
//! Jobs are planned up front, dispatched to at most `concurrency` tokio tasks,
//! and their outcomes collected from an mpsc channel in completion order.

use crate::audio::{self, AudioError};
use crate::audio_preprocessor::{AudioPostProcessor, PostProcessError};
use crate::corpus::{list_wav_files, CorpusEntry, CorpusError, Provenance, SampleCategory};
use crate::synth::{EngineKind, EngineRegistry, SynthesisError, VoiceParams};
use crate::words;
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

/// Default number of concurrent synthesis tasks
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Per-job errors
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Engine not registered: {0}")]
    EngineMissing(EngineKind),

    #[error("Synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Post-processing failed: {0}")]
    PostProcess(#[from] PostProcessError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One sample to synthesise
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisJob {
    pub index: usize,
    pub category: SampleCategory,
    pub text: String,
    pub engine: EngineKind,
    pub params: VoiceParams,
}

/// Plan positive and negative jobs over the registered engines.
///
/// Every job gets a random engine and a random preset of that engine;
/// negatives draw their text from the negative vocabulary.
pub fn plan_jobs<R: Rng + ?Sized>(
    registry: &EngineRegistry,
    positive: usize,
    negative: usize,
    rng: &mut R,
) -> Vec<SynthesisJob> {
    let engines: Vec<(EngineKind, Vec<VoiceParams>)> = registry
        .kinds()
        .into_iter()
        .filter_map(|kind| registry.get(kind).map(|e| (kind, e.presets())))
        .filter(|(_, presets)| !presets.is_empty())
        .collect();

    if engines.is_empty() {
        return Vec::new();
    }

    let vocabulary = words::negative_vocabulary();
    let mut jobs = Vec::with_capacity(positive + negative);

    for (category, count) in [
        (SampleCategory::Positive, positive),
        (SampleCategory::Negative, negative),
    ] {
        for index in 0..count {
            let text = match category {
                SampleCategory::Positive => words::WAKE_WORD,
                _ => vocabulary.choose(rng).copied().unwrap_or(words::NEAR_MISSES[0]),
            };

            let Some((engine, presets)) = engines.choose(rng) else {
                continue;
            };
            let Some(params) = presets.choose(rng) else {
                continue;
            };

            jobs.push(SynthesisJob {
                index,
                category,
                text: text.to_string(),
                engine: *engine,
                params: params.clone(),
            });
        }
    }

    jobs
}

/// Result of one job, sent back over the results channel
#[derive(Debug)]
pub struct JobOutcome {
    pub index: usize,
    pub category: SampleCategory,
    pub engine: EngineKind,
    pub result: Result<CorpusEntry, GenerateError>,
}

/// Batch summary
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub requested: usize,
    pub generated: usize,
    pub failed: usize,

    /// Set when the batch was cut short by the shutdown signal
    pub interrupted: bool,

    pub entries: Vec<CorpusEntry>,
}

impl GenerationReport {
    pub fn merge(&mut self, other: GenerationReport) {
        self.requested += other.requested;
        self.generated += other.generated;
        self.failed += other.failed;
        self.interrupted |= other.interrupted;
        self.entries.extend(other.entries);
    }
}

/// Synthesise, post-process and write samples with bounded concurrency
#[derive(Debug, Clone)]
pub struct SampleGenerator {
    registry: EngineRegistry,
    processor: Arc<AudioPostProcessor>,
    raw_dir: PathBuf,
    concurrency: usize,
}

impl SampleGenerator {
    pub fn new(
        registry: EngineRegistry,
        processor: AudioPostProcessor,
        raw_dir: impl Into<PathBuf>,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            processor: Arc::new(processor),
            raw_dir: raw_dir.into(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every job to completion
    pub async fn run(&self, jobs: Vec<SynthesisJob>) -> GenerationReport {
        self.run_until(jobs, std::future::pending()).await
    }

    /// Run jobs until done or until `shutdown` resolves.
    ///
    /// On shutdown no further jobs are dispatched and the report is returned
    /// with what completed so far; in-flight files may be left on disk.
    pub async fn run_until<F>(&self, jobs: Vec<SynthesisJob>, shutdown: F) -> GenerationReport
    where
        F: Future<Output = ()>,
    {
        let mut report = GenerationReport {
            requested: jobs.len(),
            ..Default::default()
        };

        for category in [SampleCategory::Positive, SampleCategory::Negative] {
            let dir = self.raw_dir.join(category.relative_dir());
            if let Err(e) = fs::create_dir_all(&dir) {
                error!("Cannot create {}: {}", dir.display(), e);
                report.failed = report.requested;
                return report;
            }
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<JobOutcome>(self.concurrency * 2);

        info!(
            "Dispatching {} synthesis jobs ({} concurrent)",
            jobs.len(),
            self.concurrency
        );

        let worker = self.clone();
        let dispatcher = tokio::spawn(async move {
            for job in jobs {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let tx = tx.clone();
                let worker = worker.clone();

                tokio::spawn(async move {
                    let outcome = JobOutcome {
                        index: job.index,
                        category: job.category,
                        engine: job.engine,
                        result: worker.execute(&job, timestamp).await,
                    };
                    drop(permit);
                    if tx.send(outcome).await.is_err() {
                        debug!("Results receiver dropped");
                    }
                });
            }
        });

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    warn!("Generation interrupted");
                    dispatcher.abort();
                    report.interrupted = true;
                    break;
                }
                outcome = rx.recv() => {
                    let Some(outcome) = outcome else { break };
                    match outcome.result {
                        Ok(entry) => {
                            report.generated += 1;
                            report.entries.push(entry);
                        }
                        Err(e) => {
                            warn!(
                                "{} sample {} ({}) failed: {}",
                                outcome.category, outcome.index, outcome.engine, e
                            );
                            report.failed += 1;
                        }
                    }

                    let done = report.generated + report.failed;
                    if done % 10 == 0 {
                        info!("Progress: {}/{}", done, report.requested);
                    }
                }
            }
        }

        info!(
            "Generation finished: {} generated, {} failed of {}",
            report.generated, report.failed, report.requested
        );

        report
    }

    async fn execute(&self, job: &SynthesisJob, timestamp: i64) -> Result<CorpusEntry, GenerateError> {
        let engine = self
            .registry
            .get(job.engine)
            .ok_or(GenerateError::EngineMissing(job.engine))?;

        let raw = engine.synthesize(&job.text, &job.params).await?;

        let path = self.raw_dir.join(job.category.relative_dir()).join(format!(
            "{}_{}_{}_{:04}.wav",
            job.category,
            job.engine,
            timestamp,
            job.index
        ));

        let processor = self.processor.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), GenerateError> {
            let processed = processor.process(&raw)?;
            audio::write_wav(&target, &processed)?;
            Ok(())
        })
        .await
        .map_err(|e| GenerateError::Worker(e.to_string()))??;

        let provenance = Provenance {
            engine: Some(job.engine.name().to_string()),
            text: Some(job.text.clone()),
            params: job.params.to_map(),
            source: None,
        };

        Ok(CorpusEntry::new(path, job.category, provenance))
    }
}

/// Post-process every WAV in `input_dir` into `output_dir`, keeping names
pub fn process_directory(
    processor: &AudioPostProcessor,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<GenerationReport, GenerateError> {
    fs::create_dir_all(output_dir)?;

    let files = list_wav_files(input_dir)?;

    let mut report = GenerationReport {
        requested: files.len(),
        ..Default::default()
    };

    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = output_dir.join(name);
        match processor.process_file(&file, &target) {
            Ok(_) => report.generated += 1,
            Err(e) => {
                warn!("Skipping {}: {}", file.display(), e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Processed {}/{} files from {}",
        report.generated,
        report.requested,
        input_dir.display()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::audio_preprocessor::PostProcessorConfig;
    use crate::synth::MockSpeechSynthesizer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn offline_params() -> VoiceParams {
        VoiceParams::Offline {
            voice: "ko".into(),
            rate_wpm: 150,
            amplitude: 90,
        }
    }

    fn mock_engine() -> MockSpeechSynthesizer {
        let mut engine = MockSpeechSynthesizer::new();
        engine.expect_kind().return_const(EngineKind::Offline);
        engine.expect_presets().returning(|| vec![offline_params()]);
        engine.expect_synthesize().returning(|text, _| {
            if text.contains("실패") {
                Err(SynthesisError::CommandFailed {
                    tool: "espeak-ng".into(),
                    code: 1,
                    stderr: "boom".into(),
                })
            } else {
                Ok(AudioBuffer::mono(vec![0.25; 22050], 22050))
            }
        });
        engine
    }

    fn generator(raw_dir: &Path, concurrency: usize) -> SampleGenerator {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(mock_engine()));
        let processor = AudioPostProcessor::new(PostProcessorConfig::default()).unwrap();
        SampleGenerator::new(registry, processor, raw_dir, concurrency)
    }

    fn job(index: usize, category: SampleCategory, text: &str) -> SynthesisJob {
        SynthesisJob {
            index,
            category,
            text: text.to_string(),
            engine: EngineKind::Offline,
            params: offline_params(),
        }
    }

    #[test]
    fn test_plan_jobs() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(mock_engine()));

        let jobs = plan_jobs(&registry, 3, 5, &mut StdRng::seed_from_u64(1));
        assert_eq!(jobs.len(), 8);
        assert!(jobs[..3]
            .iter()
            .all(|j| j.category == SampleCategory::Positive && j.text == words::WAKE_WORD));
        assert!(jobs[3..]
            .iter()
            .all(|j| j.category == SampleCategory::Negative && j.text != words::WAKE_WORD));
        assert_eq!(jobs[7].index, 4);
    }

    #[test]
    fn test_plan_jobs_without_engines() {
        let jobs = plan_jobs(&EngineRegistry::new(), 3, 5, &mut StdRng::seed_from_u64(1));
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_run_writes_processed_files() {
        let dir = tempdir().unwrap();
        let generator = generator(dir.path(), 2);

        let jobs = vec![
            job(0, SampleCategory::Positive, words::WAKE_WORD),
            job(1, SampleCategory::Positive, words::WAKE_WORD),
            job(0, SampleCategory::Negative, "음악"),
        ];
        let report = generator.run(jobs).await;

        assert_eq!(report.requested, 3);
        assert_eq!(report.generated, 3);
        assert_eq!(report.failed, 0);
        assert!(!report.interrupted);

        for entry in &report.entries {
            let name = entry.path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with(&format!("{}_espeak_", entry.category)));
            assert!(name.ends_with("_0000.wav") || name.ends_with("_0001.wav"));

            let written = audio::read_wav(&entry.path).unwrap();
            assert_eq!(written.sample_rate, 16000);
            assert_eq!(written.channels, 1);
            assert_eq!(written.samples.len(), 32000);
            assert_eq!(entry.provenance.engine.as_deref(), Some("espeak"));
        }
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let dir = tempdir().unwrap();
        let generator = generator(dir.path(), 1);

        let mut missing_engine = job(2, SampleCategory::Negative, "음악");
        missing_engine.engine = EngineKind::Google;

        let jobs = vec![
            job(0, SampleCategory::Negative, "실패"),
            job(1, SampleCategory::Negative, "음악"),
            missing_engine,
        ];
        let report = generator.run(jobs).await;

        assert_eq!(report.generated, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_batch() {
        let dir = tempdir().unwrap();
        let generator = generator(dir.path(), 1);

        let jobs = (0..50)
            .map(|i| job(i, SampleCategory::Positive, words::WAKE_WORD))
            .collect();
        let report = generator.run_until(jobs, async {}).await;

        assert!(report.interrupted);
        assert_eq!(report.requested, 50);
        assert!(report.generated + report.failed <= 50);
    }

    #[test]
    fn test_process_directory() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        fs::create_dir_all(&input).unwrap();
        audio::write_wav(input.join("a.wav"), &AudioBuffer::new(vec![0.1; 44100 * 2], 44100, 2))
            .unwrap();
        fs::write(input.join("broken.wav"), b"not a wav").unwrap();

        let processor = AudioPostProcessor::new(PostProcessorConfig::default()).unwrap();
        let output = dir.path().join("out");
        let report = process_directory(&processor, &input, &output).unwrap();

        assert_eq!(report.generated, 1);
        assert_eq!(report.failed, 1);
        let processed = audio::read_wav(output.join("a.wav")).unwrap();
        assert_eq!(processed.samples.len(), 32000);
    }
}
