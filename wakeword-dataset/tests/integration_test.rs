/// Integration tests for the dataset pipeline
///
/// Post-processing of raw clips on disk, far-field derivation and splitting of
/// a generated corpus.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use test_case::test_case;
use wakeword_dataset::{
    read_wav, write_wav, AudioBuffer, AudioPostProcessor, AudioSample, Corpus, DatasetSplitter,
    FarFieldProfile, FarFieldSimulator, Label, PostProcessorConfig, QualityChecker,
    SampleCategory, Split, SplitRatios,
};

/// Speech-like clip: three formants under a fade-in/fade-out envelope
fn speech_like(duration_secs: f32, sample_rate: u32, channels: u16) -> Vec<AudioSample> {
    let frames = (sample_rate as f32 * duration_secs) as usize;

    (0..frames)
        .flat_map(|i| {
            let t = i as f32 / sample_rate as f32;
            let f1 = (2.0 * std::f32::consts::PI * 500.0 * t).sin() * 0.3;
            let f2 = (2.0 * std::f32::consts::PI * 1500.0 * t).sin() * 0.2;
            let f3 = (2.0 * std::f32::consts::PI * 2500.0 * t).sin() * 0.1;
            let envelope = (t * 8.0).min(1.0) * ((duration_secs - t) * 8.0).clamp(0.0, 1.0);
            std::iter::repeat((f1 + f2 + f3) * envelope).take(channels as usize)
        })
        .collect()
}

fn write_clips(dir: &Path, count: usize) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        write_wav(
            dir.join(format!("clip_{:03}.wav", i)),
            &AudioBuffer::mono(vec![0.1; 1600], 16000),
        )
        .unwrap();
    }
}

#[test_case(1.0, 22050, 1 ; "short clip is padded")]
#[test_case(2.0, 16000, 1 ; "conforming clip")]
#[test_case(3.0, 44100, 2 ; "long stereo clip is cropped")]
#[test_case(1.5, 24000, 1 ; "tts rate")]
#[test_case(2.5, 48000, 2 ; "studio rate")]
fn test_post_processed_files_are_fixed_length(duration: f32, sample_rate: u32, channels: u16) {
    let dir = tempdir().unwrap();
    let input = dir.path().join("raw.wav");
    let output = dir.path().join("processed.wav");

    write_wav(
        &input,
        &AudioBuffer::new(speech_like(duration, sample_rate, channels), sample_rate, channels),
    )
    .unwrap();

    let processor = AudioPostProcessor::new(PostProcessorConfig::default()).unwrap();
    processor.process_file(&input, &output).unwrap();

    let written = read_wav(&output).unwrap();
    assert_eq!(written.sample_rate, 16000);
    assert_eq!(written.channels, 1);
    assert_eq!(written.samples.len(), 32000);
}

#[test]
fn test_post_processing_is_idempotent_on_disk() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("raw.wav");
    let once = dir.path().join("once.wav");
    let twice = dir.path().join("twice.wav");

    write_wav(&input, &AudioBuffer::new(speech_like(1.3, 22050, 2), 22050, 2)).unwrap();

    let processor = AudioPostProcessor::new(PostProcessorConfig::default()).unwrap();
    processor.process_file(&input, &once).unwrap();
    processor.process_file(&once, &twice).unwrap();

    assert_eq!(fs::read(&once).unwrap(), fs::read(&twice).unwrap());
}

#[test]
fn test_far_field_copies_stay_in_range() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("positive.wav");
    write_wav(&source, &AudioBuffer::mono(speech_like(2.0, 16000, 1), 16000)).unwrap();

    let simulator = FarFieldSimulator::new(16000);
    let report = simulator
        .generate(
            &[source],
            &FarFieldProfile::catalog(),
            8,
            &dir.path().join("far_field"),
            &mut StdRng::seed_from_u64(21),
        )
        .unwrap();

    assert_eq!(report.generated, 8);
    for entry in report.entries {
        let clip = read_wav(&entry.path).unwrap();
        assert_eq!(clip.samples.len(), 32000);
        assert!(clip.peak() <= 1.0);
        assert_eq!(entry.label, Label::Positive);
    }
}

#[test]
fn test_split_100_positive_300_negative() {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("raw");
    write_clips(&raw.join("positive"), 100);
    write_clips(&raw.join("negative"), 300);

    let corpus = Corpus::scan(&raw).unwrap();
    assert_eq!(corpus.len(), 400);

    let splitter = DatasetSplitter::new(SplitRatios::default()).unwrap();
    let out = dir.path().join("dataset");
    let summary = splitter
        .split(&corpus, &out, &mut StdRng::seed_from_u64(42))
        .unwrap();

    assert_eq!(
        (summary.train.total, summary.val.total, summary.test.total),
        (280, 60, 60)
    );
    assert_eq!(
        summary.train.positive + summary.val.positive + summary.test.positive,
        100
    );

    // Every manifest line points at a copied file; no file is listed twice
    let mut sources = HashSet::new();
    let mut total = 0;
    for split in Split::ALL {
        let split_dir = out.join(split.name());
        let manifest =
            fs::read_to_string(split_dir.join(format!("{}_files.txt", split.name()))).unwrap();
        for line in manifest.lines() {
            let (rel, _) = line.rsplit_once(' ').unwrap();
            assert!(split_dir.join(rel).is_file());
            assert!(sources.insert(format!("{}/{}", split.name(), rel)));
            total += 1;
        }
    }
    assert_eq!(total, 400);
}

#[test]
fn test_quality_check_on_scanned_corpus() {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("raw");
    fs::create_dir_all(raw.join("positive")).unwrap();
    fs::create_dir_all(raw.join("far_field")).unwrap();

    write_wav(
        raw.join("positive/ok.wav"),
        &AudioBuffer::mono(vec![0.2; 32000], 16000),
    )
    .unwrap();
    write_wav(
        raw.join("far_field/too_short.wav"),
        &AudioBuffer::mono(vec![0.2; 800], 16000),
    )
    .unwrap();

    let corpus = Corpus::scan(&raw).unwrap();
    assert_eq!(corpus.by_category(SampleCategory::FarField).count(), 1);

    let report = QualityChecker::default().check(&corpus);
    assert_eq!(report.total_files, 2);
    assert_eq!(report.valid_files, 1);
}
