/// Integration tests for the trainer
///
/// Feature extraction on post-processed clips, and a short training run from
/// split directories through export and metadata.

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use test_case::test_case;
use wakeword_dataset::{write_wav, AudioBuffer};
use wakeword_trainer::{
    read_artifact_header, ArtifactKind, Exporter, LabeledFeatures, MelConfig, MelExtractor,
    MelFrontend, ModelMetadata, TrainBackend, Trainer, TrainingConfig, WakeWordModelConfig,
};

fn chirp(start_hz: f32, len: usize, sample_rate: u32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * (start_hz + 400.0 * t) * t).sin() * 0.4
        })
        .collect()
}

fn write_split(dir: &Path, positives: usize, negatives: usize) {
    for (name, count, base) in [("positive", positives, 2500.0), ("negative", negatives, 300.0)] {
        let class_dir = dir.join(name);
        fs::create_dir_all(&class_dir).unwrap();
        for i in 0..count {
            write_wav(
                class_dir.join(format!("{}_{:03}.wav", name, i)),
                &AudioBuffer::mono(chirp(base + 20.0 * i as f32, 32000, 16000), 16000),
            )
            .unwrap();
        }
    }
}

#[test_case(1152 ; "exact input length")]
#[test_case(32000 ; "two second clip")]
#[test_case(400 ; "shorter than one frame")]
fn test_features_always_five_by_thirty_two(len: usize) {
    let extractor = MelExtractor::new(MelConfig::default()).unwrap();
    let features = extractor.extract_clip(&chirp(500.0, len, 16000)).unwrap();
    assert_eq!(features.shape(), (5, 32));
    assert!(features.as_slice().iter().all(|v| v.is_finite() && v.abs() <= 1.0));
}

#[test]
fn test_train_and_export_from_split_directories() {
    let dir = tempdir().unwrap();
    let train_dir = dir.path().join("train");
    let val_dir = dir.path().join("val");
    let out = dir.path().join("model");
    write_split(&train_dir, 10, 20);
    write_split(&val_dir, 4, 6);
    fs::create_dir_all(&out).unwrap();

    let mel = MelConfig::default();
    let extractor = MelExtractor::new(mel.clone()).unwrap();
    let train = LabeledFeatures::load_dir(&train_dir, &extractor).unwrap();
    let val = LabeledFeatures::load_dir(&val_dir, &extractor).unwrap();
    assert_eq!((train.count_positive(), train.count_negative()), (10, 20));

    let training = TrainingConfig {
        epochs: 3,
        batch_size: 16,
        ..TrainingConfig::default()
    };
    let device = NdArrayDevice::default();
    let trainer = Trainer::<TrainBackend>::new(
        training.clone(),
        WakeWordModelConfig::default(),
        device.clone(),
    )
    .unwrap();

    let (model, report) = trainer.train(&train, Some(&val), None).unwrap();
    assert_eq!(report.history.len(), 3);
    assert_eq!(report.val_samples, 10);
    assert!(report.validation.loss.is_finite());

    let frontend = MelFrontend::<NdArray>::new(&device);
    let exported = Exporter::new(&out, "하이넛지").export(&frontend, &model, &device);
    assert_eq!(exported.succeeded(), 3);

    for kind in ArtifactKind::ALL {
        let header = read_artifact_header(out.join(kind.file_name())).unwrap();
        assert_eq!(header.output_shape, kind.output_shape());
    }

    let metadata = ModelMetadata::new(&mel, &training, &report, exported.written_files());
    let path = metadata.save(&out).unwrap();
    let loaded = ModelMetadata::load(&path).unwrap();
    assert_eq!(loaded.model_files.len(), 3);
    assert_eq!(loaded.epochs_run, 3);
}

#[test]
fn test_too_few_positives_is_fatal() {
    let dir = tempdir().unwrap();
    write_split(dir.path(), 3, 25);

    let extractor = MelExtractor::new(MelConfig::default()).unwrap();
    let data = LabeledFeatures::load_dir(dir.path(), &extractor).unwrap();
    assert!(data.ensure_trainable().is_err());
}
