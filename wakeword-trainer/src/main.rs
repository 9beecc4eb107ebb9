/// Wake-word trainer CLI
///
/// Trains the wake-word networks on a split dataset and exports the model
/// bundle.

use anyhow::{bail, Context, Result};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use wakeword_dataset::{Label, WAKE_WORD};
use wakeword_trainer::{
    ArtifactKind, Exporter, LabeledFeatures, MelConfig, MelExtractor, MelFrontend, ModelMetadata,
    TrainBackend, Trainer, TrainingConfig, WakeWordModelConfig,
};

#[derive(Parser, Debug)]
#[command(name = "wakeword-train")]
#[command(version, about = "Train and export a Korean wake-word model")]
struct Cli {
    /// Training data (must contain positive/ and negative/)
    #[arg(long)]
    data_dir: PathBuf,

    /// Validation data; a share of the training data is held out when absent
    #[arg(long)]
    val_dir: Option<PathBuf>,

    /// Test data scored with the final weights
    #[arg(long)]
    test_dir: Option<PathBuf>,

    #[arg(long, default_value = "models/korean_wake_word")]
    output_dir: PathBuf,

    #[arg(long, default_value_t = 50)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "wakeword_trainer=info"
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            ),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn check_split_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("Data directory not found: {}", dir.display());
    }
    for label in [Label::Positive, Label::Negative] {
        if !dir.join(label.dir_name()).is_dir() {
            bail!(
                "{} must contain positive/ and negative/ subdirectories",
                dir.display()
            );
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    check_split_dir(&cli.data_dir)?;
    for dir in cli.val_dir.iter().chain(&cli.test_dir) {
        check_split_dir(dir)?;
    }

    let training = TrainingConfig {
        epochs: cli.epochs,
        batch_size: cli.batch_size,
        learning_rate: cli.learning_rate,
        seed: cli.seed,
        ..TrainingConfig::default()
    };
    let device = NdArrayDevice::default();
    let trainer = Trainer::<TrainBackend>::new(
        training.clone(),
        WakeWordModelConfig::default(),
        device.clone(),
    )?;

    let mel = MelConfig::default();
    let extractor = MelExtractor::new(mel.clone())?;

    let data = LabeledFeatures::load_dir(&cli.data_dir, &extractor)
        .context("Failed to load training data")?;
    let val = cli
        .val_dir
        .as_ref()
        .map(|dir| LabeledFeatures::load_dir(dir, &extractor))
        .transpose()
        .context("Failed to load validation data")?;
    let test = cli
        .test_dir
        .as_ref()
        .map(|dir| LabeledFeatures::load_dir(dir, &extractor))
        .transpose()
        .context("Failed to load test data")?;

    let (model, report) = trainer.train(&data, val.as_ref(), test.as_ref())?;

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create {}", cli.output_dir.display()))?;

    let frontend = MelFrontend::<NdArray>::new(&device);
    let exported =
        Exporter::new(&cli.output_dir, WAKE_WORD).export(&frontend, &model, &device);

    let metadata = ModelMetadata::new(&mel, &training, &report, exported.written_files());
    metadata
        .save(&cli.output_dir)
        .context("Failed to write model metadata")?;

    info!("Training complete in {:.2}s", report.training_secs);

    println!();
    println!("Model: {}", cli.output_dir.display());
    println!(
        "Best epoch {} of {}{}",
        report.best_epoch,
        report.history.len(),
        if report.stopped_early {
            " (stopped early)"
        } else {
            ""
        }
    );
    println!(
        "Validation: accuracy {:.4}, precision {:.4}, recall {:.4}",
        report.validation.accuracy, report.validation.precision, report.validation.recall
    );
    if let Some(test) = &report.test {
        println!(
            "Test:       accuracy {:.4}, precision {:.4}, recall {:.4}",
            test.accuracy, test.precision, test.recall
        );
    }

    println!();
    println!("Artifacts:");
    for outcome in &exported.artifacts {
        match &outcome.result {
            Ok(_) => println!("  ✓ {}", outcome.kind.file_name()),
            Err(e) => println!("  ✗ {} ({})", outcome.kind.file_name(), e),
        }
    }

    if exported.succeeded() < ArtifactKind::ALL.len() {
        error!(
            "{} of {} artifacts failed to export",
            exported.failed(),
            ArtifactKind::ALL.len()
        );
    }

    Ok(())
}
