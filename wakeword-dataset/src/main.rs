/// Wake-word dataset CLI
///
/// Generates, post-processes, augments and splits a Korean wake-word corpus.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use wakeword_dataset::corpus::list_wav_files;
use wakeword_dataset::generator::process_directory;
use wakeword_dataset::{
    plan_jobs, AudioPostProcessor, Augmenter, Corpus, DatasetMetadata, DatasetPreset,
    DatasetSplitter, EngineRegistry, FarFieldError, FarFieldProfile, FarFieldSimulator,
    GenerationMetadata, GenerationReport, PipelineConfig, QualityChecker, SampleCategory,
    SampleCounts, SampleGenerator, SplitRatios, SplitStats, WAKE_WORD,
};

#[derive(Parser, Debug)]
#[command(name = "wakeword-dataset")]
#[command(version, about = "Korean wake-word dataset generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show dataset presets and directory layout
    Info,

    /// Show which TTS engines are available
    Engines,

    /// Synthesise, post-process, augment and split a dataset
    Generate(GenerateArgs),

    /// Post-process every WAV file of a directory
    Process {
        #[arg(long)]
        input_dir: PathBuf,

        #[arg(long)]
        output_dir: PathBuf,
    },

    /// Derive far-field copies from a directory of clips
    FarField {
        #[arg(long)]
        input_dir: PathBuf,

        #[arg(long)]
        output_dir: PathBuf,

        /// Number of copies to write
        #[arg(long, default_value_t = 100)]
        count: usize,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Split an existing raw corpus into train/val/test
    Split {
        /// Corpus root holding positive/, negative/, far_field/
        #[arg(long)]
        raw_dir: PathBuf,

        #[arg(long)]
        output_dir: PathBuf,

        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Dataset root directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Dataset size preset
    #[arg(long, value_enum)]
    preset: Option<DatasetPreset>,

    /// Custom positive sample count
    #[arg(long)]
    positive: Option<usize>,

    /// Custom negative sample count
    #[arg(long)]
    negative: Option<usize>,

    /// Custom far-field sample count
    #[arg(long)]
    far_field_samples: Option<usize>,

    /// Skip far-field simulation
    #[arg(long)]
    no_far_field: bool,

    /// Write noise/speed/gain variants
    #[arg(long)]
    augment: bool,

    /// Concurrent synthesis tasks
    #[arg(long)]
    concurrency: Option<usize>,

    /// RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// YAML pipeline config, overridden by the flags above
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "wakeword_dataset=info"
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            ),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Info => {
            show_info();
            Ok(())
        }
        Command::Engines => {
            show_engines();
            Ok(())
        }
        Command::Generate(args) => generate(args).await,
        Command::Process {
            input_dir,
            output_dir,
        } => process(input_dir, output_dir),
        Command::FarField {
            input_dir,
            output_dir,
            count,
            seed,
        } => far_field(input_dir, output_dir, count, seed),
        Command::Split {
            raw_dir,
            output_dir,
            seed,
        } => split(raw_dir, output_dir, seed),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn show_info() {
    println!("Wake-word dataset generator v{}", wakeword_dataset::VERSION);
    println!("Wake word: {}", WAKE_WORD);
    println!();
    println!("Presets:");
    for preset in DatasetPreset::ALL {
        let c = preset.counts();
        println!(
            "  {:8} positive {:5} + negative {:5} + far-field {:4} = {:5}",
            preset.name(),
            c.positive,
            c.negative,
            c.far_field,
            c.total()
        );
    }
    println!();
    println!("Layout:");
    println!("  raw/{{positive,negative,far_field,enhanced}}/   generated samples");
    println!("  {{train,val,test}}/{{positive,negative}}/         split copies");
    println!("  {{split}}/{{split}}_files.txt                    'relative/path label' manifest");
    println!("  dataset_metadata.json, raw/metadata.json");
}

fn show_engines() {
    println!("TTS engines:");
    for status in EngineRegistry::status() {
        if status.available {
            println!("  ✓ {}", status.kind);
        } else {
            println!("  ✗ {} (missing: {})", status.kind, status.missing.join(", "));
        }
    }
}

fn build_config(args: &GenerateArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(preset) = args.preset {
        config.apply_preset(preset);
    }
    if args.positive.is_some() || args.negative.is_some() || args.far_field_samples.is_some() {
        config.preset = None;
        config.counts = SampleCounts {
            positive: args.positive.unwrap_or(config.counts.positive),
            negative: args.negative.unwrap_or(config.counts.negative),
            far_field: args.far_field_samples.unwrap_or(config.counts.far_field),
        };
    }
    if args.no_far_field {
        config.far_field = false;
    }
    if args.augment {
        config.augment = true;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    config.validate()?;
    Ok(config)
}

/// Ctrl-C stopped synthesis before the corpus was complete
#[derive(Error, Debug)]
#[error("Generation interrupted")]
struct Interrupted;

/// Exit status for an error returned by a subcommand
fn exit_code(err: &anyhow::Error) -> i32 {
    if err.is::<Interrupted>() {
        130
    } else {
        1
    }
}

/// Counts shown at the end of a generation run
#[derive(Debug, Default)]
struct Summary {
    synthesis: GenerationReport,
    far_field: (usize, usize),
    augmented: (usize, usize),
    splits: Option<[SplitStats; 3]>,

    /// Stages that failed after synthesis, with their error
    failures: Vec<(&'static str, String)>,
}

impl Summary {
    fn record_failure(&mut self, stage: &'static str, err: impl std::fmt::Display) {
        let message = format!("{:#}", err);
        error!("{} stage failed: {}", stage, message);
        self.failures.push((stage, message));
    }

    /// Outcome of the whole run, once the summary has been shown
    fn finish(&self) -> Result<()> {
        if self.synthesis.interrupted {
            return Err(Interrupted.into());
        }
        if !self.failures.is_empty() {
            let stages: Vec<&str> = self.failures.iter().map(|(stage, _)| *stage).collect();
            bail!("{} stage(s) failed: {}", stages.len(), stages.join(", "));
        }
        Ok(())
    }
}

fn print_summary(summary: &Summary) {
    println!();
    println!("Generation summary");
    println!(
        "  synthesised: {} generated, {} failed of {}",
        summary.synthesis.generated, summary.synthesis.failed, summary.synthesis.requested
    );
    println!(
        "  far-field:   {} generated, {} failed",
        summary.far_field.0, summary.far_field.1
    );
    println!(
        "  augmented:   {} generated, {} failed",
        summary.augmented.0, summary.augmented.1
    );
    if let Some([train, val, test]) = summary.splits {
        println!(
            "  splits:      train {} / val {} / test {}",
            train.total, val.total, test.total
        );
    }
    for (stage, message) in &summary.failures {
        println!("  ✗ {}: {}", stage, message);
    }
    if summary.synthesis.interrupted {
        println!("  (interrupted: partial files may remain on disk)");
    }
}

async fn generate(args: GenerateArgs) -> Result<()> {
    let started = Instant::now();
    let config = build_config(&args)?;
    let raw_dir = config.raw_dir();

    let mut registry = EngineRegistry::detect(&config.scratch_dir());
    if !config.engines.is_empty() {
        registry.retain(&config.engines);
    }
    if registry.is_empty() {
        bail!("No TTS engine available; install gtts-cli, edge-tts (with ffmpeg) or espeak-ng");
    }
    info!("Using engines: {}", registry.names().join(", "));

    let mut rng = make_rng(config.seed);
    let mut summary = Summary::default();

    // Synthesis
    let processor = AudioPostProcessor::new(config.post_processor.clone())?;
    let generator =
        SampleGenerator::new(registry.clone(), processor, &raw_dir, config.concurrency);
    let jobs = plan_jobs(
        &registry,
        config.counts.positive,
        config.counts.negative,
        &mut rng,
    );
    summary.synthesis = generator
        .run_until(jobs, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    if summary.synthesis.interrupted {
        print_summary(&summary);
        return summary.finish();
    }

    let mut corpus = Corpus::new();
    corpus.extend(summary.synthesis.entries.iter().cloned());

    // Far-field
    if config.far_field && config.counts.far_field > 0 {
        let sources: Vec<PathBuf> = corpus
            .by_category(SampleCategory::Positive)
            .map(|e| e.path.clone())
            .collect();
        let simulator = FarFieldSimulator::new(config.post_processor.target_sample_rate);
        match simulator.generate(
            &sources,
            &config.far_field_profiles,
            config.counts.far_field,
            &raw_dir.join(SampleCategory::FarField.relative_dir()),
            &mut rng,
        ) {
            Ok(report) => {
                summary.far_field = (report.generated, report.failed);
                corpus.extend(report.entries);
            }
            Err(FarFieldError::NoSources) => warn!("Far-field stage skipped: no positive samples"),
            Err(e) => summary.record_failure("far-field", e),
        }
    }

    // Augmentation
    if config.augment {
        let positives: Vec<PathBuf> = corpus
            .by_category(SampleCategory::Positive)
            .map(|e| e.path.clone())
            .collect();
        let negatives: Vec<PathBuf> = corpus
            .by_category(SampleCategory::Negative)
            .map(|e| e.path.clone())
            .collect();
        let augmented = Augmenter::new(config.augmentation.clone())
            .and_then(|augmenter| augmenter.augment(&positives, &negatives, &raw_dir, &mut rng));
        match augmented {
            Ok(report) => {
                summary.augmented = (report.generated, report.failed);
                corpus.extend(report.entries);
            }
            Err(e) => summary.record_failure("augmentation", e),
        }
    }

    if let Err(e) = GenerationMetadata::new(
        &registry,
        &config.post_processor,
        &config.far_field_profiles,
        &corpus,
    )
    .save(&raw_dir)
    {
        summary.record_failure("generation metadata", e);
    }

    if corpus.is_empty() {
        print_summary(&summary);
        bail!("No samples were generated");
    }

    // Quality + split
    let quality = QualityChecker::default().check(&corpus);
    let split = DatasetSplitter::new(config.split_ratios)
        .and_then(|splitter| splitter.split(&corpus, &config.output_dir, &mut rng));
    match split {
        Ok(splits) => {
            summary.splits = Some([splits.train, splits.val, splits.test]);
            if let Err(e) =
                DatasetMetadata::new(&config, quality, splits, started.elapsed().as_secs_f64())
                    .save(&config.output_dir)
            {
                summary.record_failure("dataset metadata", e);
            }
        }
        Err(e) => summary.record_failure("split", e),
    }

    print_summary(&summary);
    info!(
        "Generation finished for {} ({:.1}s)",
        config.output_dir.display(),
        started.elapsed().as_secs_f64()
    );

    summary.finish()
}

fn process(input_dir: PathBuf, output_dir: PathBuf) -> Result<()> {
    let processor = AudioPostProcessor::new(Default::default())?;
    let report = process_directory(&processor, &input_dir, &output_dir)?;
    println!(
        "Processed {} files, {} failed of {}",
        report.generated, report.failed, report.requested
    );
    Ok(())
}

fn far_field(input_dir: PathBuf, output_dir: PathBuf, count: usize, seed: Option<u64>) -> Result<()> {
    let sources = list_wav_files(&input_dir)?;
    let simulator = FarFieldSimulator::new(wakeword_dataset::TARGET_SAMPLE_RATE);
    let report = simulator.generate(
        &sources,
        &FarFieldProfile::catalog(),
        count,
        &output_dir,
        &mut make_rng(seed),
    )?;
    println!(
        "Far-field: {} generated, {} failed of {}",
        report.generated, report.failed, report.requested
    );
    Ok(())
}

fn split(raw_dir: PathBuf, output_dir: PathBuf, seed: Option<u64>) -> Result<()> {
    let corpus = Corpus::scan(&raw_dir)?;
    let splitter = DatasetSplitter::new(SplitRatios::default())?;
    let summary = splitter.split(&corpus, &output_dir, &mut make_rng(seed))?;
    for (name, stats) in [
        ("train", summary.train),
        ("val", summary.val),
        ("test", summary.test),
    ] {
        println!(
            "{:5}: {} files ({} positive, {} negative)",
            name, stats.total, stats.positive, stats.negative
        );
    }
    Ok(())
}
