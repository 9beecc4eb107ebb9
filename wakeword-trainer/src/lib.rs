/// Wake-word model trainer
///
/// Extracts log-mel features from a split dataset, trains the embedding and
/// wake networks, and exports the three-network bundle the detector loads.

pub mod dataset;
pub mod export;
pub mod features;
pub mod metadata;
pub mod model;
pub mod training;

// Re-export main types
pub use dataset::{DatasetError, LabeledFeatures, MIN_NEGATIVE_SAMPLES, MIN_POSITIVE_SAMPLES};
pub use export::{
    load_artifact, read_artifact_header, ArtifactHeader, ArtifactKind, ExportError, ExportReport,
    Exporter,
};
pub use features::{fit_length, FeatureError, FeatureMatrix, MelConfig, MelExtractor};
pub use metadata::ModelMetadata;
pub use model::{EmbeddingNet, MelFrontend, WakeNet, WakeWordModel, WakeWordModelConfig};
pub use training::{
    evaluate, BinaryMetrics, EpochRecord, TrainError, Trainer, TrainingConfig, TrainingReport,
};

/// CPU backend used for training
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
