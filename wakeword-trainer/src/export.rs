/// Model artifact export
///
/// Each sub-network is written to its own file:
///
/// ```text
/// b"WWM1" | header length (u32 LE) | JSON ArtifactHeader | half-precision record
/// ```
///
/// Before writing, a zero tensor of the artifact's input shape is run through
/// the network and the output shape compared with the contract. Artifacts
/// succeed or fail independently.

use crate::features::{
    EMB_FEATURE_SIZE, EMB_INPUT_COUNT, MEL_FEATURE_SIZE, MEL_INPUT_COUNT, MEL_OUTPUT_COUNT,
    WAKE_INPUT_COUNT,
};
use crate::model::{MelFrontend, WakeWordModel};
use burn::module::Module;
use burn::record::{HalfPrecisionSettings, NamedMpkBytesRecorder, Recorder};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

pub const ARTIFACT_MAGIC: &[u8; 4] = b"WWM1";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode weights: {0}")]
    Record(String),

    #[error("Invalid artifact header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("Not a model artifact: {0}")]
    InvalidArtifact(String),

    #[error("{name}: output shape {actual:?} does not match contract {expected:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// The three exported networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Melspectrogram,
    Embedding,
    Wake,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Melspectrogram,
        ArtifactKind::Embedding,
        ArtifactKind::Wake,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ArtifactKind::Melspectrogram => "melspectrogram",
            ArtifactKind::Embedding => "embedding",
            ArtifactKind::Wake => "wake",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.wwm", self.name())
    }

    pub fn input_shape(self) -> Vec<usize> {
        match self {
            ArtifactKind::Melspectrogram => vec![1, MEL_INPUT_COUNT],
            ArtifactKind::Embedding => vec![1, EMB_INPUT_COUNT, MEL_FEATURE_SIZE, 1],
            ArtifactKind::Wake => vec![1, WAKE_INPUT_COUNT, EMB_FEATURE_SIZE],
        }
    }

    pub fn output_shape(self) -> Vec<usize> {
        match self {
            ArtifactKind::Melspectrogram => vec![1, MEL_OUTPUT_COUNT, MEL_FEATURE_SIZE],
            ArtifactKind::Embedding => vec![1, 1, 1, EMB_FEATURE_SIZE],
            ArtifactKind::Wake => vec![1, 1],
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Self-description stored ahead of the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub name: String,
    pub format_version: u32,
    pub precision: String,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub wake_word: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactHeader {
    pub fn new(kind: ArtifactKind, wake_word: &str) -> Self {
        Self {
            name: kind.name().to_string(),
            format_version: FORMAT_VERSION,
            precision: "f16".to_string(),
            input_shape: kind.input_shape(),
            output_shape: kind.output_shape(),
            wake_word: wake_word.to_string(),
            created_at: Utc::now(),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Half-precision named msgpack encoding of a module's weights
pub fn encode_module<B: Backend, M: Module<B>>(module: M) -> Result<Vec<u8>, ExportError> {
    let recorder = NamedMpkBytesRecorder::<HalfPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, module.into_record(), ())
        .map_err(|e| ExportError::Record(e.to_string()))
}

pub fn write_artifact(
    path: &Path,
    header: &ArtifactHeader,
    payload: &[u8],
) -> Result<(), ExportError> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = u32::try_from(header_json.len())
        .map_err(|_| ExportError::InvalidArtifact("header too large".to_string()))?;

    let mut bytes = Vec::with_capacity(8 + header_json.len() + payload.len());
    bytes.extend_from_slice(ARTIFACT_MAGIC);
    bytes.extend_from_slice(&header_len.to_le_bytes());
    bytes.extend_from_slice(&header_json);
    bytes.extend_from_slice(payload);

    fs::write(path, bytes).map_err(io_error(path))
}

/// Header and weight payload of an artifact file
pub fn read_artifact(path: impl AsRef<Path>) -> Result<(ArtifactHeader, Vec<u8>), ExportError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(io_error(path))?;

    if bytes.len() < 8 || &bytes[..4] != ARTIFACT_MAGIC {
        return Err(ExportError::InvalidArtifact(format!(
            "{}: missing magic",
            path.display()
        )));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[4..8]);
    let header_end = 8 + u32::from_le_bytes(len_bytes) as usize;
    if header_end > bytes.len() {
        return Err(ExportError::InvalidArtifact(format!(
            "{}: truncated header",
            path.display()
        )));
    }

    let header = serde_json::from_slice(&bytes[8..header_end])?;
    Ok((header, bytes[header_end..].to_vec()))
}

pub fn read_artifact_header(path: impl AsRef<Path>) -> Result<ArtifactHeader, ExportError> {
    read_artifact(path).map(|(header, _)| header)
}

/// Load an artifact's weights into `module`
pub fn load_artifact<B: Backend, M: Module<B>>(
    path: impl AsRef<Path>,
    module: M,
    device: &B::Device,
) -> Result<M, ExportError> {
    let (_, payload) = read_artifact(path)?;
    let recorder = NamedMpkBytesRecorder::<HalfPrecisionSettings>::default();
    let record = Recorder::<B>::load(&recorder, payload, device)
        .map_err(|e| ExportError::Record(e.to_string()))?;
    Ok(module.load_record(record))
}

/// Result of exporting one artifact
#[derive(Debug)]
pub struct ArtifactOutcome {
    pub kind: ArtifactKind,
    pub result: Result<PathBuf, ExportError>,
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub artifacts: Vec<ArtifactOutcome>,
}

impl ExportReport {
    pub fn succeeded(&self) -> usize {
        self.artifacts.iter().filter(|a| a.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.artifacts.len() - self.succeeded()
    }

    /// File names of the artifacts that were written
    pub fn written_files(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .filter(|a| a.result.is_ok())
            .map(|a| a.kind.file_name())
            .collect()
    }
}

/// Writes the network bundle into a directory
pub struct Exporter {
    output_dir: PathBuf,
    wake_word: String,
}

impl Exporter {
    pub fn new(output_dir: impl Into<PathBuf>, wake_word: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            wake_word: wake_word.into(),
        }
    }

    /// Export all three networks; one failing does not stop the others
    pub fn export<B: Backend>(
        &self,
        frontend: &MelFrontend<B>,
        model: &WakeWordModel<B>,
        device: &B::Device,
    ) -> ExportReport {
        let mut report = ExportReport::default();

        for kind in ArtifactKind::ALL {
            let result = match kind {
                ArtifactKind::Melspectrogram => self.export_module::<B, _>(kind, frontend.clone(), |m| {
                    m.forward(Tensor::zeros([1, MEL_INPUT_COUNT], device))
                        .dims()
                        .to_vec()
                }),
                ArtifactKind::Embedding => {
                    self.export_module::<B, _>(kind, model.embedding.clone(), |m| {
                        m.forward(Tensor::zeros(
                            [1, EMB_INPUT_COUNT, MEL_FEATURE_SIZE, 1],
                            device,
                        ))
                        .dims()
                        .to_vec()
                    })
                }
                ArtifactKind::Wake => self.export_module::<B, _>(kind, model.wake.clone(), |m| {
                    m.predict(Tensor::zeros(
                        [1, WAKE_INPUT_COUNT, EMB_FEATURE_SIZE],
                        device,
                    ))
                    .dims()
                    .to_vec()
                }),
            };

            match &result {
                Ok(path) => info!("Exported {} to {}", kind, path.display()),
                Err(e) => error!("Failed to export {}: {}", kind, e),
            }
            report.artifacts.push(ArtifactOutcome { kind, result });
        }

        info!(
            "Export finished: {} written, {} failed",
            report.succeeded(),
            report.failed()
        );
        report
    }

    fn export_module<B: Backend, M: Module<B>>(
        &self,
        kind: ArtifactKind,
        module: M,
        probe: impl FnOnce(&M) -> Vec<usize>,
    ) -> Result<PathBuf, ExportError> {
        let expected = kind.output_shape();
        let actual = probe(&module);
        if actual != expected {
            return Err(ExportError::ShapeMismatch {
                name: kind.name(),
                expected,
                actual,
            });
        }

        let payload = encode_module::<B, M>(module)?;
        let path = self.output_dir.join(kind.file_name());
        write_artifact(&path, &ArtifactHeader::new(kind, &self.wake_word), &payload)?;
        Ok(path)
    }
}
