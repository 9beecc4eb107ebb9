//! Speech synthesis engines backed by external TTS tools

use crate::audio::{self, AudioBuffer, AudioError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

/// Synthesis errors
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("{tool} exited with code {code}: {stderr}")]
    CommandFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{engine} engine cannot use {params} parameters")]
    ParamsMismatch { engine: EngineKind, params: EngineKind },

    #[error("Empty text")]
    EmptyText,

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supported engine families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Google TTS via `gtts-cli`
    Google,
    /// Microsoft neural voices via `edge-tts`
    Neural,
    /// Local `espeak-ng`
    Offline,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [EngineKind::Google, EngineKind::Neural, EngineKind::Offline];

    /// Short name used in file names and CLI output
    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Google => "gtts",
            EngineKind::Neural => "edge_tts",
            EngineKind::Offline => "espeak",
        }
    }

    /// External tools the engine needs; inner slices are alternatives
    pub fn required_tools(self) -> &'static [&'static [&'static str]] {
        match self {
            EngineKind::Google => &[&["gtts-cli"], &["ffmpeg"]],
            EngineKind::Neural => &[&["edge-tts"], &["ffmpeg"]],
            EngineKind::Offline => &[&["espeak-ng", "espeak"]],
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-engine voice parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum VoiceParams {
    Google {
        lang: String,
        slow: bool,
        tld: String,
    },
    Neural {
        voice: String,
        rate: String,
        pitch: String,
    },
    Offline {
        voice: String,
        rate_wpm: u32,
        amplitude: u32,
    },
}

impl VoiceParams {
    pub fn kind(&self) -> EngineKind {
        match self {
            VoiceParams::Google { .. } => EngineKind::Google,
            VoiceParams::Neural { .. } => EngineKind::Neural,
            VoiceParams::Offline { .. } => EngineKind::Offline,
        }
    }

    /// Flat key/value view for provenance records
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        match self {
            VoiceParams::Google { lang, slow, tld } => {
                map.insert("lang".into(), lang.clone());
                map.insert("slow".into(), slow.to_string());
                map.insert("tld".into(), tld.clone());
            }
            VoiceParams::Neural { voice, rate, pitch } => {
                map.insert("voice".into(), voice.clone());
                map.insert("rate".into(), rate.clone());
                map.insert("pitch".into(), pitch.clone());
            }
            VoiceParams::Offline {
                voice,
                rate_wpm,
                amplitude,
            } => {
                map.insert("voice".into(), voice.clone());
                map.insert("rate_wpm".into(), rate_wpm.to_string());
                map.insert("amplitude".into(), amplitude.to_string());
            }
        }
        map
    }
}

/// Text-to-speech engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Voice presets cycled through during generation
    fn presets(&self) -> Vec<VoiceParams>;

    /// Render `text` with `params` into an audio buffer
    async fn synthesize(
        &self,
        text: &str,
        params: &VoiceParams,
    ) -> Result<AudioBuffer, SynthesisError>;
}

/// Resolve the first available tool from a list of alternatives
fn resolve_tool(candidates: &[&str]) -> Result<PathBuf, SynthesisError> {
    candidates
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| SynthesisError::ToolNotFound(candidates.join(" or ")))
}

/// Run a tool to completion, failing on non-zero exit
async fn run_tool(program: &Path, args: &[String]) -> Result<(), SynthesisError> {
    debug!("Running {} {:?}", program.display(), args);

    let output = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(SynthesisError::CommandFailed {
            tool: program.display().to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}

/// Decode any ffmpeg-readable file into a WAV buffer
async fn decode_with_ffmpeg(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
) -> Result<AudioBuffer, SynthesisError> {
    let args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        output.display().to_string(),
    ];
    run_tool(ffmpeg, &args).await?;
    Ok(audio::read_wav(output)?)
}

/// Per-request scratch directory, removed on drop
fn scratch(dir: &Path) -> Result<tempfile::TempDir, SynthesisError> {
    std::fs::create_dir_all(dir)?;
    Ok(tempfile::Builder::new().prefix("tts_").tempdir_in(dir)?)
}

fn check_text(text: &str) -> Result<(), SynthesisError> {
    if text.trim().is_empty() {
        return Err(SynthesisError::EmptyText);
    }
    Ok(())
}

/// `gtts-cli` + `ffmpeg`
#[derive(Debug, Clone)]
pub struct GoogleEngine {
    gtts: PathBuf,
    ffmpeg: PathBuf,
    scratch_dir: PathBuf,
}

impl GoogleEngine {
    pub fn detect(scratch_dir: &Path) -> Result<Self, SynthesisError> {
        Ok(Self {
            gtts: resolve_tool(&["gtts-cli"])?,
            ffmpeg: resolve_tool(&["ffmpeg"])?,
            scratch_dir: scratch_dir.to_path_buf(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Google
    }

    fn presets(&self) -> Vec<VoiceParams> {
        let mut presets = Vec::new();
        for tld in ["com", "co.kr"] {
            for slow in [false, true] {
                presets.push(VoiceParams::Google {
                    lang: "ko".to_string(),
                    slow,
                    tld: tld.to_string(),
                });
            }
        }
        presets
    }

    async fn synthesize(
        &self,
        text: &str,
        params: &VoiceParams,
    ) -> Result<AudioBuffer, SynthesisError> {
        check_text(text)?;
        let VoiceParams::Google { lang, slow, tld } = params else {
            return Err(SynthesisError::ParamsMismatch {
                engine: self.kind(),
                params: params.kind(),
            });
        };

        let dir = scratch(&self.scratch_dir)?;
        let mp3 = dir.path().join("speech.mp3");
        let wav = dir.path().join("speech.wav");

        let mut args = vec![
            text.to_string(),
            "--lang".to_string(),
            lang.clone(),
            "--tld".to_string(),
            tld.clone(),
            "--output".to_string(),
            mp3.display().to_string(),
        ];
        if *slow {
            args.push("--slow".to_string());
        }

        run_tool(&self.gtts, &args).await?;
        decode_with_ffmpeg(&self.ffmpeg, &mp3, &wav).await
    }
}

/// `edge-tts` + `ffmpeg`
#[derive(Debug, Clone)]
pub struct NeuralEngine {
    edge_tts: PathBuf,
    ffmpeg: PathBuf,
    scratch_dir: PathBuf,
}

impl NeuralEngine {
    pub fn detect(scratch_dir: &Path) -> Result<Self, SynthesisError> {
        Ok(Self {
            edge_tts: resolve_tool(&["edge-tts"])?,
            ffmpeg: resolve_tool(&["ffmpeg"])?,
            scratch_dir: scratch_dir.to_path_buf(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for NeuralEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Neural
    }

    fn presets(&self) -> Vec<VoiceParams> {
        [
            ("ko-KR-InJoonNeural", "+0%", "+0Hz"),
            ("ko-KR-InJoonNeural", "-20%", "-50Hz"),
            ("ko-KR-InJoonNeural", "+20%", "+50Hz"),
            ("ko-KR-BongJinNeural", "+0%", "+0Hz"),
            ("ko-KR-BongJinNeural", "-10%", "+0Hz"),
            ("ko-KR-SunHiNeural", "+0%", "+0Hz"),
            ("ko-KR-SunHiNeural", "+10%", "-30Hz"),
        ]
        .into_iter()
        .map(|(voice, rate, pitch)| VoiceParams::Neural {
            voice: voice.to_string(),
            rate: rate.to_string(),
            pitch: pitch.to_string(),
        })
        .collect()
    }

    async fn synthesize(
        &self,
        text: &str,
        params: &VoiceParams,
    ) -> Result<AudioBuffer, SynthesisError> {
        check_text(text)?;
        let VoiceParams::Neural { voice, rate, pitch } = params else {
            return Err(SynthesisError::ParamsMismatch {
                engine: self.kind(),
                params: params.kind(),
            });
        };

        let dir = scratch(&self.scratch_dir)?;
        let mp3 = dir.path().join("speech.mp3");
        let wav = dir.path().join("speech.wav");

        // `=` form so negative offsets are not parsed as flags
        let args = vec![
            format!("--voice={}", voice),
            format!("--rate={}", rate),
            format!("--pitch={}", pitch),
            format!("--text={}", text),
            format!("--write-media={}", mp3.display()),
        ];

        run_tool(&self.edge_tts, &args).await?;
        decode_with_ffmpeg(&self.ffmpeg, &mp3, &wav).await
    }
}

/// `espeak-ng` (or `espeak`) writing WAV directly
#[derive(Debug, Clone)]
pub struct OfflineEngine {
    espeak: PathBuf,
    scratch_dir: PathBuf,
}

impl OfflineEngine {
    pub fn detect(scratch_dir: &Path) -> Result<Self, SynthesisError> {
        Ok(Self {
            espeak: resolve_tool(&["espeak-ng", "espeak"])?,
            scratch_dir: scratch_dir.to_path_buf(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OfflineEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Offline
    }

    fn presets(&self) -> Vec<VoiceParams> {
        [(150, 90), (120, 80), (180, 100), (100, 70)]
            .into_iter()
            .map(|(rate_wpm, amplitude)| VoiceParams::Offline {
                voice: "ko".to_string(),
                rate_wpm,
                amplitude,
            })
            .collect()
    }

    async fn synthesize(
        &self,
        text: &str,
        params: &VoiceParams,
    ) -> Result<AudioBuffer, SynthesisError> {
        check_text(text)?;
        let VoiceParams::Offline {
            voice,
            rate_wpm,
            amplitude,
        } = params
        else {
            return Err(SynthesisError::ParamsMismatch {
                engine: self.kind(),
                params: params.kind(),
            });
        };

        let dir = scratch(&self.scratch_dir)?;
        let wav = dir.path().join("speech.wav");

        let args = vec![
            "-v".to_string(),
            voice.clone(),
            "-s".to_string(),
            rate_wpm.to_string(),
            "-a".to_string(),
            amplitude.to_string(),
            "-w".to_string(),
            wav.display().to_string(),
            text.to_string(),
        ];

        run_tool(&self.espeak, &args).await?;
        Ok(audio::read_wav(&wav)?)
    }
}

/// Availability of one engine's tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub kind: EngineKind,
    pub available: bool,
    pub missing: Vec<String>,
}

/// Engines keyed by kind
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<EngineKind, Arc<dyn SpeechSynthesizer>>,
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.kinds())
            .finish()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every engine whose tools resolve on `PATH`
    pub fn detect(scratch_dir: &Path) -> Self {
        let mut registry = Self::new();

        for kind in EngineKind::ALL {
            let engine: Result<Arc<dyn SpeechSynthesizer>, SynthesisError> = match kind {
                EngineKind::Google => {
                    GoogleEngine::detect(scratch_dir).map(|e| Arc::new(e) as Arc<dyn SpeechSynthesizer>)
                }
                EngineKind::Neural => {
                    NeuralEngine::detect(scratch_dir).map(|e| Arc::new(e) as Arc<dyn SpeechSynthesizer>)
                }
                EngineKind::Offline => {
                    OfflineEngine::detect(scratch_dir).map(|e| Arc::new(e) as Arc<dyn SpeechSynthesizer>)
                }
            };

            match engine {
                Ok(engine) => {
                    info!("Engine available: {}", kind);
                    registry.register(engine);
                }
                Err(e) => warn!("Engine unavailable: {} ({})", kind, e),
            }
        }

        registry
    }

    /// Tool availability for every known engine
    pub fn status() -> Vec<EngineStatus> {
        EngineKind::ALL
            .into_iter()
            .map(|kind| {
                let missing: Vec<String> = kind
                    .required_tools()
                    .iter()
                    .filter(|alternatives| resolve_tool(alternatives).is_err())
                    .map(|alternatives| alternatives.join(" or "))
                    .collect();
                EngineStatus {
                    kind,
                    available: missing.is_empty(),
                    missing,
                }
            })
            .collect()
    }

    pub fn register(&mut self, engine: Arc<dyn SpeechSynthesizer>) {
        self.engines.insert(engine.kind(), engine);
    }

    /// Keep only the listed engines
    pub fn retain(&mut self, kinds: &[EngineKind]) {
        self.engines.retain(|kind, _| kinds.contains(kind));
    }

    pub fn get(&self, kind: EngineKind) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.engines.get(&kind).cloned()
    }

    /// Registered kinds in stable order
    pub fn kinds(&self) -> Vec<EngineKind> {
        let mut kinds: Vec<EngineKind> = self.engines.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.kinds().into_iter().map(EngineKind::name).collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock(kind: EngineKind) -> MockSpeechSynthesizer {
        let mut engine = MockSpeechSynthesizer::new();
        engine.expect_kind().return_const(kind);
        engine
    }

    #[test]
    fn test_engine_names() {
        assert_eq!(EngineKind::Google.name(), "gtts");
        assert_eq!(EngineKind::Neural.name(), "edge_tts");
        assert_eq!(EngineKind::Offline.to_string(), "espeak");
    }

    #[test]
    fn test_voice_params_kind_and_map() {
        let params = VoiceParams::Neural {
            voice: "ko-KR-SunHiNeural".into(),
            rate: "+10%".into(),
            pitch: "-30Hz".into(),
        };
        assert_eq!(params.kind(), EngineKind::Neural);
        let map = params.to_map();
        assert_eq!(map["voice"], "ko-KR-SunHiNeural");
        assert_eq!(map["pitch"], "-30Hz");
    }

    #[test]
    fn test_voice_params_serde() {
        let params = VoiceParams::Offline {
            voice: "ko".into(),
            rate_wpm: 150,
            amplitude: 90,
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"engine\":\"offline\""));
        let back: VoiceParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_presets() {
        let dir = PathBuf::from("/tmp");
        let google = GoogleEngine {
            gtts: "gtts-cli".into(),
            ffmpeg: "ffmpeg".into(),
            scratch_dir: dir.clone(),
        };
        let neural = NeuralEngine {
            edge_tts: "edge-tts".into(),
            ffmpeg: "ffmpeg".into(),
            scratch_dir: dir.clone(),
        };
        let offline = OfflineEngine {
            espeak: "espeak-ng".into(),
            scratch_dir: dir,
        };

        assert_eq!(google.presets().len(), 4);
        assert_eq!(neural.presets().len(), 7);
        assert_eq!(offline.presets().len(), 4);
        assert!(google.presets().iter().all(|p| p.kind() == EngineKind::Google));
        assert!(neural.presets().iter().all(|p| p.kind() == EngineKind::Neural));
    }

    #[tokio::test]
    async fn test_params_mismatch() {
        let engine = OfflineEngine {
            espeak: "espeak-ng".into(),
            scratch_dir: std::env::temp_dir(),
        };
        let params = VoiceParams::Google {
            lang: "ko".into(),
            slow: false,
            tld: "com".into(),
        };
        assert!(matches!(
            engine.synthesize("하이넛지", &params).await,
            Err(SynthesisError::ParamsMismatch { .. })
        ));
        assert!(matches!(
            engine.synthesize("  ", &engine.presets()[0]).await,
            Err(SynthesisError::EmptyText)
        ));
    }

    #[test]
    fn test_registry() {
        let mut registry = EngineRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(mock(EngineKind::Offline)));
        registry.register(Arc::new(mock(EngineKind::Google)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.kinds(), vec![EngineKind::Google, EngineKind::Offline]);
        assert_eq!(registry.names(), vec!["gtts", "espeak"]);
        assert!(registry.get(EngineKind::Neural).is_none());

        registry.retain(&[EngineKind::Offline]);
        assert_eq!(registry.kinds(), vec![EngineKind::Offline]);
    }

    #[test]
    fn test_status_covers_all_engines() {
        let status = EngineRegistry::status();
        assert_eq!(status.len(), 3);
        for s in status {
            assert_eq!(s.available, s.missing.is_empty());
        }
    }
}
