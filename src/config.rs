//! Configuração do Overwatch carregada a partir de `overwatch.toml`.
//!
//! A struct [`OverwatchConfig`] contém todos os parâmetros configuráveis,
//! agrupados em tabelas (`[tools]`, `[transcription]`, `[flagging]`,
//! `[progress]`, `[server]`). Valores ausentes no arquivo usam defaults.
//! As variáveis de ambiente `OVERWATCH_TRANSCRIBE_API_KEY` e
//! `OVERWATCH_TRANSCRIBE_URL` têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engines::ProcessLimits;
use crate::error::{OverwatchError, Result};
use crate::pipeline::ProgressRange;

/// Nome do arquivo procurado no diretório atual quando `--config` não é usado.
pub const DEFAULT_CONFIG_FILE: &str = "overwatch.toml";

pub const ENV_API_KEY: &str = "OVERWATCH_TRANSCRIBE_API_KEY";
pub const ENV_ENDPOINT: &str = "OVERWATCH_TRANSCRIBE_URL";

/// Configuração de nível superior.
#[derive(Debug, Clone, Deserialize)]
pub struct OverwatchConfig {
    /// Diretório base onde cada job cria seu workspace.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Porcentagem inicial da mídia que é analisada (1 a 100).
    #[serde(default = "default_capture_percent")]
    pub capture_percent: u8,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub flagging: FlaggingConfig,

    #[serde(default)]
    pub progress: ProgressPlan,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Binários externos e limites de tempo dos subprocessos.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Executável `FeatureExtraction` do OpenFace.
    pub face_tracker: String,
    pub whisper: String,
    pub whisper_model: String,
    /// Classificador de eventos de áudio; recebe o WAV como último argumento.
    pub audio_classifier: String,
    pub audio_classifier_args: Vec<String>,
    /// Tempo máximo de qualquer ferramenta, em segundos.
    pub tool_timeout_secs: u64,
    /// Tempo máximo do rastreador facial, em segundos.
    pub tracker_timeout_secs: u64,
    /// Espera entre SIGTERM e SIGKILL ao cancelar, em milissegundos.
    pub terminate_grace_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            face_tracker: "FeatureExtraction".to_string(),
            whisper: "whisper".to_string(),
            whisper_model: "base".to_string(),
            audio_classifier: "overwatch-audio-classify".to_string(),
            audio_classifier_args: Vec::new(),
            tool_timeout_secs: 1800,
            tracker_timeout_secs: 300,
            terminate_grace_ms: 3000,
        }
    }
}

impl ToolsConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn tool_limits(&self) -> ProcessLimits {
        ProcessLimits::new(Some(Duration::from_secs(self.tool_timeout_secs)), self.grace())
    }

    pub fn tracker_limits(&self) -> ProcessLimits {
        ProcessLimits::new(Some(Duration::from_secs(self.tracker_timeout_secs)), self.grace())
    }
}

/// Serviço primário de transcrição.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// URL do endpoint; sem ele a transcrição cai direto no motor secundário.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub language: String,
    pub min_speakers: u32,
    pub max_speakers: u32,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            language: "en-US".to_string(),
            min_speakers: 2,
            max_speakers: 2,
            connect_timeout_secs: 10,
            request_timeout_secs: 600,
        }
    }
}

/// Detecção de frases com cara de LLM no transcript.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlaggingConfig {
    /// Similaridade mínima (0 a 1) para marcar um n-grama.
    pub threshold: f64,
    /// Tamanho máximo do n-grama, em palavras.
    pub window: usize,
    /// Lista de frases de referência, uma por linha. `None` usa a lista embutida.
    pub reference_file: Option<PathBuf>,
}

impl Default for FlaggingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            window: 8,
            reference_file: None,
        }
    }
}

/// Faixa de progresso de cada estágio na escala 0-100 do job.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ProgressPlan {
    pub acquisition: ProgressRange,
    pub facial_motion: ProgressRange,
    pub transcription: ProgressRange,
    pub acoustic_summary: ProgressRange,
    pub audio_events: ProgressRange,
    pub word_flagging: ProgressRange,
    pub assembly: ProgressRange,
}

impl Default for ProgressPlan {
    fn default() -> Self {
        Self {
            acquisition: ProgressRange::new(0, 25),
            facial_motion: ProgressRange::new(25, 50),
            transcription: ProgressRange::new(25, 45),
            acoustic_summary: ProgressRange::new(45, 60),
            audio_events: ProgressRange::new(60, 75),
            word_flagging: ProgressRange::new(75, 90),
            assembly: ProgressRange::new(90, 100),
        }
    }
}

impl ProgressPlan {
    fn entries(&self) -> [(&'static str, ProgressRange); 7] {
        [
            ("acquisition", self.acquisition),
            ("facial_motion", self.facial_motion),
            ("transcription", self.transcription),
            ("acoustic_summary", self.acoustic_summary),
            ("audio_events", self.audio_events),
            ("word_flagging", self.word_flagging),
            ("assembly", self.assembly),
        ]
    }
}

/// Servidor HTTP da API de jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

// Valor padrão para o diretório de workspaces.
fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("overwatch-jobs")
}

// Valor padrão para a porcentagem capturada: a mídia inteira.
fn default_capture_percent() -> u8 {
    100
}

impl Default for OverwatchConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            capture_percent: default_capture_percent(),
            tools: ToolsConfig::default(),
            transcription: TranscriptionConfig::default(),
            flagging: FlaggingConfig::default(),
            progress: ProgressPlan::default(),
            server: ServerConfig::default(),
        }
    }
}

impl OverwatchConfig {
    /// Carrega a configuração do caminho indicado ou de `overwatch.toml` no
    /// diretório atual. Um caminho explícito inexistente é erro; a ausência
    /// do arquivo padrão não é.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            OverwatchError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Ok(toml::from_str::<OverwatchConfig>(&contents)?)
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo para a chave e o endpoint.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_API_KEY)
            && !key.is_empty()
        {
            self.transcription.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_ENDPOINT)
            && !url.is_empty()
        {
            self.transcription.endpoint = Some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.capture_percent) {
            return Err(OverwatchError::Config(format!(
                "capture_percent must be between 1 and 100, got {}",
                self.capture_percent
            )));
        }
        if !(0.0..=1.0).contains(&self.flagging.threshold) {
            return Err(OverwatchError::Config(format!(
                "flagging.threshold must be between 0 and 1, got {}",
                self.flagging.threshold
            )));
        }
        if self.flagging.window == 0 {
            return Err(OverwatchError::Config("flagging.window must be at least 1".into()));
        }
        for (stage, range) in self.progress.entries() {
            if !range.is_valid() {
                return Err(OverwatchError::Config(format!(
                    "progress.{stage} has an invalid range {}..{}",
                    range.lo, range.hi
                )));
            }
        }
        Ok(())
    }
}
