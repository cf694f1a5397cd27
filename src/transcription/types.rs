//! Tipos de dados da API do serviço de transcrição com diarização.
//!
//! O serviço recebe o áudio WAV no corpo da requisição e responde com a
//! lista de palavras reconhecidas, cada uma com tempos e rótulo de locutor.

use serde::{Deserialize, Serialize};

use super::segment::TimedWord;

/// Parâmetros enviados na query string da requisição.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognizeParams {
    /// Código do idioma (ex.: "en-US").
    pub language: String,
    /// Número mínimo de locutores esperado.
    pub min_speakers: u32,
    /// Número máximo de locutores esperado.
    pub max_speakers: u32,
}

/// Resposta do endpoint de reconhecimento.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognizeResponse {
    /// Palavras reconhecidas, em ordem cronológica.
    #[serde(default)]
    pub words: Vec<WordInfo>,
}

/// Uma palavra reconhecida com tempos em segundos.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordInfo {
    pub word: String,
    pub start: f64,
    pub end: f64,
    /// Rótulo do locutor atribuído pela diarização; `None` quando ausente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
}

impl From<WordInfo> for TimedWord {
    fn from(info: WordInfo) -> Self {
        TimedWord {
            text: info.word,
            start: info.start,
            end: info.end,
            speaker: info.speaker,
        }
    }
}
