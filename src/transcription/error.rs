//! Erros dos motores de transcrição.
//!
//! Define [`TranscribeError`]. A variante [`Unavailable`](TranscribeError::Unavailable)
//! é a única que faz o controlador tentar o motor secundário; todas as
//! outras encerram a transcrição como falha.

use thiserror::Error;

use crate::error::{OverwatchError, StageErrorKind};

#[derive(Debug, Error)]
pub enum TranscribeError {
    /// Serviço inacessível: sem credencial, conexão recusada, ou
    /// HTTP 401/403/429/502/503/504.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Qualquer outra resposta HTTP de erro.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// O corpo da resposta não pôde ser interpretado.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Falha de um motor local (binário ausente, saída inválida, E/S).
    #[error(transparent)]
    Engine(OverwatchError),

    #[error("transcription cancelled")]
    Cancelled,
}

impl TranscribeError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn kind(&self) -> StageErrorKind {
        match self {
            Self::Unavailable(_) => StageErrorKind::ServiceUnavailable,
            Self::Api { .. } | Self::Malformed(_) => StageErrorKind::ExternalTool,
            Self::Engine(err) => err.stage_kind(),
            Self::Cancelled => StageErrorKind::Cancelled,
        }
    }
}

impl From<OverwatchError> for TranscribeError {
    fn from(err: OverwatchError) -> Self {
        match err {
            OverwatchError::Cancelled => Self::Cancelled,
            OverwatchError::ServiceUnavailable(reason) => Self::Unavailable(reason),
            other => Self::Engine(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_display() {
        let err = TranscribeError::Unavailable("HTTP 503".into());
        assert_eq!(err.to_string(), "service unavailable: HTTP 503");
        assert!(err.is_unavailable());
        assert_eq!(err.kind(), StageErrorKind::ServiceUnavailable);
    }

    #[test]
    fn engine_errors_keep_their_kind() {
        let err: TranscribeError = OverwatchError::external("whisper", "not found on PATH").into();
        assert!(!err.is_unavailable());
        assert_eq!(err.kind(), StageErrorKind::ExternalTool);
        assert_eq!(err.to_string(), "External tool `whisper` failed: not found on PATH");
    }

    #[test]
    fn cancellation_maps_through() {
        let err: TranscribeError = OverwatchError::Cancelled.into();
        assert!(matches!(err, TranscribeError::Cancelled));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TranscribeError>();
    }
}
