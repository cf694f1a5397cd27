use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, info};

use super::error::TranscribeError;
use super::segment::{TimedWord, TranscriptSegment, segments_from_words};
use super::types::{RecognizeParams, RecognizeResponse};
use super::TranscriptionEngine;
use crate::pipeline::StageContext;

/// Primary engine: an HTTP speech service with speaker diarization.
pub struct DiarizationClient {
    endpoint: Option<String>,
    api_key: Option<String>,
    params: RecognizeParams,
    client: Client,
}

impl DiarizationClient {
    pub fn new(endpoint: Option<String>, api_key: Option<String>) -> Self {
        Self::with_timeouts(endpoint, api_key, Duration::from_secs(10), Duration::from_secs(600))
    }

    /// Create a client with explicit connect and request timeouts.
    pub fn with_timeouts(
        endpoint: Option<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.filter(|e| !e.trim().is_empty()),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            params: RecognizeParams {
                language: "en-US".to_string(),
                min_speakers: 2,
                max_speakers: 2,
            },
            client,
        }
    }

    pub fn with_params(mut self, params: RecognizeParams) -> Self {
        self.params = params;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    pub async fn recognize(&self, audio: Vec<u8>) -> Result<RecognizeResponse, TranscribeError> {
        let (Some(endpoint), Some(api_key)) = (&self.endpoint, &self.api_key) else {
            return Err(TranscribeError::Unavailable(
                "primary transcription service is not configured".to_string(),
            ));
        };
        let url = parse_endpoint(endpoint)?;

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .header("content-type", "audio/wav")
            .query(&self.params)
            .body(audio)
            .send()
            .await
            .map_err(|err| classify_send_error(endpoint, err))?;

        let status = response.status();

        if is_unavailable_status(status) {
            let retry = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| format!(" (retry after {secs}s)"))
                .unwrap_or_default();
            return Err(TranscribeError::Unavailable(format!(
                "HTTP {}{retry}",
                status.as_u16()
            )));
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(TranscribeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<RecognizeResponse>()
            .await
            .map_err(|err| TranscribeError::Malformed(err.to_string()))
    }
}

#[async_trait]
impl TranscriptionEngine for DiarizationClient {
    fn name(&self) -> &str {
        "diarization-service"
    }

    async fn transcribe(
        &self,
        audio: &Path,
        ctx: &StageContext,
    ) -> Result<Vec<TranscriptSegment>, TranscribeError> {
        if !self.is_configured() {
            return Err(TranscribeError::Unavailable(
                "primary transcription service is not configured".to_string(),
            ));
        }
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|err| TranscribeError::Engine(err.into()))?;
        debug!(bytes = bytes.len(), "uploading audio to transcription service");

        let response = tokio::select! {
            response = self.recognize(bytes) => response?,
            _ = ctx.cancel.cancelled() => return Err(TranscribeError::Cancelled),
        };
        info!(words = response.words.len(), "transcription service responded");

        let words: Vec<TimedWord> = response.words.into_iter().map(TimedWord::from).collect();
        Ok(segments_from_words(&words))
    }
}

fn is_unavailable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// A malformed endpoint is a configuration error, which counts as unavailable.
fn parse_endpoint(endpoint: &str) -> Result<Url, TranscribeError> {
    let url = Url::parse(endpoint).map_err(|err| {
        TranscribeError::Unavailable(format!("invalid endpoint `{endpoint}`: {err}"))
    })?;
    if matches!(url.scheme(), "http" | "https") && url.has_host() {
        Ok(url)
    } else {
        Err(TranscribeError::Unavailable(format!(
            "invalid endpoint `{endpoint}`: expected an http(s) URL"
        )))
    }
}

fn classify_send_error(endpoint: &str, err: reqwest::Error) -> TranscribeError {
    if err.is_builder() {
        TranscribeError::Unavailable(format!("invalid request to {endpoint}: {err}"))
    } else if err.is_connect() || err.is_timeout() || err.is_request() {
        TranscribeError::Unavailable(format!("cannot reach {endpoint}: {err}"))
    } else {
        TranscribeError::Engine(err.into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::pipeline::ProgressReporter;
    use crate::transcription::{FallbackController, FallbackOutcome, FallbackState};
    use crate::workspace::Workspace;

    fn context() -> (tempfile::TempDir, StageContext, std::path::PathBuf) {
        let base = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::prepare(base.path(), "job").unwrap());
        let audio = ws.allocate("audio.wav").unwrap();
        std::fs::write(&audio, b"RIFF....WAVE").unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = StageContext::new(
            Uuid::new_v4(),
            "transcription",
            ws,
            ProgressReporter::new("transcription", tx),
            CancellationToken::new(),
        );
        (base, ctx, audio)
    }

    fn client(server: &MockServer) -> DiarizationClient {
        DiarizationClient::new(Some(format!("{}/v1/recognize", server.uri())), Some("test-key".into()))
    }

    #[tokio::test]
    async fn successful_response_becomes_segments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer test-key"))
            .and(query_param("language", "en-US"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "words": [
                    {"word": "tell", "start": 0.0, "end": 0.3, "speaker": 1},
                    {"word": "me", "start": 0.3, "end": 0.5, "speaker": 1},
                    {"word": "sure", "start": 1.0, "end": 1.4, "speaker": 2}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (_base, ctx, audio) = context();
        let segments = client(&server).transcribe(&audio, &ctx).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].render(), "[00:00.000 - 00:00.500] [Speaker 1] Tell me.");
        assert_eq!(segments[1].speaker, "Speaker 2");
    }

    #[tokio::test]
    async fn service_unavailable_statuses_are_unavailable() {
        for code in [401, 403, 429, 502, 503, 504] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(code).insert_header("retry-after", "7"))
                .mount(&server)
                .await;

            let err = client(&server).recognize(vec![0u8; 4]).await.unwrap_err();
            assert!(err.is_unavailable(), "status {code} gave {err}");
            if code == 429 {
                assert!(err.to_string().contains("retry after 7s"));
            }
        }
    }

    #[tokio::test]
    async fn other_errors_are_not_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad audio"))
            .mount(&server)
            .await;

        let err = client(&server).recognize(vec![0u8; 4]).await.unwrap_err();
        match err {
            TranscribeError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad audio");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server).recognize(vec![0u8; 4]).await.unwrap_err();
        assert!(matches!(err, TranscribeError::Malformed(_)));
    }

    #[tokio::test]
    async fn missing_credentials_are_unavailable() {
        let (_base, ctx, audio) = context();
        let client = DiarizationClient::new(Some("http://127.0.0.1:9/recognize".into()), None);
        assert!(!client.is_configured());
        let err = client.transcribe(&audio, &ctx).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        // Nothing listens on the discard port.
        let client = DiarizationClient::with_timeouts(
            Some("http://127.0.0.1:9/recognize".into()),
            Some("key".into()),
            Duration::from_secs(2),
            Duration::from_secs(5),
        );
        let err = client.recognize(vec![0u8; 4]).await.unwrap_err();
        assert!(err.is_unavailable(), "{err}");
    }

    #[test]
    fn endpoint_without_scheme_is_unavailable() {
        for endpoint in ["localhost:9000/recognize", "not a url", "ftp://host/recognize"] {
            let err = parse_endpoint(endpoint).unwrap_err();
            assert!(err.is_unavailable(), "{endpoint} gave {err}");
        }
        assert!(parse_endpoint("https://speech.example.com/v1/recognize").is_ok());
    }

    struct LocalEngine;

    #[async_trait]
    impl TranscriptionEngine for LocalEngine {
        fn name(&self) -> &str {
            "local"
        }

        async fn transcribe(
            &self,
            _audio: &Path,
            _ctx: &StageContext,
        ) -> Result<Vec<TranscriptSegment>, TranscribeError> {
            Ok(vec![TranscriptSegment::new(0.0, 1.0, "Speaker 1", "Hello.")])
        }
    }

    #[tokio::test]
    async fn misconfigured_endpoint_falls_back_to_secondary() {
        let (_base, ctx, audio) = context();
        let primary = Arc::new(DiarizationClient::new(
            Some("localhost:9000/recognize".into()),
            Some("key".into()),
        ));

        let run = FallbackController::new(primary, Arc::new(LocalEngine))
            .run(&audio, &ctx)
            .await;
        assert_eq!(run.outcome, FallbackOutcome::Degraded);
        assert_eq!(run.segments.len(), 1);
        assert!(matches!(run.history[1], FallbackState::TrySecondary { .. }));
    }
}
