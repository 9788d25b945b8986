//! Remote speech-to-text. One WAV file in, one transcript out; the
//! upstream signals "nothing recognized" with an empty body or the
//! literal string "null", both of which map to `Ok(None)`.

use sparkbox_foundation::{Stage, StageError, VoiceConfig};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, serde::Deserialize)]
struct RecognitionResponse {
    #[serde(default)]
    output: Option<RecognitionOutput>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RecognitionOutput {
    #[serde(default)]
    sentence: Vec<Sentence>,
}

#[derive(Debug, serde::Deserialize)]
struct Sentence {
    text: String,
}

pub struct RemoteTranscriber {
    client: reqwest::Client,
    config: VoiceConfig,
}

impl RemoteTranscriber {
    pub fn new(config: VoiceConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    /// Upload the recorded WAV and return the transcript. `sample_rate`
    /// is whatever the recorder actually captured at.
    pub async fn transcribe(
        &self,
        wav_path: &Path,
        sample_rate: u32,
    ) -> Result<Option<String>, StageError> {
        let bytes = tokio::fs::read(wav_path).await.map_err(|e| {
            StageError::rejected(
                Stage::Transcribe,
                format!("audio file {}: {}", wav_path.display(), e),
            )
        })?;

        tracing::info!(
            path = %wav_path.display(),
            sample_rate,
            bytes = bytes.len(),
            "Transcribing recording"
        );

        let file_part = reqwest::multipart::Part::bytes(bytes)
            .file_name(
                wav_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "recording.wav".to_string()),
            )
            .mime_str("audio/wav")
            .map_err(|e| StageError::rejected(Stage::Transcribe, e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.config.model_name.clone())
            .text("format", "wav")
            .text("sample_rate", sample_rate.to_string());

        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StageError::transport(Stage::Transcribe, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = format!("upstream returned {}: {}", status, body);
            return if status.is_server_error() {
                Err(StageError::transport(Stage::Transcribe, err))
            } else {
                Err(StageError::rejected(Stage::Transcribe, err))
            };
        }

        let parsed: RecognitionResponse = response
            .json()
            .await
            .map_err(|e| StageError::parse(Stage::Transcribe, e.to_string()))?;

        let text = match parsed.output {
            Some(output) if !output.sentence.is_empty() => output
                .sentence
                .into_iter()
                .map(|s| s.text)
                .collect::<String>(),
            _ => parsed.text.unwrap_or_default(),
        };

        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
            return Ok(None);
        }
        Ok(Some(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(base_url: String) -> VoiceConfig {
        serde_json::from_value(serde_json::json!({
            "api_key": "sk-test",
            "base_url": base_url,
            "model_name": "paraformer-realtime-v2",
            "recorder_file": "recorder.wav"
        }))
        .unwrap()
    }

    fn wav_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        file.write_all(b"RIFF0000WAVEfmt ").unwrap();
        file
    }

    #[tokio::test]
    async fn concatenates_sentence_fragments() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"output":{"sentence":[{"text":"make it "},{"text":"cheaper"}]}}"#)
            .create_async()
            .await;

        let transcriber = RemoteTranscriber::new(config(server.url()));
        let file = wav_file();
        let text = transcriber.transcribe(file.path(), 16_000).await.unwrap();
        assert_eq!(text.as_deref(), Some("make it cheaper"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn null_transcript_maps_to_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"text":"null"}"#)
            .create_async()
            .await;

        let transcriber = RemoteTranscriber::new(config(server.url()));
        let file = wav_file();
        assert_eq!(transcriber.transcribe(file.path(), 16_000).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_output_maps_to_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"output":{"sentence":[]}}"#)
            .create_async()
            .await;

        let transcriber = RemoteTranscriber::new(config(server.url()));
        let file = wav_file();
        assert_eq!(transcriber.transcribe(file.path(), 44_100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_error_is_retryable_transport() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;

        let transcriber = RemoteTranscriber::new(config(server.url()));
        let file = wav_file();
        let err = transcriber.transcribe(file.path(), 16_000).await.unwrap_err();
        assert_eq!(err.stage, Stage::Transcribe);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn missing_file_is_not_retryable() {
        let transcriber = RemoteTranscriber::new(config("http://127.0.0.1:9".into()));
        let err = transcriber
            .transcribe(Path::new("/nonexistent/clip.wav"), 16_000)
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}
