use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SparkBoxError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

impl From<std::io::Error> for SparkBoxError {
    fn from(err: std::io::Error) -> Self {
        SparkBoxError::Fatal(format!("I/O error: {}", err))
    }
}

impl From<tokio::task::JoinError> for SparkBoxError {
    fn from(err: tokio::task::JoinError) -> Self {
        SparkBoxError::Fatal(format!("Task join failed: {}", err))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration parsing error: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Intrinsics file error: {0}")]
    Intrinsics(String),
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Failed to open camera device {device}: {reason}")]
    OpenFailed { device: u32, reason: String },

    #[error("Frame read failed: {0}")]
    ReadFailed(String),

    #[error("Frame decode failed: {0}")]
    DecodeFailed(String),

    #[error("No frame within {0:?}")]
    FirstFrameTimeout(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Input device not found")]
    DeviceNotFound,

    #[error("Format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("No audio captured")]
    NoAudioCaptured,

    #[error("WAV write failed: {0}")]
    WavWrite(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

/// The pipeline stages that can fail independently. One job aborts on the
/// first failed stage; the tag travels with the error event so the UI can
/// show where the pipeline stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Vision,
    Solution,
    Preview,
    Chat,
    Transcribe,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Vision => "vision",
            Stage::Solution => "solution",
            Stage::Preview => "preview",
            Stage::Chat => "chat",
            Stage::Transcribe => "transcribe",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single upstream failure surfaced by a stage adapter. Transport-level
/// retries have already happened inside the adapter by the time one of
/// these escapes.
#[derive(Debug, Clone, Error)]
#[error("{stage} stage failed: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub retryable: bool,
    pub message: String,
}

impl StageError {
    /// Transport-level failure (connect, timeout, 5xx). Retryable.
    pub fn transport(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            retryable: true,
            message: message.into(),
        }
    }

    /// The upstream answered but the body was unusable. Not retryable.
    pub fn parse(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            retryable: false,
            message: message.into(),
        }
    }

    /// Upstream rejected the request outright (4xx, auth). Not retryable.
    pub fn rejected(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            retryable: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tags_are_lowercase() {
        for (stage, tag) in [
            (Stage::Vision, "vision"),
            (Stage::Solution, "solution"),
            (Stage::Preview, "preview"),
            (Stage::Chat, "chat"),
            (Stage::Transcribe, "transcribe"),
        ] {
            assert_eq!(stage.as_str(), tag);
        }
    }

    #[test]
    fn transport_errors_are_retryable() {
        let err = StageError::transport(Stage::Vision, "connection reset");
        assert!(err.retryable);
        let err = StageError::parse(Stage::Solution, "no JSON object in body");
        assert!(!err.retryable);
    }
}
