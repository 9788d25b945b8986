use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level station configuration. Loaded once at startup, validated,
/// then shared immutably behind an `Arc`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub vision: VisionConfig,
    pub solution_generator: SolutionConfig,
    #[serde(default)]
    pub image_generator: ImageGenConfig,
    pub voice: VoiceConfig,
    pub camera: CameraConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_name: String,
    pub prompt: String,
    #[serde(default = "default_target_min_size")]
    pub target_min_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolutionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_name: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageGenConfig {
    #[serde(default = "default_image_model")]
    pub model_name: String,
    #[serde(default = "default_image_width")]
    pub width: u32,
    #[serde(default = "default_image_height")]
    pub height: u32,
}

impl Default for ImageGenConfig {
    fn default() -> Self {
        Self {
            model_name: default_image_model(),
            width: default_image_width(),
            height: default_image_height(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// Key for the speech-to-text endpoint.
    pub api_key: String,
    pub base_url: String,
    #[serde(default = "default_stt_model")]
    pub model_name: String,
    #[serde(default = "default_recorder_file")]
    pub recorder_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_id: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    /// TOML file holding the camera matrix and distortion coefficients.
    pub intrinsics: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IoConfig {
    #[serde(default = "default_gpio_chip")]
    pub chip: String,
    #[serde(flatten)]
    pub buttons: HashMap<String, ButtonConfig>,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            chip: default_gpio_chip(),
            buttons: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonMode {
    /// Edge semantics: fires once per press.
    Single,
    /// Level semantics: state is sampled while held.
    Continuous,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonConfig {
    pub pin: u32,
    #[serde(default = "default_button_mode")]
    pub mode: ButtonMode,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_asset_dir")]
    pub asset_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            asset_dir: default_asset_dir(),
        }
    }
}

fn default_target_min_size() -> u32 {
    1024
}
fn default_image_model() -> String {
    "realvisxl".to_string()
}
fn default_image_width() -> u32 {
    1280
}
fn default_image_height() -> u32 {
    960
}
fn default_stt_model() -> String {
    "paraformer-realtime-v2".to_string()
}
fn default_recorder_file() -> String {
    "recorder.wav".to_string()
}
fn default_camera_width() -> u32 {
    1280
}
fn default_camera_height() -> u32 {
    720
}
fn default_gpio_chip() -> String {
    "/dev/gpiochip0".to_string()
}
fn default_button_mode() -> ButtonMode {
    ButtonMode::Single
}
fn default_debounce_ms() -> u64 {
    100
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_asset_dir() -> PathBuf {
    PathBuf::from("asset")
}

const KNOWN_SECTIONS: &[&str] = &[
    "vision",
    "solution_generator",
    "image_generator",
    "voice",
    "camera",
    "io",
    "server",
    "paths",
];

impl AppConfig {
    /// Load from a TOML file with `SPARKBOX_`-prefixed environment
    /// overrides (`SPARKBOX_SERVER__PORT=8080`). Unknown top-level
    /// sections warn; missing required keys fail.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(
                config::Environment::with_prefix("SPARKBOX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        if let Ok(table) = raw.clone().try_deserialize::<HashMap<String, config::Value>>() {
            for key in table.keys() {
                if !KNOWN_SECTIONS.contains(&key.as_str()) {
                    tracing::warn!(section = %key, "Unknown configuration section ignored");
                }
            }
        }

        let cfg: AppConfig = raw.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.vision.api_key.is_empty() {
            return Err(ConfigError::MissingField("vision.api_key".into()));
        }
        if self.solution_generator.api_key.is_empty() {
            return Err(ConfigError::MissingField("solution_generator.api_key".into()));
        }
        if self.voice.api_key.is_empty() {
            return Err(ConfigError::MissingField("voice.api_key".into()));
        }
        if self.vision.target_min_size == 0 {
            return Err(ConfigError::Validation {
                field: "vision.target_min_size".into(),
                reason: "must be positive".into(),
            });
        }
        if self.image_generator.width == 0 || self.image_generator.height == 0 {
            return Err(ConfigError::Validation {
                field: "image_generator".into(),
                reason: "width and height must be positive".into(),
            });
        }
        for (name, button) in &self.io.buttons {
            if button.pin > 512 {
                return Err(ConfigError::Validation {
                    field: format!("io.{}.pin", name),
                    reason: format!("pin {} out of range", button.pin),
                });
            }
        }
        Ok(())
    }

    /// `logs/` subdirectories used by the station.
    pub fn capture_dir(&self) -> PathBuf {
        self.paths.logs_dir.join("capture")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.paths.logs_dir.join("temp")
    }

    pub fn ai_logs_dir(&self) -> PathBuf {
        self.paths.logs_dir.join("ai_logs")
    }

    pub fn recorder_path(&self) -> PathBuf {
        self.paths.asset_dir.join(&self.voice.recorder_file)
    }
}
