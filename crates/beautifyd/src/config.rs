use beautify_core::{Constraints, DetectionOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Daemon configuration: optional TOML file, then `BEAUTIFY_*` overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Requested capture size; the driver may negotiate another.
    pub width: u32,
    pub height: u32,
    /// Render loop rate.
    pub render_fps: u32,
    /// Detection loop cadence.
    pub detection_interval_ms: u64,
    pub min_score: f32,
    pub input_size: u32,
    /// Directory holding det_10g.onnx and w600k_r50.onnx.
    pub model_dir: PathBuf,
    /// Where captured stills are written.
    pub output_dir: PathBuf,
    /// Capture flash duration.
    pub flash_ms: u64,
    /// Recommendation API key. AI features are off without one.
    pub api_key: Option<String>,
    /// Generative model API base and model name.
    pub ai_endpoint: String,
    pub ai_model: String,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            camera_device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            render_fps: 60,
            detection_interval_ms: 33,
            min_score: 0.5,
            input_size: 416,
            model_dir: beautify_models::default_model_dir(),
            output_dir: PathBuf::from(home).join("Pictures"),
            flash_ms: 200,
            api_key: None,
            ai_endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            ai_model: "gemini-2.5-flash".to_string(),
        }
    }
}

impl Config {
    /// Load the config file named by `BEAUTIFY_CONFIG` (or the XDG default),
    /// then apply environment overrides. A missing file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("BEAUTIFY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());

        let base = if path.exists() {
            tracing::info!(path = %path.display(), "loading config file");
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `BEAUTIFY_*` overrides looked up through `var`. Unparseable
    /// values keep the current setting.
    pub fn with_overrides(self, var: impl Fn(&str) -> Option<String>) -> Self {
        let api_key = var("BEAUTIFY_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .or(self.api_key);
        Self {
            camera_device: var("BEAUTIFY_CAMERA_DEVICE").unwrap_or(self.camera_device),
            width: env_parse(&var, "BEAUTIFY_WIDTH", self.width),
            height: env_parse(&var, "BEAUTIFY_HEIGHT", self.height),
            render_fps: env_parse(&var, "BEAUTIFY_RENDER_FPS", self.render_fps),
            detection_interval_ms: env_parse(&var, "BEAUTIFY_DETECTION_INTERVAL_MS", self.detection_interval_ms),
            min_score: env_parse(&var, "BEAUTIFY_MIN_SCORE", self.min_score),
            input_size: env_parse(&var, "BEAUTIFY_INPUT_SIZE", self.input_size),
            model_dir: var("BEAUTIFY_MODEL_DIR").map(PathBuf::from).unwrap_or(self.model_dir),
            output_dir: var("BEAUTIFY_OUTPUT_DIR").map(PathBuf::from).unwrap_or(self.output_dir),
            flash_ms: env_parse(&var, "BEAUTIFY_FLASH_MS", self.flash_ms),
            api_key,
            ai_endpoint: var("BEAUTIFY_AI_ENDPOINT").unwrap_or(self.ai_endpoint),
            ai_model: var("BEAUTIFY_AI_MODEL").unwrap_or(self.ai_model),
        }
    }

    pub fn constraints(&self) -> Constraints {
        Constraints {
            width: self.width,
            height: self.height,
            audio: false,
        }
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.render_fps.max(1)))
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms.max(1))
    }

    pub fn flash_duration(&self) -> Duration {
        Duration::from_millis(self.flash_ms)
    }

    /// Base detector options; the session switches optional stages on.
    pub fn detection_options(&self) -> DetectionOptions {
        DetectionOptions {
            min_score: self.min_score.clamp(0.0, 1.0),
            input_size: self.input_size,
            ..DetectionOptions::default()
        }
    }
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("beautify/config.toml")
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(current)
}
