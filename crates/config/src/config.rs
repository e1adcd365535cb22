use std::{
    fmt, fs,
    ops::AddAssign,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use got_ocr_core::runtime::{DeviceKind, Precision};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::paths::default_config_path;

/// Hub repository used when nothing else names a model.
pub const DEFAULT_MODEL_SOURCE: &str = "stepfun-ai/GOT-OCR-2.0-hf";

/// Environment variable naming the model source (hub repo id or directory).
pub const MODEL_SOURCE_ENV: &str = "GOT_OCR_MODEL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub inference: InferenceSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Hugging Face repo id or a local directory with the model files.
    pub source: String,
    pub config: Option<PathBuf>,
    pub tokenizer: Option<PathBuf>,
    pub weights: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_MODEL_SOURCE.to_string(),
            config: None,
            tokenizer: None,
            weights: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub device: DeviceKind,
    pub precision: Option<Precision>,
    pub max_new_tokens: usize,
    pub no_repeat_ngram_size: Option<usize>,
    pub max_tiles: usize,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            device: DeviceKind::Cpu,
            precision: None,
            max_new_tokens: 4096,
            no_repeat_ngram_size: Some(20),
            max_tiles: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Load the model before accepting requests.
    pub preload: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            preload: true,
        }
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone)]
pub enum ConfigDescriptor {
    File(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigDescriptor::File(path) => write!(f, "{}", path.display()),
            ConfigDescriptor::Defaults => f.write_str("built-in defaults"),
        }
    }
}

impl AppConfig {
    /// Reads `override_path` if given, else the default config file when it
    /// exists, else built-in defaults. Nothing is written to disk.
    pub fn load(override_path: Option<&Path>) -> Result<(Self, ConfigDescriptor)> {
        let (mut config, descriptor) = match override_path {
            Some(path) => (Self::from_file(path)?, ConfigDescriptor::File(path.to_path_buf())),
            None => {
                let path = default_config_path();
                if path.is_file() {
                    (Self::from_file(&path)?, ConfigDescriptor::File(path))
                } else {
                    debug!(path = %path.display(), "No configuration file; using defaults");
                    (Self::default(), ConfigDescriptor::Defaults)
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok((config, descriptor))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse configuration {}", path.display()))
    }

    /// Applies environment-level settings through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(source) = lookup(MODEL_SOURCE_ENV).filter(|v| !v.trim().is_empty()) {
            self.model.source = source.trim().to_string();
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(source) = overrides.model_source.as_ref() {
            self.model.source = source.clone();
        }
        if let Some(path) = overrides.model_config.as_ref() {
            self.model.config = Some(path.clone());
        }
        if let Some(path) = overrides.tokenizer.as_ref() {
            self.model.tokenizer = Some(path.clone());
        }
        if let Some(path) = overrides.weights.as_ref() {
            self.model.weights = Some(path.clone());
        }

        if let Some(device) = overrides.inference.device {
            self.inference.device = device;
        }
        if overrides.inference.precision.is_some() {
            self.inference.precision = overrides.inference.precision;
        }
        if let Some(max_new_tokens) = overrides.inference.max_new_tokens {
            self.inference.max_new_tokens = max_new_tokens;
        }
        if let Some(no_repeat) = overrides.inference.no_repeat_ngram_size {
            self.inference.no_repeat_ngram_size = (no_repeat > 0).then_some(no_repeat);
        }
        if let Some(max_tiles) = overrides.inference.max_tiles {
            self.inference.max_tiles = max_tiles;
        }

        if let Some(host) = overrides.server.host.as_ref() {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.server.port {
            self.server.port = port;
        }
        if let Some(preload) = overrides.server.preload {
            self.server.preload = preload;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model_source: Option<String>,
    pub model_config: Option<PathBuf>,
    pub tokenizer: Option<PathBuf>,
    pub weights: Option<PathBuf>,
    pub inference: InferenceOverride,
    pub server: ServerOverride,
}

#[derive(Debug, Clone, Default)]
pub struct InferenceOverride {
    pub device: Option<DeviceKind>,
    pub precision: Option<Precision>,
    pub max_new_tokens: Option<usize>,
    pub no_repeat_ngram_size: Option<usize>,
    pub max_tiles: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ServerOverride {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub preload: Option<bool>,
}

/// Anything that can be layered on top of an [`AppConfig`] with `+=`.
pub trait ConfigOverride {
    fn apply(self, config: &mut AppConfig);
}

impl ConfigOverride for ConfigOverrides {
    fn apply(self, config: &mut AppConfig) {
        config.apply_overrides(&self);
    }
}

impl ConfigOverride for &ConfigOverrides {
    fn apply(self, config: &mut AppConfig) {
        config.apply_overrides(self);
    }
}

impl<O> AddAssign<O> for AppConfig
where
    O: ConfigOverride,
{
    fn add_assign(&mut self, rhs: O) {
        rhs.apply(self);
    }
}
