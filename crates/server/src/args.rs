use std::path::PathBuf;

use clap::Parser;
use got_ocr_config::{AppConfig, ConfigOverride, ConfigOverrides};
use got_ocr_core::runtime::{DeviceKind, Precision};

#[derive(Parser, Debug)]
#[command(author, version, about = "GOT-OCR 2.0 API Server", long_about = None)]
pub struct Args {
    /// Optional path to a configuration file (defaults to platform config dir).
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub config: Option<PathBuf>,

    /// Hugging Face repo id or local directory holding the model files.
    #[arg(long, value_name = "SOURCE", help_heading = "Application")]
    pub model: Option<String>,

    /// Override the model configuration JSON path.
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub model_config: Option<PathBuf>,

    /// Tokenizer path.
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub tokenizer: Option<PathBuf>,

    /// Optional weights override (defaults to model.safetensors of the source).
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub weights: Option<PathBuf>,

    /// Device backend (cpu/metal/cuda).
    #[arg(long, help_heading = "Inference")]
    pub device: Option<DeviceKind>,

    /// Numeric precision override (cpu=f32 default, metal/cuda=f16).
    #[arg(long, help_heading = "Inference")]
    pub dtype: Option<Precision>,

    /// Max tokens generated per request.
    #[arg(long, help_heading = "Inference")]
    pub max_new_tokens: Option<usize>,

    /// Enforce no-repeat n-gram constraint of the given size (0 disables).
    #[arg(long, help_heading = "Inference")]
    pub no_repeat_ngram_size: Option<usize>,

    /// Upper bound on tiles for `chat_crop`.
    #[arg(long, help_heading = "Inference")]
    pub max_tiles: Option<usize>,

    /// Host/IP for Rocket to bind to.
    #[arg(long, help_heading = "Application")]
    pub host: Option<String>,

    /// TCP port for Rocket.
    #[arg(long, help_heading = "Application")]
    pub port: Option<u16>,

    /// Load the model on the first request instead of at start-up.
    #[arg(long, help_heading = "Application")]
    pub lazy: bool,
}

impl From<&Args> for ConfigOverrides {
    fn from(args: &Args) -> Self {
        let mut overrides = ConfigOverrides::default();
        overrides.model_source = args.model.clone();
        overrides.model_config = args.model_config.clone();
        overrides.tokenizer = args.tokenizer.clone();
        overrides.weights = args.weights.clone();
        overrides.inference.device = args.device;
        overrides.inference.precision = args.dtype;
        overrides.inference.max_new_tokens = args.max_new_tokens;
        overrides.inference.no_repeat_ngram_size = args.no_repeat_ngram_size;
        overrides.inference.max_tiles = args.max_tiles;
        overrides.server.host = args.host.clone();
        overrides.server.port = args.port;
        overrides.server.preload = args.lazy.then_some(false);
        overrides
    }
}

impl ConfigOverride for &Args {
    fn apply(self, config: &mut AppConfig) {
        config.apply_overrides(&ConfigOverrides::from(self));
    }
}
