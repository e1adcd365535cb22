use std::path::PathBuf;

use clap::Parser;
use got_ocr_config::{AppConfig, ConfigOverride, ConfigOverrides};
use got_ocr_core::runtime::{DeviceKind, Precision};

#[derive(Parser, Debug)]
#[command(author, version, about = "Process an image with GOT-OCR 2.0", long_about = None)]
pub struct Args {
    /// Path to the input image.
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// OCR processing type: ocr or format.
    #[arg(short = 't', long = "type", default_value = "ocr", help_heading = "OCR")]
    pub ocr_type: String,

    /// Processing method: chat or chat_crop.
    #[arg(short, long, default_value = "chat", help_heading = "OCR")]
    pub method: String,

    /// Render formatted results to HTML (requires `--type format`).
    #[arg(short, long, help_heading = "OCR")]
    pub render: bool,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, value_name = "PATH", help_heading = "OCR")]
    pub output: Option<PathBuf>,

    /// Restrict recognition to a region, given as `x1,y1,x2,y2`.
    #[arg(long = "box", value_name = "BOX", help_heading = "OCR")]
    pub ocr_box: Option<String>,

    /// Restrict recognition to text highlighted in `r,g,b` (or red/green/blue).
    #[arg(long = "color", value_name = "COLOR", help_heading = "OCR")]
    pub ocr_color: Option<String>,

    /// Optional path to a configuration file (defaults to platform config dir).
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub config: Option<PathBuf>,

    /// Hugging Face repo id or local directory holding the model files.
    #[arg(long, value_name = "SOURCE", help_heading = "Application")]
    pub model: Option<String>,

    /// Override the model configuration JSON path.
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub model_config: Option<PathBuf>,

    /// Override the default tokenizer path.
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub tokenizer: Option<PathBuf>,

    /// Override the weights path (defaults to model.safetensors of the source).
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub weights: Option<PathBuf>,

    /// Device backend to execute on (cpu/metal/cuda).
    #[arg(long, help_heading = "Inference")]
    pub device: Option<DeviceKind>,

    /// Numeric precision. Defaults to f32 on CPU and f16 on Metal/CUDA.
    #[arg(long, help_heading = "Inference")]
    pub dtype: Option<Precision>,

    /// Maximum number of tokens to generate.
    #[arg(long, help_heading = "Inference")]
    pub max_new_tokens: Option<usize>,

    /// Upper bound on tiles for `chat_crop`.
    #[arg(long, help_heading = "Inference")]
    pub max_tiles: Option<usize>,

    /// Only log errors.
    #[arg(short, long, help_heading = "Application")]
    pub quiet: bool,
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
        overrides.inference.max_tiles = args.max_tiles;
        overrides
    }
}

impl ConfigOverride for &Args {
    fn apply(self, config: &mut AppConfig) {
        config.apply_overrides(&ConfigOverrides::from(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flags_match_long_ones() {
        let args = Args::parse_from([
            "got-ocr",
            "page.png",
            "-t",
            "format",
            "-m",
            "chat_crop",
            "-r",
            "-o",
            "out.html",
        ]);
        assert_eq!(args.image, PathBuf::from("page.png"));
        assert_eq!(args.ocr_type, "format");
        assert_eq!(args.method, "chat_crop");
        assert!(args.render);
        assert_eq!(args.output, Some(PathBuf::from("out.html")));
    }

    #[test]
    fn defaults_to_plain_single_pass() {
        let args = Args::parse_from(["got-ocr", "page.png"]);
        assert_eq!(args.ocr_type, "ocr");
        assert_eq!(args.method, "chat");
        assert!(!args.render);
        assert!(args.output.is_none());
    }

    #[test]
    fn overrides_reach_app_config() {
        let args = Args::parse_from([
            "got-ocr",
            "page.png",
            "--model",
            "/models/got",
            "--max-new-tokens",
            "128",
            "--max-tiles",
            "4",
            "--device",
            "cpu",
        ]);
        let mut config = AppConfig::default();
        config += &args;
        assert_eq!(config.model.source, "/models/got");
        assert_eq!(config.inference.max_new_tokens, 128);
        assert_eq!(config.inference.max_tiles, 4);
        assert_eq!(config.inference.device, DeviceKind::Cpu);
    }
}
