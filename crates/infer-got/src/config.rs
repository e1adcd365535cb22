use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use candle_nn::Activation;
use serde::Deserialize;

/// `config.json` of a Hugging Face GOT-OCR 2.0 checkpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GotOcrConfig {
    #[serde(default)]
    pub vision_config: GotVisionConfig,
    #[serde(default)]
    pub text_config: GotTextConfig,
    #[serde(default = "default_image_token_index")]
    pub image_token_index: u32,
}

impl Default for GotOcrConfig {
    fn default() -> Self {
        Self {
            vision_config: GotVisionConfig::default(),
            text_config: GotTextConfig::default(),
            image_token_index: default_image_token_index(),
        }
    }
}

fn default_image_token_index() -> u32 {
    151859
}

impl GotOcrConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read model config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse model config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let vision = &self.vision_config;
        ensure!(
            vision.hidden_size % vision.num_attention_heads == 0,
            "vision hidden size {} not divisible by {} heads",
            vision.hidden_size,
            vision.num_attention_heads
        );
        ensure!(
            vision.image_size % vision.patch_size == 0,
            "vision image size {} not divisible by patch size {}",
            vision.image_size,
            vision.patch_size
        );
        let text = &self.text_config;
        ensure!(
            text.hidden_size % text.num_attention_heads == 0,
            "text hidden size {} not divisible by {} heads",
            text.hidden_size,
            text.num_attention_heads
        );
        ensure!(
            text.num_attention_heads % text.num_key_value_heads == 0,
            "{} attention heads not divisible by {} key/value heads",
            text.num_attention_heads,
            text.num_key_value_heads
        );
        Ok(())
    }

    /// Language-model tokens produced for one `image_size`² image.
    pub fn image_tokens_per_tile(&self) -> usize {
        let grid = self.vision_config.image_size / self.vision_config.patch_size;
        // two stride-2 convolutions in the projector
        (grid / 4) * (grid / 4)
    }
}

/// SAM ViT-B image encoder settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GotVisionConfig {
    pub hidden_size: usize,
    pub output_channels: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_channels: usize,
    pub image_size: usize,
    pub patch_size: usize,
    pub layer_norm_eps: f64,
    pub qkv_bias: bool,
    pub use_abs_pos: bool,
    pub use_rel_pos: bool,
    pub window_size: usize,
    pub global_attn_indexes: Vec<usize>,
    pub mlp_dim: usize,
}

impl Default for GotVisionConfig {
    fn default() -> Self {
        Self {
            hidden_size: 768,
            output_channels: 256,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            num_channels: 3,
            image_size: 1024,
            patch_size: 16,
            layer_norm_eps: 1e-6,
            qkv_bias: true,
            use_abs_pos: true,
            use_rel_pos: true,
            window_size: 14,
            global_attn_indexes: vec![2, 5, 8, 11],
            mlp_dim: 3072,
        }
    }
}

/// Qwen2 language model settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GotTextConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    pub max_position_embeddings: usize,
    pub rope_theta: f64,
    pub rms_norm_eps: f64,
    pub tie_word_embeddings: bool,
    pub hidden_act: Activation,
}

impl Default for GotTextConfig {
    fn default() -> Self {
        Self {
            vocab_size: 151860,
            hidden_size: 1024,
            intermediate_size: 2816,
            num_hidden_layers: 24,
            num_attention_heads: 16,
            num_key_value_heads: 16,
            max_position_embeddings: 32768,
            rope_theta: 1_000_000.0,
            rms_norm_eps: 1e-6,
            tie_word_embeddings: true,
            hidden_act: Activation::Silu,
        }
    }
}

impl GotTextConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}
