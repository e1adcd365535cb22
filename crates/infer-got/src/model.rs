use std::{path::Path, time::Instant};

use anyhow::{Context, Result, anyhow, ensure};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use got_ocr_core::{ChatOptions, DecodedImage, OcrEngine};
use image::RgbImage;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{
    config::GotOcrConfig,
    preprocess::{dynamic_preprocess, images_to_tensor},
    prompt::{END_OF_TEXT, IM_END, IMAGE_PAD, PromptParts, build_query},
    render,
    sampling::select_greedy,
    text::TextModel,
    vision::VisionEncoder,
};

/// Generation limits applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSettings {
    pub max_new_tokens: usize,
    pub no_repeat_ngram_size: Option<usize>,
    /// Upper bound on tiles for the multi-crop path.
    pub max_tiles: u32,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: 4096,
            no_repeat_ngram_size: Some(20),
            max_tiles: 6,
        }
    }
}

/// Tensor name prefixes of the two checkpoint layouts in circulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WeightLayout {
    vision: &'static str,
    projector: &'static str,
    language: &'static str,
    lm_head: &'static str,
}

impl WeightLayout {
    const NESTED: Self = Self {
        vision: "model.vision_tower",
        projector: "model.multi_modal_projector",
        language: "model.language_model",
        lm_head: "lm_head",
    };
    const FLAT: Self = Self {
        vision: "vision_tower",
        projector: "multi_modal_projector",
        language: "language_model.model",
        lm_head: "language_model.lm_head",
    };

    fn detect(vb: &VarBuilder) -> Self {
        if vb.contains_tensor("model.language_model.embed_tokens.weight") {
            Self::NESTED
        } else {
            Self::FLAT
        }
    }
}

pub struct GotOcrModel {
    config: GotOcrConfig,
    vision: VisionEncoder,
    text: TextModel,
    device: Device,
    dtype: DType,
    settings: DecodeSettings,
    eos_token_id: Option<u32>,
}

impl GotOcrModel {
    pub fn load(
        config: GotOcrConfig,
        weights: &Path,
        device: &Device,
        dtype: DType,
        settings: DecodeSettings,
    ) -> Result<Self> {
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], dtype, device) }
            .with_context(|| format!("failed to mmap weights at {}", weights.display()))?;
        Self::from_var_builder(config, vb, settings)
    }

    pub fn from_var_builder(
        config: GotOcrConfig,
        vb: VarBuilder,
        settings: DecodeSettings,
    ) -> Result<Self> {
        config.validate()?;
        let layout = WeightLayout::detect(&vb);
        debug!(?layout, "resolved checkpoint layout");

        let text_cfg = &config.text_config;
        let vision = VisionEncoder::load(
            &config.vision_config,
            text_cfg.hidden_size,
            vb.pp(layout.vision),
            vb.pp(layout.projector),
        )?;
        let lm_head_name = format!("{}.weight", layout.lm_head);
        let lm_head_vb = if vb.contains_tensor(&lm_head_name) || !text_cfg.tie_word_embeddings {
            Some(vb.pp(layout.lm_head))
        } else {
            None
        };
        let text = TextModel::new(text_cfg, vb.pp(layout.language), lm_head_vb)
            .context("failed to load language model")?;

        Ok(Self {
            device: vb.device().clone(),
            dtype: vb.dtype(),
            config,
            vision,
            text,
            settings,
            eos_token_id: None,
        })
    }

    /// Sets the id reported as end-of-sequence (and used for padding).
    pub fn with_eos_token(mut self, id: Option<u32>) -> Self {
        self.eos_token_id = id;
        self
    }

    pub fn config(&self) -> &GotOcrConfig {
        &self.config
    }

    pub fn settings(&self) -> DecodeSettings {
        self.settings
    }

    fn recognize(
        &self,
        tokenizer: &Tokenizer,
        image: &DecodedImage,
        tiles: &[RgbImage],
        options: &ChatOptions<'_>,
        tiled: bool,
    ) -> Result<String> {
        let started = Instant::now();
        let size = self.config.vision_config.image_size as u32;
        let pixels = images_to_tensor(tiles, size, &self.device, self.dtype)?;
        let image_embeds = self.vision.encode(&pixels)?;
        let (image_tokens, _) = image_embeds.dims2()?;
        debug!(tiles = tiles.len(), image_tokens, "encoded image");

        let query = build_query(options, (image.width(), image.height()), tiled);
        let pad_id = tokenizer
            .token_to_id(IMAGE_PAD)
            .unwrap_or(self.config.image_token_index);
        let ids = prompt_ids(tokenizer, &PromptParts::new(&query), pad_id, image_tokens)?;

        let ids_tensor = Tensor::new(ids.as_slice(), &self.device)?;
        let text_embeds = self.text.embed(&ids_tensor)?;
        let embeds = splice_image_embeddings(&text_embeds, &ids, pad_id, &image_embeds)?;

        let generated = self.generate(tokenizer, &embeds, ids)?;
        let decoded = tokenizer
            .decode(&generated, true)
            .map_err(|err| anyhow!("failed to decode output: {err}"))?;
        let text = decoded.trim().to_string();
        info!(
            tokens = generated.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation finished"
        );

        if options.render {
            if let Some(path) = options.render_file {
                render::write_html(path, &text)?;
            }
        }
        Ok(text)
    }

    fn generate(
        &self,
        tokenizer: &Tokenizer,
        prompt: &Tensor,
        mut context: Vec<u32>,
    ) -> Result<Vec<u32>> {
        let stop_tokens: Vec<u32> = [IM_END, END_OF_TEXT]
            .iter()
            .filter_map(|token| tokenizer.token_to_id(token))
            .chain(self.eos_token_id)
            .collect();
        let max_positions = self.config.text_config.max_position_embeddings;

        let mut cache = self.text.new_cache();
        let mut logits = self.text.forward_embeds(&prompt.unsqueeze(0)?, &mut cache)?;
        let mut generated = Vec::new();
        while generated.len() < self.settings.max_new_tokens {
            let next = select_greedy(&logits, &context, self.settings.no_repeat_ngram_size)?;
            if stop_tokens.contains(&next) {
                break;
            }
            generated.push(next);
            context.push(next);
            if context.len() >= max_positions {
                debug!(max_positions, "context window exhausted");
                break;
            }
            let step = Tensor::new(&[[next]], &self.device)?;
            logits = self.text.forward_embeds(&self.text.embed(&step)?, &mut cache)?;
        }
        Ok(generated)
    }
}

impl OcrEngine for GotOcrModel {
    fn chat(
        &self,
        tokenizer: &Tokenizer,
        image: &DecodedImage,
        options: &ChatOptions<'_>,
    ) -> Result<String> {
        let single = std::slice::from_ref(image.as_rgb());
        self.recognize(tokenizer, image, single, options, false)
    }

    fn chat_crop(
        &self,
        tokenizer: &Tokenizer,
        image: &DecodedImage,
        options: &ChatOptions<'_>,
    ) -> Result<String> {
        let size = self.config.vision_config.image_size as u32;
        let max_tiles = self.settings.max_tiles.max(1);
        let tiles = dynamic_preprocess(image.as_rgb(), 1, max_tiles, size, true);
        self.recognize(tokenizer, image, &tiles, options, true)
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
}

fn encode_ids(tokenizer: &Tokenizer, text: &str) -> Result<Vec<u32>> {
    let encoding = tokenizer
        .encode(text, false)
        .map_err(|err| anyhow!("tokenization failed: {err}"))?;
    Ok(encoding.get_ids().to_vec())
}

/// Prompt token ids with `image_tokens` copies of `pad_id` between the
/// prefix and suffix.
fn prompt_ids(
    tokenizer: &Tokenizer,
    parts: &PromptParts,
    pad_id: u32,
    image_tokens: usize,
) -> Result<Vec<u32>> {
    let mut ids = encode_ids(tokenizer, &parts.prefix)?;
    ids.extend(std::iter::repeat_n(pad_id, image_tokens));
    ids.extend(encode_ids(tokenizer, &parts.suffix)?);
    Ok(ids)
}

/// Replaces the contiguous run of `pad_id` rows in `text_embeds` with the
/// image embeddings.
fn splice_image_embeddings(
    text_embeds: &Tensor,
    ids: &[u32],
    pad_id: u32,
    image_embeds: &Tensor,
) -> Result<Tensor> {
    let positions: Vec<usize> = ids
        .iter()
        .enumerate()
        .filter(|(_, id)| **id == pad_id)
        .map(|(idx, _)| idx)
        .collect();
    let (image_tokens, _) = image_embeds.dims2()?;
    ensure!(
        positions.len() == image_tokens,
        "prompt has {} image placeholders but the encoder produced {image_tokens} embeddings",
        positions.len()
    );
    let (Some(&start), Some(&last)) = (positions.first(), positions.last()) else {
        return Ok(text_embeds.clone());
    };
    ensure!(
        last - start + 1 == image_tokens,
        "image placeholders are not contiguous"
    );

    let end = last + 1;
    let image = image_embeds.to_dtype(text_embeds.dtype())?;
    let mut pieces = Vec::with_capacity(3);
    if start > 0 {
        pieces.push(text_embeds.narrow(0, 0, start)?);
    }
    pieces.push(image);
    if end < ids.len() {
        pieces.push(text_embeds.narrow(0, end, ids.len() - end)?);
    }
    Ok(Tensor::cat(&pieces, 0)?)
}
