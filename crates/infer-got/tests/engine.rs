use std::str::FromStr;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use got_ocr_core::{ChatOptions, DecodedImage, OcrEngine, OcrType};
use got_ocr_infer::{
    DecodeSettings, GotOcrModel,
    config::{GotOcrConfig, GotTextConfig, GotVisionConfig},
};
use image::{DynamicImage, RgbImage};
use tokenizers::Tokenizer;

// With all-zero weights every logit ties and greedy selection takes the
// highest id, which is "done".
const TOKENIZER: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    { "id": 1, "content": "<|im_end|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true },
    { "id": 2, "content": "<|im_start|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true },
    { "id": 3, "content": "<|endoftext|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true },
    { "id": 4, "content": "<img>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true },
    { "id": 5, "content": "</img>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true },
    { "id": 6, "content": "<imgpad>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true }
  ],
  "normalizer": null,
  "pre_tokenizer": { "type": "Whitespace" },
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {
      "<unk>": 0, "<|im_end|>": 1, "<|im_start|>": 2, "<|endoftext|>": 3,
      "<img>": 4, "</img>": 5, "<imgpad>": 6, "system": 7, "user": 8,
      "assistant": 9, "OCR": 10, ":": 11, "with": 12, "format": 13,
      "text": 14, "done": 15
    },
    "unk_token": "<unk>"
  }
}"#;

fn tiny_model(max_new_tokens: usize) -> GotOcrModel {
    let config = GotOcrConfig {
        vision_config: GotVisionConfig {
            hidden_size: 8,
            output_channels: 4,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            image_size: 32,
            patch_size: 8,
            window_size: 2,
            global_attn_indexes: vec![1],
            mlp_dim: 16,
            ..GotVisionConfig::default()
        },
        text_config: GotTextConfig {
            vocab_size: 16,
            hidden_size: 8,
            intermediate_size: 16,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            num_key_value_heads: 1,
            max_position_embeddings: 512,
            ..GotTextConfig::default()
        },
        image_token_index: 6,
    };
    let settings = DecodeSettings {
        max_new_tokens,
        no_repeat_ngram_size: Some(20),
        max_tiles: 4,
    };
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    GotOcrModel::from_var_builder(config, vb, settings)
        .unwrap()
        .with_eos_token(Some(1))
}

fn options(ocr_type: OcrType) -> ChatOptions<'static> {
    ChatOptions {
        ocr_type,
        ocr_box: None,
        ocr_color: None,
        render: false,
        render_file: None,
    }
}

fn image(width: u32, height: u32) -> DecodedImage {
    DecodedImage::from_dynamic(DynamicImage::ImageRgb8(RgbImage::new(width, height)))
}

#[test]
fn chat_generates_up_to_token_limit() {
    let tokenizer = Tokenizer::from_str(TOKENIZER).unwrap();
    let model = tiny_model(3);
    let text = model.chat(&tokenizer, &image(40, 20), &options(OcrType::Ocr)).unwrap();
    assert_eq!(text, "done done done");
}

#[test]
fn chat_crop_tiles_wide_images() {
    let tokenizer = Tokenizer::from_str(TOKENIZER).unwrap();
    let model = tiny_model(2);
    let text = model
        .chat_crop(&tokenizer, &image(128, 32), &options(OcrType::Format))
        .unwrap();
    assert_eq!(text, "done done");
}

#[test]
fn render_writes_html_next_to_text() {
    let tokenizer = Tokenizer::from_str(TOKENIZER).unwrap();
    let model = tiny_model(1);
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("page.html");
    let mut opts = options(OcrType::Format);
    opts.render = true;
    opts.render_file = Some(&target);

    let text = model.chat(&tokenizer, &image(32, 32), &opts).unwrap();
    assert_eq!(text, "done");
    let html = std::fs::read_to_string(&target).unwrap();
    assert!(html.contains(r#"const text = "done";"#));
}

#[test]
fn zero_token_budget_yields_empty_text() {
    let tokenizer = Tokenizer::from_str(TOKENIZER).unwrap();
    let model = tiny_model(0);
    let text = model.chat(&tokenizer, &image(16, 16), &options(OcrType::Ocr)).unwrap();
    assert!(text.is_empty());
}
