use std::{
    fs,
    str::FromStr,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use tokenizers::Tokenizer;

use crate::{
    engine::{ChatOptions, OcrEngine},
    ingest::DecodedImage,
    request::{Method, OcrBox, OcrColor, OcrType},
};

const STUB_TOKENIZER: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": { "type": "Whitespace" },
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": { "<unk>": 0, "<|im_end|>": 1, "hello": 2 },
    "unk_token": "<unk>"
  }
}"#;

pub(crate) fn stub_tokenizer() -> Tokenizer {
    Tokenizer::from_str(STUB_TOKENIZER).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
    pub method: Method,
    pub ocr_type: OcrType,
    pub ocr_box: Option<OcrBox>,
    pub ocr_color: Option<OcrColor>,
    pub render: bool,
    pub has_render_file: bool,
}

/// Engine that echoes its inputs and records every call.
#[derive(Default, Clone)]
pub(crate) struct StubEngine {
    pub calls: Arc<Mutex<Vec<RecordedCall>>>,
    pub fail_with: Option<String>,
}

impl StubEngine {
    fn respond(
        &self,
        method: Method,
        image: &DecodedImage,
        options: &ChatOptions<'_>,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            ocr_type: options.ocr_type,
            ocr_box: options.ocr_box,
            ocr_color: options.ocr_color,
            render: options.render,
            has_render_file: options.render_file.is_some(),
        });
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }
        let text = format!("{method} {}x{}", image.width(), image.height());
        if options.render {
            if let Some(path) = options.render_file {
                fs::write(path, format!("<html>{text}</html>"))?;
            }
        }
        Ok(text)
    }
}

impl OcrEngine for StubEngine {
    fn chat(
        &self,
        _tokenizer: &Tokenizer,
        image: &DecodedImage,
        options: &ChatOptions<'_>,
    ) -> Result<String> {
        self.respond(Method::Chat, image, options)
    }

    fn chat_crop(
        &self,
        _tokenizer: &Tokenizer,
        image: &DecodedImage,
        options: &ChatOptions<'_>,
    ) -> Result<String> {
        self.respond(Method::ChatCrop, image, options)
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(1)
    }
}
