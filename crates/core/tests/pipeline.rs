use std::{io::Cursor, str::FromStr, sync::Arc};

use anyhow::Result;
use base64::Engine;
use got_ocr_core::{
    ChatOptions, DecodedImage, ImageSource, ModelCache, ModelLoader, OcrDispatcher, OcrEngine,
    OcrError, OcrRequest, RequestFields, TempWorkspace, normalize,
};
use image::{DynamicImage, ImageFormat, RgbImage};
use tokenizers::Tokenizer;

const TOKENIZER_JSON: &str = r#"{
  "version": "1.0", "truncation": null, "padding": null, "added_tokens": [],
  "normalizer": null, "pre_tokenizer": { "type": "Whitespace" },
  "post_processor": null, "decoder": null,
  "model": { "type": "WordLevel", "vocab": { "<unk>": 0, "<|im_end|>": 1 }, "unk_token": "<unk>" }
}"#;

struct FixedEngine {
    fail: bool,
}

impl FixedEngine {
    fn answer(&self, options: &ChatOptions<'_>) -> Result<String> {
        if self.fail {
            anyhow::bail!("tensor shape mismatch");
        }
        if let (true, Some(path)) = (options.render, options.render_file) {
            std::fs::write(path, "<!DOCTYPE html><p>Total: 42</p>")?;
        }
        Ok("Total: 42".to_string())
    }
}

impl OcrEngine for FixedEngine {
    fn chat(&self, _: &Tokenizer, _: &DecodedImage, options: &ChatOptions<'_>) -> Result<String> {
        self.answer(options)
    }

    fn chat_crop(
        &self,
        _: &Tokenizer,
        _: &DecodedImage,
        options: &ChatOptions<'_>,
    ) -> Result<String> {
        self.answer(options)
    }
}

struct FixedLoader {
    fail: bool,
}

impl ModelLoader for FixedLoader {
    fn describe(&self) -> String {
        "fixed".into()
    }

    fn load(&self) -> Result<(Box<dyn OcrEngine>, Tokenizer)> {
        let tokenizer = Tokenizer::from_str(TOKENIZER_JSON).map_err(|err| anyhow::anyhow!(err))?;
        Ok((Box::new(FixedEngine { fail: self.fail }), tokenizer))
    }
}

fn receipt_png() -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(32, 16))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn dispatcher(fail: bool) -> OcrDispatcher {
    OcrDispatcher::new(Arc::new(ModelCache::new(FixedLoader { fail })))
}

#[test]
fn plain_ocr_of_uploaded_png() {
    let source = ImageSource::from_inputs(Some(receipt_png()), None).unwrap();
    let image = normalize(source).unwrap();
    let request = OcrRequest::parse(RequestFields {
        ocr_type: Some("ocr"),
        method: Some("chat"),
        ..RequestFields::default()
    })
    .unwrap();
    let output = dispatcher(false).run(&image, &request, None).unwrap();
    assert_eq!(output.as_str(), "Total: 42");
    assert!(!output.is_rendered());
}

#[test]
fn rendered_format_from_base64_cleans_up_workspace() {
    let encoded = base64::engine::general_purpose::STANDARD.encode(receipt_png());
    let image = normalize(ImageSource::from_inputs(None, Some(encoded)).unwrap()).unwrap();
    let request = OcrRequest::parse(RequestFields {
        ocr_type: Some("format"),
        method: Some("chat_crop"),
        render: true,
        ..RequestFields::default()
    })
    .unwrap();
    let workspace = TempWorkspace::new().unwrap();
    let root = workspace.path().to_path_buf();
    let output = dispatcher(false)
        .run(&image, &request, Some(&workspace))
        .unwrap();
    assert!(output.is_rendered());
    assert!(output.as_str().starts_with("<!DOCTYPE html>"));
    drop(workspace);
    assert!(!root.exists());
}

#[test]
fn failed_inference_still_cleans_up_workspace() {
    let image = normalize(ImageSource::Upload(receipt_png())).unwrap();
    let request = OcrRequest::parse(RequestFields {
        ocr_type: Some("format"),
        render: true,
        ..RequestFields::default()
    })
    .unwrap();
    let root = {
        let workspace = TempWorkspace::new().unwrap();
        let err = dispatcher(true)
            .run(&image, &request, Some(&workspace))
            .unwrap_err();
        assert!(matches!(err, OcrError::InferenceFailure(_)));
        workspace.path().to_path_buf()
    };
    assert!(!root.exists());
}

#[test]
fn render_with_plain_type_is_rejected_before_dispatch() {
    let err = OcrRequest::parse(RequestFields {
        ocr_type: Some("ocr"),
        render: true,
        ..RequestFields::default()
    })
    .unwrap_err();
    assert!(err.is_client_error());
}
