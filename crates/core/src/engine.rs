use std::path::Path;

use anyhow::Result;
use tokenizers::Tokenizer;

use crate::{
    ingest::DecodedImage,
    request::{OcrBox, OcrColor, OcrType},
};

/// Per-call options forwarded to the model entry points.
#[derive(Debug, Clone, Copy)]
pub struct ChatOptions<'a> {
    pub ocr_type: OcrType,
    pub ocr_box: Option<OcrBox>,
    pub ocr_color: Option<OcrColor>,
    pub render: bool,
    /// Where the engine writes the rendered document when `render` is set.
    pub render_file: Option<&'a Path>,
}

/// Model-side contract: single-pass and tiled recognition.
pub trait OcrEngine: Send {
    fn chat(&self, tokenizer: &Tokenizer, image: &DecodedImage, options: &ChatOptions<'_>)
    -> Result<String>;

    fn chat_crop(
        &self,
        tokenizer: &Tokenizer,
        image: &DecodedImage,
        options: &ChatOptions<'_>,
    ) -> Result<String>;

    /// Token id that terminates generation; used as the padding token.
    fn eos_token_id(&self) -> Option<u32> {
        None
    }
}

/// Builds the engine and tokenizer backing a model handle.
pub trait ModelLoader: Send + Sync {
    /// Identity of the model source, for logs and error messages.
    fn describe(&self) -> String;

    fn load(&self) -> Result<(Box<dyn OcrEngine>, Tokenizer)>;
}
