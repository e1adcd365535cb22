use got_ocr_core::{ChatOptions, OcrBox, OcrColor, OcrType};

pub const SYSTEM_PROMPT: &str =
    "You should follow the instructions carefully and explain your answers in detail.";
pub const IM_START: &str = "<|im_start|>";
pub const IM_END: &str = "<|im_end|>";
pub const END_OF_TEXT: &str = "<|endoftext|>";
pub const IMAGE_START: &str = "<img>";
pub const IMAGE_END: &str = "</img>";
pub const IMAGE_PAD: &str = "<imgpad>";

/// Conversation text around the run of image placeholder tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptParts {
    pub prefix: String,
    pub suffix: String,
}

impl PromptParts {
    pub fn new(query: &str) -> Self {
        Self {
            prefix: format!(
                "{IM_START}system\n{SYSTEM_PROMPT}{IM_END}{IM_START}user\n{IMAGE_START}"
            ),
            suffix: format!("{IMAGE_END}\n{query}{IM_END}{IM_START}assistant\n"),
        }
    }

    /// Full prompt text with `image_tokens` placeholders spelled out.
    pub fn render(&self, image_tokens: usize) -> String {
        format!("{}{}{}", self.prefix, IMAGE_PAD.repeat(image_tokens), self.suffix)
    }
}

/// Instruction for the model. A color hint replaces a box hint when both
/// are given.
pub fn build_query(options: &ChatOptions<'_>, image_size: (u32, u32), tiled: bool) -> String {
    let task = match (options.ocr_type, tiled) {
        (OcrType::Ocr, false) => "OCR: ",
        (OcrType::Format, false) => "OCR with format: ",
        (OcrType::Ocr, true) => "OCR upon the patch reference: ",
        (OcrType::Format, true) => "OCR with format upon the patch reference: ",
    };
    if let Some(color) = options.ocr_color {
        return format!("[{}] {task}", color_name(color));
    }
    if let Some(region) = options.ocr_box {
        let [x1, y1, x2, y2] = scale_box(region, image_size);
        return format!("[{x1}, {y1}, {x2}, {y2}] {task}");
    }
    task.to_string()
}

/// Maps pixel coordinates onto the 0..=1000 grid the model was trained with.
pub fn scale_box(region: OcrBox, (width, height): (u32, u32)) -> [u32; 4] {
    let scale = |value: u32, extent: u32| -> u32 {
        let extent = extent.max(1) as u64;
        ((value as u64 * 1000 / extent) as u32).min(1000)
    };
    [
        scale(region.x1, width),
        scale(region.y1, height),
        scale(region.x2, width),
        scale(region.y2, height),
    ]
}

/// The model only knows red, green and blue frames.
pub fn color_name(color: OcrColor) -> &'static str {
    let OcrColor { r, g, b } = color;
    if r >= g && r >= b {
        "red"
    } else if g >= b {
        "green"
    } else {
        "blue"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(ocr_type: OcrType) -> ChatOptions<'static> {
        ChatOptions {
            ocr_type,
            ocr_box: None,
            ocr_color: None,
            render: false,
            render_file: None,
        }
    }

    #[test]
    fn plain_and_format_queries() {
        assert_eq!(build_query(&options(OcrType::Ocr), (10, 10), false), "OCR: ");
        assert_eq!(
            build_query(&options(OcrType::Format), (10, 10), false),
            "OCR with format: "
        );
        assert_eq!(
            build_query(&options(OcrType::Format), (10, 10), true),
            "OCR with format upon the patch reference: "
        );
    }

    #[test]
    fn box_is_scaled_to_thousandths() {
        let mut opts = options(OcrType::Ocr);
        opts.ocr_box = Some(OcrBox {
            x1: 50,
            y1: 20,
            x2: 200,
            y2: 400,
        });
        assert_eq!(build_query(&opts, (200, 400), false), "[250, 50, 1000, 1000] OCR: ");
    }

    #[test]
    fn color_wins_over_box() {
        let mut opts = options(OcrType::Format);
        opts.ocr_box = Some(OcrBox {
            x1: 0,
            y1: 0,
            x2: 1,
            y2: 1,
        });
        opts.ocr_color = Some(OcrColor { r: 10, g: 200, b: 30 });
        assert_eq!(build_query(&opts, (10, 10), false), "[green] OCR with format: ");
    }

    #[test]
    fn nearest_primary_color() {
        assert_eq!(color_name(OcrColor::RED), "red");
        assert_eq!(color_name(OcrColor { r: 0, g: 10, b: 250 }), "blue");
        assert_eq!(color_name(OcrColor { r: 20, g: 90, b: 90 }), "green");
    }

    #[test]
    fn prompt_wraps_image_placeholders() {
        let parts = PromptParts::new("OCR: ");
        let rendered = parts.render(2);
        assert!(rendered.starts_with("<|im_start|>system\nYou should follow"));
        let user_turn = "<|im_end|><|im_start|>user\n<img><imgpad><imgpad></img>\nOCR: ";
        assert!(rendered.contains(user_turn));
        assert!(rendered.ends_with("<|im_end|><|im_start|>assistant\n"));
    }
}
