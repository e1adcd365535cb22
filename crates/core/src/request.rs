use std::{fmt, path::PathBuf, str::FromStr};

use crate::error::{OcrError, OcrResult};

/// Output mode requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OcrType {
    /// Plain text.
    #[default]
    Ocr,
    /// Layout-preserving markdown/LaTeX.
    Format,
}

impl OcrType {
    pub fn as_str(self) -> &'static str {
        match self {
            OcrType::Ocr => "ocr",
            OcrType::Format => "format",
        }
    }
}

impl FromStr for OcrType {
    type Err = OcrError;

    fn from_str(s: &str) -> OcrResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ocr" => Ok(OcrType::Ocr),
            "format" => Ok(OcrType::Format),
            other => Err(OcrError::RequestInvalid(format!(
                "unknown ocr type `{other}` (expected `ocr` or `format`)"
            ))),
        }
    }
}

impl fmt::Display for OcrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing variant: whole image at once or tiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Chat,
    ChatCrop,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Chat => "chat",
            Method::ChatCrop => "chat_crop",
        }
    }
}

impl FromStr for Method {
    type Err = OcrError;

    fn from_str(s: &str) -> OcrResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Method::Chat),
            "chat_crop" => Ok(Method::ChatCrop),
            other => Err(OcrError::RequestInvalid(format!(
                "unknown method `{other}` (expected `chat` or `chat_crop`)"
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Region of interest in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl FromStr for OcrBox {
    type Err = OcrError;

    fn from_str(s: &str) -> OcrResult<Self> {
        let parts = parse_components(s, 4)
            .ok_or_else(|| {
                OcrError::RequestInvalid(format!("invalid ocr box `{s}` (expected `x1,y1,x2,y2`)"))
            })?;
        Ok(OcrBox {
            x1: parts[0],
            y1: parts[1],
            x2: parts[2],
            y2: parts[3],
        })
    }
}

impl fmt::Display for OcrBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Color of a highlighted region to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl OcrColor {
    pub const RED: OcrColor = OcrColor { r: 255, g: 0, b: 0 };
    pub const GREEN: OcrColor = OcrColor { r: 0, g: 255, b: 0 };
    pub const BLUE: OcrColor = OcrColor { r: 0, g: 0, b: 255 };
}

impl FromStr for OcrColor {
    type Err = OcrError;

    fn from_str(s: &str) -> OcrResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" => return Ok(OcrColor::RED),
            "green" => return Ok(OcrColor::GREEN),
            "blue" => return Ok(OcrColor::BLUE),
            _ => {}
        }
        let parts = parse_components(s, 3)
            .filter(|parts| parts.iter().all(|&c| c <= u8::MAX as u32))
            .ok_or_else(|| {
                OcrError::RequestInvalid(format!("invalid ocr color `{s}` (expected `r,g,b`)"))
            })?;
        Ok(OcrColor {
            r: parts[0] as u8,
            g: parts[1] as u8,
            b: parts[2] as u8,
        })
    }
}

impl fmt::Display for OcrColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.r, self.g, self.b)
    }
}

/// Accepts `a,b,c` with optional surrounding brackets and whitespace.
fn parse_components(raw: &str, expected: usize) -> Option<Vec<u32>> {
    let trimmed = raw
        .trim()
        .trim_start_matches(['[', '('])
        .trim_end_matches([']', ')']);
    let parts = trimmed
        .split(',')
        .map(|part| part.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    (parts.len() == expected).then_some(parts)
}

/// Raw, transport-level request fields before validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFields<'a> {
    pub ocr_type: Option<&'a str>,
    pub method: Option<&'a str>,
    pub render: bool,
    pub ocr_box: Option<&'a str>,
    pub ocr_color: Option<&'a str>,
}

/// Fully parsed OCR request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrRequest {
    pub ocr_type: OcrType,
    pub method: Method,
    pub render: bool,
    /// Caller-chosen location for the render artifact.
    pub render_target: Option<PathBuf>,
    pub ocr_box: Option<OcrBox>,
    pub ocr_color: Option<OcrColor>,
}

impl OcrRequest {
    /// Parses transport fields and checks cross-field constraints.
    ///
    /// Blank optional strings are treated as absent.
    pub fn parse(fields: RequestFields<'_>) -> OcrResult<Self> {
        let request = OcrRequest {
            ocr_type: non_blank(fields.ocr_type)
                .map(str::parse)
                .transpose()?
                .unwrap_or_default(),
            method: non_blank(fields.method)
                .map(str::parse)
                .transpose()?
                .unwrap_or_default(),
            render: fields.render,
            render_target: None,
            ocr_box: non_blank(fields.ocr_box).map(str::parse).transpose()?,
            ocr_color: non_blank(fields.ocr_color).map(str::parse).transpose()?,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> OcrResult<()> {
        if self.render && self.ocr_type != OcrType::Format {
            return Err(OcrError::RequestInvalid(
                "render option is only available for the `format` ocr type".into(),
            ));
        }
        Ok(())
    }

    pub fn with_render_target(mut self, path: impl Into<PathBuf>) -> Self {
        self.render_target = Some(path.into());
        self
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
