use std::path::PathBuf;

use base64::Engine;
use image::{DynamicImage, RgbImage};
use tracing::debug;

use crate::error::{OcrError, OcrResult};

/// Owned 8-bit RGB raster handed to the model.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: RgbImage,
}

impl DecodedImage {
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self {
            pixels: image.to_rgb8(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }
}

/// Image payload as received by a transport.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Upload(Vec<u8>),
    Base64(String),
    Path(PathBuf),
}

impl ImageSource {
    /// Picks the single supplied input among an uploaded file and a base64
    /// string. Empty values count as absent.
    pub fn from_inputs(upload: Option<Vec<u8>>, base64: Option<String>) -> OcrResult<Self> {
        let upload = upload.filter(|bytes| !bytes.is_empty());
        let base64 = base64.filter(|text| !text.trim().is_empty());
        Self::check_inputs(upload.is_some(), base64.is_some())?;
        match (upload, base64) {
            (Some(bytes), _) => Ok(ImageSource::Upload(bytes)),
            (None, Some(text)) => Ok(ImageSource::Base64(text)),
            (None, None) => Err(OcrError::InputMissing),
        }
    }

    /// Presence check on its own, for transports that can tell whether an
    /// input was sent before reading it.
    pub fn check_inputs(has_upload: bool, has_base64: bool) -> OcrResult<()> {
        match (has_upload, has_base64) {
            (true, true) => Err(OcrError::RequestInvalid(
                "provide either an image file or base64 data, not both".into(),
            )),
            (false, false) => Err(OcrError::InputMissing),
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::Upload(_) => "upload",
            ImageSource::Base64(_) => "base64",
            ImageSource::Path(_) => "path",
        }
    }
}

/// Decodes any supported source into an RGB image.
pub fn normalize(source: ImageSource) -> OcrResult<DecodedImage> {
    let kind = source.kind();
    let image = match source {
        ImageSource::Upload(bytes) => decode_bytes(&bytes)?,
        ImageSource::Base64(text) => {
            let bytes = decode_base64(&text)?;
            decode_bytes(&bytes)?
        }
        ImageSource::Path(path) => image::open(&path).map_err(|err| {
            OcrError::InputInvalid(format!("failed to open image at {}: {err}", path.display()))
        })?,
    };
    let decoded = DecodedImage::from_dynamic(image);
    debug!(
        source = kind,
        width = decoded.width(),
        height = decoded.height(),
        "Decoded input image"
    );
    Ok(decoded)
}

fn decode_bytes(bytes: &[u8]) -> OcrResult<DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|err| OcrError::InputInvalid(format!("failed to decode image: {err}")))
}

/// Accepts plain base64 or a `data:<mime>;base64,` URL; whitespace is ignored.
fn decode_base64(text: &str) -> OcrResult<Vec<u8>> {
    let payload = match text.trim().strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .filter(|(meta, _)| meta.ends_with(";base64"))
            .map(|(_, data)| data)
            .ok_or_else(|| {
                OcrError::InputInvalid("data URL must be base64 encoded".into())
            })?,
        None => text,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| OcrError::InputInvalid(format!("invalid base64 image data: {err}")))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{GrayAlphaImage, GrayImage, ImageFormat, Luma, LumaA, Rgb, Rgba, RgbaImage};

    use super::*;

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 128]));
        encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
    }

    #[test]
    fn upload_is_converted_to_rgb() {
        let decoded = normalize(ImageSource::Upload(png_bytes())).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        assert_eq!(decoded.as_rgb().get_pixel(0, 0).0, [10, 20, 30]);
    }

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn every_color_model_becomes_rgb_of_same_size() {
        let cases = [
            (
                DynamicImage::ImageLuma8(GrayImage::from_pixel(5, 7, Luma([77]))),
                ImageFormat::Png,
                Some([77, 77, 77]),
            ),
            (
                DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(5, 7, LumaA([90, 10]))),
                ImageFormat::Png,
                Some([90, 90, 90]),
            ),
            (
                DynamicImage::ImageRgb8(RgbImage::from_pixel(5, 7, Rgb([1, 2, 3]))),
                ImageFormat::Png,
                Some([1, 2, 3]),
            ),
            (
                DynamicImage::ImageRgba8(RgbaImage::from_pixel(5, 7, Rgba([40, 50, 60, 0]))),
                ImageFormat::Png,
                Some([40, 50, 60]),
            ),
            // GIF is palette based; quantization may shift the exact color.
            (
                DynamicImage::ImageRgba8(RgbaImage::from_pixel(5, 7, Rgba([255, 0, 0, 255]))),
                ImageFormat::Gif,
                None,
            ),
        ];

        for (image, format, pixel) in cases {
            let color = image.color();
            let decoded = normalize(ImageSource::Upload(encode(image, format))).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (5, 7), "{color:?} as {format:?}");
            if let Some(expected) = pixel {
                assert_eq!(decoded.as_rgb().get_pixel(4, 6).0, expected, "{color:?}");
            }
        }
    }

    #[test]
    fn base64_and_data_urls_decode() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes());
        let plain = normalize(ImageSource::Base64(encoded.clone())).unwrap();
        assert_eq!(plain.width(), 4);

        let url = format!("data:image/png;base64,{encoded}");
        let from_url = normalize(ImageSource::Base64(url)).unwrap();
        assert_eq!(from_url.height(), 3);

        let wrapped = format!("{}\n{}", &encoded[..8], &encoded[8..]);
        assert!(normalize(ImageSource::Base64(wrapped)).is_ok());
    }

    #[test]
    fn garbage_is_invalid_input() {
        let err = normalize(ImageSource::Base64("not base64!!".into())).unwrap_err();
        assert!(matches!(err, OcrError::InputInvalid(_)));

        let encoded = base64::engine::general_purpose::STANDARD.encode(b"plain text");
        let err = normalize(ImageSource::Base64(encoded)).unwrap_err();
        assert!(matches!(err, OcrError::InputInvalid(_)));

        let err = normalize(ImageSource::Path("/definitely/not/here.png".into())).unwrap_err();
        assert!(matches!(err, OcrError::InputInvalid(_)));
    }

    #[test]
    fn presence_is_checked_without_payloads() {
        assert!(ImageSource::check_inputs(true, false).is_ok());
        assert!(ImageSource::check_inputs(false, true).is_ok());
        assert!(matches!(
            ImageSource::check_inputs(false, false),
            Err(OcrError::InputMissing)
        ));
        assert!(matches!(
            ImageSource::check_inputs(true, true),
            Err(OcrError::RequestInvalid(ref msg)) if msg.contains("not both")
        ));
    }

    #[test]
    fn exactly_one_input_is_accepted() {
        assert!(matches!(
            ImageSource::from_inputs(None, None),
            Err(OcrError::InputMissing)
        ));
        assert!(matches!(
            ImageSource::from_inputs(Some(Vec::new()), Some("   ".into())),
            Err(OcrError::InputMissing)
        ));
        assert!(matches!(
            ImageSource::from_inputs(Some(vec![1]), Some("abc".into())),
            Err(OcrError::RequestInvalid(_))
        ));
        assert!(matches!(
            ImageSource::from_inputs(Some(vec![1]), None),
            Ok(ImageSource::Upload(_))
        ));
        assert!(matches!(
            ImageSource::from_inputs(None, Some("abc".into())),
            Ok(ImageSource::Base64(_))
        ));
    }
}
