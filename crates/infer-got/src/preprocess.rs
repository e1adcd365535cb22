use anyhow::{Result, ensure};
use candle_core::{DType, Device, Tensor};
use image::{
    RgbImage,
    imageops::{self, FilterType},
};

pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Picks the `(cols, rows)` grid whose aspect ratio is closest to the
/// image's. Ties go to the larger grid when the image covers more than half
/// of it.
pub fn select_grid(
    width: u32,
    height: u32,
    min_tiles: u32,
    max_tiles: u32,
    tile_size: u32,
) -> (u32, u32) {
    let aspect_ratio = width as f64 / height.max(1) as f64;
    let area = width as f64 * height as f64;

    let mut candidates: Vec<(u32, u32)> = (1..=max_tiles)
        .flat_map(|cols| (1..=max_tiles).map(move |rows| (cols, rows)))
        .filter(|(cols, rows)| (min_tiles..=max_tiles).contains(&(cols * rows)))
        .collect();
    candidates.sort_by_key(|&(cols, rows)| (cols * rows, cols, rows));

    let mut best = (1, 1);
    let mut best_diff = f64::MAX;
    for (cols, rows) in candidates {
        let diff = (aspect_ratio - cols as f64 / rows as f64).abs();
        if diff < best_diff {
            best_diff = diff;
            best = (cols, rows);
        } else if diff == best_diff
            && area > 0.5 * (tile_size as f64).powi(2) * (cols * rows) as f64
        {
            best = (cols, rows);
        }
    }
    best
}

/// Splits `image` into `tile_size`² tiles in row-major order, appending a
/// whole-image thumbnail when more than one tile is produced.
pub fn dynamic_preprocess(
    image: &RgbImage,
    min_tiles: u32,
    max_tiles: u32,
    tile_size: u32,
    use_thumbnail: bool,
) -> Vec<RgbImage> {
    let (cols, rows) = select_grid(image.width(), image.height(), min_tiles, max_tiles, tile_size);
    let resized = imageops::resize(
        image,
        tile_size * cols,
        tile_size * rows,
        FilterType::CatmullRom,
    );

    let mut tiles: Vec<RgbImage> = (0..cols * rows)
        .map(|idx| {
            let x = (idx % cols) * tile_size;
            let y = (idx / cols) * tile_size;
            imageops::crop_imm(&resized, x, y, tile_size, tile_size).to_image()
        })
        .collect();

    if use_thumbnail && tiles.len() > 1 {
        tiles.push(imageops::resize(image, tile_size, tile_size, FilterType::CatmullRom));
    }
    tiles
}

/// Resizes to `size`² and normalizes with the CLIP statistics, giving
/// `(n, 3, size, size)`.
pub fn images_to_tensor(
    images: &[RgbImage],
    size: u32,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    ensure!(!images.is_empty(), "no images to encode");
    let side = size as usize;
    let plane = side * side;
    let mut data = vec![0f32; images.len() * 3 * plane];

    for (index, image) in images.iter().enumerate() {
        let resized;
        let pixels = if image.width() == size && image.height() == size {
            image
        } else {
            resized = imageops::resize(image, size, size, FilterType::CatmullRom);
            &resized
        };
        let base = index * 3 * plane;
        for (offset, pixel) in pixels.pixels().enumerate() {
            for channel in 0..3 {
                let value = pixel.0[channel] as f32 / 255.0;
                data[base + channel * plane + offset] =
                    (value - CLIP_MEAN[channel]) / CLIP_STD[channel];
            }
        }
    }

    let tensor = Tensor::from_vec(data, (images.len(), 3, side, side), device)?;
    Ok(tensor.to_dtype(dtype)?)
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn square_image_uses_single_tile() {
        assert_eq!(select_grid(800, 800, 1, 6, 1024), (1, 1));
        let tiles = dynamic_preprocess(&RgbImage::new(48, 48), 1, 6, 64, true);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].dimensions(), (64, 64));
    }

    #[test]
    fn equal_ratio_ties_prefer_larger_grid_for_large_images() {
        assert_eq!(select_grid(800, 800, 1, 6, 64), (2, 2));
        let tiles = dynamic_preprocess(&RgbImage::new(800, 800), 1, 6, 64, true);
        assert_eq!(tiles.len(), 5);
        assert!(tiles.iter().all(|tile| tile.dimensions() == (64, 64)));
    }

    #[test]
    fn wide_image_gets_horizontal_grid_plus_thumbnail() {
        assert_eq!(select_grid(3000, 1000, 1, 6, 1024), (3, 1));
        let tiles = dynamic_preprocess(&RgbImage::new(300, 100), 1, 6, 32, true);
        assert_eq!(tiles.len(), 4);
        assert!(tiles.iter().all(|tile| tile.dimensions() == (32, 32)));
    }

    #[test]
    fn tall_image_gets_vertical_grid() {
        assert_eq!(select_grid(1000, 2000, 1, 6, 1024), (1, 2));
    }

    #[test]
    fn tiles_are_row_major() {
        let mut image = RgbImage::new(64, 32);
        for (x, _, pixel) in image.enumerate_pixels_mut() {
            *pixel = if x < 32 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) };
        }
        let tiles = dynamic_preprocess(&image, 1, 6, 32, false);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].get_pixel(16, 16).0[0], 255);
        assert_eq!(tiles[1].get_pixel(16, 16).0[2], 255);
    }

    #[test]
    fn tensor_is_normalized_channel_first() {
        let image = RgbImage::from_pixel(4, 4, Rgb([255, 0, 128]));
        let tensor = images_to_tensor(&[image], 4, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 4, 4]);
        let values = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let red = (1.0 - CLIP_MEAN[0]) / CLIP_STD[0];
        let green = (0.0 - CLIP_MEAN[1]) / CLIP_STD[1];
        assert!((values[0] - red).abs() < 1e-5);
        assert!((values[16] - green).abs() < 1e-5);
    }
}
