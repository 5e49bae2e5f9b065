// ============================================================
// Layer 4 — Image Preprocessing
// ============================================================
// Every face image goes through the same steps before it
// reaches the network:
//
//   decode → RGB8 → resize to 112×112 (only if needed)
//          → optional horizontal mirror
//          → (x / 255 - 0.5) / 0.5  per channel   ∈ [-1, 1]
//          → CHW float layout
//
// Aligned datasets are already 112×112, so the resize branch
// is normally skipped.

use anyhow::{Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use std::path::Path;

pub const IMAGE_SIZE: usize = 112;
pub const CHANNELS:   usize = 3;

/// Values per preprocessed image.
pub const IMAGE_NUMEL: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;

const MEAN: f32 = 0.5;
const STD:  f32 = 0.5;

pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let img = image::open(path)
        .with_context(|| format!("Cannot decode image '{}'", path.display()))?
        .to_rgb8();
    let size = IMAGE_SIZE as u32;
    if img.width() == size && img.height() == size {
        Ok(img)
    } else {
        Ok(imageops::resize(&img, size, size, FilterType::Triangle))
    }
}

pub fn mirror(img: &RgbImage) -> RgbImage {
    imageops::flip_horizontal(img)
}

/// Normalised CHW floats of a 112×112 RGB image.
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let plane = w * h;
    let mut out = vec![0.0f32; CHANNELS * plane];
    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = y as usize * w + x as usize;
        for c in 0..CHANNELS {
            out[c * plane + offset] = (pixel[c] as f32 / 255.0 - MEAN) / STD;
        }
    }
    out
}
