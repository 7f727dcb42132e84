//! PNG in, PNG out.
//!
//! Image files are stored top-down; the pipeline works bottom-up (row 0 is
//! the bottom row). Both directions flip here and nowhere else.

use anyhow::{Context, Result};
use image::{imageops, RgbaImage};
use rgbde::{ColorPlane, RgbdImage};
use std::path::Path;

/// Loads a side-by-side RGBDE image file.
pub fn load_rgbde(path: &Path) -> Result<RgbdImage> {
    let decoded = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgba8();

    split_top_down(&decoded).with_context(|| format!("splitting {}", path.display()))
}

/// Flips a top-down RGBA raster to bottom-up and splits it into halves.
pub fn split_top_down(img: &RgbaImage) -> Result<RgbdImage> {
    let flipped = imageops::flip_vertical(img);
    let (w, h) = flipped.dimensions();

    Ok(RgbdImage::split(w, h, flipped.as_raw())?)
}

/// Converts a bottom-up plane into a top-down image buffer.
pub fn to_top_down(plane: &ColorPlane) -> Result<RgbaImage> {
    let img = RgbaImage::from_raw(plane.width, plane.height, plane.as_bytes().to_vec())
        .context("plane size does not match its pixel buffer")?;

    Ok(imageops::flip_vertical(&img))
}

pub fn save_png(plane: &ColorPlane, path: &Path) -> Result<()> {
    to_top_down(plane)?
        .save(path)
        .with_context(|| format!("writing {}", path.display()))
}
