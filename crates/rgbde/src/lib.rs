//! RGBDE: side-by-side color + packed depth images.
//!
//! An RGBDE image is a single RGBA8 raster twice as wide as the scene:
//!
//!   columns [0, W/2)   : color (RGBA8)
//!   columns [W/2, W)   : depth, one 32-bit integer per pixel
//!
//! Depth pixel layout (per RGBA8 pixel, bytes in memory order):
//!   R : bits  0..8
//!   G : bits  8..16
//!   B : bits 16..24
//!   A : bits 24..32
//!
//! The integer is in units of 1/10000, so
//! `depth = (A·2^24 + B·2^16 + G·2^8 + R) / 10000`.
//!
//! Row order is never touched: whatever order the caller hands in
//! (top-down from an image file, bottom-up for texture space) is what the
//! color plane and depth matrix keep.

use thiserror::Error;

/// Integer depth units per depth unit.
pub const DEPTH_UNITS: f64 = 10_000.0;

/// One RGBA8 pixel.
pub type Rgba8 = [u8; 4];

/// Fully transparent black.
pub const TRANSPARENT: Rgba8 = [0, 0, 0, 0];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("image has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("side-by-side image must be at least 2 pixels wide, got {width}")]
    TooNarrow { width: u32 },

    #[error("buffer holds {actual} bytes, expected {expected} for {width}x{height} RGBA8")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("color plane is {color_w}x{color_h} but depth matrix is {depth_w}x{depth_h}")]
    Mismatch {
        color_w: u32,
        color_h: u32,
        depth_w: u32,
        depth_h: u32,
    },
}

/// Reassembles the packed 32-bit depth integer of one pixel.
#[inline(always)]
pub fn decode_raw(px: Rgba8) -> u32 {
    u32::from_le_bytes(px)
}

/// Inverse of [`decode_raw`].
#[inline(always)]
pub fn encode_raw(raw: u32) -> Rgba8 {
    raw.to_le_bytes()
}

/// Decodes one depth pixel into depth units.
#[inline]
pub fn decode_depth(px: Rgba8) -> f32 {
    (decode_raw(px) as f64 / DEPTH_UNITS) as f32
}

/// Encodes a depth value, rounding to the nearest 1/10000 and saturating
/// at the representable range.
#[inline]
pub fn encode_depth(depth: f32) -> Rgba8 {
    let units = (depth as f64 * DEPTH_UNITS).round();
    encode_raw(units.clamp(0.0, u32::MAX as f64) as u32)
}

/// A plain RGBA8 raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorPlane {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Rgba8>,
}

impl ColorPlane {
    /// A fully transparent plane.
    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![TRANSPARENT; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Rgba8 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Raw bytes, ready for a texture upload or an image encoder.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }
}

/// Decoded per-pixel depth plus its maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMatrix {
    pub width: u32,
    pub height: u32,
    /// Row-major, `width * height` values.
    pub values: Vec<f32>,
    pub max_depth: f32,
}

impl DepthMatrix {
    /// Builds a matrix from decoded values; the maximum is computed here.
    pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), width as usize * height as usize);
        let max_depth = values.iter().copied().fold(0.0f32, f32::max);

        Self {
            width,
            height,
            values,
            max_depth,
        }
    }

    /// A uniform matrix (handy for synthetic scenes).
    pub fn filled(width: u32, height: u32, depth: f32) -> Self {
        Self::from_values(width, height, vec![depth; width as usize * height as usize])
    }

    /// Decodes `width` packed pixels from each row of `pixels`, whose rows
    /// are `stride` pixels long. Requires `0 < width <= stride`.
    pub(crate) fn decode(width: u32, height: u32, stride: usize, pixels: &[Rgba8]) -> Self {
        let w = width as usize;
        debug_assert!(w > 0 && w <= stride);
        let mut values = Vec::with_capacity(w * height as usize);

        for row in pixels.chunks_exact(stride).take(height as usize) {
            values.extend(row[..w].iter().map(|&px| decode_depth(px)));
        }

        Self::from_values(width, height, values)
    }

    /// Depth at `(row, col)`. Callers clamp before indexing.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.width as usize + col]
    }

    pub fn min_depth(&self) -> f32 {
        self.values.iter().copied().fold(f32::INFINITY, f32::min)
    }

    /// True when the image carried no depth at all.
    pub fn is_flat_zero(&self) -> bool {
        self.max_depth == 0.0
    }
}

/// A loaded RGBDE image, split into its two halves.
#[derive(Debug, Clone)]
pub struct RgbdImage {
    pub color: ColorPlane,
    pub depth: DepthMatrix,
}

impl RgbdImage {
    /// Splits a side-by-side RGBA8 buffer.
    ///
    /// The color half is `width / 2` wide. The depth half is read with its
    /// own stride (`width - width / 2`) and truncated to the color width, so
    /// both halves always have identical dimensions.
    pub fn split(width: u32, height: u32, bytes: &[u8]) -> Result<Self, FormatError> {
        check_buffer(width, height, bytes)?;
        if width < 2 {
            return Err(FormatError::TooNarrow { width });
        }

        let pixels: &[Rgba8] = bytemuck::cast_slice(bytes);
        let full_w = width as usize;
        let left_w = full_w / 2;

        let mut color = Vec::with_capacity(left_w * height as usize);
        let mut right = Vec::with_capacity((full_w - left_w) * height as usize);

        for row in pixels.chunks_exact(full_w) {
            let (l, r) = row.split_at(left_w);
            color.extend_from_slice(l);
            right.extend_from_slice(r);
        }

        let depth = DepthMatrix::decode(left_w as u32, height, full_w - left_w, &right);

        Ok(Self {
            color: ColorPlane {
                width: left_w as u32,
                height,
                pixels: color,
            },
            depth,
        })
    }

    /// Pairs an already separated color plane and depth matrix.
    pub fn from_parts(color: ColorPlane, depth: DepthMatrix) -> Result<Self, FormatError> {
        if color.width != depth.width || color.height != depth.height {
            return Err(FormatError::Mismatch {
                color_w: color.width,
                color_h: color.height,
                depth_w: depth.width,
                depth_h: depth.height,
            });
        }
        if color.width == 0 || color.height == 0 {
            return Err(FormatError::Empty {
                width: color.width,
                height: color.height,
            });
        }

        Ok(Self { color, depth })
    }

    pub fn width(&self) -> u32 {
        self.color.width
    }

    pub fn height(&self) -> u32 {
        self.color.height
    }
}

/// Packs a color plane and per-pixel depth back into a side-by-side
/// RGBA8 buffer (`2 * color.width` wide).
pub fn encode_side_by_side(color: &ColorPlane, depth: &[f32]) -> Vec<u8> {
    let w = color.width as usize;
    let mut out = Vec::<Rgba8>::with_capacity(w * 2 * color.height as usize);

    for (color_row, depth_row) in color.pixels.chunks_exact(w).zip(depth.chunks_exact(w)) {
        out.extend_from_slice(color_row);
        out.extend(depth_row.iter().map(|&d| encode_depth(d)));
    }

    bytemuck::cast_slice(&out).to_vec()
}

#[inline]
fn check_buffer(width: u32, height: u32, bytes: &[u8]) -> Result<(), FormatError> {
    if width == 0 || height == 0 {
        return Err(FormatError::Empty { width, height });
    }

    let expected = width as usize * height as usize * 4;
    if bytes.len() != expected {
        return Err(FormatError::BufferSize {
            width,
            height,
            expected,
            actual: bytes.len(),
        });
    }

    Ok(())
}
