//! Plain data shared between the pipeline stages.

use serde::{Deserialize, Serialize};

/// Pan offset and zoom of the source image inside the editing viewport.
///
/// Pan is in viewport units (the 360×640 editing box), not image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayTransform {
    pub pan_x: i32,
    pub pan_y: i32,
    pub scale: f32,
}

impl Default for DisplayTransform {
    fn default() -> Self {
        Self {
            pan_x: 0,
            pan_y: 0,
            scale: 1.0,
        }
    }
}

impl DisplayTransform {
    /// Pan compares exactly, scale within float tolerance.
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.pan_x == other.pan_x
            && self.pan_y == other.pan_y
            && approx_eq(self.scale, other.scale)
    }
}

/// Relative float comparison with an absolute floor near zero.
#[inline]
pub fn approx_eq(a: f32, b: f32) -> bool {
    (b - a).abs() < (1e-6 * a.abs().max(b.abs())).max(f32::EPSILON * 8.0)
}

/// The fixed 9:16 output frame, in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRect {
    pub width: u32,
    pub height: u32,
}

impl FrameRect {
    /// Fits a 9:16 frame around an image: tall images keep their height,
    /// wide images keep their width.
    pub fn for_image(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return Self { width: 0, height: 0 };
        }

        let aspect = width as f32 / height as f32;
        if aspect <= 9.0 / 16.0 {
            Self {
                width: (height as f32 * 9.0 / 16.0).round() as u32,
                height,
            }
        } else {
            Self {
                width,
                height: (width as f32 * 16.0 / 9.0).round() as u32,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Load-time factor that fits the image into the editing viewport.
pub fn initial_scale(width: u32, height: u32, viewport_w: f32, viewport_h: f32) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }

    (viewport_w / width as f32).min(viewport_h / height as f32)
}

/// User-selectable upper bound on mesh subdivision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionTier {
    #[default]
    Low,
    Medium,
    High,
}

impl ResolutionTier {
    /// `(cols, rows)` cap for this tier.
    pub const fn max_cells(self) -> (u32, u32) {
        match self {
            Self::Low => (360, 640),
            Self::Medium => (720, 1280),
            Self::High => (1440, 2560),
        }
    }
}

impl std::fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };

        f.write_str(s)
    }
}

impl std::str::FromStr for ResolutionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" | "360x640" => Ok(Self::Low),
            "medium" | "720x1280" => Ok(Self::Medium),
            "high" | "1440x2560" => Ok(Self::High),
            other => Err(format!("unknown resolution tier '{other}' (low|medium|high)")),
        }
    }
}

/// Mesh cell counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshSize {
    pub cols: u32,
    pub rows: u32,
}

impl MeshSize {
    /// Never denser than one cell per frame pixel, never above the tier cap.
    pub fn fit(frame: FrameRect, tier: ResolutionTier) -> Self {
        let (max_cols, max_rows) = tier.max_cells();

        Self {
            cols: frame.width.min(max_cols),
            rows: frame.height.min(max_rows),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }

    pub fn vertex_count(&self) -> usize {
        (self.cols as usize + 1) * (self.rows as usize + 1)
    }
}

/// Where the visible part of the source landed in the output frame.
///
/// `src_origin_*` is measured in display-scaled pixels from the image's
/// bottom-left corner; `paste_*` in frame pixels from the frame's
/// bottom-left corner. `width`/`height` is the pasted extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropPlacement {
    pub src_origin_x: i32,
    pub src_origin_y: i32,
    pub paste_x: i32,
    pub paste_y: i32,
    pub width: i32,
    pub height: i32,
}

/// Per-vertex raw depth samples for one mesh size.
#[derive(Debug, Clone, PartialEq)]
pub struct ZValues {
    pub cols: u32,
    pub rows: u32,
    /// Row-major over vertices, `(cols + 1) * (rows + 1)` values.
    pub values: Vec<f32>,
}

impl ZValues {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at vertex column `i`, row `j`.
    #[inline]
    pub fn at(&self, i: u32, j: u32) -> f32 {
        self.values[j as usize * (self.cols as usize + 1) + i as usize]
    }

    /// Smallest sample; the "nearest visible point".
    pub fn min(&self) -> f32 {
        self.values.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn row(&self, j: u32) -> &[f32] {
        let stride = self.cols as usize + 1;
        let start = j as usize * stride;
        &self.values[start..start + stride]
    }
}
