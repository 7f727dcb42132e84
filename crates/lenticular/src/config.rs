//! Pipeline configuration.
//!
//! Every section has working defaults, so an empty JSON object (or no
//! config file at all) yields the stock Looking Glass Go setup.

use crate::data::types::ResolutionTier;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mesh: MeshConfig,
    pub viewport: ViewportGeometry,
    pub perspective: PerspectiveConfig,
    pub interaction: InteractionLimits,
    pub controls: ControlDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Physical mesh width in world units.
    pub object_size: f32,
    pub tier: ResolutionTier,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            object_size: 5.0,
            tier: ResolutionTier::Low,
        }
    }
}

/// Editing viewport and the slightly larger outer crop frame around it,
/// both in viewport units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportGeometry {
    pub width: f32,
    pub height: f32,
    pub outer_width: f32,
    pub outer_height: f32,
    /// Horizontal offset of the image panel inside the editing canvas.
    pub canvas_offset_x: f32,
}

impl Default for ViewportGeometry {
    fn default() -> Self {
        Self {
            width: 360.0,
            height: 640.0,
            outer_width: 378.0,
            outer_height: 672.0,
            canvas_offset_x: 90.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerspectiveConfig {
    /// 0 disables lateral correction, 1 is full correction.
    pub strength: f32,
    /// Prefer the FOV reported by the display camera when one is injected.
    pub use_display_fov: bool,
    pub fallback_vertical_fov_deg: f32,
}

impl Default for PerspectiveConfig {
    fn default() -> Self {
        Self {
            strength: 1.0,
            use_display_fov: true,
            fallback_vertical_fov_deg: 18.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionLimits {
    pub zoom_speed: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    /// Cap on how far the image may be dragged past its own edge.
    pub max_move_x: f32,
    pub max_move_y: f32,
    /// Portion of the image that always stays grabbable.
    pub edge_margin: f32,
}

impl Default for InteractionLimits {
    fn default() -> Self {
        Self {
            zoom_speed: 0.2,
            min_scale: 1.0,
            max_scale: 15.0,
            max_move_x: 144.0,
            max_move_y: 284.0,
            edge_margin: 36.0,
        }
    }
}

/// Control values applied when a pipeline starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlDefaults {
    pub magnification: f32,
    pub crop_distance: f32,
    pub compress_near: f32,
    pub compress_far: f32,
    /// `None` derives the span from `compress_far - compress_near`.
    pub compress_span: Option<f32>,
}

impl Default for ControlDefaults {
    fn default() -> Self {
        Self {
            magnification: 1.0,
            crop_distance: 50.0,
            compress_near: 0.1,
            compress_far: 4.0,
            compress_span: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_the_default_config() {
        let cfg: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"mesh": {"tier": "high"}, "perspective": {"strength": 0.0}}"#)
                .unwrap();

        assert_eq!(cfg.mesh.tier, ResolutionTier::High);
        assert_eq!(cfg.mesh.object_size, 5.0);
        assert_eq!(cfg.perspective.strength, 0.0);
        assert_eq!(cfg.perspective.fallback_vertical_fov_deg, 18.0);
    }
}
