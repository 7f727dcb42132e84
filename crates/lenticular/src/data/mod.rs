//! Image-side data handling for the lenticular pipeline.
//!
//! This module provides:
//! - The plain data types shared between stages.
//! - The viewport crop that produces the displayed texture.
//! - The depth sampler that maps the crop back onto the mesh grid.

pub mod crop;
pub mod sampler;
pub mod types;

pub use self::crop::{CropOutput, ViewportCropper};
pub use self::sampler::sample_depth;
pub use self::types::{
    initial_scale, CropPlacement, DisplayTransform, FrameRect, MeshSize, ResolutionTier, ZValues,
};
