//! RGB-D to lenticular mesh pipeline.
//!
//! Turns one side-by-side color + depth image into a grid mesh whose
//! vertices are displaced by compressed depth, and keeps that mesh in sync
//! with interactive pan / zoom and the five depth controls.

pub mod compress;
pub mod config;
pub mod controls;
pub mod data;
pub mod error;
pub mod interaction;
pub mod mesh;
pub mod pipeline;

pub use compress::{CompressionParams, DepthCompressor, FieldOfView, FixedFov};
pub use config::PipelineConfig;
pub use controls::{Control, ControlInput, ControlPanel, ControlValueCodec, Correction};
pub use data::{DisplayTransform, FrameRect, MeshSize, ResolutionTier};
pub use interaction::{InteractionController, PointerEvent};
pub use mesh::{GridMesh, MeshVertex};
pub use pipeline::{FrameEvent, Pipeline};
