//! Reasons a pipeline stage declined to run.
//!
//! None of these cross the pipeline boundary: a stalled stage logs the
//! reason, keeps its pending flag and is retried on the next tick.

use thiserror::Error;

/// Something a stage needs that has not been produced yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Image,
    Mesh,
    DepthSamples,
    CropPlacement,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Dependency::Image => "source image",
            Dependency::Mesh => "grid mesh",
            Dependency::DepthSamples => "depth samples",
            Dependency::CropPlacement => "crop placement",
        };

        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Stall {
    #[error("{0} not ready")]
    MissingDependency(Dependency),

    #[error("{samples} depth samples for {vertices} mesh vertices")]
    StaleDepthSamples { samples: usize, vertices: usize },

    #[error("degenerate geometry ({width}x{height})")]
    DegenerateGeometry { width: i64, height: i64 },
}
