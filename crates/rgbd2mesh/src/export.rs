//! Mesh and metadata writers.

use glam::Vec3;
use lenticular::controls::ResolvedControl;
use lenticular::data::{CropPlacement, DisplayTransform, FrameRect, MeshSize, ResolutionTier};
use lenticular::{GridMesh, Pipeline};
use serde::Serialize;
use std::io::{self, Write};

/// Writes the deformed grid as a Wavefront OBJ with UVs.
pub fn write_obj<W: Write>(mut w: W, mesh: &GridMesh, positions: &[Vec3]) -> io::Result<()> {
    if positions.len() != mesh.vertex_count() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} positions for {} mesh vertices",
                positions.len(),
                mesh.vertex_count()
            ),
        ));
    }

    writeln!(w, "# rgbd2mesh {}x{} grid", mesh.size.cols, mesh.size.rows)?;
    for p in positions {
        writeln!(w, "v {} {} {}", p.x, p.y, p.z)?;
    }
    for uv in &mesh.uvs {
        writeln!(w, "vt {} {}", uv.x, uv.y)?;
    }

    // OBJ indices are 1-based; position and UV share the index.
    for tri in mesh.indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] + 1, tri[1] + 1, tri[2] + 1];
        writeln!(w, "f {a}/{a} {b}/{b} {c}/{c}")?;
    }

    w.flush()
}

#[derive(Debug, Serialize)]
pub struct DepthRange {
    pub min: f32,
    pub max: f32,
    /// Nearest sampled depth, the zero point of the mesh.
    pub sampled_min: f32,
}

/// Per-image JSON written next to the mesh.
#[derive(Debug, Serialize)]
pub struct Summary {
    pub source: String,
    pub frame: Option<FrameRect>,
    pub initial_scale: Option<f32>,
    pub tier: ResolutionTier,
    pub mesh: MeshSize,
    pub vertices: usize,
    pub triangles: usize,
    pub transform: DisplayTransform,
    pub placement: Option<CropPlacement>,
    pub depth: Option<DepthRange>,
    pub controls: Vec<ResolvedControl>,
}

impl Summary {
    pub fn collect(source: &str, pipeline: &Pipeline) -> Self {
        let depth = pipeline.source().map(|img| DepthRange {
            min: img.depth.min_depth(),
            max: img.depth.max_depth,
            sampled_min: pipeline.z_min(),
        });
        let mesh = pipeline.mesh();

        Self {
            source: source.to_string(),
            frame: pipeline.frame(),
            initial_scale: pipeline.initial_scale(),
            tier: pipeline.tier(),
            mesh: mesh.size,
            vertices: mesh.vertex_count(),
            triangles: mesh.triangle_count(),
            transform: pipeline.transform(),
            placement: pipeline.placement(),
            depth,
            controls: pipeline.controls().resolved(),
        }
    }
}
