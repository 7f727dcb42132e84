//! Regular triangulated grid that carries the depth-deformed image.

use crate::data::types::MeshSize;
use glam::{Vec2, Vec3};

/// Interleaved vertex record, ready for a vertex buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Flat grid in the XY plane, `+Z` facing.
///
/// Vertices are row-major, bottom row first: vertex `(x, y)` lives at
/// index `y * (cols + 1) + x`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridMesh {
    pub size: MeshSize,
    /// Edge length of one cell in world units.
    pub cell: f32,
    /// Undeformed positions (z = 0).
    pub base: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    /// Grid position mapped to `[-1, 1]` on both axes.
    pub normalized: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl GridMesh {
    /// Builds a `cols × rows` grid `object_size` units wide.
    ///
    /// A zero-sized request yields an empty mesh.
    pub fn build(size: MeshSize, object_size: f32) -> Self {
        if size.is_empty() {
            log::debug!("empty mesh requested ({}x{})", size.cols, size.rows);
            return Self {
                size,
                ..Default::default()
            };
        }

        let (cols, rows) = (size.cols, size.rows);
        let cell = object_size / cols as f32;
        let count = size.vertex_count();

        let mut base = Vec::with_capacity(count);
        let mut uvs = Vec::with_capacity(count);
        let mut normalized = Vec::with_capacity(count);

        for y in 0..=rows {
            for x in 0..=cols {
                let uv = Vec2::new(x as f32 / cols as f32, y as f32 / rows as f32);
                base.push(Vec3::new(x as f32 * cell, y as f32 * cell, 0.0));
                uvs.push(uv);
                normalized.push((uv - 0.5) * 2.0);
            }
        }

        let stride = cols + 1;
        let mut indices = Vec::with_capacity(cols as usize * rows as usize * 6);
        for y in 0..rows {
            for x in 0..cols {
                let bl = y * stride + x;
                let br = bl + 1;
                let tl = bl + stride;
                let tr = tl + 1;

                indices.extend_from_slice(&[bl, tl, tr, bl, tr, br]);
            }
        }

        Self {
            size,
            cell,
            base,
            uvs,
            normalized,
            indices,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.base.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Pairs `positions` (the deformed vertices) with the grid UVs.
    pub fn interleave(&self, positions: &[Vec3]) -> Vec<MeshVertex> {
        positions
            .iter()
            .zip(&self.uvs)
            .map(|(p, uv)| MeshVertex {
                position: p.to_array(),
                uv: uv.to_array(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_by_two_topology() {
        let mesh = GridMesh::build(MeshSize { cols: 4, rows: 2 }, 5.0);

        assert_eq!(mesh.vertex_count(), 15);
        assert_eq!(mesh.triangle_count(), 16);
        assert_eq!(mesh.indices.len(), 48);

        for tri in mesh.indices.chunks_exact(3) {
            assert!(tri.iter().all(|&i| i <= 14), "{tri:?}");
            assert!(tri[0] != tri[1] && tri[1] != tri[2] && tri[0] != tri[2], "{tri:?}");
        }
    }

    #[test]
    fn winding_is_consistent() {
        let mesh = GridMesh::build(MeshSize { cols: 3, rows: 5 }, 2.0);

        // bl -> tl -> tr is clockwise when looking down the -Z axis.
        for tri in mesh.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|k| mesh.base[tri[k] as usize]);
            assert!((b - a).cross(c - a).z < 0.0, "{tri:?}");
        }
    }

    #[test]
    fn layout_uvs_and_normalized_coordinates() {
        let mesh = GridMesh::build(MeshSize { cols: 4, rows: 2 }, 5.0);

        assert_eq!(mesh.cell, 1.25);
        assert_eq!(mesh.base[0], Vec3::ZERO);
        assert_eq!(mesh.base[14], Vec3::new(5.0, 2.5, 0.0));
        assert_eq!(mesh.uvs[7], Vec2::new(0.5, 0.5));
        assert_eq!(mesh.normalized[0], Vec2::new(-1.0, -1.0));
        assert_eq!(mesh.normalized[7], Vec2::ZERO);
        assert_eq!(mesh.normalized[14], Vec2::ONE);
    }

    #[test]
    fn high_tier_needs_wide_indices() {
        let mesh = GridMesh::build(MeshSize { cols: 360, rows: 640 }, 5.0);
        assert!(mesh.vertex_count() > u16::MAX as usize);
        assert_eq!(mesh.indices.iter().copied().max(), Some(mesh.vertex_count() as u32 - 1));
    }

    #[test]
    fn zero_sized_request_is_empty() {
        let mesh = GridMesh::build(MeshSize { cols: 0, rows: 10 }, 5.0);
        assert!(mesh.is_empty());
        assert!(mesh.indices.is_empty());
    }

    #[test]
    fn interleave_is_pod() {
        let mesh = GridMesh::build(MeshSize { cols: 1, rows: 1 }, 1.0);
        let verts = mesh.interleave(&mesh.base);
        let bytes: &[u8] = bytemuck::cast_slice(&verts);
        assert_eq!(bytes.len(), 4 * 5 * 4);
        assert_eq!(verts[3].uv, [1.0, 1.0]);
    }
}
