//! Resamples the depth matrix onto the mesh vertex grid.
//!
//! The sampler never derives its own crop. It inverts the exact
//! [`CropPlacement`] the cropper produced, so a vertex always reads the
//! depth of the texel drawn underneath it.

use crate::data::types::{CropPlacement, FrameRect, MeshSize, ZValues};
use crate::error::Stall;
use rayon::prelude::*;
use rgbde::DepthMatrix;

/// Samples one depth value per mesh vertex.
///
/// Vertices outside the placement keep `max_depth` ("far away"). The last
/// row and column are always copies of their inner neighbours.
pub fn sample_depth(
    depth: &DepthMatrix,
    placement: Option<&CropPlacement>,
    mesh: MeshSize,
    frame: FrameRect,
    scale: f32,
) -> Result<ZValues, Stall> {
    if mesh.is_empty() || frame.is_empty() {
        return Err(Stall::DegenerateGeometry {
            width: mesh.cols as i64,
            height: mesh.rows as i64,
        });
    }
    if depth.width == 0 || depth.height == 0 {
        return Err(Stall::DegenerateGeometry {
            width: depth.width as i64,
            height: depth.height as i64,
        });
    }

    let (cols, rows) = (mesh.cols as usize, mesh.rows as usize);
    let stride = cols + 1;
    let mut values = vec![depth.max_depth; stride * (rows + 1)];

    if let Some(p) = placement.filter(|_| scale > 0.0 && scale.is_finite()) {
        let ms = mesh.cols as f32 / frame.width as f32;

        let col_map = axis_map(cols, ms, p.paste_x, p.width, p.src_origin_x, scale, depth.width);
        let row_map = axis_map(rows, ms, p.paste_y, p.height, p.src_origin_y, scale, depth.height);

        values
            .par_chunks_mut(stride)
            .zip(row_map.par_iter())
            .for_each(|(row, sy)| {
                let Some(sy) = *sy else { return };
                for (v, sx) in row.iter_mut().zip(&col_map) {
                    if let Some(sx) = *sx {
                        *v = depth.get(sy, sx);
                    }
                }
            });
    }

    // Edge padding: bottom-most border row, then right-most border column.
    let (inner, border) = values.split_at_mut(rows * stride);
    border.copy_from_slice(&inner[(rows - 1) * stride..]);
    for row in values.chunks_exact_mut(stride) {
        row[cols] = row[cols - 1];
    }

    Ok(ZValues {
        cols: mesh.cols,
        rows: mesh.rows,
        values,
    })
}

/// Source index for each of the `cells + 1` vertices along one axis,
/// `None` outside the placement. Both axes use the same mesh scale.
fn axis_map(
    cells: usize,
    ms: f32,
    paste: i32,
    extent: i32,
    src_origin: i32,
    scale: f32,
    src_len: u32,
) -> Vec<Option<usize>> {
    let lo = paste as f32 * ms;
    let hi = (paste + extent) as f32 * ms;
    let last = src_len as i32 - 1;

    (0..=cells)
        .map(|k| {
            let k = k as f32;
            if k < lo || k > hi {
                return None;
            }

            let offset = (k - lo).min((cells - 1) as f32);
            let src = ((offset / ms + src_origin as f32) / scale) as i32;
            Some(src.clamp(0, last) as usize)
        })
        .collect()
}
