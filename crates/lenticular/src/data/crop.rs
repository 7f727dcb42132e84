//! Crops the visible part of the source image into the fixed output frame.
//!
//! All rectangle math happens in frame-centred coordinates (origin at the
//! frame centre, y up, units = source pixels at zoom 1). The image sits at
//! `pan / initial_scale` with half extents `size / 2 * scale`.
//!
//! The crop runs in two steps. First the image is cut down to the outer
//! safety frame (a margin around the output frame) in source pixels and
//! point-resampled to display scale. Then the part overlapping the output
//! frame is pasted into a transparent buffer. The resulting
//! [`CropPlacement`] is the only description of that mapping the depth
//! sampler gets, so the texture and its depth always agree pixel for pixel.

use crate::config::ViewportGeometry;
use crate::data::types::{CropPlacement, DisplayTransform, FrameRect};
use glam::Vec2;
use rayon::prelude::*;
use rgbde::{ColorPlane, Rgba8};

/// Result of one crop cycle.
#[derive(Debug, Clone)]
pub struct CropOutput {
    /// Always exactly `FrameRect` sized; transparent outside the placement.
    pub frame: ColorPlane,
    /// `None` when nothing of the image is visible.
    pub placement: Option<CropPlacement>,
    /// The transform this crop was computed for.
    pub transform: DisplayTransform,
}

/// Axis-aligned rectangle, y up: `lt` is the top-left, `rb` the bottom-right corner.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    lt: Vec2,
    rb: Vec2,
}

impl Rect {
    fn centered(center: Vec2, half: Vec2) -> Self {
        Self {
            lt: Vec2::new(center.x - half.x, center.y + half.y),
            rb: Vec2::new(center.x + half.x, center.y - half.y),
        }
    }

    /// Strict overlap; rectangles that only touch do not overlap.
    fn overlaps(&self, other: &Rect) -> bool {
        self.rb.y < other.lt.y
            && self.rb.x > other.lt.x
            && self.lt.x < other.rb.x
            && self.lt.y > other.rb.y
    }

    fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            lt: Vec2::new(self.lt.x.max(other.lt.x), self.lt.y.min(other.lt.y)),
            rb: Vec2::new(self.rb.x.min(other.rb.x), self.rb.y.max(other.rb.y)),
        }
    }
}

#[inline(always)]
fn round_px(v: f32) -> i32 {
    v.round() as i32
}

/// Nearest-neighbour source index for destination index `k` when
/// stretching `src_len` samples over `dst_len`.
#[inline(always)]
fn point_sample(k: i32, src_len: i32, dst_len: i32) -> i32 {
    let s = ((k as f32 + 0.5) * src_len as f32 / dst_len as f32) as i32;
    s.clamp(0, src_len - 1)
}

/// Everything needed to fill the output buffer for one crop.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CropPlan {
    placement: CropPlacement,
    /// Outer crop in source pixels: x, y, w, h.
    src: (i32, i32, i32, i32),
    /// Size of the outer crop after resampling to display scale.
    scaled: (i32, i32),
    /// Offset of the visible block inside the resampled outer crop.
    scaled_origin: (i32, i32),
}

#[derive(Debug, Clone)]
pub struct ViewportCropper {
    viewport: ViewportGeometry,
}

impl ViewportCropper {
    pub fn new(viewport: ViewportGeometry) -> Self {
        Self { viewport }
    }

    /// Computes where the source lands in the frame without touching pixels.
    pub fn place(
        &self,
        src_w: u32,
        src_h: u32,
        transform: DisplayTransform,
        frame: FrameRect,
        initial_scale: f32,
    ) -> Option<CropPlacement> {
        self.plan(src_w, src_h, transform, frame, initial_scale)
            .map(|plan| plan.placement)
    }

    /// Crops, resamples and pastes the visible region of `source`.
    pub fn crop(
        &self,
        source: &ColorPlane,
        transform: DisplayTransform,
        frame: FrameRect,
        initial_scale: f32,
    ) -> CropOutput {
        let mut out = ColorPlane::transparent(frame.width, frame.height);
        let plan = self.plan(source.width, source.height, transform, frame, initial_scale);

        if let Some(plan) = plan.as_ref() {
            blit(source, plan, &mut out);
        }

        CropOutput {
            frame: out,
            placement: plan.map(|p| p.placement),
            transform,
        }
    }

    fn plan(
        &self,
        src_w: u32,
        src_h: u32,
        transform: DisplayTransform,
        frame: FrameRect,
        initial_scale: f32,
    ) -> Option<CropPlan> {
        let s = transform.scale;
        if !(s > 0.0 && s.is_finite() && initial_scale > 0.0 && initial_scale.is_finite()) {
            log::debug!("crop skipped: scale {} / initial scale {}", s, initial_scale);
            return None;
        }
        if src_w == 0 || src_h == 0 || frame.is_empty() {
            return None;
        }

        let (fw, fh) = (frame.width as f32, frame.height as f32);
        let (w, h) = (src_w as f32, src_h as f32);

        // 1. Frame, outer frame and image rectangles.
        let frame_half = Vec2::new(fw / 2.0, fh / 2.0);
        let frame_rect = Rect::centered(Vec2::ZERO, frame_half);

        let outer_half = Vec2::new(
            self.viewport.outer_width / 2.0 / initial_scale,
            self.viewport.outer_height / 2.0 / initial_scale,
        )
        .max(frame_half);
        let outer_rect = Rect::centered(Vec2::ZERO, outer_half);

        let center = Vec2::new(
            transform.pan_x as f32 / initial_scale,
            transform.pan_y as f32 / initial_scale,
        );
        let image_rect = Rect::centered(center, Vec2::new(w / 2.0 * s, h / 2.0 * s));

        if !image_rect.overlaps(&frame_rect) {
            return None;
        }

        // 2. Outer crop, in source pixels.
        let crop_frame = image_rect.intersect(&outer_rect);
        let (wi, hi) = (src_w as i32, src_h as i32);

        let src_x = round_px((crop_frame.lt.x - image_rect.lt.x) / s).clamp(0, wi - 1);
        let src_y = round_px((crop_frame.rb.y - image_rect.rb.y) / s).clamp(0, hi - 1);
        let src_cw = round_px((crop_frame.rb.x - crop_frame.lt.x) / s).clamp(1, wi - src_x);
        let src_ch = round_px((crop_frame.lt.y - crop_frame.rb.y) / s).clamp(1, hi - src_y);

        let scaled_w = round_px(src_cw as f32 * s).max(1);
        let scaled_h = round_px(src_ch as f32 * s).max(1);

        // 3. Part of the outer crop that is inside the frame.
        let visible = crop_frame.intersect(&frame_rect);

        let lbx = round_px(visible.lt.x - crop_frame.lt.x).clamp(0, scaled_w - 1);
        let lby = round_px(visible.rb.y - crop_frame.rb.y).clamp(0, scaled_h - 1);
        let mut cw = round_px(visible.rb.x - visible.lt.x).clamp(1, scaled_w - lbx);
        let mut ch = round_px(visible.lt.y - visible.rb.y).clamp(1, scaled_h - lby);

        let paste_x = round_px(visible.lt.x + fw / 2.0).clamp(0, frame.width as i32);
        let paste_y = round_px(visible.rb.y + fh / 2.0).clamp(0, frame.height as i32);

        cw = cw.min(frame.width as i32 - paste_x);
        ch = ch.min(frame.height as i32 - paste_y);

        if cw <= 0 || ch <= 0 {
            log::debug!("crop skipped: visible block is {}x{}", cw, ch);
            return None;
        }

        Some(CropPlan {
            placement: CropPlacement {
                src_origin_x: lbx + round_px(crop_frame.lt.x - image_rect.lt.x),
                src_origin_y: lby + round_px(crop_frame.rb.y - image_rect.rb.y),
                paste_x,
                paste_y,
                width: cw,
                height: ch,
            },
            src: (src_x, src_y, src_cw, src_ch),
            scaled: (scaled_w, scaled_h),
            scaled_origin: (lbx, lby),
        })
    }
}

/// Point-samples the visible block straight from the source into `out`.
fn blit(source: &ColorPlane, plan: &CropPlan, out: &mut ColorPlane) {
    let p = plan.placement;
    let (src_x, src_y, src_w, src_h) = plan.src;
    let (scaled_w, scaled_h) = plan.scaled;
    let (lbx, lby) = plan.scaled_origin;

    let sw = source.width as usize;
    let fw = out.width as usize;
    if fw == 0 {
        return;
    }

    // Column lookup is shared by every row.
    let columns: Vec<usize> = (0..p.width)
        .map(|ox| (src_x + point_sample(lbx + ox, src_w, scaled_w)) as usize)
        .collect();

    out.pixels
        .par_chunks_mut(fw)
        .enumerate()
        .skip(p.paste_y as usize)
        .take(p.height as usize)
        .for_each(|(y, row)| {
            let oy = y as i32 - p.paste_y;
            let sy = (src_y + point_sample(lby + oy, src_h, scaled_h)) as usize;
            let src_row: &[Rgba8] = &source.pixels[sy * sw..(sy + 1) * sw];

            let dst = &mut row[p.paste_x as usize..(p.paste_x + p.width) as usize];
            for (px, &sx) in dst.iter_mut().zip(&columns) {
                *px = src_row[sx];
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rgbde::TRANSPARENT;

    /// Each pixel encodes its own coordinates so resampling can be checked.
    fn coord_plane(w: u32, h: u32) -> ColorPlane {
        let mut pixels = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                pixels.push([x as u8, y as u8, (x >> 8) as u8 | ((y >> 8) << 4) as u8, 255]);
            }
        }
        ColorPlane { width: w, height: h, pixels }
    }

    fn cropper() -> ViewportCropper {
        ViewportCropper::new(ViewportGeometry::default())
    }

    #[test]
    fn identity_transform_covers_a_nine_by_sixteen_frame() {
        let src = coord_plane(72, 128);
        let frame = FrameRect::for_image(72, 128);
        let init = 360.0 / 72.0; // fits 72 wide into 360

        let out = cropper().crop(&src, DisplayTransform::default(), frame, init);

        assert_eq!(
            out.placement,
            Some(CropPlacement {
                src_origin_x: 0,
                src_origin_y: 0,
                paste_x: 0,
                paste_y: 0,
                width: 72,
                height: 128,
            })
        );
        assert_eq!(out.frame, src);
    }

    #[test]
    fn zoom_doubles_pixels_around_the_centre() {
        let src = coord_plane(72, 128);
        let frame = FrameRect::for_image(72, 128);
        let t = DisplayTransform { pan_x: 0, pan_y: 0, scale: 2.0 };

        let out = cropper().crop(&src, t, frame, 5.0);
        let p = out.placement.unwrap();

        assert_eq!((p.paste_x, p.paste_y, p.width, p.height), (0, 0, 72, 128));
        // The frame shows the middle half of the source, each texel twice.
        assert_eq!(out.frame.get(0, 0), src.get(18, 32));
        assert_eq!(out.frame.get(1, 0), src.get(18, 32));
        assert_eq!(out.frame.get(2, 2), src.get(19, 33));
        assert_eq!(out.frame.get(71, 127), src.get(53, 95));
    }

    #[test]
    fn panned_image_leaves_transparent_border() {
        let src = coord_plane(72, 128);
        let frame = FrameRect::for_image(72, 128);
        // 100 viewport units right = 20 frame pixels at initial scale 5.
        let t = DisplayTransform { pan_x: 100, pan_y: 0, scale: 1.0 };

        let out = cropper().crop(&src, t, frame, 5.0);
        let p = out.placement.unwrap();

        assert_eq!((p.paste_x, p.width), (20, 52));
        assert_eq!(out.frame.get(0, 10), TRANSPARENT);
        assert_eq!(out.frame.get(19, 10), TRANSPARENT);
        assert_eq!(out.frame.get(20, 10), src.get(0, 10));
        assert_eq!(out.frame.get(71, 10), src.get(51, 10));
    }

    #[test]
    fn off_screen_image_yields_empty_frame() {
        let src = coord_plane(72, 128);
        let frame = FrameRect::for_image(72, 128);
        let t = DisplayTransform { pan_x: 10_000, pan_y: 0, scale: 1.0 };

        let out = cropper().crop(&src, t, frame, 5.0);

        assert!(out.placement.is_none());
        assert_eq!((out.frame.width, out.frame.height), (72, 128));
        assert!(out.frame.pixels.iter().all(|&px| px == TRANSPARENT));
    }

    #[test]
    fn degenerate_scales_short_circuit() {
        let frame = FrameRect::for_image(72, 128);
        for scale in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let t = DisplayTransform { scale, ..Default::default() };
            assert!(cropper().place(72, 128, t, frame, 5.0).is_none());
        }
        assert!(cropper().place(72, 128, DisplayTransform::default(), frame, 0.0).is_none());
    }

    #[test]
    fn output_always_matches_frame_and_placement_stays_inside() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let src = coord_plane(90, 120);
        let frame = FrameRect::for_image(90, 120);
        let init = 640.0 / 160.0;

        for _ in 0..300 {
            let t = DisplayTransform {
                pan_x: rng.gen_range(-600..=600),
                pan_y: rng.gen_range(-900..=900),
                scale: rng.gen_range(0.05f32..15.0),
            };

            let out = cropper().crop(&src, t, frame, init);
            assert_eq!((out.frame.width, out.frame.height), (frame.width, frame.height));
            assert_eq!(out.frame.pixels.len(), frame.pixel_count());

            if let Some(p) = out.placement {
                assert!(p.width > 0 && p.height > 0);
                assert!(p.paste_x >= 0 && p.paste_y >= 0);
                assert!(p.paste_x + p.width <= frame.width as i32, "{t:?} -> {p:?}");
                assert!(p.paste_y + p.height <= frame.height as i32, "{t:?} -> {p:?}");
                assert!(p.src_origin_x >= 0 && p.src_origin_y >= 0);
            } else {
                assert!(out.frame.pixels.iter().all(|&px| px == TRANSPARENT));
            }
        }
    }
}
