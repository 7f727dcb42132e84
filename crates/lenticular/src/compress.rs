//! Per-vertex depth compression and perspective correction.
//!
//! Raw depth is normalised to the nearest visible point, scaled by the
//! current zoom, clipped at the crop distance and magnified. The result is
//! remapped through three bands:
//!
//! ```text
//!   z <= near        : unchanged
//!   near < z < far   : near + (z - near) / (far - near) * span
//!   z >= far         : max(near, z - far + span + near)
//! ```
//!
//! The mid band squeezes `[near, far)` into `span`; the far band continues
//! with slope 1 from where the mid band ends, so the curve is continuous.

use crate::config::{ControlDefaults, PerspectiveConfig};
use crate::controls::{Control, Correction};
use crate::data::types::ZValues;
use crate::error::{Dependency, Stall};
use crate::mesh::GridMesh;
use glam::{Vec2, Vec3};
use rayon::prelude::*;
use serde::Serialize;

/// Minimum gap between the near and far bounds.
pub const BAND_EPSILON: f32 = 0.1;
pub const SPAN_MIN: f32 = 0.1;
pub const SPAN_MAX: f32 = 20.0;

/// Raw depth units per world unit before magnification.
const DEPTH_DIVISOR: f32 = 2.5;

const MIN_FOV_DEG: f32 = 5.0;
const MAX_FOV_DEG: f32 = 120.0;

/// Validated snapshot of the five compression controls.
///
/// Only obtainable through [`CompressionParams::from_values`], so every
/// instance satisfies `far >= near + ε` and `span <= far - near`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompressionParams {
    magnification: f32,
    crop_distance: f32,
    compress_near: f32,
    compress_far: f32,
    compress_span: f32,
}

impl Default for CompressionParams {
    fn default() -> Self {
        Self::from_defaults(&ControlDefaults::default()).0
    }
}

impl CompressionParams {
    /// Validates candidate values given in [`Control::ALL`] order.
    ///
    /// Every value is clamped to its control range, then `far` is pushed
    /// above `near` and `span` is squeezed below `far - near`. Each value
    /// that moved is reported as a [`Correction`].
    pub fn from_values(candidate: [f32; 5]) -> (Self, Vec<Correction>) {
        let mut v = candidate;
        for (value, control) in v.iter_mut().zip(Control::ALL) {
            let (lo, hi) = control.value_range();
            *value = if value.is_finite() { value.clamp(lo, hi) } else { lo };
        }

        let [magnification, crop_distance, near, mut far, mut span] = v;

        if far < near + BAND_EPSILON {
            far = near + BAND_EPSILON;
        }

        let allowed = (far - near - BAND_EPSILON).min(SPAN_MAX).max(SPAN_MIN);
        span = span.min(allowed).min(far - near);

        let params = Self {
            magnification,
            crop_distance,
            compress_near: near,
            compress_far: far,
            compress_span: span,
        };

        let corrections = Control::ALL
            .into_iter()
            .zip(candidate)
            .filter(|&(control, requested)| params.get(control) != requested)
            .map(|(control, _)| {
                let value = params.get(control);
                log::debug!("{} corrected to {}", control, value);
                Correction::new(control, value)
            })
            .collect();

        (params, corrections)
    }

    /// Startup values; a missing span is derived from the band width.
    pub fn from_defaults(defaults: &ControlDefaults) -> (Self, Vec<Correction>) {
        let span = defaults.compress_span.unwrap_or_else(|| {
            (defaults.compress_far - defaults.compress_near).clamp(SPAN_MIN, SPAN_MAX)
        });

        Self::from_values([
            defaults.magnification,
            defaults.crop_distance,
            defaults.compress_near,
            defaults.compress_far,
            span,
        ])
    }

    pub fn get(&self, control: Control) -> f32 {
        match control {
            Control::Magnification => self.magnification,
            Control::CropDistance => self.crop_distance,
            Control::CompressNear => self.compress_near,
            Control::CompressFar => self.compress_far,
            Control::CompressSpan => self.compress_span,
        }
    }

    /// All five values in [`Control::ALL`] order.
    pub fn values(&self) -> [f32; 5] {
        Control::ALL.map(|c| self.get(c))
    }

    pub fn magnification(&self) -> f32 {
        self.magnification
    }

    pub fn crop_distance(&self) -> f32 {
        self.crop_distance
    }

    pub fn compress_near(&self) -> f32 {
        self.compress_near
    }

    pub fn compress_far(&self) -> f32 {
        self.compress_far
    }

    pub fn compress_span(&self) -> f32 {
        self.compress_span
    }

    /// Maps one raw depth sample to its compressed z.
    #[inline]
    pub fn compress(&self, raw: f32, z_min: f32, displayed_scale: f32) -> f32 {
        let clipped = ((raw - z_min) * displayed_scale).min(self.crop_distance);
        let z = clipped / DEPTH_DIVISOR * self.magnification;

        let (near, far, span) = (self.compress_near, self.compress_far, self.compress_span);
        if z > near && z < far {
            near + (z - near) / (far - near) * span
        } else if z >= far {
            near.max(z - far + span + near)
        } else {
            z
        }
    }
}

/// Source of the display's vertical field of view, in degrees.
pub trait FieldOfView {
    /// `None` when the display has not reported one (yet).
    fn vertical_fov_deg(&self) -> Option<f32>;
}

/// A fixed, known field of view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedFov(pub f32);

impl FieldOfView for FixedFov {
    fn vertical_fov_deg(&self) -> Option<f32> {
        Some(self.0)
    }
}

impl<F> FieldOfView for F
where
    F: Fn() -> Option<f32>,
{
    fn vertical_fov_deg(&self) -> Option<f32> {
        self()
    }
}

/// Turns flat grid vertices plus depth samples into displaced positions.
pub struct DepthCompressor {
    perspective: PerspectiveConfig,
    fov: Option<Box<dyn FieldOfView + Send + Sync>>,
}

impl std::fmt::Debug for DepthCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthCompressor")
            .field("perspective", &self.perspective)
            .field("fov", &self.fov.as_ref().map(|p| p.vertical_fov_deg()))
            .finish()
    }
}

impl DepthCompressor {
    pub fn new(perspective: PerspectiveConfig) -> Self {
        Self {
            perspective,
            fov: None,
        }
    }

    pub fn with_fov<P>(mut self, provider: P) -> Self
    where
        P: FieldOfView + Send + Sync + 'static,
    {
        self.set_fov(provider);
        self
    }

    pub fn set_fov<P>(&mut self, provider: P)
    where
        P: FieldOfView + Send + Sync + 'static,
    {
        self.fov = Some(Box::new(provider));
    }

    /// Provider value if enabled and sane, else the fallback; always clamped.
    pub fn vertical_fov_deg(&self) -> f32 {
        let reported = if self.perspective.use_display_fov {
            self.fov.as_ref().and_then(|p| p.vertical_fov_deg())
        } else {
            None
        };

        reported
            .filter(|v| v.is_finite())
            .unwrap_or(self.perspective.fallback_vertical_fov_deg)
            .clamp(MIN_FOV_DEG, MAX_FOV_DEG)
    }

    /// Writes one displaced position per mesh vertex into `out`.
    pub fn apply(
        &self,
        mesh: &GridMesh,
        z: &ZValues,
        z_min: f32,
        displayed_scale: f32,
        params: &CompressionParams,
        out: &mut Vec<Vec3>,
    ) -> Result<(), Stall> {
        if mesh.is_empty() {
            return Err(Stall::MissingDependency(Dependency::Mesh));
        }
        if z.len() != mesh.vertex_count() {
            return Err(Stall::StaleDepthSamples {
                samples: z.len(),
                vertices: mesh.vertex_count(),
            });
        }

        let tan_v = (self.vertical_fov_deg().to_radians() * 0.5).tan();
        let aspect = mesh.size.cols.max(1) as f32 / mesh.size.rows.max(1) as f32;
        let tan = Vec2::new(tan_v * aspect, tan_v);
        let strength = self.perspective.strength;

        mesh.base
            .par_iter()
            .zip(mesh.normalized.par_iter())
            .zip(z.values.par_iter())
            .map(|((&base, &n), &raw)| {
                let depth = params.compress(raw, z_min, displayed_scale);
                let lateral = n * tan * (depth * strength);
                base + lateral.extend(depth)
            })
            .collect_into_vec(out);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::MeshSize;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn defaults_match_startup_values() {
        let p = CompressionParams::default();
        assert_eq!(p.magnification(), 1.0);
        assert_eq!(p.crop_distance(), 50.0);
        assert_eq!(p.compress_near(), 0.1);
        assert_eq!(p.compress_far(), 4.0);
        // far - near = 3.9 is pulled in by the band epsilon.
        assert!(close(p.compress_span(), 3.8));
    }

    #[test]
    fn three_bands() {
        let p = CompressionParams::default();

        // Near band passes through.
        assert_eq!(p.compress(0.0, 0.0, 1.0), 0.0);
        assert!(close(p.compress(0.25, 0.0, 1.0), 0.1));
        // Mid band squeezes [0.1, 4) into the span.
        assert!(close(p.compress(5.0, 0.0, 1.0), 0.1 + 1.9 / 3.9 * p.compress_span()));
        // Far band continues with slope 1.
        assert!(close(p.compress(20.0, 0.0, 1.0), 8.0 - 4.0 + p.compress_span() + 0.1));
        // Crop distance clips before magnification.
        assert!(close(p.compress(1000.0, 0.0, 1.0), 20.0 - 4.0 + p.compress_span() + 0.1));
    }

    #[test]
    fn curve_is_continuous_at_far() {
        let (p, _) = CompressionParams::from_values([1.0, 50.0, 0.5, 3.0, 1.0]);
        let at_far = p.compress(3.0 * DEPTH_DIVISOR, 0.0, 1.0);
        let below = p.compress(3.0 * DEPTH_DIVISOR - 1e-3, 0.0, 1.0);
        assert!(close(at_far, 1.5));
        assert!((at_far - below).abs() < 1e-2);
    }

    #[test]
    fn zoom_and_minimum_normalise_depth() {
        let (p, _) = CompressionParams::from_values([1.0, 10_000.0, 0.0, 10_000.0, 20.0]);
        // Everything below far collapses into the mid band; check ordering only.
        let a = p.compress(10.0, 10.0, 3.0);
        let b = p.compress(11.0, 10.0, 3.0);
        let c = p.compress(11.0, 10.0, 1.0);
        assert_eq!(a, 0.0);
        assert!(b > c && c > 0.0);
    }

    #[test]
    fn far_below_near_is_corrected() {
        let (p, corrections) = CompressionParams::from_values([1.0, 50.0, 5.0, 1.0, 3.0]);

        assert!(close(p.compress_far(), 5.1));
        assert!(p.compress_span() <= p.compress_far() - p.compress_near());
        assert!(corrections.iter().any(|c| c.control == Control::CompressFar));
        assert!(corrections.iter().any(|c| c.control == Control::CompressSpan));
        assert!(!corrections.iter().any(|c| c.control == Control::CompressNear));
    }

    #[test]
    fn valid_values_produce_no_corrections() {
        let (_, corrections) = CompressionParams::from_values([2.0, 100.0, 0.5, 10.0, 5.0]);
        assert!(corrections.is_empty());
    }

    #[test]
    fn invariants_hold_for_adversarial_inputs() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..2000 {
            let candidate = [(); 5].map(|_| match rng.gen_range(0..8) {
                0 => f32::NAN,
                1 => -rng.gen_range(0.0f32..1e5),
                _ => rng.gen_range(0.0f32..2e4),
            });

            let (p, _) = CompressionParams::from_values(candidate);
            assert!(p.compress_far() >= p.compress_near(), "{candidate:?} -> {p:?}");
            assert!(
                p.compress_span() <= p.compress_far() - p.compress_near(),
                "{candidate:?} -> {p:?}"
            );
            for control in Control::ALL {
                assert!(p.get(control).is_finite());
            }
        }
    }

    #[test]
    fn fov_provider_is_clamped_and_falls_back() {
        let cfg = PerspectiveConfig::default();

        assert_eq!(DepthCompressor::new(cfg).vertical_fov_deg(), 18.0);
        assert_eq!(DepthCompressor::new(cfg).with_fov(FixedFov(40.0)).vertical_fov_deg(), 40.0);
        assert_eq!(DepthCompressor::new(cfg).with_fov(FixedFov(500.0)).vertical_fov_deg(), 120.0);
        assert_eq!(DepthCompressor::new(cfg).with_fov(|| None::<f32>).vertical_fov_deg(), 18.0);
        assert_eq!(DepthCompressor::new(cfg).with_fov(|| Some(f32::NAN)).vertical_fov_deg(), 18.0);

        let ignore = PerspectiveConfig {
            use_display_fov: false,
            ..cfg
        };
        assert_eq!(DepthCompressor::new(ignore).with_fov(FixedFov(40.0)).vertical_fov_deg(), 18.0);
    }

    #[test]
    fn perspective_pushes_corners_outward() {
        let mesh = GridMesh::build(MeshSize { cols: 2, rows: 2 }, 2.0);
        let z = ZValues {
            cols: 2,
            rows: 2,
            values: vec![25.0; 9],
        };
        let params = CompressionParams::default();
        let compressor = DepthCompressor::new(PerspectiveConfig::default()).with_fov(FixedFov(90.0));

        let mut out = Vec::new();
        compressor.apply(&mesh, &z, 0.0, 1.0, &params, &mut out).unwrap();

        let depth = params.compress(25.0, 0.0, 1.0);
        assert_eq!(out.len(), 9);
        // Centre vertex only moves in z.
        assert!(close(out[4].x, 1.0) && close(out[4].y, 1.0) && close(out[4].z, depth));
        // tan(45°) = 1 and a square grid: corners shift by exactly `depth`.
        assert!(close(out[8].x, 2.0 + depth) && close(out[8].y, 2.0 + depth));
        assert!(close(out[0].x, -depth) && close(out[0].y, -depth));
    }

    #[test]
    fn zero_strength_keeps_xy() {
        let mesh = GridMesh::build(MeshSize { cols: 3, rows: 1 }, 3.0);
        let z = ZValues {
            cols: 3,
            rows: 1,
            values: vec![7.0; 8],
        };
        let cfg = PerspectiveConfig {
            strength: 0.0,
            ..Default::default()
        };

        let mut out = Vec::new();
        DepthCompressor::new(cfg)
            .apply(&mesh, &z, 0.0, 1.0, &CompressionParams::default(), &mut out)
            .unwrap();

        for (p, b) in out.iter().zip(&mesh.base) {
            assert_eq!(p.truncate(), b.truncate());
        }
    }

    #[test]
    fn mismatched_samples_stall() {
        let mesh = GridMesh::build(MeshSize { cols: 2, rows: 2 }, 2.0);
        let z = ZValues {
            cols: 1,
            rows: 1,
            values: vec![0.0; 4],
        };

        let mut out = Vec::new();
        let err = DepthCompressor::new(PerspectiveConfig::default()).apply(
            &mesh,
            &z,
            0.0,
            1.0,
            &CompressionParams::default(),
            &mut out,
        );

        assert_eq!(err, Err(Stall::StaleDepthSamples { samples: 4, vertices: 9 }));
        assert!(out.is_empty());

        let err = DepthCompressor::new(PerspectiveConfig::default()).apply(
            &GridMesh::default(),
            &z,
            0.0,
            1.0,
            &CompressionParams::default(),
            &mut out,
        );
        assert_eq!(err, Err(Stall::MissingDependency(Dependency::Mesh)));
    }
}
