//! The per-frame driver tying crop, sampling, mesh and compression together.
//!
//! A host calls [`Pipeline::tick`] once per rendered frame. Each tick:
//!
//! 1. picks up a new [`DisplayTransform`] if the interaction side published one,
//! 2. spawns a one-shot crop task for the newest transform,
//! 3. runs the local task pool until it stalls,
//! 4. consumes a finished crop (only after its completion signal fired),
//!    rebuilding the mesh and resampling depth as needed,
//! 5. recomputes vertex positions, at most once.
//!
//! Stages that cannot run yet keep their dirty flag and retry next tick.

use crate::compress::{DepthCompressor, FieldOfView};
use crate::config::PipelineConfig;
use crate::controls::{Control, ControlInput, ControlPanel, Correction};
use crate::data::crop::{CropOutput, ViewportCropper};
use crate::data::sampler::sample_depth;
use crate::data::types::{
    initial_scale, CropPlacement, DisplayTransform, FrameRect, MeshSize, ResolutionTier, ZValues,
};
use crate::error::{Dependency, Stall};
use crate::mesh::{GridMesh, MeshVertex};
use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use glam::Vec3;
use rgbde::{ColorPlane, RgbdImage};
use std::sync::Arc;
use tokio::sync::watch;

/// What changed during a tick, for the rendering and UI collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// Topology replaced; re-upload indices and UVs.
    MeshRebuilt { cols: u32, rows: u32 },
    /// New cropped texture.
    TextureUpdated,
    /// New vertex positions.
    VerticesUpdated,
    /// Validation moved a control value.
    ControlCorrected(Correction),
}

#[derive(Debug, Default, Clone, Copy)]
struct Dirty {
    crop: bool,
    resample: bool,
    vertices: bool,
}

struct LoadedImage {
    source: Arc<RgbdImage>,
    frame: FrameRect,
    initial_scale: f32,
}

pub struct Pipeline {
    config: PipelineConfig,
    cropper: ViewportCropper,
    compressor: DepthCompressor,
    controls: ControlPanel,
    tier: ResolutionTier,

    transforms: watch::Receiver<DisplayTransform>,
    transform: DisplayTransform,

    image: Option<LoadedImage>,
    pool: LocalPool,
    in_flight: Option<oneshot::Receiver<CropOutput>>,
    crop: Option<CropOutput>,

    mesh: GridMesh,
    z: Option<ZValues>,
    z_min: f32,
    positions: Vec<Vec3>,

    dirty: Dirty,
    queued: Vec<FrameEvent>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, mut transforms: watch::Receiver<DisplayTransform>) -> Self {
        let transform = *transforms.borrow_and_update();

        Self {
            cropper: ViewportCropper::new(config.viewport),
            compressor: DepthCompressor::new(config.perspective),
            controls: ControlPanel::new(&config.controls),
            tier: config.mesh.tier,
            config,
            transforms,
            transform,
            image: None,
            pool: LocalPool::new(),
            in_flight: None,
            crop: None,
            mesh: GridMesh::default(),
            z: None,
            z_min: 0.0,
            positions: Vec::new(),
            dirty: Dirty::default(),
            queued: Vec::new(),
        }
    }

    /// Injects the display's field of view for perspective correction.
    pub fn with_fov<P>(mut self, provider: P) -> Self
    where
        P: FieldOfView + Send + Sync + 'static,
    {
        self.compressor.set_fov(provider);
        self
    }

    /// Replaces the current image. Everything derived from the old one is
    /// dropped; the next tick crops the new one.
    pub fn load_image(&mut self, image: RgbdImage) {
        let (w, h) = (image.width(), image.height());
        let frame = FrameRect::for_image(w, h);
        let scale = initial_scale(w, h, self.config.viewport.width, self.config.viewport.height);

        log::info!(
            "Loaded {}x{} image (frame {}x{}, initial scale {:.4}, max depth {:.3})",
            w,
            h,
            frame.width,
            frame.height,
            scale,
            image.depth.max_depth
        );
        if image.depth.is_flat_zero() {
            log::warn!("Image carries no depth; the mesh will stay flat");
        }

        self.image = Some(LoadedImage {
            source: Arc::new(image),
            frame,
            initial_scale: scale,
        });
        self.in_flight = None;
        self.crop = None;
        self.z = None;
        self.dirty.crop = true;
    }

    pub fn set_resolution_tier(&mut self, tier: ResolutionTier) {
        if tier == self.tier {
            return;
        }

        log::info!("Resolution tier {} -> {}", self.tier, tier);
        self.tier = tier;
        self.dirty.resample = true;
    }

    /// Applies one control change. Corrections are returned and also
    /// reported as [`FrameEvent::ControlCorrected`] on the next tick.
    pub fn set_control(&mut self, control: Control, input: ControlInput) -> Vec<Correction> {
        let corrections = self.controls.set(control, input);

        self.queued
            .extend(corrections.iter().copied().map(FrameEvent::ControlCorrected));
        self.dirty.vertices = true;
        corrections
    }

    /// Advances the pipeline by one frame.
    pub fn tick(&mut self) -> Vec<FrameEvent> {
        let mut events = std::mem::take(&mut self.queued);

        // 1. Newest published transform.
        self.poll_transform();

        // 2-3. Crop task.
        if self.dirty.crop {
            match self.spawn_crop() {
                Ok(()) => self.dirty.crop = false,
                Err(stall) => log::debug!("crop deferred: {}", stall),
            }
        }
        self.pool.run_until_stalled();

        // 4. Completed crop, mesh and depth samples.
        self.collect_crop(&mut events);
        if self.dirty.resample {
            match self.resample(&mut events) {
                Ok(()) => self.dirty.resample = false,
                Err(stall) => log::debug!("resample deferred: {}", stall),
            }
        }

        // 5. Vertices.
        if self.dirty.vertices {
            match self.update_vertices() {
                Ok(()) => {
                    self.dirty.vertices = false;
                    events.push(FrameEvent::VerticesUpdated);
                }
                Err(stall) => log::debug!("vertex update deferred: {}", stall),
            }
        }

        events
    }

    /// True when nothing is pending or in flight.
    pub fn is_settled(&self) -> bool {
        let Dirty {
            crop,
            resample,
            vertices,
        } = self.dirty;
        !(crop || resample || vertices) && self.in_flight.is_none()
    }

    fn poll_transform(&mut self) {
        match self.transforms.has_changed() {
            Ok(true) => {
                let next = *self.transforms.borrow_and_update();
                if !next.approx_eq(&self.transform) {
                    self.transform = next;
                    self.dirty.crop = true;
                }
            }
            Ok(false) => {}
            // Publisher gone: keep the last transform.
            Err(_) => {}
        }
    }

    fn spawn_crop(&mut self) -> Result<(), Stall> {
        let loaded = self
            .image
            .as_ref()
            .ok_or(Stall::MissingDependency(Dependency::Image))?;

        let (tx, rx) = oneshot::channel();
        let source = Arc::clone(&loaded.source);
        let cropper = self.cropper.clone();
        let (transform, frame, init) = (self.transform, loaded.frame, loaded.initial_scale);

        let task = async move {
            let out = cropper.crop(&source.color, transform, frame, init);
            // The receiver is gone when a newer crop superseded this one.
            let _ = tx.send(out);
        };

        if let Err(err) = self.pool.spawner().spawn_local(task) {
            log::warn!("crop task could not be spawned: {}", err);
            return Err(Stall::MissingDependency(Dependency::CropPlacement));
        }

        self.in_flight = Some(rx);
        Ok(())
    }

    fn collect_crop(&mut self, events: &mut Vec<FrameEvent>) {
        let Some(rx) = self.in_flight.as_mut() else {
            return;
        };

        match rx.try_recv() {
            Ok(Some(out)) => {
                self.in_flight = None;
                log::debug!(
                    "crop done for {:?}: placement {:?}",
                    out.transform,
                    out.placement
                );
                self.crop = Some(out);
                self.dirty.resample = true;
                events.push(FrameEvent::TextureUpdated);
            }
            Ok(None) => {}
            // The pool dropped the task without running it.
            Err(oneshot::Canceled) => {
                log::warn!("crop task dropped before completing; retrying");
                self.in_flight = None;
                self.dirty.crop = true;
            }
        }
    }

    fn resample(&mut self, events: &mut Vec<FrameEvent>) -> Result<(), Stall> {
        let loaded = self
            .image
            .as_ref()
            .ok_or(Stall::MissingDependency(Dependency::Image))?;
        let crop = self
            .crop
            .as_ref()
            .ok_or(Stall::MissingDependency(Dependency::CropPlacement))?;

        let size = MeshSize::fit(loaded.frame, self.tier);
        if size.is_empty() {
            return Err(Stall::DegenerateGeometry {
                width: size.cols as i64,
                height: size.rows as i64,
            });
        }

        if self.mesh.size != size || self.mesh.is_empty() {
            self.mesh = GridMesh::build(size, self.config.mesh.object_size);
            self.z = None;
            self.positions.clear();

            log::info!(
                "Mesh rebuilt: {}x{} cells, {} vertices, {} triangles",
                size.cols,
                size.rows,
                self.mesh.vertex_count(),
                self.mesh.triangle_count()
            );
            events.push(FrameEvent::MeshRebuilt {
                cols: size.cols,
                rows: size.rows,
            });
        }

        let z = sample_depth(
            &loaded.source.depth,
            crop.placement.as_ref(),
            size,
            loaded.frame,
            crop.transform.scale,
        )?;

        self.z_min = z.min();
        self.z = Some(z);
        self.dirty.vertices = true;
        Ok(())
    }

    fn update_vertices(&mut self) -> Result<(), Stall> {
        if self.mesh.is_empty() {
            return Err(Stall::MissingDependency(Dependency::Mesh));
        }
        let z = self
            .z
            .as_ref()
            .ok_or(Stall::MissingDependency(Dependency::DepthSamples))?;
        let crop = self
            .crop
            .as_ref()
            .ok_or(Stall::MissingDependency(Dependency::CropPlacement))?;

        self.compressor.apply(
            &self.mesh,
            z,
            self.z_min,
            crop.transform.scale,
            &self.controls.params(),
            &mut self.positions,
        )
    }

    // --- Accessors for the rendering / UI collaborators ---

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn controls(&self) -> &ControlPanel {
        &self.controls
    }

    pub fn tier(&self) -> ResolutionTier {
        self.tier
    }

    /// Last transform picked up from the interaction side.
    pub fn transform(&self) -> DisplayTransform {
        self.transform
    }

    pub fn frame(&self) -> Option<FrameRect> {
        self.image.as_ref().map(|i| i.frame)
    }

    pub fn initial_scale(&self) -> Option<f32> {
        self.image.as_ref().map(|i| i.initial_scale)
    }

    pub fn source(&self) -> Option<&RgbdImage> {
        self.image.as_ref().map(|i| i.source.as_ref())
    }

    pub fn cropped(&self) -> Option<&ColorPlane> {
        self.crop.as_ref().map(|c| &c.frame)
    }

    pub fn placement(&self) -> Option<CropPlacement> {
        self.crop.as_ref().and_then(|c| c.placement)
    }

    pub fn mesh(&self) -> &GridMesh {
        &self.mesh
    }

    pub fn z_values(&self) -> Option<&ZValues> {
        self.z.as_ref()
    }

    pub fn z_min(&self) -> f32 {
        self.z_min
    }

    /// Deformed positions, one per mesh vertex once the first update ran.
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn vertices(&self) -> Vec<MeshVertex> {
        self.mesh.interleave(&self.positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::InteractionController;
    use rgbde::DepthMatrix;

    fn image(w: u32, h: u32, depth: f32) -> RgbdImage {
        let color = ColorPlane {
            width: w,
            height: h,
            pixels: vec![[200, 100, 50, 255]; (w * h) as usize],
        };
        RgbdImage::from_parts(color, DepthMatrix::filled(w, h, depth)).unwrap()
    }

    fn setup(w: u32, h: u32) -> (Pipeline, InteractionController) {
        let config = PipelineConfig::default();
        let scale = initial_scale(w, h, config.viewport.width, config.viewport.height);
        let ctl = InteractionController::new(config.interaction, &config.viewport, w, h, scale);
        let mut pipeline = Pipeline::new(config, ctl.subscribe());
        pipeline.load_image(image(w, h, 3.0));
        (pipeline, ctl)
    }

    fn count(events: &[FrameEvent], wanted: &FrameEvent) -> usize {
        events.iter().filter(|e| *e == wanted).count()
    }

    #[test]
    fn idle_pipeline_does_nothing() {
        let (tx, rx) = watch::channel(DisplayTransform::default());
        let mut pipeline = Pipeline::new(PipelineConfig::default(), rx);

        assert!(pipeline.tick().is_empty());
        tx.send_replace(DisplayTransform { pan_x: 5, ..Default::default() });
        assert!(pipeline.tick().is_empty());
        assert!(pipeline.positions().is_empty());
    }

    #[test]
    fn first_tick_runs_every_stage_once() {
        let (mut pipeline, _ctl) = setup(90, 160);
        let events = pipeline.tick();

        assert_eq!(
            events,
            vec![
                FrameEvent::TextureUpdated,
                FrameEvent::MeshRebuilt { cols: 90, rows: 160 },
                FrameEvent::VerticesUpdated,
            ]
        );
        assert_eq!(pipeline.positions().len(), pipeline.mesh().vertex_count());
        assert!(pipeline.is_settled());
        assert!(pipeline.tick().is_empty());
    }

    #[test]
    fn vertices_update_at_most_once_per_tick() {
        let (mut pipeline, _ctl) = setup(90, 160);
        pipeline.tick();

        for k in 0..5 {
            pipeline.set_control(Control::Magnification, ControlInput::Direct(1.0 + k as f32));
        }
        let events = pipeline.tick();
        assert_eq!(count(&events, &FrameEvent::VerticesUpdated), 1);
        assert!(pipeline.tick().is_empty());
    }

    #[test]
    fn control_change_before_image_is_retried() {
        let (tx, rx) = watch::channel(DisplayTransform::default());
        let mut pipeline = Pipeline::new(PipelineConfig::default(), rx);

        pipeline.set_control(Control::CropDistance, ControlInput::Direct(100.0));
        assert!(pipeline.tick().is_empty());
        assert!(!pipeline.is_settled());

        pipeline.load_image(image(90, 160, 1.0));
        let events = pipeline.tick();
        assert_eq!(count(&events, &FrameEvent::VerticesUpdated), 1);
        drop(tx);
    }

    #[test]
    fn corrections_are_returned_and_reported() {
        let (mut pipeline, _ctl) = setup(90, 160);
        pipeline.tick();

        let corrections = pipeline.set_control(Control::CompressNear, ControlInput::Direct(9.0));
        assert!(!corrections.is_empty());

        let events = pipeline.tick();
        for c in corrections {
            assert_eq!(count(&events, &FrameEvent::ControlCorrected(c)), 1);
        }
    }

    #[test]
    fn transform_change_recrops_with_newest_value() {
        let (mut pipeline, mut ctl) = setup(90, 160);
        pipeline.tick();

        ctl.set_transform(DisplayTransform { pan_x: 40, pan_y: 0, scale: 1.0 });
        ctl.set_transform(DisplayTransform { pan_x: 80, pan_y: 0, scale: 2.0 });
        let events = pipeline.tick();

        assert_eq!(count(&events, &FrameEvent::TextureUpdated), 1);
        assert_eq!(count(&events, &FrameEvent::MeshRebuilt { cols: 90, rows: 160 }), 0);
        assert_eq!(pipeline.transform(), DisplayTransform { pan_x: 80, pan_y: 0, scale: 2.0 });

        // Same transform again: nothing to do.
        ctl.set_transform(DisplayTransform { pan_x: 80, pan_y: 0, scale: 2.0 });
        assert!(pipeline.tick().is_empty());
    }

    #[test]
    fn tier_change_rebuilds_and_resamples() {
        let (mut pipeline, _ctl) = setup(405, 720);
        let first = pipeline.tick();
        assert!(first.contains(&FrameEvent::MeshRebuilt { cols: 360, rows: 640 }));

        pipeline.set_resolution_tier(ResolutionTier::Medium);
        let events = pipeline.tick();
        assert_eq!(
            events,
            vec![
                FrameEvent::MeshRebuilt { cols: 405, rows: 720 },
                FrameEvent::VerticesUpdated,
            ]
        );
        assert_eq!(pipeline.z_values().map(|z| z.len()), Some(406 * 721));

        // High caps at the frame size: same mesh, nothing rebuilt.
        pipeline.set_resolution_tier(ResolutionTier::High);
        assert_eq!(pipeline.tick(), vec![FrameEvent::VerticesUpdated]);
    }

    #[test]
    fn reload_with_new_frame_rebuilds_mesh() {
        let (mut pipeline, _ctl) = setup(90, 160);
        pipeline.tick();

        pipeline.load_image(image(45, 80, 2.0));
        let events = pipeline.tick();
        assert_eq!(
            events,
            vec![
                FrameEvent::TextureUpdated,
                FrameEvent::MeshRebuilt { cols: 45, rows: 80 },
                FrameEvent::VerticesUpdated,
            ]
        );

        let vertices = pipeline.mesh().vertex_count();
        assert_eq!(vertices, 46 * 81);
        assert_eq!(pipeline.z_values().map(|z| z.len()), Some(vertices));
        assert_eq!(pipeline.positions().len(), vertices);
        assert_eq!(pipeline.z_min(), 2.0);
    }

    #[test]
    fn dropped_crop_task_is_retried() {
        let (mut pipeline, _ctl) = setup(90, 160);
        pipeline.tick();

        let (tx, rx) = oneshot::channel::<CropOutput>();
        drop(tx);
        pipeline.in_flight = Some(rx);

        assert!(pipeline.tick().is_empty());
        assert!(!pipeline.is_settled());
        assert_eq!(
            pipeline.tick(),
            vec![FrameEvent::TextureUpdated, FrameEvent::VerticesUpdated]
        );
        assert!(pipeline.is_settled());
    }

    #[test]
    fn off_screen_pan_keeps_everything_far() {
        let (mut pipeline, mut ctl) = setup(90, 160);
        pipeline.tick();

        // Past the drag limit on purpose; programmatic hosts are not clamped.
        ctl.set_transform(DisplayTransform { pan_x: 5000, pan_y: 0, scale: 1.0 });
        pipeline.tick();

        assert_eq!(pipeline.placement(), None);
        let z = pipeline.z_values().unwrap();
        assert!(z.values.iter().all(|&v| v == 3.0));
        assert!(pipeline.positions().iter().all(|p| p.z == 0.0));
    }
}
