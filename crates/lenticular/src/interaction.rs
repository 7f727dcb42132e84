//! Pan / zoom capture for the editing viewport.
//!
//! The controller owns the image panel's position and scale and publishes
//! the resulting [`DisplayTransform`] on a `watch` channel. Subscribers only
//! see a change when the transform actually moved: pan compares as
//! truncated integers, scale within float tolerance.

use crate::config::{InteractionLimits, ViewportGeometry};
use crate::data::types::DisplayTransform;
use glam::Vec2;
use tokio::sync::watch;

/// Host-agnostic input, already converted to viewport-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down(Vec2),
    Drag(Vec2),
    Up,
    /// Wheel delta; positive zooms in.
    Scroll(f32),
    /// Back to the load-time position and zoom.
    Reset,
}

#[derive(Debug)]
pub struct InteractionController {
    limits: InteractionLimits,
    /// Panel x at which the published pan is zero.
    offset: f32,
    initial: Vec2,
    position: Vec2,
    scale: f32,
    /// Image size at zoom 1, in viewport units.
    display: Vec2,
    max_move: Vec2,
    /// Panel and pointer positions at pointer-down.
    grab: Option<(Vec2, Vec2)>,
    tx: watch::Sender<DisplayTransform>,
}

impl InteractionController {
    pub fn new(
        limits: InteractionLimits,
        viewport: &ViewportGeometry,
        image_w: u32,
        image_h: u32,
        initial_scale: f32,
    ) -> Self {
        let (tx, _) = watch::channel(DisplayTransform::default());
        let initial = Vec2::new(viewport.canvas_offset_x, 0.0);

        let mut ctl = Self {
            limits,
            offset: viewport.canvas_offset_x,
            initial,
            position: initial,
            scale: 1.0,
            display: Vec2::ZERO,
            max_move: Vec2::ZERO,
            grab: None,
            tx,
        };

        ctl.bind_image(image_w, image_h, initial_scale);
        ctl
    }

    /// Re-targets the controller at a newly loaded image and resets the view.
    pub fn bind_image(&mut self, image_w: u32, image_h: u32, initial_scale: f32) {
        self.display = Vec2::new(image_w as f32, image_h as f32) * initial_scale;
        self.max_move = Vec2::new(
            self.limits
                .max_move_x
                .min(self.display.x / 2.0 - self.limits.edge_margin),
            self.limits
                .max_move_y
                .min(self.display.y / 2.0 - self.limits.edge_margin),
        );
        self.grab = None;

        log::debug!(
            "interaction bound: display {}x{}, max move {:?}",
            self.display.x,
            self.display.y,
            self.max_move
        );
        self.reset();
    }

    /// A new receiver; it starts out seeing the current transform as seen.
    pub fn subscribe(&self) -> watch::Receiver<DisplayTransform> {
        self.tx.subscribe()
    }

    pub fn transform(&self) -> DisplayTransform {
        DisplayTransform {
            pan_x: (self.position.x - self.offset) as i32,
            pan_y: self.position.y as i32,
            scale: self.scale,
        }
    }

    pub fn handle_event(&mut self, event: PointerEvent) {
        match event {
            PointerEvent::Down(at) => self.grab = Some((self.position, at)),
            PointerEvent::Drag(at) => self.handle_drag(at),
            PointerEvent::Up => self.grab = None,
            PointerEvent::Scroll(delta) => self.handle_scroll(delta),
            PointerEvent::Reset => self.reset(),
        }
    }

    /// Sets pan and zoom directly (scripted hosts, batch runs).
    pub fn set_transform(&mut self, t: DisplayTransform) {
        self.position = Vec2::new(t.pan_x as f32 + self.offset, t.pan_y as f32);
        self.scale = t.scale.clamp(self.limits.min_scale, self.limits.max_scale);
        self.publish();
    }

    fn reset(&mut self) {
        self.position = self.initial;
        self.scale = 1.0;
        self.publish();
    }

    fn handle_scroll(&mut self, delta: f32) {
        if delta == 0.0 {
            return;
        }

        self.scale = (self.scale + delta * self.limits.zoom_speed)
            .clamp(self.limits.min_scale, self.limits.max_scale);
        self.publish();
    }

    fn handle_drag(&mut self, at: Vec2) {
        let Some((panel, pointer)) = self.grab else {
            return;
        };

        // The image may leave the viewport by at most `max_move` past its
        // own half extent.
        let reach = self.display * self.scale / 2.0 + self.max_move;
        let target = panel + (at - pointer);
        self.position = target.clamp(self.initial - reach, self.initial + reach);
        self.publish();
    }

    fn publish(&self) {
        let next = self.transform();
        let changed = self.tx.send_if_modified(|current| {
            let changed = !current.approx_eq(&next);
            *current = next;
            changed
        });

        if changed {
            log::trace!("display transform -> {:?}", next);
        }
    }
}
