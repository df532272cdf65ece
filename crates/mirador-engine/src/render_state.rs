//! Per-target memory of what was last drawn, for skipping redundant composites.

use crate::imaging::ImageId;
use crate::viewport::Viewport;

/// The viewport fields that change composited pixels.
///
/// Any field that alters the output must be listed here, otherwise a change
/// to it would be served from a stale canvas. Flips and rotation are applied
/// by the element transform at draw time and are tracked only so that callers
/// comparing snapshots see the full picture.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewportSnapshot {
    pub window_width: f64,
    pub window_center: f64,
    pub invert: bool,
    pub rotation: f64,
    pub hflip: bool,
    pub vflip: bool,
}

impl From<&Viewport> for ViewportSnapshot {
    fn from(vp: &Viewport) -> Self {
        Self {
            window_width: vp.voi.window_width,
            window_center: vp.voi.window_center,
            invert: vp.invert,
            rotation: vp.rotation,
            hflip: vp.hflip,
            vflip: vp.vflip,
        }
    }
}

/// Owned by one render target. Starts empty, so the first render always composites.
#[derive(Debug, Default, Clone)]
pub struct RenderState {
    last_image: Option<ImageId>,
    last_viewport: Option<ViewportSnapshot>,
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True unless the same image was drawn with an identical snapshot and
    /// the caller has not invalidated the target.
    pub fn needs_render(&self, image: &ImageId, viewport: &Viewport, invalidated: bool) -> bool {
        if invalidated {
            return true;
        }
        let (Some(last_image), Some(last_viewport)) = (&self.last_image, &self.last_viewport) else {
            return true;
        };
        last_image != image || *last_viewport != ViewportSnapshot::from(viewport)
    }

    /// Records a completed composite. Call only after the pixels are written.
    pub fn commit(&mut self, image: &ImageId, viewport: &Viewport) {
        self.last_image = Some(image.clone());
        self.last_viewport = Some(ViewportSnapshot::from(viewport));
    }

    pub fn reset(&mut self) {
        self.last_image = None;
        self.last_viewport = None;
    }

    pub fn last_image(&self) -> Option<&ImageId> {
        self.last_image.as_ref()
    }
}
