use std::rc::Rc;

use image::{Rgba, RgbaImage};

use crate::error::Result;
use crate::imaging::Image;
use crate::lut::{lut_for_viewport, LutProvider};
use crate::render_state::RenderState;
use crate::viewport::Viewport;

use super::composite_to_surface;

/// What the CPU path hands to the orchestrator for drawing.
#[derive(Debug)]
pub enum CpuFrame<'a> {
    /// The image's own identity-windowed surface; no LUT was applied.
    Native(Rc<RgbaImage>),
    /// The render canvas, either reused or freshly composited.
    Canvas { pixels: &'a RgbaImage, composited: bool },
}

impl CpuFrame<'_> {
    pub fn pixels(&self) -> &RgbaImage {
        match self {
            CpuFrame::Native(surface) => surface,
            CpuFrame::Canvas { pixels, .. } => pixels,
        }
    }
}

/// Render canvas and render state for one destination surface.
#[derive(Debug)]
pub struct CpuCompositor {
    canvas: RgbaImage,
    // False until a composite lands, and again whenever a render bypasses the canvas.
    canvas_valid: bool,
    state: RenderState,
}

impl Default for CpuCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuCompositor {
    pub fn new() -> Self {
        Self {
            canvas: RgbaImage::new(0, 0),
            canvas_valid: false,
            state: RenderState::new(),
        }
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    /// Produces the image-sized frame for `image` under `viewport`.
    ///
    /// Takes the native-surface fast path for an identity window, reuses the
    /// canvas when nothing changed, and otherwise composites through the LUT.
    pub fn render_canvas<P: LutProvider + ?Sized>(
        &mut self,
        image: &Image,
        viewport: &Viewport,
        provider: &P,
        invalidated: bool,
    ) -> Result<CpuFrame<'_>> {
        if viewport.is_identity_window() {
            if let Some(native) = image.native_surface() {
                self.canvas_valid = false;
                return Ok(CpuFrame::Native(native));
            }
        }

        if self.canvas_valid && !self.state.needs_render(image.id(), viewport, invalidated) {
            log::trace!("render canvas reused for {}", image.id());
            return Ok(CpuFrame::Canvas { pixels: &self.canvas, composited: false });
        }

        if self.canvas.dimensions() != (image.width(), image.height()) {
            log::debug!("render canvas reset to {}x{}", image.width(), image.height());
            self.canvas = RgbaImage::from_pixel(image.width(), image.height(), Rgba([255, 255, 255, 255]));
        }

        let lut = lut_for_viewport(image, viewport, provider);
        self.canvas_valid = false;
        composite_to_surface(image, &lut, &mut self.canvas)?;
        self.canvas_valid = true;

        Ok(CpuFrame::Canvas { pixels: &self.canvas, composited: true })
    }

    /// Marks the canvas as not reflecting the last committed render.
    pub fn invalidate_canvas(&mut self) {
        self.canvas_valid = false;
    }

    /// Records a completed render on this surface.
    pub fn commit(&mut self, image: &Image, viewport: &Viewport) {
        self.state.commit(image.id(), viewport);
    }
}
