use std::collections::HashMap;

use crate::config::RendererConfig;
use crate::coords::{ColorRgba, Rect};
use crate::cpu::{CpuCompositor, CpuFrame};
use crate::error::{RenderError, Result};
use crate::gpu::{GpuPlatform, GpuRenderer};
use crate::imaging::Image;
use crate::lut::{LinearLutProvider, LutProvider};
use crate::surface::Surface2d;
use crate::viewport::RendererKind;

use super::element::{EnabledElement, SurfaceId};

/// How a render call produced its pixels.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RenderPath {
    /// The image's identity-windowed surface, no LUT applied.
    NativeSurface,
    /// The surface's render canvas, unchanged since the last render.
    CachedCanvas,
    /// Freshly composited through the LUT.
    Composited,
    /// Tiled textures through the windowing shader.
    Gpu,
    /// GPU path without a context: a black frame.
    GpuBlank,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub path: RenderPath,
}

/// Top-level renderer: one per process (or per GPU context).
pub struct Renderer<P: GpuPlatform, L: LutProvider = LinearLutProvider> {
    lut_provider: L,
    surfaces: HashMap<SurfaceId, CpuCompositor>,
    gpu: GpuRenderer<P>,
}

impl<P: GpuPlatform> Renderer<P, LinearLutProvider> {
    pub fn new(platform: P, config: RendererConfig) -> Self {
        Self::with_lut_provider(platform, LinearLutProvider, config)
    }
}

impl<P: GpuPlatform, L: LutProvider> Renderer<P, L> {
    pub fn with_lut_provider(platform: P, lut_provider: L, config: RendererConfig) -> Self {
        Self {
            lut_provider,
            surfaces: HashMap::new(),
            gpu: GpuRenderer::new(platform, &config),
        }
    }

    pub fn gpu(&self) -> &GpuRenderer<P> {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut GpuRenderer<P> {
        &mut self.gpu
    }

    pub fn lut_provider(&self) -> &L {
        &self.lut_provider
    }

    /// Render state and canvas of one surface, if it was ever rendered.
    pub fn surface_state(&self, surface: SurfaceId) -> Option<&CpuCompositor> {
        self.surfaces.get(&surface)
    }

    /// Forgets a destination surface (its canvas and render state).
    pub fn release_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(&surface);
    }

    /// Draws `element` onto `target`.
    ///
    /// `invalidated` forces a fresh composite when the pixel data changed
    /// under an unchanged image identity.
    pub fn render(
        &mut self,
        element: &EnabledElement,
        target: &mut dyn Surface2d,
        invalidated: bool,
    ) -> Result<RenderOutcome> {
        let image = element.image.as_deref().ok_or(RenderError::MissingImage)?;
        let size = target.size();
        if !size.is_valid() {
            return Err(RenderError::InvalidTarget { width: size.width, height: size.height });
        }

        target.reset_transform();
        target.clear(ColorRgba::black());

        target.save();
        target.set_image_smoothing(!element.viewport.pixel_replication);
        let drawn = self.draw(element, image, target, invalidated);
        target.restore();
        let path = drawn?;

        self.surfaces
            .entry(element.surface)
            .or_default()
            .commit(image, &element.viewport);

        log::trace!("rendered {} on {:?} via {path:?}", image.id(), element.surface);
        Ok(RenderOutcome { path })
    }

    fn draw(
        &mut self,
        element: &EnabledElement,
        image: &Image,
        target: &mut dyn Surface2d,
        invalidated: bool,
    ) -> Result<RenderPath> {
        let viewport = &element.viewport;
        let cpu = self.surfaces.entry(element.surface).or_default();

        match viewport.renderer {
            RendererKind::Gpu => {
                let size = target.size();
                let frame = self.gpu.render(image, viewport, element.transform, size)?;
                // The canvas no longer matches what this surface shows.
                cpu.invalidate_canvas();

                // Already transformed: draw 1:1.
                let full = Rect::from_size(size);
                target.draw_image(&frame.pixels, full, full);
                Ok(if frame.blank { RenderPath::GpuBlank } else { RenderPath::Gpu })
            }
            RendererKind::Canvas => {
                target.set_transform(element.transform);
                let frame = cpu.render_canvas(image, viewport, &self.lut_provider, invalidated)?;
                let path = match &frame {
                    CpuFrame::Native(_) => RenderPath::NativeSurface,
                    CpuFrame::Canvas { composited: true, .. } => RenderPath::Composited,
                    CpuFrame::Canvas { composited: false, .. } => RenderPath::CachedCanvas,
                };

                let bounds = Rect::from_size(image.size());
                target.draw_image(frame.pixels(), bounds, bounds);
                Ok(path)
            }
        }
    }
}
