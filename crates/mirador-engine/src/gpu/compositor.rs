use std::collections::HashMap;

use image::RgbaImage;

use crate::coords::{Affine2, SurfaceSize};
use crate::error::{RenderError, Result};
use crate::imaging::Image;
use crate::viewport::Viewport;

use super::device::GpuDevice;
use super::shader::{ShaderVariant, UniformLayout, WindowingParams};
use super::texture_cache::ImageTexture;

/// Draws cached tile sets through the windowing shader.
///
/// Holds one resolved uniform layout per linked program; the table is empty
/// until [`GpuCompositor::link_programs`] succeeds on the current context.
#[derive(Debug, Default)]
pub struct GpuCompositor {
    programs: HashMap<ShaderVariant, UniformLayout>,
}

impl GpuCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles every shader variant on `device`.
    pub fn link_programs(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        self.programs.clear();
        for variant in ShaderVariant::ALL {
            let source = variant.source();
            let layout = UniformLayout::resolve(variant, &source)?;
            device.link_program(variant, &source, layout.span())?;
            self.programs.insert(variant, layout);
        }
        log::debug!("linked {} shader programs", self.programs.len());
        Ok(())
    }

    /// Forgets all programs (their context is gone).
    pub fn reset(&mut self) {
        self.programs.clear();
    }

    pub fn is_linked(&self, variant: ShaderVariant) -> bool {
        self.programs.contains_key(&variant)
    }

    /// Renders `texture` into a `target`-sized frame.
    ///
    /// `transform` maps image pixels to destination pixels; the frame is meant
    /// to be drawn onto the destination 1:1.
    pub fn render_to_surface(
        &self,
        device: &mut dyn GpuDevice,
        texture: &ImageTexture,
        image: &Image,
        viewport: &Viewport,
        transform: Affine2,
        target: SurfaceSize,
    ) -> Result<RgbaImage> {
        let variant = ShaderVariant::for_kind(image.sample_kind());
        let layout = self.programs.get(&variant).ok_or(RenderError::ProgramNotLinked(variant))?;

        let params = WindowingParams {
            transform: transform.to_mat3(),
            resolution: [target.width as f32, target.height as f32],
            window_width: viewport.voi.window_width as f32,
            window_center: viewport.voi.window_center as f32,
            slope: image.slope(),
            intercept: image.intercept(),
            invert: viewport.invert,
        };

        device.begin_frame(target, variant, &layout.encode(&params))?;
        for tile in &texture.tiles {
            device.draw_quad(tile.texture, &tile.geometry)?;
        }
        Ok(device.end_frame()?)
    }
}
