//! Per-render display parameters.

use std::str::FromStr;

/// VOI (value-of-interest) window: a linear contrast stretch.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Voi {
    pub window_width: f64,
    pub window_center: f64,
}

impl Voi {
    #[inline]
    pub const fn new(window_width: f64, window_center: f64) -> Self {
        Self { window_width, window_center }
    }

    /// Window spanning `min..=max` exactly.
    pub fn from_range(min: f64, max: f64) -> Self {
        Self::new(max - min, (max + min) / 2.0)
    }
}

/// Which backend renders an element.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum RendererKind {
    /// CPU LUT compositing into a 2D surface.
    #[default]
    Canvas,
    /// Tiled textures drawn through the windowing shader.
    Gpu,
}

impl FromStr for RendererKind {
    type Err = std::convert::Infallible;

    /// `"webgl"` and `"gpu"` (any case) select the GPU path; anything else the canvas path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "webgl" | "gpu" => RendererKind::Gpu,
            _ => RendererKind::Canvas,
        })
    }
}

/// Immutable snapshot of display parameters for one render call.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub voi: Voi,
    pub invert: bool,
    /// Degrees, clockwise.
    pub rotation: f64,
    pub hflip: bool,
    pub vflip: bool,
    /// Nearest-neighbour magnification when true.
    pub pixel_replication: bool,
    pub renderer: RendererKind,
}

impl Viewport {
    pub fn new(voi: Voi) -> Self {
        Self {
            voi,
            invert: false,
            rotation: 0.0,
            hflip: false,
            vflip: false,
            pixel_replication: false,
            renderer: RendererKind::Canvas,
        }
    }

    /// Identity window for 8-bit data: no remapping and no inversion.
    pub fn is_identity_window(&self) -> bool {
        self.voi.window_width == 255.0 && self.voi.window_center == 128.0 && !self.invert
    }
}
