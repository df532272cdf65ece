//! Mirador rendering engine.
//!
//! Draws medical images onto 2D surfaces with window/level, inversion and
//! geometric transforms applied. Two paths share one entry point
//! ([`render::Renderer`]): a CPU compositor driven by a lookup table, and a
//! GPU path that uploads images as tiled textures and windows them in a
//! fragment shader.

pub mod config;
pub mod coords;
pub mod cpu;
pub mod error;
pub mod gpu;
pub mod imaging;
pub mod logging;
pub mod lut;
pub mod render;
pub mod render_state;
pub mod surface;
pub mod viewport;

pub use config::{RendererConfig, TilingConfig};
pub use error::{RenderError, Result};
pub use imaging::{Image, ImageId, PixelData, SampleKind};
pub use lut::{LinearLutProvider, Lut, LutProvider};
pub use render::{EnabledElement, RenderOutcome, RenderPath, Renderer, SurfaceId};
pub use surface::{PixelCanvas, Surface2d};
pub use viewport::{RendererKind, Viewport, Voi};
