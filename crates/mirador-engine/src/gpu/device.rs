use std::fmt;

use image::RgbaImage;
use thiserror::Error;

use crate::coords::SurfaceSize;

use super::lifecycle::ContextEventSender;
use super::shader::ShaderVariant;

/// Opaque texture handle issued by a [`GpuDevice`]. Invalid after context loss.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

/// Tile texel layouts, one per channel count.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TexelFormat {
    /// Single 8-bit channel.
    R8,
    /// Low byte, high byte.
    Rg8,
    /// Packed RGB (backends without a 3-channel format expand it).
    Rgb8,
}

impl TexelFormat {
    pub fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            1 => Some(TexelFormat::R8),
            2 => Some(TexelFormat::Rg8),
            3 => Some(TexelFormat::Rgb8),
            _ => None,
        }
    }

    #[inline]
    pub fn channels(self) -> usize {
        match self {
            TexelFormat::R8 => 1,
            TexelFormat::Rg8 => 2,
            TexelFormat::Rgb8 => 3,
        }
    }
}

/// One square tile texture to allocate and fill.
#[derive(Debug, Copy, Clone)]
pub struct TextureUpload<'a> {
    pub size: u32,
    pub format: TexelFormat,
    /// `size * size * format.channels()` bytes, row-major.
    pub data: &'a [u8],
}

impl TextureUpload<'_> {
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.size as usize * self.size as usize * self.format.channels()
    }
}

/// Triangle-strip quad for one tile: image-space positions and texture coordinates.
///
/// Vertex order is bottom-right, bottom-left, top-right, top-left.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TileGeometry {
    pub vertices: [[f32; 2]; 4],
    pub tex_coords: [[f32; 2]; 4],
}

impl TileGeometry {
    /// Quad covering `w × h` pixels at `(x, y)`, sampling `[0, tx] × [0, ty]` of its texture.
    pub fn new(x: f32, y: f32, w: f32, h: f32, tx: f32, ty: f32) -> Self {
        Self {
            vertices: [[x + w, y + h], [x, y + h], [x + w, y], [x, y]],
            tex_coords: [[tx, ty], [0.0, ty], [tx, 0.0], [0.0, 0.0]],
        }
    }
}

/// Device-level failures. None of these escape a render call on the GPU path
/// except through [`crate::error::RenderError::Gpu`] for programming errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    #[error("GPU context lost")]
    ContextLost,

    #[error("texture allocation of {requested} bytes exceeds the {budget} byte budget")]
    OutOfMemory { requested: u64, budget: u64 },

    #[error("texture size {size} exceeds the device maximum of {max}")]
    TextureTooLarge { size: u32, max: u32 },

    #[error("unknown {0}")]
    UnknownTexture(TextureHandle),

    #[error("no frame in progress")]
    NoActiveFrame,

    #[error("{0}")]
    Backend(String),
}

/// The shader, buffer and texture primitives the GPU path needs.
///
/// Object safe, so the tiler and cache can work against `&mut dyn GpuDevice`.
pub trait GpuDevice {
    /// Largest texture side the hardware accepts.
    fn max_texture_dimension(&self) -> u32;

    /// Allocates shared geometry buffers. Called once per acquired context.
    fn init_buffers(&mut self) -> Result<(), GpuError>;

    /// Compiles `source` for `variant`; `uniform_size` is the uniform struct span in bytes.
    fn link_program(&mut self, variant: ShaderVariant, source: &str, uniform_size: u32) -> Result<(), GpuError>;

    fn create_texture(&mut self, upload: &TextureUpload<'_>) -> Result<TextureHandle, GpuError>;

    /// Releases a texture. Unknown handles are ignored.
    fn delete_texture(&mut self, texture: TextureHandle);

    /// Starts a frame of `target` size, cleared to black, with `variant` bound.
    fn begin_frame(&mut self, target: SurfaceSize, variant: ShaderVariant, uniforms: &[u8]) -> Result<(), GpuError>;

    /// One 4-vertex triangle-strip draw.
    fn draw_quad(&mut self, texture: TextureHandle, geometry: &TileGeometry) -> Result<(), GpuError>;

    /// Submits the frame and reads it back.
    fn end_frame(&mut self) -> Result<RgbaImage, GpuError>;
}

/// Source of GPU contexts.
pub trait GpuPlatform {
    type Device: GpuDevice;

    /// Acquires a fresh device. Loss and restoration must be reported on `events`.
    fn acquire(&mut self, events: ContextEventSender) -> anyhow::Result<Self::Device>;
}
