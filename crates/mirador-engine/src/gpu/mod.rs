//! GPU rendering path.
//!
//! Images are split into hardware-sized tiles ([`tiling`]), uploaded once per
//! image identity ([`texture_cache`]) and drawn through a per-data-kind
//! windowing shader ([`shader`], [`compositor`]). [`lifecycle`] owns the
//! device and survives context loss. The backend is abstracted behind
//! [`GpuDevice`]; [`wgpu_device`] is the real implementation.

pub mod compositor;
pub mod device;
pub mod lifecycle;
pub mod shader;
pub mod texture_cache;
pub mod tiling;
pub mod wgpu_device;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use compositor::GpuCompositor;
pub use device::{GpuDevice, GpuError, GpuPlatform, TexelFormat, TextureHandle, TextureUpload, TileGeometry};
pub use lifecycle::{ContextEvent, ContextEventSender, ContextState, GpuFrame, GpuRenderer};
pub use shader::{ShaderVariant, UniformLayout, UniformSlot, WindowingParams};
pub use texture_cache::{ImageTexture, TextureCache, Tile};
pub use tiling::{max_tile_size, ScratchBuffer, TileLayout, TileRegion, TilingGenerator};
pub use wgpu_device::{GpuInit, WgpuDevice, WgpuPlatform};
