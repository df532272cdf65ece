//! Engine configuration.

/// Tile sizing policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TilingConfig {
    /// Tiles are capped at `max_texture_dimension / headroom_divisor`.
    pub headroom_divisor: u32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self { headroom_divisor: 4 }
    }
}

/// Top-level renderer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    pub tiling: TilingConfig,
    /// Texture cache budget; least recently used images are evicted beyond it.
    /// Keep it below the device's texture memory budget.
    pub texture_cache_max_bytes: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            tiling: TilingConfig::default(),
            texture_cache_max_bytes: 512 << 20,
        }
    }
}
