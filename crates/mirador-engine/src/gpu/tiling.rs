//! Splitting images into hardware-sized texture tiles.

use crate::config::TilingConfig;
use crate::imaging::{Image, SampleKind};

use super::device::{GpuDevice, GpuError, TexelFormat, TextureUpload, TileGeometry};
use super::texture_cache::{ImageTexture, Tile};

/// Side length of a tile for a `width × height` image.
///
/// The next power of two covering the longer side, capped at
/// `max_dimension / headroom_divisor` and never above `max_dimension`.
pub fn max_tile_size(width: u32, height: u32, max_dimension: u32, headroom_divisor: u32) -> u32 {
    let covering = width.max(height).max(1).checked_next_power_of_two().unwrap_or(u32::MAX);
    let headroom = max_dimension / headroom_divisor.max(1);
    covering.min(headroom).min(max_dimension).max(1)
}

/// Pixel rectangle of the source image covered by one tile.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileRegion {
    pub column: u32,
    pub row: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Tile grid for one image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileLayout {
    pub image_width: u32,
    pub image_height: u32,
    pub tile_size: u32,
    pub columns: u32,
    pub rows: u32,
}

impl TileLayout {
    pub fn new(image_width: u32, image_height: u32, tile_size: u32) -> Self {
        let tile_size = tile_size.max(1);
        Self {
            image_width,
            image_height,
            tile_size,
            columns: image_width.div_ceil(tile_size),
            rows: image_height.div_ceil(tile_size),
        }
    }

    pub fn for_image(image: &Image, max_dimension: u32, config: &TilingConfig) -> Self {
        let tile = max_tile_size(image.width(), image.height(), max_dimension, config.headroom_divisor);
        Self::new(image.width(), image.height(), tile)
    }

    #[inline]
    pub fn tile_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn region(&self, column: u32, row: u32) -> TileRegion {
        let x = column * self.tile_size;
        let y = row * self.tile_size;
        TileRegion {
            column,
            row,
            x,
            y,
            width: self.tile_size.min(self.image_width - x),
            height: self.tile_size.min(self.image_height - y),
        }
    }

    /// Regions in upload order: columns outer, rows inner.
    pub fn regions(&self) -> impl Iterator<Item = TileRegion> + '_ {
        (0..self.columns).flat_map(move |c| (0..self.rows).map(move |r| self.region(c, r)))
    }

    /// Quad placing `region` in image space, sampling only its filled fraction.
    pub fn geometry(&self, region: &TileRegion) -> TileGeometry {
        let size = self.tile_size as f32;
        TileGeometry::new(
            region.x as f32,
            region.y as f32,
            region.width as f32,
            region.height as f32,
            region.width as f32 / size,
            region.height as f32 / size,
        )
    }
}

/// Tile staging memory, reused across images.
///
/// Reallocated only when the tile size or channel count changes.
#[derive(Debug, Default)]
pub struct ScratchBuffer {
    data: Vec<u8>,
    tile_size: u32,
    channels: usize,
    allocations: usize,
}

impl ScratchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a `tile_size² × channels` buffer. Contents are unspecified.
    pub fn prepare(&mut self, tile_size: u32, channels: usize) -> &mut [u8] {
        if self.tile_size != tile_size || self.channels != channels {
            let len = tile_size as usize * tile_size as usize * channels;
            log::debug!("scratch buffer reallocated: {tile_size}px x {channels} channel(s), {len} bytes");
            self.data = vec![0; len];
            self.tile_size = tile_size;
            self.channels = channels;
            self.allocations += 1;
        }
        &mut self.data
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }
}

/// Copies `region` of `image` into `out` as packed texels, zero-padding the
/// part of the tile outside the image.
pub fn fill_tile(image: &Image, kind: SampleKind, layout: &TileLayout, region: &TileRegion, out: &mut [u8]) {
    let channels = kind.channels();
    let tile = layout.tile_size as usize;
    debug_assert_eq!(out.len(), tile * tile * channels);

    if region.width < layout.tile_size || region.height < layout.tile_size {
        out.fill(0);
    }

    let pixels = image.pixels();
    let image_width = image.width() as usize;
    for row in 0..region.height as usize {
        let src_row = (region.y as usize + row) * image_width + region.x as usize;
        let dst_row = row * tile * channels;
        for col in 0..region.width as usize {
            let dst = dst_row + col * channels;
            kind.pack_texel(pixels, src_row + col, &mut out[dst..dst + channels]);
        }
    }
}

/// Builds and uploads the tile set for an image.
#[derive(Debug, Default)]
pub struct TilingGenerator {
    scratch: ScratchBuffer,
    config: TilingConfig,
}

impl TilingGenerator {
    pub fn new(config: TilingConfig) -> Self {
        Self { scratch: ScratchBuffer::new(), config }
    }

    pub fn scratch(&self) -> &ScratchBuffer {
        &self.scratch
    }

    /// Uploads every tile of `image`. A tile the device refuses is dropped with
    /// a warning; the result then covers the image only partially.
    pub fn generate(&mut self, image: &Image, device: &mut dyn GpuDevice) -> ImageTexture {
        self.generate_with(image, device, &mut |_| false)
    }

    /// Like [`TilingGenerator::generate`], but an `OutOfMemory` refusal first
    /// calls `reclaim`, and the tile is retried for as long as it reports
    /// that memory was freed.
    pub fn generate_with(
        &mut self,
        image: &Image,
        device: &mut dyn GpuDevice,
        reclaim: &mut dyn FnMut(&mut dyn GpuDevice) -> bool,
    ) -> ImageTexture {
        let kind = image.sample_kind();
        let channels = kind.channels();
        let layout = TileLayout::for_image(image, device.max_texture_dimension(), &self.config);
        let Some(format) = TexelFormat::from_channels(channels) else {
            log::error!("no texel format for {channels} channel(s)");
            return ImageTexture::default();
        };

        log::debug!(
            "tiling {} ({}x{}, {kind}): {}x{} tiles of {}px",
            image.id(),
            image.width(),
            image.height(),
            layout.columns,
            layout.rows,
            layout.tile_size
        );

        let mut tiles = Vec::with_capacity(layout.tile_count());
        for region in layout.regions() {
            let data = self.scratch.prepare(layout.tile_size, channels);
            fill_tile(image, kind, &layout, &region, data);

            let upload = TextureUpload { size: layout.tile_size, format, data };
            let uploaded = loop {
                match device.create_texture(&upload) {
                    Ok(texture) => break Some(texture),
                    Err(GpuError::OutOfMemory { .. }) if reclaim(&mut *device) => {}
                    Err(err) => {
                        log::warn!(
                            "dropping tile ({}, {}) of {}: {err}",
                            region.column,
                            region.row,
                            image.id()
                        );
                        break None;
                    }
                }
            };
            if let Some(texture) = uploaded {
                tiles.push(Tile { texture, region, geometry: layout.geometry(&region) });
            }
        }

        let tile_bytes = layout.tile_size as usize * layout.tile_size as usize * channels;
        ImageTexture {
            complete: tiles.len() == layout.tile_count(),
            size_in_bytes: tile_bytes * tiles.len(),
            tile_size: layout.tile_size,
            tiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::testing::RecordingDevice;
    use crate::imaging::PixelData;

    fn gray16(w: u32, h: u32) -> Image {
        let n = (w * h) as usize;
        Image::new("g16", w, h, PixelData::Gray16((0..n).map(|i| (i % 4096) as u16).collect())).unwrap()
    }

    // ── tile size ─────────────────────────────────────────────────────────

    #[test]
    fn headroom_cap_dominates_for_large_images() {
        assert_eq!(max_tile_size(600, 600, 2048, 4), 512);
        assert_eq!(max_tile_size(600, 600, 1024, 4), 256);
        assert_eq!(max_tile_size(5000, 100, 16384, 4), 4096);
    }

    #[test]
    fn small_images_use_covering_power_of_two() {
        assert_eq!(max_tile_size(100, 60, 16384, 4), 128);
        assert_eq!(max_tile_size(128, 128, 16384, 4), 128);
        assert_eq!(max_tile_size(1, 1, 16384, 4), 1);
    }

    #[test]
    fn tile_size_never_exceeds_hardware_max() {
        assert_eq!(max_tile_size(4000, 4000, 8, 1), 8);
        assert_eq!(max_tile_size(4000, 4000, 3, 4), 1);
    }

    // ── layout ────────────────────────────────────────────────────────────

    #[test]
    fn six_hundred_square_splits_into_two_by_two() {
        let layout = TileLayout::new(600, 600, 512);
        assert_eq!((layout.columns, layout.rows), (2, 2));

        let regions: Vec<_> = layout.regions().collect();
        let partial = regions.iter().filter(|r| r.width == 88 || r.height == 88).count();
        let full = regions.iter().filter(|r| r.width == 512 && r.height == 512).count();
        assert_eq!((partial, full), (3, 1));
    }

    #[test]
    fn regions_exactly_cover_image() {
        for (w, h, m) in [(600, 600, 512), (1000, 300, 256), (7, 13, 4), (256, 256, 256), (1, 9, 2)] {
            let layout = TileLayout::new(w, h, m);
            let regions: Vec<_> = layout.regions().collect();
            assert_eq!(regions.len(), (w.div_ceil(m) * h.div_ceil(m)) as usize);

            let mut covered = vec![0u8; (w * h) as usize];
            for r in &regions {
                assert!(r.width <= m && r.height <= m);
                for y in r.y..r.y + r.height {
                    for x in r.x..r.x + r.width {
                        covered[(y * w + x) as usize] += 1;
                    }
                }
            }
            assert!(covered.iter().all(|&c| c == 1), "{w}x{h} / {m}");
        }
    }

    #[test]
    fn regions_are_column_major() {
        let layout = TileLayout::new(600, 600, 512);
        let order: Vec<_> = layout.regions().map(|r| (r.column, r.row)).collect();
        assert_eq!(order, [(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn edge_tiles_report_filled_fraction() {
        let layout = TileLayout::new(600, 600, 512);
        for region in layout.regions() {
            let g = layout.geometry(&region);
            assert_eq!(g.tex_coords[0], [region.width as f32 / 512.0, region.height as f32 / 512.0]);
            assert_eq!(g.vertices[3], [region.x as f32, region.y as f32]);
        }
        let corner = layout.geometry(&layout.region(1, 1));
        assert_eq!(corner.tex_coords[0], [88.0 / 512.0, 88.0 / 512.0]);
    }

    // ── fill ──────────────────────────────────────────────────────────────

    #[test]
    fn fill_zero_pads_partial_tiles() {
        let image = Image::new("u8", 3, 2, PixelData::Gray8(vec![1, 2, 3, 4, 5, 6])).unwrap();
        let layout = TileLayout::new(3, 2, 2);
        let mut out = vec![0xAA; 4];

        fill_tile(&image, SampleKind::Uint8, &layout, &layout.region(1, 0), &mut out);
        assert_eq!(out, [3, 0, 6, 0]);
    }

    #[test]
    fn fill_packs_signed_samples_as_two_channels() {
        let image = Image::new("i16", 1, 1, PixelData::GrayI16(vec![-2])).unwrap();
        let layout = TileLayout::new(1, 1, 1);
        let mut out = vec![0; 2];
        fill_tile(&image, SampleKind::Int16, &layout, &layout.region(0, 0), &mut out);
        assert_eq!(u16::from_le_bytes([out[0], out[1]]), 32_766);
    }

    // ── scratch ───────────────────────────────────────────────────────────

    #[test]
    fn scratch_reallocates_only_on_shape_change() {
        let mut scratch = ScratchBuffer::new();
        assert_eq!(scratch.prepare(512, 2).len(), 512 * 512 * 2);
        scratch.prepare(512, 2);
        assert_eq!(scratch.allocations(), 1);
        scratch.prepare(512, 1);
        scratch.prepare(256, 1);
        assert_eq!(scratch.allocations(), 3);
    }

    // ── generation ────────────────────────────────────────────────────────

    #[test]
    fn generate_uploads_every_tile() {
        let image = gray16(600, 600);
        let mut device = RecordingDevice::new(2048);
        let mut tiler = TilingGenerator::default();

        let texture = tiler.generate(&image, &mut device);
        assert_eq!(texture.tile_size, 512);
        assert_eq!(texture.tiles.len(), 4);
        assert_eq!(texture.size_in_bytes, 512 * 512 * 2 * 4);
        assert_eq!(device.live_textures(), 4);
        assert!(device.uploads().iter().all(|u| u.format == TexelFormat::Rg8 && u.size == 512));
    }

    #[test]
    fn refused_tiles_are_dropped_not_fatal() {
        let image = gray16(600, 600);
        let mut device = RecordingDevice::new(2048);
        device.fail_allocations_after(2);
        let mut tiler = TilingGenerator::default();

        let texture = tiler.generate(&image, &mut device);
        assert_eq!(texture.tiles.len(), 2);
        assert_eq!(texture.size_in_bytes, 512 * 512 * 2 * 2);
        assert!(!texture.complete);
    }

    #[test]
    fn out_of_memory_retries_after_reclaim() {
        const TILE: usize = 512 * 512 * 2;
        let image = gray16(600, 600);
        let mut device = RecordingDevice::new(2048);
        device.set_memory_budget(4 * TILE);
        let data = vec![0; TILE];
        let stale = device
            .create_texture(&TextureUpload { size: 512, format: TexelFormat::Rg8, data: &data })
            .unwrap();

        let mut tiler = TilingGenerator::default();
        let mut pending = Some(stale);
        let mut reclaim = |device: &mut dyn GpuDevice| match pending.take() {
            Some(texture) => {
                device.delete_texture(texture);
                true
            }
            None => false,
        };
        let texture = tiler.generate_with(&image, &mut device, &mut reclaim);

        assert!(pending.is_none());
        assert_eq!(texture.tiles.len(), 4);
        assert!(texture.complete);
        assert_eq!(device.live_textures(), 4);
        // The stale texture, four tiles and one refused attempt.
        assert_eq!(device.allocation_attempts(), 6);
    }

    #[test]
    fn scratch_is_reused_across_images_of_same_shape() {
        let mut device = RecordingDevice::new(2048);
        let mut tiler = TilingGenerator::default();
        tiler.generate(&gray16(600, 600), &mut device);
        tiler.generate(&gray16(700, 520), &mut device);
        assert_eq!(tiler.scratch().allocations(), 1);
    }
}
