//! Per-image tile sets, kept across frames.

use std::collections::HashMap;

use crate::imaging::{Image, ImageId};

use super::device::{GpuDevice, TextureHandle, TileGeometry};
use super::tiling::{TileRegion, TilingGenerator};

/// One uploaded tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub texture: TextureHandle,
    pub region: TileRegion,
    pub geometry: TileGeometry,
}

/// All tiles of one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageTexture {
    pub tiles: Vec<Tile>,
    pub tile_size: u32,
    pub size_in_bytes: usize,
    /// False when the device refused some tiles. Such a set is drawn once and
    /// regenerated on the next lookup.
    pub complete: bool,
}

#[derive(Debug)]
struct CacheEntry {
    texture: ImageTexture,
    last_access: u64,
}

/// Maps image identity to its uploaded tiles, with least-recently-used
/// eviction once the byte total exceeds `max_bytes`.
#[derive(Debug)]
pub struct TextureCache {
    entries: HashMap<ImageId, CacheEntry>,
    max_bytes: usize,
    total_bytes: usize,
    clock: u64,
}

impl TextureCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_bytes,
            total_bytes: 0,
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn contains(&self, id: &ImageId) -> bool {
        self.entries.contains_key(id)
    }

    /// The tiles for `image`, generated and uploaded on a miss.
    ///
    /// When the device runs out of memory mid-upload, least recently used
    /// images are evicted until the tile fits or nothing else is left. A set
    /// that still came back incomplete is retried on the next lookup.
    pub fn get_or_create(
        &mut self,
        image: &Image,
        tiler: &mut TilingGenerator,
        device: &mut dyn GpuDevice,
    ) -> &ImageTexture {
        self.clock += 1;
        let now = self.clock;
        let id = image.id();

        if self.entries.get(id).is_some_and(|entry| !entry.texture.complete) {
            log::debug!("retrying incomplete tile set for {id}");
            self.evict(id, device);
        }

        if !self.entries.contains_key(id) {
            let mut reclaim = |device: &mut dyn GpuDevice| self.evict_lru(id, device);
            let texture = tiler.generate_with(image, device, &mut reclaim);
            log::debug!(
                "texture cache miss for {id}: {} tile(s), {} bytes",
                texture.tiles.len(),
                texture.size_in_bytes
            );
            self.total_bytes += texture.size_in_bytes;
            self.entries.insert(id.clone(), CacheEntry { texture, last_access: now });
            self.make_room(id, device);
        }

        let entry = self
            .entries
            .entry(id.clone())
            .or_insert_with(|| CacheEntry { texture: ImageTexture::default(), last_access: now });
        entry.last_access = now;
        &entry.texture
    }

    /// Drops one image's tiles and frees its textures.
    pub fn evict(&mut self, id: &ImageId, device: &mut dyn GpuDevice) {
        if let Some(entry) = self.entries.remove(id) {
            self.total_bytes -= entry.texture.size_in_bytes;
            for tile in &entry.texture.tiles {
                device.delete_texture(tile.texture);
            }
            log::debug!("evicted {id} from texture cache");
        }
    }

    /// Clears every entry. Pass `None` when the context is gone: the handles
    /// are already invalid and are simply forgotten.
    pub fn purge_all(&mut self, device: Option<&mut dyn GpuDevice>) {
        if let Some(device) = device {
            for entry in self.entries.values() {
                for tile in &entry.texture.tiles {
                    device.delete_texture(tile.texture);
                }
            }
        }
        if !self.entries.is_empty() {
            log::debug!("purged {} image(s) from texture cache", self.entries.len());
        }
        self.entries.clear();
        self.total_bytes = 0;
    }

    // Evicts least recently used entries other than `keep` until under budget.
    fn make_room(&mut self, keep: &ImageId, device: &mut dyn GpuDevice) {
        while self.total_bytes > self.max_bytes && self.evict_lru(keep, device) {}
    }

    // Evicts the least recently used entry other than `keep`. False when there is none.
    fn evict_lru(&mut self, keep: &ImageId, device: &mut dyn GpuDevice) -> bool {
        let victim = self
            .entries
            .iter()
            .filter(|(id, _)| *id != keep)
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(id, _)| id.clone());

        match victim {
            Some(id) => {
                self.evict(&id, device);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::testing::RecordingDevice;
    use crate::imaging::PixelData;

    fn gray8(id: &str, side: u32) -> Image {
        Image::new(id, side, side, PixelData::Gray8(vec![7; (side * side) as usize])).unwrap()
    }

    #[test]
    fn hit_does_not_reupload() {
        let mut device = RecordingDevice::new(64);
        let mut tiler = TilingGenerator::default();
        let mut cache = TextureCache::new(usize::MAX);
        let image = gray8("a", 20);

        let first = cache.get_or_create(&image, &mut tiler, &mut device).clone();
        let second = cache.get_or_create(&image, &mut tiler, &mut device).clone();
        assert_eq!(first, second);
        assert_eq!(device.uploads().len(), 4);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn byte_size_counts_tiles_times_channels() {
        let mut device = RecordingDevice::new(64);
        let mut tiler = TilingGenerator::default();
        let mut cache = TextureCache::new(usize::MAX);

        let texture = cache.get_or_create(&gray8("a", 20), &mut tiler, &mut device);
        assert_eq!(texture.tile_size, 16);
        assert_eq!(texture.size_in_bytes, 16 * 16 * 4);
        assert_eq!(cache.size_in_bytes(), 16 * 16 * 4);
    }

    #[test]
    fn evict_frees_textures() {
        let mut device = RecordingDevice::new(64);
        let mut tiler = TilingGenerator::default();
        let mut cache = TextureCache::new(usize::MAX);
        let image = gray8("a", 20);

        cache.get_or_create(&image, &mut tiler, &mut device);
        cache.evict(image.id(), &mut device);
        assert!(cache.is_empty());
        assert_eq!(cache.size_in_bytes(), 0);
        assert_eq!(device.live_textures(), 0);

        // Unknown ids are ignored.
        cache.evict(&ImageId::from("nope"), &mut device);
    }

    #[test]
    fn purge_without_device_forgets_everything() {
        let mut device = RecordingDevice::new(64);
        let mut tiler = TilingGenerator::default();
        let mut cache = TextureCache::new(usize::MAX);
        cache.get_or_create(&gray8("a", 8), &mut tiler, &mut device);
        cache.get_or_create(&gray8("b", 8), &mut tiler, &mut device);

        cache.purge_all(None);
        assert!(cache.is_empty());
        assert_eq!(cache.size_in_bytes(), 0);
        // Nothing was deleted through the (lost) device.
        assert_eq!(device.live_textures(), 2);
    }

    #[test]
    fn purge_with_device_deletes_textures() {
        let mut device = RecordingDevice::new(64);
        let mut tiler = TilingGenerator::default();
        let mut cache = TextureCache::new(usize::MAX);
        cache.get_or_create(&gray8("a", 8), &mut tiler, &mut device);

        cache.purge_all(Some(&mut device as &mut dyn GpuDevice));
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn memory_pressure_evicts_least_recently_used() {
        let mut device = RecordingDevice::new(64);
        let mut tiler = TilingGenerator::default();
        // 8x8 uint8 image: one 8px tile of 64 bytes. Room for two.
        let mut cache = TextureCache::new(128);
        let (a, b, c) = (gray8("a", 8), gray8("b", 8), gray8("c", 8));

        cache.get_or_create(&a, &mut tiler, &mut device);
        cache.get_or_create(&b, &mut tiler, &mut device);
        cache.get_or_create(&a, &mut tiler, &mut device);
        cache.get_or_create(&c, &mut tiler, &mut device);

        assert!(cache.contains(a.id()));
        assert!(!cache.contains(b.id()));
        assert!(cache.contains(c.id()));
        assert_eq!(cache.size_in_bytes(), 128);
        assert_eq!(device.live_textures(), 2);
    }

    // ── device memory pressure ──

    #[test]
    fn device_out_of_memory_evicts_least_recently_used() {
        let mut device = RecordingDevice::new(64);
        device.set_memory_budget(128);
        let mut tiler = TilingGenerator::default();
        let mut cache = TextureCache::new(usize::MAX);
        let (a, b, c) = (gray8("a", 8), gray8("b", 8), gray8("c", 8));

        cache.get_or_create(&a, &mut tiler, &mut device);
        cache.get_or_create(&b, &mut tiler, &mut device);
        let texture = cache.get_or_create(&c, &mut tiler, &mut device);
        assert_eq!(texture.tiles.len(), 1);
        assert!(texture.complete);

        assert!(!cache.contains(a.id()));
        assert!(cache.contains(b.id()));
        assert_eq!(cache.size_in_bytes(), 128);
        assert_eq!(device.live_textures(), 2);
    }

    #[test]
    fn incomplete_entry_is_regenerated_on_next_lookup() {
        let mut device = RecordingDevice::new(64);
        device.set_memory_budget(0);
        let mut tiler = TilingGenerator::default();
        let mut cache = TextureCache::new(usize::MAX);
        let image = gray8("c", 8);

        let texture = cache.get_or_create(&image, &mut tiler, &mut device);
        assert!(texture.tiles.is_empty());
        assert!(!texture.complete);
        assert!(cache.contains(image.id()));
        assert_eq!(device.allocation_attempts(), 1);

        device.set_memory_budget(64);
        let texture = cache.get_or_create(&image, &mut tiler, &mut device);
        assert_eq!(texture.tiles.len(), 1);
        assert!(texture.complete);
        assert_eq!(device.allocation_attempts(), 2);

        // Complete now, so later lookups are plain hits.
        cache.get_or_create(&image, &mut tiler, &mut device);
        assert_eq!(device.allocation_attempts(), 2);
        assert_eq!(device.live_textures(), 1);
    }

    #[test]
    fn oversized_entry_is_still_admitted() {
        let mut device = RecordingDevice::new(64);
        let mut tiler = TilingGenerator::default();
        let mut cache = TextureCache::new(10);
        let texture = cache.get_or_create(&gray8("a", 8), &mut tiler, &mut device);
        assert_eq!(texture.tiles.len(), 1);
        assert_eq!(cache.len(), 1);
    }
}
