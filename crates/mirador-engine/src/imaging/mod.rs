//! Decoded source images as handed over by the loader.
//!
//! The engine only reads an [`Image`]. The one exception is the annotation
//! slots (cached LUT, native surface): these are weak, non-owning caches that
//! the engine fills and the image's owner may clear at any time.

mod pixel_data;
mod sample_kind;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use image::RgbaImage;

use crate::coords::SurfaceSize;
use crate::error::{RenderError, Result};
use crate::lut::Lut;

pub use pixel_data::PixelData;
pub use sample_kind::SampleKind;

/// Stable image identity. Cache keys (render state, textures) use this, never pixel content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(Arc<str>);

impl ImageId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ImageId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// A decoded image: identity, geometry, stored samples and value range.
#[derive(Debug)]
pub struct Image {
    id: ImageId,
    width: u32,
    height: u32,
    pixels: PixelData,
    min_pixel_value: i32,
    max_pixel_value: i32,
    slope: f32,
    intercept: f32,

    lut: RefCell<Option<Rc<Lut>>>,
    native_surface: RefCell<Option<Rc<RgbaImage>>>,
}

impl Image {
    /// Wraps decoded samples. The value range is measured from the samples;
    /// use [`Image::with_value_range`] when the loader knows it from metadata.
    pub fn new(id: impl Into<ImageId>, width: u32, height: u32, pixels: PixelData) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidImage(format!(
                "image dimensions must be non-zero (got {width}x{height})"
            )));
        }
        let expected = width as usize * height as usize;
        if pixels.pixel_count() != expected {
            return Err(RenderError::InvalidImage(format!(
                "pixel buffer holds {} pixels, {width}x{height} needs {expected}",
                pixels.pixel_count()
            )));
        }

        let (min_pixel_value, max_pixel_value) = pixels.value_range();

        Ok(Self {
            id: id.into(),
            width,
            height,
            pixels,
            min_pixel_value,
            max_pixel_value,
            slope: 1.0,
            intercept: 0.0,
            lut: RefCell::new(None),
            native_surface: RefCell::new(None),
        })
    }

    /// Overrides the measured range, clamped to what the storage type holds.
    pub fn with_value_range(mut self, min: i32, max: i32) -> Self {
        let (lo, hi) = self.pixels.storage_range();
        self.min_pixel_value = min.min(max).clamp(lo, hi);
        self.max_pixel_value = max.max(min).clamp(lo, hi);
        self
    }

    /// Modality rescale: `modality = stored * slope + intercept`.
    pub fn with_rescale(mut self, slope: f32, intercept: f32) -> Self {
        self.slope = slope;
        self.intercept = intercept;
        self
    }

    /// Attaches a pre-rendered, identity-windowed surface.
    pub fn with_native_surface(self, surface: RgbaImage) -> Result<Self> {
        if surface.dimensions() != (self.width, self.height) {
            return Err(RenderError::InvalidImage(format!(
                "native surface is {}x{}, image is {}x{}",
                surface.width(),
                surface.height(),
                self.width,
                self.height
            )));
        }
        *self.native_surface.borrow_mut() = Some(Rc::new(surface));
        Ok(self)
    }

    #[inline]
    pub fn id(&self) -> &ImageId {
        &self.id
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn size(&self) -> SurfaceSize {
        SurfaceSize::new(self.width, self.height)
    }

    #[inline]
    pub fn is_color(&self) -> bool {
        self.pixels.is_color()
    }

    #[inline]
    pub fn pixels(&self) -> &PixelData {
        &self.pixels
    }

    #[inline]
    pub fn min_pixel_value(&self) -> i32 {
        self.min_pixel_value
    }

    #[inline]
    pub fn max_pixel_value(&self) -> i32 {
        self.max_pixel_value
    }

    #[inline]
    pub fn slope(&self) -> f32 {
        self.slope
    }

    #[inline]
    pub fn intercept(&self) -> f32 {
        self.intercept
    }

    pub fn sample_kind(&self) -> SampleKind {
        SampleKind::classify(self.is_color(), self.min_pixel_value, self.max_pixel_value)
    }

    // ── annotation slots ──────────────────────────────────────────────────

    /// The LUT last attached by the engine, if the owner has not cleared it.
    pub fn cached_lut(&self) -> Option<Rc<Lut>> {
        self.lut.borrow().clone()
    }

    /// Replaces (never merges) the attached LUT.
    pub fn store_lut(&self, lut: Lut) -> Rc<Lut> {
        let lut = Rc::new(lut);
        *self.lut.borrow_mut() = Some(Rc::clone(&lut));
        lut
    }

    pub fn clear_cached_lut(&self) {
        self.lut.borrow_mut().take();
    }

    pub fn native_surface(&self) -> Option<Rc<RgbaImage>> {
        self.native_surface.borrow().clone()
    }

    pub fn clear_native_surface(&self) {
        self.native_surface.borrow_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        let err = Image::new("a", 4, 4, PixelData::Gray8(vec![0; 15])).unwrap_err();
        assert!(matches!(err, RenderError::InvalidImage(_)));
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(Image::new("a", 0, 4, PixelData::Gray8(vec![])).is_err());
    }

    #[test]
    fn measures_value_range() {
        let img = Image::new("a", 2, 2, PixelData::GrayI16(vec![-5, 0, 300, 12])).unwrap();
        assert_eq!(img.min_pixel_value(), -5);
        assert_eq!(img.max_pixel_value(), 300);
        assert_eq!(img.sample_kind(), SampleKind::Int16);
    }

    #[test]
    fn declared_range_is_clamped_to_storage() {
        let img = Image::new("a", 2, 1, PixelData::Gray16(vec![40_000, 5]))
            .unwrap()
            .with_value_range(-10, 40_000);
        assert_eq!(img.min_pixel_value(), 0);
        assert_eq!(img.max_pixel_value(), 40_000);
        assert_eq!(img.sample_kind(), SampleKind::Uint16);

        let mut out = [0u8; 2];
        img.sample_kind().pack_texel(img.pixels(), 0, &mut out);
        assert_eq!(u16::from_le_bytes(out), 40_000);
    }

    #[test]
    fn native_surface_must_match_dimensions() {
        let img = Image::new("a", 2, 2, PixelData::Rgba8(vec![0; 16])).unwrap();
        assert!(img.with_native_surface(RgbaImage::new(3, 2)).is_err());
    }

    #[test]
    fn owner_can_clear_annotations() {
        let img = Image::new("a", 1, 1, PixelData::Gray8(vec![7])).unwrap();
        img.store_lut(Lut::new(0, vec![0; 8]));
        assert!(img.cached_lut().is_some());
        img.clear_cached_lut();
        assert!(img.cached_lut().is_none());
    }
}
