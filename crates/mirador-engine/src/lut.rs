//! Lookup tables and their per-image cache.
//!
//! The windowing curve itself belongs to a [`LutProvider`]. This module owns
//! the cache-tag bookkeeping: a LUT attached to an image is reused while its
//! `(window_width, window_center, invert)` tag matches the viewport, and
//! replaced wholesale otherwise.

use std::rc::Rc;

use crate::imaging::Image;
use crate::viewport::Viewport;

/// The windowing parameters a LUT was generated for.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LutTag {
    pub window_width: f64,
    pub window_center: f64,
    pub invert: bool,
}

impl LutTag {
    pub fn of(viewport: &Viewport) -> Self {
        Self {
            window_width: viewport.voi.window_width,
            window_center: viewport.voi.window_center,
            invert: viewport.invert,
        }
    }
}

/// Stored sample → display intensity. Index `i` holds the value for sample `offset + i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lut {
    offset: i32,
    values: Vec<u8>,
    tag: Option<LutTag>,
}

impl Lut {
    /// An untagged table. The engine tags it after the provider returns.
    pub fn new(offset: i32, values: Vec<u8>) -> Self {
        Self { offset, values, tag: None }
    }

    #[inline]
    pub fn offset(&self) -> i32 {
        self.offset
    }

    #[inline]
    pub fn values(&self) -> &[u8] {
        &self.values
    }

    #[inline]
    pub fn tag(&self) -> Option<LutTag> {
        self.tag
    }

    pub fn set_tag(&mut self, tag: LutTag) {
        self.tag = Some(tag);
    }

    /// True when the tag was written for exactly these windowing parameters.
    pub fn matches(&self, viewport: &Viewport) -> bool {
        self.tag == Some(LutTag::of(viewport))
    }

    /// Samples outside the table clamp to its first/last entry.
    #[inline]
    pub fn lookup(&self, sample: i32) -> u8 {
        let Some(last) = self.values.len().checked_sub(1) else { return 0 };
        let i = i64::from(sample) - i64::from(self.offset);
        self.values[i.clamp(0, last as i64) as usize]
    }
}

/// Produces the windowing curve for an image. Implementations must be pure.
pub trait LutProvider {
    fn generate_lut(&self, image: &Image, window_width: f64, window_center: f64, invert: bool) -> Lut;
}

impl<P: LutProvider + ?Sized> LutProvider for &P {
    fn generate_lut(&self, image: &Image, window_width: f64, window_center: f64, invert: bool) -> Lut {
        (**self).generate_lut(image, window_width, window_center, invert)
    }
}

/// Linear VOI curve over the image's stored value range, with modality rescale.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinearLutProvider;

impl LutProvider for LinearLutProvider {
    fn generate_lut(&self, image: &Image, window_width: f64, window_center: f64, invert: bool) -> Lut {
        let (min, max) = if image.is_color() {
            (0, 255)
        } else {
            (image.min_pixel_value(), image.max_pixel_value())
        };

        let slope = f64::from(image.slope());
        let intercept = f64::from(image.intercept());
        let center = window_center - 0.5;
        let width = (window_width - 1.0).max(1.0);
        let lower = center - width / 2.0;
        let upper = center + width / 2.0;

        let values = (min..=max)
            .map(|stored| {
                let modality = f64::from(stored) * slope + intercept;
                let v = if modality <= lower {
                    0.0
                } else if modality > upper {
                    255.0
                } else {
                    ((modality - center) / width + 0.5) * 255.0
                };
                let v = v.round().clamp(0.0, 255.0) as u8;
                if invert { 255 - v } else { v }
            })
            .collect();

        Lut::new(min, values)
    }
}

/// Returns the image's LUT for `viewport`, regenerating only on a tag mismatch.
pub fn lut_for_viewport<P: LutProvider + ?Sized>(
    image: &Image,
    viewport: &Viewport,
    provider: &P,
) -> Rc<Lut> {
    if let Some(lut) = image.cached_lut() {
        if lut.matches(viewport) {
            return lut;
        }
    }

    log::debug!(
        "regenerating LUT for {} (ww={}, wc={}, invert={})",
        image.id(),
        viewport.voi.window_width,
        viewport.voi.window_center,
        viewport.invert
    );

    let mut lut = provider.generate_lut(
        image,
        viewport.voi.window_width,
        viewport.voi.window_center,
        viewport.invert,
    );
    lut.set_tag(LutTag::of(viewport));
    image.store_lut(lut)
}
