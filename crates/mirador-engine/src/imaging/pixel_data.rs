/// Stored samples, row-major.
///
/// Grayscale variants hold one sample per pixel. `Rgba8` holds four bytes per
/// pixel; alpha is ignored by both render paths.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    Gray8(Vec<u8>),
    GrayI8(Vec<i8>),
    Gray16(Vec<u16>),
    GrayI16(Vec<i16>),
    Rgba8(Vec<u8>),
}

impl PixelData {
    #[inline]
    pub fn is_color(&self) -> bool {
        matches!(self, PixelData::Rgba8(_))
    }

    pub fn pixel_count(&self) -> usize {
        match self {
            PixelData::Gray8(v) => v.len(),
            PixelData::GrayI8(v) => v.len(),
            PixelData::Gray16(v) => v.len(),
            PixelData::GrayI16(v) => v.len(),
            PixelData::Rgba8(v) => v.len() / 4,
        }
    }

    /// Grayscale sample at `index`. For color data this is the red channel.
    #[inline]
    pub fn gray(&self, index: usize) -> i32 {
        match self {
            PixelData::Gray8(v) => i32::from(v[index]),
            PixelData::GrayI8(v) => i32::from(v[index]),
            PixelData::Gray16(v) => i32::from(v[index]),
            PixelData::GrayI16(v) => i32::from(v[index]),
            PixelData::Rgba8(v) => i32::from(v[index * 4]),
        }
    }

    /// RGB triple at `index`. Grayscale samples are clamped to 8 bits and broadcast.
    #[inline]
    pub fn rgb(&self, index: usize) -> [u8; 3] {
        match self {
            PixelData::Rgba8(v) => {
                let i = index * 4;
                [v[i], v[i + 1], v[i + 2]]
            }
            _ => {
                let g = self.gray(index).clamp(0, 255) as u8;
                [g, g, g]
            }
        }
    }

    /// `(min, max)` the storage type can represent.
    pub fn storage_range(&self) -> (i32, i32) {
        match self {
            PixelData::Gray8(_) | PixelData::Rgba8(_) => (0, i32::from(u8::MAX)),
            PixelData::GrayI8(_) => (i32::from(i8::MIN), i32::from(i8::MAX)),
            PixelData::Gray16(_) => (0, i32::from(u16::MAX)),
            PixelData::GrayI16(_) => (i32::from(i16::MIN), i32::from(i16::MAX)),
        }
    }

    /// `(min, max)` over all stored samples. Color data always spans `0..=255`.
    pub fn value_range(&self) -> (i32, i32) {
        fn range<T: Copy + Into<i32>>(v: &[T]) -> (i32, i32) {
            v.iter().fold((i32::MAX, i32::MIN), |(lo, hi), &s| {
                let s = s.into();
                (lo.min(s), hi.max(s))
            })
        }

        let (lo, hi) = match self {
            PixelData::Gray8(v) => range(v.as_slice()),
            PixelData::GrayI8(v) => range(v.as_slice()),
            PixelData::Gray16(v) => range(v.as_slice()),
            PixelData::GrayI16(v) => range(v.as_slice()),
            PixelData::Rgba8(_) => (0, 255),
        };

        if lo > hi { (0, 0) } else { (lo, hi) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_pixel_count_is_quarter_of_bytes() {
        assert_eq!(PixelData::Rgba8(vec![0; 32]).pixel_count(), 8);
    }

    #[test]
    fn gray_broadcasts_to_rgb_with_clamp() {
        let data = PixelData::GrayI16(vec![-10, 100, 4000]);
        assert_eq!(data.rgb(0), [0, 0, 0]);
        assert_eq!(data.rgb(1), [100, 100, 100]);
        assert_eq!(data.rgb(2), [255, 255, 255]);
    }

    #[test]
    fn storage_range_follows_sample_type() {
        assert_eq!(PixelData::Gray16(vec![]).storage_range(), (0, 65535));
        assert_eq!(PixelData::GrayI8(vec![]).storage_range(), (-128, 127));
        assert_eq!(PixelData::Rgba8(vec![]).storage_range(), (0, 255));
    }

    #[test]
    fn empty_range_defaults_to_zero() {
        assert_eq!(PixelData::Gray16(vec![]).value_range(), (0, 0));
    }
}
