use std::fmt;

use super::PixelData;

/// Data kind of an image as seen by the GPU path.
///
/// Selects both the texel packing and the shader program.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Rgb,
}

/// Added to signed samples before packing so they fit an unsigned 16-bit texel.
pub const SIGNED_SAMPLE_OFFSET: i32 = 32_768;

impl SampleKind {
    /// Color images are `Rgb`. Grayscale images are signed when the minimum is
    /// negative and 16-bit when the maximum exceeds 255.
    pub fn classify(color: bool, min_pixel_value: i32, max_pixel_value: i32) -> Self {
        if color {
            return SampleKind::Rgb;
        }
        match (min_pixel_value < 0, max_pixel_value > 255) {
            (false, false) => SampleKind::Uint8,
            (false, true) => SampleKind::Uint16,
            (true, false) => SampleKind::Int8,
            (true, true) => SampleKind::Int16,
        }
    }

    /// Texel channels: one for 8-bit unsigned, two (low/high byte) for signed
    /// or 16-bit samples, three for native color.
    #[inline]
    pub fn channels(self) -> usize {
        match self {
            SampleKind::Uint8 => 1,
            SampleKind::Int8 | SampleKind::Uint16 | SampleKind::Int16 => 2,
            SampleKind::Rgb => 3,
        }
    }

    #[inline]
    pub fn is_signed(self) -> bool {
        matches!(self, SampleKind::Int8 | SampleKind::Int16)
    }

    /// Offset the shader subtracts after decoding a two-channel texel.
    #[inline]
    pub fn sample_offset(self) -> i32 {
        if self.is_signed() { SIGNED_SAMPLE_OFFSET } else { 0 }
    }

    /// Writes the texel for pixel `index` into `out[..self.channels()]`.
    #[inline]
    pub fn pack_texel(self, pixels: &PixelData, index: usize, out: &mut [u8]) {
        match self {
            SampleKind::Uint8 => {
                out[0] = pixels.gray(index).clamp(0, 255) as u8;
            }
            SampleKind::Int8 | SampleKind::Uint16 | SampleKind::Int16 => {
                let packed = (pixels.gray(index) + self.sample_offset()).clamp(0, 0xFFFF) as u16;
                let [lo, hi] = packed.to_le_bytes();
                out[0] = lo;
                out[1] = hi;
            }
            SampleKind::Rgb => {
                out[..3].copy_from_slice(&pixels.rgb(index));
            }
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SampleKind::Uint8 => "uint8",
            SampleKind::Int8 => "int8",
            SampleKind::Uint16 => "uint16",
            SampleKind::Int16 => "int16",
            SampleKind::Rgb => "rgb",
        })
    }
}
