use crate::error::{RenderError, Result};
use crate::imaging::{Image, PixelData};
use crate::lut::Lut;

/// Applies `lut` to every stored sample of `image`, writing opaque RGBA into `dest`.
///
/// `dest` must hold exactly `width * height * 4` bytes and is fully overwritten.
/// Grayscale intensities are broadcast to RGB; color channels go through the
/// LUT independently.
pub fn composite_to_surface(image: &Image, lut: &Lut, dest: &mut [u8]) -> Result<()> {
    let expected = image.size().pixel_count() * 4;
    if dest.len() != expected {
        return Err(RenderError::DestinationSize { expected, actual: dest.len() });
    }

    match image.pixels() {
        PixelData::Gray8(samples) => write_gray(samples, lut, dest),
        PixelData::GrayI8(samples) => write_gray(samples, lut, dest),
        PixelData::Gray16(samples) => write_gray(samples, lut, dest),
        PixelData::GrayI16(samples) => write_gray(samples, lut, dest),
        PixelData::Rgba8(samples) => {
            for (out, px) in dest.chunks_exact_mut(4).zip(samples.chunks_exact(4)) {
                out[0] = lut.lookup(i32::from(px[0]));
                out[1] = lut.lookup(i32::from(px[1]));
                out[2] = lut.lookup(i32::from(px[2]));
                out[3] = 255;
            }
        }
    }
    Ok(())
}

fn write_gray<T: Copy + Into<i32>>(samples: &[T], lut: &Lut, dest: &mut [u8]) {
    for (out, &sample) in dest.chunks_exact_mut(4).zip(samples) {
        let v = lut.lookup(sample.into());
        out.copy_from_slice(&[v, v, v, 255]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasts_gray_and_forces_opaque() {
        let image = Image::new("g", 2, 1, PixelData::GrayI16(vec![-1, 1])).unwrap();
        let lut = Lut::new(-1, vec![10, 20, 30]);
        let mut dest = vec![7u8; 8];
        composite_to_surface(&image, &lut, &mut dest).unwrap();
        assert_eq!(dest, [10, 10, 10, 255, 30, 30, 30, 255]);
    }

    #[test]
    fn color_channels_use_lut_independently() {
        let image = Image::new("c", 1, 1, PixelData::Rgba8(vec![0, 1, 2, 0])).unwrap();
        let lut = Lut::new(0, vec![100, 101, 102]);
        let mut dest = vec![0u8; 4];
        composite_to_surface(&image, &lut, &mut dest).unwrap();
        assert_eq!(dest, [100, 101, 102, 255]);
    }

    #[test]
    fn rejects_mis_sized_destination() {
        let image = Image::new("g", 2, 2, PixelData::Gray8(vec![0; 4])).unwrap();
        let lut = Lut::new(0, vec![0]);
        let err = composite_to_surface(&image, &lut, &mut [0u8; 4]).unwrap_err();
        assert!(matches!(err, RenderError::DestinationSize { expected: 16, actual: 4 }));
    }
}
