//! Destination surfaces.
//!
//! [`Surface2d`] is the small slice of a 2D drawing context the renderer
//! needs: a transform stack, a smoothing flag, clears and image blits.
//! [`PixelCanvas`] is the in-memory implementation used by the CPU path,
//! the studio binary and tests.

mod pixel_canvas;

use image::RgbaImage;

use crate::coords::{Affine2, ColorRgba, Rect, SurfaceSize};

pub use pixel_canvas::PixelCanvas;

/// A 2D drawing target with canvas-style state.
pub trait Surface2d {
    fn size(&self) -> SurfaceSize;

    fn transform(&self) -> Affine2;
    fn set_transform(&mut self, transform: Affine2);

    fn reset_transform(&mut self) {
        self.set_transform(Affine2::IDENTITY);
    }

    /// Fills the whole backing store. The current transform is ignored.
    fn clear(&mut self, color: ColorRgba);

    fn image_smoothing(&self) -> bool;
    fn set_image_smoothing(&mut self, enabled: bool);

    /// Pushes transform and smoothing.
    fn save(&mut self);
    /// Pops the last `save`. Unbalanced calls are ignored.
    fn restore(&mut self);

    /// Draws the `src` region of `image` into `dst` (user space, mapped by the current transform).
    fn draw_image(&mut self, image: &RgbaImage, src: Rect, dst: Rect);
}
