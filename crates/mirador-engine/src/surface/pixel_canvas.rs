use image::{Rgba, RgbaImage};

use crate::coords::{Affine2, ColorRgba, Rect, SurfaceSize, Vec2};

use super::Surface2d;

#[derive(Debug, Copy, Clone)]
struct DrawState {
    transform: Affine2,
    smoothing: bool,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            transform: Affine2::IDENTITY,
            smoothing: true,
        }
    }
}

/// Software RGBA canvas.
///
/// Blits inverse-map each covered device pixel into the source image and
/// sample it (nearest or bilinear), then blend source-over.
#[derive(Debug, Clone)]
pub struct PixelCanvas {
    pixels: RgbaImage,
    state: DrawState,
    stack: Vec<DrawState>,
}

impl PixelCanvas {
    /// A transparent-black canvas.
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            pixels: RgbaImage::new(size.width, size.height),
            state: DrawState::default(),
            stack: Vec::new(),
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }

    /// Reallocates the backing store; contents become transparent black.
    pub fn resize(&mut self, size: SurfaceSize) {
        if self.size() != size {
            self.pixels = RgbaImage::new(size.width, size.height);
        }
    }

    fn sample_nearest(image: &RgbaImage, bounds: (u32, u32, u32, u32), s: Vec2) -> [f32; 4] {
        let (x0, y0, x1, y1) = bounds;
        let x = (s.x.floor() as i64).clamp(i64::from(x0), i64::from(x1) - 1) as u32;
        let y = (s.y.floor() as i64).clamp(i64::from(y0), i64::from(y1) - 1) as u32;
        let p = image.get_pixel(x, y).0;
        [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
    }

    fn sample_bilinear(image: &RgbaImage, bounds: (u32, u32, u32, u32), s: Vec2) -> [f32; 4] {
        let (x0, y0, x1, y1) = bounds;
        let fx = s.x - 0.5;
        let fy = s.y - 0.5;
        let ix = fx.floor();
        let iy = fy.floor();
        let tx = fx - ix;
        let ty = fy - iy;

        let clamp_x = |x: i64| x.clamp(i64::from(x0), i64::from(x1) - 1) as u32;
        let clamp_y = |y: i64| y.clamp(i64::from(y0), i64::from(y1) - 1) as u32;
        let (xa, xb) = (clamp_x(ix as i64), clamp_x(ix as i64 + 1));
        let (ya, yb) = (clamp_y(iy as i64), clamp_y(iy as i64 + 1));

        let p00 = image.get_pixel(xa, ya).0;
        let p10 = image.get_pixel(xb, ya).0;
        let p01 = image.get_pixel(xa, yb).0;
        let p11 = image.get_pixel(xb, yb).0;

        let mut out = [0.0; 4];
        for c in 0..4 {
            let top = p00[c] as f32 * (1.0 - tx) + p10[c] as f32 * tx;
            let bottom = p01[c] as f32 * (1.0 - tx) + p11[c] as f32 * tx;
            out[c] = top * (1.0 - ty) + bottom * ty;
        }
        out
    }

    fn blend(dst: &mut Rgba<u8>, src: [f32; 4]) {
        let a = src[3] / 255.0;
        if a <= 0.0 {
            return;
        }
        let dst_a = dst.0[3] as f32 / 255.0;
        let out_a = a + dst_a * (1.0 - a);
        for c in 0..3 {
            let d = dst.0[c] as f32;
            let v = if out_a > 0.0 {
                (src[c] * a + d * dst_a * (1.0 - a)) / out_a
            } else {
                0.0
            };
            dst.0[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

impl Surface2d for PixelCanvas {
    fn size(&self) -> SurfaceSize {
        SurfaceSize::new(self.pixels.width(), self.pixels.height())
    }

    fn transform(&self) -> Affine2 {
        self.state.transform
    }

    fn set_transform(&mut self, transform: Affine2) {
        self.state.transform = transform;
    }

    fn clear(&mut self, color: ColorRgba) {
        let px = Rgba(color.to_rgba8());
        for p in self.pixels.pixels_mut() {
            *p = px;
        }
    }

    fn image_smoothing(&self) -> bool {
        self.state.smoothing
    }

    fn set_image_smoothing(&mut self, enabled: bool) {
        self.state.smoothing = enabled;
    }

    fn save(&mut self) {
        self.stack.push(self.state);
    }

    fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    fn draw_image(&mut self, image: &RgbaImage, src: Rect, dst: Rect) {
        let Some(src) = src.intersect(Rect::from_size(SurfaceSize::new(image.width(), image.height())))
        else {
            return;
        };
        if dst.is_empty() {
            return;
        }
        let Some(inverse) = self.state.transform.invert() else {
            log::trace!("draw_image skipped: singular transform");
            return;
        };

        // Device-space bounding box of the destination quad.
        let max = dst.max();
        let corners = [dst.origin, Vec2::new(max.x, dst.origin.y), Vec2::new(dst.origin.x, max.y), max]
            .map(|c| self.state.transform.apply(c));
        let (mut lo, mut hi) = (corners[0], corners[0]);
        for c in &corners[1..] {
            lo = Vec2::new(lo.x.min(c.x), lo.y.min(c.y));
            hi = Vec2::new(hi.x.max(c.x), hi.y.max(c.y));
        }
        let x_start = lo.x.floor().max(0.0) as u32;
        let y_start = lo.y.floor().max(0.0) as u32;
        let x_end = (hi.x.ceil().max(0.0) as u32).min(self.pixels.width());
        let y_end = (hi.y.ceil().max(0.0) as u32).min(self.pixels.height());

        let bounds = (
            src.origin.x.floor() as u32,
            src.origin.y.floor() as u32,
            (src.max().x.ceil() as u32).min(image.width()),
            (src.max().y.ceil() as u32).min(image.height()),
        );
        let scale = Vec2::new(src.size.x / dst.size.x, src.size.y / dst.size.y);
        let smoothing = self.state.smoothing;

        for y in y_start..y_end {
            for x in x_start..x_end {
                let user = inverse.apply(Vec2::new(x as f32 + 0.5, y as f32 + 0.5));
                if !dst.contains(user) {
                    continue;
                }
                let rel = user - dst.origin;
                let s = Vec2::new(src.origin.x + rel.x * scale.x, src.origin.y + rel.y * scale.y);
                let color = if smoothing {
                    Self::sample_bilinear(image, bounds, s)
                } else {
                    Self::sample_nearest(image, bounds, s)
                };
                Self::blend(self.pixels.get_pixel_mut(x, y), color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> RgbaImage {
        RgbaImage::from_fn(2, 2, |x, y| {
            if (x + y) % 2 == 0 { Rgba([255, 255, 255, 255]) } else { Rgba([0, 0, 0, 255]) }
        })
    }

    #[test]
    fn clear_ignores_transform() {
        let mut canvas = PixelCanvas::new(SurfaceSize::new(4, 4));
        canvas.set_transform(Affine2::scale(0.0, 0.0));
        canvas.clear(ColorRgba::black());
        assert!(canvas.pixels().pixels().all(|p| p.0 == [0, 0, 0, 255]));
    }

    #[test]
    fn save_restore_round_trips_state() {
        let mut canvas = PixelCanvas::new(SurfaceSize::new(1, 1));
        canvas.save();
        canvas.set_transform(Affine2::translation(3.0, 4.0));
        canvas.set_image_smoothing(false);
        canvas.restore();
        assert_eq!(canvas.transform(), Affine2::IDENTITY);
        assert!(canvas.image_smoothing());
        // Unbalanced restore is a no-op.
        canvas.restore();
    }

    #[test]
    fn nearest_magnification_replicates_pixels() {
        let mut canvas = PixelCanvas::new(SurfaceSize::new(4, 4));
        canvas.set_image_smoothing(false);
        canvas.set_transform(Affine2::scale(2.0, 2.0));
        let img = checker();
        canvas.draw_image(&img, Rect::new(0.0, 0.0, 2.0, 2.0), Rect::new(0.0, 0.0, 2.0, 2.0));

        let px = canvas.pixels();
        assert_eq!(px.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(px.get_pixel(1, 1).0, [255, 255, 255, 255]);
        assert_eq!(px.get_pixel(2, 0).0, [0, 0, 0, 255]);
        assert_eq!(px.get_pixel(3, 3).0, [255, 255, 255, 255]);
    }

    #[test]
    fn translation_offsets_the_blit() {
        let mut canvas = PixelCanvas::new(SurfaceSize::new(3, 3));
        canvas.set_image_smoothing(false);
        canvas.set_transform(Affine2::translation(1.0, 1.0));
        let img = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 255]));
        canvas.draw_image(&img, Rect::new(0.0, 0.0, 1.0, 1.0), Rect::new(0.0, 0.0, 1.0, 1.0));

        assert_eq!(canvas.pixels().get_pixel(1, 1).0, [10, 20, 30, 255]);
        assert_eq!(canvas.pixels().get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn horizontal_flip() {
        let mut canvas = PixelCanvas::new(SurfaceSize::new(2, 1));
        canvas.set_image_smoothing(false);
        canvas.set_transform(Affine2::new(-1.0, 0.0, 0.0, 1.0, 2.0, 0.0));
        let img = RgbaImage::from_fn(2, 1, |x, _| Rgba([x as u8 * 100, 0, 0, 255]));
        canvas.draw_image(&img, Rect::new(0.0, 0.0, 2.0, 1.0), Rect::new(0.0, 0.0, 2.0, 1.0));

        assert_eq!(canvas.pixels().get_pixel(0, 0).0[0], 100);
        assert_eq!(canvas.pixels().get_pixel(1, 0).0[0], 0);
    }

    #[test]
    fn bilinear_blends_neighbours() {
        let mut canvas = PixelCanvas::new(SurfaceSize::new(4, 1));
        canvas.set_transform(Affine2::scale(2.0, 1.0));
        let img = RgbaImage::from_fn(2, 1, |x, _| Rgba([x as u8 * 200, 0, 0, 255]));
        canvas.draw_image(&img, Rect::new(0.0, 0.0, 2.0, 1.0), Rect::new(0.0, 0.0, 2.0, 1.0));

        let row: Vec<u8> = (0..4).map(|x| canvas.pixels().get_pixel(x, 0).0[0]).collect();
        assert_eq!(row[0], 0);
        assert!(row[1] > 0 && row[1] < 200);
        assert!(row[2] > row[1] && row[2] < 200);
        assert_eq!(row[3], 200);
    }
}
