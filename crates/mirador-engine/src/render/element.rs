use std::rc::Rc;

use crate::coords::Affine2;
use crate::imaging::Image;
use crate::viewport::Viewport;

/// Identity of a destination surface. Render state and the CPU render
/// canvas are kept per surface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// What to draw on one destination: image, display parameters and the
/// image-to-surface transform.
#[derive(Debug, Clone)]
pub struct EnabledElement {
    pub surface: SurfaceId,
    /// `None` until the loader delivers the image.
    pub image: Option<Rc<Image>>,
    pub viewport: Viewport,
    /// Maps image pixels to surface pixels (pan, zoom, rotation, flips).
    pub transform: Affine2,
}

impl EnabledElement {
    pub fn new(surface: SurfaceId, image: Rc<Image>, viewport: Viewport) -> Self {
        Self {
            surface,
            image: Some(image),
            viewport,
            transform: Affine2::IDENTITY,
        }
    }

    pub fn with_transform(mut self, transform: Affine2) -> Self {
        self.transform = transform;
        self
    }
}
