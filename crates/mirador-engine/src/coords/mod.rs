//! Coordinate and geometry types shared by the CPU and GPU paths.
//!
//! Canonical CPU space:
//! - Pixels, origin top-left
//! - +X right, +Y down
//!
//! Image space is the source image's pixel grid; canvas space is the
//! destination surface's pixel grid. An [`Affine2`] maps the former to the latter.

mod affine;
mod color;
mod rect;
mod size;
mod vec2;

pub use affine::Affine2;
pub use color::ColorRgba;
pub use rect::Rect;
pub use size::SurfaceSize;
pub use vec2::Vec2;
