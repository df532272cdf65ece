//! CPU rendering path: LUT application into an RGBA render canvas.

mod composite;
mod compositor;

pub use composite::composite_to_surface;
pub use compositor::{CpuCompositor, CpuFrame};
