//! Render orchestration.
//!
//! [`Renderer`] is the entry point: it prepares the destination surface,
//! picks the CPU or GPU path from the element's viewport, draws the result
//! and records what was rendered.

mod element;
mod renderer;

pub use element::{EnabledElement, SurfaceId};
pub use renderer::{RenderOutcome, RenderPath, Renderer};
