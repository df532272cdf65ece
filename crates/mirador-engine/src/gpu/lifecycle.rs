//! GPU context ownership and loss recovery.
//!
//! The platform reports loss and restoration asynchronously through a
//! [`ContextEventSender`]. Events are drained at the start of every render
//! (and on [`GpuRenderer::pump_events`]), so state changes happen between
//! renders, never during one.

use std::sync::mpsc::{self, Receiver, Sender};

use image::{Rgba, RgbaImage};

use crate::config::RendererConfig;
use crate::coords::{Affine2, SurfaceSize};
use crate::error::{RenderError, Result};
use crate::imaging::{Image, ImageId};
use crate::viewport::Viewport;

use super::compositor::GpuCompositor;
use super::device::{GpuDevice, GpuError, GpuPlatform};
use super::texture_cache::TextureCache;
use super::tiling::TilingGenerator;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    /// `generation` increases with every successful (re)initialization.
    Initialized { generation: u64 },
    Lost,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContextEvent {
    Lost,
    Restored,
}

/// Cloneable, `Send` handle the platform uses to report context events.
#[derive(Debug, Clone)]
pub struct ContextEventSender(Sender<ContextEvent>);

impl ContextEventSender {
    /// Delivery is best effort: events sent after the renderer is dropped are discarded.
    pub fn send(&self, event: ContextEvent) {
        let _ = self.0.send(event);
    }
}

/// Result of a GPU render call.
#[derive(Debug)]
pub struct GpuFrame {
    /// Destination-sized pixels, to be drawn 1:1.
    pub pixels: RgbaImage,
    /// True when no context was available and the frame is plain black.
    pub blank: bool,
}

impl GpuFrame {
    fn blank(target: SurfaceSize) -> Self {
        Self {
            pixels: RgbaImage::from_pixel(target.width, target.height, Rgba([0, 0, 0, 255])),
            blank: true,
        }
    }
}

/// Owns the GPU context and everything tied to it: linked programs and the texture cache.
pub struct GpuRenderer<P: GpuPlatform> {
    platform: P,
    device: Option<P::Device>,
    state: ContextState,
    generation: u64,
    events_tx: Sender<ContextEvent>,
    events_rx: Receiver<ContextEvent>,
    compositor: GpuCompositor,
    textures: TextureCache,
    tiler: TilingGenerator,
}

impl<P: GpuPlatform> GpuRenderer<P> {
    pub fn new(platform: P, config: &RendererConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            platform,
            device: None,
            state: ContextState::Uninitialized,
            generation: 0,
            events_tx,
            events_rx,
            compositor: GpuCompositor::new(),
            textures: TextureCache::new(config.texture_cache_max_bytes),
            tiler: TilingGenerator::new(config.tiling),
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn texture_cache(&self) -> &TextureCache {
        &self.textures
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// A sender for this renderer's context events.
    pub fn event_sender(&self) -> ContextEventSender {
        ContextEventSender(self.events_tx.clone())
    }

    /// Acquires a context, allocates buffers and links every program.
    pub fn initialize(&mut self) -> Result<()> {
        let mut device = self
            .platform
            .acquire(self.event_sender())
            .map_err(RenderError::ContextCreation)?;
        device.init_buffers()?;
        self.compositor.link_programs(&mut device)?;

        self.generation += 1;
        self.device = Some(device);
        self.state = ContextState::Initialized { generation: self.generation };
        log::info!("GPU context initialized (generation {})", self.generation);
        Ok(())
    }

    /// Applies every pending context event.
    pub fn pump_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: ContextEvent) {
        match event {
            ContextEvent::Lost => {
                if self.state == ContextState::Lost {
                    return;
                }
                log::warn!("GPU context lost");
                self.state = ContextState::Lost;
                self.device = None;
                self.compositor.reset();
            }
            ContextEvent::Restored => {
                if self.state != ContextState::Lost {
                    log::debug!("ignoring context restore in state {:?}", self.state);
                    return;
                }
                // Every handle in the cache belonged to the lost context.
                self.textures.purge_all(None);
                if let Err(err) = self.initialize() {
                    log::error!("GPU context restore failed: {err}");
                    self.device = None;
                    self.compositor.reset();
                    self.state = ContextState::Lost;
                }
            }
        }
    }

    /// Drops one image's tiles.
    pub fn evict(&mut self, id: &ImageId) {
        match self.device.as_mut() {
            Some(device) => self.textures.evict(id, device),
            None => log::debug!("evict of {id} skipped: no GPU context"),
        }
    }

    /// Drops every cached tile set.
    pub fn purge_textures(&mut self) {
        match self.device.as_mut() {
            Some(device) => self.textures.purge_all(Some(device as &mut dyn GpuDevice)),
            None => self.textures.purge_all(None),
        }
    }

    /// Renders `image` into a `target`-sized frame.
    ///
    /// Initializes the context on first use. While the context is lost the
    /// result is a blank frame; a loss detected mid-draw is treated the same.
    pub fn render(
        &mut self,
        image: &Image,
        viewport: &Viewport,
        transform: Affine2,
        target: SurfaceSize,
    ) -> Result<GpuFrame> {
        if !target.is_valid() {
            return Err(RenderError::InvalidTarget { width: target.width, height: target.height });
        }

        self.pump_events();
        match self.state {
            ContextState::Uninitialized => self.initialize()?,
            ContextState::Lost => return Ok(GpuFrame::blank(target)),
            ContextState::Initialized { .. } => {}
        }

        let Some(device) = self.device.as_mut() else {
            return Ok(GpuFrame::blank(target));
        };

        let texture = self.textures.get_or_create(image, &mut self.tiler, device);
        let result = self
            .compositor
            .render_to_surface(device, texture, image, viewport, transform, target);

        match result {
            Ok(pixels) => Ok(GpuFrame { pixels, blank: false }),
            Err(RenderError::Gpu(GpuError::ContextLost)) => {
                self.handle_event(ContextEvent::Lost);
                Ok(GpuFrame::blank(target))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::testing::{RecordingPlatform, RECORDED_FRAME_PIXEL};
    use crate::imaging::PixelData;
    use crate::viewport::Voi;

    fn image(id: &str) -> Image {
        Image::new(id, 600, 600, PixelData::Gray16(vec![1000; 600 * 600])).unwrap()
    }

    fn renderer(platform: &RecordingPlatform) -> GpuRenderer<RecordingPlatform> {
        GpuRenderer::new(platform.clone(), &RendererConfig::default())
    }

    fn vp() -> Viewport {
        Viewport::new(Voi::new(2000.0, 1000.0))
    }

    const TARGET: SurfaceSize = SurfaceSize::new(64, 48);

    // ── initialization ────────────────────────────────────────────────────

    #[test]
    fn first_render_initializes_context() {
        let platform = RecordingPlatform::new(2048);
        let mut gpu = renderer(&platform);
        assert_eq!(gpu.state(), ContextState::Uninitialized);

        let frame = gpu.render(&image("a"), &vp(), Affine2::IDENTITY, TARGET).unwrap();
        assert!(!frame.blank);
        assert_eq!(frame.pixels.get_pixel(0, 0), &RECORDED_FRAME_PIXEL);
        assert_eq!(gpu.state(), ContextState::Initialized { generation: 1 });
        assert_eq!(platform.acquisitions(), 1);
    }

    #[test]
    fn acquisition_failure_is_reported() {
        let platform = RecordingPlatform::new(2048);
        platform.set_fail_acquire(true);
        let mut gpu = renderer(&platform);

        let err = gpu.render(&image("a"), &vp(), Affine2::IDENTITY, TARGET).unwrap_err();
        assert!(matches!(err, RenderError::ContextCreation(_)));
        assert!(err.to_string().contains("refuse"));
        assert_eq!(gpu.state(), ContextState::Uninitialized);
    }

    #[test]
    fn repeated_renders_reuse_textures() {
        let platform = RecordingPlatform::new(2048);
        let mut gpu = renderer(&platform);
        let img = image("a");
        gpu.render(&img, &vp(), Affine2::IDENTITY, TARGET).unwrap();
        gpu.render(&img, &vp(), Affine2::IDENTITY, TARGET).unwrap();

        assert_eq!(platform.uploads().len(), 4);
        assert_eq!(platform.frames().len(), 2);
    }

    // ── loss and restore ──────────────────────────────────────────────────

    #[test]
    fn render_while_lost_is_blank() {
        let platform = RecordingPlatform::new(2048);
        let mut gpu = renderer(&platform);
        let img = image("a");
        gpu.render(&img, &vp(), Affine2::IDENTITY, TARGET).unwrap();

        platform.lose_context();
        let frame = gpu.render(&img, &vp(), Affine2::IDENTITY, TARGET).unwrap();
        assert!(frame.blank);
        assert_eq!(frame.pixels.dimensions(), (64, 48));
        assert_eq!(frame.pixels.get_pixel(3, 3).0, [0, 0, 0, 255]);
        assert_eq!(gpu.state(), ContextState::Lost);
    }

    #[test]
    fn restore_purges_cache_then_repopulates() {
        let platform = RecordingPlatform::new(2048);
        let mut gpu = renderer(&platform);
        let img = image("a");
        gpu.render(&img, &vp(), Affine2::IDENTITY, TARGET).unwrap();
        assert_eq!(gpu.texture_cache().len(), 1);

        platform.lose_context();
        platform.restore_context();
        gpu.pump_events();

        assert!(gpu.texture_cache().is_empty());
        assert_eq!(gpu.texture_cache().size_in_bytes(), 0);
        assert_eq!(gpu.state(), ContextState::Initialized { generation: 2 });
        assert_eq!(platform.acquisitions(), 2);

        let frame = gpu.render(&img, &vp(), Affine2::IDENTITY, TARGET).unwrap();
        assert!(!frame.blank);
        assert_eq!(gpu.texture_cache().len(), 1);
        assert_eq!(platform.uploads().len(), 8);
        assert_eq!(platform.live_textures(), 4);
        assert_eq!(platform.frames().last().unwrap().draws.len(), 4);
    }

    #[test]
    fn loss_detected_mid_draw_yields_blank_frame() {
        let platform = RecordingPlatform::new(2048);
        let mut gpu = renderer(&platform);
        let img = image("a");
        gpu.render(&img, &vp(), Affine2::IDENTITY, TARGET).unwrap();

        // The device fails before the platform's event arrives.
        platform.invalidate_device();
        assert_eq!(gpu.state(), ContextState::Initialized { generation: 1 });

        let frame = gpu.render(&img, &vp(), Affine2::IDENTITY, TARGET).unwrap();
        assert!(frame.blank);
        assert_eq!(gpu.state(), ContextState::Lost);
    }

    #[test]
    fn failed_restore_stays_lost() {
        let platform = RecordingPlatform::new(2048);
        let mut gpu = renderer(&platform);
        gpu.render(&image("a"), &vp(), Affine2::IDENTITY, TARGET).unwrap();

        platform.lose_context();
        platform.set_fail_acquire(true);
        platform.restore_context();

        let frame = gpu.render(&image("a"), &vp(), Affine2::IDENTITY, TARGET).unwrap();
        assert!(frame.blank);
        assert_eq!(gpu.state(), ContextState::Lost);
        assert!(gpu.texture_cache().is_empty());
    }

    #[test]
    fn restore_before_first_init_is_ignored() {
        let platform = RecordingPlatform::new(2048);
        let mut gpu = renderer(&platform);
        gpu.handle_event(ContextEvent::Restored);
        assert_eq!(gpu.state(), ContextState::Uninitialized);
        assert_eq!(platform.acquisitions(), 0);
    }

    // ── cache control ─────────────────────────────────────────────────────

    #[test]
    fn evict_and_purge_release_textures() {
        let platform = RecordingPlatform::new(2048);
        let mut gpu = renderer(&platform);
        let (a, b) = (image("a"), image("b"));
        gpu.render(&a, &vp(), Affine2::IDENTITY, TARGET).unwrap();
        gpu.render(&b, &vp(), Affine2::IDENTITY, TARGET).unwrap();
        assert_eq!(platform.live_textures(), 8);

        gpu.evict(a.id());
        assert_eq!(platform.live_textures(), 4);
        gpu.purge_textures();
        assert_eq!(platform.live_textures(), 0);
        assert!(gpu.texture_cache().is_empty());
    }

    #[test]
    fn invalid_target_is_rejected() {
        let platform = RecordingPlatform::new(2048);
        let mut gpu = renderer(&platform);
        let err = gpu.render(&image("a"), &vp(), Affine2::IDENTITY, SurfaceSize::new(0, 10)).unwrap_err();
        assert!(matches!(err, RenderError::InvalidTarget { width: 0, height: 10 }));
    }
}
