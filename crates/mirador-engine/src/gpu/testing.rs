//! Headless stand-ins for a GPU, for tests.
//!
//! A [`RecordingPlatform`] and every [`RecordingDevice`] it hands out share
//! one record, so a test can keep a clone of the platform, give the original
//! to a renderer, and still inspect uploads, draws and deletions afterwards.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::bail;
use image::{Rgba, RgbaImage};

use crate::coords::SurfaceSize;

use super::device::{GpuDevice, GpuError, GpuPlatform, TexelFormat, TextureHandle, TextureUpload, TileGeometry};
use super::lifecycle::{ContextEvent, ContextEventSender};
use super::shader::ShaderVariant;

/// Colour of every pixel a recorded frame reads back as.
pub const RECORDED_FRAME_PIXEL: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpload {
    pub texture: TextureHandle,
    pub size: u32,
    pub format: TexelFormat,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub texture: TextureHandle,
    pub geometry: TileGeometry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub target: SurfaceSize,
    pub variant: ShaderVariant,
    pub uniforms: Vec<u8>,
    pub draws: Vec<RecordedDraw>,
}

#[derive(Debug, Default)]
struct Record {
    max_dimension: u32,
    uploads: Vec<RecordedUpload>,
    frames: Vec<RecordedFrame>,
    linked: Vec<ShaderVariant>,
    live: HashMap<TextureHandle, usize>,
    next_handle: u64,
    allocations_left: Option<usize>,
    memory_budget: Option<usize>,
    lost: bool,
    acquisitions: usize,
    fail_acquire: bool,
    events: Option<ContextEventSender>,
    attempts: usize,
}

/// A device that records every call instead of touching hardware.
#[derive(Debug)]
pub struct RecordingDevice {
    record: Rc<RefCell<Record>>,
    frame: Option<RecordedFrame>,
}

impl RecordingDevice {
    pub fn new(max_dimension: u32) -> Self {
        let record = Record { max_dimension, ..Record::default() };
        Self { record: Rc::new(RefCell::new(record)), frame: None }
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.record.borrow().uploads.clone()
    }

    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.record.borrow().frames.clone()
    }

    pub fn linked(&self) -> Vec<ShaderVariant> {
        self.record.borrow().linked.clone()
    }

    pub fn live_textures(&self) -> usize {
        self.record.borrow().live.len()
    }

    /// The next `n` allocations succeed; later ones fail with `OutOfMemory`.
    pub fn fail_allocations_after(&mut self, n: usize) {
        self.record.borrow_mut().allocations_left = Some(n);
    }

    /// Caps live texture bytes. Deleting textures frees room again.
    pub fn set_memory_budget(&mut self, bytes: usize) {
        self.record.borrow_mut().memory_budget = Some(bytes);
    }

    /// Allocation attempts so far, refused ones included.
    pub fn allocation_attempts(&self) -> usize {
        self.record.borrow().attempts
    }

    fn check_lost(&self) -> Result<(), GpuError> {
        if self.record.borrow().lost { Err(GpuError::ContextLost) } else { Ok(()) }
    }
}

impl GpuDevice for RecordingDevice {
    fn max_texture_dimension(&self) -> u32 {
        self.record.borrow().max_dimension
    }

    fn init_buffers(&mut self) -> Result<(), GpuError> {
        self.check_lost()
    }

    fn link_program(&mut self, variant: ShaderVariant, _source: &str, _uniform_size: u32) -> Result<(), GpuError> {
        self.check_lost()?;
        self.record.borrow_mut().linked.push(variant);
        Ok(())
    }

    fn create_texture(&mut self, upload: &TextureUpload<'_>) -> Result<TextureHandle, GpuError> {
        self.check_lost()?;
        let mut record = self.record.borrow_mut();
        if upload.size > record.max_dimension {
            return Err(GpuError::TextureTooLarge { size: upload.size, max: record.max_dimension });
        }
        record.attempts += 1;
        let bytes = upload.byte_len();
        if let Some(budget) = record.memory_budget {
            let live: usize = record.live.values().sum();
            if live + bytes > budget {
                return Err(GpuError::OutOfMemory {
                    requested: bytes as u64,
                    budget: budget.saturating_sub(live) as u64,
                });
            }
        }
        if let Some(left) = record.allocations_left.as_mut() {
            if *left == 0 {
                return Err(GpuError::OutOfMemory { requested: upload.byte_len() as u64, budget: 0 });
            }
            *left -= 1;
        }

        record.next_handle += 1;
        let texture = TextureHandle(record.next_handle);
        record.live.insert(texture, bytes);
        record.uploads.push(RecordedUpload {
            texture,
            size: upload.size,
            format: upload.format,
            data: upload.data.to_vec(),
        });
        Ok(texture)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.record.borrow_mut().live.remove(&texture);
    }

    fn begin_frame(&mut self, target: SurfaceSize, variant: ShaderVariant, uniforms: &[u8]) -> Result<(), GpuError> {
        self.check_lost()?;
        self.frame = Some(RecordedFrame { target, variant, uniforms: uniforms.to_vec(), draws: Vec::new() });
        Ok(())
    }

    fn draw_quad(&mut self, texture: TextureHandle, geometry: &TileGeometry) -> Result<(), GpuError> {
        self.check_lost()?;
        if !self.record.borrow().live.contains_key(&texture) {
            return Err(GpuError::UnknownTexture(texture));
        }
        let frame = self.frame.as_mut().ok_or(GpuError::NoActiveFrame)?;
        frame.draws.push(RecordedDraw { texture, geometry: *geometry });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<RgbaImage, GpuError> {
        self.check_lost()?;
        let frame = self.frame.take().ok_or(GpuError::NoActiveFrame)?;
        let image = RgbaImage::from_pixel(frame.target.width, frame.target.height, RECORDED_FRAME_PIXEL);
        self.record.borrow_mut().frames.push(frame);
        Ok(image)
    }
}

/// Hands out [`RecordingDevice`]s and plays the platform's loss/restore events.
#[derive(Debug, Clone)]
pub struct RecordingPlatform {
    record: Rc<RefCell<Record>>,
}

impl RecordingPlatform {
    pub fn new(max_dimension: u32) -> Self {
        let record = Record { max_dimension, ..Record::default() };
        Self { record: Rc::new(RefCell::new(record)) }
    }

    /// Invalidates the current device and signals `Lost`.
    pub fn lose_context(&self) {
        let mut record = self.record.borrow_mut();
        record.lost = true;
        if let Some(events) = &record.events {
            events.send(ContextEvent::Lost);
        }
    }

    /// Makes the current device fail with `ContextLost` without signalling anything.
    pub fn invalidate_device(&self) {
        self.record.borrow_mut().lost = true;
    }

    /// Signals `Restored`. The next acquisition yields a working device.
    pub fn restore_context(&self) {
        if let Some(events) = &self.record.borrow().events {
            events.send(ContextEvent::Restored);
        }
    }

    pub fn set_fail_acquire(&self, fail: bool) {
        self.record.borrow_mut().fail_acquire = fail;
    }

    pub fn acquisitions(&self) -> usize {
        self.record.borrow().acquisitions
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.record.borrow().uploads.clone()
    }

    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.record.borrow().frames.clone()
    }

    pub fn live_textures(&self) -> usize {
        self.record.borrow().live.len()
    }
}

impl GpuPlatform for RecordingPlatform {
    type Device = RecordingDevice;

    fn acquire(&mut self, events: ContextEventSender) -> anyhow::Result<RecordingDevice> {
        let mut record = self.record.borrow_mut();
        record.events = Some(events);
        if record.fail_acquire {
            bail!("recording platform configured to refuse a context");
        }
        record.acquisitions += 1;
        record.lost = false;
        record.live.clear();
        Ok(RecordingDevice { record: Rc::clone(&self.record), frame: None })
    }
}
