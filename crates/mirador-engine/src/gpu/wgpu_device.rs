//! Headless wgpu backend.
//!
//! Frames render into an offscreen `Rgba8Unorm` target and are read back
//! through a staging buffer, the moral equivalent of a preserved drawing
//! buffer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;

use crate::coords::SurfaceSize;

use super::device::{GpuDevice, GpuError, GpuPlatform, TexelFormat, TextureHandle, TextureUpload, TileGeometry};
use super::lifecycle::{ContextEvent, ContextEventSender};
use super::shader::ShaderVariant;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const INITIAL_QUAD_CAPACITY: usize = 16;

/// Initialization parameters for the wgpu platform.
#[derive(Debug, Clone)]
pub struct GpuInit {
    pub power_preference: wgpu::PowerPreference,

    /// Limits requested from the adapter. `max_texture_dimension_2d` drives tile sizing.
    pub required_limits: wgpu::Limits,

    /// Use a software adapter (CI machines without a GPU).
    pub force_fallback_adapter: bool,

    /// Upper bound on tile texture memory. Allocations beyond it fail with
    /// `OutOfMemory`. RGB tiles are widened to four bytes per texel here, so
    /// this sits above the texture cache budget.
    pub texture_memory_budget: u64,

    /// Report `Restored` right after an unexpected loss so the renderer re-acquires.
    pub restore_on_loss: bool,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_limits: wgpu::Limits::default(),
            force_fallback_adapter: false,
            texture_memory_budget: 768 << 20,
            restore_on_loss: true,
        }
    }
}

/// Acquires [`WgpuDevice`]s.
#[derive(Debug, Clone, Default)]
pub struct WgpuPlatform {
    init: GpuInit,
}

impl WgpuPlatform {
    pub fn new(init: GpuInit) -> Self {
        Self { init }
    }
}

impl GpuPlatform for WgpuPlatform {
    type Device = WgpuDevice;

    fn acquire(&mut self, events: ContextEventSender) -> anyhow::Result<WgpuDevice> {
        pollster::block_on(WgpuDevice::new(&self.init, events))
    }
}

// ── vertex ────────────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct TileVertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

impl TileVertex {
    const ATTRS: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<TileVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }

    fn quad(geometry: &TileGeometry) -> [TileVertex; 4] {
        std::array::from_fn(|i| TileVertex { pos: geometry.vertices[i], uv: geometry.tex_coords[i] })
    }
}

const QUAD_BYTES: u64 = (std::mem::size_of::<TileVertex>() * 4) as u64;

// ── device ────────────────────────────────────────────────────────────────

struct TileTexture {
    bind_group: wgpu::BindGroup,
    // Kept alive for the bind group; destroyed explicitly on delete.
    texture: wgpu::Texture,
    bytes: u64,
}

struct PendingFrame {
    target: SurfaceSize,
    variant: ShaderVariant,
    uniforms: Vec<u8>,
    draws: Vec<(TextureHandle, TileGeometry)>,
}

/// A wgpu device plus the objects tiles are drawn with.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    lost: Arc<AtomicBool>,
    max_dimension: u32,

    texture_budget: u64,
    texture_bytes: u64,
    textures: HashMap<TextureHandle, TileTexture>,
    next_handle: u64,

    uniform_bgl: wgpu::BindGroupLayout,
    texture_bgl: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<ShaderVariant, wgpu::RenderPipeline>,

    sampler: Option<wgpu::Sampler>,
    quad_vbo: Option<wgpu::Buffer>,
    quad_capacity: usize,
    uniform_ubo: Option<wgpu::Buffer>,
    uniform_bind_group: Option<wgpu::BindGroup>,
    uniform_size: u64,
    target: Option<(SurfaceSize, wgpu::Texture)>,

    frame: Option<PendingFrame>,
}

impl WgpuDevice {
    /// Acquires an adapter and device and wires loss reporting into `events`.
    pub async fn new(init: &GpuInit, events: ContextEventSender) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("mirador device"),
                required_features: wgpu::Features::empty(),
                required_limits: init.required_limits.clone(),
                ..Default::default()
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);

        let lost = Arc::new(AtomicBool::new(false));
        let restore_on_loss = init.restore_on_loss;
        let lost_flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            lost_flag.store(true, Ordering::SeqCst);
            log::warn!("wgpu device lost ({reason:?}): {message}");
            events.send(ContextEvent::Lost);
            let intentional = matches!(reason, wgpu::DeviceLostReason::Destroyed);
            if restore_on_loss && !intentional {
                events.send(ContextEvent::Restored);
            }
        });

        device.on_uncaptured_error(Arc::new(|error| {
            log::error!("uncaptured wgpu error: {error}");
        }));

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mirador windowing uniform bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mirador tile texture bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mirador windowing pipeline layout"),
            bind_group_layouts: &[&uniform_bgl, &texture_bgl],
            immediate_size: 0,
        });

        let max_dimension = device.limits().max_texture_dimension_2d;

        Ok(Self {
            device,
            queue,
            lost,
            max_dimension,
            texture_budget: init.texture_memory_budget,
            texture_bytes: 0,
            textures: HashMap::new(),
            next_handle: 0,
            uniform_bgl,
            texture_bgl,
            pipeline_layout,
            pipelines: HashMap::new(),
            sampler: None,
            quad_vbo: None,
            quad_capacity: 0,
            uniform_ubo: None,
            uniform_bind_group: None,
            uniform_size: 0,
            target: None,
            frame: None,
        })
    }

    fn check_lost(&self) -> Result<(), GpuError> {
        if self.lost.load(Ordering::SeqCst) { Err(GpuError::ContextLost) } else { Ok(()) }
    }

    // ── lazy-init helpers ──────────────────────────────────────────────────

    fn ensure_quad_capacity(&mut self, quads: usize) {
        if self.quad_vbo.is_some() && self.quad_capacity >= quads {
            return;
        }
        let capacity = quads.max(INITIAL_QUAD_CAPACITY).next_power_of_two();
        self.quad_vbo = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mirador tile quads"),
            size: QUAD_BYTES * capacity as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.quad_capacity = capacity;
    }

    fn ensure_uniforms(&mut self, size: u64) {
        if self.uniform_ubo.is_some() && self.uniform_size >= size {
            return;
        }
        let ubo = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mirador windowing ubo"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.uniform_bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mirador windowing bind group"),
            layout: &self.uniform_bgl,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: ubo.as_entire_binding() }],
        }));
        self.uniform_ubo = Some(ubo);
        self.uniform_size = size;
    }

    fn ensure_target(&mut self, size: SurfaceSize) {
        if matches!(&self.target, Some((current, _)) if *current == size) {
            return;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("mirador render target"),
            size: wgpu::Extent3d { width: size.width, height: size.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        self.target = Some((size, texture));
    }

    fn read_back(&self, texture: &wgpu::Texture, size: SurfaceSize) -> Result<RgbaImage, GpuError> {
        let unpadded = size.width * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mirador readback"),
            size: u64::from(padded) * u64::from(size.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mirador readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(size.height),
                },
            },
            wgpu::Extent3d { width: size.width, height: size.height, depth_or_array_layers: 1 },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        slice.map_async(wgpu::MapMode::Read, move |r| {
            tx.send(r).ok();
        });
        self.device.poll(wgpu::PollType::wait_indefinitely()).ok();
        self.check_lost()?;
        rx.recv()
            .map_err(|_| GpuError::Backend("readback callback dropped".into()))?
            .map_err(|e| GpuError::Backend(format!("readback mapping failed: {e}")))?;

        let mut pixels = Vec::with_capacity(size.pixel_count() * 4);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        staging.unmap();

        RgbaImage::from_raw(size.width, size.height, pixels)
            .ok_or_else(|| GpuError::Backend("readback size mismatch".into()))
    }
}

impl GpuDevice for WgpuDevice {
    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn init_buffers(&mut self) -> Result<(), GpuError> {
        self.check_lost()?;
        self.ensure_quad_capacity(INITIAL_QUAD_CAPACITY);
        if self.sampler.is_none() {
            // Packed two-channel texels must never be interpolated.
            self.sampler = Some(self.device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("mirador tile sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Nearest,
                min_filter: wgpu::FilterMode::Nearest,
                mipmap_filter: wgpu::MipmapFilterMode::Nearest,
                ..Default::default()
            }));
        }
        Ok(())
    }

    fn link_program(&mut self, variant: ShaderVariant, source: &str, uniform_size: u32) -> Result<(), GpuError> {
        self.check_lost()?;
        let label = format!("mirador {variant} shader");
        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label.as_str()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label.as_str()),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[TileVertex::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        self.ensure_uniforms(u64::from(uniform_size));
        self.pipelines.insert(variant, pipeline);
        Ok(())
    }

    fn create_texture(&mut self, upload: &TextureUpload<'_>) -> Result<TextureHandle, GpuError> {
        self.check_lost()?;
        if upload.size > self.max_dimension {
            return Err(GpuError::TextureTooLarge { size: upload.size, max: self.max_dimension });
        }
        let Some(sampler) = self.sampler.as_ref() else {
            return Err(GpuError::Backend("buffers not initialized".into()));
        };

        let (format, bytes_per_texel, data) = match upload.format {
            TexelFormat::R8 => (wgpu::TextureFormat::R8Unorm, 1, std::borrow::Cow::Borrowed(upload.data)),
            TexelFormat::Rg8 => (wgpu::TextureFormat::Rg8Unorm, 2, std::borrow::Cow::Borrowed(upload.data)),
            TexelFormat::Rgb8 => {
                // No 3-channel format: widen to RGBA.
                let rgba = upload.data.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect();
                (wgpu::TextureFormat::Rgba8Unorm, 4, std::borrow::Cow::Owned(rgba))
            }
        };

        let bytes = u64::from(upload.size) * u64::from(upload.size) * bytes_per_texel;
        if self.texture_bytes + bytes > self.texture_budget {
            return Err(GpuError::OutOfMemory {
                requested: bytes,
                budget: self.texture_budget.saturating_sub(self.texture_bytes),
            });
        }

        let extent = wgpu::Extent3d { width: upload.size, height: upload.size, depth_or_array_layers: 1 };
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("mirador tile"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(scope.pop()) {
            log::warn!("driver refused a {bytes} byte tile: {error}");
            texture.destroy();
            return Err(GpuError::OutOfMemory {
                requested: bytes,
                budget: self.texture_budget.saturating_sub(self.texture_bytes),
            });
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(upload.size * bytes_per_texel as u32),
                rows_per_image: Some(upload.size),
            },
            extent,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mirador tile bind group"),
            layout: &self.texture_bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(sampler) },
            ],
        });

        self.next_handle += 1;
        let handle = TextureHandle(self.next_handle);
        self.texture_bytes += bytes;
        self.textures.insert(handle, TileTexture { bind_group, texture, bytes });
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(tile) = self.textures.remove(&texture) {
            self.texture_bytes -= tile.bytes;
            tile.texture.destroy();
        }
    }

    fn begin_frame(&mut self, target: SurfaceSize, variant: ShaderVariant, uniforms: &[u8]) -> Result<(), GpuError> {
        self.check_lost()?;
        if target.width > self.max_dimension || target.height > self.max_dimension {
            return Err(GpuError::TextureTooLarge {
                size: target.width.max(target.height),
                max: self.max_dimension,
            });
        }
        self.frame = Some(PendingFrame { target, variant, uniforms: uniforms.to_vec(), draws: Vec::new() });
        Ok(())
    }

    fn draw_quad(&mut self, texture: TextureHandle, geometry: &TileGeometry) -> Result<(), GpuError> {
        if !self.textures.contains_key(&texture) {
            return Err(GpuError::UnknownTexture(texture));
        }
        let frame = self.frame.as_mut().ok_or(GpuError::NoActiveFrame)?;
        frame.draws.push((texture, *geometry));
        Ok(())
    }

    fn end_frame(&mut self) -> Result<RgbaImage, GpuError> {
        let frame = self.frame.take().ok_or(GpuError::NoActiveFrame)?;
        self.check_lost()?;

        let scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.ensure_target(frame.target);
        self.ensure_quad_capacity(frame.draws.len());
        self.ensure_uniforms(frame.uniforms.len() as u64);
        if let Some(error) = pollster::block_on(scope.pop()) {
            // Any of these may be invalid; the next frame recreates them.
            self.target = None;
            self.quad_vbo = None;
            self.uniform_ubo = None;
            self.uniform_bind_group = None;
            return Err(GpuError::Backend(format!("frame allocation failed: {error}")));
        }

        let vertices: Vec<TileVertex> = frame.draws.iter().flat_map(|(_, g)| TileVertex::quad(g)).collect();

        // ── immutable borrows ──────────────────────────────────────────────
        let Some(pipeline) = self.pipelines.get(&frame.variant) else {
            return Err(GpuError::Backend(format!("no pipeline linked for {}", frame.variant)));
        };
        let (Some(quad_vbo), Some(ubo), Some(uniform_bg), Some((_, target))) = (
            self.quad_vbo.as_ref(),
            self.uniform_ubo.as_ref(),
            self.uniform_bind_group.as_ref(),
            self.target.as_ref(),
        ) else {
            return Err(GpuError::Backend("device buffers not initialized".into()));
        };

        self.queue.write_buffer(ubo, 0, &frame.uniforms);
        if !vertices.is_empty() {
            self.queue.write_buffer(quad_vbo, 0, bytemuck::cast_slice(&vertices));
        }

        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mirador frame encoder"),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mirador windowing pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, uniform_bg, &[]);
            for (i, (handle, _)) in frame.draws.iter().enumerate() {
                // Deleted between draw_quad and end_frame: skip, like a dropped tile.
                let Some(tile) = self.textures.get(handle) else { continue };
                let start = i as u64 * QUAD_BYTES;
                rpass.set_bind_group(1, &tile.bind_group, &[]);
                rpass.set_vertex_buffer(0, quad_vbo.slice(start..start + QUAD_BYTES));
                rpass.draw(0..4, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        self.read_back(target, frame.target)
    }
}
