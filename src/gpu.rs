// ============================================================================
// gpu.rs — Heatmask
// wgpu implementation of the compute backend: device setup, record buffers,
// mask texture, static bindings, dispatch and mask readback.
// ============================================================================

use std::sync::mpsc;

use wgpu::util::DeviceExt;

use crate::aggregate::{BufferRecord, RECORD_STRIDE};
use crate::backend::{ComputeBackend, DeviceResource, DispatchJob};
use crate::config::StaticParameters;
use crate::error::{HeatmaskError, ResourceKind};
use crate::pipeline::{
    bg_buffer, bg_sampler, bg_view, create_heat_kernel, FrameUniforms, HeatKernel, StaticUniforms,
    MASK_FORMAT, NOISE_FORMAT,
};

// ======================== Device ========================

/// Request an adapter and device with no surface attached.
pub fn request_headless_device() -> Result<(wgpu::Device, wgpu::Queue), HeatmaskError> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or(HeatmaskError::NoAdapter)?;

    log::info!(
        "GPU adapter: {:?} ({:?})",
        adapter.get_info().name,
        adapter.get_info().backend
    );

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("heatmask_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
        },
        None,
    ))?;

    Ok((device, queue))
}

// ======================== Resources ========================

/// Storage buffer of `BufferRecord`s.
pub struct GpuRecordBuffer {
    pub buffer: wgpu::Buffer,
    pub capacity: usize,
    id: u64,
}

impl DeviceResource for GpuRecordBuffer {
    fn release(self) {
        self.buffer.destroy();
    }
}

/// The mask texture: storage-write for the kernel, sampled by consumers.
pub struct MaskTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub edge: u32,
    id: u64,
}

impl DeviceResource for MaskTexture {
    fn release(self) {
        self.texture.destroy();
    }
}

struct StaticBinding {
    noise_texture: wgpu::Texture,
    noise_view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    id: u64,
}

struct CachedBindGroup {
    // (record buffer, mask texture, static binding)
    key: (u64, u64, u64),
    group: wgpu::BindGroup,
}

// ======================== Backend ========================

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    kernel: HeatKernel,
    static_buffer: wgpu::Buffer,
    frame_buffer: wgpu::Buffer,
    statics: Option<StaticBinding>,
    bind_group: Option<CachedBindGroup>,
    next_id: u64,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let kernel = create_heat_kernel(&device);

        let static_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("heat_static_params"),
            size: std::mem::size_of::<StaticUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("heat_frame_params"),
            contents: bytemuck::bytes_of(&FrameUniforms::new(0)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Self {
            device,
            queue,
            kernel,
            static_buffer,
            frame_buffer,
            statics: None,
            bind_group: None,
            next_id: 0,
        }
    }

    /// Create a headless device and a backend on it.
    pub fn headless() -> Result<Self, HeatmaskError> {
        let (device, queue) = request_headless_device()?;
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Run `create` inside an out-of-memory error scope.
    fn guarded<T>(
        &self,
        resource: ResourceKind,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, HeatmaskError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(HeatmaskError::exhausted(resource, err.to_string())),
            None => Ok(value),
        }
    }

    /// Copy the mask back to the CPU as tightly packed RGBA8 rows.
    ///
    /// Blocks until the GPU has finished all submitted work.
    pub fn read_mask(&self, mask: &MaskTexture) -> Result<Vec<u8>, HeatmaskError> {
        let edge = mask.edge;
        let row_bytes = edge * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = (row_bytes + align - 1) / align * align;

        let readback = self.guarded(ResourceKind::ReadbackBuffer, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("mask_readback"),
                size: padded_row as u64 * edge as u64,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mask_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &mask.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(edge),
                },
            },
            wgpu::Extent3d {
                width: edge,
                height: edge,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| HeatmaskError::Readback(e.to_string()))?
            .map_err(|e| HeatmaskError::Readback(e.to_string()))?;

        let mut pixels = Vec::with_capacity((row_bytes * edge) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded_row as usize) {
                pixels.extend_from_slice(&row[..row_bytes as usize]);
            }
        }
        readback.unmap();
        readback.destroy();
        Ok(pixels)
    }
}

impl ComputeBackend for WgpuBackend {
    type RecordBuffer = GpuRecordBuffer;
    type Surface = MaskTexture;

    fn allocate_records(&mut self, capacity: usize) -> Result<GpuRecordBuffer, HeatmaskError> {
        let size = capacity as u64 * RECORD_STRIDE;
        let limits = self.device.limits();
        let max = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        if size > max {
            return Err(HeatmaskError::exhausted(
                ResourceKind::SourceBuffer,
                format!("{} bytes exceeds the device limit of {} bytes", size, max),
            ));
        }

        let buffer = self.guarded(ResourceKind::SourceBuffer, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("heat_sources"),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;

        Ok(GpuRecordBuffer {
            buffer,
            capacity,
            id: self.next_id(),
        })
    }

    fn upload_records(&mut self, buffer: &GpuRecordBuffer, records: &[BufferRecord]) {
        if !records.is_empty() {
            self.queue
                .write_buffer(&buffer.buffer, 0, bytemuck::cast_slice(records));
        }
    }

    fn allocate_surface(&mut self, edge: u32) -> Result<MaskTexture, HeatmaskError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if edge > max {
            return Err(HeatmaskError::exhausted(
                ResourceKind::MaskSurface,
                format!("edge {} exceeds the device limit of {}", edge, max),
            ));
        }

        let texture = self.guarded(ResourceKind::MaskSurface, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("heat_mask"),
                size: wgpu::Extent3d {
                    width: edge,
                    height: edge,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: MASK_FORMAT,
                usage: wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(MaskTexture {
            texture,
            view,
            edge,
            id: self.next_id(),
        })
    }

    fn bind_static(&mut self, params: &StaticParameters) -> Result<(), HeatmaskError> {
        let noise = &params.noise;
        let max = self.device.limits().max_texture_dimension_2d;
        if noise.width > max || noise.height > max {
            return Err(HeatmaskError::exhausted(
                ResourceKind::NoiseTexture,
                format!(
                    "noise {}x{} exceeds the device limit of {}",
                    noise.width, noise.height, max
                ),
            ));
        }

        let noise_texture = self.guarded(ResourceKind::NoiseTexture, |device| {
            device.create_texture_with_data(
                &self.queue,
                &wgpu::TextureDescriptor {
                    label: Some("heat_noise"),
                    size: wgpu::Extent3d {
                        width: noise.width,
                        height: noise.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: NOISE_FORMAT,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                &noise.data,
            )
        })?;
        let noise_view = noise_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("heat_noise_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        self.queue.write_buffer(
            &self.static_buffer,
            0,
            bytemuck::bytes_of(&StaticUniforms::from(params)),
        );

        let id = self.next_id();
        if let Some(old) = self.statics.replace(StaticBinding {
            noise_texture,
            noise_view,
            sampler,
            id,
        }) {
            old.noise_texture.destroy();
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        job: DispatchJob<'_, GpuRecordBuffer, MaskTexture>,
    ) -> Result<(), HeatmaskError> {
        let statics = self
            .statics
            .as_ref()
            .ok_or_else(|| HeatmaskError::usage("static parameters were never bound on this device"))?;

        self.queue.write_buffer(
            &self.frame_buffer,
            0,
            bytemuck::bytes_of(&FrameUniforms::new(job.source_count)),
        );

        let key = (job.records.id, job.surface.id, statics.id);
        let stale = self.bind_group.as_ref().map_or(true, |cached| cached.key != key);
        if stale {
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("heat_mask_bg"),
                layout: &self.kernel.bind_group_layout,
                entries: &[
                    bg_buffer(0, &self.static_buffer),
                    bg_buffer(1, &self.frame_buffer),
                    bg_buffer(2, &job.records.buffer),
                    bg_view(3, &job.surface.view),
                    bg_view(4, &statics.noise_view),
                    bg_sampler(5, &statics.sampler),
                ],
            });
            log::debug!("Heat bind group rebuilt for key {:?}", key);
            self.bind_group = Some(CachedBindGroup { key, group });
        }
        let group = match &self.bind_group {
            Some(cached) => &cached.group,
            None => return Err(HeatmaskError::usage("heat bind group missing after rebuild")),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("heat_mask_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("heat_mask_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.kernel.pipeline);
            pass.set_bind_group(0, group, &[]);
            pass.dispatch_workgroups(job.grid.x, job.grid.y, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
