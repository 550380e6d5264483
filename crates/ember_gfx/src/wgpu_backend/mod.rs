//! # Native Backend
//!
//! Executes programs on a real GPU through wgpu.
//!
//! - Commands are recorded into one pending encoder and submitted on
//!   readback or [`WgpuDevice::flush`], so submission order is encoder order.
//! - Host updates are staged through a copy inside the same encoder, which
//!   keeps them ordered against dispatches recorded before them.
//! - Hidden counters live in a 4-byte companion buffer bound at the
//!   `Counter` slot of their owner.
//! - Non-blocking counter reads go through a small ring of mappable staging
//!   buffers that are harvested with `Maintain::Poll`.

mod readback;

use std::collections::HashMap;

use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::context::{CommandContext, DrawState, GfxDevice};
use crate::desc::{BindFlags, BufferDesc, MiscFlags, TextureDesc, TextureFormat};
use crate::error::{GfxError, GfxResult};
use crate::program::{
    ComputeKernel, DrawProgram, Slot, MAX_CONSTANT_SLOTS, MAX_READ_ONLY_SLOTS,
    MAX_READ_WRITE_SLOTS,
};
use crate::resource::{GpuBuffer, GpuTexture, ResourceId};

use readback::CounterReadback;

/// Staging buffers per counter for non-blocking reads.
const READBACK_LATENCY: usize = 3;

enum NativeResource {
    Buffer {
        label: &'static str,
        desc: BufferDesc,
        buffer: wgpu::Buffer,
        counter: Option<wgpu::Buffer>,
    },
    Texture {
        label: &'static str,
        view: wgpu::TextureView,
        _texture: wgpu::Texture,
    },
}

impl NativeResource {
    fn label(&self) -> &'static str {
        match self {
            Self::Buffer { label, .. } | Self::Texture { label, .. } => *label,
        }
    }
}

/// Where draws are rendered to.
pub struct RenderTarget {
    /// Color attachment, loaded and stored.
    pub color: wgpu::TextureView,
    /// Format of `color`.
    pub format: wgpu::TextureFormat,
    /// Scene depth (`Depth32Float`) used when a draw enables depth testing.
    pub depth: Option<wgpu::TextureView>,
}

/// Bit `i` set when read-only slot `i` of a program is bound to a texture.
type TextureMask = u32;

type ComputeKey = (&'static str, TextureMask);
type RenderKey = (&'static str, TextureMask, bool, wgpu::BlendState);

struct CachedPipeline<P> {
    layout: wgpu::BindGroupLayout,
    pipeline: P,
}

/// Device and immediate context backed by wgpu.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    resources: Vec<NativeResource>,
    constants: [Option<ResourceId>; MAX_CONSTANT_SLOTS],
    read_only: [Option<ResourceId>; MAX_READ_ONLY_SLOTS],
    read_write: [Option<ResourceId>; MAX_READ_WRITE_SLOTS],
    compute_pipelines: HashMap<ComputeKey, CachedPipeline<wgpu::ComputePipeline>>,
    render_pipelines: HashMap<RenderKey, CachedPipeline<wgpu::RenderPipeline>>,
    readbacks: HashMap<ResourceId, CounterReadback>,
    target: Option<RenderTarget>,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuDevice {
    /// Opens the default high-performance adapter without a surface.
    ///
    /// # Errors
    ///
    /// Returns [`GfxError::Backend`] when no adapter or device is available.
    pub fn new() -> GfxResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| GfxError::Backend("no compatible adapter".to_owned()))?;

        info!(adapter = %adapter.get_info().name, "opening GPU device");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("ember device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| GfxError::Backend(e.to_string()))?;

        Ok(Self::from_parts(device, queue))
    }

    /// Wraps a device and queue owned by the host renderer.
    #[must_use]
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            resources: Vec::new(),
            constants: [None; MAX_CONSTANT_SLOTS],
            read_only: [None; MAX_READ_ONLY_SLOTS],
            read_write: [None; MAX_READ_WRITE_SLOTS],
            compute_pipelines: HashMap::new(),
            render_pipelines: HashMap::new(),
            readbacks: HashMap::new(),
            target: None,
            encoder: None,
        }
    }

    /// Sets the attachments later draws render into.
    pub fn set_render_target(&mut self, target: RenderTarget) {
        let format_changed = self
            .target
            .as_ref()
            .map_or(true, |old| old.format != target.format);
        if format_changed {
            self.render_pipelines.clear();
        }
        self.target = Some(target);
    }

    /// Submits all recorded work.
    pub fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    /// The underlying wgpu device.
    #[must_use]
    pub fn raw_device(&self) -> &wgpu::Device {
        &self.device
    }

    fn resource(&self, id: ResourceId) -> GfxResult<&NativeResource> {
        self.resources
            .get(id.index())
            .ok_or(GfxError::UnknownResource(id))
    }

    /// Copies `data` into `dst` at `offset` through a staging buffer recorded
    /// in the pending encoder.
    fn staged_write(
        &mut self,
        dst: ResourceId,
        counter: bool,
        offset: u64,
        data: &[u8],
    ) -> GfxResult<()> {
        let target = native_buffer(&self.resources, dst, counter)?;
        let len = data.len() as u64;
        if len % 4 != 0 || offset % 4 != 0 || offset + len > target.size() {
            return Err(GfxError::OutOfRange {
                label: self.resource(dst)?.label(),
                offset,
                len,
                size: target.size(),
            });
        }
        let staging = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("ember staging"),
                contents: data,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        pending(&mut self.encoder, &self.device).copy_buffer_to_buffer(
            &staging, 0, target, offset, len,
        );
        Ok(())
    }

    fn slot_resource(&self, slot: Slot) -> Option<ResourceId> {
        match slot {
            Slot::Constant(n) => self.constants.get(n as usize).copied().flatten(),
            Slot::ReadOnly(n) => self.read_only.get(n as usize).copied().flatten(),
            Slot::ReadWrite(n) | Slot::Counter(n) => {
                self.read_write.get(n as usize).copied().flatten()
            }
        }
    }

    fn bind_group(
        &self,
        program: &'static str,
        layout: &wgpu::BindGroupLayout,
        slots: &[Slot],
    ) -> GfxResult<wgpu::BindGroup> {
        let mut entries = Vec::with_capacity(slots.len());
        for &slot in slots {
            let unbound = || GfxError::UnboundSlot {
                program,
                slot: slot.to_string(),
            };
            let id = self.slot_resource(slot).ok_or_else(unbound)?;
            let resource = match (slot, self.resource(id)?) {
                (Slot::Counter(_), NativeResource::Buffer { counter, .. }) => {
                    counter.as_ref().ok_or_else(unbound)?.as_entire_binding()
                }
                (_, NativeResource::Buffer { buffer, .. }) => buffer.as_entire_binding(),
                (_, NativeResource::Texture { view, .. }) => wgpu::BindingResource::TextureView(view),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: slot.wgsl_binding(),
                resource,
            });
        }
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program),
            layout,
            entries: &entries,
        }))
    }

    fn texture_mask(&self, slots: &[Slot]) -> TextureMask {
        slots
            .iter()
            .filter_map(|&slot| match slot {
                Slot::ReadOnly(n) => Some(n),
                _ => None,
            })
            .filter(|&n| {
                self.read_only
                    .get(n as usize)
                    .copied()
                    .flatten()
                    .and_then(|id| self.resources.get(id.index()))
                    .is_some_and(|res| matches!(res, NativeResource::Texture { .. }))
            })
            .fold(0, |mask, n| mask | (1 << n))
    }

    /// Explicit layout for `slots`; read-only slots become textures or
    /// read-only storage according to `mask`.
    fn bind_group_layout(
        &self,
        label: &'static str,
        slots: &[Slot],
        mask: TextureMask,
        visibility: wgpu::ShaderStages,
    ) -> wgpu::BindGroupLayout {
        let storage = |read_only| wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let entries: Vec<wgpu::BindGroupLayoutEntry> = slots
            .iter()
            .map(|&slot| wgpu::BindGroupLayoutEntry {
                binding: slot.wgsl_binding(),
                visibility,
                ty: match slot {
                    Slot::Constant(_) => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    Slot::ReadOnly(n) if mask & (1 << n) != 0 => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    Slot::ReadOnly(_) => storage(true),
                    Slot::ReadWrite(_) | Slot::Counter(_) => storage(false),
                },
                count: None,
            })
            .collect();
        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            })
    }

    fn ensure_compute_pipeline(&mut self, kernel: &dyn ComputeKernel) -> ComputeKey {
        let key = (kernel.label(), self.texture_mask(kernel.slots()));
        if self.compute_pipelines.contains_key(&key) {
            return key;
        }
        debug!(kernel = kernel.label(), "compiling compute pipeline");
        let layout = self.bind_group_layout(
            kernel.label(),
            kernel.slots(),
            key.1,
            wgpu::ShaderStages::COMPUTE,
        );
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(kernel.label()),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.label()),
            source: wgpu::ShaderSource::Wgsl(kernel.source().into()),
        });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel.label()),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: "main",
            });
        self.compute_pipelines
            .insert(key, CachedPipeline { layout, pipeline });
        key
    }

    fn ensure_render_pipeline(
        &mut self,
        program: &dyn DrawProgram,
        state: &DrawState,
    ) -> GfxResult<RenderKey> {
        let key = (
            program.label(),
            self.texture_mask(program.slots()),
            state.depth_test,
            state.blend,
        );
        if self.render_pipelines.contains_key(&key) {
            return Ok(key);
        }
        let format = self
            .target
            .as_ref()
            .ok_or_else(|| GfxError::Backend("no render target set".to_owned()))?
            .format;

        debug!(program = program.label(), "compiling render pipeline");
        let layout = self.bind_group_layout(
            program.label(),
            program.slots(),
            key.1,
            wgpu::ShaderStages::VERTEX_FRAGMENT,
        );
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(program.label()),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.label()),
            source: wgpu::ShaderSource::Wgsl(program.source().into()),
        });
        let depth_stencil = state.depth_test.then(|| wgpu::DepthStencilState {
            format: wgpu::TextureFormat::Depth32Float,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.label()),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(state.blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
            });
        self.render_pipelines
            .insert(key, CachedPipeline { layout, pipeline });
        Ok(key)
    }

    fn require_buffer_role(
        &self,
        buffer: &GpuBuffer,
        check: impl Fn(&BufferDesc) -> bool,
        role: &str,
    ) -> GfxResult<()> {
        native_buffer(&self.resources, buffer.id(), false)?;
        if check(buffer.desc()) {
            Ok(())
        } else {
            Err(GfxError::BindingMismatch {
                label: buffer.label(),
                slot: role.to_owned(),
            })
        }
    }

    /// Blocking copy of the first `len` bytes of a buffer or its counter.
    fn read_back(&mut self, id: ResourceId, counter: bool, len: u64) -> GfxResult<Vec<u8>> {
        let src = native_buffer(&self.resources, id, counter)?;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ember readback"),
            size: len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        pending(&mut self.encoder, &self.device).copy_buffer_to_buffer(src, 0, &staging, 0, len);
        self.flush();

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| GfxError::Backend(e.to_string()))?
            .map_err(|e| GfxError::Backend(e.to_string()))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }
}

/// The pending encoder, created on first use.
fn pending<'a>(
    encoder: &'a mut Option<wgpu::CommandEncoder>,
    device: &wgpu::Device,
) -> &'a mut wgpu::CommandEncoder {
    encoder.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ember commands"),
        })
    })
}

/// The storage of buffer `id`, or its hidden counter.
fn native_buffer(
    resources: &[NativeResource],
    id: ResourceId,
    counter: bool,
) -> GfxResult<&wgpu::Buffer> {
    match resources.get(id.index()) {
        Some(NativeResource::Buffer {
            buffer,
            counter: counter_buffer,
            label,
            ..
        }) => {
            if counter {
                counter_buffer.as_ref().ok_or(GfxError::NoCounter(*label))
            } else {
                Ok(buffer)
            }
        }
        Some(NativeResource::Texture { label, .. }) => Err(GfxError::BindingMismatch {
            label: *label,
            slot: "buffer".to_owned(),
        }),
        None => Err(GfxError::UnknownResource(id)),
    }
}

fn buffer_usages(desc: &BufferDesc) -> wgpu::BufferUsages {
    let mut usage = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
    if desc.bind_flags.contains(BindFlags::CONSTANT_BUFFER) {
        usage |= wgpu::BufferUsages::UNIFORM;
    }
    if desc
        .bind_flags
        .intersects(BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS)
    {
        usage |= wgpu::BufferUsages::STORAGE;
    }
    if desc.bind_flags.contains(BindFlags::INDEX_BUFFER) {
        usage |= wgpu::BufferUsages::INDEX;
    }
    if desc.bind_flags.contains(BindFlags::VERTEX_BUFFER) {
        usage |= wgpu::BufferUsages::VERTEX;
    }
    if desc.misc_flags.contains(MiscFlags::INDIRECT_ARGS) {
        usage |= wgpu::BufferUsages::INDIRECT;
    }
    usage
}

const fn native_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

impl GfxDevice for WgpuDevice {
    type Context = Self;

    fn create_buffer(
        &mut self,
        label: &'static str,
        desc: &BufferDesc,
        initial: Option<&[u8]>,
    ) -> GfxResult<GpuBuffer> {
        desc.validate(label)?;
        let usage = buffer_usages(desc);
        let buffer = match initial {
            Some(data) if data.len() as u64 == desc.size => {
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(label),
                        contents: data,
                        usage,
                    })
            }
            _ => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: desc.size,
                usage,
                mapped_at_creation: false,
            }),
        };
        let counter = desc.has_counter().then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::bytes_of(&0u32),
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::COPY_DST,
                })
        });

        let id = ResourceId(self.resources.len() as u32);
        self.resources.push(NativeResource::Buffer {
            label,
            desc: *desc,
            buffer,
            counter,
        });
        if let Some(data) = initial.filter(|data| data.len() as u64 != desc.size) {
            self.staged_write(id, false, 0, data)?;
        }
        Ok(GpuBuffer::new(id, label, *desc))
    }

    fn create_texture(
        &mut self,
        label: &'static str,
        desc: &TextureDesc,
        initial: Option<&[u8]>,
    ) -> GfxResult<GpuTexture> {
        desc.validate(label)?;
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: native_format(desc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if let Some(data) = initial {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.width * desc.format.texel_size()),
                    rows_per_image: Some(desc.height),
                },
                size,
            );
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = ResourceId(self.resources.len() as u32);
        self.resources.push(NativeResource::Texture {
            label,
            view,
            _texture: texture,
        });
        Ok(GpuTexture::new(id, label, *desc))
    }

    fn immediate_context(&mut self) -> &mut Self {
        self
    }
}

impl CommandContext for WgpuDevice {
    fn set_constant_buffer(&mut self, slot: u32, buffer: &GpuBuffer) -> GfxResult<()> {
        self.require_buffer_role(
            buffer,
            |desc| desc.bind_flags.contains(BindFlags::CONSTANT_BUFFER),
            "constant buffer",
        )?;
        let entry = self
            .constants
            .get_mut(slot as usize)
            .ok_or_else(|| GfxError::BindingMismatch {
                label: buffer.label(),
                slot: Slot::Constant(slot).to_string(),
            })?;
        *entry = Some(buffer.id());
        Ok(())
    }

    fn set_shader_resource(&mut self, slot: u32, resource: ResourceId) -> GfxResult<()> {
        let label = self.resource(resource)?.label();
        let entry = self
            .read_only
            .get_mut(slot as usize)
            .ok_or_else(|| GfxError::BindingMismatch {
                label,
                slot: Slot::ReadOnly(slot).to_string(),
            })?;
        *entry = Some(resource);
        Ok(())
    }

    fn set_unordered_access(
        &mut self,
        slot: u32,
        buffer: &GpuBuffer,
        initial_count: Option<u32>,
    ) -> GfxResult<()> {
        self.require_buffer_role(
            buffer,
            |desc| desc.bind_flags.contains(BindFlags::UNORDERED_ACCESS),
            "unordered access",
        )?;
        if slot as usize >= MAX_READ_WRITE_SLOTS {
            return Err(GfxError::BindingMismatch {
                label: buffer.label(),
                slot: Slot::ReadWrite(slot).to_string(),
            });
        }
        if let Some(count) = initial_count {
            self.staged_write(buffer.id(), true, 0, bytemuck::bytes_of(&count))?;
        }
        self.read_write[slot as usize] = Some(buffer.id());
        Ok(())
    }

    fn clear_bindings(&mut self) {
        self.constants = [None; MAX_CONSTANT_SLOTS];
        self.read_only = [None; MAX_READ_ONLY_SLOTS];
        self.read_write = [None; MAX_READ_WRITE_SLOTS];
    }

    fn update_buffer(&mut self, buffer: &GpuBuffer, data: &[u8]) -> GfxResult<()> {
        self.staged_write(buffer.id(), false, 0, data)
    }

    fn copy_structure_count(
        &mut self,
        dst: &GpuBuffer,
        dst_offset: u64,
        src: &GpuBuffer,
    ) -> GfxResult<()> {
        let counter = native_buffer(&self.resources, src.id(), true)?;
        let target = native_buffer(&self.resources, dst.id(), false)?;
        if dst_offset % 4 != 0 || dst_offset + 4 > target.size() {
            return Err(GfxError::OutOfRange {
                label: dst.label(),
                offset: dst_offset,
                len: 4,
                size: target.size(),
            });
        }
        pending(&mut self.encoder, &self.device)
            .copy_buffer_to_buffer(counter, 0, target, dst_offset, 4);
        Ok(())
    }

    fn dispatch(&mut self, kernel: &dyn ComputeKernel, groups: [u32; 3]) -> GfxResult<()> {
        let key = self.ensure_compute_pipeline(kernel);
        let cached = &self.compute_pipelines[&key];
        let bind_group = self.bind_group(kernel.label(), &cached.layout, kernel.slots())?;

        let encoder = pending(&mut self.encoder, &self.device);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.label()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&cached.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }

    fn dispatch_indirect(
        &mut self,
        kernel: &dyn ComputeKernel,
        args: &GpuBuffer,
        offset: u64,
    ) -> GfxResult<()> {
        self.require_buffer_role(
            args,
            |desc| desc.misc_flags.contains(MiscFlags::INDIRECT_ARGS),
            "indirect arguments",
        )?;
        let key = self.ensure_compute_pipeline(kernel);
        let cached = &self.compute_pipelines[&key];
        let bind_group = self.bind_group(kernel.label(), &cached.layout, kernel.slots())?;
        let args_buffer = native_buffer(&self.resources, args.id(), false)?;

        let encoder = pending(&mut self.encoder, &self.device);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.label()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&cached.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups_indirect(args_buffer, offset);
        Ok(())
    }

    fn draw_indexed_instanced_indirect(
        &mut self,
        program: &dyn DrawProgram,
        state: &DrawState,
        index_buffer: &GpuBuffer,
        args: &GpuBuffer,
        offset: u64,
    ) -> GfxResult<()> {
        self.require_buffer_role(
            index_buffer,
            |desc| desc.bind_flags.contains(BindFlags::INDEX_BUFFER),
            "index buffer",
        )?;
        self.require_buffer_role(
            args,
            |desc| desc.misc_flags.contains(MiscFlags::INDIRECT_ARGS),
            "indirect arguments",
        )?;
        let key = self.ensure_render_pipeline(program, state)?;
        let cached = &self.render_pipelines[&key];
        let bind_group = self.bind_group(program.label(), &cached.layout, program.slots())?;
        let index_format = if index_buffer.desc().stride == 2 {
            wgpu::IndexFormat::Uint16
        } else {
            wgpu::IndexFormat::Uint32
        };
        let indices = native_buffer(&self.resources, index_buffer.id(), false)?;
        let args_buffer = native_buffer(&self.resources, args.id(), false)?;
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| GfxError::Backend("no render target set".to_owned()))?;
        let depth_view = if state.depth_test {
            Some(target.depth.as_ref().ok_or_else(|| {
                GfxError::Backend("depth test requested without a depth target".to_owned())
            })?)
        } else {
            None
        };

        let encoder = pending(&mut self.encoder, &self.device);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(program.label()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth_view.map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&cached.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_index_buffer(indices.slice(..), index_format);
        pass.draw_indexed_indirect(args_buffer, offset);
        Ok(())
    }

    fn resolved_structure_count(&mut self, buffer: &GpuBuffer) -> Option<u32> {
        let _ = self.device.poll(wgpu::Maintain::Poll);
        let counter = native_buffer(&self.resources, buffer.id(), true).ok()?;
        let readback = self
            .readbacks
            .entry(buffer.id())
            .or_insert_with(|| CounterReadback::new(&self.device, buffer.label(), READBACK_LATENCY));

        if let Some(slot) = readback.harvest_and_claim() {
            pending(&mut self.encoder, &self.device).copy_buffer_to_buffer(
                counter,
                0,
                readback.buffer(slot),
                0,
                4,
            );
            if let Some(encoder) = self.encoder.take() {
                self.queue.submit(Some(encoder.finish()));
            }
            readback.map(slot);
        }
        readback.latest()
    }

    fn read_buffer(&mut self, buffer: &GpuBuffer) -> GfxResult<Vec<u8>> {
        self.read_back(buffer.id(), false, buffer.desc().size)
    }

    fn structure_count(&mut self, buffer: &GpuBuffer) -> GfxResult<u32> {
        let bytes = self.read_back(buffer.id(), true, 4)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }
}
