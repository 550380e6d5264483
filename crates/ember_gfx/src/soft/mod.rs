//! # Software Device
//!
//! Executes programs through their host references, one workgroup at a
//! time, in submission order. Used for tests, headless runs and as the
//! behavioral reference for the WGSL programs.
//!
//! Workgroups of one dispatch run sequentially, so atomics on hidden
//! counters are trivially serialized. Programs must not depend on the
//! order workgroups run in, exactly as on the GPU.

mod bindings;
mod store;

pub use bindings::Bindings;

use tracing::trace;

use crate::context::{
    CommandContext, DispatchIndirectArgs, DrawIndexedIndirectArgs, DrawState, GfxDevice,
};
use crate::desc::{BindFlags, BufferDesc, MiscFlags, TextureDesc};
use crate::error::{GfxError, GfxResult};
use crate::program::{
    ClipVertex, ComputeKernel, DrawProgram, Slot, MAX_CONSTANT_SLOTS, MAX_READ_ONLY_SLOTS,
    MAX_READ_WRITE_SLOTS,
};
use crate::resource::{GpuBuffer, GpuTexture, ResourceId};

use store::{ResourceKind, SoftResource};

/// Vertices produced by one draw call.
#[derive(Debug, Clone)]
pub struct DrawCapture {
    /// Program label.
    pub label: &'static str,
    /// Fixed-function state the draw used.
    pub state: DrawState,
    /// Instances drawn.
    pub instance_count: u32,
    /// Indices per instance.
    pub index_count_per_instance: u32,
    /// Vertex stage output, instance-major.
    pub vertices: Vec<ClipVertex>,
}

impl DrawCapture {
    /// Vertex outputs of instance `instance`.
    #[must_use]
    pub fn instance(&self, instance: u32) -> &[ClipVertex] {
        let per = self.index_count_per_instance as usize;
        let start = instance as usize * per;
        self.vertices.get(start..start + per).unwrap_or(&[])
    }
}

/// Work counters of a software device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftStats {
    /// Direct dispatches.
    pub dispatches: u64,
    /// Indirect dispatches.
    pub indirect_dispatches: u64,
    /// Workgroups executed.
    pub workgroups: u64,
    /// Draw calls.
    pub draws: u64,
    /// Buffer updates from the host.
    pub buffer_updates: u64,
}

/// Host-executed device and immediate context.
#[derive(Debug, Default)]
pub struct SoftDevice {
    resources: Vec<SoftResource>,
    constants: [Option<ResourceId>; MAX_CONSTANT_SLOTS],
    read_only: [Option<ResourceId>; MAX_READ_ONLY_SLOTS],
    read_write: [Option<ResourceId>; MAX_READ_WRITE_SLOTS],
    captures: Vec<DrawCapture>,
    stats: SoftStats,
}

impl SoftDevice {
    /// Creates an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws recorded since the last [`SoftDevice::take_captures`].
    #[must_use]
    pub fn captures(&self) -> &[DrawCapture] {
        &self.captures
    }

    /// Drains recorded draws.
    pub fn take_captures(&mut self) -> Vec<DrawCapture> {
        std::mem::take(&mut self.captures)
    }

    /// Work counters.
    #[must_use]
    pub fn stats(&self) -> SoftStats {
        self.stats
    }

    fn push(&mut self, resource: SoftResource) -> ResourceId {
        let id = ResourceId(self.resources.len() as u32);
        self.resources.push(resource);
        id
    }

    fn resource(&self, id: ResourceId) -> GfxResult<&SoftResource> {
        self.resources
            .get(id.index())
            .ok_or(GfxError::UnknownResource(id))
    }

    fn resource_mut(&mut self, id: ResourceId) -> GfxResult<&mut SoftResource> {
        self.resources
            .get_mut(id.index())
            .ok_or(GfxError::UnknownResource(id))
    }

    fn checked_slot(slot: u32, max: usize, kind: Slot, label: &'static str) -> GfxResult<usize> {
        if (slot as usize) < max {
            Ok(slot as usize)
        } else {
            Err(GfxError::BindingMismatch {
                label,
                slot: kind.to_string(),
            })
        }
    }

    fn require_role(
        &self,
        buffer: &GpuBuffer,
        check: impl Fn(&BufferDesc) -> bool,
        role: &str,
    ) -> GfxResult<()> {
        let res = self.resource(buffer.id())?;
        match res.buffer_desc() {
            Some(desc) if check(desc) => Ok(()),
            _ => Err(GfxError::BindingMismatch {
                label: res.label,
                slot: role.to_owned(),
            }),
        }
    }

    fn validate_slots(&self, program: &'static str, slots: &[Slot]) -> GfxResult<()> {
        for &slot in slots {
            let bound = match slot {
                Slot::Constant(n) => self.constants.get(n as usize).copied().flatten(),
                Slot::ReadOnly(n) => self.read_only.get(n as usize).copied().flatten(),
                Slot::ReadWrite(n) => self.read_write.get(n as usize).copied().flatten(),
                Slot::Counter(n) => self
                    .read_write
                    .get(n as usize)
                    .copied()
                    .flatten()
                    .filter(|id| self.resource(*id).is_ok_and(|res| res.counter.is_some())),
            };
            if bound.is_none() {
                return Err(GfxError::UnboundSlot {
                    program,
                    slot: slot.to_string(),
                });
            }
        }
        Ok(())
    }

    fn bindings(&mut self) -> Bindings<'_> {
        Bindings::new(
            &mut self.resources,
            &self.constants,
            &self.read_only,
            &self.read_write,
        )
    }

    fn run_groups(&mut self, kernel: &dyn ComputeKernel, groups: [u32; 3]) {
        trace!(kernel = kernel.label(), ?groups, "soft dispatch");
        let mut bindings = self.bindings();
        for z in 0..groups[2] {
            for y in 0..groups[1] {
                for x in 0..groups[0] {
                    kernel.execute_group([x, y, z], &mut bindings);
                }
            }
        }
        self.stats.workgroups +=
            u64::from(groups[0]) * u64::from(groups[1]) * u64::from(groups[2]);
    }
}

impl GfxDevice for SoftDevice {
    type Context = Self;

    fn create_buffer(
        &mut self,
        label: &'static str,
        desc: &BufferDesc,
        initial: Option<&[u8]>,
    ) -> GfxResult<GpuBuffer> {
        desc.validate(label)?;
        let resource = SoftResource::new(label, ResourceKind::Buffer(*desc), desc.size, initial)?;
        let id = self.push(resource);
        Ok(GpuBuffer::new(id, label, *desc))
    }

    fn create_texture(
        &mut self,
        label: &'static str,
        desc: &TextureDesc,
        initial: Option<&[u8]>,
    ) -> GfxResult<GpuTexture> {
        desc.validate(label)?;
        let resource =
            SoftResource::new(label, ResourceKind::Texture(*desc), desc.byte_size(), initial)?;
        let id = self.push(resource);
        Ok(GpuTexture::new(id, label, *desc))
    }

    fn immediate_context(&mut self) -> &mut Self {
        self
    }
}

impl CommandContext for SoftDevice {
    fn set_constant_buffer(&mut self, slot: u32, buffer: &GpuBuffer) -> GfxResult<()> {
        let index = Self::checked_slot(slot, MAX_CONSTANT_SLOTS, Slot::Constant(slot), buffer.label())?;
        self.require_role(
            buffer,
            |desc| desc.bind_flags.contains(BindFlags::CONSTANT_BUFFER),
            "constant buffer",
        )?;
        self.constants[index] = Some(buffer.id());
        Ok(())
    }

    fn set_shader_resource(&mut self, slot: u32, resource: ResourceId) -> GfxResult<()> {
        let label = self.resource(resource)?.label;
        let index = Self::checked_slot(slot, MAX_READ_ONLY_SLOTS, Slot::ReadOnly(slot), label)?;
        self.read_only[index] = Some(resource);
        Ok(())
    }

    fn set_unordered_access(
        &mut self,
        slot: u32,
        buffer: &GpuBuffer,
        initial_count: Option<u32>,
    ) -> GfxResult<()> {
        let index =
            Self::checked_slot(slot, MAX_READ_WRITE_SLOTS, Slot::ReadWrite(slot), buffer.label())?;
        self.require_role(
            buffer,
            |desc| desc.bind_flags.contains(BindFlags::UNORDERED_ACCESS),
            "unordered access",
        )?;
        if let Some(count) = initial_count {
            let res = self.resource_mut(buffer.id())?;
            match res.counter.as_mut() {
                Some(counter) => *counter = count,
                None => return Err(GfxError::NoCounter(res.label)),
            }
        }
        self.read_write[index] = Some(buffer.id());
        Ok(())
    }

    fn clear_bindings(&mut self) {
        self.constants = [None; MAX_CONSTANT_SLOTS];
        self.read_only = [None; MAX_READ_ONLY_SLOTS];
        self.read_write = [None; MAX_READ_WRITE_SLOTS];
    }

    fn update_buffer(&mut self, buffer: &GpuBuffer, data: &[u8]) -> GfxResult<()> {
        self.resource_mut(buffer.id())?.write_bytes(0, data)?;
        self.stats.buffer_updates += 1;
        Ok(())
    }

    fn copy_structure_count(
        &mut self,
        dst: &GpuBuffer,
        dst_offset: u64,
        src: &GpuBuffer,
    ) -> GfxResult<()> {
        let src_res = self.resource(src.id())?;
        let count = src_res.counter.ok_or(GfxError::NoCounter(src_res.label))?;
        self.resource_mut(dst.id())?
            .write_bytes(dst_offset, bytemuck::bytes_of(&count))
    }

    fn dispatch(&mut self, kernel: &dyn ComputeKernel, groups: [u32; 3]) -> GfxResult<()> {
        self.validate_slots(kernel.label(), kernel.slots())?;
        self.stats.dispatches += 1;
        self.run_groups(kernel, groups);
        Ok(())
    }

    fn dispatch_indirect(
        &mut self,
        kernel: &dyn ComputeKernel,
        args: &GpuBuffer,
        offset: u64,
    ) -> GfxResult<()> {
        self.validate_slots(kernel.label(), kernel.slots())?;
        self.require_role(
            args,
            |desc| desc.misc_flags.contains(MiscFlags::INDIRECT_ARGS),
            "indirect arguments",
        )?;
        let dispatch: DispatchIndirectArgs = self.resource(args.id())?.read_at(offset as usize);
        self.stats.indirect_dispatches += 1;
        self.run_groups(kernel, [dispatch.x, dispatch.y, dispatch.z]);
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
        self.validate_slots(program.label(), program.slots())?;
        self.require_role(
            index_buffer,
            |desc| desc.bind_flags.contains(BindFlags::INDEX_BUFFER),
            "index buffer",
        )?;
        self.require_role(
            args,
            |desc| desc.misc_flags.contains(MiscFlags::INDIRECT_ARGS),
            "indirect arguments",
        )?;

        let draw: DrawIndexedIndirectArgs = self.resource(args.id())?.read_at(offset as usize);
        let index_res = self.resource(index_buffer.id())?;
        let indices: Vec<i64> = (0..draw.index_count_per_instance)
            .map(|i| {
                let at = draw.start_index + i;
                let index = if index_buffer.desc().stride == 2 {
                    u32::from(index_res.record::<u16>(at))
                } else {
                    index_res.record::<u32>(at)
                };
                i64::from(index) + i64::from(draw.base_vertex)
            })
            .collect();

        let bindings = self.bindings();
        let mut vertices =
            Vec::with_capacity(indices.len() * draw.instance_count as usize);
        for instance in draw.start_instance..draw.start_instance + draw.instance_count {
            for &vertex in &indices {
                vertices.push(program.vertex(vertex.max(0) as u32, instance, &bindings));
            }
        }

        trace!(
            program = program.label(),
            instances = draw.instance_count,
            "soft draw"
        );
        self.stats.draws += 1;
        self.captures.push(DrawCapture {
            label: program.label(),
            state: *state,
            instance_count: draw.instance_count,
            index_count_per_instance: draw.index_count_per_instance,
            vertices,
        });
        Ok(())
    }

    fn resolved_structure_count(&mut self, buffer: &GpuBuffer) -> Option<u32> {
        self.resource(buffer.id()).ok().and_then(|res| res.counter)
    }

    fn read_buffer(&mut self, buffer: &GpuBuffer) -> GfxResult<Vec<u8>> {
        Ok(self.resource(buffer.id())?.bytes().to_vec())
    }

    fn structure_count(&mut self, buffer: &GpuBuffer) -> GfxResult<u32> {
        let res = self.resource(buffer.id())?;
        res.counter.ok_or(GfxError::NoCounter(res.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::group_count;

    /// Appends its global thread index while below a limit.
    struct AppendIndices;

    impl ComputeKernel for AppendIndices {
        fn label(&self) -> &'static str {
            "test_append_indices"
        }

        fn source(&self) -> &'static str {
            ""
        }

        fn slots(&self) -> &'static [Slot] {
            &[Slot::Constant(0), Slot::ReadWrite(0), Slot::Counter(0)]
        }

        fn workgroup_size(&self) -> u32 {
            4
        }

        fn execute_group(&self, group: [u32; 3], bindings: &mut Bindings<'_>) {
            let limit: u32 = bindings.constant(0);
            for local in 0..self.workgroup_size() {
                let id = group[0] * self.workgroup_size() + local;
                if id < limit {
                    bindings.append(0, id);
                }
            }
        }
    }

    /// Moves every record from a consume buffer to an append buffer.
    struct Drain;

    impl ComputeKernel for Drain {
        fn label(&self) -> &'static str {
            "test_drain"
        }

        fn source(&self) -> &'static str {
            ""
        }

        fn slots(&self) -> &'static [Slot] {
            &[Slot::ReadWrite(0), Slot::ReadWrite(1)]
        }

        fn execute_group(&self, _group: [u32; 3], bindings: &mut Bindings<'_>) {
            while let Some(value) = bindings.consume::<u32>(0) {
                bindings.append(1, value);
            }
        }
    }

    fn setup() -> (SoftDevice, GpuBuffer, GpuBuffer) {
        let mut device = SoftDevice::new();
        let limit = device
            .create_buffer("limit", &BufferDesc::constant::<[u32; 4]>(), None)
            .unwrap();
        let list = device
            .create_buffer("list", &BufferDesc::append::<u32>(16), None)
            .unwrap();
        (device, limit, list)
    }

    #[test]
    fn test_append_counter_and_structure_count() {
        let (mut device, limit, list) = setup();
        device.upload(&limit, &[10u32, 0, 0, 0]).unwrap();
        device.set_constant_buffer(0, &limit).unwrap();
        device.set_unordered_access(0, &list, Some(0)).unwrap();
        device
            .dispatch(&AppendIndices, [group_count(16, 4), 1, 1])
            .unwrap();

        assert_eq!(device.structure_count(&list).unwrap(), 10);
        let records: Vec<u32> = device.read_records(&list).unwrap();
        assert_eq!(&records[..10], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let counts = device
            .create_buffer("counts", &BufferDesc::constant::<[u32; 4]>(), None)
            .unwrap();
        device.copy_structure_count(&counts, 4, &list).unwrap();
        let copied: Vec<[u32; 4]> = device.read_records(&counts).unwrap();
        assert_eq!(copied[0], [0, 10, 0, 0]);
    }

    #[test]
    fn test_append_stops_at_capacity() {
        let (mut device, limit, list) = setup();
        device.upload(&limit, &[100u32, 0, 0, 0]).unwrap();
        device.set_constant_buffer(0, &limit).unwrap();
        device.set_unordered_access(0, &list, Some(0)).unwrap();
        device.dispatch(&AppendIndices, [25, 1, 1]).unwrap();
        assert_eq!(device.structure_count(&list).unwrap(), 16);
    }

    #[test]
    fn test_consume_until_empty() {
        let mut device = SoftDevice::new();
        let initial: Vec<u32> = (0..5).collect();
        let source = device
            .create_buffer(
                "source",
                &BufferDesc::append::<u32>(5),
                Some(bytemuck::cast_slice(&initial)),
            )
            .unwrap();
        let sink = device
            .create_buffer("sink", &BufferDesc::append::<u32>(5), None)
            .unwrap();

        device.set_unordered_access(0, &source, Some(5)).unwrap();
        device.set_unordered_access(1, &sink, Some(0)).unwrap();
        device.dispatch(&Drain, [1, 1, 1]).unwrap();

        assert_eq!(device.structure_count(&source).unwrap(), 0);
        assert_eq!(device.structure_count(&sink).unwrap(), 5);
        let drained: Vec<u32> = device.read_records(&sink).unwrap();
        assert_eq!(drained, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_unbound_slot_is_reported() {
        let (mut device, _limit, list) = setup();
        device.set_unordered_access(0, &list, None).unwrap();
        let err = device.dispatch(&AppendIndices, [1, 1, 1]).unwrap_err();
        assert!(matches!(err, GfxError::UnboundSlot { .. }));
    }

    #[test]
    fn test_initial_count_requires_counter() {
        let mut device = SoftDevice::new();
        let plain = device
            .create_buffer("plain", &BufferDesc::structured::<u32>(4), None)
            .unwrap();
        assert!(matches!(
            device.set_unordered_access(0, &plain, Some(0)),
            Err(GfxError::NoCounter("plain"))
        ));
    }

    #[test]
    fn test_dispatch_indirect_reads_group_counts() {
        let (mut device, limit, list) = setup();
        let args = device
            .create_buffer(
                "args",
                &BufferDesc::indirect_args(DispatchIndirectArgs::SIZE),
                Some(bytemuck::bytes_of(&DispatchIndirectArgs { x: 2, y: 1, z: 1 })),
            )
            .unwrap();
        device.upload(&limit, &[16u32, 0, 0, 0]).unwrap();
        device.set_constant_buffer(0, &limit).unwrap();
        device.set_unordered_access(0, &list, Some(0)).unwrap();
        device.dispatch_indirect(&AppendIndices, &args, 0).unwrap();

        // Two groups of four threads.
        assert_eq!(device.structure_count(&list).unwrap(), 8);
        assert_eq!(device.stats().indirect_dispatches, 1);
        assert_eq!(device.stats().workgroups, 2);
    }
}
